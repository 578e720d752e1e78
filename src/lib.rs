pub mod audio;
pub mod config;
pub mod player;
pub mod recorder;
