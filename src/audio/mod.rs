//! audio - Real-time audio pipeline
//!
//! Normalized sample buffers, streaming MP3 decoding, and ALSA playback and
//! capture driven by dedicated real-time worker threads.

pub mod alsa_device;
pub mod alsa_driver;
mod audio_system;
pub mod driver;
pub mod frame_decoder;
pub mod handoff;
pub mod mpa_header;
pub mod sample_buffer;
pub mod stream_decoder;
mod symphonia_backend;
pub mod worker;

pub use alsa_driver::AlsaAudioDriver;
pub use audio_system::{create_decoder, AudioConfig, AudioSystem};
pub use driver::{AudioDriver, DeviceInfo, DeviceReport, NullAudioDriver};
pub use frame_decoder::{DecodedFrame, FrameDecoder};
pub use handoff::{handoff, HandoffRx, HandoffTx};
pub use sample_buffer::{SampleBuffer, SampleBufferError, MAX_CHANNELS, ZERO_BUFFER};
pub use stream_decoder::{DecodeError, Mp3StreamDecoder, StreamDecoder};
pub use symphonia_backend::SymphoniaMp3Backend;
pub use worker::{interleave_i16, IoFault, PcmDevice, RealtimeWorker, WorkerState};
