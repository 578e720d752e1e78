use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    audio: Audio,
    decoder: Decoder,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Audio {
    playback_device: String,
    capture_device: String,
    sample_rate: u32,
    channels: u32,
    period_size: usize,
    playback_enabled: bool,
    capture_enabled: bool,
    handoff_pool_size: usize,
}

#[derive(Deserialize)]
struct Decoder {
    read_chunk_size: usize,
    max_pending_bytes: usize,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 应用信息
    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 音频配置
    println!("cargo:rustc-env=AUDIO_PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=AUDIO_CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=AUDIO_SAMPLE_RATE={}", config.audio.sample_rate);
    println!("cargo:rustc-env=AUDIO_CHANNELS={}", config.audio.channels);
    println!("cargo:rustc-env=AUDIO_PERIOD_SIZE={}", config.audio.period_size);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_ENABLED={}", config.audio.playback_enabled);
    println!("cargo:rustc-env=AUDIO_CAPTURE_ENABLED={}", config.audio.capture_enabled);
    println!("cargo:rustc-env=AUDIO_HANDOFF_POOL_SIZE={}", config.audio.handoff_pool_size);

    // 解码器配置
    println!("cargo:rustc-env=DECODER_READ_CHUNK_SIZE={}", config.decoder.read_chunk_size);
    println!("cargo:rustc-env=DECODER_MAX_PENDING_BYTES={}", config.decoder.max_pending_bytes);
}
