#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 音频设备配置
    pub playback_device: &'static str,
    pub capture_device: &'static str,
    pub sample_rate: u32,
    pub channels: u32,
    pub period_size: usize,
    pub playback_enabled: bool,
    pub capture_enabled: bool,
    pub handoff_pool_size: usize,

    // 解码器配置
    pub read_chunk_size: usize,
    pub max_pending_bytes: usize,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            playback_device: env!("AUDIO_PLAYBACK_DEVICE"),
            capture_device: env!("AUDIO_CAPTURE_DEVICE"),
            sample_rate: env!("AUDIO_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse AUDIO_SAMPLE_RATE")?,
            channels: env!("AUDIO_CHANNELS").parse()
                .map_err(|_| "Failed to parse AUDIO_CHANNELS")?,
            period_size: env!("AUDIO_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse AUDIO_PERIOD_SIZE")?,
            playback_enabled: env!("AUDIO_PLAYBACK_ENABLED").parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_ENABLED")?,
            capture_enabled: env!("AUDIO_CAPTURE_ENABLED").parse()
                .map_err(|_| "Failed to parse AUDIO_CAPTURE_ENABLED")?,
            handoff_pool_size: env!("AUDIO_HANDOFF_POOL_SIZE").parse()
                .map_err(|_| "Failed to parse AUDIO_HANDOFF_POOL_SIZE")?,

            read_chunk_size: env!("DECODER_READ_CHUNK_SIZE").parse()
                .map_err(|_| "Failed to parse DECODER_READ_CHUNK_SIZE")?,
            max_pending_bytes: env!("DECODER_MAX_PENDING_BYTES").parse()
                .map_err(|_| "Failed to parse DECODER_MAX_PENDING_BYTES")?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}
