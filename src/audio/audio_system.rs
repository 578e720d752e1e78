//! The main AudioSystem that owns the active driver and its real-time
//! workers.
//!
//! Real-time audio I/O runs on std threads owned by the driver, never on the
//! tokio runtime.

use anyhow::Result;

use super::alsa_driver::AlsaAudioDriver;
use super::driver::{AudioDriver, DeviceReport, NullAudioDriver};
use super::handoff::{HandoffRx, HandoffTx};
use super::stream_decoder::{Mp3StreamDecoder, StreamDecoder, DEFAULT_MAX_PENDING_BYTES};
use crate::config::Config;

/// Audio system configuration.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// ALSA playback device name (e.g. "default", "plughw:0,0")
    pub playback_device: String,
    /// ALSA capture device name
    pub capture_device: String,
    /// Desired sample rate (the hardware may grant a different one)
    pub sample_rate: u32,
    /// Desired channel count, 1 or 2
    pub channels: u32,
    /// Desired period size in frames (0 = let ALSA decide)
    pub period_size: usize,
    pub playback_enabled: bool,
    pub capture_enabled: bool,
    /// Buffers circulating between the producer and each worker
    pub handoff_pool_size: usize,
    /// 输入流的编码格式，目前只支持 "mp3"
    pub stream_format: String,
    /// Undecodable bytes tolerated before the stream is declared malformed
    pub max_pending_bytes: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            playback_device: "default".to_string(),
            capture_device: "default".to_string(),
            sample_rate: 44100,
            channels: 2,
            period_size: 32,
            playback_enabled: true,
            capture_enabled: false,
            handoff_pool_size: 2,
            stream_format: "mp3".to_string(),
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
        }
    }
}

impl From<&Config> for AudioConfig {
    fn from(config: &Config) -> Self {
        Self {
            playback_device: config.playback_device.to_string(),
            capture_device: config.capture_device.to_string(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            period_size: config.period_size,
            playback_enabled: config.playback_enabled,
            capture_enabled: config.capture_enabled,
            handoff_pool_size: config.handoff_pool_size,
            max_pending_bytes: config.max_pending_bytes,
            ..Self::default()
        }
    }
}

/// Factory function: create a decoder for the configured stream format.
pub fn create_decoder(config: &AudioConfig) -> Result<Box<dyn StreamDecoder>> {
    match config.stream_format.as_str() {
        "mp3" => {
            let decoder = Mp3StreamDecoder::new().with_max_pending_bytes(config.max_pending_bytes);
            Ok(Box::new(decoder))
        }
        other => anyhow::bail!("Unsupported stream format: {}", other),
    }
}

/// Owns the running driver. Falls back to [`NullAudioDriver`] when the real
/// device cannot be started.
pub struct AudioSystem {
    driver: Box<dyn AudioDriver>,
    using_null_driver: bool,
}

impl AudioSystem {
    /// Start ALSA with `config`, or the null driver if that fails.
    pub fn start(config: AudioConfig) -> Result<Self> {
        log::info!(
            "AudioSystem starting, playback: \"{}\" ({}), capture: \"{}\" ({}), rate: {}Hz, ch: {}, period: {}",
            config.playback_device,
            config.playback_enabled,
            config.capture_device,
            config.capture_enabled,
            config.sample_rate,
            config.channels,
            config.period_size,
        );
        let driver = Box::new(AlsaAudioDriver::new(config.clone()));
        Self::start_with(driver, &config)
    }

    pub fn start_with(mut driver: Box<dyn AudioDriver>, config: &AudioConfig) -> Result<Self> {
        match driver.start() {
            Ok(()) => Ok(Self {
                driver,
                using_null_driver: false,
            }),
            Err(e) => {
                log::error!("Audio driver '{}' failed to start: {:#}", driver.name(), e);
                driver.release();
                let mut null = NullAudioDriver::new(config.sample_rate, config.period_size);
                null.start()?;
                Ok(Self {
                    driver: Box::new(null),
                    using_null_driver: true,
                })
            }
        }
    }

    pub fn is_using_null_driver(&self) -> bool {
        self.using_null_driver
    }

    pub fn driver(&self) -> &dyn AudioDriver {
        self.driver.as_ref()
    }

    pub fn driver_mut(&mut self) -> &mut dyn AudioDriver {
        self.driver.as_mut()
    }

    /// Producer end for decoded audio. `None` when playback is not running or
    /// was already taken.
    pub fn playback_tx(&mut self) -> Option<HandoffTx> {
        self.driver.take_playback()
    }

    pub fn capture_rx(&mut self) -> Option<HandoffRx> {
        self.driver.take_capture()
    }

    pub fn report(&self) -> DeviceReport {
        DeviceReport::collect(self.driver.as_ref())
    }

    /// Signal the workers to stop and wait for them to finish.
    pub fn stop(&mut self, flush: bool) {
        self.driver.stop(flush);
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        self.driver.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::alsa_driver::tests::MockHost;
    use alsa::Direction;

    #[test]
    fn falls_back_to_null_driver() {
        let mut host = MockHost::granting(44100);
        host.fail_on = Some(Direction::Playback);
        let config = AudioConfig::default();
        let driver = Box::new(AlsaAudioDriver::with_host(host, config.clone()));

        let mut system = AudioSystem::start_with(driver, &config).unwrap();
        assert!(system.is_using_null_driver());
        assert_eq!(system.driver().name(), "null");
        assert!(system.playback_tx().is_none());
        assert_eq!(system.report().driver, "null");
    }

    #[test]
    fn uses_real_driver_when_it_starts() {
        let config = AudioConfig::default();
        let driver = Box::new(AlsaAudioDriver::with_host(MockHost::granting(44100), config.clone()));

        let mut system = AudioSystem::start_with(driver, &config).unwrap();
        assert!(!system.is_using_null_driver());
        assert!(system.driver().is_running());
        assert!(system.playback_tx().is_some());
        assert!(system.capture_rx().is_none());

        system.stop(true);
        assert!(!system.driver().is_running());
        system.stop(true);
    }

    #[test]
    fn decoder_factory_knows_mp3_only() {
        let mut config = AudioConfig::default();
        let decoder = create_decoder(&config).unwrap();
        assert_eq!(decoder.sample_rate(), 44100);

        config.stream_format = "opus".to_string();
        assert!(create_decoder(&config).is_err());
    }

    #[test]
    fn config_maps_build_time_values() {
        let config = Config::new().unwrap();
        let audio = AudioConfig::from(&config);
        assert_eq!(audio.sample_rate, config.sample_rate);
        assert_eq!(audio.playback_device, config.playback_device);
        assert_eq!(audio.stream_format, "mp3");
    }
}
