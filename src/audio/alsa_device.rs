//! ALSA PCM device wrappers for audio capture and playback.

use alsa::device_name::HintIter;
use alsa::pcm::{Access, Format, HwParams, State, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

use super::worker::{IoFault, PcmDevice};

/// Rates reported as valid when the hardware range covers them.
pub const STANDARD_RATES: [u32; 9] = [8000, 11025, 16000, 22050, 32000, 44100, 48000, 88200, 96000];

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels × sample_width)
    pub period_size: usize,
    /// Ring buffer size in frames
    pub buffer_size: usize,
}

/// What a device accepts, read from its unrestricted hardware parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PcmCapabilities {
    pub sample_rates: Vec<u32>,
    pub buffer_sizes: Vec<usize>,
}

impl PcmCapabilities {
    fn from_ranges(rate_min: u32, rate_max: u32, period_min: usize, period_max: usize) -> Self {
        let sample_rates = STANDARD_RATES
            .iter()
            .copied()
            .filter(|r| (rate_min..=rate_max).contains(r))
            .collect();
        let buffer_sizes = (5..=12)
            .map(|shift| 1usize << shift)
            .filter(|s| (period_min..=period_max).contains(s))
            .collect();
        Self {
            sample_rates,
            buffer_sizes,
        }
    }
}

/// An open, negotiated S16LE interleaved PCM stream.
pub struct AlsaPcm {
    pcm: PCM,
    params: AlsaParams,
    capabilities: PcmCapabilities,
    dir_name: &'static str,
}

impl AlsaPcm {
    pub fn params(&self) -> AlsaParams {
        self.params
    }

    pub fn capabilities(&self) -> &PcmCapabilities {
        &self.capabilities
    }

    fn fault(&self, e: alsa::Error) -> IoFault {
        if self.pcm.state() == State::XRun {
            IoFault::XRun
        } else {
            IoFault::Other(e.to_string())
        }
    }
}

impl PcmDevice for AlsaPcm {
    fn channels(&self) -> usize {
        self.params.channels as usize
    }

    fn period_size(&self) -> usize {
        self.params.period_size
    }

    fn write_interleaved(&mut self, samples: &[i16]) -> Result<usize, IoFault> {
        let io = self.pcm.io_i16().map_err(|e| self.fault(e))?;
        io.writei(samples).map_err(|e| self.fault(e))
    }

    fn read_interleaved(&mut self, samples: &mut [i16]) -> Result<usize, IoFault> {
        let io = self.pcm.io_i16().map_err(|e| self.fault(e))?;
        io.readi(samples).map_err(|e| self.fault(e))
    }

    fn recover(&mut self) -> Result<(), IoFault> {
        self.pcm.prepare().map_err(|e| IoFault::Other(e.to_string()))
    }

    fn close(&mut self, drain: bool) {
        let result = if drain && self.pcm.state() == State::Running {
            self.pcm.drain()
        } else {
            self.pcm.drop()
        };
        if let Err(e) = result {
            log::warn!("ALSA {} close: {}", self.dir_name, e);
        }
    }
}

/// Open a PCM device for capture (recording).
pub fn open_capture(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<AlsaPcm> {
    open_pcm(device, Direction::Capture, sample_rate, channels, period_size)
}

/// Open a PCM device for playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<AlsaPcm> {
    open_pcm(device, Direction::Playback, sample_rate, channels, period_size)
}

fn dir_name(direction: Direction) -> &'static str {
    match direction {
        Direction::Playback => "Playback",
        Direction::Capture => "Capture",
    }
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<AlsaPcm> {
    let dir_name = dir_name(direction);
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    // Configure hardware parameters; capabilities are read before the rate
    // and period are narrowed.
    let capabilities = {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)
            .with_context(|| format!("{} '{}': interleaved access not supported", dir_name, device))?;
        hwp.set_format(Format::S16LE)
            .with_context(|| format!("{} '{}': S16LE not supported", dir_name, device))?;
        hwp.set_channels(channels)
            .with_context(|| format!("{} '{}': {} channels not supported", dir_name, device, channels))?;
        let capabilities = capabilities_of(&hwp)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)
            .with_context(|| format!("Failed to apply hw params on '{}' ({})", device, dir_name))?;
        capabilities
    };

    // Read back actual negotiated parameters
    let params = {
        let hwp = pcm.hw_params_current()?;
        ensure_s16(hwp.get_format()?)
            .with_context(|| format!("{} '{}': format not applied", dir_name, device))?;
        AlsaParams {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
            buffer_size: hwp.get_buffer_size()? as usize,
        }
    };

    if params.sample_rate != sample_rate {
        log::warn!(
            "ALSA {}: requested {}Hz, device granted {}Hz",
            dir_name,
            sample_rate,
            params.sample_rate
        );
    }
    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}, buffer_size={}",
        dir_name,
        device,
        params.sample_rate,
        params.channels,
        params.period_size,
        params.buffer_size,
    );

    Ok(AlsaPcm {
        pcm,
        params,
        capabilities,
        dir_name,
    })
}

/// The hot loop only moves interleaved `i16`.
fn ensure_s16(format: Format) -> Result<()> {
    if format != Format::s16() {
        anyhow::bail!("device runs {:?}, expected {:?}", format, Format::s16());
    }
    Ok(())
}

fn capabilities_of(hwp: &HwParams) -> Result<PcmCapabilities> {
    Ok(PcmCapabilities::from_ranges(
        hwp.get_rate_min()?,
        hwp.get_rate_max()?,
        hwp.get_period_size_min()? as usize,
        hwp.get_period_size_max()? as usize,
    ))
}

/// Open a transient handle just long enough to read what the device accepts.
pub fn probe(device: &str, direction: Direction, channels: u32) -> Result<PcmCapabilities> {
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for probing", device))?;
    let hwp = HwParams::any(&pcm)?;
    hwp.set_access(Access::RWInterleaved)?;
    hwp.set_format(Format::S16LE)?;
    hwp.set_channels(channels)?;
    capabilities_of(&hwp)
}

/// A PCM endpoint listed by the ALSA name hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmHint {
    pub name: String,
    pub description: String,
    pub playback: bool,
    pub capture: bool,
}

/// List PCM endpoints. Hints without a direction serve both.
pub fn list_pcm_hints() -> Result<Vec<PcmHint>> {
    let hints = HintIter::new_str(None, "pcm").context("Failed to read ALSA device hints")?;
    Ok(hints
        .filter_map(|hint| {
            let name = hint.name?;
            let description = hint
                .desc
                .map(|d| d.replace('\n', " "))
                .unwrap_or_else(|| name.clone());
            let (playback, capture) = match hint.direction {
                Some(Direction::Playback) => (true, false),
                Some(Direction::Capture) => (false, true),
                None => (true, true),
            };
            Some(PcmHint {
                name,
                description,
                playback,
                capture,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_filter_standard_values() {
        let caps = PcmCapabilities::from_ranges(44100, 48000, 64, 1024);
        assert_eq!(caps.sample_rates, vec![44100, 48000]);
        assert_eq!(caps.buffer_sizes, vec![64, 128, 256, 512, 1024]);
    }

    #[test]
    fn fixed_rate_device_reports_single_rate() {
        let caps = PcmCapabilities::from_ranges(44100, 44100, 32, 32);
        assert_eq!(caps.sample_rates, vec![44100]);
        assert_eq!(caps.buffer_sizes, vec![32]);
    }

    #[test]
    fn only_native_s16_is_accepted() {
        assert!(ensure_s16(Format::s16()).is_ok());
        assert!(ensure_s16(Format::S32LE).is_err());
        assert!(ensure_s16(Format::FloatLE).is_err());
    }

    #[test]
    fn no_overlap_reports_nothing() {
        let caps = PcmCapabilities::from_ranges(12000, 12000, 5000, 6000);
        assert!(caps.sample_rates.is_empty());
        assert!(caps.buffer_sizes.is_empty());
    }
}
