//! ALSA implementation of [`AudioDriver`]: one real-time worker per enabled
//! direction, bound to the selected PCM device(s).

use std::time::Duration;

use alsa::Direction;
use anyhow::{bail, Context, Result};

use super::alsa_device::{self, AlsaParams, AlsaPcm, PcmCapabilities, PcmHint};
use super::audio_system::AudioConfig;
use super::driver::{AudioDriver, DeviceInfo};
use super::handoff::{handoff, HandoffRx, HandoffTx};
use super::stream_decoder::MAX_DECODED_FRAMES;
use super::worker::{PcmDevice, RealtimeWorker, WorkerIo};

/// Where PCM streams come from.
pub trait PcmHost: Send + 'static {
    type Pcm: PcmDevice;

    fn open(
        &self,
        device: &str,
        direction: Direction,
        sample_rate: u32,
        channels: u32,
        period_size: usize,
    ) -> Result<(Self::Pcm, AlsaParams, PcmCapabilities)>;

    fn probe(&self, device: &str, direction: Direction, channels: u32) -> Result<PcmCapabilities>;

    fn list_devices(&self) -> Vec<PcmHint>;
}

/// The system's ALSA library.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlsaHost;

impl PcmHost for AlsaHost {
    type Pcm = AlsaPcm;

    fn open(
        &self,
        device: &str,
        direction: Direction,
        sample_rate: u32,
        channels: u32,
        period_size: usize,
    ) -> Result<(AlsaPcm, AlsaParams, PcmCapabilities)> {
        let period = (period_size > 0).then_some(period_size);
        let pcm = match direction {
            Direction::Playback => alsa_device::open_playback(device, sample_rate, channels, period)?,
            Direction::Capture => alsa_device::open_capture(device, sample_rate, channels, period)?,
        };
        let params = pcm.params();
        let capabilities = pcm.capabilities().clone();
        Ok((pcm, params, capabilities))
    }

    fn probe(&self, device: &str, direction: Direction, channels: u32) -> Result<PcmCapabilities> {
        alsa_device::probe(device, direction, channels)
    }

    fn list_devices(&self) -> Vec<PcmHint> {
        match alsa_device::list_pcm_hints() {
            Ok(hints) => hints,
            Err(e) => {
                log::warn!("Failed to list ALSA devices: {}", e);
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Negotiated {
    device_index: usize,
    params: AlsaParams,
    capabilities: PcmCapabilities,
}

pub struct AlsaAudioDriver<H: PcmHost = AlsaHost> {
    host: H,
    config: AudioConfig,
    devices: Vec<PcmHint>,
    input_index: usize,
    output_index: usize,
    playback: RealtimeWorker<H::Pcm>,
    capture: RealtimeWorker<H::Pcm>,
    negotiated: Option<Negotiated>,
    playback_tx: Option<HandoffTx>,
    capture_rx: Option<HandoffRx>,
}

impl AlsaAudioDriver<AlsaHost> {
    pub fn new(config: AudioConfig) -> Self {
        Self::with_host(AlsaHost, config)
    }
}

impl<H: PcmHost> AlsaAudioDriver<H> {
    /// Build a driver over `host`. The device list is read once here.
    pub fn with_host(host: H, config: AudioConfig) -> Self {
        let mut devices = Vec::new();
        merge_device(&mut devices, config.playback_device.clone(), true, false);
        merge_device(&mut devices, config.capture_device.clone(), false, true);
        for hint in host.list_devices() {
            merge_hint(&mut devices, hint);
        }
        let output_index = position(&devices, &config.playback_device);
        let input_index = position(&devices, &config.capture_device);

        Self {
            host,
            config,
            devices,
            input_index,
            output_index,
            playback: RealtimeWorker::new("audio-play"),
            capture: RealtimeWorker::new("audio-record"),
            negotiated: None,
            playback_tx: None,
            capture_rx: None,
        }
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    fn open_worker(
        host: &H,
        config: &AudioConfig,
        worker: &mut RealtimeWorker<H::Pcm>,
        device: &str,
        direction: Direction,
    ) -> Result<(AlsaParams, PcmCapabilities)> {
        let mut negotiated = None;
        worker.init(|| {
            let (pcm, params, capabilities) = host.open(
                device,
                direction,
                config.sample_rate,
                config.channels,
                config.period_size,
            )?;
            negotiated = Some((params, capabilities));
            Ok(pcm)
        })?;
        negotiated.context("device opened without negotiated parameters")
    }

    fn start_workers(&mut self) -> Result<()> {
        let pool = self.config.handoff_pool_size;

        if self.config.playback_enabled {
            let device = self.devices[self.output_index].name.clone();
            let (params, capabilities) = Self::open_worker(
                &self.host,
                &self.config,
                &mut self.playback,
                &device,
                Direction::Playback,
            )
            .with_context(|| format!("Failed to start playback on '{}'", device))?;

            let period = Duration::from_secs_f64(params.period_size as f64 / params.sample_rate.max(1) as f64);
            self.playback.set_idle_wait(period.max(Duration::from_millis(1)));

            let (tx, rx) = handoff(pool, MAX_DECODED_FRAMES);
            self.playback.run(WorkerIo::Playback(rx), MAX_DECODED_FRAMES)?;
            self.playback_tx = Some(tx);
            self.negotiated = Some(Negotiated {
                device_index: self.output_index,
                params,
                capabilities,
            });
        }

        if self.config.capture_enabled {
            let device = self.devices[self.input_index].name.clone();
            let (params, capabilities) = Self::open_worker(
                &self.host,
                &self.config,
                &mut self.capture,
                &device,
                Direction::Capture,
            )
            .with_context(|| format!("Failed to start capture on '{}'", device))?;

            let (tx, rx) = handoff(pool, params.period_size.max(1));
            self.capture.run(WorkerIo::Capture(tx), params.period_size.max(1))?;
            self.capture_rx = Some(rx);
            if self.negotiated.is_none() {
                self.negotiated = Some(Negotiated {
                    device_index: self.input_index,
                    params,
                    capabilities,
                });
            }
        }
        Ok(())
    }

    fn capabilities(&self, device_index: usize) -> PcmCapabilities {
        if let Some(n) = self.negotiated.as_ref().filter(|n| n.device_index == device_index) {
            return n.capabilities.clone();
        }
        let Some(hint) = self.devices.get(device_index) else {
            return PcmCapabilities::default();
        };
        let direction = if hint.playback {
            Direction::Playback
        } else {
            Direction::Capture
        };
        match self.host.probe(&hint.name, direction, self.config.channels) {
            Ok(caps) => caps,
            Err(e) => {
                log::warn!("Failed to probe '{}': {:#}", hint.name, e);
                PcmCapabilities::default()
            }
        }
    }
}

fn merge_device(devices: &mut Vec<PcmHint>, name: String, playback: bool, capture: bool) {
    merge_hint(
        devices,
        PcmHint {
            description: name.clone(),
            name,
            playback,
            capture,
        },
    );
}

fn merge_hint(devices: &mut Vec<PcmHint>, hint: PcmHint) {
    match devices.iter_mut().find(|d| d.name == hint.name) {
        Some(existing) => {
            existing.playback |= hint.playback;
            existing.capture |= hint.capture;
            if existing.description == existing.name {
                existing.description = hint.description;
            }
        }
        None => devices.push(hint),
    }
}

fn position(devices: &[PcmHint], name: &str) -> usize {
    devices.iter().position(|d| d.name == name).unwrap_or(0)
}

impl<H: PcmHost> AudioDriver for AlsaAudioDriver<H> {
    fn name(&self) -> &'static str {
        "alsa"
    }

    fn start(&mut self) -> Result<()> {
        if self.is_running() {
            bail!("ALSA driver already running");
        }
        if !self.config.playback_enabled && !self.config.capture_enabled {
            bail!("Neither playback nor capture is enabled");
        }
        if let Err(e) = self.start_workers() {
            // Close whatever was opened before the failure.
            self.stop(false);
            return Err(e);
        }
        log::info!(
            "ALSA driver started: rate={}, period={}",
            self.sample_rate(),
            self.buffer_size()
        );
        Ok(())
    }

    fn stop(&mut self, flush: bool) {
        let was_running = self.is_running();
        self.playback_tx = None;
        self.capture_rx = None;
        self.playback.stop(flush);
        self.capture.stop(flush);
        self.negotiated = None;
        if was_running {
            log::info!("ALSA driver stopped");
        }
    }

    fn release(&mut self) {
        log::debug!("Releasing ALSA resources...");
        self.stop(false);
        log::debug!("ALSA released");
    }

    fn is_running(&self) -> bool {
        self.playback.is_running() || self.capture.is_running()
    }

    fn sample_rate(&self) -> u32 {
        self.negotiated
            .as_ref()
            .map_or(self.config.sample_rate, |n| n.params.sample_rate)
    }

    fn buffer_size(&self) -> usize {
        self.negotiated
            .as_ref()
            .map_or(self.config.period_size, |n| n.params.period_size)
    }

    fn valid_sample_rates(&self, device_index: usize) -> Vec<u32> {
        self.capabilities(device_index).sample_rates
    }

    fn valid_buffer_sizes(&self, device_index: usize) -> Vec<usize> {
        self.capabilities(device_index).buffer_sizes
    }

    fn max_inputs(&self) -> usize {
        self.config.channels as usize
    }

    fn max_outputs(&self) -> usize {
        self.config.channels as usize
    }

    fn input_device_name(&self, index: Option<usize>) -> Option<String> {
        let index = index.unwrap_or(self.input_index);
        self.devices.get(index).map(|d| d.name.clone())
    }

    fn output_device_name(&self, index: Option<usize>) -> Option<String> {
        let index = index.unwrap_or(self.output_index);
        self.devices.get(index).map(|d| d.name.clone())
    }

    fn device_info(&self, index: usize) -> Option<DeviceInfo> {
        let channels = self.config.channels as usize;
        self.devices.get(index).map(|d| DeviceInfo {
            index,
            name: d.name.clone(),
            description: d.description.clone(),
            inputs: if d.capture { channels } else { 0 },
            outputs: if d.playback { channels } else { 0 },
        })
    }

    fn input_device_index(&self) -> usize {
        self.input_index
    }

    fn set_input_device_index(&mut self, index: usize) -> Result<()> {
        if self.is_running() {
            bail!("Cannot change the input device while running");
        }
        match self.devices.get(index) {
            Some(d) if d.capture => {
                self.input_index = index;
                Ok(())
            }
            Some(d) => bail!("Device '{}' cannot capture", d.name),
            None => bail!("No device at index {}", index),
        }
    }

    fn output_device_index(&self) -> usize {
        self.output_index
    }

    fn set_output_device_index(&mut self, index: usize) -> Result<()> {
        if self.is_running() {
            bail!("Cannot change the output device while running");
        }
        match self.devices.get(index) {
            Some(d) if d.playback => {
                self.output_index = index;
                Ok(())
            }
            Some(d) => bail!("Device '{}' cannot play back", d.name),
            None => bail!("No device at index {}", index),
        }
    }

    fn devices_count(&self) -> usize {
        self.devices.len()
    }

    fn can_be_started(&self) -> bool {
        !self.devices.is_empty() && (self.config.playback_enabled || self.config.capture_enabled)
    }

    fn take_playback(&mut self) -> Option<HandoffTx> {
        self.playback_tx.take()
    }

    fn take_capture(&mut self) -> Option<HandoffRx> {
        self.capture_rx.take()
    }
}

impl<H: PcmHost> Drop for AlsaAudioDriver<H> {
    fn drop(&mut self) {
        self.release();
    }
}
