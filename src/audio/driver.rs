//! The audio driver abstraction every backend satisfies, plus the no-op
//! driver used when no device can be started.

use anyhow::{bail, Result};
use serde::Serialize;

use super::handoff::{HandoffRx, HandoffTx};
use super::stream_decoder::FALLBACK_SAMPLE_RATE;

/// One entry of a driver's device list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub description: String,
    pub inputs: usize,
    pub outputs: usize,
}

pub trait AudioDriver: Send {
    /// Short backend name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Open the selected device(s), negotiate parameters and start the I/O
    /// worker(s). Fails without leaving anything open; rejected while running.
    fn start(&mut self) -> Result<()>;

    /// Halt I/O and close the device(s). `flush` plays out queued frames
    /// instead of dropping them. Safe to call repeatedly.
    fn stop(&mut self, flush: bool);

    /// `stop(false)` plus teardown of everything held for a restart.
    fn release(&mut self);

    fn is_running(&self) -> bool;

    /// Negotiated sample rate while running, otherwise the requested one.
    fn sample_rate(&self) -> u32;

    /// Negotiated period size in frames while running, otherwise the
    /// requested one.
    fn buffer_size(&self) -> usize;

    fn valid_sample_rates(&self, device_index: usize) -> Vec<u32>;

    fn valid_buffer_sizes(&self, device_index: usize) -> Vec<usize>;

    fn max_inputs(&self) -> usize;

    fn max_outputs(&self) -> usize;

    fn input_channel_name(&self, channel: usize) -> String {
        format!("in {}", channel + 1)
    }

    fn output_channel_name(&self, channel: usize) -> String {
        format!("out {}", channel + 1)
    }

    /// `None` asks for the current selection.
    fn input_device_name(&self, index: Option<usize>) -> Option<String>;

    fn output_device_name(&self, index: Option<usize>) -> Option<String>;

    fn device_info(&self, index: usize) -> Option<DeviceInfo>;

    fn input_device_index(&self) -> usize;

    fn set_input_device_index(&mut self, index: usize) -> Result<()>;

    fn output_device_index(&self) -> usize;

    fn set_output_device_index(&mut self, index: usize) -> Result<()>;

    fn devices_count(&self) -> usize;

    fn can_be_started(&self) -> bool;

    fn has_control_panel(&self) -> bool {
        false
    }

    /// Producer end feeding the playback worker. Available once per start.
    fn take_playback(&mut self) -> Option<HandoffTx>;

    /// Consumer end fed by the capture worker. Available once per start.
    fn take_capture(&mut self) -> Option<HandoffRx>;
}

/// Capability summary for UI and configuration collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub driver: String,
    pub running: bool,
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub max_inputs: usize,
    pub max_outputs: usize,
    pub valid_sample_rates: Vec<u32>,
    pub valid_buffer_sizes: Vec<usize>,
    pub devices: Vec<DeviceInfo>,
}

impl DeviceReport {
    pub fn collect(driver: &dyn AudioDriver) -> Self {
        let output = driver.output_device_index();
        Self {
            driver: driver.name().to_string(),
            running: driver.is_running(),
            sample_rate: driver.sample_rate(),
            buffer_size: driver.buffer_size(),
            input_device: driver.input_device_name(None),
            output_device: driver.output_device_name(None),
            max_inputs: driver.max_inputs(),
            max_outputs: driver.max_outputs(),
            valid_sample_rates: driver.valid_sample_rates(output),
            valid_buffer_sizes: driver.valid_buffer_sizes(output),
            devices: (0..driver.devices_count())
                .filter_map(|i| driver.device_info(i))
                .collect(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Stands in when no real device could be started. Starts and stops
/// without touching hardware and never produces or consumes audio.
#[derive(Debug)]
pub struct NullAudioDriver {
    running: bool,
    sample_rate: u32,
    buffer_size: usize,
}

impl NullAudioDriver {
    pub fn new(sample_rate: u32, buffer_size: usize) -> Self {
        Self {
            running: false,
            sample_rate: if sample_rate == 0 { FALLBACK_SAMPLE_RATE } else { sample_rate },
            buffer_size,
        }
    }
}

impl Default for NullAudioDriver {
    fn default() -> Self {
        Self::new(FALLBACK_SAMPLE_RATE, 0)
    }
}

impl AudioDriver for NullAudioDriver {
    fn name(&self) -> &'static str {
        "null"
    }

    fn start(&mut self) -> Result<()> {
        if self.running {
            bail!("null driver already running");
        }
        log::info!("Null audio driver started, no audio device available");
        self.running = true;
        Ok(())
    }

    fn stop(&mut self, _flush: bool) {
        self.running = false;
    }

    fn release(&mut self) {
        self.stop(false);
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn valid_sample_rates(&self, _device_index: usize) -> Vec<u32> {
        vec![self.sample_rate]
    }

    fn valid_buffer_sizes(&self, _device_index: usize) -> Vec<usize> {
        Vec::new()
    }

    fn max_inputs(&self) -> usize {
        0
    }

    fn max_outputs(&self) -> usize {
        0
    }

    fn input_device_name(&self, _index: Option<usize>) -> Option<String> {
        None
    }

    fn output_device_name(&self, _index: Option<usize>) -> Option<String> {
        None
    }

    fn device_info(&self, _index: usize) -> Option<DeviceInfo> {
        None
    }

    fn input_device_index(&self) -> usize {
        0
    }

    fn set_input_device_index(&mut self, index: usize) -> Result<()> {
        bail!("null driver has no device {}", index)
    }

    fn output_device_index(&self) -> usize {
        0
    }

    fn set_output_device_index(&mut self, index: usize) -> Result<()> {
        bail!("null driver has no device {}", index)
    }

    fn devices_count(&self) -> usize {
        0
    }

    fn can_be_started(&self) -> bool {
        true
    }

    fn take_playback(&mut self) -> Option<HandoffTx> {
        None
    }

    fn take_capture(&mut self) -> Option<HandoffRx> {
        None
    }
}
