//! The real-time I/O worker: a dedicated OS thread bound to one open PCM
//! device, running the blocking write (playback) or read (capture) loop.
//!
//! Uses std::thread (NOT tokio tasks) so the hot loop never competes with
//! async work for a runtime thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Result};

use super::handoff::{HandoffRx, HandoffTx};
use super::sample_buffer::SampleBuffer;

/// A device fault seen by the hot loop. Never fatal.
#[derive(Debug, thiserror::Error)]
pub enum IoFault {
    /// Underrun (playback) or overrun (capture); the stream must be
    /// re-prepared before further I/O.
    #[error("xrun")]
    XRun,
    #[error("{0}")]
    Other(String),
}

/// An open, negotiated PCM stream carrying interleaved `i16` frames.
pub trait PcmDevice: Send + 'static {
    fn channels(&self) -> usize;

    fn period_size(&self) -> usize;

    /// Blocking write. Returns the number of frames the device accepted.
    fn write_interleaved(&mut self, samples: &[i16]) -> Result<usize, IoFault>;

    /// Blocking read. Returns the number of frames delivered.
    fn read_interleaved(&mut self, samples: &mut [i16]) -> Result<usize, IoFault>;

    /// Bring the stream back to a usable state after an xrun.
    fn recover(&mut self) -> Result<(), IoFault>;

    /// Drain (play out what is queued) or drop pending frames, then close.
    fn close(&mut self, drain: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Initialized,
    Running,
    Stopping,
}

/// The worker's side of the handoff, which also fixes its direction.
pub enum WorkerIo {
    Playback(HandoffRx),
    Capture(HandoffTx),
}

pub struct RealtimeWorker<D: PcmDevice> {
    name: &'static str,
    state: WorkerState,
    device: Option<D>,
    running: Arc<AtomicBool>,
    drain: Arc<AtomicBool>,
    handle: Option<JoinHandle<WorkerIo>>,
    idle_wait: Duration,
}

impl<D: PcmDevice> RealtimeWorker<D> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: WorkerState::Idle,
            device: None,
            running: Arc::new(AtomicBool::new(false)),
            drain: Arc::new(AtomicBool::new(false)),
            handle: None,
            idle_wait: Duration::from_millis(1),
        }
    }

    /// How long an iteration with nothing to play parks before checking
    /// again.
    pub fn set_idle_wait(&mut self, idle_wait: Duration) {
        self.idle_wait = idle_wait;
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Open the device. On failure the worker stays `Idle` and nothing is
    /// left open.
    pub fn init<F>(&mut self, open: F) -> Result<()>
    where
        F: FnOnce() -> Result<D>,
    {
        if self.state != WorkerState::Idle {
            bail!("{} worker is not idle ({:?})", self.name, self.state);
        }
        self.device = Some(open()?);
        self.state = WorkerState::Initialized;
        Ok(())
    }

    /// Move the device onto a new thread and start the loop. `max_frames` is
    /// the capacity of the buffers travelling through `io`.
    pub fn run(&mut self, io: WorkerIo, max_frames: usize) -> Result<()> {
        if self.state != WorkerState::Initialized {
            bail!("{} worker cannot run from {:?}", self.name, self.state);
        }
        let Some(mut device) = self.device.take() else {
            bail!("{} worker has no device", self.name);
        };

        self.running.store(true, Ordering::SeqCst);
        self.drain.store(false, Ordering::SeqCst);
        let running = self.running.clone();
        let drain = self.drain.clone();
        let idle_wait = self.idle_wait;
        let name = self.name;

        let spawned = thread::Builder::new().name(name.into()).spawn(move || {
            let mut io = io;
            log::info!(
                "{} started: ch={}, period={}",
                name,
                device.channels(),
                device.period_size()
            );
            match &mut io {
                WorkerIo::Playback(rx) => {
                    playback_loop(&mut device, rx, &running, &drain, idle_wait, max_frames)
                }
                WorkerIo::Capture(tx) => capture_loop(&mut device, tx, &running),
            }
            device.close(drain.load(Ordering::SeqCst));
            log::info!("{} stopped", name);
            io
        });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state = WorkerState::Running;
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.state = WorkerState::Idle;
                Err(e.into())
            }
        }
    }

    /// Clear the run flag, wait for the loop to exit and the device to close.
    /// Returns the handoff end so a later run can reuse it. A no-op when idle.
    pub fn stop(&mut self, flush: bool) -> Option<WorkerIo> {
        match self.state {
            WorkerState::Idle | WorkerState::Stopping => None,
            WorkerState::Initialized => {
                if let Some(mut device) = self.device.take() {
                    device.close(flush);
                }
                self.state = WorkerState::Idle;
                None
            }
            WorkerState::Running => {
                self.state = WorkerState::Stopping;
                self.drain.store(flush, Ordering::SeqCst);
                self.running.store(false, Ordering::SeqCst);
                let io = match self.handle.take().map(|h| h.join()) {
                    Some(Ok(io)) => Some(io),
                    Some(Err(_)) => {
                        log::error!("{} thread panicked", self.name);
                        None
                    }
                    None => None,
                };
                self.state = WorkerState::Idle;
                io
            }
        }
    }
}

impl<D: PcmDevice> Drop for RealtimeWorker<D> {
    fn drop(&mut self) {
        self.stop(false);
    }
}

// ======================== Playback loop ========================

fn playback_loop<D: PcmDevice>(
    device: &mut D,
    rx: &mut HandoffRx,
    running: &AtomicBool,
    drain: &AtomicBool,
    idle_wait: Duration,
    max_frames: usize,
) {
    let channels = device.channels();
    let mut scratch = vec![0i16; max_frames * channels];

    while running.load(Ordering::Relaxed) {
        let Some(buf) = rx.try_take() else {
            thread::sleep(idle_wait);
            continue;
        };
        write_buffer(device, &buf, &mut scratch);
        rx.recycle(buf);
    }

    // stop(flush) plays out whatever is still queued in the handoff.
    if drain.load(Ordering::SeqCst) {
        while let Some(buf) = rx.try_take() {
            write_buffer(device, &buf, &mut scratch);
            rx.recycle(buf);
        }
    }
}

fn write_buffer<D: PcmDevice>(device: &mut D, buf: &SampleBuffer, scratch: &mut [i16]) {
    let channels = device.channels();
    let frames = interleave_i16(buf, scratch, channels);
    if frames == 0 {
        return;
    }
    match device.write_interleaved(&scratch[..frames * channels]) {
        Ok(written) if written < frames => {
            // The remainder is dropped for this cycle.
            log::warn!("Short write: {} of {} frames", written, frames);
        }
        Ok(_) => {}
        Err(IoFault::XRun) => {
            log::warn!("Playback underrun, re-preparing stream");
            if let Err(e) = device.recover() {
                log::error!("Failed to recover PCM playback: {}", e);
            }
        }
        Err(e) => {
            log::error!("PCM write error: {}", e);
        }
    }
}

// ======================== Capture loop ========================

fn capture_loop<D: PcmDevice>(device: &mut D, tx: &mut HandoffTx, running: &AtomicBool) {
    let channels = device.channels();
    let period = device.period_size();
    let mut scratch = vec![0i16; period * channels];
    let mut spare: Option<SampleBuffer> = None;

    while running.load(Ordering::Relaxed) {
        match device.read_interleaved(&mut scratch) {
            Ok(frames) => {
                if frames < period {
                    log::warn!("Short read: {} of {} frames", frames, period);
                }
                if frames == 0 {
                    continue;
                }
                let Some(mut buf) = spare.take().or_else(|| tx.try_acquire()) else {
                    log::debug!("No free capture buffer, dropping {} frames", frames);
                    continue;
                };
                deinterleave_i16(&scratch[..frames * channels], channels, &mut buf);
                if let Err(buf) = tx.try_submit(buf) {
                    log::debug!("Capture consumer behind, dropping {} frames", frames);
                    spare = Some(buf);
                }
            }
            Err(IoFault::XRun) => {
                log::warn!("Capture overrun, re-preparing stream");
                if let Err(e) = device.recover() {
                    log::error!("Failed to recover PCM capture: {}", e);
                }
            }
            Err(e) => {
                log::error!("PCM read error: {}", e);
            }
        }
    }
}

// ======================== Format conversion ========================

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Write the valid frames of `buf` into `out` as interleaved `i16` with
/// `out_channels` channels (mono duplicated, stereo averaged down when
/// needed). Returns the number of frames written.
pub fn interleave_i16(buf: &SampleBuffer, out: &mut [i16], out_channels: usize) -> usize {
    if out_channels == 0 {
        return 0;
    }
    let frames = buf.frame_len().min(out.len() / out_channels);
    let in_channels = buf.channels();

    if out_channels == 1 && in_channels == 2 {
        let (l, r) = (buf.channel(0), buf.channel(1));
        for f in 0..frames {
            out[f] = to_i16((l[f] + r[f]) * 0.5);
        }
        return frames;
    }

    for c in 0..out_channels {
        let src = buf.channel(c % in_channels);
        for f in 0..frames {
            out[f * out_channels + c] = to_i16(src[f]);
        }
    }
    frames
}

/// Fill `buf` from interleaved `i16`, normalizing to [-1.0, 1.0]. Frames
/// beyond the buffer's capacity are dropped.
pub fn deinterleave_i16(samples: &[i16], channels: usize, buf: &mut SampleBuffer) {
    if buf.set_channels(channels).is_err() {
        log::warn!("Unsupported capture channel count {}", channels);
        return;
    }
    let frames = (samples.len() / channels).min(buf.capacity());
    let resized = buf.set_frame_len(frames);
    debug_assert!(resized.is_ok());
    for c in 0..channels {
        let plane = buf.channel_mut(c);
        for (f, s) in plane.iter_mut().enumerate() {
            *s = samples[f * channels + c] as f32 / i16::MAX as f32;
        }
    }
}
