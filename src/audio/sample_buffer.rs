//! Fixed-capacity multichannel float sample store.
//!
//! Storage is planar (one plane per channel, both planes always allocated) so
//! switching between mono and stereo never reallocates and never moves the
//! samples of channel 0. The interleaved layout the hardware wants is exposed
//! as a view over the planes.

use thiserror::Error;

/// Maximum number of channels a buffer can address.
pub const MAX_CHANNELS: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SampleBufferError {
    #[error("frame length {requested} exceeds buffer capacity {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },
    #[error("unsupported channel count {0} (expected 1 or 2)")]
    InvalidChannels(usize),
    #[error("sample index out of range: channel={channel}, frame={frame}")]
    OutOfRange { channel: usize, frame: usize },
}

/// "No audio produced this cycle". Has zero capacity, so it can never be
/// confused with a real buffer that happens to hold silence.
pub static ZERO_BUFFER: SampleBuffer = SampleBuffer {
    planes: [Vec::new(), Vec::new()],
    channels: 1,
    frame_len: 0,
    capacity: 0,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    planes: [Vec<f32>; MAX_CHANNELS],
    channels: usize,
    frame_len: usize,
    capacity: usize,
}

impl SampleBuffer {
    /// Allocate a buffer able to hold `capacity` frames. This is the only
    /// allocation the buffer ever performs.
    pub fn new(channels: usize, capacity: usize) -> Result<Self, SampleBufferError> {
        check_channels(channels)?;
        let mut buf = Self::stereo(capacity);
        buf.channels = channels;
        Ok(buf)
    }

    pub fn stereo(capacity: usize) -> Self {
        Self {
            planes: [vec![0.0; capacity], vec![0.0; capacity]],
            channels: 2,
            frame_len: 0,
            capacity,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.frame_len == 0
    }

    pub fn is_zero_buffer(&self) -> bool {
        self.capacity == 0
    }

    pub fn set_to_mono(&mut self) {
        self.channels = 1;
    }

    pub fn set_to_stereo(&mut self) {
        self.channels = 2;
    }

    /// Reinterpret the storage as mono or stereo. Sample values are kept.
    pub fn set_channels(&mut self, channels: usize) -> Result<(), SampleBufferError> {
        check_channels(channels)?;
        self.channels = channels;
        Ok(())
    }

    /// Declare how many frames are valid. Frames past the previous length
    /// hold whatever was last written there.
    pub fn set_frame_len(&mut self, frames: usize) -> Result<(), SampleBufferError> {
        if frames > self.capacity {
            return Err(SampleBufferError::CapacityExceeded {
                requested: frames,
                capacity: self.capacity,
            });
        }
        self.frame_len = frames;
        Ok(())
    }

    pub fn get(&self, channel: usize, frame: usize) -> Option<f32> {
        if channel >= self.channels || frame >= self.frame_len {
            return None;
        }
        Some(self.planes[channel][frame])
    }

    pub fn set(&mut self, channel: usize, frame: usize, value: f32) -> Result<(), SampleBufferError> {
        if channel >= self.channels || frame >= self.frame_len {
            return Err(SampleBufferError::OutOfRange { channel, frame });
        }
        self.planes[channel][frame] = value;
        Ok(())
    }

    /// Valid frames of one channel.
    ///
    /// # Panics
    /// If `channel` is not below [`channels`](Self::channels).
    pub fn channel(&self, channel: usize) -> &[f32] {
        assert!(channel < self.channels, "channel {} out of range", channel);
        &self.planes[channel][..self.frame_len]
    }

    pub fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        assert!(channel < self.channels, "channel {} out of range", channel);
        &mut self.planes[channel][..self.frame_len]
    }

    /// Fill every stored sample with 0.0, regardless of the current length
    /// and channel count.
    pub fn zero(&mut self) {
        for plane in self.planes.iter_mut() {
            plane.fill(0.0);
        }
    }

    /// Copy length, channel layout and the valid samples of `other`,
    /// truncating to this buffer's capacity.
    pub fn copy_from(&mut self, other: &SampleBuffer) {
        let frames = other.frame_len.min(self.capacity);
        self.channels = other.channels;
        self.frame_len = frames;
        for ch in 0..other.channels {
            self.planes[ch][..frames].copy_from_slice(&other.planes[ch][..frames]);
        }
    }

    pub fn interleaved(&self) -> Interleaved<'_> {
        Interleaved { buffer: self }
    }

    pub fn interleaved_mut(&mut self) -> InterleavedMut<'_> {
        InterleavedMut { buffer: self }
    }
}

fn check_channels(channels: usize) -> Result<(), SampleBufferError> {
    if channels == 0 || channels > MAX_CHANNELS {
        return Err(SampleBufferError::InvalidChannels(channels));
    }
    Ok(())
}

/// Read view of the valid samples in L,R,L,R order.
#[derive(Clone, Copy)]
pub struct Interleaved<'a> {
    buffer: &'a SampleBuffer,
}

impl<'a> Interleaved<'a> {
    pub fn len(&self) -> usize {
        self.buffer.frame_len * self.buffer.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        if index >= self.len() {
            return None;
        }
        let ch = self.buffer.channels;
        Some(self.buffer.planes[index % ch][index / ch])
    }

    pub fn iter(&self) -> impl Iterator<Item = f32> + use<'a> {
        let buffer = self.buffer;
        let ch = buffer.channels;
        (0..buffer.frame_len * ch).map(move |i| buffer.planes[i % ch][i / ch])
    }
}

/// Write view of the valid samples in L,R,L,R order.
pub struct InterleavedMut<'a> {
    buffer: &'a mut SampleBuffer,
}

impl InterleavedMut<'_> {
    pub fn len(&self) -> usize {
        self.buffer.frame_len * self.buffer.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.buffer.interleaved().get(index)
    }

    pub fn set(&mut self, index: usize, value: f32) -> Result<(), SampleBufferError> {
        let ch = self.buffer.channels;
        if index >= self.len() {
            return Err(SampleBufferError::OutOfRange {
                channel: index % ch,
                frame: index / ch,
            });
        }
        self.buffer.planes[index % ch][index / ch] = value;
        Ok(())
    }

    /// Overwrite the valid region from an interleaved slice. Copies
    /// `min(samples.len(), len())` samples.
    pub fn copy_from_slice(&mut self, samples: &[f32]) {
        let ch = self.buffer.channels;
        let n = samples.len().min(self.len());
        for (i, &s) in samples[..n].iter().enumerate() {
            self.buffer.planes[i % ch][i / ch] = s;
        }
    }
}
