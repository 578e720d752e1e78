//! Frame-level decode capability implemented by each decode backend.

/// Outcome of one [`FrameDecoder::decode_frame`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Compressed bytes consumed from the start of the input. Zero means no
    /// complete frame is available yet.
    pub bytes_consumed: usize,
    /// Sample-frames written to the output (interleaved by `channels`).
    pub frames: usize,
    pub channels: usize,
    /// Stream sample rate reported by the frame, 0 when unknown.
    pub sample_rate: u32,
}

impl DecodedFrame {
    pub const NEED_MORE: DecodedFrame = DecodedFrame {
        bytes_consumed: 0,
        frames: 0,
        channels: 0,
        sample_rate: 0,
    };

    pub fn samples(&self) -> usize {
        self.frames * self.channels
    }
}

/// Decodes at most one compressed frame at a time.
///
/// Backends are selected when the stream decoder is built; the streaming
/// algorithm never branches on which one is in use.
pub trait FrameDecoder: Send {
    /// Decode the first complete frame found at the start of `input` into
    /// `out` as interleaved `i16`. Leading bytes that cannot start a frame
    /// may be skipped, in which case they are counted in `bytes_consumed`.
    /// `out` always has room for one worst-case frame.
    fn decode_frame(&mut self, input: &[u8], out: &mut [i16]) -> DecodedFrame;

    /// Forget any inter-frame state (bit reservoir, overlap buffers).
    fn reset(&mut self);
}

impl<T: FrameDecoder + ?Sized> FrameDecoder for Box<T> {
    fn decode_frame(&mut self, input: &[u8], out: &mut [i16]) -> DecodedFrame {
        (**self).decode_frame(input, out)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}
