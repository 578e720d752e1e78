//! Streaming compressed-audio decoder.
//!
//! Input arrives in chunks of any size. Bytes that do not yet form a complete
//! compressed frame are kept in an accumulator and decoded on a later call.

use thiserror::Error;

use super::frame_decoder::FrameDecoder;
use super::sample_buffer::{SampleBuffer, ZERO_BUFFER};
use super::symphonia_backend::SymphoniaMp3Backend;

/// Accumulated bytes required before a decode is attempted. Comfortably above
/// the worst-case size of one MP3 frame.
pub const MIN_DECODE_BYTES: usize = 1024 + 256;
/// Interleaved `i16` scratch filled by one decode call.
pub const MAX_SCRATCH_SAMPLES: usize = 4096 * 2;
/// Interleaved samples produced by the largest single frame (1152 stereo).
pub const MAX_FRAME_SAMPLES: usize = 1152 * 2;
/// Capacity, in frames, of the output buffer.
pub const MAX_DECODED_FRAMES: usize = 4096 * 2;
/// Pending bytes tolerated without finding a single frame.
pub const DEFAULT_MAX_PENDING_BYTES: usize = 64 * 1024;
/// Rate reported while the stream has not told us its own.
pub const FALLBACK_SAMPLE_RATE: u32 = 44100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("no decodable frame found in {pending} pending bytes")]
    MalformedStream { pending: usize },
}

/// A decoder that turns compressed audio bytes into normalized PCM.
///
/// The returned buffer is owned by the decoder and overwritten by the next
/// call. [`ZERO_BUFFER`] means nothing could be decoded yet.
pub trait StreamDecoder: Send {
    /// Append `data` and decode what fits into one output buffer. A call can
    /// leave complete frames pending; calling again with an empty slice
    /// decodes them, until [`ZERO_BUFFER`] comes back.
    fn decode(&mut self, data: &[u8]) -> Result<&SampleBuffer, DecodeError>;

    /// Decode whatever complete frames remain, ignoring the minimum decode
    /// threshold. Used once the input has ended.
    fn flush(&mut self) -> Result<&SampleBuffer, DecodeError>;

    fn reset(&mut self);

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> usize;
}

pub struct Mp3StreamDecoder<B: FrameDecoder = SymphoniaMp3Backend> {
    backend: B,
    pending: Vec<u8>,
    scratch: Box<[i16]>,
    output: SampleBuffer,
    sample_rate: u32,
    channels: usize,
    max_pending_bytes: usize,
}

impl Mp3StreamDecoder<SymphoniaMp3Backend> {
    pub fn new() -> Self {
        Self::with_backend(SymphoniaMp3Backend::new())
    }
}

impl Default for Mp3StreamDecoder<SymphoniaMp3Backend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: FrameDecoder> Mp3StreamDecoder<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            pending: Vec::with_capacity(MIN_DECODE_BYTES * 2),
            scratch: vec![0i16; MAX_SCRATCH_SAMPLES].into_boxed_slice(),
            output: SampleBuffer::stereo(MAX_DECODED_FRAMES),
            sample_rate: 0,
            channels: 2,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
        }
    }

    /// Cap on bytes kept without any frame being found. Never lower than
    /// [`MIN_DECODE_BYTES`].
    pub fn with_max_pending_bytes(mut self, max: usize) -> Self {
        self.max_pending_bytes = max.max(MIN_DECODE_BYTES);
        self
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn decode_pending(&mut self, threshold: usize) -> Result<&SampleBuffer, DecodeError> {
        if self.pending.is_empty() || self.pending.len() < threshold {
            return Ok(&ZERO_BUFFER);
        }

        let mut consumed = 0;
        let mut samples = 0;
        let mut call_channels = 0;
        while consumed < self.pending.len() && MAX_SCRATCH_SAMPLES - samples >= MAX_FRAME_SAMPLES {
            let frame = self
                .backend
                .decode_frame(&self.pending[consumed..], &mut self.scratch[samples..]);
            if frame.bytes_consumed == 0 {
                break;
            }
            consumed += frame.bytes_consumed;
            if frame.sample_rate > 0 {
                self.sample_rate = frame.sample_rate;
            }
            if frame.frames == 0 || frame.channels == 0 {
                continue;
            }

            // One output layout per call: the first frame decides it and any
            // later frame with another layout is converted to it.
            if call_channels == 0 {
                call_channels = frame.channels;
            }
            let region = &mut self.scratch[samples..];
            samples += match (frame.channels, call_channels) {
                (2, 1) => downmix_in_place(region, frame.frames),
                (1, 2) => upmix_in_place(region, frame.frames),
                _ => frame.samples(),
            };
        }

        if consumed == 0 {
            if self.pending.len() > self.max_pending_bytes {
                let pending = self.pending.len();
                log::warn!("Discarding {} undecodable bytes", pending);
                self.pending.clear();
                return Err(DecodeError::MalformedStream { pending });
            }
            return Ok(&ZERO_BUFFER);
        }

        // Keep only the undecoded tail for the next call.
        self.pending.drain(..consumed);

        if samples == 0 {
            return Ok(&ZERO_BUFFER);
        }

        self.channels = call_channels;
        let mut frames = samples / call_channels;
        if frames > self.output.capacity() {
            log::warn!(
                "Decoded {} frames, truncating to buffer capacity {}",
                frames,
                self.output.capacity()
            );
            frames = self.output.capacity();
        }

        // Both calls are within the buffer's limits.
        let resized = self
            .output
            .set_channels(call_channels)
            .and_then(|_| self.output.set_frame_len(frames));
        debug_assert!(resized.is_ok());
        for ch in 0..call_channels {
            let plane = self.output.channel_mut(ch);
            for (f, sample) in plane.iter_mut().enumerate() {
                *sample = self.scratch[f * call_channels + ch] as f32 / i16::MAX as f32;
            }
        }

        Ok(&self.output)
    }
}

impl<B: FrameDecoder> StreamDecoder for Mp3StreamDecoder<B> {
    fn decode(&mut self, data: &[u8]) -> Result<&SampleBuffer, DecodeError> {
        self.pending.extend_from_slice(data);
        self.decode_pending(MIN_DECODE_BYTES)
    }

    fn flush(&mut self) -> Result<&SampleBuffer, DecodeError> {
        self.decode_pending(1)
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.scratch.fill(0);
        self.output.zero();
        self.backend.reset();
    }

    fn sample_rate(&self) -> u32 {
        if self.sample_rate == 0 {
            FALLBACK_SAMPLE_RATE
        } else {
            self.sample_rate
        }
    }

    fn channels(&self) -> usize {
        self.channels
    }
}

/// Average interleaved stereo frames down to mono at the start of `region`.
/// Returns the number of samples now occupied.
fn downmix_in_place(region: &mut [i16], frames: usize) -> usize {
    for f in 0..frames {
        let l = region[2 * f] as i32;
        let r = region[2 * f + 1] as i32;
        region[f] = ((l + r) / 2) as i16;
    }
    frames
}

/// Duplicate mono frames into interleaved stereo. `region` must hold
/// `2 * frames` samples.
fn upmix_in_place(region: &mut [i16], frames: usize) -> usize {
    for f in (0..frames).rev() {
        let s = region[f];
        region[2 * f] = s;
        region[2 * f + 1] = s;
    }
    frames * 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame_decoder::DecodedFrame;

    const SYNC: u8 = 0xA5;
    const MOCK_FRAMES: usize = 576;

    /// Toy framing: `[SYNC, len_hi, len_lo, channels, seed, ...]`. Each frame
    /// decodes to `MOCK_FRAMES` deterministic sample-frames.
    struct ScriptedBackend {
        sample_rate: u32,
        resets: usize,
    }

    impl ScriptedBackend {
        fn new(sample_rate: u32) -> Self {
            Self { sample_rate, resets: 0 }
        }
    }

    fn mock_sample(seed: u8, frame: usize, channel: usize) -> i16 {
        ((seed as i32 * 31 + frame as i32 * 7 + channel as i32 * 1000) % 30000) as i16
    }

    fn mock_frame(len: usize, channels: u8, seed: u8) -> Vec<u8> {
        let mut frame = vec![0u8; len];
        frame[0] = SYNC;
        frame[1] = (len >> 8) as u8;
        frame[2] = (len & 0xFF) as u8;
        frame[3] = channels;
        frame[4] = seed;
        frame
    }

    impl FrameDecoder for ScriptedBackend {
        fn decode_frame(&mut self, input: &[u8], out: &mut [i16]) -> DecodedFrame {
            if input.len() < 5 || input[0] != SYNC {
                return DecodedFrame::NEED_MORE;
            }
            let len = ((input[1] as usize) << 8) | input[2] as usize;
            if input.len() < len {
                return DecodedFrame::NEED_MORE;
            }
            let channels = input[3] as usize;
            for f in 0..MOCK_FRAMES {
                for c in 0..channels {
                    out[f * channels + c] = mock_sample(input[4], f, c);
                }
            }
            DecodedFrame {
                bytes_consumed: len,
                frames: MOCK_FRAMES,
                channels,
                sample_rate: self.sample_rate,
            }
        }

        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    fn decoder() -> Mp3StreamDecoder<ScriptedBackend> {
        Mp3StreamDecoder::with_backend(ScriptedBackend::new(22050))
    }

    /// Feed `chunks`, then flush until drained. Returns the concatenated
    /// interleaved output and the channel count of every produced buffer.
    fn run_chunks<B: FrameDecoder>(decoder: &mut Mp3StreamDecoder<B>, chunks: &[&[u8]]) -> (Vec<f32>, Vec<usize>) {
        let mut pcm = Vec::new();
        let mut layouts = Vec::new();
        let mut collect = |buf: &SampleBuffer| {
            if !buf.is_zero_buffer() {
                pcm.extend(buf.interleaved().iter());
                layouts.push(buf.channels());
            }
        };
        for chunk in chunks {
            collect(decoder.decode(chunk).unwrap());
        }
        loop {
            let buf = decoder.flush().unwrap();
            if buf.is_zero_buffer() {
                break;
            }
            collect(buf);
        }
        (pcm, layouts)
    }

    #[test]
    fn sub_threshold_input_is_kept_for_later() {
        let mut dec = decoder();
        let chunk = mock_frame(100, 2, 1);
        assert!(dec.decode(&chunk).unwrap().is_zero_buffer());
        assert_eq!(dec.pending_len(), 100);

        // Still insufficient without new bytes.
        assert!(dec.decode(&[]).unwrap().is_zero_buffer());
        assert_eq!(dec.pending_len(), 100);
    }

    #[test]
    fn two_frame_stream_in_three_chunks_matches_single_chunk() {
        let mut stream = mock_frame(700, 2, 3);
        stream.extend(mock_frame(700, 2, 4));

        let mut whole = decoder();
        let buf = whole.decode(&stream).unwrap();
        assert_eq!(buf.frame_len(), 2 * MOCK_FRAMES);
        assert_eq!(buf.channels(), 2);
        let expected: Vec<f32> = buf.interleaved().iter().collect();

        let mut split = decoder();
        let (pcm, layouts) = run_chunks(&mut split, &[&stream[..500], &stream[500..1100], &stream[1100..]]);
        assert_eq!(pcm.len(), 2 * MOCK_FRAMES * 2);
        assert!(layouts.iter().all(|&c| c == 2));
        assert_eq!(pcm, expected);
        assert_eq!(split.pending_len(), 0);
    }

    #[test]
    fn output_is_independent_of_chunk_size() {
        let mut stream = Vec::new();
        for (i, len) in [300usize, 417, 1000, 64, 900, 520].iter().enumerate() {
            stream.extend(mock_frame(*len, 2, i as u8));
        }

        let (all_at_once, _) = run_chunks(&mut decoder(), &[&stream]);
        let bytes: Vec<&[u8]> = stream.chunks(1).collect();
        let (byte_by_byte, _) = run_chunks(&mut decoder(), &bytes);
        let odd: Vec<&[u8]> = stream.chunks(333).collect();
        let (odd_chunks, _) = run_chunks(&mut decoder(), &odd);

        assert_eq!(all_at_once.len(), 6 * MOCK_FRAMES * 2);
        assert_eq!(all_at_once, byte_by_byte);
        assert_eq!(all_at_once, odd_chunks);
    }

    #[test]
    fn samples_are_normalized_per_channel() {
        let mut dec = decoder();
        let buf = dec.decode(&mock_frame(1300, 2, 9)).unwrap();
        for f in [0usize, 1, 100, MOCK_FRAMES - 1] {
            for c in 0..2 {
                let expected = mock_sample(9, f, c) as f32 / i16::MAX as f32;
                assert_eq!(buf.get(c, f), Some(expected));
            }
        }
    }

    #[test]
    fn channel_layout_follows_the_stream() {
        let mut dec = decoder();
        let buf = dec.decode(&mock_frame(1300, 1, 1)).unwrap();
        assert_eq!(buf.channels(), 1);
        assert_eq!(buf.frame_len(), MOCK_FRAMES);
        assert_eq!(dec.channels(), 1);

        let buf = dec.decode(&mock_frame(1300, 2, 1)).unwrap();
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.frame_len(), MOCK_FRAMES);
    }

    #[test]
    fn mixed_layouts_within_one_call_are_converted() {
        let mut stream = mock_frame(700, 1, 5);
        stream.extend(mock_frame(700, 2, 6));
        let mut dec = decoder();
        let buf = dec.decode(&stream).unwrap();
        assert_eq!(buf.channels(), 1);
        assert_eq!(buf.frame_len(), 2 * MOCK_FRAMES);
        let l = mock_sample(6, 10, 0) as i32;
        let r = mock_sample(6, 10, 1) as i32;
        let expected = ((l + r) / 2) as i16 as f32 / i16::MAX as f32;
        assert_eq!(buf.get(0, MOCK_FRAMES + 10), Some(expected));
    }

    #[test]
    fn scratch_limit_leaves_frames_for_the_next_call() {
        let mut stream = Vec::new();
        for i in 0..8u8 {
            stream.extend(mock_frame(200, 2, i));
        }
        let mut dec = decoder();
        let first = dec.decode(&stream).unwrap().frame_len();
        assert!(first < 8 * MOCK_FRAMES);
        assert!(first * 2 <= MAX_SCRATCH_SAMPLES);
        assert!(dec.pending_len() > 0);

        let second = dec.flush().unwrap().frame_len();
        assert_eq!(first + second, 8 * MOCK_FRAMES);
    }

    #[test]
    fn garbage_accumulates_until_the_cap() {
        let mut dec = decoder().with_max_pending_bytes(4096);
        let garbage = vec![0u8; 1000];
        for expected in [1000, 2000, 3000, 4000] {
            assert!(dec.decode(&garbage).unwrap().is_zero_buffer());
            assert_eq!(dec.pending_len(), expected);
        }
        assert_eq!(
            dec.decode(&garbage).unwrap_err(),
            DecodeError::MalformedStream { pending: 5000 }
        );
        assert_eq!(dec.pending_len(), 0);

        // Valid data after the discard decodes normally.
        assert_eq!(dec.decode(&mock_frame(1300, 2, 2)).unwrap().frame_len(), MOCK_FRAMES);
    }

    #[test]
    fn unknown_sample_rate_falls_back_to_44100() {
        let mut dec = Mp3StreamDecoder::with_backend(ScriptedBackend::new(0));
        assert_eq!(dec.sample_rate(), FALLBACK_SAMPLE_RATE);
        dec.decode(&mock_frame(1300, 2, 1)).unwrap();
        assert_eq!(dec.sample_rate(), 44100);

        let mut dec = decoder();
        assert_eq!(dec.sample_rate(), 44100);
        dec.decode(&mock_frame(1300, 2, 1)).unwrap();
        assert_eq!(dec.sample_rate(), 22050);
    }

    #[test]
    fn reset_discards_pending_bytes_and_output() {
        let mut dec = decoder();
        dec.decode(&mock_frame(1300, 2, 7)).unwrap();
        dec.decode(&mock_frame(600, 2, 8)).unwrap();
        assert_eq!(dec.pending_len(), 600);

        dec.reset();
        assert_eq!(dec.pending_len(), 0);
        assert_eq!(dec.backend.resets, 1);
        assert!(dec.output.interleaved().iter().all(|s| s == 0.0));
        assert!(dec.flush().unwrap().is_zero_buffer());
    }

    #[test]
    fn silent_mp3_frames_decode_identically_in_chunks() {
        use crate::audio::mpa_header::{FrameHeader, MpegVersion};

        let header = FrameHeader {
            version: MpegVersion::Mpeg1,
            bitrate_kbps: 128,
            sample_rate: 44100,
            channels: 2,
            frame_len: 417,
            samples_per_frame: 1152,
        };
        let mut stream = Vec::new();
        for _ in 0..4 {
            let mut frame = vec![0u8; header.frame_len];
            frame[..4].copy_from_slice(&header.to_bytes().unwrap());
            stream.extend(frame);
        }

        let (whole, whole_layouts) = run_chunks(&mut Mp3StreamDecoder::new(), &[&stream]);
        let (split, split_layouts) =
            run_chunks(&mut Mp3StreamDecoder::new(), &[&stream[..100], &stream[100..1300], &stream[1300..]]);

        assert_eq!(whole.len(), 4 * 1152 * 2);
        assert_eq!(whole, split);
        assert!(whole_layouts.iter().chain(split_layouts.iter()).all(|&c| c == 2));
    }

    #[test]
    fn draining_keeps_the_accumulator_small() {
        use crate::audio::mpa_header::{FrameHeader, MpegVersion};

        const CHUNK: usize = 4096;
        let header = FrameHeader {
            version: MpegVersion::Mpeg1,
            bitrate_kbps: 128,
            sample_rate: 44100,
            channels: 2,
            frame_len: 417,
            samples_per_frame: 1152,
        };
        let mut stream = Vec::new();
        for _ in 0..200 {
            let mut frame = vec![0u8; header.frame_len];
            frame[..4].copy_from_slice(&header.to_bytes().unwrap());
            stream.extend(frame);
        }

        let mut dec = Mp3StreamDecoder::new();
        let mut frames = 0;
        let mut max_pending = 0;
        for chunk in stream.chunks(CHUNK) {
            let mut input = chunk;
            loop {
                let buf = dec.decode(input).unwrap();
                if buf.is_zero_buffer() {
                    break;
                }
                frames += buf.frame_len();
                input = &[];
            }
            max_pending = max_pending.max(dec.pending_len());
        }
        assert!(max_pending < CHUNK + MIN_DECODE_BYTES, "pending grew to {}", max_pending);
        assert!(dec.pending_len() < MIN_DECODE_BYTES);

        loop {
            let buf = dec.flush().unwrap();
            if buf.is_zero_buffer() {
                break;
            }
            frames += buf.frame_len();
        }
        assert_eq!(frames, 200 * 1152);
    }
}
