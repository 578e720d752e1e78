//! MP3 frame backend built on symphonia's MPEG audio decoder.
//!
//! symphonia's format readers expect a seekable, complete source, so frame
//! boundaries are located here with [`mpa_header`](super::mpa_header) and
//! each complete frame is handed to the codec as a standalone packet.

use symphonia::core::audio::{Channels, SampleBuffer as PcmScratch, SignalSpec};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_MP3};
use symphonia::core::errors::Result as SymphoniaResult;
use symphonia::core::formats::Packet;

use super::frame_decoder::{DecodedFrame, FrameDecoder};
use super::mpa_header::{self, FrameHeader};

#[derive(Default)]
pub struct SymphoniaMp3Backend {
    decoder: Option<Box<dyn Decoder>>,
    scratch: Option<PcmScratch<i16>>,
    scratch_spec: Option<SignalSpec>,
    scratch_frames: u64,
    frame_ts: u64,
}

impl SymphoniaMp3Backend {
    pub fn new() -> Self {
        Self::default()
    }

    fn make_decoder(header: &FrameHeader) -> SymphoniaResult<Box<dyn Decoder>> {
        let channels = if header.channels == 1 {
            Channels::FRONT_LEFT
        } else {
            Channels::FRONT_LEFT | Channels::FRONT_RIGHT
        };
        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_MP3)
            .with_sample_rate(header.sample_rate)
            .with_channels(channels);
        symphonia::default::get_codecs().make(&params, &DecoderOptions::default())
    }

    /// Decode one complete frame. Returns `(frames, channels, sample_rate)`.
    fn decode_packet(
        &mut self,
        frame: &[u8],
        header: &FrameHeader,
        out: &mut [i16],
    ) -> SymphoniaResult<(usize, usize, u32)> {
        let mut decoder = match self.decoder.take() {
            Some(decoder) => decoder,
            None => Self::make_decoder(header)?,
        };

        let packet = Packet::new_from_slice(0, self.frame_ts, header.samples_per_frame as u64, frame);
        let result = match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let capacity = decoded.capacity() as u64;
                if self.scratch_spec != Some(spec) || self.scratch_frames < capacity {
                    self.scratch = Some(PcmScratch::new(capacity, spec));
                    self.scratch_spec = Some(spec);
                    self.scratch_frames = capacity;
                }
                let channels = spec.channels.count().max(1);
                match self.scratch.as_mut() {
                    Some(scratch) => {
                        scratch.copy_interleaved_ref(decoded);
                        let samples = scratch.samples();
                        let n = samples.len().min(out.len() / channels * channels);
                        out[..n].copy_from_slice(&samples[..n]);
                        Ok((n / channels, channels, spec.rate))
                    }
                    None => Ok((0, channels, spec.rate)),
                }
            }
            Err(e) => Err(e),
        };

        self.decoder = Some(decoder);
        self.frame_ts += header.samples_per_frame as u64;
        result
    }
}

impl FrameDecoder for SymphoniaMp3Backend {
    fn decode_frame(&mut self, input: &[u8], out: &mut [i16]) -> DecodedFrame {
        if let Some(tag_len) = mpa_header::id3v2_len(input) {
            if input.len() < tag_len {
                return DecodedFrame::NEED_MORE;
            }
            log::debug!("Skipping {} byte ID3v2 tag", tag_len);
            return DecodedFrame {
                bytes_consumed: tag_len,
                ..DecodedFrame::NEED_MORE
            };
        }

        let Some((offset, header)) = mpa_header::find_sync(input) else {
            return DecodedFrame::NEED_MORE;
        };
        let end = offset + header.frame_len;
        if input.len() < end {
            return DecodedFrame::NEED_MORE;
        }
        if offset > 0 {
            log::debug!("Skipped {} bytes before MP3 frame sync", offset);
        }

        match self.decode_packet(&input[offset..end], &header, out) {
            Ok((frames, channels, sample_rate)) => DecodedFrame {
                bytes_consumed: end,
                frames,
                channels,
                sample_rate,
            },
            Err(e) => {
                // The header was valid, so the frame is dropped and decoding
                // moves on to the next one.
                log::warn!("MP3 frame decode error: {}", e);
                DecodedFrame {
                    bytes_consumed: end,
                    frames: 0,
                    channels: header.channels,
                    sample_rate: header.sample_rate,
                }
            }
        }
    }

    fn reset(&mut self) {
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.reset();
        }
        self.frame_ts = 0;
    }
}
