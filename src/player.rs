//! Feeds a compressed byte stream through a [`StreamDecoder`] into the
//! playback handoff.

use anyhow::{Context, Result};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::audio::{HandoffTx, SampleBuffer, StreamDecoder};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PlayStats {
    pub bytes_read: usize,
    pub frames_sent: usize,
    pub buffers_sent: usize,
    pub malformed: usize,
    /// The playback side went away before the input ended.
    pub interrupted: bool,
}

/// Read `reader` to the end in `chunk_size` pieces, decode and queue every
/// produced buffer, then drain the decoder.
pub async fn play_stream<R>(
    mut reader: R,
    decoder: &mut dyn StreamDecoder,
    tx: &mut HandoffTx,
    chunk_size: usize,
    device_rate: u32,
) -> Result<PlayStats>
where
    R: AsyncRead + Unpin,
{
    let mut stats = PlayStats::default();
    let mut chunk = BytesMut::with_capacity(chunk_size.max(1));
    let mut rate_checked = false;

    loop {
        chunk.clear();
        let n = reader
            .read_buf(&mut chunk)
            .await
            .context("Failed to read audio stream")?;
        if n == 0 {
            break;
        }
        stats.bytes_read += n;

        // One call may leave complete frames pending; keep decoding with no
        // new input until the decoder has nothing more to give.
        let mut input: &[u8] = &chunk;
        loop {
            let sent = match decoder.decode(input) {
                Ok(buf) if buf.is_zero_buffer() => break,
                Ok(buf) => forward(buf, tx, &mut stats).await,
                Err(e) => {
                    log::warn!("Dropping undecodable input: {}", e);
                    stats.malformed += 1;
                    break;
                }
            };
            match sent {
                None => {
                    stats.interrupted = true;
                    return Ok(stats);
                }
                Some(true) if !rate_checked => {
                    rate_checked = true;
                    check_rate(decoder.sample_rate(), device_rate);
                }
                Some(true) => {}
                Some(false) => break,
            }
            input = &[];
        }
    }

    loop {
        let sent = match decoder.flush() {
            Ok(buf) if buf.is_zero_buffer() => break,
            Ok(buf) => forward(buf, tx, &mut stats).await,
            Err(e) => {
                log::warn!("Discarding stream tail: {}", e);
                stats.malformed += 1;
                break;
            }
        };
        if sent.is_none() {
            stats.interrupted = true;
            break;
        }
    }

    log::info!(
        "Stream finished: {} bytes in, {} frames out in {} buffers",
        stats.bytes_read,
        stats.frames_sent,
        stats.buffers_sent
    );
    Ok(stats)
}

/// `Some(true)` when audio was queued, `Some(false)` when there was none,
/// `None` when the consumer is gone.
async fn forward(buf: &SampleBuffer, tx: &mut HandoffTx, stats: &mut PlayStats) -> Option<bool> {
    if buf.is_zero_buffer() || buf.is_empty() {
        return Some(false);
    }
    if !tx.send_copy(buf).await {
        log::info!("Playback closed, stopping stream");
        return None;
    }
    stats.frames_sent += buf.frame_len();
    stats.buffers_sent += 1;
    Some(true)
}

fn check_rate(stream_rate: u32, device_rate: u32) {
    if stream_rate != device_rate {
        // No resampling; the stream plays at the device rate.
        log::warn!(
            "Stream is {}Hz but the device runs at {}Hz, pitch will be off",
            stream_rate,
            device_rate
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::handoff::handoff;
    use crate::audio::DecodeError;

    /// Emits one frame per input byte once 100 bytes are pending; `0xEE`
    /// bytes are rejected as malformed.
    struct ByteCounter {
        pending: usize,
        output: SampleBuffer,
    }

    impl ByteCounter {
        fn new() -> Self {
            Self {
                pending: 0,
                output: SampleBuffer::stereo(1024),
            }
        }

        fn emit(&mut self) -> &SampleBuffer {
            let frames = self.pending;
            self.pending = 0;
            self.output.set_frame_len(frames).unwrap();
            self.output.channel_mut(0).fill(frames as f32);
            &self.output
        }
    }

    impl StreamDecoder for ByteCounter {
        fn decode(&mut self, data: &[u8]) -> Result<&SampleBuffer, DecodeError> {
            if data.contains(&0xEE) {
                return Err(DecodeError::MalformedStream { pending: data.len() });
            }
            self.pending += data.len();
            if self.pending < 100 {
                return Ok(&crate::audio::ZERO_BUFFER);
            }
            Ok(self.emit())
        }

        fn flush(&mut self) -> Result<&SampleBuffer, DecodeError> {
            if self.pending == 0 {
                return Ok(&crate::audio::ZERO_BUFFER);
            }
            Ok(self.emit())
        }

        fn reset(&mut self) {
            self.pending = 0;
        }

        fn sample_rate(&self) -> u32 {
            44100
        }

        fn channels(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn streams_every_byte_then_drains() {
        let (mut tx, mut rx) = handoff(2, 1024);
        let consumer = std::thread::spawn(move || {
            let mut frames = Vec::new();
            while let Some(buf) = rx.blocking_take() {
                frames.push(buf.frame_len());
                rx.recycle(buf);
            }
            frames
        });

        let input = vec![1u8; 250];
        let mut decoder = ByteCounter::new();
        let stats = play_stream(&input[..], &mut decoder, &mut tx, 64, 44100).await.unwrap();
        drop(tx);

        assert_eq!(stats.bytes_read, 250);
        assert_eq!(stats.frames_sent, 250);
        assert!(!stats.interrupted);
        let frames = consumer.join().unwrap();
        assert_eq!(frames.iter().sum::<usize>(), 250);
        assert_eq!(frames.len(), stats.buffers_sent);
        assert!(frames[0] >= 100);
    }

    #[tokio::test]
    async fn malformed_chunks_are_skipped() {
        let (mut tx, mut rx) = handoff(2, 1024);
        let consumer = std::thread::spawn(move || {
            let mut total = 0;
            while let Some(buf) = rx.blocking_take() {
                total += buf.frame_len();
                rx.recycle(buf);
            }
            total
        });

        let mut input = vec![1u8; 240];
        input[70] = 0xEE;
        let mut decoder = ByteCounter::new();
        let stats = play_stream(&input[..], &mut decoder, &mut tx, 60, 44100).await.unwrap();
        drop(tx);

        assert_eq!(stats.malformed, 1);
        assert!(stats.frames_sent > 0 && stats.frames_sent < 240);
        assert_eq!(consumer.join().unwrap(), stats.frames_sent);
    }

    #[tokio::test]
    async fn stops_when_playback_is_gone() {
        let (mut tx, rx) = handoff(2, 1024);
        drop(rx);

        let input = vec![1u8; 500];
        let mut decoder = ByteCounter::new();
        let stats = play_stream(&input[..], &mut decoder, &mut tx, 200, 44100).await.unwrap();
        assert!(stats.interrupted);
        assert_eq!(stats.frames_sent, 0);
        assert!(stats.bytes_read >= 100 && stats.bytes_read < 500);
    }

    /// Records how large the real decoder's accumulator gets between calls.
    struct Watched {
        inner: crate::audio::Mp3StreamDecoder,
        max_pending: usize,
    }

    impl StreamDecoder for Watched {
        fn decode(&mut self, data: &[u8]) -> Result<&SampleBuffer, DecodeError> {
            let pending = self.inner.pending_len() + data.len();
            self.max_pending = self.max_pending.max(pending);
            self.inner.decode(data)
        }

        fn flush(&mut self) -> Result<&SampleBuffer, DecodeError> {
            self.inner.flush()
        }

        fn reset(&mut self) {
            self.inner.reset();
        }

        fn sample_rate(&self) -> u32 {
            self.inner.sample_rate()
        }

        fn channels(&self) -> usize {
            self.inner.channels()
        }
    }

    #[tokio::test]
    async fn mp3_stream_keeps_up_with_chunked_reads() {
        use crate::audio::mpa_header::{FrameHeader, MpegVersion};
        use crate::audio::stream_decoder::{MAX_DECODED_FRAMES, MIN_DECODE_BYTES};

        let header = FrameHeader {
            version: MpegVersion::Mpeg1,
            bitrate_kbps: 128,
            sample_rate: 44100,
            channels: 2,
            frame_len: 417,
            samples_per_frame: 1152,
        };
        let mut input = Vec::new();
        for _ in 0..200 {
            let mut frame = vec![0u8; header.frame_len];
            frame[..4].copy_from_slice(&header.to_bytes().unwrap());
            input.extend(frame);
        }

        let (mut tx, mut rx) = handoff(2, MAX_DECODED_FRAMES);
        let consumer = std::thread::spawn(move || {
            let mut total = 0;
            while let Some(buf) = rx.blocking_take() {
                total += buf.frame_len();
                rx.recycle(buf);
            }
            total
        });

        let mut decoder = Watched {
            inner: crate::audio::Mp3StreamDecoder::new(),
            max_pending: 0,
        };
        let stats = play_stream(&input[..], &mut decoder, &mut tx, 4096, 44100).await.unwrap();
        drop(tx);

        assert_eq!(stats.bytes_read, input.len());
        assert_eq!(stats.frames_sent, 200 * 1152);
        assert_eq!(consumer.join().unwrap(), 200 * 1152);
        assert!(decoder.max_pending < 4096 + MIN_DECODE_BYTES, "pending grew to {}", decoder.max_pending);
    }
}
