//! Writes captured audio to a sink as raw interleaved S16LE.

use std::future::Future;

use anyhow::{Context, Result};
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::audio::{interleave_i16, HandoffRx, MAX_CHANNELS};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecordStats {
    pub frames: usize,
    pub bytes_written: usize,
    pub channels: usize,
}

/// Drain the capture handoff into `writer` until `cancel` resolves or the
/// capture side closes.
pub async fn record_stream<W, F>(rx: &mut HandoffRx, mut writer: W, cancel: F) -> Result<RecordStats>
where
    W: AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    tokio::pin!(cancel);
    let mut stats = RecordStats::default();
    let mut samples: Vec<i16> = Vec::new();
    let mut bytes = BytesMut::new();

    loop {
        let buf = tokio::select! {
            _ = &mut cancel => break,
            buf = rx.take() => match buf {
                Some(buf) => buf,
                None => {
                    log::info!("Capture closed");
                    break;
                }
            },
        };

        if stats.channels != 0 && stats.channels != buf.channels() {
            log::warn!("Capture layout changed from {} to {} channels", stats.channels, buf.channels());
        }
        stats.channels = buf.channels();

        let needed = buf.frame_len() * MAX_CHANNELS;
        if samples.len() < needed {
            samples.resize(needed, 0);
        }
        let frames = interleave_i16(&buf, &mut samples, buf.channels());
        let count = frames * buf.channels();
        rx.recycle(buf);

        bytes.clear();
        for &s in &samples[..count] {
            bytes.put_i16_le(s);
        }
        writer
            .write_all(&bytes)
            .await
            .context("Failed to write captured audio")?;
        stats.frames += frames;
        stats.bytes_written += bytes.len();
    }

    writer.flush().await.context("Failed to flush captured audio")?;
    log::info!(
        "Recording finished: {} frames, {} bytes",
        stats.frames,
        stats.bytes_written
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::handoff::handoff;

    #[tokio::test]
    async fn writes_interleaved_s16le() {
        let (mut tx, mut rx) = handoff(2, 16);
        let producer = std::thread::spawn(move || {
            for value in [0.5f32, -1.0] {
                let mut buf = tx.blocking_acquire().unwrap();
                buf.set_frame_len(2).unwrap();
                buf.channel_mut(0).fill(value);
                buf.channel_mut(1).fill(0.0);
                tx.blocking_submit(buf).unwrap();
            }
        });

        let file = tempfile::NamedTempFile::new().unwrap();
        let sink = tokio::fs::File::create(file.path()).await.unwrap();
        let stats = record_stream(&mut rx, sink, std::future::pending()).await.unwrap();
        producer.join().unwrap();

        assert_eq!(stats.frames, 4);
        assert_eq!(stats.channels, 2);
        assert_eq!(stats.bytes_written, 16);

        let data = std::fs::read(file.path()).unwrap();
        let samples: Vec<i16> = data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        let half = (0.5 * i16::MAX as f32).round() as i16;
        assert_eq!(samples, vec![half, 0, half, 0, -i16::MAX, 0, -i16::MAX, 0]);
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let (_tx, mut rx) = handoff(2, 16);
        let mut sink = Vec::new();
        let stats = record_stream(&mut rx, &mut sink, async {}).await.unwrap();
        assert_eq!(stats, RecordStats::default());
        assert!(sink.is_empty());
    }
}
