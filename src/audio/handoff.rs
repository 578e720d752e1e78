//! Single-slot exchange of pre-allocated sample buffers between a producer
//! context and a real-time worker thread.
//!
//! A fixed pool of buffers circulates between the two sides: the producer
//! takes a free buffer, fills it and submits it; the consumer takes it, uses
//! it and recycles it. At most one filled buffer is queued at a time, and no
//! buffer is allocated after [`handoff`] returns.

use tokio::sync::mpsc;

use super::sample_buffer::SampleBuffer;

/// Producer end.
pub struct HandoffTx {
    filled: mpsc::Sender<SampleBuffer>,
    free: mpsc::Receiver<SampleBuffer>,
}

/// Consumer end.
pub struct HandoffRx {
    filled: mpsc::Receiver<SampleBuffer>,
    free: mpsc::Sender<SampleBuffer>,
}

/// Create a handoff with `pool` buffers of `capacity` frames each.
pub fn handoff(pool: usize, capacity: usize) -> (HandoffTx, HandoffRx) {
    let pool = pool.max(1);
    let (filled_tx, filled_rx) = mpsc::channel(1);
    let (free_tx, free_rx) = mpsc::channel(pool);
    for _ in 0..pool {
        if free_tx.try_send(SampleBuffer::stereo(capacity)).is_err() {
            break;
        }
    }
    (
        HandoffTx {
            filled: filled_tx,
            free: free_rx,
        },
        HandoffRx {
            filled: filled_rx,
            free: free_tx,
        },
    )
}

impl HandoffTx {
    pub async fn acquire(&mut self) -> Option<SampleBuffer> {
        self.free.recv().await
    }

    pub fn blocking_acquire(&mut self) -> Option<SampleBuffer> {
        self.free.blocking_recv()
    }

    pub fn try_acquire(&mut self) -> Option<SampleBuffer> {
        self.free.try_recv().ok()
    }

    /// Queue a filled buffer, waiting while the slot is occupied. The buffer
    /// is handed back if the consumer is gone.
    pub async fn submit(&self, buf: SampleBuffer) -> Result<(), SampleBuffer> {
        self.filled.send(buf).await.map_err(|e| e.0)
    }

    pub fn blocking_submit(&self, buf: SampleBuffer) -> Result<(), SampleBuffer> {
        self.filled.blocking_send(buf).map_err(|e| e.0)
    }

    /// Queue a filled buffer only if the slot is free.
    pub fn try_submit(&self, buf: SampleBuffer) -> Result<(), SampleBuffer> {
        self.filled.try_send(buf).map_err(|e| e.into_inner())
    }

    /// Copy `src` into a pooled buffer and queue it. Returns false once the
    /// consumer has gone away.
    pub async fn send_copy(&mut self, src: &SampleBuffer) -> bool {
        let Some(mut buf) = self.acquire().await else {
            return false;
        };
        buf.copy_from(src);
        self.submit(buf).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.filled.is_closed()
    }
}

impl HandoffRx {
    pub async fn take(&mut self) -> Option<SampleBuffer> {
        self.filled.recv().await
    }

    pub fn blocking_take(&mut self) -> Option<SampleBuffer> {
        self.filled.blocking_recv()
    }

    pub fn try_take(&mut self) -> Option<SampleBuffer> {
        self.filled.try_recv().ok()
    }

    /// Return a buffer to the pool.
    pub fn recycle(&self, buf: SampleBuffer) {
        if self.free.try_send(buf).is_err() {
            log::debug!("Handoff producer gone, dropping recycled buffer");
        }
    }
}
