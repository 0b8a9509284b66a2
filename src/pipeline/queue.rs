//! Chunk queue between the sensor callback and the decode worker

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::utils::CachePadded;
use flume::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::warn;

use crate::sensor::CompressedChunk;

/// FIFO of compressed chunks, split into producer and consumer ends
///
/// Enqueue never blocks. A bounded queue drops the incoming chunk when full.
pub struct ChunkQueue;

impl ChunkQueue {
    pub fn unbounded() -> (ChunkSender, ChunkReceiver) {
        Self::wrap(flume::unbounded())
    }

    /// A capacity of 0 would refuse every chunk and is raised to 1
    pub fn bounded(capacity: usize) -> (ChunkSender, ChunkReceiver) {
        if capacity == 0 {
            warn!("Chunk queue capacity 0 raised to 1");
        }
        Self::wrap(flume::bounded(capacity.max(1)))
    }

    /// Unbounded unless a capacity is given
    pub fn with_capacity(capacity: Option<usize>) -> (ChunkSender, ChunkReceiver) {
        match capacity {
            Some(capacity) => Self::bounded(capacity),
            None => Self::unbounded(),
        }
    }

    fn wrap(
        (tx, rx): (Sender<CompressedChunk>, Receiver<CompressedChunk>),
    ) -> (ChunkSender, ChunkReceiver) {
        let stats = Arc::new(CachePadded::new(Stats::default()));
        (
            ChunkSender {
                tx,
                stats: stats.clone(),
            },
            ChunkReceiver { rx, stats },
        )
    }
}

#[derive(Default)]
struct Stats {
    enqueued: AtomicUsize,
    dequeued: AtomicUsize,
    dropped: AtomicUsize,
    rejected: AtomicUsize,
    discarded: AtomicUsize,
}

/// Point-in-time queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: usize,
    pub dequeued: usize,
    /// Chunks dropped because a bounded queue was full
    pub dropped: usize,
    /// Chunks refused after termination was requested
    pub rejected: usize,
    /// Pending chunks thrown away on stop
    pub discarded: usize,
}

impl Stats {
    fn snapshot(&self) -> QueueStats {
        QueueStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Producer end
#[derive(Clone)]
pub struct ChunkSender {
    tx: Sender<CompressedChunk>,
    stats: Arc<CachePadded<Stats>>,
}

impl ChunkSender {
    /// Producer: push chunk without blocking
    pub fn push(&self, chunk: CompressedChunk) -> bool {
        match self.tx.try_send(chunk) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("stream_decode_chunks_dropped").increment(1);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Count a chunk refused before it reached the queue
    pub fn record_rejected(&self) {
        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.snapshot()
    }
}

/// Consumer end
#[derive(Clone)]
pub struct ChunkReceiver {
    rx: Receiver<CompressedChunk>,
    stats: Arc<CachePadded<Stats>>,
}

impl ChunkReceiver {
    /// Consumer: wait up to `timeout` for the oldest chunk
    pub fn recv_timeout(&self, timeout: Duration) -> Result<CompressedChunk, RecvTimeoutError> {
        let chunk = self.rx.recv_timeout(timeout)?;
        self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
        Ok(chunk)
    }

    pub fn try_recv(&self) -> Option<CompressedChunk> {
        let chunk = self.rx.try_recv().ok()?;
        self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
        Some(chunk)
    }

    /// Throw away everything pending, returning how many chunks were discarded
    pub fn drain(&self) -> usize {
        let discarded = self.rx.drain().count();
        self.stats.discarded.fetch_add(discarded, Ordering::Relaxed);
        discarded
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn chunk(seq: u64) -> CompressedChunk {
        CompressedChunk::new(Bytes::from(vec![seq as u8]), seq)
    }

    #[test]
    fn test_fifo_order() {
        let (tx, rx) = ChunkQueue::unbounded();
        for seq in 0..10 {
            assert!(tx.push(chunk(seq)));
        }
        assert_eq!(rx.len(), 10);

        for seq in 0..10 {
            let got = rx.recv_timeout(Duration::from_millis(10)).unwrap();
            assert_eq!(got.sequence, seq);
        }
        assert!(rx.is_empty());

        let stats = rx.stats();
        assert_eq!(stats.enqueued, 10);
        assert_eq!(stats.dequeued, 10);
    }

    #[test]
    fn test_bounded_drops_newest() {
        let (tx, rx) = ChunkQueue::bounded(2);
        assert!(tx.push(chunk(0)));
        assert!(tx.push(chunk(1)));
        assert!(!tx.push(chunk(2)));

        assert_eq!(tx.stats().dropped, 1);
        assert_eq!(rx.try_recv().unwrap().sequence, 0);
        assert_eq!(rx.try_recv().unwrap().sequence, 1);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_zero_capacity_holds_one_chunk() {
        let (tx, _rx) = ChunkQueue::bounded(0);
        assert!(tx.push(chunk(0)));
        assert!(!tx.push(chunk(1)));
        assert_eq!(tx.len(), 1);
    }

    #[test]
    fn test_recv_timeout_when_empty() {
        let (_tx, rx) = ChunkQueue::unbounded();
        let err = rx.recv_timeout(Duration::from_millis(5)).unwrap_err();
        assert_eq!(err, RecvTimeoutError::Timeout);
    }

    #[test]
    fn test_drain_counts_discarded() {
        let (tx, rx) = ChunkQueue::with_capacity(None);
        for seq in 0..5 {
            tx.push(chunk(seq));
        }
        assert_eq!(rx.drain(), 5);
        assert!(rx.is_empty());
        assert_eq!(rx.stats().discarded, 5);
    }
}
