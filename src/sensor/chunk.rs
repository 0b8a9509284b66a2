use bytes::Bytes;
use std::time::Instant;

/// One quantum of compressed stream data as delivered by a sensor
#[derive(Clone)]
pub struct CompressedChunk {
    /// Opaque encoded bytes - shared across threads without copying
    pub data: Bytes,

    /// Ingest order, assigned by the stream decoder
    pub sequence: u64,

    /// Arrival timestamp for latency tracking
    pub received_at: Instant,
}

impl CompressedChunk {
    pub fn new(data: Bytes, sequence: u64) -> Self {
        Self {
            data,
            sequence,
            received_at: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for CompressedChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedChunk")
            .field("sequence", &self.sequence)
            .field("len", &self.data.len())
            .finish()
    }
}
