//! Decode worker thread
//!
//! Drains the chunk queue, decodes each chunk into a scratch frame and copies
//! it over the shared frame buffer. The only way to stop it is the shared
//! termination flag; it is checked before every dequeue and after every wait
//! timeout, so a backlog does not delay shutdown.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use flume::RecvTimeoutError;
use tracing::{debug, error, info, trace, warn};

use crate::codec::{DecodeStatus, FrameDecoder, FrameShape};
use crate::error::DecodeError;
use crate::pipeline::{ChunkReceiver, FrameBufferView};
use crate::sensor::CompressedChunk;

/// Counters shared between the worker and whoever observes it
#[derive(Default)]
pub struct WorkerStats {
    decoded: CachePadded<AtomicU64>,
    pending: CachePadded<AtomicU64>,
    failures: CachePadded<AtomicU64>,
    last_sequence: AtomicU64,
}

/// Point-in-time worker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub chunks_decoded: u64,
    /// Chunks the decoder accepted without emitting a frame
    pub chunks_pending: u64,
    pub decode_failures: u64,
    /// Sequence of the last chunk written to the frame buffer
    pub last_sequence: Option<u64>,
}

impl WorkerStats {
    fn record_decoded(&self, sequence: u64) {
        // Stored +1 so zero means "nothing decoded yet"
        self.last_sequence.store(sequence + 1, Ordering::Release);
        self.decoded.fetch_add(1, Ordering::Release);
    }

    fn record_pending(&self) {
        self.pending.fetch_add(1, Ordering::Release);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Release);
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            chunks_decoded: self.decoded.load(Ordering::Acquire),
            chunks_pending: self.pending.load(Ordering::Acquire),
            decode_failures: self.failures.load(Ordering::Acquire),
            last_sequence: self.last_sequence.load(Ordering::Acquire).checked_sub(1),
        }
    }
}

/// Everything the worker borrows for its lifetime
pub struct WorkerContext {
    pub queue: ChunkReceiver,
    pub frame: FrameBufferView,
    pub shape: FrameShape,
    pub decoder: Box<dyn FrameDecoder>,
    pub terminate: Arc<AtomicBool>,
    pub stats: Arc<WorkerStats>,
    pub poll_interval: Duration,
    pub pin_core: Option<usize>,
}

/// Running decode worker
pub struct DecodeWorker {
    handle: JoinHandle<Box<dyn FrameDecoder>>,
}

impl DecodeWorker {
    pub fn spawn(ctx: WorkerContext) -> std::io::Result<Self> {
        let name = format!("stream-decode-{}", ctx.frame.handle().name());
        let handle = thread::Builder::new().name(name).spawn(move || run(ctx))?;
        Ok(Self { handle })
    }

    /// True once the thread has exited, whether asked to or not
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to exit and take the decoder back
    ///
    /// Returns `None` if the worker thread panicked.
    pub fn join(self) -> Option<Box<dyn FrameDecoder>> {
        match self.handle.join() {
            Ok(decoder) => Some(decoder),
            Err(_) => {
                error!("Decode worker panicked");
                None
            }
        }
    }
}

fn pin_to_core(core: usize) {
    let Some(ids) = core_affinity::get_core_ids() else {
        warn!("Could not query CPU cores, decode worker not pinned");
        return;
    };
    match ids.into_iter().find(|id| id.id == core) {
        Some(id) if core_affinity::set_for_current(id) => {
            debug!("Decode worker pinned to core {}", core);
        }
        _ => warn!("Failed to pin decode worker to core {}", core),
    }
}

fn run(mut ctx: WorkerContext) -> Box<dyn FrameDecoder> {
    if let Some(core) = ctx.pin_core {
        pin_to_core(core);
    }

    info!(
        "Decode worker started ({} {}x{})",
        ctx.decoder.name(),
        ctx.shape.width,
        ctx.shape.height
    );

    let mut scratch = vec![0u8; ctx.frame.len()];

    while !ctx.terminate.load(Ordering::Acquire) {
        let chunk = match ctx.queue.recv_timeout(ctx.poll_interval) {
            Ok(chunk) => chunk,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Chunk queue disconnected");
                break;
            }
        };

        process_chunk(&mut ctx, &chunk, &mut scratch);
    }

    let stats = ctx.stats.snapshot();
    info!(
        "Decode worker finished ({} decoded, {} failed)",
        stats.chunks_decoded, stats.decode_failures
    );
    ctx.decoder
}

fn process_chunk(ctx: &mut WorkerContext, chunk: &CompressedChunk, scratch: &mut [u8]) {
    let decode_start = Instant::now();

    let decoder = &mut ctx.decoder;
    let shape = ctx.shape;
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        decoder.decode(&chunk.data, shape, scratch)
    }))
    .unwrap_or_else(|payload| Err(DecodeError::Panicked(panic_message(payload.as_ref()))));

    // Only complete frames reach the shared buffer
    let result = result.and_then(|status| match status {
        DecodeStatus::Frame => ctx.frame.write_frame(scratch).map(|()| status),
        DecodeStatus::Pending => Ok(status),
    });

    match result {
        Ok(DecodeStatus::Pending) => {
            ctx.stats.record_pending();
            metrics::counter!("stream_decode_chunks_pending").increment(1);
            trace!("Chunk {} buffered, no frame yet", chunk.sequence);
        }
        Ok(DecodeStatus::Frame) => {
            ctx.stats.record_decoded(chunk.sequence);
            metrics::counter!("stream_decode_chunks_decoded").increment(1);
            metrics::histogram!("stream_decode_decode_time_us")
                .record(decode_start.elapsed().as_micros() as f64);
            metrics::histogram!("stream_decode_chunk_latency_us")
                .record(chunk.received_at.elapsed().as_micros() as f64);
        }
        Err(e) => {
            ctx.stats.record_failure();
            metrics::counter!("stream_decode_decode_failures").increment(1);
            warn!(
                "Skipping chunk {} ({} bytes): {}",
                chunk.sequence,
                chunk.len(),
                e
            );
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
