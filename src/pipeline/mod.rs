pub mod framebuf;
pub mod queue;
pub mod stream;
pub mod worker;

pub use framebuf::{FrameBuffer, FrameBufferHandle, FrameBufferView};
pub use queue::{ChunkQueue, ChunkReceiver, ChunkSender, QueueStats};
pub use stream::{DecoderState, PipelineStats, StreamDecoder};
pub use worker::{DecodeWorker, WorkerContext, WorkerSnapshot, WorkerStats};
