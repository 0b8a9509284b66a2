//! Sensor side of the pipeline
//!
//! A sensor pushes compressed chunks into a callback from its own thread. The
//! stream decoder registers that callback on `start` and asks the sensor to
//! stop emitting on `stop`.

pub mod chunk;
pub mod manual;
pub mod synthetic;

use bytes::Bytes;

pub use chunk::CompressedChunk;
pub use manual::{ManualSensor, ManualSensorHandle};
pub use synthetic::SyntheticSensor;

/// Invoked once per chunk, possibly from a thread other than the orchestrator's
pub type ChunkCallback = Box<dyn Fn(Bytes) + Send + Sync + 'static>;

/// External producer of compressed chunks
pub trait Sensor: Send {
    /// Start delivering chunks to `callback`, replacing any previous one
    fn listen(&mut self, callback: ChunkCallback);

    /// Stop emitting. Chunks may still be in flight when this returns.
    fn stop(&mut self);

    /// Release sensor resources. No chunks are delivered afterwards.
    fn destroy(&mut self);
}

impl<S: Sensor + ?Sized> Sensor for Box<S> {
    fn listen(&mut self, callback: ChunkCallback) {
        (**self).listen(callback)
    }

    fn stop(&mut self) {
        (**self).stop()
    }

    fn destroy(&mut self) {
        (**self).destroy()
    }
}
