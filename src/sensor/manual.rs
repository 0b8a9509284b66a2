//! Sensor driven by explicit `push` calls

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tracing::debug;

use super::{ChunkCallback, Sensor};

#[derive(Default)]
struct Shared {
    callback: Mutex<Option<ChunkCallback>>,
    stop_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
}

/// Sensor whose chunks come from a [`ManualSensorHandle`]
///
/// Useful when the real producer lives elsewhere (a network socket, a
/// simulator client) and only forwards bytes.
#[derive(Default)]
pub struct ManualSensor {
    shared: Arc<Shared>,
}

/// Cloneable producer side of a [`ManualSensor`]
#[derive(Clone)]
pub struct ManualSensorHandle {
    shared: Arc<Shared>,
}

impl ManualSensor {
    pub fn new() -> (Self, ManualSensorHandle) {
        let shared = Arc::new(Shared::default());
        (
            Self {
                shared: shared.clone(),
            },
            ManualSensorHandle { shared },
        )
    }
}

impl Sensor for ManualSensor {
    fn listen(&mut self, callback: ChunkCallback) {
        *self
            .shared
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn stop(&mut self) {
        self.shared.stop_calls.fetch_add(1, Ordering::Relaxed);
        self.shared
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!("Manual sensor stopped");
    }

    fn destroy(&mut self) {
        self.shared.destroy_calls.fetch_add(1, Ordering::Relaxed);
        self.shared
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl ManualSensorHandle {
    /// Deliver one chunk. Returns false if nobody is listening.
    pub fn push(&self, data: impl Into<Bytes>) -> bool {
        let guard = self
            .shared
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(callback) => {
                callback(data.into());
                true
            }
            None => false,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.shared
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn stop_calls(&self) -> usize {
        self.shared.stop_calls.load(Ordering::Relaxed)
    }

    pub fn destroy_calls(&self) -> usize {
        self.shared.destroy_calls.load(Ordering::Relaxed)
    }
}
