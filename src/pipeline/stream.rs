//! Stream decoder: lifecycle and wiring for one sensor's decode pipeline

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use crossbeam::sync::ShardedLock;
use tracing::{debug, info, instrument, warn};

use crate::codec::{decoder_for, FrameDecoder, FrameShape};
use crate::display::Surface;
use crate::error::{Error, LifecycleError, Result};
use crate::pipeline::{
    ChunkQueue, ChunkReceiver, ChunkSender, DecodeWorker, FrameBuffer, FrameBufferHandle,
    FrameBufferView, QueueStats, WorkerContext, WorkerSnapshot, WorkerStats,
};
use crate::sensor::{CompressedChunk, Sensor};
use crate::{PipelineConfig, CONFIG};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Created,
    Running,
    Stopped,
    Destroyed,
}

/// Worker and queue counters together
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub worker: WorkerSnapshot,
    pub queue: QueueStats,
}

/// State the sensor callback needs
///
/// The callback holds only a `Weak` to this, so it never keeps the pipeline
/// alive and becomes a no-op once the decoder is destroyed.
struct IngestPort {
    /// Read-held from the termination check until the push completes;
    /// `close` takes it for writing
    gate: ShardedLock<()>,
    terminate: Arc<AtomicBool>,
    queue: ChunkSender,
    frame: FrameBufferView,
    shape: FrameShape,
    surface: ArcSwapOption<Surface>,
    publish_on_ingest: bool,
    next_sequence: AtomicU64,
}

impl IngestPort {
    fn ingest(&self, data: Bytes) -> bool {
        let sequence = {
            let _open = self.gate.read().unwrap_or_else(PoisonError::into_inner);
            if self.terminate.load(Ordering::Acquire) {
                self.queue.record_rejected();
                return false;
            }

            let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
            if !self.queue.push(CompressedChunk::new(data, sequence)) {
                return false;
            }
            sequence
        };

        // Publishes what is in the buffer now, i.e. the frame decoded from an
        // earlier chunk. The displayed frame lags the newest chunk by one.
        if self.publish_on_ingest {
            let surface = Surface::capture(&self.frame, self.shape, Some(sequence));
            self.surface.store(Some(Arc::new(surface)));
        }
        true
    }

    /// Request termination. Returns once every ingest that saw the flag clear
    /// has finished pushing, so nothing is enqueued after this.
    fn close(&self) {
        let _closed = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        self.terminate.store(true, Ordering::Release);
    }
}

/// Orchestrates chunk queue, shared frame buffer and decode worker for one sensor
pub struct StreamDecoder<S: Sensor> {
    sensor: S,
    shape: FrameShape,
    state: DecoderState,
    terminate: Arc<AtomicBool>,
    frame: FrameBuffer,
    port: Option<Arc<IngestPort>>,
    queue: ChunkReceiver,
    decoder: Option<Box<dyn FrameDecoder>>,
    worker: Option<DecodeWorker>,
    stats: Arc<WorkerStats>,
    poll_interval: Duration,
    pin_core: Option<usize>,
}

impl<S: Sensor> StreamDecoder<S> {
    /// Create with the global pipeline configuration
    pub fn create(sensor: S, width: u32, height: u32) -> Result<Self> {
        let config = CONFIG.load().pipeline.clone();
        let decoder = decoder_for(&config);
        Self::create_with(sensor, width, height, &config, decoder)
    }

    /// Allocate the frame buffer and queue. Does not start decoding.
    #[instrument(skip(sensor, config, decoder))]
    pub fn create_with(
        sensor: S,
        width: u32,
        height: u32,
        config: &PipelineConfig,
        decoder: Box<dyn FrameDecoder>,
    ) -> Result<Self> {
        config.validate()?;
        let shape = FrameShape::new(width, height);
        let len = shape.byte_len()?;

        let frame = FrameBuffer::allocate_in(&config.shm_dir(), &config.shm_prefix, len)?;
        let view = FrameBuffer::attach(frame.handle())?;
        let (tx, rx) = ChunkQueue::with_capacity(config.queue_capacity);
        let terminate = Arc::new(AtomicBool::new(false));

        let port = Arc::new(IngestPort {
            gate: ShardedLock::new(()),
            terminate: terminate.clone(),
            queue: tx,
            frame: view,
            shape,
            surface: ArcSwapOption::empty(),
            publish_on_ingest: config.publish_on_ingest,
            next_sequence: AtomicU64::new(0),
        });

        info!(
            "Created stream decoder {} ({}x{}, {}, {} bytes)",
            frame.handle().name(),
            width,
            height,
            decoder.name(),
            len
        );

        Ok(Self {
            sensor,
            shape,
            state: DecoderState::Created,
            terminate,
            frame,
            port: Some(port),
            queue: rx,
            decoder: Some(decoder),
            worker: None,
            stats: Arc::new(WorkerStats::default()),
            poll_interval: config.poll_interval(),
            pin_core: config.pin_worker_core,
        })
    }

    /// Register the ingest callback and spawn the decode worker
    #[instrument(skip(self), fields(buffer = %self.frame.handle().name()))]
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            DecoderState::Running => return Err(LifecycleError::AlreadyRunning.into()),
            DecoderState::Destroyed => return Err(LifecycleError::Destroyed.into()),
            DecoderState::Created | DecoderState::Stopped => {}
        }

        let port = self.port.as_ref().ok_or(LifecycleError::Destroyed)?;
        let view = FrameBuffer::attach(self.frame.handle())?;
        let decoder = self.decoder.take().ok_or(LifecycleError::WorkerFaulted)?;

        self.terminate.store(false, Ordering::Release);

        let weak: Weak<IngestPort> = Arc::downgrade(port);
        self.sensor.listen(Box::new(move |data| {
            if let Some(port) = weak.upgrade() {
                port.ingest(data);
            }
        }));

        let ctx = WorkerContext {
            queue: self.queue.clone(),
            frame: view,
            shape: self.shape,
            decoder,
            terminate: self.terminate.clone(),
            stats: self.stats.clone(),
            poll_interval: self.poll_interval,
            pin_core: self.pin_core,
        };

        // A failed spawn drops the context, decoder included.
        match DecodeWorker::spawn(ctx) {
            Ok(worker) => self.worker = Some(worker),
            Err(e) => {
                self.close_ingest();
                self.sensor.stop();
                return Err(Error::Spawn(e));
            }
        }

        self.state = DecoderState::Running;
        info!("Stream decoder running");
        Ok(())
    }

    /// Signal the worker, wait for it to exit, then stop the sensor
    ///
    /// No frame buffer writes happen after this returns, and nothing more is
    /// enqueued until the next `start`. Chunks still queued are discarded.
    #[instrument(skip(self), fields(buffer = %self.frame.handle().name()))]
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            DecoderState::Running => {}
            DecoderState::Destroyed => return Err(LifecycleError::Destroyed.into()),
            DecoderState::Created | DecoderState::Stopped => {
                return Err(LifecycleError::NotRunning.into())
            }
        }

        if self.worker.as_ref().is_some_and(DecodeWorker::is_finished) {
            warn!("Decode worker exited before stop was requested");
        }

        self.close_ingest();

        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Some(decoder) => self.decoder = Some(decoder),
                None => warn!("Decode worker exited abnormally; restart will fail"),
            }
        }

        self.sensor.stop();

        let discarded = self.queue.drain();
        if discarded > 0 {
            debug!("Discarded {} pending chunks", discarded);
        }

        self.state = DecoderState::Stopped;
        info!("Stream decoder stopped");
        Ok(())
    }

    fn close_ingest(&self) {
        match &self.port {
            Some(port) => port.close(),
            None => self.terminate.store(true, Ordering::Release),
        }
    }

    /// Stop if running, free the frame buffer and destroy the sensor
    #[instrument(skip(self), fields(buffer = %self.frame.handle().name()))]
    pub fn destroy(&mut self) -> Result<()> {
        match self.state {
            DecoderState::Destroyed => return Err(LifecycleError::Destroyed.into()),
            DecoderState::Running => self.stop()?,
            DecoderState::Created | DecoderState::Stopped => {}
        }

        // Late callbacks fail to upgrade from here on
        self.port = None;
        self.state = DecoderState::Destroyed;

        self.frame.release()?;
        self.sensor.destroy();

        info!("Stream decoder destroyed");
        Ok(())
    }

    /// Accept one chunk from the sensor
    ///
    /// Dropped without error once termination has been requested, or when a
    /// bounded queue is full. Returns whether the chunk was queued.
    pub fn ingest(&self, data: impl Into<Bytes>) -> bool {
        match &self.port {
            Some(port) => port.ingest(data.into()),
            None => false,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn is_terminated(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }

    /// Handle the presentation side can attach to
    pub fn frame_handle(&self) -> &FrameBufferHandle {
        self.frame.handle()
    }

    /// Surface published by the most recent ingest
    pub fn latest_surface(&self) -> Option<Arc<Surface>> {
        self.port.as_ref()?.surface.load_full()
    }

    /// Copy the frame buffer as it is right now
    ///
    /// The surface carries the last decoded chunk's sequence, `None` before
    /// the first decode. `None` overall once destroyed.
    pub fn snapshot(&self) -> Option<Surface> {
        let port = self.port.as_ref()?;
        let sequence = self.stats.snapshot().last_sequence;
        Some(Surface::capture(&port.frame, self.shape, sequence))
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            worker: self.stats.snapshot(),
            queue: self.queue.stats(),
        }
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }
}

impl<S: Sensor> Drop for StreamDecoder<S> {
    fn drop(&mut self) {
        if self.state != DecoderState::Destroyed {
            if let Err(e) = self.destroy() {
                warn!("Failed to destroy stream decoder on drop: {}", e);
            }
        }
    }
}
