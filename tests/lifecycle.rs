//! End-to-end pipeline scenarios driven through a manual sensor

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use stream_decode::codec::{DecodeStatus, RawDecoder};
use stream_decode::sensor::{ManualSensor, ManualSensorHandle};
use stream_decode::{
    ChunkCallback, DecodeError, DecoderState, Error, FrameBuffer, FrameDecoder, FrameShape,
    LifecycleError, PipelineConfig, Sensor, StreamDecoder,
};
use tempfile::TempDir;

fn config(dir: &TempDir) -> PipelineConfig {
    PipelineConfig {
        shm_dir: Some(dir.path().to_path_buf()),
        poll_interval_ms: 1,
        ..Default::default()
    }
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

/// Reads a little-endian sequence tag from the first 8 bytes and records it
struct TaggedDecoder {
    seen: Arc<Mutex<Vec<u64>>>,
}

impl FrameDecoder for TaggedDecoder {
    fn decode(
        &mut self,
        data: &[u8],
        _shape: FrameShape,
        out: &mut [u8],
    ) -> Result<DecodeStatus, DecodeError> {
        let tag: [u8; 8] = data
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| DecodeError::Malformed("missing tag".into()))?;
        self.seen.lock().unwrap().push(u64::from_le_bytes(tag));
        out.fill(tag[0]);
        Ok(DecodeStatus::Frame)
    }

    fn name(&self) -> &'static str {
        "tagged"
    }
}

/// Sleeps per chunk so a backlog builds up
struct SlowDecoder;

impl FrameDecoder for SlowDecoder {
    fn decode(
        &mut self,
        data: &[u8],
        shape: FrameShape,
        out: &mut [u8],
    ) -> Result<DecodeStatus, DecodeError> {
        thread::sleep(Duration::from_millis(2));
        RawDecoder::rgb().decode(data, shape, out)
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

type SharedCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Emits from a free-running thread. `stop` only detaches the callback and
/// does not wait for a delivery that is already under way.
struct DetachedSensor {
    callback: Arc<Mutex<Option<SharedCallback>>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DetachedSensor {
    fn new(chunk: Vec<u8>) -> Self {
        let callback: Arc<Mutex<Option<SharedCallback>>> = Arc::default();
        let running = Arc::new(AtomicBool::new(true));
        let thread = {
            let callback = callback.clone();
            let running = running.clone();
            let chunk = Bytes::from(chunk);
            thread::spawn(move || {
                while running.load(Ordering::Acquire) {
                    // Called outside the lock, so stop() never waits on it
                    let current = callback.lock().unwrap().clone();
                    match current {
                        Some(deliver) => deliver(chunk.clone()),
                        None => thread::yield_now(),
                    }
                }
            })
        };
        Self {
            callback,
            running,
            thread: Some(thread),
        }
    }
}

impl Sensor for DetachedSensor {
    fn listen(&mut self, callback: ChunkCallback) {
        *self.callback.lock().unwrap() = Some(Arc::from(callback));
    }

    fn stop(&mut self) {
        self.callback.lock().unwrap().take();
    }

    fn destroy(&mut self) {
        self.stop();
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap();
        }
    }
}

impl Drop for DetachedSensor {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn started(
    dir: &TempDir,
    width: u32,
    height: u32,
    decoder: Box<dyn FrameDecoder>,
) -> (StreamDecoder<ManualSensor>, ManualSensorHandle) {
    let (sensor, handle) = ManualSensor::new();
    let mut stream = StreamDecoder::create_with(sensor, width, height, &config(dir), decoder).unwrap();
    stream.start().unwrap();
    (stream, handle)
}

#[test]
fn chunks_are_decoded_in_fifo_order() {
    let dir = TempDir::new().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (mut stream, handle) = started(
        &dir,
        4,
        2,
        Box::new(TaggedDecoder { seen: seen.clone() }),
    );

    let producer = thread::spawn(move || {
        for tag in 0u64..200 {
            assert!(handle.push(tag.to_le_bytes().to_vec()));
        }
    });
    producer.join().unwrap();

    wait_until("200 decodes", || seen.lock().unwrap().len() == 200);
    stream.stop().unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(*seen, (0u64..200).collect::<Vec<_>>());
    assert_eq!(stream.stats().worker.last_sequence, Some(199));
}

#[test]
fn no_writes_after_stop_returns() {
    let dir = TempDir::new().unwrap();
    let (mut stream, handle) = started(&dir, 4, 2, Box::new(SlowDecoder));

    for i in 0..50u8 {
        handle.push(vec![i; 24]);
    }
    wait_until("first decode", || stream.stats().worker.chunks_decoded > 0);
    stream.stop().unwrap();

    let mut view = FrameBuffer::attach(stream.frame_handle()).unwrap();
    view.fill(0xAA);
    thread::sleep(Duration::from_millis(50));
    assert!(view.as_slice().iter().all(|&b| b == 0xAA));
    assert_eq!(stream.queue_len(), 0);
}

#[test]
fn ingest_after_termination_is_dropped() {
    let dir = TempDir::new().unwrap();
    let (mut stream, _handle) = started(&dir, 4, 2, Box::new(RawDecoder::rgb()));
    stream.stop().unwrap();
    assert!(stream.is_terminated());

    let before = stream.queue_len();
    assert!(!stream.ingest(vec![1u8; 24]));
    assert_eq!(stream.queue_len(), before);
    assert_eq!(stream.stats().queue.rejected, 1);
}

#[test]
fn double_release_and_destroy_are_lifecycle_errors() {
    let dir = TempDir::new().unwrap();
    let (mut stream, handle) = started(&dir, 4, 2, Box::new(RawDecoder::rgb()));
    let path = stream.frame_handle().path().to_path_buf();

    stream.destroy().unwrap();
    assert_eq!(stream.state(), DecoderState::Destroyed);
    assert!(!path.exists());
    assert_eq!(handle.stop_calls(), 1);
    assert_eq!(handle.destroy_calls(), 1);

    assert!(matches!(
        stream.destroy(),
        Err(Error::Lifecycle(LifecycleError::Destroyed))
    ));

    let mut buffer = FrameBuffer::allocate_in(dir.path(), "direct", 24).unwrap();
    buffer.release().unwrap();
    assert!(matches!(
        buffer.release(),
        Err(Error::Lifecycle(LifecycleError::AlreadyReleased(_)))
    ));
}

#[test]
fn solid_colour_chunk_fills_buffer() {
    let dir = TempDir::new().unwrap();
    let (mut stream, handle) = started(&dir, 4, 2, Box::new(RawDecoder::rgb()));
    assert_eq!(stream.frame_handle().len(), 24);

    let pattern: Vec<u8> = (0..8).flat_map(|_| [12u8, 34, 56]).collect();
    assert!(handle.push(pattern.clone()));

    let reader = FrameBuffer::attach(stream.frame_handle()).unwrap();
    wait_until("solid frame", || reader.as_slice() == &pattern[..]);
    stream.destroy().unwrap();
}

#[test]
fn malformed_chunk_is_skipped() {
    let dir = TempDir::new().unwrap();
    let (mut stream, handle) = started(&dir, 4, 2, Box::new(RawDecoder::rgb()));

    assert!(handle.push(vec![1u8; 7]));
    assert!(handle.push(vec![9u8; 24]));

    wait_until("valid frame", || stream.stats().worker.chunks_decoded == 1);
    let stats = stream.stats();
    assert_eq!(stats.worker.decode_failures, 1);
    assert_eq!(stats.worker.last_sequence, Some(1));

    let reader = FrameBuffer::attach(stream.frame_handle()).unwrap();
    assert_eq!(reader.as_slice(), &[9u8; 24]);

    // Loop is still alive
    assert!(handle.push(vec![4u8; 24]));
    wait_until("third chunk", || stream.stats().worker.chunks_decoded == 2);
    assert_eq!(stream.state(), DecoderState::Running);
    stream.destroy().unwrap();
}

#[test]
fn stop_with_large_backlog_is_bounded() {
    let dir = TempDir::new().unwrap();
    let (mut stream, handle) = started(&dir, 4, 2, Box::new(SlowDecoder));

    for _ in 0..1000 {
        handle.push(vec![0u8; 24]);
    }
    assert!(stream.queue_len() > 500);

    let begin = Instant::now();
    stream.stop().unwrap();
    assert!(begin.elapsed() < Duration::from_secs(1));

    let stats = stream.stats();
    assert!(stats.worker.chunks_decoded < 1000);
    assert_eq!(stats.queue.discarded as u64 + stats.worker.chunks_decoded, 1000);
}

#[test]
fn queue_stays_empty_after_stop_with_detached_sensor() {
    let dir = TempDir::new().unwrap();
    let mut stream = StreamDecoder::create_with(
        DetachedSensor::new(vec![3u8; 24]),
        4,
        2,
        &config(&dir),
        Box::new(RawDecoder::rgb()),
    )
    .unwrap();

    for round in 0..300 {
        let enqueued = stream.stats().queue.enqueued;
        stream.start().unwrap();
        wait_until("chunks after start", || stream.stats().queue.enqueued > enqueued);
        stream.stop().unwrap();

        // Deliveries still running on the sensor thread must be refused
        thread::sleep(Duration::from_micros(200));
        assert_eq!(stream.queue_len(), 0, "chunk enqueued after stop in round {round}");
    }

    let stats = stream.stats().queue;
    assert!(stats.rejected > 0);
    assert_eq!(stats.enqueued, stats.dequeued + stats.discarded);
    stream.destroy().unwrap();
}
