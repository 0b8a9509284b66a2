//! Test-pattern sensor emitting raw RGB24 frames on its own thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, error, info};

use super::{ChunkCallback, Sensor};
use crate::SensorConfig;

/// Moving colour bars at a fixed frame rate
pub struct SyntheticSensor {
    width: u32,
    height: u32,
    fps: u32,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SyntheticSensor {
    pub fn new(width: u32, height: u32, config: &SensorConfig) -> Self {
        Self {
            width,
            height,
            fps: config.fps.max(1),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    fn join(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Synthetic sensor thread panicked");
            }
        }
    }
}

/// Vertical bars shifted one column per frame
pub fn test_pattern(width: u32, height: u32, frame: u64) -> Vec<u8> {
    const BARS: [[u8; 3]; 8] = [
        [255, 255, 255],
        [255, 255, 0],
        [0, 255, 255],
        [0, 255, 0],
        [255, 0, 255],
        [255, 0, 0],
        [0, 0, 255],
        [0, 0, 0],
    ];

    let (width, height) = (width as usize, height as usize);
    let bar_width = (width / BARS.len()).max(1);
    let mut pixels = Vec::with_capacity(width * height * 3);
    for _ in 0..height {
        for x in 0..width {
            let shifted = (x + frame as usize) % width.max(1);
            pixels.extend_from_slice(&BARS[(shifted / bar_width) % BARS.len()]);
        }
    }
    pixels
}

impl Sensor for SyntheticSensor {
    fn listen(&mut self, callback: ChunkCallback) {
        self.join();

        let (width, height) = (self.width, self.height);
        let interval = Duration::from_secs(1) / self.fps;
        let running = self.running.clone();
        running.store(true, Ordering::Release);

        let spawned = thread::Builder::new()
            .name("synthetic-sensor".into())
            .spawn(move || {
                let mut frame = 0u64;
                let mut next = Instant::now();
                while running.load(Ordering::Acquire) {
                    callback(Bytes::from(test_pattern(width, height, frame)));
                    frame += 1;

                    next += interval;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
                debug!("Synthetic sensor emitted {} frames", frame);
            });

        match spawned {
            Ok(handle) => {
                info!(
                    "Synthetic sensor streaming {}x{} at {} fps",
                    self.width, self.height, self.fps
                );
                self.thread = Some(handle);
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                error!("Failed to spawn synthetic sensor thread: {}", e);
            }
        }
    }

    fn stop(&mut self) {
        self.join();
    }

    fn destroy(&mut self) {
        self.join();
    }
}

impl Drop for SyntheticSensor {
    fn drop(&mut self) {
        self.join();
    }
}
