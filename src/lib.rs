pub mod codec;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod sensor;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use codec::{Codec, DecodeStatus, FrameDecoder, FrameShape};
pub use display::Surface;
pub use error::{AllocationError, DecodeError, Error, LifecycleError, Result};
pub use pipeline::{DecoderState, FrameBuffer, FrameBufferHandle, StreamDecoder};
pub use sensor::{ChunkCallback, CompressedChunk, Sensor};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Prefix for environment overrides, e.g. `STREAM_DECODE__PIPELINE__CODEC=mjpeg`
pub const ENV_PREFIX: &str = "STREAM_DECODE";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub stream: StreamConfig,
    pub pipeline: PipelineConfig,
    pub sensor: SensorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub codec: Codec,
    /// `None` for an unbounded chunk queue; `Some(0)` is rejected
    pub queue_capacity: Option<usize>,
    /// How long the worker waits on an empty queue before re-checking termination
    pub poll_interval_ms: u64,
    /// Publish the current frame buffer as a surface on every ingest
    pub publish_on_ingest: bool,
    pub pin_worker_core: Option<usize>,
    /// Directory for frame buffers; auto-detected when unset
    pub shm_dir: Option<PathBuf>,
    pub shm_prefix: String,
    /// Slice threads for the software H.264 decoder, 0 for the decoder's default
    pub decode_threads: usize,
    /// Prefer a hardware H.264 decoder when one is installed
    pub use_hardware_acceleration: bool,
}

/// Demo sensor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    pub fps: u32,
    /// Stop the demo after this many seconds; run until Ctrl-C when unset
    pub run_for_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream: StreamConfig {
                width: 800,
                height: 600,
            },
            pipeline: PipelineConfig::default(),
            sensor: SensorConfig::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            codec: Codec::Rgb24,
            queue_capacity: None,
            poll_interval_ms: 5,
            publish_on_ingest: true,
            pin_worker_core: None,
            shm_dir: None,
            shm_prefix: "stream-decode".into(),
            decode_threads: 16,
            use_hardware_acceleration: false,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            run_for_secs: None,
        }
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn shm_dir(&self) -> PathBuf {
        match &self.shm_dir {
            Some(dir) => dir.clone(),
            None => utils::auto_detect_shm_dir(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == Some(0) {
            return Err(config::ConfigError::Message(
                "pipeline.queue_capacity must be at least 1 (leave unset for an unbounded queue)"
                    .into(),
            )
            .into());
        }
        Ok(())
    }
}

impl Config {
    /// Defaults, then an optional TOML file, then `STREAM_DECODE__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Config>()?;
        config.pipeline.validate()?;
        Ok(config)
    }
}
