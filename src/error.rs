//! Error types for the decode pipeline

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error returned by pipeline operations
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("failed to spawn decode worker: {0}")]
    Spawn(#[source] io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// The shared frame buffer could not be created, sized or mapped
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("frame buffer size must be non-zero")]
    ZeroSize,

    #[error("frame of {width}x{height}x{channels} does not fit in memory")]
    TooLarge {
        width: u32,
        height: u32,
        channels: usize,
    },

    #[error("failed to create frame buffer {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to size frame buffer {} to {len} bytes: {source}", path.display())]
    Resize {
        path: PathBuf,
        len: usize,
        #[source]
        source: io::Error,
    },

    #[error("failed to map frame buffer {}: {source}", path.display())]
    Map {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to attach to frame buffer {name}: {source}")]
    Attach {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("frame buffer {name} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
}

/// One chunk failed to decode. Recovered inside the worker loop.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("chunk is {actual} bytes, frame needs {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("decoded {actual_width}x{actual_height}, frame is {expected_width}x{expected_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("unsupported pixel layout: {0}")]
    UnsupportedLayout(String),

    #[error("malformed chunk: {0}")]
    Malformed(String),

    #[error("decoder panicked: {0}")]
    Panicked(String),

    /// The external decode pipeline failed; it is rebuilt on the next chunk
    #[error("decode backend failed: {0}")]
    Backend(String),
}

/// An operation was called out of valid state order
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("decoder is already running")]
    AlreadyRunning,

    #[error("decoder is not running")]
    NotRunning,

    #[error("decoder has been destroyed")]
    Destroyed,

    #[error("frame buffer {0} was already released")]
    AlreadyReleased(String),

    #[error("frame buffer {0} is not allocated")]
    NotAllocated(String),

    #[error("decode worker faulted; its decoder was lost")]
    WorkerFaulted,
}
