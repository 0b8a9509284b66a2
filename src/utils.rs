use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

static BUFFER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Auto-detect best directory for shared frame buffers
///
/// Prefers tmpfs mounts so mapped pages never hit disk.
pub fn auto_detect_shm_dir() -> PathBuf {
    for candidate in ["/dev/shm", "/run/shm"] {
        let path = Path::new(candidate);
        if path.is_dir() {
            debug!("Using shared memory directory {}", candidate);
            return path.to_path_buf();
        }
    }

    let fallback = std::env::temp_dir();
    debug!(
        "No tmpfs mount found, falling back to {}",
        fallback.display()
    );
    fallback
}

/// Unique name for a new frame buffer, stable across processes for its lifetime
pub fn unique_buffer_name(prefix: &str) -> String {
    let n = BUFFER_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", prefix, std::process::id(), n)
}
