//! Shared memory frame buffer
//!
//! One decoded frame lives in a file on a tmpfs mount, mapped by the owner and
//! by every attached view. Views created with [`FrameBuffer::attach`] are
//! independent mappings of the same pages, so the decode worker and the
//! presentation side never share a Rust reference.
//!
//! There is no synchronization between the writer and readers. A reader that
//! copies the buffer while the worker is mid-write sees a torn frame.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use memmap2::{MmapMut, MmapOptions};
use tracing::{debug, warn};

use crate::error::{AllocationError, LifecycleError, Result};
use crate::utils;

/// Name and location of a frame buffer, enough for another party to attach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBufferHandle {
    name: String,
    path: PathBuf,
    len: usize,
}

impl FrameBufferHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Owning side of a shared frame buffer
pub struct FrameBuffer {
    handle: FrameBufferHandle,
    map: Option<MmapMut>,
}

impl FrameBuffer {
    /// Allocate in the auto-detected shared memory directory
    pub fn allocate(len: usize) -> Result<Self> {
        Self::allocate_in(&utils::auto_detect_shm_dir(), "frame", len)
    }

    /// Allocate a zeroed buffer of `len` bytes under `dir`
    pub fn allocate_in(dir: &Path, prefix: &str, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(AllocationError::ZeroSize.into());
        }

        let name = utils::unique_buffer_name(prefix);
        let path = dir.join(&name);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| AllocationError::Create {
                path: path.clone(),
                source,
            })?;

        if let Err(source) = file.set_len(len as u64) {
            let _ = fs::remove_file(&path);
            return Err(AllocationError::Resize { path, len, source }.into());
        }

        let map = match map_file(&file, len) {
            Ok(map) => map,
            Err(source) => {
                let _ = fs::remove_file(&path);
                return Err(AllocationError::Map { path, source }.into());
            }
        };

        debug!("Allocated frame buffer {} ({} bytes)", name, len);

        Ok(Self {
            handle: FrameBufferHandle { name, path, len },
            map: Some(map),
        })
    }

    pub fn handle(&self) -> &FrameBufferHandle {
        &self.handle
    }

    pub fn len(&self) -> usize {
        self.handle.len
    }

    pub fn is_empty(&self) -> bool {
        self.handle.len == 0
    }

    pub fn is_released(&self) -> bool {
        self.map.is_none()
    }

    /// Open an independent read/write view onto the buffer named by `handle`
    pub fn attach(handle: &FrameBufferHandle) -> Result<FrameBufferView> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&handle.path)
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => {
                    crate::Error::from(LifecycleError::NotAllocated(handle.name.clone()))
                }
                _ => AllocationError::Attach {
                    name: handle.name.clone(),
                    source,
                }
                .into(),
            })?;

        let actual = file
            .metadata()
            .map_err(|source| AllocationError::Attach {
                name: handle.name.clone(),
                source,
            })?
            .len() as usize;
        if actual != handle.len {
            return Err(AllocationError::SizeMismatch {
                name: handle.name.clone(),
                expected: handle.len,
                actual,
            }
            .into());
        }

        let map = map_file(&file, handle.len).map_err(|source| AllocationError::Attach {
            name: handle.name.clone(),
            source,
        })?;

        Ok(FrameBufferView {
            handle: handle.clone(),
            map,
        })
    }

    /// Unmap and free the underlying storage
    ///
    /// Views that are still attached keep their mapping until dropped.
    pub fn release(&mut self) -> Result<()> {
        let Some(map) = self.map.take() else {
            return Err(LifecycleError::AlreadyReleased(self.handle.name.clone()).into());
        };
        drop(map);

        if let Err(e) = fs::remove_file(&self.handle.path) {
            // Storage is already gone; the mapping is released either way.
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to unlink frame buffer {}: {}", self.handle.name, e);
            }
        }

        debug!("Released frame buffer {}", self.handle.name);
        Ok(())
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if !self.is_released() {
            let _ = self.release();
        }
    }
}

/// Attached mapping of a frame buffer
pub struct FrameBufferView {
    handle: FrameBufferHandle,
    map: MmapMut,
}

impl FrameBufferView {
    pub fn handle(&self) -> &FrameBufferHandle {
        &self.handle
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    /// Overwrite the whole frame
    pub fn write_frame(&mut self, pixels: &[u8]) -> std::result::Result<(), crate::DecodeError> {
        if pixels.len() != self.map.len() {
            return Err(crate::DecodeError::SizeMismatch {
                expected: self.map.len(),
                actual: pixels.len(),
            });
        }
        self.map.copy_from_slice(pixels);
        Ok(())
    }

    pub fn fill(&mut self, value: u8) {
        self.map.fill(value);
    }

    /// Copy the current contents out
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.map)
    }
}

fn map_file(file: &File, len: usize) -> io::Result<MmapMut> {
    // SAFETY: the file is private to this crate's buffers and is never
    // truncated while mapped. Concurrent writes through other mappings are
    // the accepted torn-frame behaviour documented at module level.
    unsafe { MmapOptions::new().len(len).map_mut(file) }
}
