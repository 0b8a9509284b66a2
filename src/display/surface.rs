//! Snapshot of the shared frame buffer, ready to hand to a renderer

use std::time::Instant;

use bytes::Bytes;

use crate::codec::{FrameShape, CHANNELS};
use crate::pipeline::FrameBufferView;

/// Owned copy of one frame's RGB pixels
#[derive(Clone)]
pub struct Surface {
    pub shape: FrameShape,
    /// Sequence of the chunk whose ingest triggered this snapshot, or for an
    /// on-demand snapshot the last chunk decoded. `None` if nothing has been
    /// decoded into the buffer yet.
    pub sequence: Option<u64>,
    pub pixels: Bytes,
    pub captured_at: Instant,
}

impl Surface {
    /// Copy whatever is in the buffer right now (may be torn, see `framebuf`)
    pub fn capture(view: &FrameBufferView, shape: FrameShape, sequence: Option<u64>) -> Self {
        Self {
            shape,
            sequence,
            pixels: view.to_bytes(),
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.shape.width
    }

    pub fn height(&self) -> u32 {
        self.shape.height
    }

    /// Row stride in bytes
    pub fn pitch(&self) -> usize {
        self.shape.pitch()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.shape.width || y >= self.shape.height {
            return None;
        }
        let offset = y as usize * self.pitch() + x as usize * CHANNELS;
        let px = self.pixels.get(offset..offset + CHANNELS)?;
        Some([px[0], px[1], px[2]])
    }

    /// Convert RGB to RGBA for surfaces that want 32-bit pixels
    pub fn to_rgba(&self) -> Vec<u8> {
        let mut rgba = Vec::with_capacity(self.pixels.len() / CHANNELS * 4);
        for chunk in self.pixels.chunks_exact(CHANNELS) {
            rgba.extend_from_slice(chunk);
            rgba.push(255);
        }
        rgba
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("shape", &self.shape)
            .field("sequence", &self.sequence)
            .finish()
    }
}
