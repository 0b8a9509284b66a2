#[cfg(feature = "gstreamer-pipeline")]
pub mod h264;
#[cfg(any(feature = "fast-jpeg", feature = "portable-jpeg"))]
pub mod mjpeg;
pub mod raw;

use serde::{Deserialize, Serialize};

use crate::error::{AllocationError, DecodeError};
use crate::PipelineConfig;

#[cfg(feature = "gstreamer-pipeline")]
pub use h264::H264Decoder;
#[cfg(any(feature = "fast-jpeg", feature = "portable-jpeg"))]
pub use mjpeg::MjpegDecoder;
pub use raw::RawDecoder;

/// Bytes per decoded pixel
pub const CHANNELS: usize = 3;

/// Shape of one decoded frame: height x width x 3 (RGB)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameShape {
    pub width: u32,
    pub height: u32,
}

impl FrameShape {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Buffer size in bytes, rejecting empty and overflowing shapes
    pub fn byte_len(&self) -> Result<usize, AllocationError> {
        let len = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|n| n.checked_mul(CHANNELS))
            .ok_or(AllocationError::TooLarge {
                width: self.width,
                height: self.height,
                channels: CHANNELS,
            })?;
        if len == 0 {
            return Err(AllocationError::ZeroSize);
        }
        Ok(len)
    }

    pub fn pitch(&self) -> usize {
        self.width as usize * CHANNELS
    }
}

/// Chunk encodings the pipeline can decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// Uncompressed RGB, one frame per chunk
    Rgb24,
    /// Uncompressed BGR, one frame per chunk
    Bgr24,
    /// One JPEG image per chunk
    #[cfg(any(feature = "fast-jpeg", feature = "portable-jpeg"))]
    Mjpeg,
    /// H.264 Annex B byte stream; frames may depend on earlier chunks
    #[cfg(feature = "gstreamer-pipeline")]
    H264,
}

/// What a decoder made of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// `out` holds a complete frame
    Frame,
    /// Chunk accepted, but the decoder needs more input before it emits a
    /// frame. `out` must not be published.
    Pending,
}

/// Turns compressed chunks into full RGB frames
pub trait FrameDecoder: Send {
    /// Decode `data` into `out`, which is exactly `shape.byte_len()` bytes
    fn decode(
        &mut self,
        data: &[u8],
        shape: FrameShape,
        out: &mut [u8],
    ) -> Result<DecodeStatus, DecodeError>;

    fn name(&self) -> &'static str;
}

pub fn decoder_for(config: &PipelineConfig) -> Box<dyn FrameDecoder> {
    match config.codec {
        Codec::Rgb24 => Box::new(RawDecoder::rgb()),
        Codec::Bgr24 => Box::new(RawDecoder::bgr()),
        #[cfg(any(feature = "fast-jpeg", feature = "portable-jpeg"))]
        Codec::Mjpeg => Box::new(MjpegDecoder::new()),
        #[cfg(feature = "gstreamer-pipeline")]
        Codec::H264 => Box::new(H264Decoder::from_config(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_len() {
        assert_eq!(FrameShape::new(4, 2).byte_len().unwrap(), 24);
        assert_eq!(FrameShape::new(4, 2).pitch(), 12);
        assert!(matches!(
            FrameShape::new(0, 2).byte_len(),
            Err(AllocationError::ZeroSize)
        ));
    }

    fn name_for(codec: Codec) -> &'static str {
        let config = PipelineConfig {
            codec,
            ..Default::default()
        };
        decoder_for(&config).name()
    }

    #[test]
    fn test_decoder_for() {
        assert_eq!(name_for(Codec::Rgb24), "rgb24");
        assert_eq!(name_for(Codec::Bgr24), "bgr24");
        #[cfg(any(feature = "fast-jpeg", feature = "portable-jpeg"))]
        assert_eq!(name_for(Codec::Mjpeg), "mjpeg");
        #[cfg(feature = "gstreamer-pipeline")]
        assert_eq!(name_for(Codec::H264), "h264");
    }
}
