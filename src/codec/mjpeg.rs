//! Motion JPEG: every chunk is a complete JPEG image

use super::{DecodeStatus, FrameDecoder, FrameShape, CHANNELS};
use crate::error::DecodeError;

#[derive(Default)]
pub struct MjpegDecoder;

impl MjpegDecoder {
    pub fn new() -> Self {
        Self
    }
}

/// Decode to packed pixels, returning (pixels, width, height)
#[cfg(feature = "fast-jpeg")]
fn decode_jpeg(data: &[u8]) -> Result<(Vec<u8>, u32, u32), DecodeError> {
    let mut decoder = zune_jpeg::JpegDecoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let (width, height) = decoder
        .dimensions()
        .ok_or_else(|| DecodeError::Malformed("missing frame header".into()))?;
    Ok((pixels, width as u32, height as u32))
}

#[cfg(all(feature = "portable-jpeg", not(feature = "fast-jpeg")))]
fn decode_jpeg(data: &[u8]) -> Result<(Vec<u8>, u32, u32), DecodeError> {
    let mut decoder = jpeg_decoder::Decoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| DecodeError::Malformed("missing frame header".into()))?;
    match info.pixel_format {
        jpeg_decoder::PixelFormat::RGB24 | jpeg_decoder::PixelFormat::L8 => {}
        other => return Err(DecodeError::UnsupportedLayout(format!("{:?}", other))),
    }
    Ok((pixels, info.width as u32, info.height as u32))
}

impl FrameDecoder for MjpegDecoder {
    fn decode(
        &mut self,
        data: &[u8],
        shape: FrameShape,
        out: &mut [u8],
    ) -> Result<DecodeStatus, DecodeError> {
        let (pixels, width, height) = decode_jpeg(data)?;

        if width != shape.width || height != shape.height {
            return Err(DecodeError::DimensionMismatch {
                expected_width: shape.width,
                expected_height: shape.height,
                actual_width: width,
                actual_height: height,
            });
        }

        let count = width as usize * height as usize;
        match pixels.len() / count.max(1) {
            CHANNELS if pixels.len() == out.len() => out.copy_from_slice(&pixels),
            1 => {
                // Grayscale: replicate luma into RGB
                for (dst, &luma) in out.chunks_exact_mut(CHANNELS).zip(pixels.iter()) {
                    dst.fill(luma);
                }
            }
            channels => {
                return Err(DecodeError::UnsupportedLayout(format!(
                    "{} bytes per pixel",
                    channels
                )))
            }
        }
        Ok(DecodeStatus::Frame)
    }

    fn name(&self) -> &'static str {
        "mjpeg"
    }
}
