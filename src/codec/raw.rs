//! Uncompressed 24-bit frames

use super::{DecodeStatus, FrameDecoder, FrameShape, CHANNELS};
use crate::error::DecodeError;

/// Passthrough decoder for chunks that already hold one packed frame
pub struct RawDecoder {
    swap_red_blue: bool,
}

impl RawDecoder {
    pub fn rgb() -> Self {
        Self {
            swap_red_blue: false,
        }
    }

    pub fn bgr() -> Self {
        Self {
            swap_red_blue: true,
        }
    }
}

impl FrameDecoder for RawDecoder {
    fn decode(
        &mut self,
        data: &[u8],
        _shape: FrameShape,
        out: &mut [u8],
    ) -> Result<DecodeStatus, DecodeError> {
        if data.len() != out.len() {
            return Err(DecodeError::SizeMismatch {
                expected: out.len(),
                actual: data.len(),
            });
        }

        if self.swap_red_blue {
            for (dst, src) in out.chunks_exact_mut(CHANNELS).zip(data.chunks_exact(CHANNELS)) {
                dst[0] = src[2];
                dst[1] = src[1];
                dst[2] = src[0];
            }
        } else {
            // Already in RGB format
            out.copy_from_slice(data);
        }
        Ok(DecodeStatus::Frame)
    }

    fn name(&self) -> &'static str {
        if self.swap_red_blue {
            "bgr24"
        } else {
            "rgb24"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_passthrough() {
        let shape = FrameShape::new(2, 1);
        let mut out = [0u8; 6];
        let status = RawDecoder::rgb()
            .decode(&[1, 2, 3, 4, 5, 6], shape, &mut out)
            .unwrap();
        assert_eq!(status, DecodeStatus::Frame);
        assert_eq!(out, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_bgr_swaps_channels() {
        let shape = FrameShape::new(2, 1);
        let mut out = [0u8; 6];
        RawDecoder::bgr()
            .decode(&[1, 2, 3, 4, 5, 6], shape, &mut out)
            .unwrap();
        assert_eq!(out, [3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_short_chunk_rejected() {
        let shape = FrameShape::new(2, 1);
        let mut out = [9u8; 6];
        let err = RawDecoder::rgb().decode(&[1, 2, 3], shape, &mut out).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::SizeMismatch {
                expected: 6,
                actual: 3
            }
        ));
        assert_eq!(out, [9u8; 6]);
    }
}
