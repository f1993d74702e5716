use ndarray::{ArrayView3, ShapeError};
use std::fmt;

/// Spatial layout of a frame: rows, columns and interleaved channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameShape {
    pub height: u32,
    pub width: u32,
    pub channels: u32,
}

impl FrameShape {
    pub fn new(height: u32, width: u32, channels: u32) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Packed 8-bit RGB
    pub fn rgb(height: u32, width: u32) -> Self {
        Self::new(height, width, 3)
    }

    /// Single-channel 8-bit (mattes)
    pub fn gray(height: u32, width: u32) -> Self {
        Self::new(height, width, 1)
    }

    /// Number of bytes one frame of this shape occupies
    pub fn byte_len(&self) -> usize {
        self.height as usize * self.width as usize * self.channels as usize
    }
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("frame {index}: {actual} bytes do not fill shape {shape} ({expected} bytes)")]
pub struct FrameSizeError {
    pub index: usize,
    pub shape: FrameShape,
    pub expected: usize,
    pub actual: usize,
}

/// A decoded frame or a computed matte
///
/// Samples are row-major, channels interleaved (HWC), one byte per sample.
/// The byte length always matches the shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    index: usize,
    shape: FrameShape,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(index: usize, shape: FrameShape, data: Vec<u8>) -> Result<Self, FrameSizeError> {
        let expected = shape.byte_len();
        if data.len() != expected {
            return Err(FrameSizeError {
                index,
                shape,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self { index, shape, data })
    }

    /// Position of this frame in the source video
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn width(&self) -> u32 {
        self.shape.width
    }

    pub fn height(&self) -> u32 {
        self.shape.height
    }

    /// Raw sample bytes, ready to be written to a rawvideo stream
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Borrow the samples as an `[height, width, channels]` array
    pub fn view(&self) -> Result<ArrayView3<'_, u8>, ShapeError> {
        ArrayView3::from_shape(
            (
                self.shape.height as usize,
                self.shape.width as usize,
                self.shape.channels as usize,
            ),
            &self.data,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_short_buffer() {
        let err = Frame::new(7, FrameShape::rgb(2, 2), vec![0; 11]).unwrap_err();
        assert_eq!(err.index, 7);
        assert_eq!(err.expected, 12);
        assert_eq!(err.actual, 11);
    }

    #[test]
    fn test_view_is_hwc() {
        // 1 row, 2 columns, rgb
        let frame = Frame::new(0, FrameShape::rgb(1, 2), vec![1, 2, 3, 4, 5, 6]).unwrap();
        let view = frame.view().unwrap();
        assert_eq!(view.shape(), &[1, 2, 3]);
        assert_eq!(view[[0, 1, 0]], 4);
        assert_eq!(view[[0, 0, 2]], 3);
    }

    #[test]
    fn test_gray_shape_byte_len() {
        assert_eq!(FrameShape::gray(320, 10).byte_len(), 3200);
        assert_eq!(FrameShape::gray(320, 10).to_string(), "10x320x1");
    }
}
