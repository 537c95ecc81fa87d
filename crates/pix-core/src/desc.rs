//! Image descriptor: geometry, element type and host-memory layout.

use crate::error::{Error, Result};
use crate::pixel::PixelType;

/// Describes a 2-D pixel array.
///
/// Immutable once a resource has been created from it. The descriptor
/// covers the *host* layout; the device side always stores rows tightly
/// packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Element type of each channel.
    pub pixel: PixelType,
    /// Channel count, 1 or 4.
    pub channels: u32,
    /// Host row stride in bytes. Always `>= width * element size * channels`.
    pub row_stride: usize,
}

impl ImageDesc {
    /// Create a descriptor with a tight row stride.
    pub fn new(width: u32, height: u32, pixel: PixelType, channels: u32) -> Result<Self> {
        let tight = width as usize * pixel.size_bytes() * channels as usize;
        Self::with_stride(width, height, pixel, channels, tight)
    }

    /// Create a descriptor with an explicit host row stride.
    pub fn with_stride(
        width: u32,
        height: u32,
        pixel: PixelType,
        channels: u32,
        row_stride: usize,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::invalid_desc(width, height, "zero dimension"));
        }
        if channels != 1 && channels != 4 {
            return Err(Error::invalid_desc(width, height, "channels must be 1 or 4"));
        }
        let tight = width as usize * pixel.size_bytes() * channels as usize;
        if row_stride < tight {
            return Err(Error::invalid_desc(
                width,
                height,
                format!("row stride {row_stride} below minimum {tight}"),
            ));
        }
        Ok(Self { width, height, pixel, channels, row_stride })
    }

    /// Total number of elements (pixels x channels).
    pub fn elem_count(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    /// Bytes of one tightly packed row.
    pub fn tight_row_bytes(&self) -> usize {
        self.width as usize * self.pixel.size_bytes() * self.channels as usize
    }

    /// Bytes of the whole image, tightly packed.
    pub fn tight_size_bytes(&self) -> usize {
        self.tight_row_bytes() * self.height as usize
    }

    /// Bytes a host buffer for this descriptor must hold
    /// (`row_stride * height`; the last row carries its padding too).
    pub fn host_size_bytes(&self) -> usize {
        self.row_stride * self.height as usize
    }

    /// True when host rows have no padding.
    pub fn is_tight(&self) -> bool {
        self.row_stride == self.tight_row_bytes()
    }

    /// Two descriptors describe the same pixel grid.
    pub fn same_shape(&self, other: &ImageDesc) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.channels == other.channels
    }

    /// Same grid and same element type.
    pub fn same_shape_and_type(&self, other: &ImageDesc) -> bool {
        self.same_shape(other) && self.pixel == other.pixel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tight_desc() {
        let d = ImageDesc::new(64, 32, PixelType::U16, 1).unwrap();
        assert_eq!(d.row_stride, 128);
        assert!(d.is_tight());
        assert_eq!(d.elem_count(), 64 * 32);
        assert_eq!(d.tight_size_bytes(), 128 * 32);
    }

    #[test]
    fn test_padded_stride() {
        let d = ImageDesc::with_stride(10, 4, PixelType::U8, 1, 16).unwrap();
        assert!(!d.is_tight());
        assert_eq!(d.host_size_bytes(), 64);
        assert_eq!(d.tight_size_bytes(), 40);
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(ImageDesc::new(0, 4, PixelType::U8, 1).is_err());
        assert!(ImageDesc::new(4, 4, PixelType::U8, 3).is_err());
        assert!(ImageDesc::with_stride(10, 4, PixelType::U8, 1, 9).is_err());
    }

    #[test]
    fn test_shape_comparisons() {
        let a = ImageDesc::new(8, 8, PixelType::U8, 1).unwrap();
        let b = ImageDesc::new(8, 8, PixelType::I16, 1).unwrap();
        let c = ImageDesc::new(8, 9, PixelType::U8, 1).unwrap();
        assert!(a.same_shape(&b));
        assert!(!a.same_shape_and_type(&b));
        assert!(!a.same_shape(&c));
    }
}
