//! Runtime pixel-type enumeration.
//!
//! Kernel dispatch is driven by an explicit runtime enum rather than
//! compile-time specialization: every image carries a [`PixelType`], and
//! the program cache keys its variants on either the full type or its
//! [`ScalarKind`].

use std::fmt;

/// Element representation of an image channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 16-bit integer.
    I16,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 32-bit integer.
    I32,
    /// Unsigned 32-bit integer.
    U32,
    /// 32-bit float.
    F32,
}

/// Coarse numeric family of a [`PixelType`].
///
/// Kernel families whose body is type-generic via reinterpretation key
/// their program variants on this instead of the full element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// Signed integer of any width.
    Signed,
    /// Unsigned integer of any width.
    Unsigned,
    /// 32-bit float.
    Float,
}

impl PixelType {
    /// All supported pixel types, in declaration order.
    pub const ALL: [PixelType; 7] = [
        PixelType::I8,
        PixelType::U8,
        PixelType::I16,
        PixelType::U16,
        PixelType::I32,
        PixelType::U32,
        PixelType::F32,
    ];

    /// Element size in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            PixelType::I8 | PixelType::U8 => 1,
            PixelType::I16 | PixelType::U16 => 2,
            PixelType::I32 | PixelType::U32 | PixelType::F32 => 4,
        }
    }

    /// Coarse numeric family.
    pub fn scalar_kind(self) -> ScalarKind {
        match self {
            PixelType::I8 | PixelType::I16 | PixelType::I32 => ScalarKind::Signed,
            PixelType::U8 | PixelType::U16 | PixelType::U32 => ScalarKind::Unsigned,
            PixelType::F32 => ScalarKind::Float,
        }
    }

    /// True for the float type.
    pub fn is_float(self) -> bool {
        matches!(self, PixelType::F32)
    }

    /// Stable lowercase token, used in program-cache keys and generated
    /// shader preambles.
    pub fn wgsl_suffix(self) -> &'static str {
        match self {
            PixelType::I8 => "i8",
            PixelType::U8 => "u8",
            PixelType::I16 => "i16",
            PixelType::U16 => "u16",
            PixelType::I32 => "i32",
            PixelType::U32 => "u32",
            PixelType::F32 => "f32",
        }
    }

    /// Smallest representable value, as f64.
    pub fn min_value(self) -> f64 {
        match self {
            PixelType::I8 => i8::MIN as f64,
            PixelType::U8 | PixelType::U16 | PixelType::U32 => 0.0,
            PixelType::I16 => i16::MIN as f64,
            PixelType::I32 => i32::MIN as f64,
            PixelType::F32 => f32::MIN as f64,
        }
    }

    /// Largest representable value, as f64.
    pub fn max_value(self) -> f64 {
        match self {
            PixelType::I8 => i8::MAX as f64,
            PixelType::U8 => u8::MAX as f64,
            PixelType::I16 => i16::MAX as f64,
            PixelType::U16 => u16::MAX as f64,
            PixelType::I32 => i32::MAX as f64,
            PixelType::U32 => u32::MAX as f64,
            PixelType::F32 => f32::MAX as f64,
        }
    }
}

impl ScalarKind {
    /// Stable lowercase token for cache keys and diagnostics.
    pub fn token(self) -> &'static str {
        match self {
            ScalarKind::Signed => "signed",
            ScalarKind::Unsigned => "unsigned",
            ScalarKind::Float => "float",
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wgsl_suffix())
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}
