//! Error taxonomy for the pix-rs workspace.
//!
//! Every error kind is reported synchronously at the call that detects
//! it, except device-side execution failures which only become visible
//! at the next synchronization point (`read`/`finish`) and surface as
//! [`Error::Transfer`]. Nothing in the library retries.

use thiserror::Error;

use crate::pixel::PixelType;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// No compute device matched the requested kind/hint at context
    /// creation. Fatal; there is no fallback.
    #[error("no compute device available ({wanted})")]
    DeviceUnavailable {
        /// Description of what was requested.
        wanted: String,
    },

    /// Kernel compilation failed for one program variant.
    ///
    /// Carries the full compiler diagnostic text. Other variants of the
    /// same family are unaffected, and a retry for this key behaves like
    /// a first attempt.
    #[error("failed to build kernel family '{family}' for {pixel}: {diagnostics}")]
    Build {
        /// Kernel family name.
        family: String,
        /// Pixel type the variant was requested for.
        pixel: PixelType,
        /// Compiler diagnostics, or the source-load failure that
        /// prevented the build.
        diagnostics: String,
    },

    /// Send or read on a resource that has no host mirror.
    #[error("resource has no host binding")]
    NoHostBinding,

    /// Read on a resource whose device allocation was never written
    /// (neither sent nor used as a kernel destination).
    #[error("resource was never sent to the device nor written by a kernel")]
    NotOnDevice,

    /// A statistics or blob operation was invoked before its program
    /// variant was prepared. The build cost is made explicit to the
    /// caller rather than silently absorbed.
    #[error("kernel family '{family}' not prepared for {pixel}")]
    NotPrepared {
        /// Kernel family name.
        family: String,
        /// Pixel type of the offending operand.
        pixel: PixelType,
    },

    /// Operand element types are incompatible for the operation.
    #[error("pixel type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Type required by the operation.
        expected: String,
        /// Type actually supplied.
        got: String,
    },

    /// Operand shapes are incompatible for the operation.
    #[error("size mismatch: {a_width}x{a_height}x{a_channels} vs {b_width}x{b_height}x{b_channels}")]
    SizeMismatch {
        /// First operand width.
        a_width: u32,
        /// First operand height.
        a_height: u32,
        /// First operand channel count.
        a_channels: u32,
        /// Second operand width.
        b_width: u32,
        /// Second operand height.
        b_height: u32,
        /// Second operand channel count.
        b_channels: u32,
    },

    /// Invalid image descriptor.
    #[error("invalid image descriptor {width}x{height}: {reason}")]
    InvalidDesc {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
        /// Why the descriptor is invalid.
        reason: String,
    },

    /// Device transfer or map failure observed at a synchronization
    /// point.
    #[error("device transfer failed: {0}")]
    Transfer(String),
}

impl Error {
    /// Creates an [`Error::InvalidDesc`].
    pub fn invalid_desc(width: u32, height: u32, reason: impl Into<String>) -> Self {
        Self::InvalidDesc { width, height, reason: reason.into() }
    }

    /// Creates an [`Error::TypeMismatch`].
    pub fn type_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Self::TypeMismatch { expected: expected.into(), got: got.into() }
    }

    /// Creates an [`Error::SizeMismatch`] from two `(w, h, channels)`
    /// triples.
    pub fn size_mismatch(a: (u32, u32, u32), b: (u32, u32, u32)) -> Self {
        Self::SizeMismatch {
            a_width: a.0,
            a_height: a.1,
            a_channels: a.2,
            b_width: b.0,
            b_height: b.1,
            b_channels: b.2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_carries_diagnostics() {
        let err = Error::Build {
            family: "arith".into(),
            pixel: PixelType::U8,
            diagnostics: "unknown identifier 'frobnicate'".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("arith"));
        assert!(msg.contains("u8"));
        assert!(msg.contains("frobnicate"));
    }

    #[test]
    fn test_size_mismatch_display() {
        let err = Error::size_mismatch((64, 64, 1), (32, 64, 1));
        assert!(err.to_string().contains("64x64x1"));
        assert!(err.to_string().contains("32x64x1"));
    }

    #[test]
    fn test_not_prepared_display() {
        let err = Error::NotPrepared { family: "reduce".into(), pixel: PixelType::F32 };
        assert!(err.to_string().contains("reduce"));
        assert!(err.to_string().contains("f32"));
    }
}
