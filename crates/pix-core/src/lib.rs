//! # pix-core
//!
//! Core types for the pix-rs GPU image-processing primitives.
//!
//! This crate provides the foundational, GPU-free types shared by the
//! runtime and the comparator:
//!
//! - [`PixelType`] / [`ScalarKind`] - runtime pixel-type enumeration
//! - [`ImageDesc`] - image geometry and layout descriptor
//! - [`HostImage`] / [`HostBuffer`] - host-memory image views
//! - [`Error`] / [`Result`] - the error taxonomy for the whole workspace
//!
//! ## Crate Structure
//!
//! ```text
//! pix-core (this crate)
//!    ^
//!    |
//!    +-- pix-gpu (device context, programs, resources, kernels)
//!    +-- pix-compare (differential comparator, reference backends)
//! ```

#![warn(missing_docs)]

pub mod desc;
pub mod error;
pub mod host;
pub mod pixel;

pub use desc::ImageDesc;
pub use error::{Error, Result};
pub use host::{HostBuffer, HostImage};
pub use pixel::{PixelType, ScalarKind};
