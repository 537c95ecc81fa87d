//! GPU runtime for image-processing primitives.
//!
//! Compiles, caches and dispatches WGSL compute kernels over 2-D pixel
//! arrays of varying element types, with statistics reduction and blob
//! labeling built on the same dispatch core.
//!
//! # Architecture
//!
//! ```text
//! Context (device + single FIFO queue)
//!     ├── KernelFamily (program variant cache, one build per type)
//!     ├── ImageResource / BufferResource (transfer state machine)
//!     ├── Arithmetic / Logic / Threshold / Convert (elementwise ops)
//!     ├── Statistics (two-phase parallel reduction)
//!     └── BlobLabeler (connected-component labeling)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use pix_core::{ImageDesc, PixelType};
//! use pix_gpu::{Arithmetic, Context, ContextOptions};
//!
//! let ctx = Context::new(ContextOptions::default())?;
//! let desc = ImageDesc::new(640, 480, PixelType::U8, 1)?;
//! let a = ctx.image_from_host(desc, data_a)?;
//! let b = ctx.image_from_host(desc, data_b)?;
//! let mut out = ctx.image_from_host(desc, vec![0; desc.host_size_bytes()])?;
//!
//! let arith = Arithmetic::new(&ctx);
//! arith.add(&a, &b, &out)?;      // non-blocking; sources auto-sent
//! let result = out.read()?;      // blocks until the add completed
//! ```

pub mod blob;
pub mod context;
mod dispatch;
pub mod ops;
pub mod program;
pub mod resource;
mod shaders;
pub mod statistics;

pub use blob::{BlobLabeler, Connectivity, LabelMap, SENTINEL};
pub use context::{Context, ContextOptions, DeviceKind};
pub use ops::{Arithmetic, Convert, Logic, Threshold};
pub use program::{KernelFamily, ProgramHandle, VariantAxis};
pub use resource::{BufferResource, ImageResource, TransferState};
pub use statistics::Statistics;

pub use pix_core::{Error, ImageDesc, PixelType, Result, ScalarKind};
