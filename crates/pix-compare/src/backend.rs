//! Reference-backend capability table.
//!
//! Each reference implementation is a small capability entry — name,
//! availability probe, run function — composed in a table resolved at
//! startup. The comparator harness iterates only the entries that
//! report themselves available; absent backends are simply not listed.

use pix_core::{HostBuffer, HostImage};
use rayon::prelude::*;

/// Runs one named operation over host images, producing a host result.
/// `None` when the backend does not implement the operation.
pub type RunFn = fn(op: &str, inputs: &[HostImage<'_>]) -> Option<HostBuffer>;

/// One reference implementation the comparator can judge against.
#[derive(Clone, Copy)]
pub struct ReferenceBackend {
    /// Stable backend name for reports.
    pub name: &'static str,
    /// Probe: is this backend usable in the current process?
    pub available: fn() -> bool,
    /// Operation entry point.
    pub run: RunFn,
}

impl std::fmt::Debug for ReferenceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceBackend")
            .field("name", &self.name)
            .field("available", &(self.available)())
            .finish()
    }
}

/// The set of reference backends resolved at startup.
#[derive(Debug, Default)]
pub struct BackendTable {
    backends: Vec<ReferenceBackend>,
}

impl BackendTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding the built-in backends.
    pub fn with_builtin() -> Self {
        let mut table = Self::new();
        table.register(cpu_rayon_backend());
        table
    }

    /// Add a backend to the table.
    pub fn register(&mut self, backend: ReferenceBackend) {
        self.backends.push(backend);
    }

    /// Backends that report themselves available.
    pub fn available(&self) -> impl Iterator<Item = &ReferenceBackend> {
        self.backends.iter().filter(|b| (b.available)())
    }

    /// All registered backends.
    pub fn all(&self) -> &[ReferenceBackend] {
        &self.backends
    }
}

/// The built-in CPU reference backend.
///
/// Implements the elementwise subset on the host with the same wrap
/// semantics as the device kernels, so the two paths are comparable at
/// tight tolerances.
pub fn cpu_rayon_backend() -> ReferenceBackend {
    ReferenceBackend { name: "cpu-rayon", available: || true, run: cpu_run }
}

fn cpu_run(op: &str, inputs: &[HostImage<'_>]) -> Option<HostBuffer> {
    match op {
        "add" => binary(inputs, |a, b| a + b),
        "sub" => binary(inputs, |a, b| a - b),
        "mul" => binary(inputs, |a, b| a * b),
        "div" => binary(inputs, |a, b| if b == 0.0 { 0.0 } else { a / b }),
        "abs_diff" => binary(inputs, |a, b| (a - b).abs()),
        "min" => binary(inputs, f64::min),
        "max" => binary(inputs, f64::max),
        _ => None,
    }
}

fn binary(inputs: &[HostImage<'_>], f: fn(f64, f64) -> f64) -> Option<HostBuffer> {
    let [a, b] = inputs else { return None };
    if !a.desc().same_shape_and_type(b.desc()) {
        return None;
    }
    let desc = *a.desc();
    let mut out = HostBuffer::zeroed(desc);

    // Row-parallel: each worker encodes into its own stripe.
    let stride = desc.row_stride;
    out.data.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        let y = y as u32;
        let mut scratch = HostBuffer::zeroed(
            pix_core::ImageDesc::with_stride(desc.width, 1, desc.pixel, desc.channels, stride)
                .expect("row descriptor follows image descriptor"),
        );
        for x in 0..desc.width {
            for ch in 0..desc.channels {
                let v = f(a.value_at(x, y, ch), b.value_at(x, y, ch));
                scratch.set_value(x, 0, ch, v);
            }
        }
        row.copy_from_slice(&scratch.data);
    });
    Some(out)
}
