//! Statistical reductions over a resource.
//!
//! Two-phase parallel reduction: phase 1 on the device writes one
//! partial per workgroup (grid-stride loads, shared-memory tree
//! combine, f32); phase 2 folds the few hundred partials on the host in
//! f64. Unlike ordinary dispatch these calls are synchronous by
//! contract: they block until the scalar is available.
//!
//! Accumulation happens in f32 on the device, so sum-class results on
//! large images carry a documented ~1e-3 relative tolerance for
//! cross-backend comparison; min/max match within epsilon.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use pix_core::{Error, PixelType, Result};
use wgpu::{Device, Queue};

use crate::context::Context;
use crate::dispatch::{submit_compute, uniform_u32x4, BufBinding};
use crate::program::{KernelFamily, VariantAxis};
use crate::resource::{download_bytes, ImageResource};
use crate::shaders::{self, WORKGROUP_SIZE};

/// Elements each invocation accumulates before the tree combine.
const ELEMS_PER_INVOCATION: u32 = 16;
/// Upper bound on partials; keeps the host fold trivial.
const MAX_GROUPS: u32 = 1024;

/// The reduction engine. Owns its program variants and the lazily
/// sized partial-result buffers (one per workgroup count, reused).
pub struct Statistics {
    family: KernelFamily,
    device: Arc<Device>,
    queue: Arc<Queue>,
    prepared: RefCell<HashSet<PixelType>>,
    partials: RefCell<HashMap<u32, Arc<wgpu::Buffer>>>,
}

impl Statistics {
    /// Create the engine against a context. Nothing is compiled yet;
    /// call [`prepare_for`](Statistics::prepare_for) before reducing.
    pub fn new(ctx: &Context) -> Self {
        Self {
            family: KernelFamily::generated(ctx, "reduce", VariantAxis::Fine, shaders::reduce_source),
            device: ctx.device_arc(),
            queue: ctx.queue_arc(),
            prepared: RefCell::new(HashSet::new()),
            partials: RefCell::new(HashMap::new()),
        }
    }

    /// Build the program variant for `source`'s pixel type. Reductions
    /// on unprepared types fail with `NotPrepared`: the 100+ms build
    /// cost stays explicit.
    pub fn prepare_for(&self, source: &ImageResource) -> Result<()> {
        self.family.select_for(source)?;
        self.prepared.borrow_mut().insert(source.desc().pixel);
        Ok(())
    }

    /// Compilation attempts performed by this engine so far.
    pub fn builds(&self) -> usize {
        self.family.builds()
    }

    /// Minimum element value.
    pub fn min(&self, source: &ImageResource) -> Result<f64> {
        Ok(self.partials_for("reduce_min", source)?.iter().fold(f64::INFINITY, |m, &v| m.min(v as f64)))
    }

    /// Maximum element value.
    pub fn max(&self, source: &ImageResource) -> Result<f64> {
        Ok(self
            .partials_for("reduce_max", source)?
            .iter()
            .fold(f64::NEG_INFINITY, |m, &v| m.max(v as f64)))
    }

    /// Minimum of absolute element values.
    pub fn min_abs(&self, source: &ImageResource) -> Result<f64> {
        Ok(self
            .partials_for("reduce_min_abs", source)?
            .iter()
            .fold(f64::INFINITY, |m, &v| m.min(v as f64)))
    }

    /// Maximum of absolute element values.
    pub fn max_abs(&self, source: &ImageResource) -> Result<f64> {
        Ok(self.partials_for("reduce_max_abs", source)?.iter().fold(0.0f64, |m, &v| m.max(v as f64)))
    }

    /// Sum of all element values.
    pub fn sum(&self, source: &ImageResource) -> Result<f64> {
        Ok(self.partials_for("reduce_sum", source)?.iter().map(|&v| v as f64).sum())
    }

    /// Mean element value.
    pub fn mean(&self, source: &ImageResource) -> Result<f64> {
        let n = source.desc().elem_count() as f64;
        Ok(self.sum(source)? / n)
    }

    /// Mean of squared element values.
    pub fn mean_sqr(&self, source: &ImageResource) -> Result<f64> {
        let n = source.desc().elem_count() as f64;
        let sum_sqr: f64 =
            self.partials_for("reduce_sum_sqr", source)?.iter().map(|&v| v as f64).sum();
        Ok(sum_sqr / n)
    }

    /// Number of non-zero elements.
    pub fn count_non_zero(&self, source: &ImageResource) -> Result<u64> {
        let count: f64 =
            self.partials_for("reduce_count_nz", source)?.iter().map(|&v| v as f64).sum();
        Ok(count.round() as u64)
    }

    /// Run phase 1 for `entry` and read the per-group partials back.
    fn partials_for(&self, entry: &str, source: &ImageResource) -> Result<Vec<f32>> {
        let pixel = source.desc().pixel;
        if !self.prepared.borrow().contains(&pixel) {
            return Err(Error::NotPrepared { family: self.family.name().to_string(), pixel });
        }
        let pipeline = self.family.pipeline(pixel, entry)?;
        source.auto_send()?;

        let total = source.desc().elem_count() as u32;
        let groups = group_count(total);
        let partials = self.partial_buffer(groups);
        let dims = uniform_u32x4(&self.device, [total, 0, 0, 0]);

        submit_compute(
            &self.device,
            &self.queue,
            &pipeline,
            &[
                BufBinding { binding: 0, buffer: source.raw_buffer() },
                BufBinding { binding: 1, buffer: &partials },
                BufBinding { binding: 2, buffer: &dims },
            ],
            (groups, 1, 1),
            entry,
        );

        let bytes = download_bytes(&self.device, &self.queue, &partials, groups as u64 * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Partial-result buffer for a workgroup count, created on first
    /// use and reused.
    fn partial_buffer(&self, groups: u32) -> Arc<wgpu::Buffer> {
        self.partials
            .borrow_mut()
            .entry(groups)
            .or_insert_with(|| {
                Arc::new(self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("reduce_partials"),
                    size: groups as u64 * 4,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                }))
            })
            .clone()
    }
}

fn group_count(total: u32) -> u32 {
    total.div_ceil(WORKGROUP_SIZE * ELEMS_PER_INVOCATION).clamp(1, MAX_GROUPS)
}
