//! Elementwise kernel families: uniform call-throughs to the dispatch
//! protocol.
//!
//! Integer kernels wrap on overflow; clamping happens only in the
//! conversion family's `scale`. All calls here are asynchronous: they
//! return once the pass is submitted.

use std::sync::Arc;

use pix_core::{PixelType, Result};
use wgpu::{Device, Queue};

use crate::context::Context;
use crate::dispatch::{
    check_integer, check_similar, linear_groups, submit_compute, uniform_f32x4, uniform_u32x4,
    BufBinding,
};
use crate::program::{KernelFamily, VariantAxis};
use crate::resource::ImageResource;
use crate::shaders;

struct OpCore {
    family: KernelFamily,
    device: Arc<Device>,
    queue: Arc<Queue>,
}

impl OpCore {
    fn new(ctx: &Context, name: &str, axis: VariantAxis, source: fn(PixelType) -> String) -> Self {
        Self {
            family: KernelFamily::generated(ctx, name, axis, source),
            device: ctx.device_arc(),
            queue: ctx.queue_arc(),
        }
    }

    /// dst = entry(src1, src2), elementwise.
    fn binary(&self, entry: &str, a: &ImageResource, b: &ImageResource, dst: &ImageResource) -> Result<()> {
        check_similar(a.desc(), b.desc())?;
        check_similar(a.desc(), dst.desc())?;
        let pipeline = self.family.pipeline(a.desc().pixel, entry)?;
        a.auto_send()?;
        b.auto_send()?;
        let dims = uniform_u32x4(&self.device, [a.desc().elem_count() as u32, a.words(), 0, 0]);
        submit_compute(
            &self.device,
            &self.queue,
            &pipeline,
            &[
                BufBinding { binding: 0, buffer: a.raw_buffer() },
                BufBinding { binding: 1, buffer: b.raw_buffer() },
                BufBinding { binding: 2, buffer: dst.raw_buffer() },
                BufBinding { binding: 3, buffer: &dims },
            ],
            (linear_groups(a.words()), 1, 1),
            entry,
        );
        dst.mark_device_written();
        Ok(())
    }

    /// dst = entry(src), with optional f32 parameters.
    fn unary(
        &self,
        entry: &str,
        a: &ImageResource,
        dst: &ImageResource,
        params: Option<[f32; 4]>,
    ) -> Result<()> {
        check_similar(a.desc(), dst.desc())?;
        let pipeline = self.family.pipeline(a.desc().pixel, entry)?;
        a.auto_send()?;
        let dims = uniform_u32x4(&self.device, [a.desc().elem_count() as u32, a.words(), 0, 0]);
        let mut bindings = vec![
            BufBinding { binding: 0, buffer: a.raw_buffer() },
            BufBinding { binding: 2, buffer: dst.raw_buffer() },
            BufBinding { binding: 3, buffer: &dims },
        ];
        let params_buf = params.map(|p| uniform_f32x4(&self.device, p));
        if let Some(buf) = &params_buf {
            bindings.push(BufBinding { binding: 4, buffer: buf });
        }
        submit_compute(
            &self.device,
            &self.queue,
            &pipeline,
            &bindings,
            (linear_groups(a.words()), 1, 1),
            entry,
        );
        dst.mark_device_written();
        Ok(())
    }
}

/// Arithmetic between images and against constants.
pub struct Arithmetic {
    core: OpCore,
}

impl Arithmetic {
    /// Create the family against a context. Nothing is compiled yet.
    pub fn new(ctx: &Context) -> Self {
        Self { core: OpCore::new(ctx, "arith", VariantAxis::Fine, shaders::arith_source) }
    }

    /// Compilation attempts performed by this family so far.
    pub fn builds(&self) -> usize {
        self.core.family.builds()
    }

    /// Build the variant for `source`'s pixel type ahead of first use.
    pub fn prepare_for(&self, source: &ImageResource) -> Result<()> {
        self.core.family.select_for(source).map(|_| ())
    }

    /// D = S1 + S2
    pub fn add(&self, a: &ImageResource, b: &ImageResource, dst: &ImageResource) -> Result<()> {
        self.core.binary("add", a, b, dst)
    }

    /// D = S1 - S2
    pub fn sub(&self, a: &ImageResource, b: &ImageResource, dst: &ImageResource) -> Result<()> {
        self.core.binary("sub", a, b, dst)
    }

    /// D = S1 * S2
    pub fn mul(&self, a: &ImageResource, b: &ImageResource, dst: &ImageResource) -> Result<()> {
        self.core.binary("mul", a, b, dst)
    }

    /// D = S1 / S2 (integer division by zero yields zero)
    pub fn div(&self, a: &ImageResource, b: &ImageResource, dst: &ImageResource) -> Result<()> {
        self.core.binary("div", a, b, dst)
    }

    /// D = |S1 - S2|
    pub fn abs_diff(&self, a: &ImageResource, b: &ImageResource, dst: &ImageResource) -> Result<()> {
        self.core.binary("abs_diff", a, b, dst)
    }

    /// D = min(S1, S2)
    pub fn min_img(&self, a: &ImageResource, b: &ImageResource, dst: &ImageResource) -> Result<()> {
        self.core.binary("min_img", a, b, dst)
    }

    /// D = max(S1, S2)
    pub fn max_img(&self, a: &ImageResource, b: &ImageResource, dst: &ImageResource) -> Result<()> {
        self.core.binary("max_img", a, b, dst)
    }

    /// D = S + v
    pub fn add_scalar(&self, a: &ImageResource, dst: &ImageResource, v: f32) -> Result<()> {
        self.core.unary("add_scalar", a, dst, Some([v, 0.0, 0.0, 0.0]))
    }

    /// D = S * v
    pub fn mul_scalar(&self, a: &ImageResource, dst: &ImageResource, v: f32) -> Result<()> {
        self.core.unary("mul_scalar", a, dst, Some([v, 0.0, 0.0, 0.0]))
    }
}

/// Bitwise operations. Integer images only; the kernels operate on
/// packed storage words, so one coarse variant serves every width.
pub struct Logic {
    core: OpCore,
}

impl Logic {
    /// Create the family against a context.
    pub fn new(ctx: &Context) -> Self {
        Self { core: OpCore::new(ctx, "logic", VariantAxis::Coarse, shaders::logic_source) }
    }

    /// Compilation attempts performed by this family so far.
    pub fn builds(&self) -> usize {
        self.core.family.builds()
    }

    /// D = S1 & S2
    pub fn and(&self, a: &ImageResource, b: &ImageResource, dst: &ImageResource) -> Result<()> {
        check_integer(a.desc())?;
        self.core.binary("and_img", a, b, dst)
    }

    /// D = S1 | S2
    pub fn or(&self, a: &ImageResource, b: &ImageResource, dst: &ImageResource) -> Result<()> {
        check_integer(a.desc())?;
        self.core.binary("or_img", a, b, dst)
    }

    /// D = S1 ^ S2
    pub fn xor(&self, a: &ImageResource, b: &ImageResource, dst: &ImageResource) -> Result<()> {
        check_integer(a.desc())?;
        self.core.binary("xor_img", a, b, dst)
    }

    /// D = ~S
    pub fn not(&self, a: &ImageResource, dst: &ImageResource) -> Result<()> {
        check_integer(a.desc())?;
        self.core.unary("not_img", a, dst, None)
    }

    /// D = S & v
    pub fn and_scalar(&self, a: &ImageResource, dst: &ImageResource, v: u32) -> Result<()> {
        self.scalar("and_scalar", a, dst, v)
    }

    /// D = S | v
    pub fn or_scalar(&self, a: &ImageResource, dst: &ImageResource, v: u32) -> Result<()> {
        self.scalar("or_scalar", a, dst, v)
    }

    /// D = S ^ v
    pub fn xor_scalar(&self, a: &ImageResource, dst: &ImageResource, v: u32) -> Result<()> {
        self.scalar("xor_scalar", a, dst, v)
    }

    fn scalar(&self, entry: &str, a: &ImageResource, dst: &ImageResource, v: u32) -> Result<()> {
        check_integer(a.desc())?;
        check_similar(a.desc(), dst.desc())?;
        let pipeline = self.core.family.pipeline(a.desc().pixel, entry)?;
        a.auto_send()?;
        let dims = uniform_u32x4(
            &self.core.device,
            [a.desc().elem_count() as u32, a.words(), 0, 0],
        );
        let mask = broadcast_mask(a.desc().pixel, v);
        let params = uniform_u32x4(&self.core.device, [mask, 0, 0, 0]);
        submit_compute(
            &self.core.device,
            &self.core.queue,
            &pipeline,
            &[
                BufBinding { binding: 0, buffer: a.raw_buffer() },
                BufBinding { binding: 2, buffer: dst.raw_buffer() },
                BufBinding { binding: 3, buffer: &dims },
                BufBinding { binding: 4, buffer: &params },
            ],
            (linear_groups(a.words()), 1, 1),
            entry,
        );
        dst.mark_device_written();
        Ok(())
    }
}

/// Replicate a scalar mask across every element lane of a storage word.
fn broadcast_mask(pixel: PixelType, v: u32) -> u32 {
    match pixel.size_bytes() {
        1 => (v & 0xff) * 0x0101_0101,
        2 => (v & 0xffff) * 0x0001_0001,
        _ => v,
    }
}

/// Thresholding against a scalar.
pub struct Threshold {
    core: OpCore,
}

impl Threshold {
    /// Create the family against a context.
    pub fn new(ctx: &Context) -> Self {
        Self { core: OpCore::new(ctx, "threshold", VariantAxis::Fine, shaders::threshold_source) }
    }

    /// D = (S > t ? value : S)
    pub fn greater(&self, a: &ImageResource, dst: &ImageResource, t: f32, value: f32) -> Result<()> {
        self.core.unary("thresh_gt", a, dst, Some([t, value, 0.0, 0.0]))
    }

    /// D = (S < t ? value : S)
    pub fn less(&self, a: &ImageResource, dst: &ImageResource, t: f32, value: f32) -> Result<()> {
        self.core.unary("thresh_lt", a, dst, Some([t, value, 0.0, 0.0]))
    }

    /// D = (S > t ? 1 : 0)
    pub fn binarize(&self, a: &ImageResource, dst: &ImageResource, t: f32) -> Result<()> {
        self.core.unary("binarize", a, dst, Some([t, 0.0, 0.0, 0.0]))
    }
}

/// Same-type copy and affine rescale.
pub struct Convert {
    core: OpCore,
}

impl Convert {
    /// Create the family against a context.
    pub fn new(ctx: &Context) -> Self {
        Self { core: OpCore::new(ctx, "convert", VariantAxis::Fine, shaders::convert_source) }
    }

    /// D = S
    pub fn copy(&self, a: &ImageResource, dst: &ImageResource) -> Result<()> {
        self.core.unary("copy", a, dst, None)
    }

    /// D = clamp(S * ratio + offset) to the element range.
    pub fn scale(&self, a: &ImageResource, dst: &ImageResource, ratio: f32, offset: f32) -> Result<()> {
        self.core.unary("scale", a, dst, Some([ratio, offset, 0.0, 0.0]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_mask() {
        assert_eq!(broadcast_mask(PixelType::U8, 0xab), 0xabab_abab);
        assert_eq!(broadcast_mask(PixelType::U16, 0x1234), 0x1234_1234);
        assert_eq!(broadcast_mask(PixelType::U32, 0xdead_beef), 0xdead_beef);
    }
}
