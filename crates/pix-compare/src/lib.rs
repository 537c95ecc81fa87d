//! Differential comparator: tolerance-bounded equivalence judgment
//! between a computed image and a reference image.
//!
//! The comparator is a judge, not an oracle: it never mutates its
//! inputs, and incompatible inputs produce a negative verdict rather
//! than an error. Equivalence is decided from the absolute-difference
//! image's maximum: within an absolute tolerance, or — in relative
//! mode — the maximum divided by the reference value at its position.

#![warn(missing_docs)]

pub mod backend;

pub use backend::{cpu_rayon_backend, BackendTable, ReferenceBackend};

use pix_core::HostImage;
use rayon::prelude::*;

/// How deviations below the floor are judged in relative mode: a
/// reference magnitude smaller than this is compared absolutely
/// instead of dividing by it.
pub const REF_FLOOR: f64 = 1e-6;

/// Tolerance mode for the equivalence judgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToleranceMode {
    /// Max difference must be `<=` the tolerance.
    Absolute,
    /// Max difference divided by the reference value at its position
    /// must be `<` the tolerance.
    Relative,
}

/// Tolerance policy.
#[derive(Debug, Clone, Copy)]
pub struct Tolerance {
    /// Threshold value.
    pub value: f64,
    /// Absolute or relative judgment.
    pub mode: ToleranceMode,
}

impl Tolerance {
    /// Absolute tolerance.
    pub fn absolute(value: f64) -> Self {
        Self { value, mode: ToleranceMode::Absolute }
    }

    /// Relative tolerance.
    pub fn relative(value: f64) -> Self {
        Self { value, mode: ToleranceMode::Relative }
    }
}

/// Comparison window, used to exclude the borders a windowed filter
/// leaves undefined.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Window width.
    pub width: u32,
    /// Window height.
    pub height: u32,
}

impl Region {
    /// Full-frame region for an image of the given size.
    pub fn full(width: u32, height: u32) -> Self {
        Self { x: 0, y: 0, width, height }
    }

    /// Interior region for a centered `mask_w` x `mask_h` filter
    /// window: offset by the anchor, shrunk by the mask size.
    pub fn interior(width: u32, height: u32, mask_w: u32, mask_h: u32) -> Self {
        Self {
            x: mask_w / 2,
            y: mask_h / 2,
            width: width.saturating_sub(mask_w.saturating_sub(1)),
            height: height.saturating_sub(mask_h.saturating_sub(1)),
        }
    }

    fn clamp_to(&self, width: u32, height: u32) -> Region {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Region { x, y, width: self.width.min(width - x), height: self.height.min(height - y) }
    }
}

/// Outcome of one comparison.
#[derive(Debug, Clone, Copy)]
pub struct Verdict {
    /// True when the images agree within the tolerance.
    pub equivalent: bool,
    /// Largest absolute difference found in the region.
    pub max_diff: f64,
    /// Pixel position of the largest difference.
    pub at: (u32, u32),
    /// Reference value at that position (channel of the max).
    pub reference_value: f64,
}

impl Verdict {
    fn incompatible() -> Self {
        Self { equivalent: false, max_diff: f64::INFINITY, at: (0, 0), reference_value: 0.0 }
    }
}

/// Largest absolute difference between two same-shape images inside
/// `region`, with its position and the reference value there.
///
/// Returns `(max_diff, x, y, reference_value)`.
pub fn find_max_diff(
    reference: &HostImage<'_>,
    candidate: &HostImage<'_>,
    region: Region,
) -> (f64, u32, u32, f64) {
    let channels = reference.desc().channels;
    let region = region.clamp_to(reference.desc().width, reference.desc().height);

    let best = (region.y..region.y + region.height)
        .into_par_iter()
        .map(|y| {
            let mut row_best = (0.0f64, region.x, y, 0.0f64);
            for x in region.x..region.x + region.width {
                for ch in 0..channels {
                    let r = reference.value_at(x, y, ch);
                    let c = candidate.value_at(x, y, ch);
                    let d = (r - c).abs();
                    if d > row_best.0 {
                        row_best = (d, x, y, r);
                    }
                }
            }
            row_best
        })
        .reduce(|| (0.0f64, region.x, region.y, 0.0f64), |a, b| if b.0 > a.0 { b } else { a });

    best
}

/// Absolute-difference image of two same-shape inputs, in f64, row
/// major, region-sized (one value per pixel-channel).
pub fn abs_diff_image(
    reference: &HostImage<'_>,
    candidate: &HostImage<'_>,
    region: Region,
) -> Vec<f64> {
    let channels = reference.desc().channels;
    let region = region.clamp_to(reference.desc().width, reference.desc().height);
    let row_len = region.width as usize * channels as usize;

    let mut out = vec![0.0f64; row_len * region.height as usize];
    out.par_chunks_mut(row_len).enumerate().for_each(|(dy, row)| {
        let y = region.y + dy as u32;
        for dx in 0..region.width {
            let x = region.x + dx;
            for ch in 0..channels {
                let r = reference.value_at(x, y, ch);
                let c = candidate.value_at(x, y, ch);
                row[dx as usize * channels as usize + ch as usize] = (r - c).abs();
            }
        }
    });
    out
}

/// Judge equivalence of `candidate` against `reference`.
///
/// A type or shape mismatch yields a non-equivalent verdict (not an
/// error). `region` defaults to the full frame when `None`.
pub fn compare(
    reference: &HostImage<'_>,
    candidate: &HostImage<'_>,
    tolerance: Tolerance,
    region: Option<Region>,
) -> Verdict {
    if !reference.desc().same_shape_and_type(candidate.desc()) {
        return Verdict::incompatible();
    }
    let region =
        region.unwrap_or_else(|| Region::full(reference.desc().width, reference.desc().height));

    let (max_diff, x, y, reference_value) = find_max_diff(reference, candidate, region);

    let equivalent = match tolerance.mode {
        ToleranceMode::Absolute => max_diff <= tolerance.value,
        ToleranceMode::Relative => {
            if reference_value.abs() < REF_FLOOR {
                max_diff <= tolerance.value
            } else {
                max_diff / reference_value.abs() < tolerance.value
            }
        }
    };

    Verdict { equivalent, max_diff, at: (x, y), reference_value }
}
