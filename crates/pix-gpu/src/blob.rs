//! Connected-component (blob) labeling.
//!
//! Two synchronous steps: `compute_labels` assigns every foreground
//! pixel a provisional label by iterative min-propagation to a fixed
//! point, and `rename_labels` remaps the surviving labels onto a
//! contiguous `0..N` range in place. Background pixels carry the
//! all-bits-set sentinel.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use pix_core::{Error, PixelType, Result};
use wgpu::{Device, Queue};

use crate::context::Context;
use crate::dispatch::{linear_groups, submit_compute, uniform_u32x4, BufBinding};
use crate::program::{KernelFamily, VariantAxis};
use crate::resource::{download_bytes, BufferResource, ImageResource};
use crate::shaders;

/// Label value of background (zero) pixels.
pub const SENTINEL: u32 = u32::MAX;

/// Pixel neighborhood used when joining foreground pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Edge-adjacent neighbors.
    Four,
    /// Edge- and corner-adjacent neighbors.
    Eight,
}

impl Connectivity {
    fn as_u32(self) -> u32 {
        match self {
            Connectivity::Four => 4,
            Connectivity::Eight => 8,
        }
    }
}

/// 32-bit label image produced by [`BlobLabeler::compute_labels`].
pub struct LabelMap {
    width: u32,
    height: u32,
    buffer: BufferResource,
}

impl LabelMap {
    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The underlying device buffer.
    pub fn buffer(&self) -> &BufferResource {
        &self.buffer
    }

    /// Read the labels back to the host. Blocks.
    pub fn to_host(&mut self) -> Result<Vec<u32>> {
        let bytes = self.buffer.read()?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

/// The labeling engine. Owns its program variants and the iteration
/// scratch.
pub struct BlobLabeler {
    family: KernelFamily,
    device: Arc<Device>,
    queue: Arc<Queue>,
    prepared: RefCell<HashSet<PixelType>>,
    changed: wgpu::Buffer,
}

impl BlobLabeler {
    /// Create the engine against a context. Nothing is compiled yet;
    /// call [`prepare_for`](BlobLabeler::prepare_for) first.
    pub fn new(ctx: &Context) -> Self {
        let device = ctx.device_arc();
        let changed = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("blob_changed_flag"),
            size: 4,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            family: KernelFamily::generated(ctx, "blob", VariantAxis::Fine, shaders::blob_source),
            device,
            queue: ctx.queue_arc(),
            prepared: RefCell::new(HashSet::new()),
            changed,
        }
    }

    /// Build the program variant for `source`'s pixel type.
    /// Labeling requires 1-channel sources.
    pub fn prepare_for(&self, source: &ImageResource) -> Result<()> {
        check_one_channel(source)?;
        self.family.select_for(source)?;
        self.prepared.borrow_mut().insert(source.desc().pixel);
        Ok(())
    }

    /// Compilation attempts performed by this engine so far.
    pub fn builds(&self) -> usize {
        self.family.builds()
    }

    /// Label every non-zero pixel such that pixels connected through a
    /// chain of non-zero `connectivity`-neighbors share a label; zero
    /// pixels get [`SENTINEL`]. Synchronous: returns once the fixed
    /// point is reached. Label values are valid equivalence-class
    /// representatives but neither minimal nor contiguous; run
    /// [`rename_labels`](BlobLabeler::rename_labels) to compact them.
    pub fn compute_labels(
        &self,
        source: &ImageResource,
        connectivity: Connectivity,
    ) -> Result<LabelMap> {
        check_one_channel(source)?;
        let pixel = source.desc().pixel;
        if !self.prepared.borrow().contains(&pixel) {
            return Err(Error::NotPrepared { family: self.family.name().to_string(), pixel });
        }
        let init = self.family.pipeline(pixel, "blob_init")?;
        let propagate = self.family.pipeline(pixel, "blob_propagate")?;
        source.auto_send()?;

        let width = source.desc().width;
        let height = source.desc().height;
        let total = width * height;
        let labels = BufferResource::new(
            self.device.clone(),
            self.queue.clone(),
            PixelType::U32,
            total as usize,
            Some(vec![0u8; total as usize * 4]),
        )?;
        let dims =
            uniform_u32x4(&self.device, [width, height, total, connectivity.as_u32()]);

        submit_compute(
            &self.device,
            &self.queue,
            &init,
            &[
                BufBinding { binding: 0, buffer: source.raw_buffer() },
                BufBinding { binding: 1, buffer: labels.raw_buffer() },
                BufBinding { binding: 3, buffer: &dims },
            ],
            (linear_groups(total), 1, 1),
            "blob_init",
        );

        // Min-propagation is monotone, so re-dispatching until the
        // changed flag stays clear reaches the fixed point.
        let groups = (width.div_ceil(16), height.div_ceil(16), 1);
        loop {
            self.queue.write_buffer(&self.changed, 0, &0u32.to_le_bytes());
            submit_compute(
                &self.device,
                &self.queue,
                &propagate,
                &[
                    BufBinding { binding: 1, buffer: labels.raw_buffer() },
                    BufBinding { binding: 2, buffer: &self.changed },
                    BufBinding { binding: 3, buffer: &dims },
                ],
                groups,
                "blob_propagate",
            );
            let flag = download_bytes(&self.device, &self.queue, &self.changed, 4)?;
            if u32::from_le_bytes([flag[0], flag[1], flag[2], flag[3]]) == 0 {
                break;
            }
        }

        labels.mark_device_written();
        Ok(LabelMap { width, height, buffer: labels })
    }

    /// Remap the labels present in `map` bijectively onto `0..N`,
    /// updating the map in place. Requires a full pass to discover the
    /// present-label set first, hence a separate step. Synchronous.
    pub fn rename_labels(&self, map: &mut LabelMap) -> Result<()> {
        let total = map.width as usize * map.height as usize;
        let bytes =
            download_bytes(&self.device, &self.queue, map.buffer.raw_buffer(), total as u64 * 4)?;
        let labels: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let present: BTreeSet<u32> = labels.iter().copied().filter(|&l| l != SENTINEL).collect();
        let remap: HashMap<u32, u32> =
            present.iter().enumerate().map(|(i, &l)| (l, i as u32)).collect();

        let renamed: Vec<u32> =
            labels.iter().map(|l| remap.get(l).copied().unwrap_or(SENTINEL)).collect();
        self.queue.write_buffer(map.buffer.raw_buffer(), 0, bytemuck::cast_slice(&renamed));
        self.queue.submit(std::iter::empty());
        self.device.poll(wgpu::Maintain::Wait);
        map.buffer.mark_device_written();
        Ok(())
    }
}

fn check_one_channel(source: &ImageResource) -> Result<()> {
    if source.desc().channels != 1 {
        return Err(Error::type_mismatch(
            "1-channel image",
            format!("{}-channel image", source.desc().channels),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_values() {
        assert_eq!(Connectivity::Four.as_u32(), 4);
        assert_eq!(Connectivity::Eight.as_u32(), 8);
    }

    #[test]
    fn test_sentinel_is_all_bits() {
        assert_eq!(SENTINEL, 0xffff_ffff);
        assert_eq!(SENTINEL as i32, -1);
    }
}
