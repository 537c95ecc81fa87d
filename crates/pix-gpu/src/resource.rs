//! Host/device-paired resources and their transfer state machine.
//!
//! Every resource owns its device allocation 1:1 (dropping the resource
//! releases the device memory) and, optionally, a host mirror. The
//! device side always stores rows tightly packed in `u32` words;
//! `send`/`read` pack and unpack strided host rows.

use std::cell::Cell;
use std::sync::Arc;

use pix_core::{Error, ImageDesc, PixelType, Result};
use wgpu::{Device, Queue};

/// Where a resource's data currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// No host mirror. `send`/`read` fail; kernels may still read and
    /// write the device allocation.
    Unbound,
    /// Host mirror present, never transferred. A dispatch using the
    /// resource as a source sends it implicitly.
    NeverSent,
    /// Device copy is consistent with the host mirror.
    Sent,
    /// A kernel wrote the device copy; the host mirror is stale until
    /// the next `read`.
    DirtyOnDevice,
}

/// 2-D image resource.
pub struct ImageResource {
    desc: ImageDesc,
    device: Arc<Device>,
    queue: Arc<Queue>,
    buffer: wgpu::Buffer,
    host: Option<Vec<u8>>,
    state: Cell<TransferState>,
}

impl ImageResource {
    pub(crate) fn new(
        device: Arc<Device>,
        queue: Arc<Queue>,
        desc: ImageDesc,
        host: Option<Vec<u8>>,
    ) -> Result<Self> {
        if let Some(data) = &host {
            if data.len() != desc.host_size_bytes() {
                return Err(Error::invalid_desc(
                    desc.width,
                    desc.height,
                    format!(
                        "host buffer is {} bytes, descriptor needs {}",
                        data.len(),
                        desc.host_size_bytes()
                    ),
                ));
            }
        }
        let padded = padded_size(desc.tight_size_bytes());
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("image_resource"),
            size: padded,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let state = if host.is_some() { TransferState::NeverSent } else { TransferState::Unbound };
        Ok(Self { desc, device, queue, buffer, host, state: Cell::new(state) })
    }

    /// The descriptor this resource was created from.
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    /// Current transfer state.
    pub fn transfer_state(&self) -> TransferState {
        self.state.get()
    }

    /// Borrow the host mirror.
    pub fn host(&self) -> Option<&[u8]> {
        self.host.as_deref()
    }

    /// Mutably borrow the host mirror, making it the new truth: the
    /// state drops back to `NeverSent`, so the next use as a kernel
    /// source re-sends the mirror.
    pub fn host_mut(&mut self) -> Option<&mut [u8]> {
        if self.host.is_some() {
            self.state.set(TransferState::NeverSent);
        }
        self.host.as_deref_mut()
    }

    /// Enqueue a host-to-device copy of the mirror.
    ///
    /// Asynchronous: returns once the copy is queued. The mirror must
    /// not be modified before the queue drains it, which `host_mut`'s
    /// `&mut self` receiver already guarantees.
    pub fn send(&self) -> Result<()> {
        let host = self.host.as_deref().ok_or(Error::NoHostBinding)?;
        upload_packed(
            &self.queue,
            &self.buffer,
            host,
            self.desc.row_stride,
            self.desc.tight_row_bytes(),
            self.desc.height as usize,
        );
        self.state.set(TransferState::Sent);
        Ok(())
    }

    /// Copy device content back into the host mirror.
    ///
    /// Blocks until all previously submitted operations and the copy
    /// itself have completed, then returns the refreshed mirror. Legal
    /// only from `Sent` or `DirtyOnDevice`.
    pub fn read(&mut self) -> Result<&[u8]> {
        if self.host.is_none() {
            return Err(Error::NoHostBinding);
        }
        match self.state.get() {
            TransferState::NeverSent => return Err(Error::NotOnDevice),
            TransferState::Unbound => return Err(Error::NoHostBinding),
            TransferState::Sent | TransferState::DirtyOnDevice => {}
        }
        let packed = download_bytes(
            &self.device,
            &self.queue,
            &self.buffer,
            padded_size(self.desc.tight_size_bytes()),
        )?;
        let tight_row = self.desc.tight_row_bytes();
        let stride = self.desc.row_stride;
        let host = self.host.as_mut().expect("host binding checked above");
        for y in 0..self.desc.height as usize {
            host[y * stride..y * stride + tight_row]
                .copy_from_slice(&packed[y * tight_row..(y + 1) * tight_row]);
        }
        self.state.set(TransferState::Sent);
        Ok(self.host.as_deref().expect("host binding checked above"))
    }

    /// Send the mirror if it was never transferred. Called by dispatch
    /// for every source operand; the only implicit state transition.
    pub(crate) fn auto_send(&self) -> Result<()> {
        if self.state.get() == TransferState::NeverSent {
            self.send()?;
        }
        Ok(())
    }

    /// Record that a kernel wrote this resource.
    pub(crate) fn mark_device_written(&self) {
        if self.state.get() != TransferState::Unbound {
            self.state.set(TransferState::DirtyOnDevice);
        }
    }

    pub(crate) fn raw_buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Number of `u32` storage words the device allocation holds.
    pub(crate) fn words(&self) -> u32 {
        (padded_size(self.desc.tight_size_bytes()) / 4) as u32
    }
}

impl std::fmt::Debug for ImageResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageResource")
            .field("desc", &self.desc)
            .field("state", &self.state.get())
            .finish()
    }
}

/// 1-D element array resource (label maps, scratch buffers).
pub struct BufferResource {
    pixel: PixelType,
    elems: usize,
    device: Arc<Device>,
    queue: Arc<Queue>,
    buffer: wgpu::Buffer,
    host: Option<Vec<u8>>,
    state: Cell<TransferState>,
}

impl BufferResource {
    pub(crate) fn new(
        device: Arc<Device>,
        queue: Arc<Queue>,
        pixel: PixelType,
        elems: usize,
        host: Option<Vec<u8>>,
    ) -> Result<Self> {
        let tight = elems * pixel.size_bytes();
        if let Some(data) = &host {
            if data.len() != tight {
                return Err(Error::invalid_desc(
                    elems as u32,
                    1,
                    format!("host buffer is {} bytes, {tight} required", data.len()),
                ));
            }
        }
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("buffer_resource"),
            size: padded_size(tight),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let state = if host.is_some() { TransferState::NeverSent } else { TransferState::Unbound };
        Ok(Self { pixel, elems, device, queue, buffer, host, state: Cell::new(state) })
    }

    /// Element type of the buffer.
    pub fn pixel(&self) -> PixelType {
        self.pixel
    }

    /// Number of elements.
    pub fn elems(&self) -> usize {
        self.elems
    }

    /// Current transfer state.
    pub fn transfer_state(&self) -> TransferState {
        self.state.get()
    }

    /// Borrow the host mirror.
    pub fn host(&self) -> Option<&[u8]> {
        self.host.as_deref()
    }

    /// Mutably borrow the host mirror; the state drops back to
    /// `NeverSent` as for [`ImageResource::host_mut`].
    pub fn host_mut(&mut self) -> Option<&mut [u8]> {
        if self.host.is_some() {
            self.state.set(TransferState::NeverSent);
        }
        self.host.as_deref_mut()
    }

    /// Enqueue a host-to-device copy of the mirror.
    pub fn send(&self) -> Result<()> {
        let host = self.host.as_deref().ok_or(Error::NoHostBinding)?;
        let tight = self.elems * self.pixel.size_bytes();
        upload_packed(&self.queue, &self.buffer, host, tight, tight, 1);
        self.state.set(TransferState::Sent);
        Ok(())
    }

    /// Copy device content back into the host mirror; blocks.
    pub fn read(&mut self) -> Result<&[u8]> {
        if self.host.is_none() {
            return Err(Error::NoHostBinding);
        }
        match self.state.get() {
            TransferState::NeverSent => return Err(Error::NotOnDevice),
            TransferState::Unbound => return Err(Error::NoHostBinding),
            TransferState::Sent | TransferState::DirtyOnDevice => {}
        }
        let tight = self.elems * self.pixel.size_bytes();
        let packed = download_bytes(&self.device, &self.queue, &self.buffer, padded_size(tight))?;
        let host = self.host.as_mut().expect("host binding checked above");
        host.copy_from_slice(&packed[..tight]);
        self.state.set(TransferState::Sent);
        Ok(self.host.as_deref().expect("host binding checked above"))
    }

    pub(crate) fn mark_device_written(&self) {
        if self.state.get() != TransferState::Unbound {
            self.state.set(TransferState::DirtyOnDevice);
        }
    }

    pub(crate) fn raw_buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

impl std::fmt::Debug for BufferResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferResource")
            .field("pixel", &self.pixel)
            .field("elems", &self.elems)
            .field("state", &self.state.get())
            .finish()
    }
}

/// Device allocation size: tight bytes rounded up to whole words.
fn padded_size(tight: usize) -> u64 {
    tight.div_ceil(4) as u64 * 4
}

/// Pack strided host rows and enqueue the upload. An empty submit
/// flushes the staged write so a later `finish` observes it.
fn upload_packed(
    queue: &Queue,
    buffer: &wgpu::Buffer,
    host: &[u8],
    stride: usize,
    tight_row: usize,
    rows: usize,
) {
    let tight = tight_row * rows;
    let padded = padded_size(tight) as usize;
    if stride == tight_row && tight == padded {
        queue.write_buffer(buffer, 0, &host[..tight]);
    } else {
        let mut packed = vec![0u8; padded];
        for y in 0..rows {
            packed[y * tight_row..(y + 1) * tight_row]
                .copy_from_slice(&host[y * stride..y * stride + tight_row]);
        }
        queue.write_buffer(buffer, 0, &packed);
    }
    queue.submit(std::iter::empty());
}

/// Blocking device-to-host readback through a staging buffer.
pub(crate) fn download_bytes(
    device: &Device,
    queue: &Queue,
    src: &wgpu::Buffer,
    size: u64,
) -> Result<Vec<u8>> {
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("staging_buffer"),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&Default::default());
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });
    device.poll(wgpu::Maintain::Wait);

    rx.recv()
        .map_err(|_| Error::Transfer("map channel closed".into()))?
        .map_err(|e| Error::Transfer(format!("map failed: {e}")))?;

    let data = slice.get_mapped_range();
    let result = data.to_vec();
    drop(data);
    staging.unmap();

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_size() {
        assert_eq!(padded_size(0), 0);
        assert_eq!(padded_size(9), 12);
        assert_eq!(padded_size(16), 16);
    }
}
