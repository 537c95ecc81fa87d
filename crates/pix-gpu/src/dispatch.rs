//! The dispatch protocol shared by every kernel family.
//!
//! One submission path: validate operands, resolve the program variant,
//! auto-send `NeverSent` sources, encode a single compute pass on the
//! context queue, mark destinations dirty and return without waiting.
//! Ordering comes from the queue alone (FIFO submission order); the
//! blocking points are `read` and `finish`.

use bytemuck::{Pod, Zeroable};
use pix_core::{Error, ImageDesc, Result};
use wgpu::util::DeviceExt;
use wgpu::{Device, Queue};

use crate::shaders::WORKGROUP_SIZE;

/// 16-byte uniform of four `u32` values.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct U32x4Uniform {
    values: [u32; 4],
}

/// 16-byte uniform of four `f32` values.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct F32x4Uniform {
    values: [f32; 4],
}

pub(crate) fn uniform_u32x4(device: &Device, values: [u32; 4]) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("dims_uniform"),
        contents: bytemuck::bytes_of(&U32x4Uniform { values }),
        usage: wgpu::BufferUsages::UNIFORM,
    })
}

pub(crate) fn uniform_f32x4(device: &Device, values: [f32; 4]) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("params_uniform"),
        contents: bytemuck::bytes_of(&F32x4Uniform { values }),
        usage: wgpu::BufferUsages::UNIFORM,
    })
}

/// One buffer bound at a shader binding index.
pub(crate) struct BufBinding<'a> {
    pub binding: u32,
    pub buffer: &'a wgpu::Buffer,
}

/// Encode and submit one compute pass. Non-blocking.
pub(crate) fn submit_compute(
    device: &Device,
    queue: &Queue,
    pipeline: &wgpu::ComputePipeline,
    bindings: &[BufBinding<'_>],
    workgroups: (u32, u32, u32),
    label: &str,
) {
    let layout = pipeline.get_bind_group_layout(0);
    let entries: Vec<wgpu::BindGroupEntry> = bindings
        .iter()
        .map(|b| wgpu::BindGroupEntry {
            binding: b.binding,
            resource: b.buffer.as_entire_binding(),
        })
        .collect();
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &layout,
        entries: &entries,
    });

    let mut encoder =
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(workgroups.0, workgroups.1, workgroups.2);
    }
    queue.submit(std::iter::once(encoder.finish()));
}

/// 1-D workgroup count covering `items` invocations.
pub(crate) fn linear_groups(items: u32) -> u32 {
    items.div_ceil(WORKGROUP_SIZE).max(1)
}

/// Same pixel grid (width, height, channels).
pub(crate) fn check_same_shape(a: &ImageDesc, b: &ImageDesc) -> Result<()> {
    if !a.same_shape(b) {
        return Err(Error::size_mismatch(
            (a.width, a.height, a.channels),
            (b.width, b.height, b.channels),
        ));
    }
    Ok(())
}

/// Same grid and same element type.
pub(crate) fn check_similar(a: &ImageDesc, b: &ImageDesc) -> Result<()> {
    check_same_shape(a, b)?;
    if a.pixel != b.pixel {
        return Err(Error::type_mismatch(a.pixel.to_string(), b.pixel.to_string()));
    }
    Ok(())
}

/// Integer element type required.
pub(crate) fn check_integer(d: &ImageDesc) -> Result<()> {
    if d.pixel.is_float() {
        return Err(Error::type_mismatch("integer pixel type", d.pixel.to_string()));
    }
    Ok(())
}
