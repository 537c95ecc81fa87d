//! Device context: adapter selection, device and the single command
//! queue every other object submits to.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pix_core::{Error, ImageDesc, PixelType, Result};
use wgpu::{Device, Queue};

use crate::resource::{BufferResource, ImageResource};

/// Which class of adapter to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceKind {
    /// Any adapter.
    #[default]
    Any,
    /// Discrete, integrated or virtual GPUs.
    Gpu,
    /// CPU (software) adapters.
    Cpu,
}

/// Context creation options.
///
/// Explicit configuration passed at construction; there is no ambient
/// global state.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    /// Case-insensitive substring preference over adapter names
    /// (e.g. `"nvidia"`). When no adapter matches, the first adapter
    /// passing the kind filter is used instead.
    pub adapter_hint: Option<String>,
    /// Adapter class filter.
    pub device_kind: DeviceKind,
    /// Directory for file-based kernel sources (`<dir>/<family>.wgsl`).
    /// Families built from inline or generated sources ignore it.
    pub kernel_dir: Option<PathBuf>,
}

/// Owns the compute device and its single command queue.
///
/// All work submitted through one context executes in FIFO submission
/// order; work on different contexts has no ordering relationship and
/// must not share resources. A context is intended for single-threaded
/// submission.
pub struct Context {
    device: Arc<Device>,
    queue: Arc<Queue>,
    adapter_info: wgpu::AdapterInfo,
    kernel_dir: Option<PathBuf>,
}

impl Context {
    /// Acquire a device matching `options`.
    pub fn new(options: ContextOptions) -> Result<Self> {
        pollster::block_on(Self::new_async(options))
    }

    async fn new_async(options: ContextOptions) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let mut adapters = instance.enumerate_adapters(wgpu::Backends::all());
        adapters.retain(|a| kind_matches(options.device_kind, a.get_info().device_type));

        let adapter = match &options.adapter_hint {
            Some(hint) => {
                let needle = hint.to_lowercase();
                match adapters
                    .iter()
                    .position(|a| a.get_info().name.to_lowercase().contains(&needle))
                {
                    Some(i) => Some(adapters.swap_remove(i)),
                    None => adapters.into_iter().next(),
                }
            }
            None => adapters.into_iter().next(),
        };
        let adapter = adapter.ok_or_else(|| Error::DeviceUnavailable {
            wanted: describe_request(&options),
        })?;

        let adapter_info = adapter.get_info();
        let adapter_limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("pix_gpu_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter_limits,
                    memory_hints: wgpu::MemoryHints::Performance,
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| Error::DeviceUnavailable {
                wanted: format!("{} (device creation failed: {e})", describe_request(&options)),
            })?;

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info,
            kernel_dir: options.kernel_dir,
        })
    }

    /// Block until every previously submitted operation on this
    /// context's queue has completed.
    pub fn finish(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    /// Adapter (device) name.
    pub fn adapter_name(&self) -> &str {
        &self.adapter_info.name
    }

    /// Underlying wgpu backend (Vulkan, Metal, DX12, GL).
    pub fn backend(&self) -> wgpu::Backend {
        self.adapter_info.backend
    }

    /// True when running on a CPU (software) adapter.
    pub fn is_cpu_device(&self) -> bool {
        self.adapter_info.device_type == wgpu::DeviceType::Cpu
    }

    /// Directory configured for file-based kernel sources.
    pub fn kernel_dir(&self) -> Option<&Path> {
        self.kernel_dir.as_deref()
    }

    pub(crate) fn device_arc(&self) -> Arc<Device> {
        self.device.clone()
    }

    pub(crate) fn queue_arc(&self) -> Arc<Queue> {
        self.queue.clone()
    }

    // =========================================================================
    // Resource creation
    // =========================================================================

    /// Create an image resource bound to a host mirror.
    ///
    /// `data` must be exactly `desc.host_size_bytes()` long; it becomes
    /// the resource's host mirror. The resource starts `NeverSent`.
    pub fn image_from_host(&self, desc: ImageDesc, data: Vec<u8>) -> Result<ImageResource> {
        ImageResource::new(self.device_arc(), self.queue_arc(), desc, Some(data))
    }

    /// Create a device-only image resource (no host mirror): usable as a
    /// kernel source or destination, but `send`/`read` fail with
    /// `NoHostBinding`.
    pub fn image_device_only(&self, desc: ImageDesc) -> ImageResource {
        ImageResource::new(self.device_arc(), self.queue_arc(), desc, None)
            .expect("device-only image creation cannot fail")
    }

    /// Create a 1-D buffer resource bound to a host mirror.
    pub fn buffer_from_host(
        &self,
        pixel: PixelType,
        elems: usize,
        data: Vec<u8>,
    ) -> Result<BufferResource> {
        BufferResource::new(self.device_arc(), self.queue_arc(), pixel, elems, Some(data))
    }

    /// Create a device-only 1-D buffer resource.
    pub fn buffer_device_only(&self, pixel: PixelType, elems: usize) -> BufferResource {
        BufferResource::new(self.device_arc(), self.queue_arc(), pixel, elems, None)
            .expect("device-only buffer creation cannot fail")
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("device", &self.adapter_info.name)
            .field("backend", &self.adapter_info.backend)
            .finish()
    }
}

fn kind_matches(kind: DeviceKind, device_type: wgpu::DeviceType) -> bool {
    match kind {
        DeviceKind::Any => true,
        DeviceKind::Gpu => matches!(
            device_type,
            wgpu::DeviceType::DiscreteGpu
                | wgpu::DeviceType::IntegratedGpu
                | wgpu::DeviceType::VirtualGpu
        ),
        DeviceKind::Cpu => device_type == wgpu::DeviceType::Cpu,
    }
}

fn describe_request(options: &ContextOptions) -> String {
    let kind = match options.device_kind {
        DeviceKind::Any => "any device",
        DeviceKind::Gpu => "GPU device",
        DeviceKind::Cpu => "CPU device",
    };
    match &options.adapter_hint {
        Some(hint) => format!("{kind}, preferring '{hint}'"),
        None => kind.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches() {
        assert!(kind_matches(DeviceKind::Any, wgpu::DeviceType::Cpu));
        assert!(kind_matches(DeviceKind::Gpu, wgpu::DeviceType::DiscreteGpu));
        assert!(kind_matches(DeviceKind::Gpu, wgpu::DeviceType::IntegratedGpu));
        assert!(!kind_matches(DeviceKind::Gpu, wgpu::DeviceType::Cpu));
        assert!(!kind_matches(DeviceKind::Cpu, wgpu::DeviceType::DiscreteGpu));
    }

    #[test]
    fn test_describe_request() {
        let opts = ContextOptions {
            adapter_hint: Some("NVIDIA".into()),
            device_kind: DeviceKind::Gpu,
            kernel_dir: None,
        };
        let desc = describe_request(&opts);
        assert!(desc.contains("GPU"));
        assert!(desc.contains("NVIDIA"));
    }
}
