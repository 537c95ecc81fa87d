//! Program variant cache: one compiled kernel program per
//! (family, pixel-type) pair, built lazily and exactly once.
//!
//! A build can take 100+ ms, so families compile on first need and the
//! cache answers every later request. A failed build leaves no cache
//! entry behind: the next attempt for that key starts from scratch.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use pix_core::{Error, PixelType, Result, ScalarKind};
use wgpu::Device;

use crate::context::Context;
use crate::resource::ImageResource;
use crate::shaders;

/// Cache granularity of a kernel family.
///
/// `Coarse` keys variants on the numeric family only, for kernels whose
/// body is type-generic via reinterpretation. `Fine` keys on the full
/// element type, for kernels where storage width matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantAxis {
    /// One variant per [`ScalarKind`].
    Coarse,
    /// One variant per [`PixelType`].
    Fine,
}

/// Cache key derived from a pixel type under a [`VariantAxis`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum VariantKey {
    Coarse(ScalarKind),
    Fine(PixelType),
}

/// A built, launchable program variant.
#[derive(Clone, Debug)]
pub struct ProgramHandle {
    module: Arc<wgpu::ShaderModule>,
}

impl ProgramHandle {
    /// True when both handles refer to the same compiled program.
    pub fn same(a: &ProgramHandle, b: &ProgramHandle) -> bool {
        Arc::ptr_eq(&a.module, &b.module)
    }
}

enum SourceKind {
    /// Source produced by a generator function (the built-in families).
    Generated(fn(PixelType) -> String),
    /// Caller-supplied source text; the per-type preamble is prepended.
    Inline(String),
    /// `<dir>/<family>.wgsl`, read lazily at first build; the per-type
    /// preamble is prepended. `None` when the context has no kernel
    /// directory configured.
    File(Option<PathBuf>),
}

/// A named kernel family holding one program variant per cache key.
pub struct KernelFamily {
    name: String,
    axis: VariantAxis,
    source: SourceKind,
    device: Arc<Device>,
    modules: RefCell<HashMap<VariantKey, Arc<wgpu::ShaderModule>>>,
    pipelines: RefCell<HashMap<(VariantKey, String), Arc<wgpu::ComputePipeline>>>,
    builds: Cell<usize>,
}

impl KernelFamily {
    pub(crate) fn generated(
        ctx: &Context,
        name: &str,
        axis: VariantAxis,
        generator: fn(PixelType) -> String,
    ) -> Self {
        Self::with_source(ctx, name, axis, SourceKind::Generated(generator))
    }

    /// Family from inline WGSL source text. The generated per-type
    /// accessor preamble is prepended to `source` at build time.
    pub fn from_inline(ctx: &Context, name: &str, axis: VariantAxis, source: String) -> Self {
        Self::with_source(ctx, name, axis, SourceKind::Inline(source))
    }

    /// Family loaded from `<kernel_dir>/<name>.wgsl`.
    ///
    /// The file is read lazily; a missing directory or file surfaces as
    /// a build error on the family's first build.
    pub fn from_file(ctx: &Context, name: &str, axis: VariantAxis) -> Self {
        let dir = ctx.kernel_dir().map(|d| d.to_path_buf());
        Self::with_source(ctx, name, axis, SourceKind::File(dir))
    }

    fn with_source(ctx: &Context, name: &str, axis: VariantAxis, source: SourceKind) -> Self {
        Self {
            name: name.to_string(),
            axis,
            source,
            device: ctx.device_arc(),
            modules: RefCell::new(HashMap::new()),
            pipelines: RefCell::new(HashMap::new()),
            builds: Cell::new(0),
        }
    }

    /// Family name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of compilation attempts performed so far.
    pub fn builds(&self) -> usize {
        self.builds.get()
    }

    /// Return the variant for `pixel`, compiling it on first request.
    ///
    /// Idempotent: a second call with the same key returns the cached
    /// program without recompiling. A failed build does not poison the
    /// key.
    pub fn ensure_built(&self, pixel: PixelType) -> Result<ProgramHandle> {
        let key = self.key_for(pixel);
        if let Some(module) = self.modules.borrow().get(&key) {
            return Ok(ProgramHandle { module: module.clone() });
        }

        let source = self.resolve_source(pixel)?;
        self.builds.set(self.builds.get() + 1);

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{}_{}", self.name, pixel)),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(Error::Build {
                family: self.name.clone(),
                pixel,
                diagnostics: err.to_string(),
            });
        }

        let module = Arc::new(module);
        self.modules.borrow_mut().insert(key, module.clone());
        Ok(ProgramHandle { module })
    }

    /// Derive the pixel type from a resource and [`ensure_built`]
    /// transparently; the call path of every kernel dispatch.
    ///
    /// [`ensure_built`]: KernelFamily::ensure_built
    pub fn select_for(&self, source: &ImageResource) -> Result<ProgramHandle> {
        self.ensure_built(source.desc().pixel)
    }

    /// Compute pipeline for one entry point of a variant, created and
    /// cached on first use.
    pub(crate) fn pipeline(
        &self,
        pixel: PixelType,
        entry: &str,
    ) -> Result<Arc<wgpu::ComputePipeline>> {
        let key = (self.key_for(pixel), entry.to_string());
        if let Some(p) = self.pipelines.borrow().get(&key) {
            return Ok(p.clone());
        }

        let handle = self.ensure_built(pixel)?;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&format!("{}_{}_{}", self.name, pixel, entry)),
            layout: None,
            module: &handle.module,
            entry_point: Some(entry),
            compilation_options: Default::default(),
            cache: None,
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(Error::Build {
                family: self.name.clone(),
                pixel,
                diagnostics: format!("entry point '{entry}': {err}"),
            });
        }

        let pipeline = Arc::new(pipeline);
        self.pipelines.borrow_mut().insert(key, pipeline.clone());
        Ok(pipeline)
    }

    fn key_for(&self, pixel: PixelType) -> VariantKey {
        match self.axis {
            VariantAxis::Coarse => VariantKey::Coarse(pixel.scalar_kind()),
            VariantAxis::Fine => VariantKey::Fine(pixel),
        }
    }

    fn resolve_source(&self, pixel: PixelType) -> Result<String> {
        match &self.source {
            SourceKind::Generated(generator) => Ok(generator(pixel)),
            SourceKind::Inline(text) => Ok(format!("{}\n{text}", shaders::preamble(pixel))),
            SourceKind::File(dir) => {
                let dir = dir.as_ref().ok_or_else(|| Error::Build {
                    family: self.name.clone(),
                    pixel,
                    diagnostics: "no kernel source directory configured".into(),
                })?;
                let path = dir.join(format!("{}.wgsl", self.name));
                let text = std::fs::read_to_string(&path).map_err(|e| Error::Build {
                    family: self.name.clone(),
                    pixel,
                    diagnostics: format!("failed to read kernel source '{}': {e}", path.display()),
                })?;
                Ok(format!("{}\n{text}", shaders::preamble(pixel)))
            }
        }
    }
}

impl std::fmt::Debug for KernelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelFamily")
            .field("name", &self.name)
            .field("axis", &self.axis)
            .field("variants", &self.modules.borrow().len())
            .field("builds", &self.builds.get())
            .finish()
    }
}
