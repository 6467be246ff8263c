use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use image::RgbaImage;
use wgpu::naga::ShaderStage;

use super::context::GpuContext;
use super::stats::{ResourceKind, StatGuard};
use super::COLOR_FORMAT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wrap {
    #[default]
    Clamp,
    Repeat,
    Mirror,
}

impl Wrap {
    fn address_mode(self) -> wgpu::AddressMode {
        match self {
            Wrap::Clamp => wgpu::AddressMode::ClampToEdge,
            Wrap::Repeat => wgpu::AddressMode::Repeat,
            Wrap::Mirror => wgpu::AddressMode::MirrorRepeat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextureOptions {
    /// Upload rows bottom-up.
    pub flip_y: bool,
    pub wrap_s: Wrap,
    pub wrap_t: Wrap,
    pub gen_mipmaps: bool,
    /// Allocation size for `Empty` and `Color` sources; image sources always
    /// use their own dimensions.
    pub size: Option<(u32, u32)>,
}

/// Where a texture's pixels come from.
#[derive(Clone)]
pub enum TextureSource {
    /// Uninitialised storage, typically a render target.
    Empty { width: u32, height: u32 },
    Image(Arc<RgbaImage>),
    Rgba {
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
    /// A single color, normalised RGBA.
    Color([f32; 4]),
}

impl TextureSource {
    pub fn size(&self) -> (u32, u32) {
        match self {
            TextureSource::Empty { width, height } | TextureSource::Rgba { width, height, .. } => {
                (*width, *height)
            }
            TextureSource::Image(image) => image.dimensions(),
            TextureSource::Color(_) => (1, 1),
        }
    }
}

impl fmt::Debug for TextureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextureSource::Empty { width, height } => write!(f, "Empty({width}x{height})"),
            TextureSource::Image(image) => {
                write!(f, "Image({}x{})", image.width(), image.height())
            }
            TextureSource::Rgba { width, height, .. } => write!(f, "Rgba({width}x{height})"),
            TextureSource::Color(color) => write!(f, "Color({color:?})"),
        }
    }
}

impl From<RgbaImage> for TextureSource {
    fn from(image: RgbaImage) -> Self {
        TextureSource::Image(Arc::new(image))
    }
}

impl From<Arc<RgbaImage>> for TextureSource {
    fn from(image: Arc<RgbaImage>) -> Self {
        TextureSource::Image(image)
    }
}

struct GpuTexture {
    context_id: u64,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    width: u32,
    height: u32,
    mip_levels: u32,
    _guard: StatGuard,
}

struct TextureInner {
    label: String,
    source: TextureSource,
    options: TextureOptions,
    gpu: Option<GpuTexture>,
    dirty: bool,
    generation: u64,
}

/// Shared texture handle. Clones refer to the same texture; identity is
/// pointer identity, see [`TextureHandle::same`].
///
/// Uploads are lazy. The first bind on a [`GpuContext`] uploads the source,
/// and so does the first bind after [`TextureHandle::set_source`] marks the
/// handle dirty; [`TextureHandle::refresh`] forces an upload right away.
/// Storage is re-created when the handle is first used with a different
/// context, so handles survive a pipeline rebuild as long as their source
/// carries the pixels.
#[derive(Clone)]
pub struct TextureHandle(Rc<RefCell<TextureInner>>);

impl fmt::Debug for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("TextureHandle")
            .field("label", &inner.label)
            .field("source", &inner.source)
            .field("generation", &inner.generation)
            .finish()
    }
}

impl TextureHandle {
    pub fn new(label: impl Into<String>, source: TextureSource, options: TextureOptions) -> Self {
        Self(Rc::new(RefCell::new(TextureInner {
            label: label.into(),
            source,
            options,
            gpu: None,
            dirty: true,
            generation: 0,
        })))
    }

    pub fn from_image(label: impl Into<String>, image: Arc<RgbaImage>) -> Self {
        Self::new(label, TextureSource::Image(image), TextureOptions::default())
    }

    pub fn from_color(label: impl Into<String>, color: [f32; 4]) -> Self {
        Self::new(label, TextureSource::Color(color), TextureOptions::default())
    }

    /// Render-target storage of the given size.
    pub fn empty(label: impl Into<String>, width: u32, height: u32, gen_mipmaps: bool) -> Self {
        Self::new(
            label,
            TextureSource::Empty { width, height },
            TextureOptions {
                gen_mipmaps,
                ..TextureOptions::default()
            },
        )
    }

    pub fn same(&self, other: &TextureHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Bumped on every upload.
    pub fn generation(&self) -> u64 {
        self.0.borrow().generation
    }

    pub fn label(&self) -> String {
        self.0.borrow().label.clone()
    }

    pub fn size(&self) -> (u32, u32) {
        let inner = self.0.borrow();
        inner.allocation_size()
    }

    pub fn source(&self) -> TextureSource {
        self.0.borrow().source.clone()
    }

    /// Replaces the source and marks the handle dirty; the next bind or
    /// [`refresh`](Self::refresh) uploads it.
    pub fn set_source(&self, source: TextureSource) {
        let mut inner = self.0.borrow_mut();
        inner.source = source;
        inner.dirty = true;
    }

    pub fn set_options(&self, options: TextureOptions) {
        let mut inner = self.0.borrow_mut();
        if inner.options != options {
            inner.options = options;
            inner.gpu = None;
            inner.dirty = true;
        }
    }

    /// Uploads the current source now, reallocating when the size changed.
    pub fn refresh(&self, ctx: &GpuContext) {
        self.0.borrow_mut().upload(ctx);
    }

    /// Uploads only when the handle has never been uploaded on `ctx` or its
    /// source changed since.
    pub(crate) fn ensure(&self, ctx: &GpuContext) {
        let mut inner = self.0.borrow_mut();
        let stale = match &inner.gpu {
            Some(gpu) => gpu.context_id != ctx.id(),
            None => true,
        };
        if stale || inner.dirty {
            inner.upload(ctx);
        }
    }

    pub(crate) fn binding(&self, ctx: &GpuContext) -> Option<(wgpu::TextureView, wgpu::Sampler)> {
        self.ensure(ctx);
        let inner = self.0.borrow();
        inner
            .gpu
            .as_ref()
            .map(|gpu| (gpu.view.clone(), gpu.sampler.clone()))
    }

    pub(crate) fn texture(&self, ctx: &GpuContext) -> Option<wgpu::Texture> {
        self.ensure(ctx);
        self.0.borrow().gpu.as_ref().map(|gpu| gpu.texture.clone())
    }

    /// A view of mip level 0 only, suitable as a color attachment.
    pub(crate) fn target_view(&self, ctx: &GpuContext) -> Option<wgpu::TextureView> {
        self.ensure(ctx);
        let inner = self.0.borrow();
        inner.gpu.as_ref().map(|gpu| {
            gpu.texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some("render target view"),
                base_mip_level: 0,
                mip_level_count: Some(1),
                ..Default::default()
            })
        })
    }

    /// Rebuilds levels `1..` from level 0.
    pub fn update_mipmap(&self, ctx: &GpuContext) {
        self.ensure(ctx);
        let inner = self.0.borrow();
        if let Some(gpu) = inner.gpu.as_ref() {
            if gpu.mip_levels > 1 {
                ctx.mip_blitter()
                    .generate(ctx, &gpu.texture, gpu.mip_levels);
            }
        }
    }

    pub fn mip_levels(&self) -> u32 {
        let inner = self.0.borrow();
        inner.gpu.as_ref().map_or(1, |gpu| gpu.mip_levels)
    }

    /// Drops GPU storage; the source stays and re-uploads on next use.
    pub fn release(&self) {
        let mut inner = self.0.borrow_mut();
        inner.gpu = None;
        inner.dirty = true;
    }
}

impl TextureInner {
    fn allocation_size(&self) -> (u32, u32) {
        match (&self.source, self.options.size) {
            (TextureSource::Empty { .. } | TextureSource::Color(_), Some(size)) => size,
            (source, _) => source.size(),
        }
    }

    fn upload(&mut self, ctx: &GpuContext) {
        let (width, height) = self.allocation_size();
        let (width, height) = (width.max(1), height.max(1));
        let mip_levels = if self.options.gen_mipmaps {
            32 - width.max(height).leading_zeros()
        } else {
            1
        };

        let reusable = self.gpu.as_ref().is_some_and(|gpu| {
            gpu.context_id == ctx.id()
                && gpu.width == width
                && gpu.height == height
                && gpu.mip_levels == mip_levels
        });
        if !reusable {
            self.gpu = Some(self.allocate(ctx, width, height, mip_levels));
        }

        if let Some(pixels) = self.pixels(width, height) {
            if let Some(gpu) = self.gpu.as_ref() {
                ctx.queue.write_texture(
                    wgpu::TexelCopyTextureInfo {
                        texture: &gpu.texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    &pixels,
                    wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(width * 4),
                        rows_per_image: Some(height),
                    },
                    wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                );
            }
        }
        self.dirty = false;
        self.generation += 1;
    }

    fn allocate(&self, ctx: &GpuContext, width: u32, height: u32, mip_levels: u32) -> GpuTexture {
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&self.label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = ctx.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&self.label),
            address_mode_u: self.options.wrap_s.address_mode(),
            address_mode_v: self.options.wrap_t.address_mode(),
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: if mip_levels > 1 {
                wgpu::FilterMode::Linear
            } else {
                wgpu::FilterMode::Nearest
            },
            ..Default::default()
        });
        GpuTexture {
            context_id: ctx.id(),
            texture,
            view,
            sampler,
            width,
            height,
            mip_levels,
            _guard: ctx.stats().track(ResourceKind::Texture),
        }
    }

    /// Tightly packed RGBA8 rows for the current source, or `None` when
    /// there is nothing to upload.
    fn pixels(&self, width: u32, height: u32) -> Option<Vec<u8>> {
        let mut data = match &self.source {
            TextureSource::Empty { .. } => return None,
            TextureSource::Image(image) => image.as_raw().clone(),
            TextureSource::Rgba { data, .. } => data.clone(),
            TextureSource::Color(color) => {
                let texel = color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
                texel.repeat((width * height) as usize)
            }
        };
        let expected = (width * height * 4) as usize;
        if data.len() != expected {
            tracing::warn!(
                label = %self.label,
                expected,
                actual = data.len(),
                "texture source size mismatch; uploading zeros"
            );
            data = vec![0; expected];
        }
        if self.options.flip_y {
            let row = (width * 4) as usize;
            let flipped: Vec<u8> = data.chunks_exact(row).rev().flatten().copied().collect();
            data = flipped;
        }
        Some(data)
    }
}

const MIP_VS: &str = "#version 450
layout(location = 0) out vec2 vuv;
void main() {
    vec2 pos = vec2(float((gl_VertexIndex << 1) & 2), float(gl_VertexIndex & 2));
    vuv = vec2(pos.x, 1.0 - pos.y);
    gl_Position = vec4(pos * 2.0 - 1.0, 0.0, 1.0);
}
";

const MIP_FS: &str = "#version 450
layout(location = 0) in vec2 vuv;
layout(set = 0, binding = 0) uniform texture2D src_tex;
layout(set = 0, binding = 1) uniform sampler src_smp;
layout(location = 0) out vec4 color;
void main() {
    color = texture(sampler2D(src_tex, src_smp), vuv);
}
";

/// Downsampling blit used to fill mip chains.
pub(crate) struct MipBlitter {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::RenderPipeline,
    sampler: wgpu::Sampler,
}

impl MipBlitter {
    pub(crate) fn new(device: &wgpu::Device) -> Self {
        let module = |source: &'static str, stage| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("mip blit"),
                source: wgpu::ShaderSource::Glsl {
                    shader: Cow::Borrowed(source),
                    stage,
                    defines: &[],
                },
            })
        };
        let vertex = module(MIP_VS, ShaderStage::Vertex);
        let fragment = module(MIP_FS, ShaderStage::Fragment);

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("mip blit layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("mip blit pipeline layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("mip blit pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex,
                entry_point: Some("main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &fragment,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("mip blit sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        Self {
            layout,
            pipeline,
            sampler,
        }
    }

    pub(crate) fn generate(&self, ctx: &GpuContext, texture: &wgpu::Texture, mip_levels: u32) {
        let level_view = |level: u32| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some("mip level"),
                base_mip_level: level,
                mip_level_count: Some(1),
                ..Default::default()
            })
        };
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mip chain"),
            });
        for level in 1..mip_levels {
            let source = level_view(level - 1);
            let target = level_view(level);
            let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("mip blit bind group"),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&source),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            });
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("mip blit pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        ctx.queue.submit(Some(encoder.finish()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_compare_by_identity() {
        let a = TextureHandle::from_color("a", [1.0, 0.0, 0.0, 1.0]);
        let b = TextureHandle::from_color("a", [1.0, 0.0, 0.0, 1.0]);
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
    }

    #[test]
    fn explicit_size_applies_to_generated_sources() {
        let filled = TextureHandle::new(
            "fill",
            TextureSource::Color([0.0; 4]),
            TextureOptions {
                size: Some((4, 2)),
                ..TextureOptions::default()
            },
        );
        assert_eq!(filled.size(), (4, 2));
        let inner = filled.0.borrow();
        assert_eq!(inner.pixels(4, 2).map(|p| p.len()), Some(32));
    }

    #[test]
    fn flip_reverses_rows() {
        let handle = TextureHandle::new(
            "rows",
            TextureSource::Rgba {
                width: 1,
                height: 2,
                data: vec![1, 1, 1, 1, 2, 2, 2, 2],
            },
            TextureOptions {
                flip_y: true,
                ..TextureOptions::default()
            },
        );
        let inner = handle.0.borrow();
        assert_eq!(inner.pixels(1, 2), Some(vec![2, 2, 2, 2, 1, 1, 1, 1]));
    }

    #[test]
    fn new_source_waits_for_the_next_bind() {
        let handle = TextureHandle::from_color("swap", [0.0, 0.0, 0.0, 1.0]);
        handle.0.borrow_mut().dirty = false;
        handle.set_source(TextureSource::Color([1.0, 1.0, 1.0, 1.0]));
        let inner = handle.0.borrow();
        assert!(inner.dirty);
        assert_eq!(inner.generation, 0);
    }

    #[test]
    fn empty_sources_upload_nothing() {
        let handle = TextureHandle::empty("target", 8, 8, true);
        assert_eq!(handle.size(), (8, 8));
        assert!(handle.0.borrow().pixels(8, 8).is_none());
    }
}
