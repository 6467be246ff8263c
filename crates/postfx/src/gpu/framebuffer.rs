use std::rc::Rc;

use super::context::GpuContext;
use super::stats::{ResourceKind, StatGuard};
use super::texture::TextureHandle;
use super::DEPTH_FORMAT;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameBufferOptions {
    pub depth: bool,
    pub mipmaps: bool,
}

struct DepthAttachment {
    view: wgpu::TextureView,
    _guard: StatGuard,
}

/// Off-screen render target backed by a color texture.
///
/// The color texture keeps its handle identity across resizes, so programs
/// that sampled it keep working after `resize`.
pub struct FrameBuffer {
    ctx: Rc<GpuContext>,
    label: String,
    texture: TextureHandle,
    depth: Option<DepthAttachment>,
    options: FrameBufferOptions,
    width: u32,
    height: u32,
    _guard: StatGuard,
}

impl FrameBuffer {
    pub fn new(
        ctx: &Rc<GpuContext>,
        label: impl Into<String>,
        width: u32,
        height: u32,
        options: FrameBufferOptions,
    ) -> Self {
        let label = label.into();
        let (width, height) = (width.max(1), height.max(1));
        let texture = TextureHandle::empty(label.clone(), width, height, options.mipmaps);
        texture.refresh(ctx);
        let depth = options.depth.then(|| create_depth(ctx, &label, width, height));
        Self {
            ctx: ctx.clone(),
            label,
            texture,
            depth,
            options,
            width,
            height,
            _guard: ctx.stats().track(ResourceKind::FrameBuffer),
        }
    }

    pub fn texture(&self) -> &TextureHandle {
        &self.texture
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn has_depth(&self) -> bool {
        self.depth.is_some()
    }

    /// Reallocates storage when the size changed. Returns whether it did.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        let (width, height) = (width.max(1), height.max(1));
        if (width, height) == (self.width, self.height) {
            return false;
        }
        self.width = width;
        self.height = height;
        self.texture
            .set_source(super::TextureSource::Empty { width, height });
        self.texture.refresh(&self.ctx);
        if self.options.depth {
            self.depth = Some(create_depth(&self.ctx, &self.label, width, height));
        }
        true
    }

    pub(crate) fn color_view(&self) -> Option<wgpu::TextureView> {
        self.texture.target_view(&self.ctx)
    }

    pub(crate) fn depth_view(&self) -> Option<&wgpu::TextureView> {
        self.depth.as_ref().map(|depth| &depth.view)
    }
}

fn create_depth(ctx: &GpuContext, label: &str, width: u32, height: u32) -> DepthAttachment {
    let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    DepthAttachment {
        view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
        _guard: ctx.stats().track(ResourceKind::Texture),
    }
}
