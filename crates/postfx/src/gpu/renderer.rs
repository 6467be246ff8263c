use std::rc::Rc;

use anyhow::{Context, Result};
use image::RgbaImage;

use super::context::GpuContext;
use super::framebuffer::{FrameBuffer, FrameBufferOptions};
use super::program::Program;

/// Owns the canvas and submits draws.
///
/// Each draw is its own render pass and queue submission, so a pass always
/// observes everything earlier passes wrote.
pub struct Renderer {
    ctx: Rc<GpuContext>,
    canvas: FrameBuffer,
    width: u32,
    height: u32,
    pixel_ratio: f32,
}

impl Renderer {
    pub fn new(ctx: &Rc<GpuContext>, width: u32, height: u32, pixel_ratio: f32) -> Self {
        let pixel_ratio = sanitize_ratio(pixel_ratio);
        let (pw, ph) = physical(width, height, pixel_ratio);
        Self {
            ctx: ctx.clone(),
            canvas: FrameBuffer::new(ctx, "canvas", pw, ph, FrameBufferOptions::default()),
            width: width.max(1),
            height: height.max(1),
            pixel_ratio,
        }
    }

    pub fn context(&self) -> &Rc<GpuContext> {
        &self.ctx
    }

    pub fn canvas(&self) -> &FrameBuffer {
        &self.canvas
    }

    /// Logical size before the pixel ratio is applied.
    pub fn logical_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    /// Canvas size in physical pixels.
    pub fn get_size(&self) -> (u32, u32) {
        physical(self.width, self.height, self.pixel_ratio)
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
        let (pw, ph) = self.get_size();
        self.canvas.resize(pw, ph);
    }

    pub fn set_pixel_ratio(&mut self, ratio: f32) {
        self.pixel_ratio = sanitize_ratio(ratio);
        let (pw, ph) = self.get_size();
        self.canvas.resize(pw, ph);
    }

    /// Clears `target` (the canvas when `None`) and draws `program` into it.
    pub fn render(&self, program: &Program, target: Option<&FrameBuffer>) {
        self.pass(program, target, true);
    }

    /// Draws over the existing contents of `target`.
    pub fn overlay(&self, program: &Program, target: Option<&FrameBuffer>) {
        self.pass(program, target, false);
    }

    /// Clears a target without drawing.
    pub fn clear(&self, target: Option<&FrameBuffer>, color: [f64; 4]) {
        let target = target.unwrap_or(&self.canvas);
        let Some(view) = target.color_view() else {
            return;
        };
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("clear"),
            });
        let _ = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: color[0],
                        g: color[1],
                        b: color[2],
                        a: color[3],
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        self.ctx.queue.submit(Some(encoder.finish()));
    }

    fn pass(&self, program: &Program, target: Option<&FrameBuffer>, clear: bool) {
        let target = target.unwrap_or(&self.canvas);
        let Some(view) = target.color_view() else {
            return;
        };
        program.flush_uniforms();
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(program.label()),
            });
        {
            let load = if clear {
                wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT)
            } else {
                wgpu::LoadOp::Load
            };
            let depth_load = if clear {
                wgpu::LoadOp::Clear(1.0)
            } else {
                wgpu::LoadOp::Load
            };
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(program.label()),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: target.depth_view().map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: depth_load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            program.encode(&mut pass, target.has_depth());
        }
        self.ctx.queue.submit(Some(encoder.finish()));
    }

    /// Reads the canvas back as tightly packed RGBA8.
    pub fn read_canvas(&self) -> Result<RgbaImage> {
        self.read_target(&self.canvas)
    }

    pub fn read_target(&self, target: &FrameBuffer) -> Result<RgbaImage> {
        let (width, height) = target.size();
        let texture = target
            .texture()
            .texture(&self.ctx)
            .context("render target has no GPU storage")?;
        let unpadded = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let buffer = self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: u64::from(padded) * u64::from(height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.ctx.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.ctx
            .device
            .poll(wgpu::PollType::Wait)
            .context("failed to wait for GPU readback")?;
        rx.recv()
            .context("readback callback never ran")?
            .context("failed to map readback buffer")?;

        let mut pixels = Vec::with_capacity((unpadded * height) as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks_exact(padded as usize) {
                pixels.extend_from_slice(&row[..unpadded as usize]);
            }
        }
        buffer.unmap();
        RgbaImage::from_raw(width, height, pixels).context("readback produced a short image")
    }
}

fn sanitize_ratio(ratio: f32) -> f32 {
    if ratio.is_finite() && ratio > 0.0 {
        ratio
    } else {
        1.0
    }
}

fn physical(width: u32, height: u32, ratio: f32) -> (u32, u32) {
    let scale = |v: u32| ((v.max(1) as f32 * ratio).round() as u32).max(1);
    (scale(width), scale(height))
}

#[cfg(test)]
mod tests {
    use super::physical;

    #[test]
    fn physical_size_rounds() {
        assert_eq!(physical(640, 480, 1.0), (640, 480));
        assert_eq!(physical(641, 481, 1.5), (962, 722));
        assert_eq!(physical(0, 10, 0.01), (1, 1));
    }
}
