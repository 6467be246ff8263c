//! Thin WebGL-style object model over headless wgpu.
//!
//! - `context` owns the adapter/device pair and the device-lost flag.
//! - `shader` translates the GLES-flavoured stage dialect into GLSL 450,
//!   reflects its uniforms and attributes, and validates it with naga.
//! - `program` compiles a vertex/fragment pair, keeps uniform values and
//!   attribute buffers by name, and caches render pipelines per target.
//! - `texture` and `framebuffer` wrap sampled images and render targets.
//!   Texture uploads are lazy: a handle whose source changed is uploaded
//!   again the next time it is bound, and `refresh` uploads immediately.
//! - `renderer` owns the canvas and submits one pass per draw.
//! - `stats` counts live GPU objects.

mod context;
mod framebuffer;
mod program;
mod renderer;
mod shader;
mod stats;
mod texture;

pub use context::GpuContext;
pub use framebuffer::{FrameBuffer, FrameBufferOptions};
pub use program::{
    AttributeBuffer, Blend, BufferTarget, DepthTest, DrawMode, Program, ProgramBuffers,
    UniformValue,
};
pub use renderer::Renderer;
pub use shader::{
    translate, AttributeInfo, ShaderError, TranslatedShader, UniformInfo, UniformKind,
    PASSTHROUGH_FS, PASSTHROUGH_VS,
};
pub use stats::{ResourceCounts, ResourceKind, ResourceStats};
pub use texture::{TextureHandle, TextureOptions, TextureSource, Wrap};

/// Every color target in the pipeline uses this format.
pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

/// Nearest power of two in `{1, 2, 4, …, 4096}`; ties go to the larger one.
pub fn to_nth_power(n: u32) -> u32 {
    let mut best = 1u32;
    let mut best_distance = n.abs_diff(1);
    let mut candidate = 2u32;
    while candidate <= 4096 {
        let distance = n.abs_diff(candidate);
        if distance <= best_distance {
            best = candidate;
            best_distance = distance;
        }
        candidate *= 2;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::to_nth_power;

    #[test]
    fn nearest_power_of_two() {
        assert_eq!(to_nth_power(0), 1);
        assert_eq!(to_nth_power(1), 1);
        assert_eq!(to_nth_power(3), 4);
        assert_eq!(to_nth_power(6), 8);
        assert_eq!(to_nth_power(640), 512);
        assert_eq!(to_nth_power(768), 1024);
        assert_eq!(to_nth_power(480), 512);
        assert_eq!(to_nth_power(100_000), 4096);
    }
}
