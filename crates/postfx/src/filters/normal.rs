use std::rc::Rc;

use anyhow::Result;

use crate::filter::{Filter, FilterCore, Quad, QUAD_VS};
use crate::gpu::{GpuContext, Renderer, TextureHandle};

const PRESENT_FS: &str = "\
precision mediump float;
uniform sampler2D map;
uniform float flipY;
varying vec2 vuv;
void main() {
    vec2 uv = vec2(vuv.x, mix(vuv.y, 1.0 - vuv.y, flipY));
    gl_FragColor = texture2D(map, uv);
}
";

/// Final stage: copies its input onto the canvas.
pub struct NormalFilter {
    core: FilterCore,
    canvas: TextureHandle,
    flip_y: bool,
}

impl NormalFilter {
    pub fn new(ctx: &Rc<GpuContext>, quad: &Quad, renderer: &Renderer, flip_y: bool) -> Result<Self> {
        let (width, height) = renderer.get_size();
        let mut core = FilterCore::new(ctx, quad, width, height);
        core.add_program("main", QUAD_VS, PRESENT_FS)?
            .set_uniform("flipY", if flip_y { 1.0 } else { 0.0 });
        Ok(Self {
            core,
            canvas: renderer.canvas().texture().clone(),
            flip_y,
        })
    }

    pub fn flip_y(&self) -> bool {
        self.flip_y
    }

    pub fn set_flip_y(&mut self, flip_y: bool) {
        self.flip_y = flip_y;
        self.core
            .set_uniform("main", "flipY", if flip_y { 1.0 } else { 0.0 });
    }
}

impl Filter for NormalFilter {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    fn output(&self) -> Option<TextureHandle> {
        Some(self.canvas.clone())
    }

    fn render(&mut self, renderer: &mut Renderer) {
        if self.core.map().is_none() {
            return;
        }
        self.core.draw(renderer, "main", None);
    }
}
