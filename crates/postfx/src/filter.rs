use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::Result;

use crate::gpu::{
    AttributeBuffer, FrameBuffer, FrameBufferOptions, GpuContext, Program, Renderer,
    TextureHandle, UniformKind,
};

/// The vertex stage every full-screen pass shares.
pub const QUAD_VS: &str = "\
attribute vec2 position;
attribute vec2 uv;
varying vec2 vuv;
void main() {
    vuv = uv;
    gl_Position = vec4(position, 0.0, 1.0);
}
";

/// Full-screen triangle strip, uv (0,0) at the top-left.
#[derive(Clone)]
pub struct Quad {
    pub position: Rc<AttributeBuffer>,
    pub uv: Rc<AttributeBuffer>,
}

impl Quad {
    pub fn new(ctx: &Rc<GpuContext>) -> Self {
        Self {
            position: AttributeBuffer::vertex(ctx, 2, &[-1.0, 1.0, 1.0, 1.0, -1.0, -1.0, 1.0, -1.0]),
            uv: AttributeBuffer::vertex(ctx, 2, &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0]),
        }
    }
}

/// How a framebuffer's size follows the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeRule {
    Full,
    Half,
    Quarter,
    /// Each side rounded to the nearest power of two, for mip chains.
    PowerOfTwo,
}

impl SizeRule {
    pub fn apply(self, width: u32, height: u32) -> (u32, u32) {
        match self {
            SizeRule::Full => (width.max(1), height.max(1)),
            SizeRule::Half => ((width / 2).max(1), (height / 2).max(1)),
            SizeRule::Quarter => ((width / 4).max(1), (height / 4).max(1)),
            SizeRule::PowerOfTwo => (crate::gpu::to_nth_power(width), crate::gpu::to_nth_power(height)),
        }
    }
}

/// Programs, framebuffers and input shared by every stage implementation.
pub struct FilterCore {
    ctx: Rc<GpuContext>,
    quad: Option<Quad>,
    programs: BTreeMap<&'static str, Program>,
    framebuffers: BTreeMap<&'static str, (SizeRule, FrameBuffer)>,
    map: Option<TextureHandle>,
    width: u32,
    height: u32,
}

impl FilterCore {
    pub fn new(ctx: &Rc<GpuContext>, quad: &Quad, width: u32, height: u32) -> Self {
        Self {
            ctx: ctx.clone(),
            quad: Some(quad.clone()),
            programs: BTreeMap::new(),
            framebuffers: BTreeMap::new(),
            map: None,
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn context(&self) -> &Rc<GpuContext> {
        &self.ctx
    }

    pub fn quad(&self) -> Option<&Quad> {
        self.quad.as_ref()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn map(&self) -> Option<&TextureHandle> {
        self.map.as_ref()
    }

    /// Compiles a program and binds the shared quad to it when the shader
    /// has `position`/`uv` attributes.
    pub fn add_program(
        &mut self,
        name: &'static str,
        vertex: &str,
        fragment: &str,
    ) -> Result<&mut Program> {
        let mut program = Program::new(&self.ctx, name, vertex, fragment)?;
        if let Some(quad) = &self.quad {
            if program.has_attribute("position") && program.has_attribute("uv") {
                program.set_attribute_buffer("position", quad.position.clone());
                program.set_attribute_buffer("uv", quad.uv.clone());
            }
        }
        if let Some(map) = &self.map {
            bind_if_texture(&mut program, "map", map);
        }
        let slot = match self.programs.entry(name) {
            Entry::Occupied(mut entry) => {
                entry.insert(program);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(program),
        };
        Ok(slot)
    }

    pub fn add_framebuffer(&mut self, name: &'static str, rule: SizeRule, options: FrameBufferOptions) {
        let (w, h) = rule.apply(self.width, self.height);
        let fb = FrameBuffer::new(&self.ctx, name, w, h, options);
        self.framebuffers.insert(name, (rule, fb));
    }

    pub fn program(&self, name: &str) -> Option<&Program> {
        self.programs.get(name)
    }

    pub fn program_mut(&mut self, name: &str) -> Option<&mut Program> {
        self.programs.get_mut(name)
    }

    pub fn framebuffer(&self, name: &str) -> Option<&FrameBuffer> {
        self.framebuffers.get(name).map(|(_, fb)| fb)
    }

    pub fn fb_texture(&self, name: &str) -> Option<TextureHandle> {
        self.framebuffer(name).map(|fb| fb.texture().clone())
    }

    /// Sets a uniform on one program, ignoring unknown program names.
    pub fn set_uniform(
        &mut self,
        program: &str,
        name: &str,
        value: impl Into<crate::gpu::UniformValue>,
    ) -> bool {
        match self.programs.get_mut(program) {
            Some(p) => p.set_uniform(name, value),
            None => false,
        }
    }

    /// Binds `texture` to every program that samples a uniform named `name`.
    pub fn bind_texture(&mut self, name: &str, texture: &TextureHandle) {
        for program in self.programs.values_mut() {
            bind_if_texture(program, name, texture);
        }
    }

    pub(crate) fn set_map(&mut self, map: &TextureHandle) {
        self.map = Some(map.clone());
    }

    /// Renders a named program into a named framebuffer, or into the canvas
    /// when `target` is `None`.
    pub fn draw(&self, renderer: &Renderer, program: &str, target: Option<&str>) {
        let Some(program) = self.programs.get(program) else {
            tracing::warn!(program, "no such program");
            return;
        };
        match target {
            Some(name) => match self.framebuffer(name) {
                Some(fb) => renderer.render(program, Some(fb)),
                None => tracing::warn!(framebuffer = name, "no such framebuffer"),
            },
            None => renderer.render(program, None),
        }
    }

    /// Resizes every framebuffer by its rule. Same size is a no-op.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
        for (rule, fb) in self.framebuffers.values_mut() {
            let (w, h) = rule.apply(self.width, self.height);
            fb.resize(w, h);
        }
    }

    /// Drops programs and framebuffers; with `clear_buffer` also lets go of
    /// the shared quad.
    pub fn destroy(&mut self, clear_buffer: bool) {
        self.programs.clear();
        self.framebuffers.clear();
        if clear_buffer {
            self.quad = None;
        }
    }
}

fn bind_if_texture(program: &mut Program, name: &str, texture: &TextureHandle) {
    let is_texture = program
        .shader()
        .uniform(name)
        .is_some_and(|info| info.kind == UniformKind::Texture);
    if is_texture {
        program.set_uniform(name, texture);
    }
}

/// One pipeline stage.
///
/// Stages receive their input through [`Filter::set_map`] and expose their
/// result through [`Filter::output`], which is the input itself whenever the
/// stage has nothing to do.
pub trait Filter {
    fn core(&self) -> &FilterCore;

    fn core_mut(&mut self) -> &mut FilterCore;

    fn map(&self) -> Option<TextureHandle> {
        self.core().map().cloned()
    }

    /// Declares the input. Setting the handle already in place is a no-op.
    fn set_map(&mut self, map: &TextureHandle) {
        if self.core().map().is_some_and(|current| current.same(map)) {
            return;
        }
        self.core_mut().set_map(map);
        self.on_map_changed(map);
    }

    /// Called after the input changed to a different handle.
    fn on_map_changed(&mut self, map: &TextureHandle) {
        self.core_mut().bind_texture("map", map);
    }

    fn output(&self) -> Option<TextureHandle>;

    fn update_size(&mut self, renderer: &Renderer) {
        let (width, height) = renderer.get_size();
        self.core_mut().resize(width, height);
    }

    fn render(&mut self, renderer: &mut Renderer);

    fn destroy(&mut self, clear_buffer: bool) {
        self.core_mut().destroy(clear_buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::SizeRule;

    #[test]
    fn size_rules() {
        assert_eq!(SizeRule::Full.apply(640, 480), (640, 480));
        assert_eq!(SizeRule::Half.apply(640, 480), (320, 240));
        assert_eq!(SizeRule::Quarter.apply(640, 480), (160, 120));
        assert_eq!(SizeRule::PowerOfTwo.apply(640, 480), (512, 512));
        assert_eq!(SizeRule::Quarter.apply(2, 2), (1, 1));
    }
}
