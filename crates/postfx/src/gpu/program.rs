use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use wgpu::naga::ShaderStage;

use super::context::GpuContext;
use super::shader::{
    self, ShaderError, TranslatedShader, UniformInfo, UniformKind, PASSTHROUGH_FS, PASSTHROUGH_VS,
};
use super::stats::{ResourceKind, StatGuard};
use super::texture::TextureHandle;
use super::{COLOR_FORMAT, DEPTH_FORMAT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferTarget {
    Vertex,
    Index,
}

struct BufferState {
    buffer: wgpu::Buffer,
    capacity: u64,
    len: u64,
}

/// GPU buffer of per-vertex floats or `u32` indices.
///
/// Shared through `Rc` so several programs can draw the same geometry.
pub struct AttributeBuffer {
    ctx: Rc<GpuContext>,
    target: BufferTarget,
    item_size: u32,
    state: RefCell<BufferState>,
    _guard: StatGuard,
}

impl fmt::Debug for AttributeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeBuffer")
            .field("target", &self.target)
            .field("item_size", &self.item_size)
            .field("count", &self.count())
            .finish()
    }
}

impl AttributeBuffer {
    pub fn vertex(ctx: &Rc<GpuContext>, item_size: u32, data: &[f32]) -> Rc<Self> {
        let buffer = Self::allocate(ctx, BufferTarget::Vertex, item_size.clamp(1, 4));
        buffer.write(bytemuck::cast_slice(data));
        Rc::new(buffer)
    }

    pub fn index(ctx: &Rc<GpuContext>, data: &[u32]) -> Rc<Self> {
        let buffer = Self::allocate(ctx, BufferTarget::Index, 1);
        buffer.write(bytemuck::cast_slice(data));
        Rc::new(buffer)
    }

    fn allocate(ctx: &Rc<GpuContext>, target: BufferTarget, item_size: u32) -> Self {
        let capacity = 256;
        Self {
            ctx: ctx.clone(),
            target,
            item_size,
            state: RefCell::new(BufferState {
                buffer: create_buffer(ctx, target, capacity),
                capacity,
                len: 0,
            }),
            _guard: ctx.stats().track(ResourceKind::Buffer),
        }
    }

    pub fn target(&self) -> BufferTarget {
        self.target
    }

    pub fn item_size(&self) -> u32 {
        self.item_size
    }

    /// Vertices for vertex buffers, indices for index buffers.
    pub fn count(&self) -> u32 {
        let len = self.state.borrow().len;
        (len / (4 * u64::from(self.item_size))) as u32
    }

    pub fn update(&self, data: &[f32]) {
        if self.target != BufferTarget::Vertex {
            tracing::warn!("float data written to an index buffer; ignored");
            return;
        }
        self.write(bytemuck::cast_slice(data));
    }

    pub fn update_indices(&self, data: &[u32]) {
        if self.target != BufferTarget::Index {
            tracing::warn!("index data written to a vertex buffer; ignored");
            return;
        }
        self.write(bytemuck::cast_slice(data));
    }

    fn write(&self, bytes: &[u8]) {
        let mut state = self.state.borrow_mut();
        let needed = bytes.len() as u64;
        if needed > state.capacity {
            let capacity = needed.next_power_of_two();
            state.buffer = create_buffer(&self.ctx, self.target, capacity);
            state.capacity = capacity;
        }
        if !bytes.is_empty() {
            self.ctx.queue.write_buffer(&state.buffer, 0, bytes);
        }
        state.len = needed;
    }

    pub(crate) fn buffer(&self) -> wgpu::Buffer {
        self.state.borrow().buffer.clone()
    }
}

fn create_buffer(ctx: &GpuContext, target: BufferTarget, size: u64) -> wgpu::Buffer {
    let usage = match target {
        BufferTarget::Vertex => wgpu::BufferUsages::VERTEX,
        BufferTarget::Index => wgpu::BufferUsages::INDEX,
    };
    ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("attribute buffer"),
        size,
        usage: usage | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// A value assignable to a reflected uniform.
#[derive(Debug, Clone)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    /// Column-major.
    Mat3([f32; 9]),
    Mat4([f32; 16]),
    /// Flattened elements of any sized array uniform.
    Floats(Vec<f32>),
    Texture(TextureHandle),
}

impl PartialEq for UniformValue {
    fn eq(&self, other: &Self) -> bool {
        use UniformValue::*;
        match (self, other) {
            (Float(a), Float(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Vec2(a), Vec2(b)) => a == b,
            (Vec3(a), Vec3(b)) => a == b,
            (Vec4(a), Vec4(b)) => a == b,
            (Mat3(a), Mat3(b)) => a == b,
            (Mat4(a), Mat4(b)) => a == b,
            (Floats(a), Floats(b)) => a == b,
            (Texture(a), Texture(b)) => a.same(b),
            _ => false,
        }
    }
}

impl UniformValue {
    fn fits(&self, kind: UniformKind) -> bool {
        matches!(
            (self, kind),
            (UniformValue::Float(_), UniformKind::Float)
                | (UniformValue::Int(_), UniformKind::Int)
                | (UniformValue::Vec2(_), UniformKind::Vec2)
                | (UniformValue::Vec3(_), UniformKind::Vec3)
                | (UniformValue::Vec4(_), UniformKind::Vec4)
                | (UniformValue::Mat3(_), UniformKind::Mat3)
                | (UniformValue::Mat4(_), UniformKind::Mat4)
                | (
                    UniformValue::Floats(_),
                    UniformKind::FloatArray(_)
                        | UniformKind::Vec2Array(_)
                        | UniformKind::Vec3Array(_)
                        | UniformKind::Vec4Array(_)
                )
                | (UniformValue::Texture(_), UniformKind::Texture)
        )
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        UniformValue::Float(value)
    }
}

impl From<i32> for UniformValue {
    fn from(value: i32) -> Self {
        UniformValue::Int(value)
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(value: [f32; 2]) -> Self {
        UniformValue::Vec2(value)
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(value: [f32; 3]) -> Self {
        UniformValue::Vec3(value)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(value: [f32; 4]) -> Self {
        UniformValue::Vec4(value)
    }
}

impl From<[f32; 9]> for UniformValue {
    fn from(value: [f32; 9]) -> Self {
        UniformValue::Mat3(value)
    }
}

impl From<[f32; 16]> for UniformValue {
    fn from(value: [f32; 16]) -> Self {
        UniformValue::Mat4(value)
    }
}

impl From<Vec<f32>> for UniformValue {
    fn from(value: Vec<f32>) -> Self {
        UniformValue::Floats(value)
    }
}

impl From<Vec<[f32; 4]>> for UniformValue {
    fn from(value: Vec<[f32; 4]>) -> Self {
        UniformValue::Floats(value.into_iter().flatten().collect())
    }
}

impl From<TextureHandle> for UniformValue {
    fn from(value: TextureHandle) -> Self {
        UniformValue::Texture(value)
    }
}

impl From<&TextureHandle> for UniformValue {
    fn from(value: &TextureHandle) -> Self {
        UniformValue::Texture(value.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Blend {
    #[default]
    None,
    Alpha,
    Additive,
}

impl Blend {
    fn state(self) -> Option<wgpu::BlendState> {
        match self {
            Blend::None => None,
            Blend::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
            Blend::Additive => {
                let add = wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                };
                Some(wgpu::BlendState {
                    color: add,
                    alpha: add,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthTest {
    Less,
    LessEqual,
}

/// Vertex and index counts handed to a custom draw callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramBuffers {
    pub vertex_count: u32,
    pub index_count: u32,
}

pub type CustomDraw = Box<dyn Fn(&mut wgpu::RenderPass<'_>, &ProgramBuffers)>;

pub enum DrawMode {
    /// Triangle strip over the bound `position`/`uv` quad.
    Quad,
    /// Triangle list through the buffer given to `set_indices`.
    Indexed,
    /// Vertex and index buffers are bound; the callback issues the draws.
    Custom {
        topology: wgpu::PrimitiveTopology,
        draw: CustomDraw,
    },
}

impl fmt::Debug for DrawMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrawMode::Quad => f.write_str("Quad"),
            DrawMode::Indexed => f.write_str("Indexed"),
            DrawMode::Custom { topology, .. } => write!(f, "Custom({topology:?})"),
        }
    }
}

impl DrawMode {
    fn topology(&self) -> wgpu::PrimitiveTopology {
        match self {
            DrawMode::Quad => wgpu::PrimitiveTopology::TriangleStrip,
            DrawMode::Indexed => wgpu::PrimitiveTopology::TriangleList,
            DrawMode::Custom { topology, .. } => *topology,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    topology: wgpu::PrimitiveTopology,
    blend: Blend,
    depth_attachment: bool,
    depth: Option<DepthTest>,
}

/// Compiled GPU side of one shader pair.
struct Compiled {
    shader: TranslatedShader,
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    texture_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    uniform_buffer: wgpu::Buffer,
    uniform_group: wgpu::BindGroup,
}

/// A vertex/fragment pair plus everything needed to draw it: uniform
/// values, texture units, attribute buffers and cached pipelines.
pub struct Program {
    ctx: Rc<GpuContext>,
    label: String,
    compiled: Compiled,
    fallback: bool,
    block: Vec<u8>,
    values: BTreeMap<String, UniformValue>,
    textures: Vec<Option<TextureHandle>>,
    attributes: BTreeMap<String, Rc<AttributeBuffer>>,
    indices: Option<Rc<AttributeBuffer>>,
    draw_mode: DrawMode,
    blend: Blend,
    depth: Option<DepthTest>,
    pipelines: RefCell<HashMap<PipelineKey, Option<wgpu::RenderPipeline>>>,
    placeholder: RefCell<Option<TextureHandle>>,
    _guard: StatGuard,
}

impl Program {
    /// Compiles the pair, substituting the pass-through shader when it does
    /// not compile. Fails only if even the pass-through cannot be built.
    pub fn new(
        ctx: &Rc<GpuContext>,
        label: impl Into<String>,
        vertex: &str,
        fragment: &str,
    ) -> Result<Self> {
        let label = label.into();
        let (compiled, fallback) = compile_or_fallback(ctx, &label, vertex, fragment)?;
        let mut program = Self {
            ctx: ctx.clone(),
            label,
            block: vec![0; compiled.shader.block_size as usize],
            textures: vec![None; compiled.shader.texture_units as usize],
            compiled,
            fallback,
            values: BTreeMap::new(),
            attributes: BTreeMap::new(),
            indices: None,
            draw_mode: DrawMode::Quad,
            blend: Blend::None,
            depth: None,
            pipelines: RefCell::new(HashMap::new()),
            placeholder: RefCell::new(None),
            _guard: ctx.stats().track(ResourceKind::Program),
        };
        program.reapply_values();
        Ok(program)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// True when the last compile failed and the pass-through shader runs.
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn shader(&self) -> &TranslatedShader {
        &self.compiled.shader
    }

    /// Recompiles. Uniform values whose name and kind survive are kept.
    pub fn set_shader(&mut self, vertex: &str, fragment: &str) -> Result<()> {
        let (compiled, fallback) = compile_or_fallback(&self.ctx, &self.label, vertex, fragment)?;
        self.block = vec![0; compiled.shader.block_size as usize];
        self.textures = vec![None; compiled.shader.texture_units as usize];
        self.compiled = compiled;
        self.fallback = fallback;
        self.pipelines.borrow_mut().clear();
        self.reapply_values();
        let names: Vec<String> = self.attributes.keys().cloned().collect();
        for name in names {
            if self.compiled.shader.attribute(&name).is_none() {
                self.attributes.remove(&name);
            }
        }
        Ok(())
    }

    fn reapply_values(&mut self) {
        let values = std::mem::take(&mut self.values);
        for (name, value) in values {
            let Some(info) = self.compiled.shader.uniform(&name).cloned() else {
                continue;
            };
            if value.fits(info.kind) {
                self.store(&info, &value);
                self.values.insert(name, value);
            }
        }
    }

    pub fn has_uniform(&self, name: &str) -> bool {
        self.compiled.shader.uniform(name).is_some()
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.compiled.shader.attribute(name).is_some()
    }

    /// Sets a uniform by name. Unknown names and kind mismatches warn and
    /// leave the program unchanged; the return value tells which happened.
    pub fn set_uniform(&mut self, name: &str, value: impl Into<UniformValue>) -> bool {
        let value = value.into();
        let Some(info) = self.compiled.shader.uniform(name).cloned() else {
            tracing::warn!(program = %self.label, uniform = name, "unknown uniform; ignored");
            return false;
        };
        if !value.fits(info.kind) {
            tracing::warn!(
                program = %self.label,
                uniform = name,
                expected = ?info.kind,
                "uniform kind mismatch; ignored"
            );
            return false;
        }
        self.store(&info, &value);
        self.values.insert(name.to_string(), value);
        true
    }

    pub fn get_uniform(&self, name: &str) -> Option<UniformValue> {
        self.values.get(name).cloned()
    }

    fn store(&mut self, info: &UniformInfo, value: &UniformValue) {
        let offset = info.slot as usize;
        let block = &mut self.block;
        let mut put_bytes = |at: usize, bytes: [u8; 4]| {
            if let Some(dst) = block.get_mut(at..at + 4) {
                dst.copy_from_slice(&bytes);
            }
        };
        let mut put = |at: usize, v: f32| put_bytes(at, v.to_le_bytes());
        match value {
            UniformValue::Float(v) => put(offset, *v),
            // same bit pattern as the i32
            UniformValue::Int(v) => put(offset, f32::from_bits(*v as u32)),
            UniformValue::Vec2(v) => v.iter().enumerate().for_each(|(i, c)| put(offset + 4 * i, *c)),
            UniformValue::Vec3(v) => v.iter().enumerate().for_each(|(i, c)| put(offset + 4 * i, *c)),
            UniformValue::Vec4(v) => v.iter().enumerate().for_each(|(i, c)| put(offset + 4 * i, *c)),
            UniformValue::Mat3(m) => {
                // std140 pads each column to a vec4
                for (i, c) in m.iter().enumerate() {
                    put(offset + 16 * (i / 3) + 4 * (i % 3), *c);
                }
            }
            UniformValue::Mat4(m) => m.iter().enumerate().for_each(|(i, c)| put(offset + 4 * i, *c)),
            UniformValue::Floats(values) => {
                let per = info.kind.components();
                let len = match info.kind {
                    UniformKind::FloatArray(n)
                    | UniformKind::Vec2Array(n)
                    | UniformKind::Vec3Array(n)
                    | UniformKind::Vec4Array(n) => n as usize,
                    _ => 0,
                };
                for (element, chunk) in values.chunks(per).take(len).enumerate() {
                    for (component, c) in chunk.iter().enumerate() {
                        put(offset + 16 * element + 4 * component, *c);
                    }
                }
            }
            UniformValue::Texture(handle) => {
                if let Some(unit) = self.textures.get_mut(info.slot as usize) {
                    *unit = Some(handle.clone());
                }
            }
        }
    }

    /// Binds a shared buffer to a named attribute.
    pub fn set_attribute_buffer(&mut self, name: &str, buffer: Rc<AttributeBuffer>) -> bool {
        let Some(info) = self.compiled.shader.attribute(name) else {
            tracing::warn!(program = %self.label, attribute = name, "unknown attribute; ignored");
            return false;
        };
        if info.components != buffer.item_size() {
            tracing::warn!(
                program = %self.label,
                attribute = name,
                expected = info.components,
                actual = buffer.item_size(),
                "attribute size mismatch; ignored"
            );
            return false;
        }
        self.attributes.insert(name.to_string(), buffer);
        true
    }

    pub fn attribute_buffer(&self, name: &str) -> Option<&Rc<AttributeBuffer>> {
        self.attributes.get(name)
    }

    /// Rewrites the data of a named attribute, creating an owned buffer the
    /// first time.
    pub fn update_attribute(&mut self, name: &str, data: &[f32]) -> bool {
        if let Some(buffer) = self.attributes.get(name) {
            buffer.update(data);
            return true;
        }
        let Some(info) = self.compiled.shader.attribute(name) else {
            tracing::warn!(program = %self.label, attribute = name, "unknown attribute; ignored");
            return false;
        };
        let buffer = AttributeBuffer::vertex(&self.ctx, info.components, data);
        self.attributes.insert(name.to_string(), buffer);
        true
    }

    pub fn set_indices(&mut self, indices: Rc<AttributeBuffer>) {
        if indices.target() != BufferTarget::Index {
            tracing::warn!(program = %self.label, "vertex buffer passed as indices; ignored");
            return;
        }
        self.indices = Some(indices);
    }

    pub fn update_indices(&mut self, data: &[u32]) {
        match &self.indices {
            Some(indices) => indices.update_indices(data),
            None => self.indices = Some(AttributeBuffer::index(&self.ctx, data)),
        }
    }

    pub fn set_draw_mode(&mut self, mode: DrawMode) {
        self.draw_mode = mode;
    }

    pub fn set_blend(&mut self, blend: Blend) {
        self.blend = blend;
    }

    pub fn set_depth_test(&mut self, depth: Option<DepthTest>) {
        self.depth = depth;
    }

    /// Drops every attribute and index binding.
    pub fn clear_buffers(&mut self) {
        self.attributes.clear();
        self.indices = None;
    }

    pub(crate) fn flush_uniforms(&self) {
        self.ctx
            .queue
            .write_buffer(&self.compiled.uniform_buffer, 0, &self.block);
    }

    /// Records this program's draw into `pass`. Returns false when the draw
    /// was skipped.
    pub(crate) fn encode(&self, pass: &mut wgpu::RenderPass<'_>, depth_attachment: bool) -> bool {
        let key = PipelineKey {
            topology: self.draw_mode.topology(),
            blend: self.blend,
            depth_attachment,
            depth: self.depth.filter(|_| depth_attachment),
        };
        let Some(pipeline) = self.pipeline(key) else {
            return false;
        };

        let mut vertex_count = u32::MAX;
        for info in &self.compiled.shader.attributes {
            let Some(buffer) = self.attributes.get(&info.name) else {
                tracing::warn!(
                    program = %self.label,
                    attribute = %info.name,
                    "attribute has no buffer; draw skipped"
                );
                return false;
            };
            vertex_count = vertex_count.min(buffer.count());
            pass.set_vertex_buffer(info.location, buffer.buffer().slice(..));
        }
        if vertex_count == u32::MAX {
            vertex_count = 0;
        }
        let index_count = self.indices.as_ref().map_or(0, |indices| indices.count());
        if let Some(indices) = &self.indices {
            pass.set_index_buffer(indices.buffer().slice(..), wgpu::IndexFormat::Uint32);
        }

        let texture_group = self.texture_group();
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &self.compiled.uniform_group, &[]);
        pass.set_bind_group(1, &texture_group, &[]);

        match &self.draw_mode {
            DrawMode::Quad => {
                if vertex_count > 0 {
                    pass.draw(0..vertex_count, 0..1);
                }
            }
            DrawMode::Indexed => {
                if self.indices.is_none() {
                    tracing::warn!(program = %self.label, "indexed draw without indices; skipped");
                    return false;
                }
                if index_count > 0 {
                    pass.draw_indexed(0..index_count, 0, 0..1);
                }
            }
            DrawMode::Custom { draw, .. } => draw(
                pass,
                &ProgramBuffers {
                    vertex_count,
                    index_count,
                },
            ),
        }
        true
    }

    fn texture_group(&self) -> wgpu::BindGroup {
        let mut bindings = Vec::with_capacity(self.textures.len());
        for unit in &self.textures {
            let handle = match unit {
                Some(handle) => handle.clone(),
                None => self.placeholder(),
            };
            let binding = handle
                .binding(&self.ctx)
                .or_else(|| self.placeholder().binding(&self.ctx));
            bindings.push(binding);
        }
        let mut entries = Vec::with_capacity(bindings.len() * 2);
        for (unit, binding) in bindings.iter().enumerate() {
            if let Some((view, sampler)) = binding {
                entries.push(wgpu::BindGroupEntry {
                    binding: (unit as u32) * 2,
                    resource: wgpu::BindingResource::TextureView(view),
                });
                entries.push(wgpu::BindGroupEntry {
                    binding: (unit as u32) * 2 + 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                });
            }
        }
        self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("program textures"),
            layout: &self.compiled.texture_layout,
            entries: &entries,
        })
    }

    /// Transparent 1×1 texture bound to units nobody assigned.
    fn placeholder(&self) -> TextureHandle {
        self.placeholder
            .borrow_mut()
            .get_or_insert_with(|| TextureHandle::from_color("placeholder", [0.0; 4]))
            .clone()
    }

    fn pipeline(&self, key: PipelineKey) -> Option<wgpu::RenderPipeline> {
        if let Some(cached) = self.pipelines.borrow().get(&key) {
            return cached.clone();
        }
        let built = self.build_pipeline(key);
        self.pipelines.borrow_mut().insert(key, built.clone());
        built
    }

    fn build_pipeline(&self, key: PipelineKey) -> Option<wgpu::RenderPipeline> {
        tracing::debug!(program = %self.label, ?key, "building render pipeline");
        let compiled = &self.compiled;
        let attributes: Vec<[wgpu::VertexAttribute; 1]> = compiled
            .shader
            .attributes
            .iter()
            .map(|info| {
                [wgpu::VertexAttribute {
                    format: match info.components {
                        1 => wgpu::VertexFormat::Float32,
                        2 => wgpu::VertexFormat::Float32x2,
                        3 => wgpu::VertexFormat::Float32x3,
                        _ => wgpu::VertexFormat::Float32x4,
                    },
                    offset: 0,
                    shader_location: info.location,
                }]
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout<'_>> = compiled
            .shader
            .attributes
            .iter()
            .zip(&attributes)
            .map(|(info, attribute)| wgpu::VertexBufferLayout {
                array_stride: u64::from(info.components) * 4,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: attribute,
            })
            .collect();

        let depth_stencil = key.depth_attachment.then(|| wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: key.depth.is_some(),
            depth_compare: match key.depth {
                Some(DepthTest::Less) => wgpu::CompareFunction::Less,
                Some(DepthTest::LessEqual) => wgpu::CompareFunction::LessEqual,
                None => wgpu::CompareFunction::Always,
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let (pipeline, error) = self.ctx.scoped(|device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&self.label),
                layout: Some(&compiled.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &compiled.vertex,
                    entry_point: Some("main"),
                    buffers: &buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: key.topology,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil,
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                fragment: Some(wgpu::FragmentState {
                    module: &compiled.fragment,
                    entry_point: Some("main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: key.blend.state(),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            })
        });
        match error {
            Some(error) => {
                tracing::warn!(program = %self.label, %error, "render pipeline rejected");
                None
            }
            None => Some(pipeline),
        }
    }
}

fn compile_or_fallback(
    ctx: &Rc<GpuContext>,
    label: &str,
    vertex: &str,
    fragment: &str,
) -> Result<(Compiled, bool)> {
    match compile(ctx, label, vertex, fragment) {
        Ok(compiled) => Ok((compiled, false)),
        Err(error) => {
            let source = match &error {
                CompileError::Shader(err) if err_stage(err) == "vertex" => vertex,
                _ => fragment,
            };
            tracing::warn!(
                program = label,
                %error,
                source = %shader::numbered(source),
                "shader failed to compile; using pass-through"
            );
            let compiled = compile(ctx, label, PASSTHROUGH_VS, PASSTHROUGH_FS)
                .map_err(|err| anyhow!("pass-through shader failed to compile: {err}"))?;
            Ok((compiled, true))
        }
    }
}

fn err_stage(error: &ShaderError) -> &'static str {
    match error {
        ShaderError::Syntax { stage, .. }
        | ShaderError::Parse { stage, .. }
        | ShaderError::Validation { stage, .. } => stage,
    }
}

#[derive(Debug)]
enum CompileError {
    Shader(ShaderError),
    Device(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Shader(err) => err.fmt(f),
            CompileError::Device(message) => write!(f, "device rejected shader: {message}"),
        }
    }
}

fn compile(
    ctx: &GpuContext,
    label: &str,
    vertex: &str,
    fragment: &str,
) -> Result<Compiled, CompileError> {
    let shader = shader::translate(vertex, fragment).map_err(CompileError::Shader)?;
    shader.validate().map_err(CompileError::Shader)?;

    let ((vertex_module, fragment_module), error) = ctx.scoped(|device| {
        let module = |source: &str, stage| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Glsl {
                    shader: Cow::Owned(source.to_string()),
                    stage,
                    defines: &[],
                },
            })
        };
        (
            module(&shader.vertex, ShaderStage::Vertex),
            module(&shader.fragment, ShaderStage::Fragment),
        )
    });
    if let Some(error) = error {
        return Err(CompileError::Device(error));
    }

    let device = &ctx.device;
    let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("uniform layout"),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
    });
    let mut texture_entries = Vec::with_capacity(shader.texture_units as usize * 2);
    for unit in 0..shader.texture_units {
        texture_entries.push(wgpu::BindGroupLayoutEntry {
            binding: unit * 2,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        texture_entries.push(wgpu::BindGroupLayoutEntry {
            binding: unit * 2 + 1,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("texture layout"),
        entries: &texture_entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("program pipeline layout"),
        bind_group_layouts: &[&uniform_layout, &texture_layout],
        push_constant_ranges: &[],
    });
    let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("uniform block"),
        size: u64::from(shader.block_size),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("uniform bind group"),
        layout: &uniform_layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform_buffer.as_entire_binding(),
        }],
    });

    Ok(Compiled {
        shader,
        vertex: vertex_module,
        fragment: fragment_module,
        texture_layout,
        pipeline_layout,
        uniform_buffer,
        uniform_group,
    })
}
