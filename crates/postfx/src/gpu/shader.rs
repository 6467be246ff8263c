//! GLES-dialect stage translation.
//!
//! Filters author their stages the way WebGL 1 shaders are written:
//! `attribute`/`varying` globals, loose `uniform` declarations, `texture2D`
//! and `gl_FragColor`. wgpu wants Vulkan-flavoured GLSL 450 instead, so each
//! pair is rewritten before compilation:
//!
//! 1. Strip `#version`, `#extension` and `precision` lines.
//! 2. Give attributes `layout(location = i)` in declaration order.
//! 3. Give varyings locations by sorted name, identically in both stages.
//! 4. Merge every non-sampler uniform of both stages into one std140 block at
//!    set 0 binding 0, aliased back to its plain name with a `#define`.
//! 5. Split each `sampler2D` into a `texture2D`/`sampler` pair at bindings
//!    `2k`/`2k+1` of set 1, where `k` is the program-local texture unit.
//! 6. Emit `#line 1` before the user body so diagnostics keep user lines.
//!
//! Declarations must be one per line; that is all the built-in stages need.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use thiserror::Error;
use wgpu::naga;
use wgpu::naga::ShaderStage;

pub const PASSTHROUGH_VS: &str = "\
attribute vec2 position;
attribute vec2 uv;
varying vec2 vuv;
void main() {
    vuv = uv;
    gl_Position = vec4(position, 0.0, 1.0);
}
";

pub const PASSTHROUGH_FS: &str = "\
precision mediump float;
uniform sampler2D map;
varying vec2 vuv;
void main() {
    gl_FragColor = texture2D(map, vuv);
}
";

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("{stage} shader line {line}: {message}")]
    Syntax {
        stage: &'static str,
        line: usize,
        message: String,
    },
    #[error("{stage} shader failed to parse: {message}")]
    Parse { stage: &'static str, message: String },
    #[error("{stage} shader failed validation: {message}")]
    Validation { stage: &'static str, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
    FloatArray(u32),
    Vec2Array(u32),
    Vec3Array(u32),
    Vec4Array(u32),
    Texture,
}

impl UniformKind {
    fn parse(ty: &str, array: Option<u32>) -> Option<Self> {
        let kind = match (ty, array) {
            ("float", None) => Self::Float,
            ("int", None) => Self::Int,
            ("vec2", None) => Self::Vec2,
            ("vec3", None) => Self::Vec3,
            ("vec4", None) => Self::Vec4,
            ("mat3", None) => Self::Mat3,
            ("mat4", None) => Self::Mat4,
            ("sampler2D", None) => Self::Texture,
            ("float", Some(n)) => Self::FloatArray(n),
            ("vec2", Some(n)) => Self::Vec2Array(n),
            ("vec3", Some(n)) => Self::Vec3Array(n),
            ("vec4", Some(n)) => Self::Vec4Array(n),
            _ => return None,
        };
        Some(kind)
    }

    /// `(alignment, size)` of a member in a std140 block.
    fn std140(self) -> (u32, u32) {
        match self {
            Self::Float | Self::Int => (4, 4),
            Self::Vec2 => (8, 8),
            Self::Vec3 => (16, 12),
            Self::Vec4 => (16, 16),
            Self::Mat3 => (16, 48),
            Self::Mat4 => (16, 64),
            Self::FloatArray(n) | Self::Vec2Array(n) | Self::Vec3Array(n) | Self::Vec4Array(n) => {
                (16, 16 * n)
            }
            Self::Texture => (0, 0),
        }
    }

    /// Components stored per array element (or per value for scalars).
    pub fn components(self) -> usize {
        match self {
            Self::Float | Self::Int | Self::FloatArray(_) => 1,
            Self::Vec2 | Self::Vec2Array(_) => 2,
            Self::Vec3 | Self::Vec3Array(_) => 3,
            Self::Vec4 | Self::Vec4Array(_) => 4,
            Self::Mat3 => 9,
            Self::Mat4 => 16,
            Self::Texture => 0,
        }
    }

    fn glsl_type(self) -> &'static str {
        match self {
            Self::Float | Self::FloatArray(_) => "float",
            Self::Int => "int",
            Self::Vec2 | Self::Vec2Array(_) => "vec2",
            Self::Vec3 | Self::Vec3Array(_) => "vec3",
            Self::Vec4 | Self::Vec4Array(_) => "vec4",
            Self::Mat3 => "mat3",
            Self::Mat4 => "mat4",
            Self::Texture => "sampler2D",
        }
    }

    fn array_len(self) -> Option<u32> {
        match self {
            Self::FloatArray(n) | Self::Vec2Array(n) | Self::Vec3Array(n) | Self::Vec4Array(n) => {
                Some(n)
            }
            _ => None,
        }
    }
}

/// One reflected uniform.
///
/// `slot` is the byte offset inside the uniform block, or the texture unit
/// for samplers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformInfo {
    pub name: String,
    pub kind: UniformKind,
    pub slot: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    pub name: String,
    pub location: u32,
    /// 1 to 4 floats per vertex.
    pub components: u32,
}

#[derive(Debug, Clone)]
pub struct TranslatedShader {
    pub vertex: String,
    pub fragment: String,
    pub uniforms: Vec<UniformInfo>,
    pub attributes: Vec<AttributeInfo>,
    /// Size of the std140 block, a non-zero multiple of 16.
    pub block_size: u32,
    pub texture_units: u32,
}

impl TranslatedShader {
    pub fn uniform(&self, name: &str) -> Option<&UniformInfo> {
        self.uniforms.iter().find(|info| info.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeInfo> {
        self.attributes.iter().find(|info| info.name == name)
    }

    /// Parses and validates both generated stages with naga.
    pub fn validate(&self) -> Result<(), ShaderError> {
        validate_stage(&self.vertex, ShaderStage::Vertex)?;
        validate_stage(&self.fragment, ShaderStage::Fragment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qualifier {
    Attribute,
    Varying,
    Uniform,
}

#[derive(Debug, Clone)]
struct Declaration {
    qualifier: Qualifier,
    ty: String,
    name: String,
    array: Option<u32>,
}

struct ParsedStage {
    declarations: Vec<Declaration>,
    /// The user body with every consumed line blanked out.
    body: String,
}

/// Rewrites a vertex/fragment pair into GLSL 450 and reflects its interface.
pub fn translate(vertex: &str, fragment: &str) -> Result<TranslatedShader, ShaderError> {
    let vs = parse_stage(vertex, "vertex")?;
    let fs = parse_stage(fragment, "fragment")?;

    let mut attributes = Vec::new();
    for decl in vs
        .declarations
        .iter()
        .filter(|decl| decl.qualifier == Qualifier::Attribute)
    {
        let components = match decl.ty.as_str() {
            "float" => 1,
            "vec2" => 2,
            "vec3" => 3,
            "vec4" => 4,
            other => {
                return Err(ShaderError::Syntax {
                    stage: "vertex",
                    line: 0,
                    message: format!("attribute '{}' has unsupported type {other}", decl.name),
                })
            }
        };
        attributes.push(AttributeInfo {
            name: decl.name.clone(),
            location: attributes.len() as u32,
            components,
        });
    }

    let mut varyings: BTreeMap<String, String> = BTreeMap::new();
    for (stage, parsed) in [("vertex", &vs), ("fragment", &fs)] {
        for decl in parsed
            .declarations
            .iter()
            .filter(|decl| decl.qualifier == Qualifier::Varying)
        {
            if let Some(existing) = varyings.get(&decl.name) {
                if existing != &decl.ty {
                    return Err(ShaderError::Syntax {
                        stage,
                        line: 0,
                        message: format!(
                            "varying '{}' is {} in one stage and {} in the other",
                            decl.name, existing, decl.ty
                        ),
                    });
                }
            }
            varyings.insert(decl.name.clone(), decl.ty.clone());
        }
    }

    let mut uniforms: Vec<UniformInfo> = Vec::new();
    let mut cursor = 0u32;
    let mut texture_units = 0u32;
    for (stage, parsed) in [("vertex", &vs), ("fragment", &fs)] {
        for decl in parsed
            .declarations
            .iter()
            .filter(|decl| decl.qualifier == Qualifier::Uniform)
        {
            let kind = UniformKind::parse(&decl.ty, decl.array).ok_or_else(|| {
                ShaderError::Syntax {
                    stage,
                    line: 0,
                    message: format!("uniform '{}' has unsupported type {}", decl.name, decl.ty),
                }
            })?;
            if let Some(existing) = uniforms.iter().find(|info| info.name == decl.name) {
                if existing.kind != kind {
                    return Err(ShaderError::Syntax {
                        stage,
                        line: 0,
                        message: format!("uniform '{}' is declared with two types", decl.name),
                    });
                }
                continue;
            }
            let slot = if kind == UniformKind::Texture {
                texture_units += 1;
                texture_units - 1
            } else {
                let (align, size) = kind.std140();
                let offset = align_up(cursor, align);
                cursor = offset + size;
                offset
            };
            uniforms.push(UniformInfo {
                name: decl.name.clone(),
                kind,
                slot,
            });
        }
    }
    let block_size = align_up(cursor, 16).max(16);

    let prelude = Prelude {
        uniforms: &uniforms,
        varyings: &varyings,
    };
    let vertex = prelude.emit(ShaderStage::Vertex, &attributes, &vs.body);
    let fragment = prelude.emit(ShaderStage::Fragment, &attributes, &fs.body);

    Ok(TranslatedShader {
        vertex,
        fragment,
        uniforms,
        attributes,
        block_size,
        texture_units,
    })
}

struct Prelude<'a> {
    uniforms: &'a [UniformInfo],
    varyings: &'a BTreeMap<String, String>,
}

impl Prelude<'_> {
    fn emit(&self, stage: ShaderStage, attributes: &[AttributeInfo], body: &str) -> String {
        let mut out = String::from("#version 450\n");

        if stage == ShaderStage::Vertex {
            for attr in attributes {
                let ty = match attr.components {
                    1 => "float",
                    2 => "vec2",
                    3 => "vec3",
                    _ => "vec4",
                };
                let _ = writeln!(out, "layout(location = {}) in {ty} {};", attr.location, attr.name);
            }
        }

        let direction = if stage == ShaderStage::Vertex { "out" } else { "in" };
        for (location, (name, ty)) in self.varyings.iter().enumerate() {
            let _ = writeln!(out, "layout(location = {location}) {direction} {ty} {name};");
        }

        out.push_str("layout(std140, set = 0, binding = 0) uniform FxParams {\n");
        let mut any_member = false;
        for info in self.uniforms.iter().filter(|u| u.kind != UniformKind::Texture) {
            any_member = true;
            let suffix = info
                .kind
                .array_len()
                .map(|n| format!("[{n}]"))
                .unwrap_or_default();
            let _ = writeln!(out, "    {} fx_u_{}{suffix};", info.kind.glsl_type(), info.name);
        }
        if !any_member {
            out.push_str("    float fx_u_unused;\n");
        }
        out.push_str("} fx_params;\n");
        for info in self.uniforms.iter().filter(|u| u.kind != UniformKind::Texture) {
            let _ = writeln!(out, "#define {0} fx_params.fx_u_{0}", info.name);
        }

        for info in self.uniforms.iter().filter(|u| u.kind == UniformKind::Texture) {
            let binding = info.slot * 2;
            let _ = writeln!(
                out,
                "layout(set = 1, binding = {binding}) uniform texture2D fx_t_{};",
                info.name
            );
            let _ = writeln!(
                out,
                "layout(set = 1, binding = {}) uniform sampler fx_s_{};",
                binding + 1,
                info.name
            );
            let _ = writeln!(out, "#define {0} sampler2D(fx_t_{0}, fx_s_{0})", info.name);
        }

        if stage == ShaderStage::Fragment {
            out.push_str("layout(location = 0) out vec4 fx_FragColor;\n");
        }

        out.push_str("#line 1\n");
        let mut body = replace_ident(body, "texture2DLodEXT", "textureLod");
        body = replace_ident(&body, "texture2D", "texture");
        if stage == ShaderStage::Fragment {
            body = replace_ident(&body, "gl_FragColor", "fx_FragColor");
        }
        out.push_str(&body);
        out
    }
}

fn parse_stage(source: &str, stage: &'static str) -> Result<ParsedStage, ShaderError> {
    let mut declarations = Vec::new();
    let mut body = String::with_capacity(source.len());
    for (index, line) in source.lines().enumerate() {
        let trimmed = line.trim();
        let consumed = if trimmed.starts_with("#version")
            || trimmed.starts_with("#extension")
            || trimmed.starts_with("precision ")
        {
            true
        } else if let Some(qualifier) = leading_qualifier(trimmed) {
            declarations.push(parse_declaration(trimmed, qualifier).map_err(|message| {
                ShaderError::Syntax {
                    stage,
                    line: index + 1,
                    message,
                }
            })?);
            true
        } else {
            false
        };
        if !consumed {
            body.push_str(line);
        }
        body.push('\n');
    }
    Ok(ParsedStage { declarations, body })
}

fn leading_qualifier(line: &str) -> Option<Qualifier> {
    let word = line.split_whitespace().next()?;
    match word {
        "attribute" => Some(Qualifier::Attribute),
        "varying" => Some(Qualifier::Varying),
        "uniform" => Some(Qualifier::Uniform),
        _ => None,
    }
}

fn parse_declaration(line: &str, qualifier: Qualifier) -> Result<Declaration, String> {
    let code = line.split("//").next().unwrap_or(line).trim();
    let statement = code
        .strip_suffix(';')
        .ok_or_else(|| format!("declaration must end with ';': {line}"))?;
    if statement.contains(',') {
        return Err(format!("declare one name per line: {line}"));
    }
    let words: Vec<&str> = statement
        .split_whitespace()
        .skip(1)
        .filter(|word| !matches!(*word, "lowp" | "mediump" | "highp"))
        .collect();
    let [ty, name] = words.as_slice() else {
        return Err(format!("expected '<type> <name>': {line}"));
    };
    let (name, array) = match name.split_once('[') {
        Some((base, rest)) => {
            let len = rest
                .strip_suffix(']')
                .and_then(|n| n.trim().parse::<u32>().ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| format!("array size must be a positive literal: {line}"))?;
            (base.to_string(), Some(len))
        }
        None => (name.to_string(), None),
    };
    Ok(Declaration {
        qualifier,
        ty: ty.to_string(),
        name,
        array,
    })
}

/// Replaces whole identifiers only, so `texture2D` never touches
/// `texture2DLodEXT` or `my_texture2D`.
fn replace_ident(source: &str, from: &str, to: &str) -> String {
    let is_ident = |ch: char| ch.is_ascii_alphanumeric() || ch == '_';
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(pos) = rest.find(from) {
        let before_ok = rest[..pos].chars().next_back().map_or(true, |ch| !is_ident(ch));
        let after = &rest[pos + from.len()..];
        let after_ok = after.chars().next().map_or(true, |ch| !is_ident(ch));
        out.push_str(&rest[..pos]);
        out.push_str(if before_ok && after_ok { to } else { from });
        rest = after;
    }
    out.push_str(rest);
    out
}

fn align_up(value: u32, align: u32) -> u32 {
    if align == 0 {
        return value;
    }
    value.div_ceil(align) * align
}

fn stage_name(stage: ShaderStage) -> &'static str {
    match stage {
        ShaderStage::Vertex => "vertex",
        ShaderStage::Fragment => "fragment",
        _ => "compute",
    }
}

fn validate_stage(source: &str, stage: ShaderStage) -> Result<(), ShaderError> {
    let mut frontend = naga::front::glsl::Frontend::default();
    let module = frontend
        .parse(&naga::front::glsl::Options::from(stage), source)
        .map_err(|errors| ShaderError::Parse {
            stage: stage_name(stage),
            message: format!("{errors:?}"),
        })?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|err| ShaderError::Validation {
        stage: stage_name(stage),
        message: err.as_inner().to_string(),
    })?;
    Ok(())
}

/// The source with right-aligned line numbers, for compile diagnostics.
pub(crate) fn numbered(source: &str) -> String {
    let mut out = String::with_capacity(source.len() + source.len() / 4);
    for (index, line) in source.lines().enumerate() {
        let _ = writeln!(out, "{:4} | {line}", index + 1);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: &str = "\
attribute vec2 position;
attribute vec2 uv;
attribute float depth;
varying vec2 vuv;
varying float vdepth;
uniform vec2 size;
void main() {
    vuv = uv;
    vdepth = depth;
    gl_Position = vec4(position / size, depth, 1.0);
}
";

    const FS: &str = "\
precision highp float;
uniform sampler2D map;
uniform float intensity;
uniform vec3 tint;
uniform float after;
uniform vec4 eyes[2];
uniform sampler2D lut;
uniform vec2 size;
varying vec2 vuv;
varying float vdepth;
void main() {
    vec4 base = texture2D(map, vuv) + texture2D(lut, vuv) * eyes[1].x;
    gl_FragColor = vec4(base.rgb * tint * intensity + after, vdepth);
}
";

    #[test]
    fn reflects_std140_layout() {
        let shader = translate(VS, FS).unwrap();
        let slot = |name: &str| shader.uniform(name).unwrap().slot;
        assert_eq!(slot("size"), 0);
        assert_eq!(slot("intensity"), 8);
        // vec3 aligns to 16 and leaves room for a trailing float
        assert_eq!(slot("tint"), 16);
        assert_eq!(slot("after"), 28);
        assert_eq!(slot("eyes"), 32);
        assert_eq!(shader.block_size, 64);
        assert_eq!(shader.uniform("eyes").unwrap().kind, UniformKind::Vec4Array(2));
    }

    #[test]
    fn texture_units_follow_declaration_order() {
        let shader = translate(VS, FS).unwrap();
        assert_eq!(shader.texture_units, 2);
        assert_eq!(shader.uniform("map").unwrap().slot, 0);
        assert_eq!(shader.uniform("lut").unwrap().slot, 1);
        assert!(shader.fragment.contains("binding = 2) uniform texture2D fx_t_lut"));
        assert!(shader.fragment.contains("binding = 3) uniform sampler fx_s_lut"));
    }

    #[test]
    fn varyings_share_sorted_locations() {
        let shader = translate(VS, FS).unwrap();
        assert!(shader.vertex.contains("layout(location = 0) out float vdepth;"));
        assert!(shader.vertex.contains("layout(location = 1) out vec2 vuv;"));
        assert!(shader.fragment.contains("layout(location = 0) in float vdepth;"));
        assert!(shader.fragment.contains("layout(location = 1) in vec2 vuv;"));
        let depth = shader.attribute("depth").unwrap();
        assert_eq!((depth.location, depth.components), (2, 1));
    }

    #[test]
    fn body_keeps_user_line_numbers() {
        let shader = translate(VS, FS).unwrap();
        let body = shader.fragment.split("#line 1\n").nth(1).unwrap();
        let line = body.lines().position(|l| l.contains("fx_FragColor =")).unwrap();
        assert_eq!(line + 1, 13);
        assert!(!body.contains("texture2D("));
        assert!(!body.contains("precision"));
    }

    #[test]
    fn conflicting_declarations_are_rejected() {
        let fs = "uniform vec3 size;\nvoid main() { gl_FragColor = vec4(size, 1.0); }\n";
        assert!(matches!(translate(VS, fs), Err(ShaderError::Syntax { .. })));
        let fs = "uniform float a, b;\nvoid main() {}\n";
        assert!(matches!(
            translate(VS, fs),
            Err(ShaderError::Syntax { line: 1, .. })
        ));
    }

    #[test]
    fn identifiers_are_replaced_whole() {
        assert_eq!(
            replace_ident("texture2D(a) my_texture2D texture2DLodEXT(b)", "texture2D", "texture"),
            "texture(a) my_texture2D texture2DLodEXT(b)"
        );
    }

    #[test]
    fn passthrough_validates() {
        let shader = translate(PASSTHROUGH_VS, PASSTHROUGH_FS).unwrap();
        shader.validate().unwrap();
    }

    #[test]
    fn broken_body_fails_validation() {
        let fs = "uniform sampler2D map;\nvarying vec2 vuv;\nvoid main() { gl_FragColor = undefined_call(vuv); }\n";
        let shader = translate(PASSTHROUGH_VS, fs).unwrap();
        assert!(shader.validate().is_err());
    }

    #[test]
    fn numbered_source_is_one_based() {
        let text = numbered("a\nb\n");
        assert_eq!(text, "   1 | a\n   2 | b\n");
    }
}
