use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::Result;
use facewarp::mesh::Z_OUTLINE;
use facewarp::{
    split_faces, warp_face, FaceLandmarks, FaceMesh, FeatureParas, Knob, KnobSet, MaskMesh,
};

use crate::filter::{Filter, FilterCore, Quad, SizeRule, QUAD_VS};
use crate::gpu::{
    Blend, DepthTest, DrawMode, FrameBufferOptions, GpuContext, ProgramBuffers, Renderer,
    TextureHandle,
};

// Mesh stages take frame-pixel positions; uv (0,0) is the top-left corner
// and maps to NDC (-1, 1).
const MORPH_VS: &str = "\
attribute vec2 position;
attribute vec2 tPosition;
attribute float zIndex;
uniform vec2 size;
varying vec2 vuv;
void main() {
    vuv = position / size;
    vec2 target = tPosition / size;
    gl_Position = vec4(target.x * 2.0 - 1.0, 1.0 - target.y * 2.0, zIndex, 1.0);
}
";

const MORPH_FS: &str = "\
precision highp float;
uniform sampler2D map;
uniform sampler2D eyeTeethMaskMap;
uniform float eyeIntensity;
uniform float teethIntensity;
varying vec2 vuv;
void main() {
    vec4 color = texture2D(map, vuv);
    vec4 mask = texture2D(eyeTeethMaskMap, vuv);
    float teeth = teethIntensity * mask.a * step(0.001, mask.r);
    float eye = eyeIntensity * mask.a * step(0.001, mask.g);

    float luma = dot(color.rgb, vec3(0.299, 0.587, 0.114));
    vec3 whitened = min(mix(color.rgb, vec3(luma), 0.6) * 1.15 + 0.05, vec3(1.0));
    vec3 rgb = mix(color.rgb, whitened, teeth);

    vec3 brightened = clamp(rgb - vec3(0.5), -0.25, 0.5) * (1.0 + eye) + vec3(0.5);
    rgb = mix(rgb, brightened, step(0.0001, eye));
    gl_FragColor = vec4(rgb, color.a);
}
";

const EYE_FS: &str = "\
precision highp float;
uniform sampler2D map;
uniform vec2 size;
uniform vec2 eyeCenter;
uniform float eyeRange;
uniform float rdIntensity;
uniform float lgIntensity;
varying vec2 vuv;
vec2 inflate(vec2 p, vec2 center, float radius, float strength, float powRatio) {
    float dist = distance(p, center);
    float scale = 1.0 - strength + strength * pow(smoothstep(0.0, 1.0, dist / radius), powRatio);
    return mix(center + (p - center) * scale, p, step(radius, dist));
}
void main() {
    vec2 p = vuv * size;
    float maxRound = mix(1.0, 0.5, lgIntensity);
    float roundStrength = mix(0.0, maxRound, rdIntensity);
    p = inflate(p, eyeCenter, eyeRange * 1.25, roundStrength * 3.0, 0.075);
    p = inflate(p, eyeCenter, eyeRange * 3.0, lgIntensity, 0.125);
    gl_FragColor = texture2D(map, p / size);
}
";

const MASK_VS: &str = "\
attribute vec2 position;
attribute vec4 color;
uniform vec2 size;
varying vec4 vcolor;
void main() {
    vcolor = color;
    vec2 p = position / size;
    gl_Position = vec4(p.x * 2.0 - 1.0, 1.0 - p.y * 2.0, 0.0, 1.0);
}
";

const MASK_FS: &str = "\
precision mediump float;
varying vec4 vcolor;
void main() {
    gl_FragColor = vcolor;
}
";

// Accumulates region classes and face coverage over the faces of a frame.
const REGION_VS: &str = "\
attribute vec2 tPosition;
attribute vec4 region;
uniform vec2 size;
varying vec4 vregion;
varying vec2 vscreen;
void main() {
    vregion = region;
    vscreen = tPosition / size;
    gl_Position = vec4(vscreen.x * 2.0 - 1.0, 1.0 - vscreen.y * 2.0, 0.0, 1.0);
}
";

const REGION_FS: &str = "\
precision mediump float;
uniform sampler2D map;
uniform int index;
varying vec4 vregion;
varying vec2 vscreen;
void main() {
    vec4 previous = texture2D(map, vscreen) * float(index > 0);
    vec3 classes = max(previous.rgb, vregion.rgb * vregion.a);
    float coverage = 1.0 - (1.0 - previous.a) * (1.0 - vregion.a);
    gl_FragColor = vec4(classes, coverage);
}
";

const WIRE_VS: &str = "\
attribute vec2 position;
uniform vec2 size;
void main() {
    vec2 p = position / size;
    gl_Position = vec4(p.x * 2.0 - 1.0, 1.0 - p.y * 2.0, 0.0, 1.0);
}
";

const WIRE_FS: &str = "\
precision mediump float;
void main() {
    gl_FragColor = vec4(0.0, 1.0, 0.0, 1.0);
}
";

const MORPH: [&str; 2] = ["morph0", "morph1"];
const REGION: [&str; 2] = ["region0", "region1"];

/// Region classes per vertex with face coverage in alpha; the outline ring
/// and the frame border lie outside the face.
fn region_weights(mesh: &FaceMesh) -> Vec<f32> {
    mesh.region
        .iter()
        .zip(&mesh.z)
        .flat_map(|(rgb, z)| {
            let cover = if *z >= Z_OUTLINE { 0.0 } else { 1.0 };
            [rgb[0], rgb[1], rgb[2], cover]
        })
        .collect()
}

fn draw_lines(pass: &mut wgpu::RenderPass<'_>, buffers: &ProgramBuffers) {
    if buffers.vertex_count > 0 {
        pass.draw(0..buffers.vertex_count, 0..1);
    }
}

/// Landmark-driven face reshaping plus the masks the smoothing stage reads.
pub struct AdvBeautyFilter {
    core: FilterCore,
    knobs: KnobSet,
    faces: Vec<FaceLandmarks>,
    paras: Vec<FeatureParas>,
    debug_wire: bool,
    /// Logical frame size, the coordinate space of the landmarks.
    frame: (f32, f32),
}

impl AdvBeautyFilter {
    pub fn new(ctx: &Rc<GpuContext>, quad: &Quad, renderer: &Renderer) -> Result<Self> {
        let (width, height) = renderer.get_size();
        let mut core = FilterCore::new(ctx, quad, width, height);
        let depth = FrameBufferOptions {
            depth: true,
            ..FrameBufferOptions::default()
        };
        let plain = FrameBufferOptions::default();

        for name in MORPH {
            let program = core.add_program(name, MORPH_VS, MORPH_FS)?;
            program.set_draw_mode(DrawMode::Indexed);
            program.set_depth_test(Some(DepthTest::LessEqual));
            core.add_framebuffer(name, SizeRule::Full, depth);
        }
        core.add_program("eye_l", QUAD_VS, EYE_FS)?;
        core.add_program("eye_r", QUAD_VS, EYE_FS)?;
        core.add_framebuffer("eye", SizeRule::Full, plain);

        core.add_program("eye_teeth", MASK_VS, MASK_FS)?
            .set_draw_mode(DrawMode::Indexed);
        core.add_framebuffer("eye_teeth", SizeRule::Quarter, plain);

        for name in REGION {
            core.add_program(name, REGION_VS, REGION_FS)?
                .set_draw_mode(DrawMode::Indexed);
            core.add_framebuffer(name, SizeRule::Quarter, plain);
        }

        let wire = core.add_program("wire", WIRE_VS, WIRE_FS)?;
        wire.set_draw_mode(DrawMode::Custom {
            topology: wgpu::PrimitiveTopology::LineList,
            draw: Box::new(draw_lines),
        });
        wire.set_blend(Blend::Alpha);

        if let Some(mask) = core.fb_texture("eye_teeth") {
            for name in MORPH {
                core.set_uniform(name, "eyeTeethMaskMap", &mask);
            }
        }
        if let Some(eye) = core.fb_texture("eye") {
            core.set_uniform("eye_r", "map", &eye);
        }
        for (idx, name) in REGION.iter().enumerate() {
            if let Some(previous) = core.fb_texture(REGION[1 - idx]) {
                core.set_uniform(name, "map", &previous);
            }
        }

        let (lw, lh) = renderer.logical_size();
        let mut filter = Self {
            core,
            knobs: KnobSet::default(),
            faces: Vec::new(),
            paras: Vec::new(),
            debug_wire: false,
            frame: (lw.max(1) as f32, lh.max(1) as f32),
        };
        filter.update_size_uniforms();
        Ok(filter)
    }

    /// Landmarks for the next frame: 212 values per face, packed. A length
    /// that is not a whole number of faces is logged and treated as no
    /// faces.
    pub fn set_adv_data(&mut self, data: &[i16]) {
        self.faces = match split_faces(data) {
            Ok(faces) => faces,
            Err(error) => {
                tracing::warn!(%error, "discarding landmark data");
                Vec::new()
            }
        };
        if self.faces.is_empty() {
            self.paras.clear();
        }
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn set_adv_effect(&mut self, knob: Knob, intensity: f32) {
        self.knobs.set(knob, intensity);
    }

    pub fn reset_adv_effects(&mut self) {
        self.knobs.reset();
    }

    /// Applies `preset`; knobs it does not name return to their defaults.
    pub fn preset_adv_effect(&mut self, preset: &BTreeMap<Knob, f32>) {
        self.knobs.preset(preset);
    }

    pub fn knobs(&self) -> &KnobSet {
        &self.knobs
    }

    pub fn set_debug_wire(&mut self, enabled: bool) {
        self.debug_wire = enabled;
    }

    pub fn debug_wire(&self) -> bool {
        self.debug_wire
    }

    /// Region mask of the last rendered frame; `None` without faces.
    pub fn face_mask(&self) -> Option<TextureHandle> {
        let last = self.faces.len().checked_sub(1)?;
        self.core.fb_texture(REGION[last % 2])
    }

    /// Eye bulge and teeth parameters of the last frame, one entry per face.
    pub fn feature_paras(&self) -> &[FeatureParas] {
        &self.paras
    }

    /// Nose-line, forehead and eye-rim fade intensities, in the order the
    /// smoothing stage takes them.
    pub fn region_intensity(&self) -> [f32; 3] {
        [
            self.knobs.get(Knob::FadeNoseLine),
            self.knobs.get(Knob::FadeHeadWrinkle),
            self.knobs.get(Knob::FadeEyeRim),
        ]
    }

    /// Whether the frame needs the warp passes at all.
    fn warping(&self) -> bool {
        !self.faces.is_empty() && (self.debug_wire || !self.knobs.changed().is_empty())
    }

    fn update_size_uniforms(&mut self) {
        let (lw, lh) = self.frame;
        let programs = MORPH
            .into_iter()
            .chain(REGION)
            .chain(["eye_l", "eye_r", "eye_teeth", "wire"]);
        for name in programs {
            self.core.set_uniform(name, "size", [lw, lh]);
        }
    }

    fn render_face(
        &mut self,
        renderer: &Renderer,
        index: usize,
        mesh: &FaceMesh,
        paras: &FeatureParas,
        rest: &FaceLandmarks,
    ) {
        let slot = index % 2;
        let morph = MORPH[slot];

        let input = if index == 0 {
            self.core.map().cloned()
        } else {
            self.core.fb_texture(MORPH[1 - slot])
        };
        let rest_flat: Vec<f32> = mesh.rest.iter().flatten().copied().collect();
        let target_flat: Vec<f32> = mesh.target.iter().flatten().copied().collect();
        let coverage = region_weights(mesh);

        let eye_brighten = paras.eye_brighten;
        let teeth = paras.teeth_whiten;
        if eye_brighten > 0.0 || teeth > 0.0 {
            let mask = MaskMesh::eye_teeth(rest);
            let positions: Vec<f32> = mask.positions.iter().flatten().copied().collect();
            let colors: Vec<f32> = mask.colors.iter().flatten().copied().collect();
            if let Some(program) = self.core.program_mut("eye_teeth") {
                program.update_attribute("position", &positions);
                program.update_attribute("color", &colors);
                program.update_indices(&mask.indices);
            }
            self.core.draw(renderer, "eye_teeth", Some("eye_teeth"));
        }

        if let Some(program) = self.core.program_mut(morph) {
            if let Some(input) = &input {
                program.set_uniform("map", input);
            }
            program.set_uniform("eyeIntensity", eye_brighten);
            program.set_uniform("teethIntensity", teeth);
            program.update_attribute("position", &rest_flat);
            program.update_attribute("tPosition", &target_flat);
            program.update_attribute("zIndex", &mesh.z);
            program.update_indices(&mesh.indices);
        }
        self.core.draw(renderer, morph, Some(morph));

        if let Some(eyes) = paras.eyes {
            if eyes.iter().any(|eye| eye.round > 0.0 || eye.enlarge > 0.0) {
                if let Some(output) = self.core.fb_texture(morph) {
                    self.core.set_uniform("eye_l", "map", &output);
                }
                for (program, eye) in ["eye_l", "eye_r"].into_iter().zip(eyes) {
                    self.core
                        .set_uniform(program, "eyeCenter", [eye.center.x, eye.center.y]);
                    self.core.set_uniform(program, "eyeRange", eye.range);
                    self.core.set_uniform(program, "rdIntensity", eye.round);
                    self.core.set_uniform(program, "lgIntensity", eye.enlarge);
                }
                self.core.draw(renderer, "eye_l", Some("eye"));
                self.core.draw(renderer, "eye_r", Some(morph));
            }
        }

        if self.debug_wire {
            let lines: Vec<f32> = mesh.wire_lines().iter().flatten().copied().collect();
            if let Some(program) = self.core.program_mut("wire") {
                program.update_attribute("position", &lines);
            }
            if let (Some(program), Some(fb)) = (self.core.program("wire"), self.core.framebuffer(morph)) {
                renderer.overlay(program, Some(fb));
            }
        }

        self.render_region(renderer, index, &target_flat, &coverage, &mesh.indices);
    }

    fn render_region(
        &mut self,
        renderer: &Renderer,
        index: usize,
        target: &[f32],
        coverage: &[f32],
        indices: &[u32],
    ) {
        let region = REGION[index % 2];
        if let Some(program) = self.core.program_mut(region) {
            program.set_uniform("index", index as i32);
            program.update_attribute("tPosition", target);
            program.update_attribute("region", coverage);
            program.update_indices(indices);
        }
        self.core.draw(renderer, region, Some(region));
    }
}

impl Filter for AdvBeautyFilter {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    /// Inputs are rebound per face while rendering.
    fn on_map_changed(&mut self, _map: &TextureHandle) {}

    fn output(&self) -> Option<TextureHandle> {
        if self.warping() {
            let last = self.faces.len() - 1;
            return self.core.fb_texture(MORPH[last % 2]);
        }
        self.map()
    }

    fn update_size(&mut self, renderer: &Renderer) {
        let (width, height) = renderer.get_size();
        self.core.resize(width, height);
        let (lw, lh) = renderer.logical_size();
        self.frame = (lw.max(1) as f32, lh.max(1) as f32);
        self.update_size_uniforms();
    }

    fn render(&mut self, renderer: &mut Renderer) {
        if self.faces.is_empty() {
            return;
        }
        let (lw, lh) = self.frame;
        let warping = self.warping();
        let faces = self.faces.clone();
        let mut paras = Vec::with_capacity(faces.len());
        for (index, face) in faces.into_iter().enumerate() {
            let warped = warp_face(face, &self.knobs);
            let mesh = FaceMesh::build(&warped, lw, lh);
            if warping {
                self.render_face(renderer, index, &mesh, &warped.paras, &warped.rest);
            } else {
                let target: Vec<f32> = mesh.target.iter().flatten().copied().collect();
                let coverage = region_weights(&mesh);
                self.render_region(renderer, index, &target, &coverage, &mesh.indices);
            }
            paras.push(warped.paras);
        }
        self.paras = paras;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::translate;

    #[test]
    fn mesh_shaders_validate() {
        for (vs, fs) in [
            (MORPH_VS, MORPH_FS),
            (QUAD_VS, EYE_FS),
            (MASK_VS, MASK_FS),
            (REGION_VS, REGION_FS),
            (WIRE_VS, WIRE_FS),
        ] {
            let shader = translate(vs, fs).expect("translate");
            shader.validate().expect("validate");
        }
    }

    #[test]
    fn morph_attributes_follow_declaration_order() {
        let shader = translate(MORPH_VS, MORPH_FS).expect("translate");
        let names: Vec<_> = shader.attributes.iter().map(|a| (a.name.as_str(), a.components)).collect();
        assert_eq!(names, [("position", 2), ("tPosition", 2), ("zIndex", 1)]);
    }
}
