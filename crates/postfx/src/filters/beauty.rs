use std::rc::Rc;

use anyhow::Result;
use facewarp::FeatureParas;
use fxassets::{AssetCache, LoadReport};
use fxconfig::BeautySettings;

use super::lut::lut_fragment;
use crate::filter::{Filter, FilterCore, Quad, SizeRule, QUAD_VS};
use crate::gpu::{FrameBufferOptions, GpuContext, Renderer, TextureHandle, TextureSource};

/// Eye slots available to the smoothing pass, two per face.
pub const MAX_PROTECTED_EYES: usize = 4;

const BLUR_VS: &str = "\
attribute vec2 position;
attribute vec2 uv;
uniform vec2 size;
uniform float isVertical;
varying vec2 vuv;
varying vec4 vShift1;
varying vec4 vShift2;
varying vec4 vShift3;
varying vec4 vShift4;
void main() {
    gl_Position = vec4(position, 0.0, 1.0);
    vuv = uv;
    vec2 stepOffset = mix(vec2(1.0 / size.x, 0.0), vec2(0.0, 1.0 / size.y), isVertical);
    vShift1 = vec4(uv - stepOffset, uv + stepOffset);
    vShift2 = vec4(uv - 2.0 * stepOffset, uv + 2.0 * stepOffset);
    vShift3 = vec4(uv - 3.0 * stepOffset, uv + 3.0 * stepOffset);
    vShift4 = vec4(uv - 4.0 * stepOffset, uv + 4.0 * stepOffset);
}
";

const BLUR_FS: &str = "\
precision highp float;
uniform sampler2D map;
varying vec2 vuv;
varying vec4 vShift1;
varying vec4 vShift2;
varying vec4 vShift3;
varying vec4 vShift4;
void main() {
    vec3 sum = texture2D(map, vuv).rgb;
    sum += texture2D(map, vShift1.xy).rgb;
    sum += texture2D(map, vShift1.zw).rgb;
    sum += texture2D(map, vShift2.xy).rgb;
    sum += texture2D(map, vShift2.zw).rgb;
    sum += texture2D(map, vShift3.xy).rgb;
    sum += texture2D(map, vShift3.zw).rgb;
    sum += texture2D(map, vShift4.xy).rgb;
    sum += texture2D(map, vShift4.zw).rgb;
    gl_FragColor = vec4(sum * 0.1111, 1.0);
}
";

const HIGH_PASS_FS: &str = "\
precision highp float;
uniform sampler2D map;
uniform sampler2D blurMap;
varying vec2 vuv;
void main() {
    vec3 diff = (texture2D(map, vuv).rgb - texture2D(blurMap, vuv).rgb) * 6.0;
    gl_FragColor = vec4(min(diff * diff, vec3(1.0)), 1.0);
}
";

// Region mask: r = nose line, g = forehead, b = eye rims, a = face coverage.
// `eyes` holds (x, y, range, enabled) in pixels.
const BEAUTY_FS: &str = "\
precision highp float;
uniform vec2 size;
uniform sampler2D map;
uniform sampler2D blurMap;
uniform sampler2D highPassMap;
uniform sampler2D maskMap;
uniform int hasMask;
uniform float intensity;
uniform float foreheadInten;
uniform float eyeRimInten;
uniform float noseLineInten;
uniform vec4 eyes[4];
varying vec2 vuv;
void main() {
    vec4 originColor = texture2D(map, vuv);
    vec4 mask = texture2D(maskMap, vuv);
    vec4 meanColor = texture2D(blurMap, vuv);
    vec4 varColor = texture2D(highPassMap, vuv);

    float smoothing = intensity;
    if (hasMask > 0) {
        float regional = max(max(mask.r * noseLineInten, mask.g * foreheadInten), mask.b * eyeRimInten);
        smoothing = regional > 0.0 ? mix(smoothing, 1.5, regional) : smoothing * mask.a;
    }
    vec2 pixel = vuv * size;
    for (int i = 0; i < 4; i++) {
        vec4 eye = eyes[i];
        float keep = smoothstep(eye.z * 0.6, eye.z, distance(pixel, eye.xy));
        smoothing *= mix(1.0, keep, eye.w);
    }

    vec2 stepOffset = 0.5 / size;
    float value = clamp((min(originColor.r, meanColor.r - 0.1) - 0.2) * 4.0, 0.0, 1.0);
    float meanValue = (varColor.r + varColor.g + varColor.b) / 3.0;
    float amount = (1.0 - meanValue / (meanValue + 0.1)) * value * smoothing;
    vec3 resultColor = mix(originColor.rgb, meanColor.rgb, amount);

    float sum = 0.25 * originColor.g;
    sum += 0.125 * texture2D(map, vuv + vec2(-stepOffset.x, 0.0)).g;
    sum += 0.125 * texture2D(map, vuv + vec2(stepOffset.x, 0.0)).g;
    sum += 0.125 * texture2D(map, vuv + vec2(0.0, -stepOffset.y)).g;
    sum += 0.125 * texture2D(map, vuv + vec2(0.0, stepOffset.y)).g;
    sum += 0.0625 * texture2D(map, vuv + stepOffset).g;
    sum += 0.0625 * texture2D(map, vuv + vec2(stepOffset.x, -stepOffset.y)).g;
    sum += 0.0625 * texture2D(map, vuv + vec2(-stepOffset.x, stepOffset.y)).g;
    sum += 0.0625 * texture2D(map, vuv - stepOffset).g;

    float hPass = originColor.g - sum + 0.5;
    float flag = step(0.5, hPass);
    vec3 sharpened = mix(max(vec3(0.0), 2.0 * hPass + resultColor - 1.0),
                         min(vec3(1.0), resultColor + 2.0 * hPass - 1.0), flag);
    vec4 smoothed = vec4(mix(resultColor, sharpened, smoothing), 1.0);
    gl_FragColor = smoothing > 0.0 ? smoothed : originColor;
}
";

/// One whiten or redden LUT and whether its pixels have arrived.
struct LutSlot {
    program: &'static str,
    texture: TextureHandle,
    url: Option<String>,
    ready: bool,
    intensity: f32,
}

impl LutSlot {
    fn new(program: &'static str) -> Self {
        Self {
            program,
            texture: TextureHandle::from_color(program, [0.0, 0.0, 0.0, 1.0]),
            url: None,
            ready: false,
            intensity: 0.0,
        }
    }

    /// Zero until the LUT image is loaded.
    fn effective(&self) -> f32 {
        if self.ready {
            self.intensity
        } else {
            0.0
        }
    }

    fn sync(&mut self, assets: &AssetCache) {
        if self.ready {
            return;
        }
        if let Some(url) = &self.url {
            if let Some(image) = assets.image(url) {
                tracing::debug!(url = %url, lut = self.program, "beauty lut ready");
                self.texture.set_source(TextureSource::Image(image));
                self.ready = true;
            }
        }
    }
}

/// Skin smoothing followed by whitening and reddening LUTs.
pub struct BeautyFilter {
    core: FilterCore,
    assets: AssetCache,
    whiten: LutSlot,
    redden: LutSlot,
    smooth: f32,
    mask_placeholder: TextureHandle,
    face_mask: Option<TextureHandle>,
    regions: [f32; 3],
    /// Landmark eyes in logical pixels.
    eyes: Vec<[f32; 4]>,
    pixel_ratio: f32,
}

impl BeautyFilter {
    pub fn new(
        ctx: &Rc<GpuContext>,
        quad: &Quad,
        renderer: &Renderer,
        assets: AssetCache,
    ) -> Result<Self> {
        let (width, height) = renderer.get_size();
        let mut core = FilterCore::new(ctx, quad, width, height);
        let opts = FrameBufferOptions::default();

        for (name, rule) in [
            ("blur_x", SizeRule::Half),
            ("blur_y", SizeRule::Half),
            ("h_blur_x", SizeRule::Full),
            ("h_blur_y", SizeRule::Full),
        ] {
            core.add_program(name, BLUR_VS, BLUR_FS)?;
            core.add_framebuffer(name, rule, opts);
        }
        core.set_uniform("blur_y", "isVertical", 1.0);
        core.set_uniform("h_blur_y", "isVertical", 1.0);

        core.add_program("high_pass", QUAD_VS, HIGH_PASS_FS)?;
        core.add_framebuffer("high_pass", SizeRule::Full, opts);
        core.add_program("beauty", QUAD_VS, BEAUTY_FS)?;
        core.add_framebuffer("beauty", SizeRule::Full, opts);

        let lut = lut_fragment();
        let whiten = LutSlot::new("whiten");
        let redden = LutSlot::new("redden");
        for slot in [&whiten, &redden] {
            core.add_program(slot.program, QUAD_VS, &lut)?
                .set_uniform("lut", &slot.texture);
            core.add_framebuffer(slot.program, SizeRule::Full, opts);
        }

        for (program, source) in [
            ("blur_y", "blur_x"),
            ("high_pass", "blur_y"),
            ("h_blur_x", "high_pass"),
            ("h_blur_y", "h_blur_x"),
        ] {
            if let Some(texture) = core.fb_texture(source) {
                let uniform = if program == "high_pass" { "blurMap" } else { "map" };
                core.set_uniform(program, uniform, &texture);
            }
        }
        if let (Some(blur), Some(high)) = (core.fb_texture("blur_y"), core.fb_texture("h_blur_y")) {
            core.set_uniform("beauty", "blurMap", &blur);
            core.set_uniform("beauty", "highPassMap", &high);
        }

        let mask_placeholder = TextureHandle::from_color("face mask", [1.0; 4]);
        core.set_uniform("beauty", "maskMap", &mask_placeholder);
        core.set_uniform("beauty", "hasMask", 0);

        let mut filter = Self {
            core,
            assets,
            whiten,
            redden,
            smooth: 0.0,
            mask_placeholder,
            face_mask: None,
            regions: [0.0; 3],
            eyes: Vec::new(),
            pixel_ratio: renderer.pixel_ratio(),
        };
        filter.update_size_uniforms();
        filter.sync_uniforms();
        Ok(filter)
    }

    /// Starts loading the whiten and redden LUTs. `on_complete` runs from a
    /// later [`AssetCache::poll`].
    pub fn set_luts_src<F>(&mut self, whiten: Option<&str>, redden: Option<&str>, on_complete: F)
    where
        F: FnOnce(LoadReport) + Send + 'static,
    {
        let mut urls = Vec::new();
        for (slot, url) in [(&mut self.whiten, whiten), (&mut self.redden, redden)] {
            if let Some(url) = url {
                if slot.url.as_deref() != Some(url) {
                    slot.url = Some(url.to_string());
                    slot.ready = false;
                }
                urls.push(url.to_string());
            }
        }
        self.assets.load_all(urls, on_complete);
    }

    pub fn set_smooth(&mut self, smooth: f32) {
        self.smooth = clamp_unit(smooth);
        self.sync_uniforms();
    }

    pub fn set_whiten(&mut self, whiten: f32) {
        self.whiten.intensity = clamp_unit(whiten);
        self.sync_uniforms();
    }

    pub fn set_redden(&mut self, redden: f32) {
        self.redden.intensity = clamp_unit(redden);
        self.sync_uniforms();
    }

    pub fn smooth(&self) -> f32 {
        self.smooth
    }

    /// Requested whiten intensity; see [`Self::effective_whiten`].
    pub fn whiten(&self) -> f32 {
        self.whiten.intensity
    }

    pub fn redden(&self) -> f32 {
        self.redden.intensity
    }

    pub fn effective_whiten(&self) -> f32 {
        self.whiten.effective()
    }

    pub fn effective_redden(&self) -> f32 {
        self.redden.effective()
    }

    pub fn settings(&self) -> BeautySettings {
        BeautySettings {
            smooth: self.smooth,
            whiten: self.whiten.intensity,
            redden: self.redden.intensity,
        }
    }

    pub fn apply_settings(&mut self, settings: &BeautySettings) {
        self.smooth = clamp_unit(settings.smooth);
        self.whiten.intensity = clamp_unit(settings.whiten);
        self.redden.intensity = clamp_unit(settings.redden);
        self.sync_uniforms();
    }

    /// Region mask from the face-warp stage; `None` smooths uniformly.
    pub fn set_face_mask(&mut self, mask: Option<TextureHandle>) {
        let texture = mask.clone().unwrap_or_else(|| self.mask_placeholder.clone());
        self.core.set_uniform("beauty", "maskMap", &texture);
        self.core
            .set_uniform("beauty", "hasMask", i32::from(mask.is_some()));
        self.face_mask = mask;
    }

    /// Fade intensities for the nose-line, forehead and eye-rim regions.
    pub fn set_region_intensity(&mut self, nose_line: f32, forehead: f32, eye_rim: f32) {
        self.regions = [clamp_unit(nose_line), clamp_unit(forehead), clamp_unit(eye_rim)];
        self.sync_uniforms();
    }

    /// Keeps the bulged eyes out of the smoothing pass.
    pub fn set_feature_paras(&mut self, paras: &[FeatureParas]) {
        self.eyes = paras
            .iter()
            .filter_map(|face| face.eyes)
            .flatten()
            .take(MAX_PROTECTED_EYES)
            .map(|eye| [eye.center.x, eye.center.y, eye.range.max(1.0), 1.0])
            .collect();
        self.sync_eyes();
    }

    fn sync_eyes(&mut self) {
        let packed = pack_eyes(&self.eyes, self.pixel_ratio);
        self.core.set_uniform("beauty", "eyes", packed);
    }

    pub fn protected_eyes(&self) -> usize {
        self.eyes.len()
    }

    fn regions_active(&self) -> bool {
        self.face_mask.is_some() && self.regions.iter().any(|r| *r > 0.0)
    }

    fn smooth_active(&self) -> bool {
        self.smooth > 0.0 || self.regions_active()
    }

    fn smooth_out(&self) -> Option<TextureHandle> {
        if self.smooth_active() {
            return self.core.fb_texture("beauty");
        }
        self.map()
    }

    fn whiten_out(&self) -> Option<TextureHandle> {
        if self.whiten.effective() > 0.0 {
            return self.core.fb_texture("whiten");
        }
        self.smooth_out()
    }

    /// Pushes intensities and re-chains the LUT passes onto whichever
    /// earlier pass is active.
    fn sync_uniforms(&mut self) {
        let [nose, forehead, eye_rim] = self.regions;
        self.core.set_uniform("beauty", "intensity", self.smooth);
        self.core.set_uniform("beauty", "noseLineInten", nose);
        self.core.set_uniform("beauty", "foreheadInten", forehead);
        self.core.set_uniform("beauty", "eyeRimInten", eye_rim);
        self.core
            .set_uniform("whiten", "intensity", self.whiten.effective());
        self.core
            .set_uniform("redden", "intensity", self.redden.effective());
        if let Some(texture) = self.smooth_out() {
            self.core.set_uniform("whiten", "map", &texture);
        }
        if let Some(texture) = self.whiten_out() {
            self.core.set_uniform("redden", "map", &texture);
        }
    }

    fn update_size_uniforms(&mut self) {
        let (width, height) = self.core.size();
        let (hw, hh) = SizeRule::Half.apply(width, height);
        for program in ["blur_x", "blur_y"] {
            self.core
                .set_uniform(program, "size", [hw as f32, hh as f32]);
        }
        for program in ["h_blur_x", "h_blur_y", "beauty"] {
            self.core
                .set_uniform(program, "size", [width as f32, height as f32]);
        }
    }
}

/// Moves logical-pixel eyes into the physical pixels `vuv * size` spans,
/// padded to the shader's fixed slot count.
fn pack_eyes(eyes: &[[f32; 4]], pixel_ratio: f32) -> Vec<[f32; 4]> {
    let mut packed: Vec<[f32; 4]> = eyes
        .iter()
        .take(MAX_PROTECTED_EYES)
        .map(|&[x, y, range, enabled]| {
            [x * pixel_ratio, y * pixel_ratio, range * pixel_ratio, enabled]
        })
        .collect();
    packed.resize(MAX_PROTECTED_EYES, [0.0; 4]);
    packed
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl Filter for BeautyFilter {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    fn on_map_changed(&mut self, map: &TextureHandle) {
        for program in ["blur_x", "high_pass", "beauty"] {
            self.core.set_uniform(program, "map", map);
        }
        self.sync_uniforms();
    }

    fn output(&self) -> Option<TextureHandle> {
        if self.redden.effective() > 0.0 {
            return self.core.fb_texture("redden");
        }
        self.whiten_out()
    }

    fn update_size(&mut self, renderer: &Renderer) {
        let (width, height) = renderer.get_size();
        self.core.resize(width, height);
        self.update_size_uniforms();
        if self.pixel_ratio != renderer.pixel_ratio() {
            self.pixel_ratio = renderer.pixel_ratio();
            self.sync_eyes();
        }
    }

    fn render(&mut self, renderer: &mut Renderer) {
        let was_ready = (self.whiten.ready, self.redden.ready);
        self.whiten.sync(&self.assets);
        self.redden.sync(&self.assets);
        if was_ready != (self.whiten.ready, self.redden.ready) {
            self.sync_uniforms();
        }

        if self.smooth_active() {
            for pass in ["blur_x", "blur_y", "high_pass", "h_blur_x", "h_blur_y", "beauty"] {
                self.core.draw(renderer, pass, Some(pass));
            }
        }
        if self.whiten.effective() > 0.0 {
            self.core.draw(renderer, "whiten", Some("whiten"));
        }
        if self.redden.effective() > 0.0 {
            self.core.draw(renderer, "redden", Some("redden"));
        }
    }

    fn destroy(&mut self, clear_buffer: bool) {
        self.core.destroy(clear_buffer);
        self.whiten.texture.release();
        self.redden.texture.release();
        self.mask_placeholder.release();
    }
}

#[cfg(test)]
mod tests {
    use super::{clamp_unit, pack_eyes, BEAUTY_FS, BLUR_FS, BLUR_VS, HIGH_PASS_FS};
    use crate::filter::QUAD_VS;
    use crate::gpu::{translate, UniformKind};

    #[test]
    fn beauty_shaders_validate() {
        for (vs, fs) in [(BLUR_VS, BLUR_FS), (QUAD_VS, HIGH_PASS_FS), (QUAD_VS, BEAUTY_FS)] {
            let shader = translate(vs, fs).expect("translate");
            shader.validate().expect("validate");
        }
    }

    #[test]
    fn eye_slots_are_an_array() {
        let shader = translate(QUAD_VS, BEAUTY_FS).expect("translate");
        assert_eq!(shader.uniform("eyes").map(|u| u.kind), Some(UniformKind::Vec4Array(4)));
        assert_eq!(shader.texture_units, 4);
    }

    #[test]
    fn intensities_clamp() {
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(f32::NAN), 0.0);
    }

    #[test]
    fn eyes_follow_the_pixel_ratio() {
        let eyes = [[270.0, 209.5, 30.0, 1.0]];
        let packed = pack_eyes(&eyes, 2.0);
        assert_eq!(packed.len(), 4);
        assert_eq!(packed[0], [540.0, 419.0, 60.0, 1.0]);
        assert_eq!(packed[1], [0.0; 4]);
        // uv of the protected center matches the landmark uv
        let (lw, lh) = (640.0, 480.0);
        let (pw, ph) = (lw * 2.0, lh * 2.0);
        assert!((packed[0][0] / pw - 270.0 / lw).abs() < 1e-6);
        assert!((packed[0][1] / ph - 209.5 / lh).abs() < 1e-6);
        assert_eq!(pack_eyes(&eyes, 1.0)[0], eyes[0]);
    }
}
