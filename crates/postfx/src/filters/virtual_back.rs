use std::rc::Rc;
use std::sync::Arc;

use anyhow::Result;
use fxassets::AssetCache;
use fxconfig::{parse_hex_color, BackgroundSettings};
use image::RgbaImage;

use crate::filter::{Filter, FilterCore, Quad, SizeRule, QUAD_VS};
use crate::gpu::{
    FrameBufferOptions, GpuContext, Renderer, TextureHandle, TextureSource, PASSTHROUGH_FS,
};

pub const DEFAULT_BACK_COLOR: &str = "#e7ad3c";

const MIP_BLUR_FS: &str = "\
precision highp float;
uniform sampler2D map;
uniform float intensity;
uniform float radius;
varying vec2 vuv;
float weight(float t, float log2radius, float gamma) {
    float d = log2radius - t;
    return exp(-gamma * d * d);
}
void main() {
    float level = log2(mix(8.0, radius, intensity));
    vec3 pix = vec3(0.0);
    float norm = 0.0;
    for (int i = 0; i < 20; i++) {
        float lod = float(i) * 0.5;
        float k = weight(lod, level, intensity);
        pix += k * texture2DLodEXT(map, vuv, lod).rgb;
        norm += k;
    }
    gl_FragColor = vec4(pix / max(norm, 0.0001), 1.0);
}
";

const COMPOSITE_FS: &str = "\
precision highp float;
uniform sampler2D map;
uniform sampler2D maskMap;
uniform sampler2D backMap;
uniform vec3 backColor;
uniform vec2 size;
uniform vec2 bkSize;
uniform int backType;
uniform int emptyFrame;
varying vec2 vuv;
void main() {
    vec4 color = texture2D(map, vuv);
    float alpha = texture2D(maskMap, vuv).a;
    float ratio = size.x / max(size.y, 1.0);
    float bkRatio = bkSize.x / max(bkSize.y, 1.0);
    float wide = step(bkRatio, ratio);
    vec2 suv = vuv;
    suv.y = mix(suv.y, (suv.y - 0.5) * bkRatio / ratio + 0.5, wide);
    suv.x = mix((suv.x - 0.5) * ratio / max(bkRatio, 0.0001) + 0.5, suv.x, wide);
    vec3 image = texture2D(backMap, suv).rgb;
    vec3 bk = mix(backColor, image, float(backType == 1));
    vec3 result = mix(bk, color.rgb, alpha);
    gl_FragColor = mix(vec4(result, 1.0), vec4(0.0, 0.0, 0.0, 1.0), float(emptyFrame == 1));
}
";

/// What shows through where the mask is transparent.
#[derive(Debug, Clone)]
pub enum Background {
    /// Back to the default color.
    None,
    /// `#rrggbb` or `#rgb`.
    Color(String),
    Image(Arc<RgbaImage>),
    /// An image fetched through the asset cache; the color shows until it
    /// arrives.
    Url(String),
    /// A texture refreshed every frame, such as a decoded video.
    Live(TextureHandle),
}

#[derive(Debug, Clone, PartialEq)]
enum Mode {
    Color,
    Image { url: Option<String> },
    Live,
    Blur,
}

/// Segmentation-mask compositing over a color, an image or the blurred
/// source.
pub struct VirtualBackFilter {
    core: FilterCore,
    assets: AssetCache,
    source: Option<TextureHandle>,
    mask: TextureHandle,
    has_mask: bool,
    empty_frame: bool,
    color: String,
    back_map: TextureHandle,
    live: Option<TextureHandle>,
    mode: Mode,
    back_ready: bool,
    blur_intensity: f32,
}

impl VirtualBackFilter {
    pub fn new(
        ctx: &Rc<GpuContext>,
        quad: &Quad,
        renderer: &Renderer,
        assets: AssetCache,
    ) -> Result<Self> {
        let (width, height) = renderer.get_size();
        let mut core = FilterCore::new(ctx, quad, width, height);
        let mask = TextureHandle::from_color("mask", [0.0; 4]);
        let back_map = TextureHandle::from_color("background", [0.0, 0.0, 0.0, 1.0]);

        core.add_program("mip", QUAD_VS, PASSTHROUGH_FS)?;
        core.add_framebuffer(
            "mip",
            SizeRule::PowerOfTwo,
            FrameBufferOptions {
                mipmaps: true,
                ..FrameBufferOptions::default()
            },
        );

        core.add_program("blur", QUAD_VS, MIP_BLUR_FS)?;
        core.add_framebuffer("blur", SizeRule::Full, FrameBufferOptions::default());
        let mip_texture = core.fb_texture("mip");
        if let Some(blur) = core.program_mut("blur") {
            if let Some(mip) = &mip_texture {
                blur.set_uniform("map", mip);
            }
            blur.set_uniform("intensity", 0.1);
        }

        let program = core.add_program("main", QUAD_VS, COMPOSITE_FS)?;
        program.set_uniform("maskMap", &mask);
        program.set_uniform("backMap", &back_map);
        program.set_uniform("backType", 0);
        program.set_uniform("emptyFrame", 0);
        core.add_framebuffer("main", SizeRule::Full, FrameBufferOptions::default());

        let mut filter = Self {
            core,
            assets,
            source: None,
            mask,
            has_mask: false,
            empty_frame: false,
            color: DEFAULT_BACK_COLOR.to_string(),
            back_map,
            live: None,
            mode: Mode::Color,
            back_ready: false,
            blur_intensity: 0.1,
        };
        filter.apply_color(DEFAULT_BACK_COLOR);
        filter.update_size_uniforms();
        Ok(filter)
    }

    /// The raw pipeline source, which the blurred background is built from.
    pub fn set_source_map(&mut self, source: &TextureHandle) {
        if self.source.as_ref().is_some_and(|current| current.same(source)) {
            return;
        }
        self.source = Some(source.clone());
        self.core.set_uniform("mip", "map", source);
    }

    /// Person mask; alpha 1 keeps the source, 0 shows the background. `None`
    /// turns compositing off.
    pub fn set_mask_map(&mut self, source: Option<TextureSource>) {
        match source {
            Some(source) => {
                self.mask.set_source(source);
                self.has_mask = true;
            }
            None => self.has_mask = false,
        }
    }

    /// Adopts an existing mask texture, e.g. one carried over from a
    /// previous pipeline.
    pub fn set_mask_texture(&mut self, mask: TextureHandle) {
        self.core.set_uniform("main", "maskMap", &mask);
        self.mask = mask;
        self.has_mask = true;
    }

    pub fn mask_texture(&self) -> Option<TextureHandle> {
        self.has_mask.then(|| self.mask.clone())
    }

    pub fn has_mask(&self) -> bool {
        self.has_mask
    }

    /// Blacks out the output while segmentation has nothing to offer.
    pub fn set_empty_frame(&mut self, empty: bool) {
        self.empty_frame = empty;
        self.core
            .set_uniform("main", "emptyFrame", i32::from(empty));
    }

    pub fn empty_frame(&self) -> bool {
        self.empty_frame
    }

    pub fn set_background(&mut self, background: Background) {
        self.live = None;
        self.back_ready = false;
        match background {
            Background::None => {
                self.apply_color(DEFAULT_BACK_COLOR);
                self.mode = Mode::Color;
            }
            Background::Color(color) => {
                self.apply_color(&color);
                self.mode = Mode::Color;
            }
            Background::Image(image) => {
                self.back_map.set_source(TextureSource::Image(image));
                self.mode = Mode::Image { url: None };
                self.back_ready = true;
            }
            Background::Url(url) => {
                self.assets.request(&url);
                self.mode = Mode::Image { url: Some(url) };
                self.sync_background();
            }
            Background::Live(texture) => {
                self.core.set_uniform("main", "backMap", &texture);
                self.live = Some(texture);
                self.mode = Mode::Live;
                self.back_ready = true;
            }
        }
        if matches!(self.mode, Mode::Image { .. }) {
            let back_map = self.back_map.clone();
            self.core.set_uniform("main", "backMap", &back_map);
        }
        self.update_back_uniforms();
    }

    /// Switches to the blurred-source background. Clamped to `[0.1, 1]`.
    pub fn set_blur_intensity(&mut self, intensity: f32) {
        let intensity = if intensity.is_finite() {
            intensity.clamp(0.1, 1.0)
        } else {
            0.1
        };
        self.blur_intensity = intensity;
        self.core.set_uniform("blur", "intensity", intensity);
        if let Some(blur) = self.core.fb_texture("blur") {
            self.core.set_uniform("main", "backMap", &blur);
        }
        self.live = None;
        self.mode = Mode::Blur;
        self.back_ready = true;
        self.update_back_uniforms();
    }

    pub fn blur_intensity(&self) -> f32 {
        self.blur_intensity
    }

    /// Serializable part of the background configuration.
    pub fn settings(&self) -> BackgroundSettings {
        match &self.mode {
            Mode::Color if self.color.eq_ignore_ascii_case(DEFAULT_BACK_COLOR) => {
                BackgroundSettings::None
            }
            Mode::Color => BackgroundSettings::Color {
                color: self.color.clone(),
            },
            Mode::Image { url: Some(url) } => BackgroundSettings::Image { url: url.clone() },
            Mode::Image { url: None } | Mode::Live => BackgroundSettings::Live,
            Mode::Blur => BackgroundSettings::Blur {
                intensity: self.blur_intensity,
            },
        }
    }

    /// Background texture that cannot be described by [`Self::settings`].
    pub fn background_texture(&self) -> Option<TextureHandle> {
        match &self.mode {
            Mode::Live => self.live.clone(),
            Mode::Image { url: None } => Some(self.back_map.clone()),
            _ => None,
        }
    }

    fn apply_color(&mut self, color: &str) {
        let (hex, rgba) = match parse_hex_color(color) {
            Some(rgba) => (color.trim().to_string(), rgba),
            None => {
                tracing::warn!(color, "unparseable background color; using default");
                let rgba = parse_hex_color(DEFAULT_BACK_COLOR).unwrap_or([0.0, 0.0, 0.0, 1.0]);
                (DEFAULT_BACK_COLOR.to_string(), rgba)
            }
        };
        self.color = hex;
        self.core
            .set_uniform("main", "backColor", [rgba[0], rgba[1], rgba[2]]);
    }

    /// Picks up a URL background once the cache has it.
    fn sync_background(&mut self) {
        if let Mode::Image { url: Some(url) } = &self.mode {
            if !self.back_ready {
                if let Some(image) = self.assets.image(url) {
                    tracing::debug!(url = %url, "background image ready");
                    self.back_map.set_source(TextureSource::Image(image));
                    self.back_ready = true;
                    self.update_back_uniforms();
                }
            }
        }
    }

    fn update_back_uniforms(&mut self) {
        let (width, height) = self.core.size();
        let back_size = match &self.mode {
            Mode::Color => None,
            Mode::Blur => Some((width, height)),
            Mode::Image { .. } => self.back_ready.then(|| self.back_map.size()),
            Mode::Live => self.live.as_ref().map(TextureHandle::size),
        };
        let program = self.core.program_mut("main");
        if let Some(program) = program {
            match back_size {
                Some((w, h)) => {
                    program.set_uniform("backType", 1);
                    program.set_uniform("bkSize", [w as f32, h as f32]);
                }
                None => {
                    program.set_uniform("backType", 0);
                }
            }
        }
    }

    fn update_size_uniforms(&mut self) {
        let (width, height) = self.core.size();
        self.core
            .set_uniform("main", "size", [width as f32, height as f32]);
        self.core.set_uniform(
            "blur",
            "radius",
            width.max(height) as f32 * 0.25,
        );
        self.update_back_uniforms();
    }

    fn active(&self) -> bool {
        self.has_mask || self.empty_frame
    }
}

impl Filter for VirtualBackFilter {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    /// Only the composite samples the previous stage; the mip pass reads
    /// the raw source.
    fn on_map_changed(&mut self, map: &TextureHandle) {
        self.core.set_uniform("main", "map", map);
    }

    fn output(&self) -> Option<TextureHandle> {
        if self.active() {
            return self.core.fb_texture("main");
        }
        self.map()
    }

    fn update_size(&mut self, renderer: &Renderer) {
        let (width, height) = renderer.get_size();
        self.core.resize(width, height);
        self.update_size_uniforms();
    }

    fn render(&mut self, renderer: &mut Renderer) {
        self.sync_background();
        if !self.active() {
            return;
        }
        let ctx = self.core.context().clone();
        match self.mode {
            Mode::Blur if self.source.is_some() => {
                self.core.draw(renderer, "mip", Some("mip"));
                if let Some(mip) = self.core.fb_texture("mip") {
                    mip.update_mipmap(&ctx);
                }
                self.core.draw(renderer, "blur", Some("blur"));
            }
            Mode::Live => {
                if let Some(live) = &self.live {
                    live.refresh(&ctx);
                }
                self.update_back_uniforms();
            }
            _ => {}
        }
        self.core.draw(renderer, "main", Some("main"));
    }

    fn destroy(&mut self, clear_buffer: bool) {
        self.core.destroy(clear_buffer);
        self.mask.release();
        self.back_map.release();
    }
}

#[cfg(test)]
mod tests {
    use super::{COMPOSITE_FS, MIP_BLUR_FS};
    use crate::filter::QUAD_VS;
    use crate::gpu::{translate, UniformKind};

    #[test]
    fn composite_reflects_int_switches() {
        let shader = translate(QUAD_VS, COMPOSITE_FS).expect("translate");
        shader.validate().expect("validate");
        assert_eq!(shader.uniform("backType").map(|u| u.kind), Some(UniformKind::Int));
        assert_eq!(shader.texture_units, 3);
    }

    #[test]
    fn mip_blur_validates() {
        let shader = translate(QUAD_VS, MIP_BLUR_FS).expect("translate");
        shader.validate().expect("validate");
    }
}
