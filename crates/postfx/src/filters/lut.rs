use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::Result;
use fxassets::{AssetCache, AssetState, LoadReport};
use fxconfig::LutPreset;

use crate::filter::{Filter, FilterCore, Quad, SizeRule, QUAD_VS};
use crate::gpu::{FrameBufferOptions, GpuContext, Renderer, TextureHandle, TextureSource};

/// `vec3 lut64(vec3 color)` for the 512x512, 8x8-tile layout. Samples the
/// `lut` uniform, which the including shader declares.
pub(crate) const LUT64_GLSL: &str = "
vec3 lut64(vec3 color) {
    float blue = color.b * 63.0;
    vec2 q1;
    float fb = floor(blue);
    q1.y = floor(fb * 0.125);
    q1.x = fb - q1.y * 8.0;
    vec2 q2;
    float cb = ceil(blue);
    q2.y = floor(cb * 0.125);
    q2.x = cb - q2.y * 8.0;
    vec2 t = 0.123046875 * color.rg + vec2(0.0009765625);
    vec3 p1 = texture2D(lut, q1 * 0.125 + t).rgb;
    vec3 p2 = texture2D(lut, q2 * 0.125 + t).rgb;
    return mix(p1, p2, fract(blue));
}
";

const LUT_UNIFORMS: &str = "
uniform sampler2D map;
uniform sampler2D lut;
uniform float intensity;
varying vec2 vuv;
";

const LUT_MAIN: &str = "
void main() {
    vec4 color = texture2D(map, vuv);
    vec3 graded = lut64(color.rgb);
    gl_FragColor = vec4(mix(color.rgb, graded, intensity), color.a);
}
";

/// Fragment shader grading `map` through `lut` by `intensity`.
pub(crate) fn lut_fragment() -> String {
    format!("precision highp float;\n{LUT_UNIFORMS}{LUT64_GLSL}{LUT_MAIN}")
}

#[derive(Debug, Clone)]
struct PresetState {
    url: String,
    intensity: f32,
}

/// Color grading through a named, asynchronously loaded LUT image.
pub struct LutFilter {
    core: FilterCore,
    assets: AssetCache,
    lut_map: TextureHandle,
    presets: BTreeMap<String, PresetState>,
    current: Option<String>,
    /// URL whose pixels `lut_map` currently holds.
    uploaded: Option<String>,
}

impl LutFilter {
    pub fn new(
        ctx: &Rc<GpuContext>,
        quad: &Quad,
        renderer: &Renderer,
        assets: AssetCache,
    ) -> Result<Self> {
        let (width, height) = renderer.get_size();
        let mut core = FilterCore::new(ctx, quad, width, height);
        let lut_map = TextureHandle::from_color("lut", [0.0, 0.0, 0.0, 1.0]);
        let program = core.add_program("main", QUAD_VS, &lut_fragment())?;
        program.set_uniform("lut", &lut_map);
        program.set_uniform("intensity", 0.0);
        core.add_framebuffer("main", SizeRule::Full, FrameBufferOptions::default());
        Ok(Self {
            core,
            assets,
            lut_map,
            presets: BTreeMap::new(),
            current: None,
            uploaded: None,
        })
    }

    /// Registers named presets and starts loading all of them.
    ///
    /// `on_complete` runs from a later [`AssetCache::poll`] once every URL
    /// has either loaded or exhausted its retries.
    pub fn set_luts_src<F>(&mut self, presets: &BTreeMap<String, LutPreset>, on_complete: F)
    where
        F: FnOnce(LoadReport) + Send + 'static,
    {
        for (name, preset) in presets {
            self.presets.insert(
                name.clone(),
                PresetState {
                    url: preset.url.clone(),
                    intensity: preset.intensity.clamp(0.0, 1.0),
                },
            );
        }
        let urls: Vec<String> = presets.values().map(|preset| preset.url.clone()).collect();
        self.assets.load_all(urls, on_complete);
    }

    /// Selects a preset. `None` or an unknown name disables grading; an
    /// omitted intensity keeps the preset's current one.
    pub fn setlut(&mut self, name: Option<&str>, intensity: Option<f32>) {
        self.current = match name {
            Some(name) if self.presets.contains_key(name) => Some(name.to_string()),
            Some(name) => {
                tracing::warn!(lut = name, "unknown lut preset; grading disabled");
                None
            }
            None => None,
        };
        let url = self.current_preset_mut().map(|preset| {
            if let Some(intensity) = intensity {
                preset.intensity = intensity.clamp(0.0, 1.0);
            }
            preset.url.clone()
        });
        if let Some(url) = url {
            if !matches!(self.assets.state(&url), Some(AssetState::Ready(_) | AssetState::Pending)) {
                self.assets.request(&url);
            }
        }
        self.sync();
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Intensity stored for the current preset, loaded or not.
    pub fn requested_intensity(&self) -> Option<f32> {
        self.current_preset().map(|preset| preset.intensity)
    }

    /// Effective intensity: zero until the current LUT image has arrived.
    pub fn intensity(&self) -> f32 {
        match (self.current_preset(), &self.uploaded) {
            (Some(preset), Some(uploaded)) if *uploaded == preset.url => preset.intensity,
            _ => 0.0,
        }
    }

    fn current_preset(&self) -> Option<&PresetState> {
        self.current.as_ref().and_then(|name| self.presets.get(name))
    }

    fn current_preset_mut(&mut self) -> Option<&mut PresetState> {
        let name = self.current.clone()?;
        self.presets.get_mut(&name)
    }

    /// Moves a freshly loaded LUT into the texture and refreshes the
    /// intensity uniform.
    fn sync(&mut self) {
        if let Some(url) = self.current_preset().map(|preset| preset.url.clone()) {
            if self.uploaded.as_deref() != Some(url.as_str()) {
                if let Some(image) = self.assets.image(&url) {
                    tracing::debug!(url = %url, "lut image ready");
                    self.lut_map.set_source(TextureSource::Image(image));
                    self.uploaded = Some(url);
                }
            }
        }
        let intensity = self.intensity();
        self.core.set_uniform("main", "intensity", intensity);
    }
}

impl Filter for LutFilter {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    fn output(&self) -> Option<TextureHandle> {
        if self.intensity() > 0.0 {
            return self.core.fb_texture("main");
        }
        self.map()
    }

    fn render(&mut self, renderer: &mut Renderer) {
        self.sync();
        if self.intensity() > 0.0 {
            self.core.draw(renderer, "main", Some("main"));
        }
    }

    fn destroy(&mut self, clear_buffer: bool) {
        self.core.destroy(clear_buffer);
        self.lut_map.release();
    }
}

#[cfg(test)]
mod tests {
    use super::lut_fragment;
    use crate::filter::QUAD_VS;
    use crate::gpu::translate;

    #[test]
    fn lut_shader_validates() {
        let shader = translate(QUAD_VS, &lut_fragment()).expect("translate");
        shader.validate().expect("validate");
        assert!(shader.uniform("lut").is_some());
        assert!(shader.uniform("intensity").is_some());
    }
}
