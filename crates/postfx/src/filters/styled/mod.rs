//! Mutually exclusive one-shot looks.
//!
//! Every style is a [`StyleSpec`]: an ordered list of full-screen passes,
//! the resource images they sample and how the user intensity maps onto
//! each pass. [`PassChain`] runs a spec; [`StyledFilter`] owns at most one
//! chain and swaps it when the style changes.

mod graded;
mod painted;
mod single;

use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use anyhow::Result;
use fxassets::{AssetCache, AssetState};
use fxconfig::PipelineConfig;

use crate::filter::{Filter, FilterCore, Quad, SizeRule, QUAD_VS};
use crate::gpu::{
    FrameBufferOptions, GpuContext, Renderer, TextureHandle, TextureOptions, TextureSource,
    UniformKind, UniformValue, Wrap,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StyleKind {
    Glitch,
    Shake,
    SoulOut,
    Wave,
    OldFilm,
    Distortion,
    Sketch,
    Flash,
    WaterFlow,
    Fire,
    Hacker,
    Snow,
    Constellation,
    Magnifier,
    Mystery,
}

impl StyleKind {
    pub const ALL: [StyleKind; 15] = [
        StyleKind::Glitch,
        StyleKind::Shake,
        StyleKind::SoulOut,
        StyleKind::Wave,
        StyleKind::OldFilm,
        StyleKind::Distortion,
        StyleKind::Sketch,
        StyleKind::Flash,
        StyleKind::WaterFlow,
        StyleKind::Fire,
        StyleKind::Hacker,
        StyleKind::Snow,
        StyleKind::Constellation,
        StyleKind::Magnifier,
        StyleKind::Mystery,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StyleKind::Glitch => "glitch",
            StyleKind::Shake => "shake",
            StyleKind::SoulOut => "soulOut",
            StyleKind::Wave => "wave",
            StyleKind::OldFilm => "oldFilm",
            StyleKind::Distortion => "distortion",
            StyleKind::Sketch => "sketch",
            StyleKind::Flash => "flash",
            StyleKind::WaterFlow => "waterflow",
            StyleKind::Fire => "fire",
            StyleKind::Hacker => "hacker",
            StyleKind::Snow => "snow",
            StyleKind::Constellation => "constellation",
            StyleKind::Magnifier => "magnifier",
            StyleKind::Mystery => "mystery",
        }
    }

    fn spec(self) -> StyleSpec {
        match self {
            StyleKind::Glitch => single::glitch(),
            StyleKind::Shake => single::shake(),
            StyleKind::SoulOut => single::soul_out(),
            StyleKind::Wave => single::wave(),
            StyleKind::Flash => single::flash(),
            StyleKind::WaterFlow => single::water_flow(),
            StyleKind::Magnifier => single::magnifier(),
            StyleKind::OldFilm => graded::old_film(),
            StyleKind::Distortion => graded::distortion(),
            StyleKind::Fire => graded::fire(),
            StyleKind::Hacker => graded::hacker(),
            StyleKind::Snow => graded::snow(),
            StyleKind::Constellation => graded::constellation(),
            StyleKind::Sketch => painted::sketch(),
            StyleKind::Mystery => painted::mystery(),
        }
    }
}

impl fmt::Display for StyleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown style '{0}'")]
pub struct UnknownStyle(pub String);

impl FromStr for StyleKind {
    type Err = UnknownStyle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StyleKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| UnknownStyle(s.to_string()))
    }
}

/// Where a pass reads one of its textures from.
#[derive(Debug, Clone, Copy)]
enum Input {
    Source,
    Pass(&'static str),
}

struct Pass {
    name: &'static str,
    fragment: String,
    rule: SizeRule,
    mipmaps: bool,
    inputs: Vec<(&'static str, Input)>,
}

impl Pass {
    fn new(name: &'static str, fragment: impl Into<String>) -> Self {
        Self {
            name,
            fragment: fragment.into(),
            rule: SizeRule::Full,
            mipmaps: false,
            inputs: vec![("map", Input::Source)],
        }
    }

    fn reads(mut self, uniform: &'static str, input: Input) -> Self {
        self.inputs.retain(|(name, _)| *name != uniform);
        self.inputs.push((uniform, input));
        self
    }

    fn without_map(mut self) -> Self {
        self.inputs.retain(|(name, _)| *name != "map");
        self
    }

    fn mip_chain(mut self) -> Self {
        self.rule = SizeRule::PowerOfTwo;
        self.mipmaps = true;
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum Resource {
    /// A key of the `[styles]` config table.
    Style(&'static str),
    /// A named color-grade preset.
    Lut(&'static str),
}

struct SamplerSpec {
    program: &'static str,
    uniform: &'static str,
    resource: Resource,
    wrap: Wrap,
    placeholder: [f32; 4],
    /// Holds the program's intensity at zero until the image arrives.
    gates: bool,
}

impl SamplerSpec {
    fn image(program: &'static str, uniform: &'static str, key: &'static str) -> Self {
        Self {
            program,
            uniform,
            resource: Resource::Style(key),
            wrap: Wrap::Repeat,
            placeholder: [1.0, 1.0, 1.0, 1.0],
            gates: false,
        }
    }

    fn lut(program: &'static str, resource: Resource) -> Self {
        Self {
            program,
            uniform: "lut",
            resource,
            wrap: Wrap::Clamp,
            placeholder: [0.0, 0.0, 0.0, 1.0],
            gates: true,
        }
    }

    fn placeholder(mut self, color: [f32; 4]) -> Self {
        self.placeholder = color;
        self
    }
}

/// `program.intensity = curve(user intensity)`.
struct Curve {
    program: &'static str,
    curve: fn(f32) -> f32,
}

fn linear(i: f32) -> f32 {
    i
}

fn half_up(i: f32) -> f32 {
    i * 0.5 + 0.5
}

/// Declarative description of one style.
struct StyleSpec {
    passes: Vec<Pass>,
    samplers: Vec<SamplerSpec>,
    curves: Vec<Curve>,
}

impl StyleSpec {
    fn single(fragment: &str) -> Self {
        Self {
            passes: vec![Pass::new("main", fragment)],
            samplers: Vec::new(),
            curves: vec![Curve {
                program: "main",
                curve: linear,
            }],
        }
    }

    /// An effect pass followed by a color grade.
    fn graded(effect: &'static str, fragment: &str, lut: Resource) -> Self {
        Self {
            passes: vec![
                Pass::new(effect, fragment),
                Pass::new("grade", super::lut::lut_fragment()).reads("map", Input::Pass(effect)),
            ],
            samplers: vec![SamplerSpec::lut("grade", lut)],
            curves: vec![
                Curve {
                    program: effect,
                    curve: linear,
                },
                Curve {
                    program: "grade",
                    curve: half_up,
                },
            ],
        }
    }

    /// A color grade followed by an effect pass.
    fn pre_graded(effect: &'static str, fragment: &str, lut: Resource) -> Self {
        Self {
            passes: vec![
                Pass::new("grade", super::lut::lut_fragment()),
                Pass::new(effect, fragment).reads("map", Input::Pass("grade")),
            ],
            samplers: vec![SamplerSpec::lut("grade", lut)],
            curves: vec![
                Curve {
                    program: "grade",
                    curve: half_up,
                },
                Curve {
                    program: effect,
                    curve: linear,
                },
            ],
        }
    }

    fn sampler(mut self, sampler: SamplerSpec) -> Self {
        self.samplers.push(sampler);
        self
    }
}

struct Sampler {
    spec: SamplerSpec,
    texture: TextureHandle,
    url: Option<String>,
    ready: bool,
}

impl Sampler {
    fn sync(&mut self, assets: &AssetCache) -> bool {
        if self.ready {
            return false;
        }
        let Some(url) = &self.url else {
            return false;
        };
        let Some(image) = assets.image(url) else {
            return false;
        };
        tracing::debug!(url = %url, uniform = self.spec.uniform, "style resource ready");
        self.texture.set_source(TextureSource::Image(image));
        self.ready = true;
        true
    }
}

/// Runs a [`StyleSpec`] as one pipeline stage.
pub struct PassChain {
    kind: StyleKind,
    core: FilterCore,
    assets: AssetCache,
    order: Vec<(&'static str, bool)>,
    source_inputs: Vec<(&'static str, &'static str)>,
    samplers: Vec<Sampler>,
    curves: Vec<Curve>,
    intensity: f32,
}

impl PassChain {
    fn new(
        kind: StyleKind,
        ctx: &Rc<GpuContext>,
        quad: &Quad,
        size: (u32, u32),
        assets: AssetCache,
        config: &PipelineConfig,
    ) -> Result<Self> {
        let spec = kind.spec();
        let mut core = FilterCore::new(ctx, quad, size.0, size.1);
        let mut order = Vec::with_capacity(spec.passes.len());
        let mut source_inputs = Vec::new();

        for pass in &spec.passes {
            core.add_program(pass.name, QUAD_VS, &pass.fragment)?;
            core.add_framebuffer(
                pass.name,
                pass.rule,
                FrameBufferOptions {
                    depth: false,
                    mipmaps: pass.mipmaps,
                },
            );
            order.push((pass.name, pass.mipmaps));
        }
        for pass in &spec.passes {
            for (uniform, input) in &pass.inputs {
                match input {
                    Input::Source => source_inputs.push((pass.name, *uniform)),
                    Input::Pass(from) => {
                        if let Some(texture) = core.fb_texture(from) {
                            core.set_uniform(pass.name, uniform, &texture);
                        }
                    }
                }
            }
        }

        let mut samplers = Vec::with_capacity(spec.samplers.len());
        for sampler in spec.samplers {
            let url = match sampler.resource {
                Resource::Style(key) => config.style_resource(key),
                Resource::Lut(name) => config.lut_url(name),
            };
            if url.is_none() {
                tracing::warn!(style = %kind, resource = ?sampler.resource, "no url for style resource");
            }
            let texture = TextureHandle::new(
                sampler.uniform,
                TextureSource::Color(sampler.placeholder),
                TextureOptions {
                    wrap_s: sampler.wrap,
                    wrap_t: sampler.wrap,
                    ..TextureOptions::default()
                },
            );
            core.set_uniform(sampler.program, sampler.uniform, &texture);
            if let Some(url) = &url {
                if !matches!(assets.state(url), Some(AssetState::Ready(_) | AssetState::Pending)) {
                    assets.request(url);
                }
            }
            let mut sampler = Sampler {
                spec: sampler,
                texture,
                url,
                ready: false,
            };
            sampler.sync(&assets);
            samplers.push(sampler);
        }

        let mut chain = Self {
            kind,
            core,
            assets,
            order,
            source_inputs,
            samplers,
            curves: spec.curves,
            intensity: 0.0,
        };
        chain.set_uniform_all("time", 0.0);
        chain.sync_size();
        chain.sync_intensity();
        Ok(chain)
    }

    pub fn kind(&self) -> StyleKind {
        self.kind
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    pub fn set_intensity(&mut self, intensity: f32) {
        self.intensity = intensity.clamp(0.0, 1.0);
        self.sync_intensity();
    }

    pub fn set_time(&mut self, time: f32) {
        self.set_uniform_all("time", time);
    }

    /// False at intensity 0, where the chain passes its input through.
    pub fn is_active(&self) -> bool {
        self.intensity > 0.0
    }

    /// Whether every resource image of the style has arrived.
    pub fn is_ready(&self) -> bool {
        self.samplers.iter().all(|sampler| sampler.ready)
    }

    /// Sets a uniform on every program that declares it.
    pub fn set_uniform_all(&mut self, name: &str, value: impl Into<UniformValue>) {
        let value = value.into();
        let names: Vec<&'static str> = self.order.iter().map(|(name, _)| *name).collect();
        for program in names {
            let declared = self
                .core
                .program(program)
                .is_some_and(|p| p.shader().uniform(name).is_some());
            if declared {
                self.core.set_uniform(program, name, value.clone());
            }
        }
    }

    fn sync_intensity(&mut self) {
        for curve in &self.curves {
            let gated = self
                .samplers
                .iter()
                .any(|s| s.spec.gates && s.spec.program == curve.program && !s.ready);
            let value = if gated { 0.0 } else { (curve.curve)(self.intensity) };
            self.core.set_uniform(curve.program, "intensity", value);
        }
    }

    fn sync_size(&mut self) {
        let (width, height) = self.core.size();
        self.set_uniform_all("size", [width as f32, height as f32]);
        let mip = self
            .order
            .iter()
            .find(|(_, mipmaps)| *mipmaps)
            .and_then(|(name, _)| self.core.framebuffer(name))
            .map(|fb| fb.size());
        if let Some((w, h)) = mip {
            self.set_uniform_all("minSize", w.min(h) as f32);
        }
    }

    fn sync_samplers(&mut self) {
        let mut changed = false;
        for sampler in &mut self.samplers {
            changed |= sampler.sync(&self.assets);
        }
        if changed {
            self.sync_intensity();
        }
    }
}

impl Filter for PassChain {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    fn on_map_changed(&mut self, map: &TextureHandle) {
        for (program, uniform) in self.source_inputs.clone() {
            self.core.set_uniform(program, uniform, map);
        }
    }

    fn output(&self) -> Option<TextureHandle> {
        if !self.is_active() {
            return self.map();
        }
        let (last, _) = self.order.last()?;
        self.core.fb_texture(last)
    }

    fn update_size(&mut self, renderer: &Renderer) {
        let (width, height) = renderer.get_size();
        self.core.resize(width, height);
        self.sync_size();
    }

    fn render(&mut self, renderer: &mut Renderer) {
        // samplers still sync so resources land while idle
        self.sync_samplers();
        if self.core.map().is_none() || !self.is_active() {
            return;
        }
        let ctx = self.core.context().clone();
        for &(name, mipmaps) in &self.order {
            self.core.draw(renderer, name, Some(name));
            if mipmaps {
                if let Some(texture) = self.core.fb_texture(name) {
                    texture.update_mipmap(&ctx);
                }
            }
        }
    }

    fn destroy(&mut self, clear_buffer: bool) {
        self.core.destroy(clear_buffer);
        for sampler in &self.samplers {
            sampler.texture.release();
        }
    }
}

/// Registry stage holding the selected style, if any.
pub struct StyledFilter {
    core: FilterCore,
    assets: AssetCache,
    config: PipelineConfig,
    current: Option<PassChain>,
    intensity: f32,
    time: f32,
    magnifier: [f32; 2],
}

impl StyledFilter {
    pub fn new(
        ctx: &Rc<GpuContext>,
        quad: &Quad,
        renderer: &Renderer,
        assets: AssetCache,
        config: PipelineConfig,
    ) -> Self {
        let (width, height) = renderer.get_size();
        Self {
            core: FilterCore::new(ctx, quad, width, height),
            assets,
            config,
            current: None,
            intensity: 1.0,
            time: 0.0,
            magnifier: [0.0, 0.0],
        }
    }

    /// Switches style. A different style tears down the active one first;
    /// `None` or an unknown name disables styling.
    pub fn set_styled(&mut self, name: Option<&str>, intensity: f32) -> Result<()> {
        let kind = match name.map(str::parse::<StyleKind>) {
            Some(Ok(kind)) => Some(kind),
            Some(Err(err)) => {
                tracing::warn!(%err, "styling disabled");
                None
            }
            None => None,
        };
        self.intensity = intensity.clamp(0.0, 1.0);

        if self.current.as_ref().map(PassChain::kind) != kind {
            if let Some(mut old) = self.current.take() {
                tracing::debug!(style = %old.kind(), "tearing down style");
                old.destroy(false);
            }
        }
        if let (Some(kind), None) = (kind, &self.current) {
            let Some(quad) = self.core.quad().cloned() else {
                tracing::warn!(style = %kind, "stage destroyed; style not built");
                return Ok(());
            };
            let mut chain = PassChain::new(
                kind,
                self.core.context(),
                &quad,
                self.core.size(),
                self.assets.clone(),
                &self.config,
            )?;
            if let Some(map) = self.core.map().cloned() {
                chain.set_map(&map);
            }
            chain.set_time(self.time);
            if kind == StyleKind::Magnifier {
                chain.set_uniform_all("pos", self.magnifier);
            }
            tracing::debug!(style = %kind, "style built");
            self.current = Some(chain);
        }
        if let Some(chain) = &mut self.current {
            chain.set_intensity(self.intensity);
        }
        Ok(())
    }

    pub fn current(&self) -> Option<StyleKind> {
        self.current.as_ref().map(PassChain::kind)
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn set_time(&mut self, time: f32) {
        self.time = time;
        if let Some(chain) = &mut self.current {
            chain.set_time(time);
        }
    }

    /// Lens position for `magnifier`, each axis clamped to [0, 1].
    pub fn set_magnifier_position(&mut self, position: [f32; 2]) {
        self.magnifier = [position[0].clamp(0.0, 1.0), position[1].clamp(0.0, 1.0)];
        if let Some(chain) = &mut self.current {
            if chain.kind() == StyleKind::Magnifier {
                chain.set_uniform_all("pos", self.magnifier);
            }
        }
    }

    pub fn magnifier_position(&self) -> [f32; 2] {
        self.magnifier
    }

    pub fn chain(&self) -> Option<&PassChain> {
        self.current.as_ref()
    }
}

impl Filter for StyledFilter {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    fn on_map_changed(&mut self, map: &TextureHandle) {
        if let Some(chain) = &mut self.current {
            chain.set_map(map);
        }
    }

    fn output(&self) -> Option<TextureHandle> {
        match &self.current {
            Some(chain) => chain.output(),
            None => self.map(),
        }
    }

    fn update_size(&mut self, renderer: &Renderer) {
        let (width, height) = renderer.get_size();
        self.core.resize(width, height);
        if let Some(chain) = &mut self.current {
            chain.update_size(renderer);
        }
    }

    fn render(&mut self, renderer: &mut Renderer) {
        if let Some(chain) = &mut self.current {
            chain.render(renderer);
        }
    }

    fn destroy(&mut self, clear_buffer: bool) {
        if let Some(mut chain) = self.current.take() {
            chain.destroy(clear_buffer);
        }
        self.core.destroy(clear_buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::translate;

    #[test]
    fn names_round_trip() {
        for kind in StyleKind::ALL {
            assert_eq!(kind.name().parse::<StyleKind>(), Ok(kind));
        }
        assert_eq!(
            "vaporwave".parse::<StyleKind>(),
            Err(UnknownStyle("vaporwave".into()))
        );
    }

    #[test]
    fn every_pass_validates() {
        for kind in StyleKind::ALL {
            let spec = kind.spec();
            for pass in &spec.passes {
                let shader = translate(QUAD_VS, &pass.fragment)
                    .unwrap_or_else(|err| panic!("{kind}/{}: {err}", pass.name));
                shader
                    .validate()
                    .unwrap_or_else(|err| panic!("{kind}/{}: {err}", pass.name));
            }
        }
    }

    #[test]
    fn specs_reference_declared_uniforms() {
        for kind in StyleKind::ALL {
            let spec = kind.spec();
            let shader_of = |program: &str| {
                let pass = spec
                    .passes
                    .iter()
                    .find(|pass| pass.name == program)
                    .unwrap_or_else(|| panic!("{kind}: no pass {program}"));
                translate(QUAD_VS, &pass.fragment).expect("translate")
            };
            for pass in &spec.passes {
                let shader = shader_of(pass.name);
                for (uniform, input) in &pass.inputs {
                    let info = shader
                        .uniform(uniform)
                        .unwrap_or_else(|| panic!("{kind}/{}: no {uniform}", pass.name));
                    assert_eq!(info.kind, UniformKind::Texture);
                    if let Input::Pass(from) = input {
                        assert!(spec.passes.iter().any(|p| p.name == *from));
                    }
                }
            }
            for sampler in &spec.samplers {
                let shader = shader_of(sampler.program);
                let info = shader.uniform(sampler.uniform).expect("sampler uniform");
                assert_eq!(info.kind, UniformKind::Texture);
            }
            for curve in &spec.curves {
                let shader = shader_of(curve.program);
                assert_eq!(
                    shader.uniform("intensity").map(|info| info.kind),
                    Some(UniformKind::Float),
                    "{kind}/{}",
                    curve.program
                );
            }
        }
    }

    #[test]
    fn graded_styles_gate_their_lut() {
        for kind in [StyleKind::OldFilm, StyleKind::Fire, StyleKind::Mystery] {
            let spec = kind.spec();
            assert!(spec.samplers.iter().any(|s| s.gates && s.uniform == "lut"));
        }
    }
}
