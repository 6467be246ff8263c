use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use fxassets::{AssetCache, LoadReport};
use fxconfig::{BackgroundSettings, LutSelection, PipelineConfig, PipelineSnapshot, StyledSelection};
use image::RgbaImage;

use crate::filter::{Filter, Quad};
use crate::filters::{
    AdvBeautyFilter, Background, BeautyFilter, LutFilter, NormalFilter, StyledFilter,
    VirtualBackFilter,
};
use crate::gpu::{GpuContext, Renderer, ResourceCounts, TextureHandle, TextureSource};

/// The whole effect chain on one GPU context.
///
/// Stages always run in the same order: face warp, skin beauty, style,
/// color grade, background, present. A stage with nothing to do hands its
/// input straight to the next one.
pub struct Filters {
    ctx: Rc<GpuContext>,
    config: PipelineConfig,
    assets: AssetCache,
    renderer: Renderer,
    quad: Quad,
    source: TextureHandle,
    /// Seconds since the first [`Filters::update`]; negative before it.
    time: f32,
    adv_beauty: AdvBeautyFilter,
    beauty: BeautyFilter,
    styled: StyledFilter,
    lut: LutFilter,
    virtual_back: VirtualBackFilter,
    normal: NormalFilter,
}

impl Filters {
    /// Opens a headless GPU context and builds every stage on it.
    pub fn new(config: PipelineConfig, assets: AssetCache, width: u32, height: u32) -> Result<Self> {
        let ctx = GpuContext::new_headless()?;
        Self::with_context(ctx, config, assets, width, height)
    }

    pub fn with_context(
        ctx: Rc<GpuContext>,
        config: PipelineConfig,
        assets: AssetCache,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let renderer = Renderer::new(&ctx, width, height, config.pixel_ratio);
        let quad = Quad::new(&ctx);
        let source = TextureHandle::empty("source", width.max(1), height.max(1), false);

        let adv_beauty = AdvBeautyFilter::new(&ctx, &quad, &renderer)
            .context("failed to build the face warp stage")?;
        let mut beauty = BeautyFilter::new(&ctx, &quad, &renderer, assets.clone())
            .context("failed to build the beauty stage")?;
        let styled = StyledFilter::new(&ctx, &quad, &renderer, assets.clone(), config.clone());
        let mut lut = LutFilter::new(&ctx, &quad, &renderer, assets.clone())
            .context("failed to build the color grade stage")?;
        let virtual_back = VirtualBackFilter::new(&ctx, &quad, &renderer, assets.clone())
            .context("failed to build the background stage")?;
        let normal = NormalFilter::new(&ctx, &quad, &renderer, config.present.flip_y)
            .context("failed to build the present stage")?;

        lut.set_luts_src(&config.lut_presets(), |report| log_report("lut presets", &report));
        beauty.set_luts_src(
            Some(config.beauty.whiten_lut.as_str()),
            Some(config.beauty.redden_lut.as_str()),
            |report| log_report("beauty luts", &report),
        );

        let mut filters = Self {
            ctx,
            config,
            assets,
            renderer,
            quad,
            source,
            time: -1.0,
            adv_beauty,
            beauty,
            styled,
            lut,
            virtual_back,
            normal,
        };
        if let Some(initial) = filters.config.initial.clone() {
            filters.apply_snapshot(&initial)?;
        }
        tracing::debug!(
            adapter = filters.ctx.adapter_name(),
            width,
            height,
            "pipeline built"
        );
        Ok(filters)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn assets(&self) -> &AssetCache {
        &self.assets
    }

    pub fn context(&self) -> &Rc<GpuContext> {
        &self.ctx
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn quad(&self) -> &Quad {
        &self.quad
    }

    /// The texture fed to the first stage.
    pub fn source(&self) -> &TextureHandle {
        &self.source
    }

    /// Replaces the source pixels. They are uploaded on the next update.
    pub fn set_source(&mut self, source: TextureSource) {
        self.source.set_source(source);
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    /// Logical size; stages are resized to the physical size it implies.
    pub fn set_size(&mut self, width: u32, height: u32) {
        if self.renderer.logical_size() == (width.max(1), height.max(1)) {
            return;
        }
        self.renderer.set_size(width, height);
        self.update_size();
    }

    pub fn set_pixel_ratio(&mut self, ratio: f32) {
        if self.renderer.pixel_ratio() == ratio {
            return;
        }
        self.renderer.set_pixel_ratio(ratio);
        self.update_size();
    }

    fn update_size(&mut self) {
        let renderer = &self.renderer;
        self.adv_beauty.update_size(renderer);
        self.beauty.update_size(renderer);
        self.styled.update_size(renderer);
        self.lut.update_size(renderer);
        self.virtual_back.update_size(renderer);
        self.normal.update_size(renderer);
    }

    /// Advances time by `delta`, capped at the configured maximum, then
    /// re-uploads the source and renders a frame. The first call only
    /// starts the clock.
    pub fn update(&mut self, delta: Duration) {
        if self.time < 0.0 {
            self.time = 0.0;
        } else {
            self.time += delta.min(self.config.max_frame_delta).as_secs_f32();
        }
        self.styled.set_time(self.time);
        self.source.refresh(&self.ctx);
        self.render();
    }

    /// Renders one frame through every stage into the canvas.
    pub fn render(&mut self) {
        self.assets.poll();
        let renderer = &mut self.renderer;

        self.adv_beauty.set_map(&self.source);
        self.adv_beauty.render(renderer);

        self.beauty.set_face_mask(self.adv_beauty.face_mask());
        self.beauty.set_feature_paras(self.adv_beauty.feature_paras());
        let [nose_line, forehead, eye_rim] = self.adv_beauty.region_intensity();
        self.beauty.set_region_intensity(nose_line, forehead, eye_rim);

        self.virtual_back.set_source_map(&self.source);

        let mut previous = self.adv_beauty.output();
        let stages: [&mut dyn Filter; 5] = [
            &mut self.beauty,
            &mut self.styled,
            &mut self.lut,
            &mut self.virtual_back,
            &mut self.normal,
        ];
        for stage in stages {
            let Some(input) = previous else {
                tracing::warn!("stage has no input; frame dropped");
                return;
            };
            stage.set_map(&input);
            stage.render(renderer);
            previous = stage.output();
        }
    }

    /// Every setter's current value, ready to replay onto another pipeline.
    pub fn snapshot(&self) -> PipelineSnapshot {
        let (width, height) = self.renderer.logical_size();
        PipelineSnapshot {
            adv: self.adv_beauty.knobs().changed(),
            debug_wire: self.adv_beauty.debug_wire(),
            size: Some([width, height]),
            pixel_ratio: Some(self.renderer.pixel_ratio()),
            beauty: self.beauty.settings(),
            lut: LutSelection {
                name: self.lut.current().map(str::to_string),
                intensity: self.lut.requested_intensity(),
            },
            background: self.virtual_back.settings(),
            styled: StyledSelection {
                name: self.styled.current().map(|kind| kind.name().to_string()),
                intensity: self.styled.intensity(),
            },
        }
    }

    pub fn apply_snapshot(&mut self, snapshot: &PipelineSnapshot) -> Result<()> {
        if let Some(ratio) = snapshot.pixel_ratio {
            self.set_pixel_ratio(ratio);
        }
        if let Some([width, height]) = snapshot.size {
            self.set_size(width, height);
        }
        self.adv_beauty.preset_adv_effect(&snapshot.adv);
        self.adv_beauty.set_debug_wire(snapshot.debug_wire);
        self.beauty.apply_settings(&snapshot.beauty);
        self.lut
            .setlut(snapshot.lut.name.as_deref(), snapshot.lut.intensity);
        match &snapshot.background {
            BackgroundSettings::None => self.virtual_back.set_background(Background::None),
            BackgroundSettings::Color { color } => self
                .virtual_back
                .set_background(Background::Color(color.clone())),
            BackgroundSettings::Image { url } => self
                .virtual_back
                .set_background(Background::Url(url.clone())),
            BackgroundSettings::Blur { intensity } => {
                self.virtual_back.set_blur_intensity(*intensity)
            }
            BackgroundSettings::Live => {}
        }
        self.styled
            .set_styled(snapshot.styled.name.as_deref(), snapshot.styled.intensity)
    }

    /// Builds a fresh pipeline on a new GPU context and carries over every
    /// setting, the source pixels, the mask and any live background.
    pub fn clone_pipeline(&self) -> Result<Filters> {
        let (width, height) = self.renderer.logical_size();
        let mut next = Filters::new(self.config.clone(), self.assets.clone(), width, height)?;
        next.apply_snapshot(&self.snapshot())?;
        next.set_source(self.source.source());
        next.time = self.time;
        next.styled.set_time(self.time);
        next.styled
            .set_magnifier_position(self.styled.magnifier_position());
        next.virtual_back.set_empty_frame(self.virtual_back.empty_frame());
        if let Some(mask) = self.virtual_back.mask_texture() {
            next.virtual_back.set_mask_texture(mask);
        }
        if let Some(background) = self.virtual_back.background_texture() {
            next.virtual_back.set_background(Background::Live(background));
        }
        tracing::debug!("pipeline cloned onto a new context");
        Ok(next)
    }

    /// False once the GPU device has been lost.
    pub fn is_alive(&self) -> bool {
        !self.ctx.is_lost()
    }

    /// Reads the canvas back, flipped for presentation if configured.
    pub fn read_output(&self) -> Result<RgbaImage> {
        self.renderer.read_canvas()
    }

    pub fn stats(&self) -> ResourceCounts {
        self.ctx.stats().counts()
    }

    /// Releases every stage's GPU objects. The pipeline renders nothing
    /// afterwards.
    pub fn destroy(&mut self) {
        self.adv_beauty.destroy(true);
        self.beauty.destroy(true);
        self.styled.destroy(true);
        self.lut.destroy(true);
        self.virtual_back.destroy(true);
        self.normal.destroy(true);
        self.source.release();
    }

    pub fn adv_beauty(&self) -> &AdvBeautyFilter {
        &self.adv_beauty
    }

    pub fn adv_beauty_mut(&mut self) -> &mut AdvBeautyFilter {
        &mut self.adv_beauty
    }

    pub fn beauty(&self) -> &BeautyFilter {
        &self.beauty
    }

    pub fn beauty_mut(&mut self) -> &mut BeautyFilter {
        &mut self.beauty
    }

    pub fn styled(&self) -> &StyledFilter {
        &self.styled
    }

    pub fn styled_mut(&mut self) -> &mut StyledFilter {
        &mut self.styled
    }

    pub fn lut(&self) -> &LutFilter {
        &self.lut
    }

    pub fn lut_mut(&mut self) -> &mut LutFilter {
        &mut self.lut
    }

    pub fn virtual_back(&self) -> &VirtualBackFilter {
        &self.virtual_back
    }

    pub fn virtual_back_mut(&mut self) -> &mut VirtualBackFilter {
        &mut self.virtual_back
    }

    pub fn normal(&self) -> &NormalFilter {
        &self.normal
    }

    pub fn normal_mut(&mut self) -> &mut NormalFilter {
        &mut self.normal
    }
}

fn log_report(what: &str, report: &LoadReport) {
    if report.is_complete_success() {
        tracing::debug!(what, loaded = report.loaded.len(), "assets loaded");
    } else {
        tracing::warn!(what, failed = ?report.failed, "some assets failed to load");
    }
}

