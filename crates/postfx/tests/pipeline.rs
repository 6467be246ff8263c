//! End-to-end checks on a real headless adapter. Each test logs and returns
//! early when no adapter is available.

use std::sync::Arc;
use std::time::Duration;

use facewarp::{synthetic, Knob, Vector2};
use fxassets::{identity_lut64, AssetCache, AssetError, AssetSource};
use fxconfig::{BackgroundSettings, PipelineConfig};
use image::{Rgba, RgbaImage};
use postfx::gpu::{GpuContext, TextureSource, UniformValue};
use postfx::{Background, Filter, Filters};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;
const COLOR: [u8; 4] = [200, 120, 40, 255];

/// Refuses every fetch so nothing reaches the network.
struct Offline;

impl AssetSource for Offline {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, AssetError> {
        Err(AssetError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("postfx=debug,fxassets=debug")
        .with_test_writer()
        .try_init();
}

fn offline_assets() -> AssetCache {
    AssetCache::new(Offline, 1)
}

fn build(config: PipelineConfig, assets: AssetCache) -> Option<Filters> {
    init_logging();
    let ctx = match GpuContext::new_headless() {
        Ok(ctx) => ctx,
        Err(error) => {
            eprintln!("skipping: {error:#}");
            return None;
        }
    };
    let mut filters = Filters::with_context(ctx, config, assets, WIDTH, HEIGHT)
        .expect("pipeline should build on a working adapter");
    filters.assets().settle(Duration::from_secs(5));
    filters.set_source(TextureSource::Image(Arc::new(solid(COLOR))));
    Some(filters)
}

fn solid(color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(WIDTH, HEIGHT, Rgba(color))
}

/// Smooth ramps in x and y so any geometric warp shows up.
fn gradient() -> RgbaImage {
    RgbaImage::from_fn(WIDTH, HEIGHT, |x, y| {
        Rgba([(x * 255 / WIDTH) as u8, (y * 255 / HEIGHT) as u8, 128, 255])
    })
}

/// Skin-toned 4px checker with enough texture for the smoothing pass.
fn checker() -> RgbaImage {
    RgbaImage::from_fn(WIDTH, HEIGHT, |x, y| {
        if (x / 4 + y / 4) % 2 == 0 {
            Rgba([225, 160, 130, 255])
        } else {
            Rgba([190, 125, 100, 255])
        }
    })
}

fn changed_pixels(a: &RgbaImage, b: &RgbaImage, tolerance: u8) -> usize {
    a.pixels()
        .zip(b.pixels())
        .filter(|(p, q)| p.0.iter().zip(q.0.iter()).any(|(x, y)| x.abs_diff(*y) > tolerance))
        .count()
}

fn border_matches(a: &RgbaImage, b: &RgbaImage, tolerance: u8) -> bool {
    let (w, h) = a.dimensions();
    (0..w)
        .flat_map(|x| [(x, 0), (x, h - 1)])
        .chain((0..h).flat_map(|y| [(0, y), (w - 1, y)]))
        .all(|(x, y)| {
            let (p, q) = (a.get_pixel(x, y), b.get_pixel(x, y));
            p.0.iter().zip(q.0.iter()).all(|(x, y)| x.abs_diff(*y) <= tolerance)
        })
}

/// Two small faces side by side, clear of the frame edges.
fn two_faces() -> Vec<i16> {
    synthetic::pack(&[
        synthetic::frontal_face_at(Vector2::new(170.0, 20.0), 0.7, 0.0),
        synthetic::frontal_face_at(Vector2::new(470.0, 20.0), 0.7, 0.0),
    ])
}

fn frame(filters: &mut Filters) -> RgbaImage {
    filters.update(Duration::from_millis(16));
    filters.read_output().expect("canvas readback")
}

fn max_channel_error(image: &RgbaImage, expected: [u8; 4]) -> u8 {
    image
        .pixels()
        .flat_map(|pixel| pixel.0.iter().zip(expected.iter()).map(|(a, b)| a.abs_diff(*b)))
        .max()
        .unwrap_or(0)
}

#[test]
fn idle_pipeline_reproduces_the_source() {
    let Some(mut filters) = build(PipelineConfig::default(), offline_assets()) else {
        return;
    };
    let output = frame(&mut filters);
    assert_eq!(output.dimensions(), (WIDTH, HEIGHT));
    assert!(max_channel_error(&output, COLOR) <= 1);
}

#[test]
fn identity_lut_keeps_colors() {
    let config = PipelineConfig::from_toml_str(
        r#"
        [luts.neutral]
        url = "test://neutral.png"
        intensity = 1.0
        "#,
    )
    .expect("config parses");
    let assets = offline_assets();
    assets.insert("test://neutral.png", identity_lut64());
    let Some(mut filters) = build(config, assets) else {
        return;
    };

    filters.lut_mut().setlut(Some("neutral"), Some(1.0));
    let output = frame(&mut filters);
    assert_eq!(filters.lut().intensity(), 1.0);
    assert!(max_channel_error(&output, COLOR) <= 2);
}

#[test]
fn unknown_lut_disables_grading() {
    let Some(mut filters) = build(PipelineConfig::default(), offline_assets()) else {
        return;
    };
    filters.lut_mut().setlut(Some("no-such-preset"), Some(1.0));
    assert_eq!(filters.lut().current(), None);
    let output = frame(&mut filters);
    assert!(max_channel_error(&output, COLOR) <= 1);
}

#[test]
fn style_teardown_releases_its_resources() {
    let Some(mut filters) = build(PipelineConfig::default(), offline_assets()) else {
        return;
    };
    frame(&mut filters);
    let baseline = filters.stats();
    let quad_position = filters.quad().position.clone();

    filters
        .styled_mut()
        .set_styled(Some("glitch"), 1.0)
        .expect("glitch builds");
    frame(&mut filters);
    assert!(filters.stats().programs > baseline.programs);

    filters.styled_mut().set_styled(None, 1.0).expect("disable");
    frame(&mut filters);
    assert_eq!(filters.stats(), baseline);
    assert!(std::rc::Rc::ptr_eq(&quad_position, &filters.quad().position));
}

#[test]
fn switching_styles_keeps_one_chain_alive() {
    let Some(mut filters) = build(PipelineConfig::default(), offline_assets()) else {
        return;
    };
    frame(&mut filters);
    let baseline = filters.stats();

    filters.styled_mut().set_styled(Some("wave"), 0.5).expect("wave builds");
    frame(&mut filters);
    let with_wave = filters.stats();
    filters.styled_mut().set_styled(Some("shake"), 0.5).expect("shake builds");
    frame(&mut filters);
    assert_eq!(filters.stats().programs, with_wave.programs);

    filters.styled_mut().set_styled(None, 0.5).expect("disable");
    assert_eq!(filters.stats(), baseline);
}

#[test]
fn resizing_to_the_same_size_is_a_no_op() {
    let Some(mut filters) = build(PipelineConfig::default(), offline_assets()) else {
        return;
    };
    filters.set_size(320, 240);
    frame(&mut filters);
    let after_first = filters.stats();
    filters.set_size(320, 240);
    frame(&mut filters);
    assert_eq!(filters.stats(), after_first);
    assert_eq!(filters.renderer().get_size(), (320, 240));
}

#[test]
fn no_landmarks_means_no_warp() {
    let Some(mut filters) = build(PipelineConfig::default(), offline_assets()) else {
        return;
    };
    filters.adv_beauty_mut().set_adv_data(&[]);
    let output = frame(&mut filters);
    assert!(filters.adv_beauty().face_mask().is_none());
    assert!(max_channel_error(&output, COLOR) <= 1);

    // not a whole face: discarded
    filters.adv_beauty_mut().set_adv_data(&[100; 211]);
    assert_eq!(filters.adv_beauty().face_count(), 0);
    let output = frame(&mut filters);
    assert!(max_channel_error(&output, COLOR) <= 1);
}

#[test]
fn whitening_waits_for_its_lut() {
    let config = PipelineConfig::from_toml_str(
        r#"
        [beauty]
        whiten_lut = "test://whiten.png"
        redden_lut = "test://redden.png"
        "#,
    )
    .expect("config parses");
    let assets = offline_assets();
    let Some(mut filters) = build(config, assets.clone()) else {
        return;
    };

    filters.beauty_mut().set_whiten(0.8);
    frame(&mut filters);
    assert_eq!(filters.beauty().whiten(), 0.8);
    assert_eq!(filters.beauty().effective_whiten(), 0.0);

    assets.insert("test://whiten.png", identity_lut64());
    frame(&mut filters);
    assert_eq!(filters.beauty().effective_whiten(), 0.8);
    assert_eq!(filters.beauty().effective_redden(), 0.0);
}

#[test]
fn clone_carries_every_setting() {
    let assets = offline_assets();
    let Some(mut filters) = build(PipelineConfig::default(), assets) else {
        return;
    };
    filters.beauty_mut().set_smooth(0.6);
    filters.beauty_mut().set_redden(0.3);
    filters.lut_mut().setlut(Some("qingcheng"), Some(0.4));
    filters
        .styled_mut()
        .set_styled(Some("magnifier"), 0.7)
        .expect("magnifier builds");
    filters.styled_mut().set_magnifier_position([0.25, 0.75]);
    filters
        .virtual_back_mut()
        .set_background(postfx::Background::Color("#336699".to_string()));
    filters.set_size(320, 240);
    frame(&mut filters);

    let clone = match filters.clone_pipeline() {
        Ok(clone) => clone,
        Err(error) => {
            eprintln!("skipping: {error:#}");
            return;
        }
    };
    let snapshot = clone.snapshot();
    assert_eq!(snapshot, filters.snapshot());
    assert_eq!(snapshot.size, Some([320, 240]));
    assert_eq!(snapshot.lut.name.as_deref(), Some("qingcheng"));
    assert!(matches!(snapshot.background, BackgroundSettings::Color { .. }));
    assert_eq!(clone.styled().magnifier_position(), [0.25, 0.75]);
    assert_ne!(clone.context().id(), filters.context().id());
}

#[test]
fn destroy_releases_everything() {
    let Some(mut filters) = build(PipelineConfig::default(), offline_assets()) else {
        return;
    };
    filters
        .styled_mut()
        .set_styled(Some("mystery"), 1.0)
        .expect("mystery builds");
    frame(&mut filters);
    filters.destroy();
    let counts = filters.stats();
    assert_eq!(counts.programs, 0);
    // only the canvas survives
    assert_eq!(counts.framebuffers, 1);
}

#[test]
fn warp_moves_pixels_inside_the_faces_only() {
    let Some(mut filters) = build(PipelineConfig::default(), offline_assets()) else {
        return;
    };
    let source = gradient();
    filters.set_source(TextureSource::Image(Arc::new(source.clone())));
    filters.adv_beauty_mut().set_adv_data(&two_faces());
    filters.adv_beauty_mut().set_adv_effect(Knob::EnlargeEye, 1.0);
    filters.adv_beauty_mut().set_adv_effect(Knob::ShrinkFace, 1.0);
    let output = frame(&mut filters);

    assert_eq!(filters.adv_beauty().face_count(), 2);
    assert_eq!(filters.adv_beauty().feature_paras().len(), 2);
    assert!(filters.adv_beauty().face_mask().is_some());
    assert!(changed_pixels(&output, &source, 2) > 0);
    assert!(border_matches(&output, &source, 2));
}

#[test]
fn background_needs_a_mask() {
    let Some(mut filters) = build(PipelineConfig::default(), offline_assets()) else {
        return;
    };
    filters
        .virtual_back_mut()
        .set_background(Background::Color("#00ff00".to_string()));
    let output = frame(&mut filters);
    assert!(!filters.virtual_back().has_mask());
    assert!(max_channel_error(&output, COLOR) <= 1);

    let cut_out = RgbaImage::from_pixel(WIDTH, HEIGHT, Rgba([0, 0, 0, 0]));
    filters
        .virtual_back_mut()
        .set_mask_map(Some(TextureSource::Image(Arc::new(cut_out))));
    let output = frame(&mut filters);
    assert!(max_channel_error(&output, [0, 255, 0, 255]) <= 1);
}

#[test]
fn smoothing_only_runs_above_zero() {
    let Some(mut filters) = build(PipelineConfig::default(), offline_assets()) else {
        return;
    };
    let source = checker();
    filters.set_source(TextureSource::Image(Arc::new(source.clone())));

    filters.beauty_mut().set_smooth(0.0);
    let output = frame(&mut filters);
    assert_eq!(changed_pixels(&output, &source, 1), 0);

    filters.beauty_mut().set_smooth(0.8);
    let output = frame(&mut filters);
    assert!(changed_pixels(&output, &source, 2) > 0);
}

#[test]
fn zero_intensity_style_passes_through() {
    let Some(mut filters) = build(PipelineConfig::default(), offline_assets()) else {
        return;
    };
    for style in ["glitch", "oldFilm", "sketch"] {
        filters
            .styled_mut()
            .set_styled(Some(style), 0.0)
            .expect("style builds");
        let output = frame(&mut filters);
        let styled = filters.styled();
        let (output_map, input_map) = (styled.output(), styled.map());
        assert!(
            matches!((output_map, input_map), (Some(a), Some(b)) if a.same(&b)),
            "{style} should hand on its input"
        );
        assert!(max_channel_error(&output, COLOR) <= 1, "{style}");
    }
}

#[test]
fn high_density_output_keeps_the_logical_frame() {
    let Some(mut filters) = build(PipelineConfig::default(), offline_assets()) else {
        return;
    };
    filters.set_pixel_ratio(2.0);
    let output = frame(&mut filters);
    assert_eq!(filters.renderer().logical_size(), (WIDTH, HEIGHT));
    assert_eq!(output.dimensions(), (WIDTH * 2, HEIGHT * 2));
    assert!(max_channel_error(&output, COLOR) <= 1);
    let size = filters
        .beauty()
        .core()
        .program("beauty")
        .and_then(|program| program.get_uniform("size"));
    assert_eq!(size, Some(UniformValue::Vec2([1280.0, 960.0])));

    // landmarks stay in logical pixels
    filters.adv_beauty_mut().set_adv_data(&two_faces());
    filters.adv_beauty_mut().set_adv_effect(Knob::EnlargeEye, 1.0);
    let source = gradient();
    filters.set_source(TextureSource::Image(Arc::new(source)));
    let output = frame(&mut filters);
    assert!(filters.adv_beauty().face_mask().is_some());
    let corner = *output.get_pixel(0, 0);
    assert!(corner.0[0] <= 2 && corner.0[1] <= 2);
}

#[test]
fn replaced_source_uploads_on_the_next_render() {
    let Some(mut filters) = build(PipelineConfig::default(), offline_assets()) else {
        return;
    };
    frame(&mut filters);
    let blue = [30, 60, 220, 255];
    filters.set_source(TextureSource::Image(Arc::new(solid(blue))));
    // no refresh: binding the dirty source uploads it
    filters.render();
    let output = filters.read_output().expect("canvas readback");
    assert!(max_channel_error(&output, blue) <= 1);
}
