use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use facewarp::landmarks::VALUES_PER_FACE;
use fxassets::{default_cache_dir, resolve_cache_dir, AssetCache, DiskCached, RoutedSource};
use fxconfig::PipelineConfig;
use image::{DynamicImage, RgbaImage};
use postfx::gpu::TextureSource;
use postfx::Filters;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::settings::Extras;

/// Nominal frame interval handed to the pipeline between renders.
const FRAME_DELTA: Duration = Duration::from_millis(33);

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    let mut snapshot = config.initial.clone().unwrap_or_default();
    let mut extras = Extras::default();
    for setting in &cli.settings {
        setting
            .apply(&mut snapshot, &mut extras)
            .with_context(|| format!("invalid --set {}={}", setting.key, setting.value))?;
    }
    if cli.print_settings {
        print!("{}", snapshot.to_toml_string()?);
        return Ok(());
    }

    let input = image::open(&cli.input)
        .with_context(|| format!("failed to read input image {}", cli.input.display()))?
        .to_rgba8();
    let (width, height) = input.dimensions();
    info!(path = %cli.input.display(), width, height, "input loaded");

    let landmarks = match &cli.landmarks {
        Some(path) => load_landmarks(path)?,
        None => Vec::new(),
    };
    let mask = cli.mask.as_deref().map(load_mask).transpose()?;

    let assets = build_assets(&config)?;
    let mut filters = Filters::new(config, assets, width, height)
        .context("failed to build the effect pipeline")?;
    if snapshot.size.is_none() {
        snapshot.size = Some([width, height]);
    }
    filters.apply_snapshot(&snapshot)?;
    if let Some(position) = extras.magnifier {
        filters.styled_mut().set_magnifier_position(position);
    }
    filters.virtual_back_mut().set_empty_frame(extras.empty_frame);
    if let Some(mask) = mask {
        filters
            .virtual_back_mut()
            .set_mask_map(Some(TextureSource::Image(Arc::new(mask))));
    }
    filters.adv_beauty_mut().set_adv_data(&landmarks);
    filters.set_source(TextureSource::Image(Arc::new(input)));

    let settle = Duration::from_secs_f32(cli.settle.max(0.0));
    for frame in 0..cli.frames {
        if frame + 1 == cli.frames && !filters.assets().settle(settle) {
            warn!(pending = filters.assets().pending(), "assets still loading; rendering without them");
        }
        filters.update(FRAME_DELTA);
    }
    if !filters.is_alive() {
        bail!("GPU device was lost while rendering");
    }

    let output = filters.read_output()?;
    output
        .save_with_format(&cli.output, image::ImageFormat::Png)
        .with_context(|| format!("failed to write {}", cli.output.display()))?;
    info!(
        path = %cli.output.display(),
        faces = filters.adv_beauty().face_count(),
        resources = %filters.stats(),
        "output written"
    );
    filters.destroy();
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config = PipelineConfig::from_toml_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    info!(path = %path.display(), "config loaded");
    Ok(config)
}

fn build_assets(config: &PipelineConfig) -> Result<AssetCache> {
    let source = RoutedSource::new(config.assets.timeout)?;
    let cache_dir = match &config.assets.cache_dir {
        Some(dir) => Some(resolve_cache_dir(dir)?),
        None => default_cache_dir(),
    };
    Ok(match cache_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "asset cache");
            AssetCache::new(DiskCached::new(source, dir), config.assets.retries)
        }
        None => AssetCache::new(source, config.assets.retries),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LandmarkFile {
    Flat(Vec<i16>),
    PerFace(Vec<Vec<i16>>),
}

fn load_landmarks(path: &Path) -> Result<Vec<i16>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read landmarks {}", path.display()))?;
    let data = parse_landmarks(&raw)
        .with_context(|| format!("failed to parse landmarks {}", path.display()))?;
    info!(faces = data.len() / VALUES_PER_FACE, "landmarks loaded");
    Ok(data)
}

pub(crate) fn parse_landmarks(raw: &str) -> Result<Vec<i16>> {
    let data = match serde_json::from_str::<LandmarkFile>(raw)? {
        LandmarkFile::Flat(values) => values,
        LandmarkFile::PerFace(faces) => {
            if let Some((index, face)) = faces
                .iter()
                .enumerate()
                .find(|(_, face)| face.len() != VALUES_PER_FACE)
            {
                bail!(
                    "face {index} has {} values, expected {VALUES_PER_FACE}",
                    face.len()
                );
            }
            faces.concat()
        }
    };
    facewarp::split_faces(&data)?;
    Ok(data)
}

/// Loads a segmentation mask; its luminance becomes the keep-alpha.
fn load_mask(path: &Path) -> Result<RgbaImage> {
    let mask = image::open(path)
        .with_context(|| format!("failed to read mask {}", path.display()))?;
    Ok(mask_to_alpha(&mask))
}

pub(crate) fn mask_to_alpha(mask: &DynamicImage) -> RgbaImage {
    let luma = mask.to_luma8();
    RgbaImage::from_fn(luma.width(), luma.height(), |x, y| {
        let value = luma.get_pixel(x, y).0[0];
        image::Rgba([value, value, value, value])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landmarks_flat_and_nested() {
        let face: Vec<i16> = (0..VALUES_PER_FACE as i16).collect();
        let flat = serde_json::to_string(&[face.clone(), face.clone()].concat()).unwrap();
        let nested = serde_json::to_string(&vec![face.clone(), face]).unwrap();
        assert_eq!(parse_landmarks(&flat).unwrap().len(), 2 * VALUES_PER_FACE);
        assert_eq!(parse_landmarks(&nested).unwrap(), parse_landmarks(&flat).unwrap());
        assert!(parse_landmarks("[]").unwrap().is_empty());
    }

    #[test]
    fn landmarks_must_be_whole_faces() {
        assert!(parse_landmarks("[1, 2, 3]").is_err());
        assert!(parse_landmarks("[[1, 2, 3]]").is_err());
        assert!(parse_landmarks("{\"faces\": 1}").is_err());
    }

    #[test]
    fn mask_luminance_becomes_alpha() {
        let mut gray = image::GrayImage::new(2, 1);
        gray.put_pixel(0, 0, image::Luma([255]));
        let rgba = mask_to_alpha(&DynamicImage::ImageLuma8(gray));
        assert_eq!(rgba.get_pixel(0, 0).0[3], 255);
        assert_eq!(rgba.get_pixel(1, 0).0[3], 0);
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn config_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fx.toml");
        fs::write(&path, "[present]\nflip_y = true\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert!(config.present.flip_y);
    }
}
