use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

mod snapshot;

pub use snapshot::{
    parse_hex_color, BackgroundSettings, BeautySettings, LutSelection, PipelineSnapshot,
    StyledSelection,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

const CDN: &str = "https://yx-web-nosdn.netease.im/common";

/// Built-in color-grade presets: name, CDN directory, default intensity.
const LUT_PRESETS: [(&str, &str, f32); 15] = [
    ("ziran", "c89328281947fceabdc71d5fa08b2345", 1.0),
    ("baixi", "3a22a55384b0bd5b07fca3509bfc981a", 0.5),
    ("fennen", "db5befdae1f46dad2e5a6d702bad19ea", 0.5),
    ("weimei", "cf8bfec70d7998bb0033757276c6559a", 0.5),
    ("langman", "1c50a14532bfa3ad503a82ddd13f0ec8", 0.5),
    ("rixi", "c414819383913b5db0d9b686276e3d57", 0.5),
    ("landiao", "4c77522852dc14448603be21abc571c8", 0.5),
    ("qingliang", "1150e94f831d24148239001588a7ca7d", 0.5),
    ("huaijiu", "6a38caeab164d1b5cc086391d6a11a74", 0.5),
    ("qingcheng", "3b3332c5ae4306312b6f3c4c552a464a", 1.0),
    ("wuhou", "200fc7a12177774f4eb23f55d72643ee", 1.0),
    ("zhigan", "848bd44506cf8e10ecabf564e3d74809", 1.0),
    ("mopian", "c454efa119520f0793ce51327951ed0a", 1.0),
    ("dianying", "3a6a22adad29c5844fc829f4f889a79f", 1.0),
    ("heibai", "941270f2948218ea19f2d79db5e7d349", 1.0),
];

/// Images the styled effects sample, keyed by resource name.
const STYLE_RESOURCES: [(&str, &str); 9] = [
    ("haike", "aa92803e508487ec33a1be75459e46e7"),
    ("text", "b249f4d3024c9fc4533e199d1c78c158"),
    ("rnd", "11f09edad695dfabf71e6961b7e78afd"),
    ("dirty-map", "e7ea13cd337a076e246d9119d2eda3ee"),
    ("snow", "09bf9341d5b50e3b10c49e0c55fd184e"),
    ("grid", "082a02e2398adef11f6e3c9b2b7f5d88"),
    ("pencil-stroke", "f1ad16a8efb5fa87b2068fe446a794d0"),
    ("fire-mask", "7809a2b1951cff7a2dacec82434e0ef3"),
    ("kehuan", "3ca954d195d272f1652891837d0c8ba7"),
];

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PipelineConfig {
    pub version: u32,
    #[serde(default = "default_size")]
    pub size: [u32; 2],
    #[serde(default = "default_pixel_ratio")]
    pub pixel_ratio: f32,
    #[serde(
        default = "default_max_frame_delta",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub max_frame_delta: Duration,
    #[serde(default)]
    pub assets: AssetSettings,
    #[serde(default)]
    pub beauty: BeautyAssets,
    /// Extra or overridden LUT presets, merged over the built-in table.
    #[serde(default)]
    pub luts: BTreeMap<String, LutPreset>,
    /// Style resource URL overrides keyed by resource name.
    #[serde(default)]
    pub styles: BTreeMap<String, String>,
    #[serde(default)]
    pub present: PresentSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<PipelineSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AssetSettings {
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(
        default = "default_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub timeout: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            timeout: default_timeout(),
            cache_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BeautyAssets {
    #[serde(default = "default_whiten_lut")]
    pub whiten_lut: String,
    #[serde(default = "default_redden_lut")]
    pub redden_lut: String,
}

impl Default for BeautyAssets {
    fn default() -> Self {
        Self {
            whiten_lut: default_whiten_lut(),
            redden_lut: default_redden_lut(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LutPreset {
    pub url: String,
    #[serde(default = "default_lut_intensity")]
    pub intensity: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct PresentSettings {
    #[serde(default)]
    pub flip_y: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: 1,
            size: default_size(),
            pixel_ratio: default_pixel_ratio(),
            max_frame_delta: default_max_frame_delta(),
            assets: AssetSettings::default(),
            beauty: BeautyAssets::default(),
            luts: BTreeMap::new(),
            styles: BTreeMap::new(),
            present: PresentSettings::default(),
            initial: None,
        }
    }
}

fn default_size() -> [u32; 2] {
    [640, 480]
}

fn default_pixel_ratio() -> f32 {
    1.0
}

fn default_max_frame_delta() -> Duration {
    Duration::from_millis(100)
}

fn default_retries() -> u32 {
    3
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_lut_intensity() -> f32 {
    1.0
}

fn default_whiten_lut() -> String {
    format!("{CDN}/cab8e4f0696d3d8e29ee10d6dccc1204/meibai.png")
}

fn default_redden_lut() -> String {
    format!("{CDN}/c614e2af82da88807067926d7ff3be3d/hongrun.png")
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl PipelineConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: PipelineConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// Built-in presets with the file's `[luts]` entries merged over them.
    pub fn lut_presets(&self) -> BTreeMap<String, LutPreset> {
        let mut presets: BTreeMap<String, LutPreset> = LUT_PRESETS
            .iter()
            .map(|(name, dir, intensity)| {
                (
                    (*name).to_string(),
                    LutPreset {
                        url: format!("{CDN}/{dir}/{name}.png"),
                        intensity: *intensity,
                    },
                )
            })
            .collect();
        for (name, preset) in &self.luts {
            presets.insert(name.clone(), preset.clone());
        }
        presets
    }

    pub fn lut_url(&self, name: &str) -> Option<String> {
        if let Some(preset) = self.luts.get(name) {
            return Some(preset.url.clone());
        }
        LUT_PRESETS
            .iter()
            .find(|(preset, _, _)| *preset == name)
            .map(|(name, dir, _)| format!("{CDN}/{dir}/{name}.png"))
    }

    /// URL of a style resource such as `"dirty-map"` or `"snow"`.
    pub fn style_resource(&self, key: &str) -> Option<String> {
        if let Some(url) = self.styles.get(key) {
            return Some(url.clone());
        }
        STYLE_RESOURCES
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(name, dir)| format!("{CDN}/{dir}/{name}.png"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.size[0] == 0 || self.size[1] == 0 {
            return Err(ConfigError::Invalid(format!(
                "size must be non-zero, got {}x{}",
                self.size[0], self.size[1]
            )));
        }

        if !(self.pixel_ratio.is_finite() && self.pixel_ratio > 0.0) {
            return Err(ConfigError::Invalid("pixel_ratio must be > 0".into()));
        }

        if self.max_frame_delta.is_zero() {
            return Err(ConfigError::Invalid(
                "max_frame_delta must be greater than zero".into(),
            ));
        }

        if self.assets.retries == 0 {
            return Err(ConfigError::Invalid("assets.retries must be >= 1".into()));
        }

        for (key, url) in [
            ("beauty.whiten_lut", &self.beauty.whiten_lut),
            ("beauty.redden_lut", &self.beauty.redden_lut),
        ] {
            if url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{key} may not be empty")));
            }
        }

        for (name, preset) in &self.luts {
            if preset.url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "lut preset '{name}' must have a url"
                )));
            }
            if !(0.0..=1.0).contains(&preset.intensity) {
                return Err(ConfigError::Invalid(format!(
                    "lut preset '{name}' intensity must be within [0, 1]"
                )));
            }
        }

        for key in self.styles.keys() {
            if !STYLE_RESOURCES.iter().any(|(name, _)| name == key) {
                return Err(ConfigError::Invalid(format!(
                    "unknown style resource '{key}'"
                )));
            }
        }

        if let Some(initial) = &self.initial {
            initial.validate()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facewarp::Knob;

    const SAMPLE: &str = r##"
version = 1
size = [1280, 720]
max_frame_delta = "50ms"

[assets]
retries = 5
timeout = "2s"

[luts.neutral]
url = "file:///tmp/identity.png"

[luts.ziran]
url = "https://example.com/ziran.png"
intensity = 0.3

[styles]
snow = "https://example.com/snow.png"

[present]
flip_y = true

[initial]
adv = { eyeDistance = 0.2, shrinkFace = 0.6 }

[initial.beauty]
smooth = 0.5

[initial.lut]
name = "ziran"

[initial.background]
kind = "color"
color = "#000000"
"##;

    #[test]
    fn parses_sample_config() {
        let config = PipelineConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.size, [1280, 720]);
        assert_eq!(config.max_frame_delta, Duration::from_millis(50));
        assert_eq!(config.assets.retries, 5);
        assert!(config.present.flip_y);

        let initial = config.initial.as_ref().unwrap();
        assert_eq!(initial.adv.get(&Knob::ShrinkFace), Some(&0.6));
        assert_eq!(initial.beauty.smooth, 0.5);
        assert_eq!(
            initial.background,
            BackgroundSettings::Color {
                color: "#000000".into()
            }
        );
    }

    #[test]
    fn empty_file_has_builtin_defaults() {
        let config = PipelineConfig::from_toml_str("version = 1").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.max_frame_delta, Duration::from_millis(100));
        assert_eq!(config.assets.retries, 3);
        assert_eq!(config.lut_presets().len(), 15);
        assert!(config.style_resource("pencil-stroke").is_some());
        assert!(config.style_resource("bogus").is_none());
    }

    #[test]
    fn file_presets_merge_over_builtins() {
        let config = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        let presets = config.lut_presets();
        assert_eq!(presets.len(), 16);
        assert_eq!(presets["ziran"].intensity, 0.3);
        assert_eq!(presets["neutral"].intensity, 1.0);
        assert_eq!(presets["baixi"].intensity, 0.5);
        assert!(presets["heibai"].url.ends_with("/heibai.png"));
        assert_eq!(
            config.style_resource("snow").as_deref(),
            Some("https://example.com/snow.png")
        );
    }

    #[test]
    fn rejects_unknown_style_resource() {
        let err = PipelineConfig::from_toml_str(
            r#"
version = 1
[styles]
sparkles = "https://example.com/sparkles.png"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_bad_version_and_zero_size() {
        assert!(matches!(
            PipelineConfig::from_toml_str("version = 2").unwrap_err(),
            ConfigError::Invalid(_)
        ));
        assert!(matches!(
            PipelineConfig::from_toml_str("version = 1\nsize = [0, 480]").unwrap_err(),
            ConfigError::Invalid(_)
        ));
    }

    #[test]
    fn config_survives_toml_round_trip() {
        let config = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        let text = config.to_toml_string().unwrap();
        let back = PipelineConfig::from_toml_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
