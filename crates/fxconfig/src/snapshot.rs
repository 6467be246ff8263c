//! Serializable state of a whole pipeline.
//!
//! A snapshot is taken before a pipeline is torn down and replayed onto its
//! replacement, so it has to cover every setter a caller can reach. Texture
//! handles (live background, segmentation mask) are not serializable and
//! travel next to the snapshot instead.

use std::collections::BTreeMap;

use facewarp::Knob;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct PipelineSnapshot {
    /// Knobs that differ from their defaults.
    #[serde(default, with = "knob_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub adv: BTreeMap<Knob, f32>,
    #[serde(default)]
    pub debug_wire: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_ratio: Option<f32>,
    #[serde(default)]
    pub beauty: BeautySettings,
    #[serde(default)]
    pub lut: LutSelection,
    #[serde(default)]
    pub background: BackgroundSettings,
    #[serde(default)]
    pub styled: StyledSelection,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct BeautySettings {
    #[serde(default)]
    pub smooth: f32,
    #[serde(default)]
    pub whiten: f32,
    #[serde(default)]
    pub redden: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct LutSelection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Falls back to the preset's own intensity when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackgroundSettings {
    #[default]
    None,
    Color {
        color: String,
    },
    Image {
        url: String,
    },
    Blur {
        intensity: f32,
    },
    /// Externally fed texture; the handle itself is carried separately.
    Live,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StyledSelection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_styled_intensity")]
    pub intensity: f32,
}

impl Default for StyledSelection {
    fn default() -> Self {
        Self {
            name: None,
            intensity: default_styled_intensity(),
        }
    }
}

fn default_styled_intensity() -> f32 {
    1.0
}

impl PipelineSnapshot {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let snapshot: PipelineSnapshot = toml::from_str(input)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |key: &str, value: f32| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!(
                    "{key} must be within [0, 1], got {value}"
                )))
            }
        };
        for (knob, value) in &self.adv {
            unit(&format!("adv.{knob}"), *value)?;
        }
        unit("beauty.smooth", self.beauty.smooth)?;
        unit("beauty.whiten", self.beauty.whiten)?;
        unit("beauty.redden", self.beauty.redden)?;
        if let Some(intensity) = self.lut.intensity {
            unit("lut.intensity", intensity)?;
        }
        unit("styled.intensity", self.styled.intensity)?;
        match &self.background {
            BackgroundSettings::Color { color } if parse_hex_color(color).is_none() => {
                return Err(ConfigError::Invalid(format!(
                    "background color '{color}' is not a #rrggbb value"
                )));
            }
            BackgroundSettings::Image { url } if url.trim().is_empty() => {
                return Err(ConfigError::Invalid("background url may not be empty".into()));
            }
            _ => {}
        }
        if let Some([w, h]) = self.size {
            if w == 0 || h == 0 {
                return Err(ConfigError::Invalid("snapshot size must be non-zero".into()));
            }
        }
        Ok(())
    }
}

/// Parses `#rgb` or `#rrggbb` into linear 0..1 RGBA with opaque alpha.
pub fn parse_hex_color(input: &str) -> Option<[f32; 4]> {
    let hex = input.trim().strip_prefix('#')?;
    if !hex.is_ascii() {
        return None;
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).ok().map(|v| f32::from(v) / 255.0);
    match hex.len() {
        6 => Some([
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
            1.0,
        ]),
        3 => {
            let short = |i: usize| {
                let c = &hex[i..i + 1];
                channel(&format!("{c}{c}"))
            };
            Some([short(0)?, short(1)?, short(2)?, 1.0])
        }
        _ => None,
    }
}

/// Knob maps keyed by their camelCase names.
mod knob_map {
    use std::collections::BTreeMap;

    use facewarp::Knob;
    use serde::de::{self, Deserializer};
    use serde::ser::{SerializeMap, Serializer};
    use serde::Deserialize;

    pub fn serialize<S>(map: &BTreeMap<Knob, f32>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (knob, value) in map {
            out.serialize_entry(knob.name(), value)?;
        }
        out.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<Knob, f32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: BTreeMap<String, f32> = BTreeMap::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(name, value)| {
                name.parse::<Knob>()
                    .map(|knob| (knob, value))
                    .map_err(de::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_snapshot_round_trips() {
        let snapshot = PipelineSnapshot {
            adv: BTreeMap::from([(Knob::EnlargeEye, 0.4), (Knob::EyeDistance, 0.1)]),
            debug_wire: true,
            beauty: BeautySettings {
                smooth: 0.8,
                whiten: 0.3,
                redden: 0.0,
            },
            lut: LutSelection {
                name: Some("langman".into()),
                intensity: Some(0.25),
            },
            background: BackgroundSettings::Blur { intensity: 0.5 },
            styled: StyledSelection {
                name: Some("snow".into()),
                intensity: 0.75,
            },
            size: Some([320, 240]),
            pixel_ratio: Some(2.0),
        };
        let text = snapshot.to_toml_string().unwrap();
        assert!(text.contains("enlargeEye"));
        let back = PipelineSnapshot::from_toml_str(&text).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn unknown_knob_is_rejected() {
        let err = PipelineSnapshot::from_toml_str("adv = { bigEars = 1.0 }").unwrap_err();
        assert!(err.to_string().contains("bigEars"));
    }

    #[test]
    fn out_of_range_intensity_is_rejected() {
        let err = PipelineSnapshot::from_toml_str("[beauty]\nsmooth = 1.5").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn empty_snapshot_is_idle() {
        let snapshot = PipelineSnapshot::from_toml_str("").unwrap();
        assert_eq!(snapshot, PipelineSnapshot::default());
        assert_eq!(snapshot.background, BackgroundSettings::None);
        assert_eq!(snapshot.styled.intensity, 1.0);
    }

    #[test]
    fn hex_colors() {
        assert_eq!(parse_hex_color("#ffffff"), Some([1.0, 1.0, 1.0, 1.0]));
        assert_eq!(parse_hex_color("#f00"), Some([1.0, 0.0, 0.0, 1.0]));
        assert_eq!(parse_hex_color("e7ad3c"), None);
        assert_eq!(parse_hex_color("#e7ad3"), None);
    }
}
