//! `--set key=value` overrides, applied on top of the configured snapshot.

use std::str::FromStr;

use facewarp::Knob;
use fxconfig::{parse_hex_color, BackgroundSettings, PipelineSnapshot};
use postfx::StyleKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SettingError {
    #[error("expected KEY=VALUE, got '{0}'")]
    Malformed(String),
    #[error("unknown setting '{0}'")]
    UnknownKey(String),
    #[error("invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

impl FromStr for Setting {
    type Err = SettingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| SettingError::Malformed(s.to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(SettingError::Malformed(s.to_string()));
        }
        Ok(Self {
            key: key.to_string(),
            value: value.trim().to_string(),
        })
    }
}

/// Settings with no place in a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Extras {
    pub magnifier: Option<[f32; 2]>,
    pub empty_frame: bool,
}

impl Setting {
    pub fn apply(&self, snapshot: &mut PipelineSnapshot, extras: &mut Extras) -> Result<(), SettingError> {
        match self.key.as_str() {
            "smooth" => snapshot.beauty.smooth = self.unit()?,
            "whiten" => snapshot.beauty.whiten = self.unit()?,
            "redden" => snapshot.beauty.redden = self.unit()?,
            "lut" => snapshot.lut.name = self.optional_name(),
            "lut.intensity" => snapshot.lut.intensity = Some(self.unit()?),
            "style" => {
                snapshot.styled.name = match self.optional_name() {
                    Some(name) => {
                        let kind = name
                            .parse::<StyleKind>()
                            .map_err(|err| self.invalid(err.to_string()))?;
                        Some(kind.name().to_string())
                    }
                    None => None,
                }
            }
            "style.intensity" => snapshot.styled.intensity = self.unit()?,
            "background" => snapshot.background = self.background()?,
            "blur" => {
                snapshot.background = BackgroundSettings::Blur {
                    intensity: self.unit()?,
                }
            }
            "size" => snapshot.size = Some(self.size()?),
            "pixel_ratio" => {
                let ratio = self.float()?;
                if ratio <= 0.0 {
                    return Err(self.invalid("must be positive"));
                }
                snapshot.pixel_ratio = Some(ratio);
            }
            "debug_wire" => snapshot.debug_wire = self.boolean()?,
            "empty_frame" => extras.empty_frame = self.boolean()?,
            "magnifier" => {
                let (x, y) = self
                    .value
                    .split_once(',')
                    .ok_or_else(|| self.invalid("expected X,Y"))?;
                let parse = |v: &str| {
                    v.trim()
                        .parse::<f32>()
                        .map_err(|err| self.invalid(err.to_string()))
                };
                extras.magnifier = Some([parse(x)?, parse(y)?]);
            }
            key => {
                let knob = key
                    .parse::<Knob>()
                    .map_err(|_| SettingError::UnknownKey(key.to_string()))?;
                let intensity = self.unit()?;
                if intensity == knob.default_value() {
                    snapshot.adv.remove(&knob);
                } else {
                    snapshot.adv.insert(knob, intensity);
                }
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: impl Into<String>) -> SettingError {
        SettingError::InvalidValue {
            key: self.key.clone(),
            value: self.value.clone(),
            reason: reason.into(),
        }
    }

    fn float(&self) -> Result<f32, SettingError> {
        let value: f32 = self
            .value
            .parse()
            .map_err(|err: std::num::ParseFloatError| self.invalid(err.to_string()))?;
        if !value.is_finite() {
            return Err(self.invalid("must be finite"));
        }
        Ok(value)
    }

    fn unit(&self) -> Result<f32, SettingError> {
        let value = self.float()?;
        if !(0.0..=1.0).contains(&value) {
            return Err(self.invalid("must be within 0..1"));
        }
        Ok(value)
    }

    fn boolean(&self) -> Result<bool, SettingError> {
        match self.value.to_ascii_lowercase().as_str() {
            "true" | "on" | "1" | "yes" => Ok(true),
            "false" | "off" | "0" | "no" => Ok(false),
            _ => Err(self.invalid("expected true or false")),
        }
    }

    fn optional_name(&self) -> Option<String> {
        match self.value.as_str() {
            "" | "none" | "off" => None,
            name => Some(name.to_string()),
        }
    }

    fn size(&self) -> Result<[u32; 2], SettingError> {
        let (w, h) = self
            .value
            .split_once(['x', 'X'])
            .ok_or_else(|| self.invalid("expected WIDTHxHEIGHT"))?;
        let parse = |v: &str| match v.trim().parse::<u32>() {
            Ok(0) => Err(self.invalid("dimensions must be non-zero")),
            Ok(n) => Ok(n),
            Err(err) => Err(self.invalid(err.to_string())),
        };
        Ok([parse(w)?, parse(h)?])
    }

    /// `none`, `blur[:INTENSITY]`, a `#rgb`/`#rrggbb` color, or an image URL.
    fn background(&self) -> Result<BackgroundSettings, SettingError> {
        let value = self.value.as_str();
        if matches!(value, "" | "none" | "off") {
            return Ok(BackgroundSettings::None);
        }
        if let Some(rest) = value.strip_prefix("blur") {
            let intensity = match rest.strip_prefix(':') {
                Some(amount) => Setting {
                    key: self.key.clone(),
                    value: amount.to_string(),
                }
                .unit()?,
                None if rest.is_empty() => 0.5,
                None => return Err(self.invalid("expected blur or blur:INTENSITY")),
            };
            return Ok(BackgroundSettings::Blur { intensity });
        }
        if value.starts_with('#') {
            if parse_hex_color(value).is_none() {
                return Err(self.invalid("expected #rgb or #rrggbb"));
            }
            return Ok(BackgroundSettings::Color {
                color: value.to_string(),
            });
        }
        Ok(BackgroundSettings::Image {
            url: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(pairs: &[&str]) -> Result<(PipelineSnapshot, Extras), SettingError> {
        let mut snapshot = PipelineSnapshot::default();
        let mut extras = Extras::default();
        for pair in pairs {
            pair.parse::<Setting>()?.apply(&mut snapshot, &mut extras)?;
        }
        Ok((snapshot, extras))
    }

    #[test]
    fn beauty_and_grade() {
        let (snapshot, _) = apply(&["smooth=0.6", "whiten=0.2", "lut=ziran", "lut.intensity=0.5"])
            .expect("valid settings");
        assert_eq!(snapshot.beauty.smooth, 0.6);
        assert_eq!(snapshot.beauty.whiten, 0.2);
        assert_eq!(snapshot.lut.name.as_deref(), Some("ziran"));
        assert_eq!(snapshot.lut.intensity, Some(0.5));
    }

    #[test]
    fn styles_are_checked_by_name() {
        let (snapshot, _) = apply(&["style=soulOut"]).expect("known style");
        assert_eq!(snapshot.styled.name.as_deref(), Some("soulOut"));

        let err = apply(&["style=vaporwave"]).expect_err("unknown style");
        assert!(matches!(err, SettingError::InvalidValue { .. }));

        let (snapshot, _) = apply(&["style=sketch", "style=none"]).expect("disable");
        assert_eq!(snapshot.styled.name, None);
    }

    #[test]
    fn background_forms() {
        let cases = [
            ("background=none", BackgroundSettings::None),
            ("background=blur", BackgroundSettings::Blur { intensity: 0.5 }),
            ("background=blur:0.8", BackgroundSettings::Blur { intensity: 0.8 }),
            (
                "background=#0f0",
                BackgroundSettings::Color {
                    color: "#0f0".to_string(),
                },
            ),
            (
                "background=https://example.com/beach.jpg",
                BackgroundSettings::Image {
                    url: "https://example.com/beach.jpg".to_string(),
                },
            ),
        ];
        for (pair, expected) in cases {
            let (snapshot, _) = apply(&[pair]).expect(pair);
            assert_eq!(snapshot.background, expected, "{pair}");
        }
        assert!(apply(&["background=#zzz"]).is_err());
        assert!(apply(&["background=blur:2"]).is_err());
    }

    #[test]
    fn knobs_by_camel_case_name() {
        let (snapshot, _) = apply(&["enlargeEye=0.4", "eyeDistance=0.5"]).expect("knobs");
        assert_eq!(snapshot.adv.get(&Knob::EnlargeEye), Some(&0.4));
        // back at its default, so nothing to record
        assert!(!snapshot.adv.contains_key(&Knob::EyeDistance));
    }

    #[test]
    fn extras_and_geometry() {
        let (snapshot, extras) = apply(&[
            "size=1280x720",
            "pixel_ratio=2",
            "magnifier=0.3, 0.6",
            "empty_frame=on",
            "debug_wire=true",
        ])
        .expect("valid settings");
        assert_eq!(snapshot.size, Some([1280, 720]));
        assert_eq!(snapshot.pixel_ratio, Some(2.0));
        assert!(snapshot.debug_wire);
        assert_eq!(extras.magnifier, Some([0.3, 0.6]));
        assert!(extras.empty_frame);
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            "smooth".parse::<Setting>(),
            Err(SettingError::Malformed("smooth".to_string()))
        );
        assert!(matches!(
            apply(&["sparkle=1"]),
            Err(SettingError::UnknownKey(key)) if key == "sparkle"
        ));
        assert!(apply(&["smooth=1.5"]).is_err());
        assert!(apply(&["size=0x10"]).is_err());
        assert!(apply(&["pixel_ratio=-1"]).is_err());
    }
}
