use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const KNOB_COUNT: usize = 22;

/// Independent adjustments of the advanced beauty stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Knob {
    EnlargeEye,
    RoundedEye,
    OpenCanthus,
    EyeDistance,
    EyeAngle,
    ShrinkNose,
    LengthenNose,
    ShrinkMouth,
    MouthCorners,
    AdjustPhiltrum,
    ShrinkUnderjaw,
    ShrinkCheekbone,
    LengthenJaw,
    NarrowedFace,
    ShrinkFace,
    VShapedFace,
    MinifyFace,
    WhitenTeeth,
    BrightenEye,
    FadeHeadWrinkle,
    FadeEyeRim,
    FadeNoseLine,
}

impl Knob {
    pub const ALL: [Knob; KNOB_COUNT] = [
        Knob::EnlargeEye,
        Knob::RoundedEye,
        Knob::OpenCanthus,
        Knob::EyeDistance,
        Knob::EyeAngle,
        Knob::ShrinkNose,
        Knob::LengthenNose,
        Knob::ShrinkMouth,
        Knob::MouthCorners,
        Knob::AdjustPhiltrum,
        Knob::ShrinkUnderjaw,
        Knob::ShrinkCheekbone,
        Knob::LengthenJaw,
        Knob::NarrowedFace,
        Knob::ShrinkFace,
        Knob::VShapedFace,
        Knob::MinifyFace,
        Knob::WhitenTeeth,
        Knob::BrightenEye,
        Knob::FadeHeadWrinkle,
        Knob::FadeEyeRim,
        Knob::FadeNoseLine,
    ];

    /// Knobs whose neutral position is the middle of the slider.
    pub fn default_value(self) -> f32 {
        match self {
            Knob::EyeDistance
            | Knob::EyeAngle
            | Knob::LengthenNose
            | Knob::ShrinkMouth
            | Knob::MouthCorners
            | Knob::AdjustPhiltrum
            | Knob::LengthenJaw
            | Knob::VShapedFace => 0.5,
            _ => 0.0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Knob::EnlargeEye => "enlargeEye",
            Knob::RoundedEye => "roundedEye",
            Knob::OpenCanthus => "openCanthus",
            Knob::EyeDistance => "eyeDistance",
            Knob::EyeAngle => "eyeAngle",
            Knob::ShrinkNose => "shrinkNose",
            Knob::LengthenNose => "lengthenNose",
            Knob::ShrinkMouth => "shrinkMouth",
            Knob::MouthCorners => "mouthCorners",
            Knob::AdjustPhiltrum => "adjustPhiltrum",
            Knob::ShrinkUnderjaw => "shrinkUnderjaw",
            Knob::ShrinkCheekbone => "shrinkCheekbone",
            Knob::LengthenJaw => "lengthenJaw",
            Knob::NarrowedFace => "narrowedFace",
            Knob::ShrinkFace => "shrinkFace",
            Knob::VShapedFace => "vShapedFace",
            Knob::MinifyFace => "minifyFace",
            Knob::WhitenTeeth => "whitenTeeth",
            Knob::BrightenEye => "brightenEye",
            Knob::FadeHeadWrinkle => "fadeHeadWrinkle",
            Knob::FadeEyeRim => "fadeEyeRim",
            Knob::FadeNoseLine => "fadeNoseLine",
        }
    }
}

impl fmt::Display for Knob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown beauty knob '{0}'")]
pub struct UnknownKnob(pub String);

impl FromStr for Knob {
    type Err = UnknownKnob;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Knob::ALL
            .iter()
            .copied()
            .find(|knob| knob.name() == s)
            .ok_or_else(|| UnknownKnob(s.to_string()))
    }
}

/// Current intensity of every knob, each clamped to `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct KnobSet {
    values: [f32; KNOB_COUNT],
}

impl Default for KnobSet {
    fn default() -> Self {
        let mut values = [0.0; KNOB_COUNT];
        for knob in Knob::ALL {
            values[knob as usize] = knob.default_value();
        }
        Self { values }
    }
}

impl KnobSet {
    pub fn get(&self, knob: Knob) -> f32 {
        self.values[knob as usize]
    }

    pub fn set(&mut self, knob: Knob, intensity: f32) {
        self.values[knob as usize] = if intensity.is_nan() {
            knob.default_value()
        } else {
            intensity.clamp(0.0, 1.0)
        };
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Applies `preset`, returning every knob it does not name to its default.
    pub fn preset(&mut self, preset: &BTreeMap<Knob, f32>) {
        self.reset();
        for (&knob, &value) in preset {
            self.set(knob, value);
        }
    }

    pub fn is_default(&self, knob: Knob) -> bool {
        self.get(knob) == knob.default_value()
    }

    /// Knobs that differ from their defaults.
    pub fn changed(&self) -> BTreeMap<Knob, f32> {
        Knob::ALL
            .iter()
            .filter(|knob| !self.is_default(**knob))
            .map(|knob| (*knob, self.get(*knob)))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Knob, f32)> + '_ {
        Knob::ALL.iter().map(move |knob| (*knob, self.get(*knob)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_preset_restores_defaults() {
        let mut knobs = KnobSet::default();
        knobs.set(Knob::EyeDistance, 0.9);
        knobs.set(Knob::ShrinkFace, 0.4);
        knobs.preset(&BTreeMap::new());
        assert_eq!(knobs.get(Knob::EyeDistance), 0.5);
        assert_eq!(knobs.get(Knob::ShrinkFace), 0.0);
        assert!(knobs.changed().is_empty());
    }

    #[test]
    fn preset_resets_unnamed_knobs() {
        let mut knobs = KnobSet::default();
        knobs.set(Knob::EnlargeEye, 0.7);
        let preset = BTreeMap::from([(Knob::VShapedFace, 0.8)]);
        knobs.preset(&preset);
        assert_eq!(knobs.get(Knob::EnlargeEye), 0.0);
        assert_eq!(knobs.get(Knob::VShapedFace), 0.8);
    }

    #[test]
    fn set_clamps_into_unit_range() {
        let mut knobs = KnobSet::default();
        knobs.set(Knob::MinifyFace, 3.0);
        knobs.set(Knob::EyeAngle, -1.0);
        assert_eq!(knobs.get(Knob::MinifyFace), 1.0);
        assert_eq!(knobs.get(Knob::EyeAngle), 0.0);
    }

    #[test]
    fn names_round_trip() {
        for knob in Knob::ALL {
            assert_eq!(knob.name().parse::<Knob>().unwrap(), knob);
        }
        assert!("smileMore".parse::<Knob>().is_err());
    }
}
