//! Per-knob landmark handlers.
//!
//! Every handler moves target points with one of three primitives: a
//! rotation about a computed center, a lerp toward a reference point, or a
//! lerp toward the intersection of two anchor lines.

use std::f32::consts::PI;

use crate::knobs::{Knob, KnobSet};
use crate::landmarks::*;
use crate::vector::{Matrix3x3, Vector2};

/// Threshold that widens the symmetric range of the miscut ratio.
const MISCUT_TOLERANCE: f32 = 0.7;

/// Handler order; later handlers see earlier handlers' output.
pub const HANDLER_ORDER: [Knob; 18] = [
    Knob::EyeAngle,
    Knob::OpenCanthus,
    Knob::EyeDistance,
    Knob::RoundedEye,
    Knob::EnlargeEye,
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
];

/// Eye centers and head-yaw compensation of one face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceAnalysis {
    pub l_eye_center: Vector2,
    pub r_eye_center: Vector2,
    /// Symmetry of the two eye-to-bridge distances, 1 for a frontal face.
    pub miscut: f32,
    pub l_miscut: f32,
    pub r_miscut: f32,
}

impl FaceAnalysis {
    pub fn analyze(face: &FaceLandmarks) -> Self {
        let l_eye_center = face.centroid_of(&LEFT_EYE_RING);
        let r_eye_center = face.centroid_of(&RIGHT_EYE_RING);
        let bridge = face[NOSE_BRIDGE];
        let l_dis = l_eye_center.dis(bridge);
        let r_dis = r_eye_center.dis(bridge);
        let max_dis = l_dis.max(r_dis);
        if max_dis <= f32::EPSILON {
            return Self {
                l_eye_center,
                r_eye_center,
                miscut: 1.0,
                l_miscut: 1.0,
                r_miscut: 1.0,
            };
        }
        let ratio = l_dis.min(r_dis) / max_dis;
        Self {
            l_eye_center,
            r_eye_center,
            miscut: (ratio / MISCUT_TOLERANCE).clamp(0.0, 1.0),
            l_miscut: l_dis / max_dis,
            r_miscut: r_dis / max_dis,
        }
    }

    fn refresh_eye_centers(&mut self, face: &FaceLandmarks) {
        self.l_eye_center = face.centroid_of(&LEFT_EYE_RING);
        self.r_eye_center = face.centroid_of(&RIGHT_EYE_RING);
    }
}

/// Shader-space eye bulge parameters, in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeBulge {
    pub center: Vector2,
    pub range: f32,
    /// Rounded-eye strength after openness gating.
    pub round: f32,
    /// Enlarge strength after openness gating.
    pub enlarge: f32,
}

/// Parameters the shader passes need in addition to the warped mesh.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FeatureParas {
    pub eyes: Option<[EyeBulge; 2]>,
    pub teeth_whiten: f32,
    pub eye_brighten: f32,
}

/// Rest pose and warped pose of one face.
#[derive(Debug, Clone, PartialEq)]
pub struct WarpedFace {
    pub rest: FaceLandmarks,
    pub target: FaceLandmarks,
    pub analysis: FaceAnalysis,
    pub paras: FeatureParas,
}

/// `smoothstep(0.08, 0.2, ratio)` of the eye height over its width.
pub fn eye_openness(face: &FaceLandmarks, top: usize, bottom: usize, a: usize, b: usize) -> f32 {
    let width = face[a].dis(face[b]);
    if width <= f32::EPSILON {
        return 0.0;
    }
    let ratio = face[top].dis(face[bottom]) / width;
    let t = ((ratio - 0.08) / (0.2 - 0.08)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Runs every non-default knob handler on one detector face.
pub fn warp_face(detector: FaceLandmarks, knobs: &KnobSet) -> WarpedFace {
    let analysis = FaceAnalysis::analyze(&detector);
    let mut rest = detector;
    rest.extend(analysis.l_miscut, analysis.r_miscut);

    let mut warp = Warp {
        face: rest.clone(),
        analysis,
        paras: FeatureParas::default(),
    };
    for knob in HANDLER_ORDER {
        if knobs.is_default(knob) {
            continue;
        }
        warp.apply(knob, knobs.get(knob));
    }
    warp.paras.eye_brighten = knobs.get(Knob::BrightenEye);

    WarpedFace {
        rest,
        target: warp.face,
        analysis,
        paras: warp.paras,
    }
}

struct Warp {
    face: FaceLandmarks,
    analysis: FaceAnalysis,
    paras: FeatureParas,
}

fn toward(p: Vector2, target: Option<Vector2>, t: f32) -> Vector2 {
    match target {
        Some(target) => p.lerp(target, t),
        None => p,
    }
}

impl Warp {
    fn apply(&mut self, knob: Knob, intensity: f32) {
        match knob {
            Knob::EyeAngle => self.eye_angle(intensity),
            Knob::OpenCanthus => self.open_canthus(intensity),
            Knob::EyeDistance => self.eye_distance(intensity),
            Knob::RoundedEye | Knob::EnlargeEye => self.eye_bulge(knob, intensity),
            Knob::ShrinkNose => self.shrink_nose(intensity),
            Knob::LengthenNose => self.lengthen_nose(intensity),
            Knob::ShrinkMouth => self.shrink_mouth(intensity),
            Knob::MouthCorners => self.mouth_corners(intensity),
            Knob::AdjustPhiltrum => self.adjust_philtrum(intensity),
            Knob::ShrinkUnderjaw => self.shrink_underjaw(intensity),
            Knob::ShrinkCheekbone => self.shrink_cheekbone(intensity),
            Knob::LengthenJaw => self.lengthen_jaw(intensity),
            Knob::NarrowedFace => self.narrowed_face(intensity),
            Knob::ShrinkFace => self.shrink_face(intensity),
            Knob::VShapedFace => self.v_shaped_face(intensity),
            Knob::MinifyFace => self.minify_face(intensity),
            Knob::WhitenTeeth => self.whiten_teeth(intensity),
            Knob::BrightenEye | Knob::FadeHeadWrinkle | Knob::FadeEyeRim | Knob::FadeNoseLine => {}
        }
    }

    fn transform(&mut self, indices: &[usize], m: &Matrix3x3) {
        for &idx in indices {
            self.face[idx] = m.multiply_point(self.face[idx]);
        }
    }

    fn translate(&mut self, indices: &[usize], by: Vector2) {
        for &idx in indices {
            self.face[idx] = self.face[idx] + by;
        }
    }

    fn lerp_pairs(
        &mut self,
        pairs: &[[usize; 2]],
        ratios: &[f32],
        l_intensity: f32,
        r_intensity: f32,
        targets: impl Fn(Vector2, Vector2) -> (Option<Vector2>, Option<Vector2>),
    ) {
        for (index, &[l, r]) in pairs.iter().enumerate() {
            let ratio = ratios.get(index).copied().unwrap_or(1.0);
            let lp = self.face[l];
            let rp = self.face[r];
            let (lt, rt) = targets(lp, rp);
            self.face[l] = toward(lp, lt, l_intensity * ratio);
            self.face[r] = toward(rp, rt, r_intensity * ratio);
        }
    }

    fn eye_angle(&mut self, intensity: f32) {
        let angle = (intensity - 0.5) * 0.06 * PI;
        let l = self.analysis.l_eye_center;
        let r = self.analysis.r_eye_center;
        self.transform(&LEFT_EYE, &Matrix3x3::rotate(angle, l.x, l.y));
        self.transform(&RIGHT_EYE, &Matrix3x3::rotate(-angle, r.x, r.y));
    }

    fn open_canthus(&mut self, intensity: f32) {
        let scale = 1.0 + intensity * 0.05 * self.analysis.miscut;
        let p52 = self.face[LEFT_EYE_OUTER];
        let p55 = p52 + (self.face[LEFT_EYE_INNER] - p52) * scale;
        let p61 = self.face[RIGHT_EYE_OUTER];
        let p58 = p61 + (self.face[RIGHT_EYE_INNER] - p61) * scale;
        self.face[LEFT_EYE_INNER] = p55;
        self.face[RIGHT_EYE_INNER] = p58;
        for idx in [54, 56] {
            self.face[idx] = self.face[idx].lerp(p55, intensity * 0.1);
        }
        for idx in [59, 63] {
            self.face[idx] = self.face[idx].lerp(p58, intensity * 0.1);
        }
        self.analysis.refresh_eye_centers(&self.face);
    }

    fn eye_distance(&mut self, intensity: f32) {
        let mut v = (intensity - 0.5) * self.analysis.miscut * 0.3;
        // widening reads as unnatural sooner than narrowing
        if v > 0.0 {
            v *= 0.6;
        }
        let p43 = self.face[NOSE_BRIDGE];
        let p55 = self.face[LEFT_EYE_INNER];
        let p58 = self.face[RIGHT_EYE_INNER];
        let pivot = Vector2::intersect(p43, self.face[NOSE_BRIDGE_LOW], p55, p58).unwrap_or(p43);
        self.translate(&LEFT_EYE, (p55 - pivot) * v);
        self.translate(&RIGHT_EYE, (p58 - pivot) * v);
        self.analysis.refresh_eye_centers(&self.face);
    }

    fn eye_bulge(&mut self, knob: Knob, intensity: f32) {
        let face = &self.face;
        let mut eyes = self.paras.eyes.unwrap_or_else(|| {
            let left = EyeBulge {
                center: self.analysis.l_eye_center,
                range: face[LEFT_EYE_OUTER].dis(face[LEFT_EYE_INNER]) * 0.5,
                round: 0.0,
                enlarge: 0.0,
            };
            let right = EyeBulge {
                center: self.analysis.r_eye_center,
                range: face[RIGHT_EYE_OUTER].dis(face[RIGHT_EYE_INNER]) * 0.5,
                round: 0.0,
                enlarge: 0.0,
            };
            [left, right]
        });
        let openness = [
            eye_openness(face, LEFT_EYE_TOP, LEFT_EYE_BOTTOM, LEFT_EYE_OUTER, LEFT_EYE_INNER),
            eye_openness(face, RIGHT_EYE_TOP, RIGHT_EYE_BOTTOM, RIGHT_EYE_INNER, RIGHT_EYE_OUTER),
        ];
        for (eye, open) in eyes.iter_mut().zip(openness) {
            match knob {
                Knob::RoundedEye => eye.round = intensity * open,
                _ => eye.enlarge = intensity * open,
            }
        }
        self.paras.eyes = Some(eyes);
    }

    fn shrink_nose(&mut self, intensity: f32) {
        let v = intensity * 0.15 * self.analysis.miscut;
        let p46 = self.face[NOSE_TIP];
        for idx in NOSTRILS {
            self.face[idx] = self.face[idx].lerp(p46, v);
        }
        let p49 = self.face[NOSE_BOTTOM];
        for idx in [NOSE_LEFT_WING, NOSE_RIGHT_WING] {
            self.face[idx] = self.face[idx].lerp(p49, v);
        }
    }

    fn lengthen_nose(&mut self, intensity: f32) {
        // detector output drifts on turned heads; only trust near-frontal faces
        let v = (intensity - 0.5) * 0.5 * (self.analysis.miscut.powi(3) * 4.0).min(1.0);
        let adjacent = [80, 81, 82, 83, NOSE_LEFT_WING, NOSE_RIGHT_WING];
        let p46 = self.face[NOSE_TIP];
        let offsets: Vec<Vector2> = adjacent.iter().map(|&idx| self.face[idx] - p46).collect();

        let p49 = self.face[NOSE_BOTTOM];
        let n49 = p49.lerp(self.face[UPPER_LIP_TOP], v);
        self.face[NOSE_BOTTOM] = n49;
        let n46 = p46 + (n49 - p49);
        self.face[NOSE_TIP] = n46;
        for (&idx, offset) in adjacent.iter().zip(offsets) {
            self.face[idx] = n46 + offset;
        }
    }

    fn shrink_mouth(&mut self, intensity: f32) {
        const OUTER: [f32; 12] = [1.0, 0.7, 0.2, 0.0, 0.2, 0.7, 1.0, 0.66, 0.33, 0.0, 0.33, 0.66];
        const INNER: [f32; 8] = [1.0, 0.66, 0.0, 0.66, 1.0, 0.66, 0.0, 0.66];
        let h = 1.0 + intensity * 0.15 * self.analysis.miscut;
        let v = 1.0 + intensity * 0.2;
        let outer: Vec<usize> = OUTER_LIP.collect();
        let center = self.face.centroid_of(&outer);
        let scaled = OUTER_LIP.zip(OUTER).chain(INNER_LIP.zip(INNER));
        for (idx, l) in scaled {
            let scale = h * l + v * (1.0 - l);
            self.face[idx] = center + (self.face[idx] - center) * scale;
        }
    }

    fn mouth_corners(&mut self, intensity: f32) {
        let angle = (intensity - 0.5) * 0.06 * PI;
        let outer: Vec<usize> = OUTER_LIP.collect();
        let c = self.face.centroid_of(&outer);
        for (indices, angle) in [
            ([84, 85, 86, 94, 95, 96, 97, 103], angle),
            ([90, 89, 88, 92, 91, 100, 99, 101], -angle),
        ] {
            let m1 = Matrix3x3::rotate(angle, c.x, c.y);
            let m2 = Matrix3x3::rotate(angle * 0.66, c.x, c.y);
            let m3 = Matrix3x3::rotate(angle * 0.33, c.x, c.y);
            let m4 = Matrix3x3::rotate(angle * 0.1, c.x, c.y);
            let set = [m1, m2, m4, m3, m2, m1, m2, m2];
            for (idx, m) in indices.into_iter().zip(set) {
                self.face[idx] = m.multiply_point(self.face[idx]);
            }
        }
    }

    fn adjust_philtrum(&mut self, intensity: f32) {
        let v = (intensity - 0.5) * 0.25 * (self.analysis.miscut.powi(2) * 2.0).min(1.0);
        let by = (self.face[NOSE_BOTTOM] - self.face[UPPER_LIP_TOP]) * v;
        let mouth: Vec<usize> = (OUTER_LIP.start..INNER_LIP.end).collect();
        self.translate(&mouth, by);
    }

    fn shrink_underjaw(&mut self, intensity: f32) {
        let v = intensity * 0.1;
        let (l, r) = (v * self.analysis.l_miscut, v * self.analysis.r_miscut);
        let p16 = self.face[CHIN];
        let p49 = self.face[NOSE_BOTTOM];
        let p0 = self.face[JAW_FIRST];
        let p32 = self.face[JAW_LAST];
        self.lerp_pairs(
            &[[8, 24], [10, 22], [12, 20]],
            &[0.5, 1.0, 0.5],
            l,
            r,
            |lp, rp| {
                (
                    Vector2::intersect(lp, p49, p0, p16),
                    Vector2::intersect(rp, p49, p32, p16),
                )
            },
        );
    }

    fn shrink_cheekbone(&mut self, intensity: f32) {
        let v = intensity * 0.4;
        let (l, r) = (v * self.analysis.l_miscut, v * self.analysis.r_miscut);
        let p12 = self.face[12];
        let p20 = self.face[20];
        let p0 = self.face[JAW_FIRST];
        let p32 = self.face[JAW_LAST];
        self.lerp_pairs(
            &[[2, 30], [4, 28], [6, 26], [8, 24]],
            &[1.0, 1.0, 0.5, 0.1],
            l,
            r,
            |lp, rp| {
                (
                    Vector2::intersect(lp, rp, p0, p12),
                    Vector2::intersect(rp, lp, p32, p20),
                )
            },
        );
    }

    fn lengthen_jaw(&mut self, intensity: f32) {
        let v = (0.5 - intensity) * 0.1 * (self.analysis.miscut.powi(2) * 4.0).min(1.0);
        let along = self.face[NOSE_BOTTOM] - self.face[CHIN];
        for (idx, ratio) in [(12, 0.5), (20, 0.5), (14, 1.0), (CHIN, 1.0), (18, 1.0)] {
            self.face[idx] = self.face[idx] + along * (v * ratio);
        }
    }

    fn narrowed_face(&mut self, intensity: f32) {
        let v = intensity * 0.05;
        let (l, r) = (v * self.analysis.l_miscut, v * self.analysis.r_miscut);
        let p43 = self.face[NOSE_BRIDGE];
        let p16 = self.face[CHIN];
        self.lerp_pairs(
            &[
                [FOREHEAD.start, FOREHEAD.end - 1],
                [0, 32],
                [2, 30],
                [4, 28],
                [6, 26],
                [8, 24],
                [10, 22],
                [12, 20],
                [14, 18],
            ],
            &[0.25, 0.625],
            l,
            r,
            |lp, rp| {
                let c = Vector2::intersect(lp, rp, p43, p16);
                (c, c)
            },
        );
    }

    fn shrink_face(&mut self, intensity: f32) {
        let v = intensity * 0.1;
        let (l, r) = (v * self.analysis.l_miscut, v * self.analysis.r_miscut);
        let p43 = self.face[NOSE_BRIDGE];
        let p16 = self.face[CHIN];
        self.lerp_pairs(
            &[[2, 30], [4, 28], [6, 26], [8, 24], [10, 22], [12, 20], [14, 18]],
            &[0.1, 0.325, 0.55, 0.775, 1.0, 0.9, 0.8],
            l,
            r,
            |lp, rp| {
                let c = Vector2::intersect(lp, rp, p43, p16);
                (c, c)
            },
        );
        // pull the chin up slightly
        let p93 = self.face[LOWER_LIP_BOTTOM];
        self.lerp_pairs(&[[14, 18], [12, 20]], &[0.4, 0.2], l, r, |_, _| {
            (Some(p93), Some(p93))
        });
        self.face[CHIN] = self.face[CHIN].lerp(p93, l.max(r) * 0.6);
    }

    fn v_shaped_face(&mut self, intensity: f32) {
        let v = intensity - 0.5;
        let v = if v > 0.0 { v * 0.4 } else { v * 0.2 };
        let (l, r) = (v * self.analysis.l_miscut, v * self.analysis.r_miscut);
        let p16 = self.face[CHIN];
        let p2 = self.face[2];
        let p30 = self.face[30];
        self.lerp_pairs(
            &[[4, 28], [6, 26], [8, 24], [10, 22], [12, 20], [14, 18]],
            &[0.33, 0.66],
            l,
            r,
            |lp, rp| {
                (
                    Vector2::intersect(lp, rp, p2, p16),
                    Vector2::intersect(rp, lp, p30, p16),
                )
            },
        );
    }

    fn minify_face(&mut self, intensity: f32) {
        let v = intensity * 0.1 * (self.analysis.miscut.powi(2) * 2.0).min(1.0);
        let p43 = self.face[NOSE_BRIDGE];
        let p49 = self.face[NOSE_BOTTOM];
        let Some(axis) = Vector2::intersect(p43, p49, self.face[2], self.face[30]) else {
            return;
        };
        let trace = axis.lerp(p43, v);

        const SIDE_RATIOS: [f32; 6] = [0.1, 0.25, 0.4, 0.55, 0.7, 0.85];
        let left = [4, 6, 8, 10, 12, 14, 84, 85, 86, 94, 95, 96, 97, 103, 47, 80, 82];
        let right = [28, 26, 24, 22, 20, 18, 88, 89, 90, 91, 92, 99, 100, 101, 51, 81, 83];
        for side in [left, right] {
            for (index, idx) in side.into_iter().enumerate() {
                let ratio = SIDE_RATIOS.get(index).copied().unwrap_or(0.65);
                self.face[idx] = self.face[idx].lerp(trace, v * ratio);
            }
        }
        for (index, idx) in [CHIN, 93, 102, 98, 87, 49, 46].into_iter().enumerate() {
            let ratio = if index == 0 { 1.0 } else { 0.65 };
            self.face[idx] = self.face[idx].lerp(trace, v * ratio);
        }
    }

    fn whiten_teeth(&mut self, intensity: f32) {
        let width = self.face[INNER_LIP_LEFT].dis(self.face[INNER_LIP_RIGHT]);
        let width = if width > 0.0 { width } else { 1.0 };
        let ratio = self.face[INNER_LIP_TOP].dis(self.face[INNER_LIP_BOTTOM]) / width;
        self.paras.teeth_whiten = intensity * (ratio * 5.0).powi(2).clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::frontal_face;

    #[test]
    fn frontal_face_has_unit_miscut() {
        let analysis = FaceAnalysis::analyze(&frontal_face(0.0));
        assert!(analysis.miscut > 0.99, "miscut {}", analysis.miscut);
        assert!((analysis.l_miscut - analysis.r_miscut).abs() < 1e-3);
    }

    #[test]
    fn profile_face_has_small_miscut() {
        let analysis = FaceAnalysis::analyze(&frontal_face(0.9));
        assert!(analysis.miscut < 0.3, "miscut {}", analysis.miscut);
        assert!(analysis.r_miscut < 1.0 || analysis.l_miscut < 1.0);
        assert!(analysis.l_miscut > 0.0 && analysis.r_miscut > 0.0);
    }

    #[test]
    fn default_knobs_leave_target_at_rest() {
        let warped = warp_face(frontal_face(0.0), &KnobSet::default());
        assert_eq!(warped.rest, warped.target);
        assert_eq!(warped.rest.len(), EXTENDED_POINTS);
        assert!(warped.paras.eyes.is_none());
    }

    #[test]
    fn shrink_face_pulls_cheeks_inwards() {
        let mut knobs = KnobSet::default();
        knobs.set(Knob::ShrinkFace, 1.0);
        let warped = warp_face(frontal_face(0.0), &knobs);
        let rest_width = warped.rest[10].dis(warped.rest[22]);
        let target_width = warped.target[10].dis(warped.target[22]);
        assert!(target_width < rest_width);
        assert!(warped.target[CHIN].y < warped.rest[CHIN].y);
    }

    #[test]
    fn eye_distance_below_default_narrows() {
        let mut knobs = KnobSet::default();
        knobs.set(Knob::EyeDistance, 0.0);
        let warped = warp_face(frontal_face(0.0), &knobs);
        let before = warped.rest[LEFT_EYE_INNER].dis(warped.rest[RIGHT_EYE_INNER]);
        let after = warped.target[LEFT_EYE_INNER].dis(warped.target[RIGHT_EYE_INNER]);
        assert!(after < before);
    }

    #[test]
    fn enlarge_eye_reports_bulge_not_moves() {
        let mut knobs = KnobSet::default();
        knobs.set(Knob::EnlargeEye, 1.0);
        let warped = warp_face(frontal_face(0.0), &knobs);
        assert_eq!(warped.rest, warped.target);
        let eyes = warped.paras.eyes.expect("eye bulge");
        assert!(eyes[0].enlarge > 0.0 && eyes[0].round == 0.0);
        assert!(eyes[1].range > 0.0);
    }

    #[test]
    fn closed_eyes_suppress_bulge() {
        let mut face = frontal_face(0.0);
        face[LEFT_EYE_TOP] = face[LEFT_EYE_BOTTOM];
        let mut knobs = KnobSet::default();
        knobs.set(Knob::RoundedEye, 1.0);
        let warped = warp_face(face, &knobs);
        let eyes = warped.paras.eyes.expect("eye bulge");
        assert_eq!(eyes[0].round, 0.0);
        assert!(eyes[1].round > 0.0);
    }

    #[test]
    fn closed_mouth_gets_no_teeth_whitening() {
        let mut knobs = KnobSet::default();
        knobs.set(Knob::WhitenTeeth, 1.0);
        let mut face = frontal_face(0.0);
        face[INNER_LIP_TOP] = face[INNER_LIP_BOTTOM];
        assert_eq!(warp_face(face, &knobs).paras.teeth_whiten, 0.0);
        let open = warp_face(frontal_face(0.0), &knobs);
        assert!(open.paras.teeth_whiten > 0.0);
    }
}
