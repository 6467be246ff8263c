//! Fixed landmark schema of the 106-point face detector.
//!
//! The detector emits 106 `(x, y)` pairs per face as `i16` pixel coordinates,
//! faces packed back to back with no header. Indices below name the points
//! the warp handlers touch; the synthesized forehead band and outline ring
//! extend the set to [`EXTENDED_POINTS`].

use std::f32::consts::PI;
use std::ops::{Index, IndexMut, Range};

use crate::vector::Vector2;

/// Points reported by the detector for one face.
pub const DETECTOR_POINTS: usize = 106;
/// `i16` values per face block.
pub const VALUES_PER_FACE: usize = DETECTOR_POINTS * 2;

pub const JAW_FIRST: usize = 0;
pub const JAW_LAST: usize = 32;
pub const CHIN: usize = 16;
pub const LEFT_BROW: [usize; 5] = [33, 34, 35, 36, 37];
pub const RIGHT_BROW: [usize; 5] = [38, 39, 40, 41, 42];
pub const NOSE_BRIDGE: usize = 43;
pub const NOSE_BRIDGE_LOW: usize = 44;
pub const NOSE_TIP: usize = 46;
pub const NOSE_LEFT_WING: usize = 47;
pub const NOSE_BOTTOM: usize = 49;
pub const NOSE_RIGHT_WING: usize = 51;
/// Nostril contour, 80/82 on the left and 81/83 on the right.
pub const NOSTRILS: [usize; 4] = [80, 81, 82, 83];

/// Left eye contour in ring order, outer corner first.
pub const LEFT_EYE_RING: [usize; 8] = [52, 53, 72, 54, 55, 56, 73, 57];
/// Right eye contour in ring order, inner corner first.
pub const RIGHT_EYE_RING: [usize; 8] = [58, 59, 75, 60, 61, 62, 76, 63];
/// Left eye points in detector order.
pub const LEFT_EYE: [usize; 8] = [52, 53, 54, 55, 56, 57, 72, 73];
/// Right eye points in detector order.
pub const RIGHT_EYE: [usize; 8] = [58, 59, 60, 61, 62, 63, 75, 76];
pub const LEFT_EYE_OUTER: usize = 52;
pub const LEFT_EYE_INNER: usize = 55;
pub const RIGHT_EYE_INNER: usize = 58;
pub const RIGHT_EYE_OUTER: usize = 61;
pub const LEFT_EYE_TOP: usize = 72;
pub const LEFT_EYE_BOTTOM: usize = 73;
pub const RIGHT_EYE_TOP: usize = 75;
pub const RIGHT_EYE_BOTTOM: usize = 76;
pub const LEFT_LOWER_LID: [usize; 3] = [57, 73, 56];
pub const RIGHT_LOWER_LID: [usize; 3] = [62, 76, 63];

pub const MOUTH_LEFT: usize = 84;
pub const UPPER_LIP_TOP: usize = 87;
pub const MOUTH_RIGHT: usize = 90;
pub const LOWER_LIP_BOTTOM: usize = 93;
/// Outer lip contour, clockwise from the left corner.
pub const OUTER_LIP: Range<usize> = 84..96;
/// Inner lip contour, clockwise from the left corner.
pub const INNER_LIP: Range<usize> = 96..104;
pub const INNER_LIP_LEFT: usize = 96;
pub const INNER_LIP_TOP: usize = 98;
pub const INNER_LIP_RIGHT: usize = 100;
pub const INNER_LIP_BOTTOM: usize = 102;

/// Synthesized forehead band, left brow end to right brow end.
pub const FOREHEAD: Range<usize> = 106..117;
/// Synthesized outline ring around the even jaw points.
pub const OUTLINE: Range<usize> = 117..134;
pub const EXTENDED_POINTS: usize = 134;

const FOREHEAD_HEIGHT: f32 = 0.9;
const FOREHEAD_EDGE_FALLOFF: f32 = 0.6;
const OUTLINE_EXTRUDE: f32 = 1.3;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LandmarkError {
    #[error("landmark block of {len} values is not a multiple of {VALUES_PER_FACE}")]
    Shape { len: usize },
}

/// Points of one face, detector points first then synthesized ones.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLandmarks {
    points: Vec<Vector2>,
}

impl FaceLandmarks {
    /// Builds a face from one 212-value detector block.
    pub fn from_block(block: &[i16]) -> Result<Self, LandmarkError> {
        if block.len() != VALUES_PER_FACE {
            return Err(LandmarkError::Shape { len: block.len() });
        }
        let points = block
            .chunks_exact(2)
            .map(|xy| Vector2::new(f32::from(xy[0]), f32::from(xy[1])))
            .collect();
        Ok(Self { points })
    }

    pub fn from_points(points: Vec<Vector2>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_extended(&self) -> bool {
        self.points.len() >= EXTENDED_POINTS
    }

    pub fn points(&self) -> &[Vector2] {
        &self.points
    }

    pub fn gather(&self, indices: &[usize]) -> Vec<Vector2> {
        indices.iter().map(|&idx| self.points[idx]).collect()
    }

    pub fn centroid_of(&self, indices: &[usize]) -> Vector2 {
        Vector2::centroid(&self.gather(indices))
    }

    /// Appends the forehead band and outline ring to a detector-only face.
    ///
    /// `l_miscut`/`r_miscut` shorten the band on the side turned away from
    /// the camera. Calling this on an already extended face is a no-op.
    pub fn extend(&mut self, l_miscut: f32, r_miscut: f32) {
        if self.is_extended() {
            return;
        }
        self.points.truncate(DETECTOR_POINTS);

        let bridge = self.points[NOSE_BRIDGE];
        let bottom = self.points[NOSE_BOTTOM];
        let up = (bridge - bottom).normalize();
        let height = bridge.dis(bottom) * FOREHEAD_HEIGHT;

        let mut band = Vec::with_capacity(FOREHEAD.len());
        band.extend(LEFT_BROW.iter().map(|&idx| self.points[idx]));
        band.push(self.points[LEFT_BROW[4]].lerp(self.points[RIGHT_BROW[0]], 0.5));
        band.extend(RIGHT_BROW.iter().map(|&idx| self.points[idx]));

        let last = (band.len() - 1) as f32;
        let mid = band.len() / 2;
        for (k, brow) in band.into_iter().enumerate() {
            let t = k as f32 / last;
            let bell = 0.5 - 0.5 * (2.0 * PI * t).cos();
            let falloff = FOREHEAD_EDGE_FALLOFF + (1.0 - FOREHEAD_EDGE_FALLOFF) * bell;
            let side = match k.cmp(&mid) {
                std::cmp::Ordering::Less => l_miscut,
                std::cmp::Ordering::Greater => r_miscut,
                std::cmp::Ordering::Equal => (l_miscut + r_miscut) * 0.5,
            };
            self.points.push(brow + up * (height * falloff * side));
        }

        for idx in (JAW_FIRST..=JAW_LAST).step_by(2) {
            let jaw = self.points[idx];
            self.points.push(bridge + (jaw - bridge) * OUTLINE_EXTRUDE);
        }
    }
}

impl Index<usize> for FaceLandmarks {
    type Output = Vector2;

    fn index(&self, index: usize) -> &Vector2 {
        &self.points[index]
    }
}

impl IndexMut<usize> for FaceLandmarks {
    fn index_mut(&mut self, index: usize) -> &mut Vector2 {
        &mut self.points[index]
    }
}

/// Splits a packed landmark array into per-face blocks.
///
/// An empty array means no faces. Any length that is not a whole number of
/// face blocks is rejected rather than partially indexed.
pub fn split_faces(data: &[i16]) -> Result<Vec<FaceLandmarks>, LandmarkError> {
    if data.len() % VALUES_PER_FACE != 0 {
        return Err(LandmarkError::Shape { len: data.len() });
    }
    data.chunks_exact(VALUES_PER_FACE)
        .map(FaceLandmarks::from_block)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_block() -> Vec<i16> {
        let mut block = vec![0i16; VALUES_PER_FACE];
        for i in 0..DETECTOR_POINTS {
            block[i * 2] = i as i16;
            block[i * 2 + 1] = 2 * i as i16;
        }
        block
    }

    #[test]
    fn split_rejects_partial_blocks() {
        let err = split_faces(&[0i16; 211]).unwrap_err();
        assert_eq!(err, LandmarkError::Shape { len: 211 });
    }

    #[test]
    fn split_empty_is_no_faces() {
        assert!(split_faces(&[]).unwrap().is_empty());
    }

    #[test]
    fn split_two_faces() {
        let mut data = flat_block();
        data.extend(flat_block());
        let faces = split_faces(&data).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[1][10], Vector2::new(10.0, 20.0));
    }

    #[test]
    fn eye_lids_mirror_between_sides() {
        assert!(RIGHT_EYE.contains(&RIGHT_EYE_TOP));
        assert!(RIGHT_EYE.contains(&RIGHT_EYE_BOTTOM));
        assert!(RIGHT_LOWER_LID.contains(&RIGHT_EYE_BOTTOM));
        assert!(LEFT_LOWER_LID.contains(&LEFT_EYE_BOTTOM));
        // both rings place the upper lid third and the lower lid seventh
        assert_eq!(LEFT_EYE_RING[2], LEFT_EYE_TOP);
        assert_eq!(RIGHT_EYE_RING[2], RIGHT_EYE_TOP);
        assert_eq!(LEFT_EYE_RING[6], LEFT_EYE_BOTTOM);
        assert_eq!(RIGHT_EYE_RING[6], RIGHT_EYE_BOTTOM);
    }

    #[test]
    fn extend_adds_band_and_ring() {
        let mut face = FaceLandmarks::from_block(&flat_block()).unwrap();
        face.extend(1.0, 1.0);
        assert_eq!(face.len(), EXTENDED_POINTS);
        face.extend(1.0, 1.0);
        assert_eq!(face.len(), EXTENDED_POINTS);
    }
}
