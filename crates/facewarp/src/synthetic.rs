//! Parametric detector output for tests and demos.
//!
//! Public so downstream crates can drive the warp without a detector; the
//! faces are plausible, not anatomically measured.

use std::f32::consts::PI;

use crate::landmarks::{FaceLandmarks, DETECTOR_POINTS, VALUES_PER_FACE};
use crate::vector::Vector2;

const CX: f32 = 320.0;

/// A plausible frontal face centered in a 640x480 frame.
///
/// `yaw` in `[0, 1)` compresses the left half toward the nose, mimicking a
/// head turned away from the camera.
pub fn frontal_face(yaw: f32) -> FaceLandmarks {
    frontal_face_at(Vector2::new(CX, 0.0), 1.0, yaw)
}

/// Same face translated by `offset` (x only affects placement) and scaled.
pub fn frontal_face_at(offset: Vector2, scale: f32, yaw: f32) -> FaceLandmarks {
    let mut p = vec![Vector2::ZERO; DETECTOR_POINTS];
    let set = |p: &mut [Vector2], idx: usize, dx: f32, y: f32| {
        p[idx] = Vector2::new(dx, y);
    };

    for i in 0..=32 {
        let t = i as f32 / 32.0;
        let a = PI * t;
        set(&mut p, i, -100.0 * a.cos(), 220.0 + 130.0 * a.sin());
    }
    for (k, idx) in (33..=37).enumerate() {
        let dx = -80.0 + 15.0 * k as f32;
        let y = 180.0 - 4.0 * (2.0 - (k as f32 - 2.0).abs());
        set(&mut p, idx, dx, y);
        set(&mut p, 42 - k, -dx, y);
    }
    for (idx, y) in [(43, 210.0), (44, 225.0), (45, 240.0), (46, 262.0)] {
        set(&mut p, idx, 0.0, y);
    }
    for (idx, dx, y) in [
        (47, -18.0, 268.0),
        (48, -9.0, 272.0),
        (49, 0.0, 275.0),
        (50, 9.0, 272.0),
        (51, 18.0, 268.0),
    ] {
        set(&mut p, idx, dx, y);
    }

    let left_eye = [
        (52, -72.0, 210.0),
        (53, -61.0, 203.0),
        (72, -50.0, 200.0),
        (54, -39.0, 203.0),
        (55, -28.0, 210.0),
        (56, -39.0, 216.0),
        (73, -50.0, 219.0),
        (57, -61.0, 216.0),
        (74, -50.0, 210.0),
        (104, -50.0, 210.0),
    ];
    let right_eye = [58, 59, 75, 60, 61, 62, 76, 63, 77, 105];
    for (&(idx, dx, y), mirror) in left_eye.iter().zip(right_eye) {
        set(&mut p, idx, dx, y);
        let mirrored_dx = match mirror {
            58 => 28.0,
            59 => 39.0,
            75 => 50.0,
            60 => 61.0,
            61 => 72.0,
            62 => 61.0,
            76 => 50.0,
            63 => 39.0,
            _ => 50.0,
        };
        set(&mut p, mirror, mirrored_dx, y);
    }
    for k in 0..4 {
        let dx = -75.0 + 16.0 * k as f32;
        set(&mut p, 64 + k, dx, 188.0);
        set(&mut p, 71 - k, -dx, 188.0);
    }
    for (idx, dx, y) in [
        (78, -10.0, 230.0),
        (79, 10.0, 230.0),
        (80, -14.0, 258.0),
        (81, 14.0, 258.0),
        (82, -20.0, 265.0),
        (83, 20.0, 265.0),
    ] {
        set(&mut p, idx, dx, y);
    }
    for (idx, dx, y) in [
        (84, -35.0, 305.0),
        (85, -24.0, 298.0),
        (86, -10.0, 294.0),
        (87, 0.0, 296.0),
        (88, 10.0, 294.0),
        (89, 24.0, 298.0),
        (90, 35.0, 305.0),
        (91, 24.0, 314.0),
        (92, 10.0, 319.0),
        (93, 0.0, 320.0),
        (94, -10.0, 319.0),
        (95, -24.0, 314.0),
        (96, -28.0, 305.0),
        (97, -12.0, 302.0),
        (98, 0.0, 301.0),
        (99, 12.0, 302.0),
        (100, 28.0, 305.0),
        (101, 12.0, 310.0),
        (102, 0.0, 311.0),
        (103, -12.0, 310.0),
    ] {
        set(&mut p, idx, dx, y);
    }

    let points = p
        .into_iter()
        .map(|v| {
            let dx = if v.x < 0.0 { v.x * (1.0 - yaw) } else { v.x };
            Vector2::new(offset.x + dx * scale, offset.y + v.y * scale)
        })
        .collect();
    FaceLandmarks::from_points(points)
}

/// Packs faces into the detector's flat `i16` layout.
pub fn pack(faces: &[FaceLandmarks]) -> Vec<i16> {
    let mut data = Vec::with_capacity(faces.len() * VALUES_PER_FACE);
    for face in faces {
        for p in face.points().iter().take(DETECTOR_POINTS) {
            data.push(p.x.round() as i16);
            data.push(p.y.round() as i16);
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::split_faces;

    #[test]
    fn packed_face_round_trips_through_detector_layout() {
        let face = frontal_face(0.0);
        let data = pack(&[face.clone(), face]);
        let faces = split_faces(&data).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0][16], Vector2::new(320.0, 350.0));
    }
}
