//! Triangle meshes derived from one warped face.
//!
//! The warp mesh covers the whole frame: the extended face points plus eight
//! frame-border anchors are triangulated in rest space, so moved triangles
//! always stay stitched to the static background.

use std::collections::BTreeSet;

use crate::landmarks::*;
use crate::vector::Vector2;
use crate::warp::WarpedFace;

pub const Z_FEATURE: f32 = 0.1;
pub const Z_CONTOUR: f32 = 0.3;
pub const Z_OUTLINE: f32 = 0.5;
pub const Z_BORDER: f32 = 0.9;

/// Per-vertex weights of the region mask, one class per channel.
///
/// red marks the nose-line fold, green the forehead and brows, blue the lower
/// eye rims.
pub type RegionWeight = [f32; 3];

/// Vertex data for the morph pass of one face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMesh {
    pub rest: Vec<[f32; 2]>,
    pub target: Vec<[f32; 2]>,
    pub z: Vec<f32>,
    pub region: Vec<RegionWeight>,
    pub indices: Vec<u32>,
}

impl FaceMesh {
    pub fn build(face: &WarpedFace, width: f32, height: f32) -> Self {
        let border = border_points(width, height);
        let rest: Vec<Vector2> = face
            .rest
            .points()
            .iter()
            .copied()
            .chain(border.iter().copied())
            .collect();
        let target: Vec<Vector2> = face
            .target
            .points()
            .iter()
            .copied()
            .chain(border.iter().copied())
            .collect();
        let face_len = face.rest.len();
        let z = (0..rest.len()).map(|idx| depth_of(idx, face_len)).collect();
        let region = (0..rest.len()).map(region_of).collect();
        let indices = triangulate(&rest)
            .into_iter()
            .flatten()
            .collect();
        Self {
            rest: rest.iter().map(|p| [p.x, p.y]).collect(),
            target: target.iter().map(|p| [p.x, p.y]).collect(),
            z,
            region,
            indices,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.rest.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Unique mesh edges as line-list endpoints in target space.
    pub fn wire_lines(&self) -> Vec<[f32; 2]> {
        let mut seen = BTreeSet::new();
        let mut lines = Vec::new();
        for tri in self.indices.chunks_exact(3) {
            for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                if seen.insert((a.min(b), a.max(b))) {
                    lines.push(self.target[a as usize]);
                    lines.push(self.target[b as usize]);
                }
            }
        }
        lines
    }
}

/// Triangle fans over the eyes (green) and the open mouth (red), in rest
/// space. Alpha fades from the fan center to the contour.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MaskMesh {
    pub positions: Vec<[f32; 2]>,
    pub colors: Vec<[f32; 4]>,
    pub indices: Vec<u32>,
}

const MASK_EDGE_ALPHA: f32 = 0.6;

impl MaskMesh {
    pub fn eye_teeth(face: &FaceLandmarks) -> Self {
        let mut mesh = Self::default();
        let inner_lip: Vec<usize> = INNER_LIP.collect();
        mesh.fan(face, &LEFT_EYE_RING, [0.0, 1.0, 0.0]);
        mesh.fan(face, &RIGHT_EYE_RING, [0.0, 1.0, 0.0]);
        mesh.fan(face, &inner_lip, [1.0, 0.0, 0.0]);
        mesh
    }

    fn fan(&mut self, face: &FaceLandmarks, ring: &[usize], rgb: [f32; 3]) {
        let base = self.positions.len() as u32;
        let center = face.centroid_of(ring);
        self.positions.push([center.x, center.y]);
        self.colors.push([rgb[0], rgb[1], rgb[2], 1.0]);
        for &idx in ring {
            let p = face[idx];
            self.positions.push([p.x, p.y]);
            self.colors.push([rgb[0], rgb[1], rgb[2], MASK_EDGE_ALPHA]);
        }
        let n = ring.len() as u32;
        for k in 0..n {
            self.indices
                .extend([base, base + 1 + k, base + 1 + (k + 1) % n]);
        }
    }
}

fn border_points(width: f32, height: f32) -> [Vector2; 8] {
    let (w, h) = (width, height);
    [
        Vector2::new(0.0, 0.0),
        Vector2::new(w * 0.5, 0.0),
        Vector2::new(w, 0.0),
        Vector2::new(w, h * 0.5),
        Vector2::new(w, h),
        Vector2::new(w * 0.5, h),
        Vector2::new(0.0, h),
        Vector2::new(0.0, h * 0.5),
    ]
}

fn depth_of(idx: usize, face_len: usize) -> f32 {
    if idx >= face_len {
        Z_BORDER
    } else if OUTLINE.contains(&idx) {
        Z_OUTLINE
    } else if idx <= JAW_LAST || FOREHEAD.contains(&idx) {
        Z_CONTOUR
    } else {
        Z_FEATURE
    }
}

fn region_of(idx: usize) -> RegionWeight {
    let nose_line = matches!(idx, 80..=83 | 47 | 51 | MOUTH_LEFT | MOUTH_RIGHT);
    let forehead = FOREHEAD.contains(&idx) || matches!(idx, 33..=42 | 64..=71);
    let eye_rim = LEFT_LOWER_LID.contains(&idx) || RIGHT_LOWER_LID.contains(&idx);
    [
        f32::from(u8::from(nose_line)),
        f32::from(u8::from(forehead)),
        f32::from(u8::from(eye_rim)),
    ]
}

#[derive(Clone, Copy)]
struct Circle {
    cx: f64,
    cy: f64,
    r2: f64,
}

#[derive(Clone, Copy)]
struct Tri {
    v: [usize; 3],
    circle: Circle,
}

fn circumcircle(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> Circle {
    let d = 2.0 * (a.0 * (b.1 - c.1) + b.0 * (c.1 - a.1) + c.0 * (a.1 - b.1));
    if d.abs() < 1e-12 {
        return Circle {
            cx: 0.0,
            cy: 0.0,
            r2: f64::INFINITY,
        };
    }
    let a2 = a.0 * a.0 + a.1 * a.1;
    let b2 = b.0 * b.0 + b.1 * b.1;
    let c2 = c.0 * c.0 + c.1 * c.1;
    let cx = (a2 * (b.1 - c.1) + b2 * (c.1 - a.1) + c2 * (a.1 - b.1)) / d;
    let cy = (a2 * (c.0 - b.0) + b2 * (a.0 - c.0) + c2 * (b.0 - a.0)) / d;
    let r2 = (a.0 - cx).powi(2) + (a.1 - cy).powi(2);
    Circle { cx, cy, r2 }
}

/// Bowyer-Watson Delaunay triangulation.
///
/// Points closer than a hundredth of a pixel to an earlier point are left
/// out of the mesh; their indices simply never appear in the output.
pub fn triangulate(points: &[Vector2]) -> Vec<[u32; 3]> {
    if points.len() < 3 {
        return Vec::new();
    }
    let mut verts: Vec<(f64, f64)> = points
        .iter()
        .map(|p| (f64::from(p.x), f64::from(p.y)))
        .collect();
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    for &(x, y) in &verts {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    let span = (max_x - min_x).max(max_y - min_y).max(1.0);
    let (mid_x, mid_y) = ((min_x + max_x) * 0.5, (min_y + max_y) * 0.5);
    let n = verts.len();
    verts.push((mid_x - 20.0 * span, mid_y - span));
    verts.push((mid_x, mid_y + 20.0 * span));
    verts.push((mid_x + 20.0 * span, mid_y - span));

    let make = |verts: &[(f64, f64)], v: [usize; 3]| Tri {
        v,
        circle: circumcircle(verts[v[0]], verts[v[1]], verts[v[2]]),
    };
    let mut tris = vec![make(&verts, [n, n + 1, n + 2])];
    let mut inserted: Vec<usize> = Vec::with_capacity(n);

    for i in 0..n {
        let (px, py) = verts[i];
        let duplicate = inserted.iter().any(|&j| {
            let (qx, qy) = verts[j];
            (qx - px).powi(2) + (qy - py).powi(2) < 1e-4
        });
        if duplicate {
            continue;
        }
        inserted.push(i);

        let mut edges: Vec<(usize, usize)> = Vec::new();
        tris.retain(|tri| {
            let c = tri.circle;
            let inside = (px - c.cx).powi(2) + (py - c.cy).powi(2) <= c.r2;
            if inside {
                edges.push((tri.v[0], tri.v[1]));
                edges.push((tri.v[1], tri.v[2]));
                edges.push((tri.v[2], tri.v[0]));
            }
            !inside
        });
        for (k, &(a, b)) in edges.iter().enumerate() {
            let shared = edges
                .iter()
                .enumerate()
                .any(|(j, &(c, d))| j != k && ((a == c && b == d) || (a == d && b == c)));
            if !shared {
                tris.push(make(&verts, [a, b, i]));
            }
        }
    }

    tris.into_iter()
        .filter(|tri| tri.v.iter().all(|&v| v < n))
        .map(|tri| [tri.v[0] as u32, tri.v[1] as u32, tri.v[2] as u32])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knobs::KnobSet;
    use crate::synthetic::frontal_face;
    use crate::warp::warp_face;

    fn area(points: &[Vector2], tri: &[u32; 3]) -> f32 {
        let a = points[tri[0] as usize];
        let b = points[tri[1] as usize];
        let c = points[tri[2] as usize];
        ((b - a).cross(c - a) * 0.5).abs()
    }

    #[test]
    fn square_with_center_gives_four_triangles() {
        let points = [
            Vector2::new(0.0, 0.0),
            Vector2::new(10.0, 0.0),
            Vector2::new(10.0, 10.0),
            Vector2::new(0.0, 10.0),
            Vector2::new(5.0, 5.0),
        ];
        let tris = triangulate(&points);
        assert_eq!(tris.len(), 4);
        let total: f32 = tris.iter().map(|t| area(&points, t)).sum();
        assert!((total - 100.0).abs() < 1e-3);
    }

    #[test]
    fn duplicate_points_are_skipped() {
        let points = [
            Vector2::new(0.0, 0.0),
            Vector2::new(10.0, 0.0),
            Vector2::new(0.0, 10.0),
            Vector2::new(10.0, 0.0),
        ];
        let tris = triangulate(&points);
        assert_eq!(tris.len(), 1);
        assert!(tris[0].iter().all(|&v| v != 3));
    }

    #[test]
    fn face_mesh_covers_frame() {
        let warped = warp_face(frontal_face(0.0), &KnobSet::default());
        let mesh = FaceMesh::build(&warped, 640.0, 480.0);
        assert_eq!(mesh.vertex_count(), EXTENDED_POINTS + 8);
        let rest: Vec<Vector2> = mesh.rest.iter().map(|p| Vector2::new(p[0], p[1])).collect();
        let total: f32 = mesh
            .indices
            .chunks_exact(3)
            .map(|t| area(&rest, &[t[0], t[1], t[2]]))
            .sum();
        // outline ring points may poke past the frame, so coverage is at least
        // the frame area
        assert!(total >= 640.0 * 480.0 - 1.0, "covered {total}");
        assert_eq!(mesh.z[EXTENDED_POINTS], Z_BORDER);
        assert_eq!(mesh.z[NOSE_TIP], Z_FEATURE);
        assert_eq!(mesh.region[FOREHEAD.start], [0.0, 1.0, 0.0]);
    }

    #[test]
    fn wire_lines_have_no_duplicate_edges() {
        let warped = warp_face(frontal_face(0.0), &KnobSet::default());
        let mesh = FaceMesh::build(&warped, 640.0, 480.0);
        let lines = mesh.wire_lines();
        assert_eq!(lines.len() % 2, 0);
        // Euler: E = V + F - 1 for a triangulated planar region
        // (the synthetic face repeats its pupil points, which are skipped)
        let used: BTreeSet<u32> = mesh.indices.iter().copied().collect();
        let edges = lines.len() / 2;
        assert_eq!(edges, used.len() + mesh.triangle_count() - 1);
    }

    #[test]
    fn eye_teeth_mask_has_three_fans() {
        let mask = MaskMesh::eye_teeth(&frontal_face(0.0));
        assert_eq!(mask.positions.len(), 9 + 9 + 9);
        assert_eq!(mask.indices.len(), 3 * (8 + 8 + 8));
        assert_eq!(mask.colors[0], [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(mask.colors[18], [1.0, 0.0, 0.0, 1.0]);
    }
}
