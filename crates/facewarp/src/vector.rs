use std::ops::{Add, Mul, Sub};

/// Point or direction in frame pixel space (x right, y down).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Unit vector in the same direction; the zero vector stays zero.
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len == 0.0 {
            return Self::ZERO;
        }
        Self::new(self.x / len, self.y / len)
    }

    pub fn dis_pow2(self, other: Self) -> f32 {
        (self - other).length_squared()
    }

    pub fn dis(self, other: Self) -> f32 {
        self.dis_pow2(other).sqrt()
    }

    pub fn lerp(self, to: Self, alpha: f32) -> Self {
        Self::new(
            self.x + (to.x - self.x) * alpha,
            self.y + (to.y - self.y) * alpha,
        )
    }

    pub fn scale_by_axis(self, x: f32, y: f32) -> Self {
        Self::new(self.x * x, self.y * y)
    }

    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    pub fn cross(self, other: Self) -> f32 {
        self.x * other.y - other.x * self.y
    }

    /// Unsigned angle between two directions, in `[0, PI]`.
    pub fn angle(self, other: Self) -> f32 {
        self.normalize()
            .dot(other.normalize())
            .clamp(-1.0, 1.0)
            .acos()
    }

    /// Signed angle that rotates `self` onto `other`.
    pub fn from_to_angle(self, other: Self) -> f32 {
        if self.cross(other) < 0.0 {
            -self.angle(other)
        } else {
            self.angle(other)
        }
    }

    /// Intersection of line `a1-a2` with line `b1-b2`, `None` when parallel.
    pub fn intersect(a1: Self, a2: Self, b1: Self, b2: Self) -> Option<Self> {
        let c2x = b1.x - b2.x;
        let c3x = a1.x - a2.x;
        let c2y = b1.y - b2.y;
        let c3y = a1.y - a2.y;
        let d = c3x * c2y - c3y * c2x;
        if d == 0.0 {
            return None;
        }
        let u1 = a1.x * a2.y - a1.y * a2.x;
        let u4 = b1.x * b2.y - b1.y * b2.x;
        Some(Self::new(
            (u1 * c2x - c3x * u4) / d,
            (u1 * c2y - c3y * u4) / d,
        ))
    }

    /// Area centroid of the polygon described by `points`.
    ///
    /// One point returns itself and two points return their midpoint. A
    /// polygon with zero signed area collapses to the origin.
    pub fn centroid(points: &[Self]) -> Self {
        match points {
            [] => Self::ZERO,
            [p] => *p,
            [a, b] => Self::new((a.x + b.x) * 0.5, (a.y + b.y) * 0.5),
            _ => {
                let mut area = 0.0;
                let mut cx = 0.0;
                let mut cy = 0.0;
                let mut prev = points[points.len() - 1];
                for &cur in points {
                    let a = prev.x * cur.y - cur.x * prev.y;
                    area += a;
                    cx += (cur.x + prev.x) * a;
                    cy += (cur.y + prev.y) * a;
                    prev = cur;
                }
                if area == 0.0 {
                    return Self::ZERO;
                }
                Self::new(cx / (3.0 * area), cy / (3.0 * area))
            }
        }
    }
}

impl Add for Vector2 {
    type Output = Vector2;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vector2 {
    type Output = Vector2;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vector2 {
    type Output = Vector2;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

/// Row-major homogeneous 2D transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix3x3 {
    m: [[f32; 3]; 3],
}

impl Matrix3x3 {
    pub const fn new(m: [[f32; 3]; 3]) -> Self {
        Self { m }
    }

    pub const fn identity() -> Self {
        Self::new([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    /// Rotation by `angle` radians about `(refx, refy)`.
    pub fn rotate(angle: f32, refx: f32, refy: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new([
            [cos, -sin, refx * (1.0 - cos) + refy * sin],
            [sin, cos, refy * (1.0 - cos) - refx * sin],
            [0.0, 0.0, 1.0],
        ])
    }

    pub fn transpose(&self) -> Self {
        let m = &self.m;
        Self::new([
            [m[0][0], m[1][0], m[2][0]],
            [m[0][1], m[1][1], m[2][1]],
            [m[0][2], m[1][2], m[2][2]],
        ])
    }

    pub fn multiply_point(&self, p: Vector2) -> Vector2 {
        let m = &self.m;
        let x = p.x * m[0][0] + p.y * m[0][1] + m[0][2];
        let y = p.x * m[1][0] + p.y * m[1][1] + m[1][2];
        let z = p.x * m[2][0] + p.y * m[2][1] + m[2][2];
        Vector2::new(x / z, y / z)
    }

    /// Transforms a direction, ignoring translation.
    pub fn multiply_vector(&self, v: Vector2) -> Vector2 {
        let m = &self.m;
        Vector2::new(
            v.x * m[0][0] + v.y * m[0][1],
            v.x * m[1][0] + v.y * m[1][1],
        )
    }

    pub fn rows(&self) -> [[f32; 3]; 3] {
        self.m
    }
}

impl Default for Matrix3x3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn approx(a: Vector2, b: Vector2) -> bool {
        (a.x - b.x).abs() < 1e-4 && (a.y - b.y).abs() < 1e-4
    }

    #[test]
    fn intersect_crossing_lines() {
        let p = Vector2::intersect(
            Vector2::new(0.0, 0.0),
            Vector2::new(2.0, 2.0),
            Vector2::new(0.0, 2.0),
            Vector2::new(2.0, 0.0),
        )
        .expect("lines cross");
        assert!(approx(p, Vector2::new(1.0, 1.0)));
    }

    #[test]
    fn intersect_parallel_lines_is_none() {
        let p = Vector2::intersect(
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 0.0),
            Vector2::new(0.0, 1.0),
            Vector2::new(1.0, 1.0),
        );
        assert!(p.is_none());
    }

    #[test]
    fn centroid_special_cases() {
        assert_eq!(Vector2::centroid(&[]), Vector2::ZERO);
        let a = Vector2::new(3.0, 4.0);
        assert_eq!(Vector2::centroid(&[a]), a);
        let mid = Vector2::centroid(&[a, Vector2::new(5.0, 8.0)]);
        assert!(approx(mid, Vector2::new(4.0, 6.0)));
    }

    #[test]
    fn centroid_of_square() {
        let square = [
            Vector2::new(0.0, 0.0),
            Vector2::new(4.0, 0.0),
            Vector2::new(4.0, 4.0),
            Vector2::new(0.0, 4.0),
        ];
        assert!(approx(Vector2::centroid(&square), Vector2::new(2.0, 2.0)));
    }

    #[test]
    fn rotate_about_reference_point() {
        let m = Matrix3x3::rotate(FRAC_PI_2, 1.0, 1.0);
        let p = m.multiply_point(Vector2::new(2.0, 1.0));
        assert!(approx(p, Vector2::new(1.0, 2.0)));
        // reference point is fixed
        assert!(approx(m.multiply_point(Vector2::new(1.0, 1.0)), Vector2::new(1.0, 1.0)));
    }

    #[test]
    fn multiply_vector_ignores_translation() {
        let m = Matrix3x3::rotate(FRAC_PI_2, 50.0, -20.0);
        let v = m.multiply_vector(Vector2::new(1.0, 0.0));
        assert!(approx(v, Vector2::new(0.0, 1.0)));
        assert_eq!(m.transpose().transpose(), m);
    }

    #[test]
    fn signed_angle() {
        let x = Vector2::new(1.0, 0.0);
        let y = Vector2::new(0.0, 1.0);
        assert!((x.from_to_angle(y) - FRAC_PI_2).abs() < 1e-5);
        assert!((y.from_to_angle(x) + FRAC_PI_2).abs() < 1e-5);
        assert_eq!(Vector2::ZERO.normalize(), Vector2::ZERO);
    }
}
