use nalgebra::{Matrix2, Matrix3, Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Rotation, uniform scale and translation.
///
/// `x' = s (cos θ x - sin θ y) + tx`, `y' = s (sin θ x + cos θ y) + ty`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Similarity {
    pub scale: f64,
    /// Rotation in radians.
    pub rotation: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for Similarity {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Similarity {
    pub const IDENTITY: Similarity = Similarity {
        scale: 1.0,
        rotation: 0.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Build from the linear parametrization `a = s cos θ`, `b = s sin θ`.
    pub fn from_linear(a: f64, b: f64, tx: f64, ty: f64) -> Self {
        Self {
            scale: a.hypot(b),
            rotation: b.atan2(a),
            tx,
            ty,
        }
    }

    /// `[a, b, tx, ty]` with `a = s cos θ`, `b = s sin θ`.
    pub fn linear_params(&self) -> [f64; 4] {
        let (sin, cos) = self.rotation.sin_cos();
        [self.scale * cos, self.scale * sin, self.tx, self.ty]
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let [a, b, tx, ty] = self.linear_params();
        Point2::new(a * p.x - b * p.y + tx, b * p.x + a * p.y + ty)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.to_affine().inverse().map(|inv| {
            Similarity::from_linear(inv.a, inv.c, inv.tx, inv.ty)
        })
    }

    pub fn to_affine(&self) -> Affine {
        let [a, b, tx, ty] = self.linear_params();
        Affine {
            a,
            b: -b,
            c: b,
            d: a,
            tx,
            ty,
        }
    }
}

/// General 2D affine map `x' = a x + b y + tx`, `y' = c x + d y + ty`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for Affine {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Affine {
    pub const IDENTITY: Affine = Affine {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// From `[a, b, c, d, tx, ty]`.
    pub fn from_params(p: [f64; 6]) -> Self {
        Self {
            a: p[0],
            b: p[1],
            c: p[2],
            d: p[3],
            tx: p[4],
            ty: p[5],
        }
    }

    pub fn params(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.d, self.tx, self.ty]
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new(
            self.a * p.x + self.b * p.y + self.tx,
            self.c * p.x + self.d * p.y + self.ty,
        )
    }

    pub fn linear(&self) -> Matrix2<f64> {
        Matrix2::new(self.a, self.b, self.c, self.d)
    }

    pub fn translation(&self) -> Vector2<f64> {
        Vector2::new(self.tx, self.ty)
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.a, self.b, self.tx, //
            self.c, self.d, self.ty, //
            0.0, 0.0, 1.0,
        )
    }

    pub fn from_matrix(m: &Matrix3<f64>) -> Self {
        Self {
            a: m[(0, 0)],
            b: m[(0, 1)],
            c: m[(1, 0)],
            d: m[(1, 1)],
            tx: m[(0, 2)],
            ty: m[(1, 2)],
        }
    }

    /// `None` when the linear part is (numerically) singular.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        let norm = self.a.abs() + self.b.abs() + self.c.abs() + self.d.abs();
        if !det.is_finite() || det.abs() <= 1e-14 * norm * norm.max(1.0) {
            return None;
        }
        let inv = 1.0 / det;
        let (a, b, c, d) = (self.d * inv, -self.b * inv, -self.c * inv, self.a * inv);
        Some(Self {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + b * self.ty),
            ty: -(c * self.tx + d * self.ty),
        })
    }

    /// `self` followed by `next`: `next(self(p))`.
    pub fn then(&self, next: &Affine) -> Affine {
        Affine::from_matrix(&(next.matrix() * self.matrix()))
    }
}
