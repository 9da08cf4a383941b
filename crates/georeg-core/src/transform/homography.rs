use nalgebra::{Matrix2, Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

/// Projective map normalized so that `h[(2, 2)] == 1`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    /// Normalizes `h` by its last entry; `None` when that entry vanishes.
    pub fn new(h: Matrix3<f64>) -> Option<Self> {
        let s = h[(2, 2)];
        if s.abs() < 1e-12 || !s.is_finite() {
            return None;
        }
        Some(Self { h: h / s })
    }

    pub fn from_array(rows: [[f64; 3]; 3]) -> Option<Self> {
        Self::new(Matrix3::from_row_slice(&[
            rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2], rows[2][0],
            rows[2][1], rows[2][2],
        ]))
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        [
            [self.h[(0, 0)], self.h[(0, 1)], self.h[(0, 2)]],
            [self.h[(1, 0)], self.h[(1, 1)], self.h[(1, 2)]],
            [self.h[(2, 0)], self.h[(2, 1)], self.h[(2, 2)]],
        ]
    }

    /// Returns non-finite coordinates on the line at infinity.
    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v[0] / v[2], v[1] / v[2])
    }

    pub fn jacobian(&self, p: Point2<f64>) -> Matrix2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        let w = v[2];
        let (x, y) = (v[0] / w, v[1] / w);
        let h = &self.h;
        Matrix2::new(
            (h[(0, 0)] - x * h[(2, 0)]) / w,
            (h[(0, 1)] - x * h[(2, 1)]) / w,
            (h[(1, 0)] - y * h[(2, 0)]) / w,
            (h[(1, 1)] - y * h[(2, 1)]) / w,
        )
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().and_then(Self::new)
    }
}
