//! Smooth displacement fields layered on top of a global transform.
//!
//! Both variants map `p -> p + d(p)`.

use nalgebra::{Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Thin-plate radial basis `U(r) = r² ln r`, evaluated from `r²`.
#[inline]
pub fn tps_kernel(r2: f64) -> f64 {
    if r2 <= 1e-20 {
        0.0
    } else {
        0.5 * r2 * r2.ln()
    }
}

/// Gradient of `U(|p - c|)` with respect to `p`.
#[inline]
fn tps_kernel_gradient(delta: Vector2<f64>) -> Vector2<f64> {
    let r2 = delta.norm_squared();
    if r2 <= 1e-20 {
        Vector2::zeros()
    } else {
        delta * (r2.ln() + 1.0)
    }
}

/// Thin-plate spline displacement field.
///
/// `d(p) = A [1, x, y]ᵀ + Σ wᵢ U(|p - cᵢ|)` where `A` is `affine` (one row per
/// output axis).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThinPlateSpline {
    pub control_points: Vec<Point2<f64>>,
    pub weights: Vec<Vector2<f64>>,
    pub affine: [[f64; 3]; 2],
    /// Regularization used when the spline was fitted.
    pub lambda: f64,
}

impl ThinPlateSpline {
    pub fn displacement(&self, p: Point2<f64>) -> Vector2<f64> {
        let [ax, ay] = &self.affine;
        let mut d = Vector2::new(
            ax[0] + ax[1] * p.x + ax[2] * p.y,
            ay[0] + ay[1] * p.x + ay[2] * p.y,
        );
        for (c, w) in self.control_points.iter().zip(&self.weights) {
            d += w * tps_kernel((p - c).norm_squared());
        }
        d
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        p + self.displacement(p)
    }

    /// Jacobian of `apply` at `p`.
    pub fn jacobian(&self, p: Point2<f64>) -> Matrix2<f64> {
        let [ax, ay] = &self.affine;
        let mut j = Matrix2::new(1.0 + ax[1], ax[2], ay[1], 1.0 + ay[2]);
        for (c, w) in self.control_points.iter().zip(&self.weights) {
            let g = tps_kernel_gradient(p - c);
            j += w * g.transpose();
        }
        j
    }
}

/// Bilinear displacement grid. Node `(i, j)` sits at
/// `origin + (i, j) * spacing` and is stored at `j * cols + i`. The field is
/// zero outside the grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FreeFormDeformation {
    pub origin: Point2<f64>,
    pub spacing: f64,
    pub cols: usize,
    pub rows: usize,
    pub displacements: Vec<Vector2<f64>>,
}

impl FreeFormDeformation {
    pub fn zeros(origin: Point2<f64>, spacing: f64, cols: usize, rows: usize) -> Self {
        Self {
            origin,
            spacing,
            cols,
            rows,
            displacements: vec![Vector2::zeros(); cols * rows],
        }
    }

    #[inline]
    pub fn node_index(&self, i: usize, j: usize) -> usize {
        j * self.cols + i
    }

    pub fn node_position(&self, i: usize, j: usize) -> Point2<f64> {
        Point2::new(
            self.origin.x + i as f64 * self.spacing,
            self.origin.y + j as f64 * self.spacing,
        )
    }

    /// Cell containing `p` and the local coordinates within it.
    fn locate(&self, p: Point2<f64>) -> Option<(usize, usize, f64, f64)> {
        if self.cols < 2 || self.rows < 2 || self.spacing <= 0.0 {
            return None;
        }
        let gx = (p.x - self.origin.x) / self.spacing;
        let gy = (p.y - self.origin.y) / self.spacing;
        let max_x = (self.cols - 1) as f64;
        let max_y = (self.rows - 1) as f64;
        if !(0.0..=max_x).contains(&gx) || !(0.0..=max_y).contains(&gy) {
            return None;
        }
        let i0 = (gx.floor() as usize).min(self.cols - 2);
        let j0 = (gy.floor() as usize).min(self.rows - 2);
        Some((i0, j0, gx - i0 as f64, gy - j0 as f64))
    }

    /// Node indices and bilinear weights for `p`; `None` outside the grid.
    pub fn bilinear_weights(&self, p: Point2<f64>) -> Option<[(usize, f64); 4]> {
        let (i0, j0, tx, ty) = self.locate(p)?;
        Some([
            (self.node_index(i0, j0), (1.0 - tx) * (1.0 - ty)),
            (self.node_index(i0 + 1, j0), tx * (1.0 - ty)),
            (self.node_index(i0, j0 + 1), (1.0 - tx) * ty),
            (self.node_index(i0 + 1, j0 + 1), tx * ty),
        ])
    }

    pub fn displacement(&self, p: Point2<f64>) -> Vector2<f64> {
        match self.bilinear_weights(p) {
            Some(ws) => ws
                .iter()
                .filter_map(|(idx, w)| self.displacements.get(*idx).map(|d| d * *w))
                .sum(),
            None => Vector2::zeros(),
        }
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        p + self.displacement(p)
    }

    pub fn jacobian(&self, p: Point2<f64>) -> Matrix2<f64> {
        let Some((i0, j0, tx, ty)) = self.locate(p) else {
            return Matrix2::identity();
        };
        let node = |i, j| {
            self.displacements
                .get(self.node_index(i, j))
                .copied()
                .unwrap_or_else(Vector2::zeros)
        };
        let (d00, d10, d01, d11) = (
            node(i0, j0),
            node(i0 + 1, j0),
            node(i0, j0 + 1),
            node(i0 + 1, j0 + 1),
        );
        let ddx = ((d10 - d00) * (1.0 - ty) + (d11 - d01) * ty) / self.spacing;
        let ddy = ((d01 - d00) * (1.0 - tx) + (d11 - d10) * tx) / self.spacing;
        Matrix2::new(1.0 + ddx.x, ddy.x, ddx.y, 1.0 + ddy.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_vanishes_at_zero_and_unit_radius() {
        assert_eq!(tps_kernel(0.0), 0.0);
        assert!(tps_kernel(1.0).abs() < 1e-15);
        let r: f64 = 3.0;
        assert!((tps_kernel(r * r) - r * r * r.ln()).abs() < 1e-12);
    }

    #[test]
    fn tps_jacobian_matches_finite_difference() {
        let tps = ThinPlateSpline {
            control_points: vec![
                Point2::new(0.0, 0.0),
                Point2::new(10.0, 0.0),
                Point2::new(5.0, 8.0),
            ],
            weights: vec![
                Vector2::new(0.01, -0.02),
                Vector2::new(-0.015, 0.005),
                Vector2::new(0.005, 0.015),
            ],
            affine: [[0.5, 0.01, 0.0], [-0.2, 0.0, 0.02]],
            lambda: 0.0,
        };
        let p = Point2::new(4.0, 3.0);
        let j = tps.jacobian(p);
        let eps = 1e-6;
        let fx = (tps.apply(Point2::new(p.x + eps, p.y)) - tps.apply(Point2::new(p.x - eps, p.y)))
            / (2.0 * eps);
        let fy = (tps.apply(Point2::new(p.x, p.y + eps)) - tps.apply(Point2::new(p.x, p.y - eps)))
            / (2.0 * eps);
        assert!((j[(0, 0)] - fx.x).abs() < 1e-6);
        assert!((j[(1, 0)] - fx.y).abs() < 1e-6);
        assert!((j[(0, 1)] - fy.x).abs() < 1e-6);
        assert!((j[(1, 1)] - fy.y).abs() < 1e-6);
    }

    #[test]
    fn ffd_is_bilinear_inside_and_zero_outside() {
        let mut ffd = FreeFormDeformation::zeros(Point2::new(0.0, 0.0), 10.0, 3, 3);
        let idx = ffd.node_index(1, 1);
        ffd.displacements[idx] = Vector2::new(2.0, -4.0);

        let center = ffd.displacement(Point2::new(10.0, 10.0));
        assert!((center - Vector2::new(2.0, -4.0)).norm() < 1e-12);
        let half = ffd.displacement(Point2::new(5.0, 10.0));
        assert!((half - Vector2::new(1.0, -2.0)).norm() < 1e-12);
        assert_eq!(ffd.displacement(Point2::new(-1.0, 5.0)), Vector2::zeros());
        assert_eq!(ffd.displacement(Point2::new(25.0, 21.0)), Vector2::zeros());
    }
}
