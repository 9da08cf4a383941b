//! Transform variants and their ordered composition.

mod homography;
mod linear;
mod spline;
mod stack;

pub use homography::Homography;
pub use linear::{Affine, Similarity};
pub use spline::{tps_kernel, FreeFormDeformation, ThinPlateSpline};
pub use stack::TransformStack;

use nalgebra::{Matrix2, Point2};
use serde::{Deserialize, Serialize};

use crate::error::TransformError;

/// Iteration cap for the Newton inverse of spline stages.
pub const INVERSE_MAX_ITERATIONS: usize = 50;

const INVERSE_TOLERANCE: f64 = 1e-9;

/// One stage of a [`TransformStack`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transform {
    Identity,
    Similarity(Similarity),
    Affine(Affine),
    Homography(Homography),
    ThinPlateSpline(ThinPlateSpline),
    FreeFormDeformation(FreeFormDeformation),
}

impl Transform {
    pub fn label(&self) -> &'static str {
        match self {
            Transform::Identity => "identity",
            Transform::Similarity(_) => "similarity",
            Transform::Affine(_) => "affine",
            Transform::Homography(_) => "homography",
            Transform::ThinPlateSpline(_) => "thin_plate_spline",
            Transform::FreeFormDeformation(_) => "free_form_deformation",
        }
    }

    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        match self {
            Transform::Identity => p,
            Transform::Similarity(s) => s.apply(p),
            Transform::Affine(a) => a.apply(p),
            Transform::Homography(h) => h.apply(p),
            Transform::ThinPlateSpline(t) => t.apply(p),
            Transform::FreeFormDeformation(f) => f.apply(p),
        }
    }

    pub fn jacobian(&self, p: Point2<f64>) -> Matrix2<f64> {
        match self {
            Transform::Identity => Matrix2::identity(),
            Transform::Similarity(s) => s.to_affine().linear(),
            Transform::Affine(a) => a.linear(),
            Transform::Homography(h) => h.jacobian(p),
            Transform::ThinPlateSpline(t) => t.jacobian(p),
            Transform::FreeFormDeformation(f) => f.jacobian(p),
        }
    }

    /// Affine equivalent for identity, similarity and affine stages.
    pub fn as_affine(&self) -> Option<Affine> {
        match self {
            Transform::Identity => Some(Affine::IDENTITY),
            Transform::Similarity(s) => Some(s.to_affine()),
            Transform::Affine(a) => Some(*a),
            Transform::Homography(_)
            | Transform::ThinPlateSpline(_)
            | Transform::FreeFormDeformation(_) => None,
        }
    }

    pub fn is_nonlinear(&self) -> bool {
        self.as_affine().is_none()
    }

    /// Invert this stage at `q`. `stage` is only used for error reporting.
    pub fn invert(&self, q: Point2<f64>, stage: usize) -> Result<Point2<f64>, TransformError> {
        let kind = self.label();
        match self {
            Transform::Identity => Ok(q),
            Transform::Similarity(_) | Transform::Affine(_) => self
                .as_affine()
                .and_then(|a| a.inverse())
                .map(|inv| inv.apply(q))
                .ok_or(TransformError::NotInvertible { stage, kind }),
            Transform::Homography(h) => {
                let p = h
                    .inverse()
                    .map(|inv| inv.apply(q))
                    .ok_or(TransformError::NotInvertible { stage, kind })?;
                if p.x.is_finite() && p.y.is_finite() {
                    Ok(p)
                } else {
                    Err(TransformError::NotInvertible { stage, kind })
                }
            }
            Transform::ThinPlateSpline(_) | Transform::FreeFormDeformation(_) => {
                self.newton_inverse(q, stage)
            }
        }
    }

    /// Solve `apply(p) = q` starting from `p = q`.
    fn newton_inverse(&self, q: Point2<f64>, stage: usize) -> Result<Point2<f64>, TransformError> {
        let tol = INVERSE_TOLERANCE * (1.0 + q.coords.norm());
        let mut p = q;
        for _ in 0..INVERSE_MAX_ITERATIONS {
            let r = self.apply(p) - q;
            if r.norm() <= tol {
                return Ok(p);
            }
            let step = match self.jacobian(p).try_inverse() {
                Some(j_inv) => j_inv * r,
                // Fixed-point step when the local Jacobian is singular.
                None => r,
            };
            p -= step;
            if !(p.x.is_finite() && p.y.is_finite()) {
                break;
            }
        }
        let r = self.apply(p) - q;
        if p.x.is_finite() && p.y.is_finite() && r.norm() <= tol {
            return Ok(p);
        }
        Err(TransformError::InverseDidNotConverge {
            stage,
            kind: self.label(),
            iterations: INVERSE_MAX_ITERATIONS,
        })
    }
}

impl From<Similarity> for Transform {
    fn from(s: Similarity) -> Self {
        Transform::Similarity(s)
    }
}

impl From<Affine> for Transform {
    fn from(a: Affine) -> Self {
        Transform::Affine(a)
    }
}

impl From<ThinPlateSpline> for Transform {
    fn from(t: ThinPlateSpline) -> Self {
        Transform::ThinPlateSpline(t)
    }
}

impl From<FreeFormDeformation> for Transform {
    fn from(f: FreeFormDeformation) -> Self {
        Transform::FreeFormDeformation(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;

    #[test]
    fn newton_inverts_small_ffd() {
        let mut ffd = FreeFormDeformation::zeros(Point2::new(0.0, 0.0), 20.0, 4, 4);
        for (k, d) in ffd.displacements.iter_mut().enumerate() {
            *d = Vector2::new(0.3 * (k % 3) as f64, -0.2 * (k % 2) as f64);
        }
        let t = Transform::FreeFormDeformation(ffd);
        let p = Point2::new(23.0, 31.0);
        let q = t.apply(p);
        let back = t.invert(q, 1).expect("converges");
        assert!((back - p).norm() < 1e-6);
    }

    #[test]
    fn folding_spline_reports_non_convergence() {
        // Strong affine part flips orientation along x, which folds p + d(p).
        let tps = ThinPlateSpline {
            control_points: vec![],
            weights: vec![],
            affine: [[0.0, -1.0, 0.0], [0.0, 0.0, 0.0]],
            lambda: 0.0,
        };
        let t = Transform::ThinPlateSpline(tps);
        let err = t.invert(Point2::new(5.0, 1.0), 2).unwrap_err();
        assert!(matches!(
            err,
            TransformError::InverseDidNotConverge { stage: 2, .. }
        ));
    }

    #[test]
    fn serializes_with_type_tag() {
        let t = Transform::Similarity(Similarity::IDENTITY);
        let json = serde_json::to_value(&t).expect("serialize");
        assert_eq!(json["type"], "similarity");
        let back: Transform = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, t);
    }
}
