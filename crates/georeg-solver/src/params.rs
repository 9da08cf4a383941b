use serde::{Deserialize, Serialize};

/// Family of the global transform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalModel {
    #[default]
    Similarity,
    Affine,
}

impl GlobalModel {
    /// Correspondences in a minimal sample.
    pub fn min_points(self) -> usize {
        match self {
            GlobalModel::Similarity => 2,
            GlobalModel::Affine => 3,
        }
    }

    pub fn param_count(self) -> usize {
        match self {
            GlobalModel::Similarity => 4,
            GlobalModel::Affine => 6,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GlobalModel::Similarity => "similarity",
            GlobalModel::Affine => "affine",
        }
    }
}

/// Parameters for the seeded RANSAC stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Inlier distance threshold in reference pixels.
    pub inlier_threshold: f64,
    pub max_iterations: usize,
    pub seed: u64,
    /// Samples with two source points closer than this (pixels) are rejected.
    pub min_separation: f64,
    /// Affine samples with `area / longest_edge²` below this are rejected.
    pub min_triangle_ratio: f64,
    /// Least-squares refit on the winning inlier set.
    pub refit_inliers: bool,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            inlier_threshold: 3.0,
            max_iterations: 500,
            seed: 0x5eed_0f_9e0,
            min_separation: 1e-3,
            min_triangle_ratio: 1e-4,
            refit_inliers: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobustLoss {
    #[default]
    Huber,
    Tukey,
}

impl RobustLoss {
    /// IRLS weight for a residual magnitude `m` with scale `k`.
    pub fn weight(self, m: f64, k: f64) -> f64 {
        let k = k.max(f64::EPSILON);
        match self {
            RobustLoss::Huber => {
                if m <= k {
                    1.0
                } else {
                    k / m
                }
            }
            RobustLoss::Tukey => {
                if m >= k {
                    0.0
                } else {
                    let u = m / k;
                    let t = 1.0 - u * u;
                    t * t
                }
            }
        }
    }

    /// Loss value `ρ(m)`.
    pub fn rho(self, m: f64, k: f64) -> f64 {
        let k = k.max(f64::EPSILON);
        match self {
            RobustLoss::Huber => {
                if m <= k {
                    0.5 * m * m
                } else {
                    k * (m - 0.5 * k)
                }
            }
            RobustLoss::Tukey => {
                let c = k * k / 6.0;
                if m >= k {
                    c
                } else {
                    let u = m / k;
                    let t = 1.0 - u * u;
                    c * (1.0 - t * t * t)
                }
            }
        }
    }
}

/// Parameters for the IRLS / Gauss-Newton refiner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineParams {
    pub loss: RobustLoss,
    /// Residual magnitude (reference pixels) where the loss leaves the
    /// quadratic regime.
    pub loss_scale: f64,
    /// Stop once the parameter update norm falls below this.
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Tikhonov term added to the normal equations.
    pub ridge: f64,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            loss: RobustLoss::Huber,
            loss_scale: 2.0,
            tolerance: 1e-8,
            max_iterations: 50,
            ridge: 1e-9,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarpModel {
    #[default]
    Tps,
    Ffd,
}

/// Parameters for the local warp stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalWarpParams {
    pub model: WarpModel,
    /// Smoothing weight; `0` interpolates the residual field exactly (TPS).
    pub lambda: f64,
    /// Above this many control points a deterministic stride subsample is used.
    pub max_control_points: usize,
    /// Control points closer than this (reference pixels) are degenerate.
    pub min_control_separation: f64,
    /// Lattice spacing (source pixels) used to sample anchor regions.
    pub anchor_sample_spacing: f64,
    /// Largest local displacement (reference pixels) tolerated anywhere
    /// inside an anchor. TPS anchors are resampled more densely until the
    /// check lattice stays within it.
    pub anchor_tolerance: f64,
    /// Lattice spacing (source pixels) of the anchor check.
    pub anchor_check_spacing: f64,
    /// FFD grid spacing in reference pixels.
    pub ffd_spacing: f64,
    /// Upper bound on FFD grid nodes; the spacing grows to respect it.
    pub max_ffd_nodes: usize,
}

impl Default for LocalWarpParams {
    fn default() -> Self {
        Self {
            model: WarpModel::Tps,
            lambda: 0.0,
            max_control_points: 400,
            min_control_separation: 1e-3,
            anchor_sample_spacing: 16.0,
            anchor_tolerance: 0.05,
            anchor_check_spacing: 1.0,
            ffd_spacing: 64.0,
            max_ffd_nodes: 1600,
        }
    }
}

/// All solver tunables, as stored in a session config.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    pub ransac: RansacParams,
    pub refine: RefineParams,
    pub local_warp: LocalWarpParams,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huber_and_tukey_weights() {
        assert_eq!(RobustLoss::Huber.weight(1.0, 2.0), 1.0);
        assert_eq!(RobustLoss::Huber.weight(4.0, 2.0), 0.5);
        assert_eq!(RobustLoss::Tukey.weight(0.0, 2.0), 1.0);
        assert_eq!(RobustLoss::Tukey.weight(2.5, 2.0), 0.0);
        assert!((RobustLoss::Tukey.rho(5.0, 3.0) - 1.5).abs() < 1e-12);
        // Huber loss is continuous at the knee.
        let k = 2.0;
        assert!((RobustLoss::Huber.rho(k, k) - 0.5 * k * k).abs() < 1e-12);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let p: SolverParams =
            serde_json::from_str(r#"{"ransac": {"seed": 7}, "refine": {"loss": "tukey"}}"#)
                .expect("parse");
        assert_eq!(p.ransac.seed, 7);
        assert_eq!(p.ransac.max_iterations, RansacParams::default().max_iterations);
        assert_eq!(p.refine.loss, RobustLoss::Tukey);
        assert_eq!(p.local_warp, LocalWarpParams::default());
    }
}
