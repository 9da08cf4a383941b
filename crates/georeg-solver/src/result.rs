use std::fmt;

use georeg_core::{ConstraintId, Transform, TransformStack};
use serde::{Deserialize, Serialize};

/// Non-fatal conditions attached to a successful solve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SolveWarning {
    /// The refiner hit its iteration cap; the best model seen is returned.
    DidNotConverge { iterations: usize, cost: f64 },
    /// Source correspondences are nearly coincident; the fit is poorly
    /// constrained.
    LowSourceSpread { variance: f64 },
    /// Metric conversion fell back to an approximate scale.
    LowConfidenceScale { reason: String },
    ControlPointsSubsampled { kept: usize, total: usize },
}

impl fmt::Display for SolveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveWarning::DidNotConverge { iterations, cost } => write!(
                f,
                "refinement did not converge after {iterations} iterations (cost {cost:.6})"
            ),
            SolveWarning::LowSourceSpread { variance } => {
                write!(f, "source points are nearly coincident (variance {variance:.3e})")
            }
            SolveWarning::LowConfidenceScale { reason } => {
                write!(f, "metric scale is approximate: {reason}")
            }
            SolveWarning::ControlPointsSubsampled { kept, total } => {
                write!(f, "local warp used {kept} of {total} control points")
            }
        }
    }
}

/// Output of the seeded RANSAC stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RansacOutcome {
    pub model: Transform,
    /// Constraint ids owning at least one inlier correspondence, ascending.
    pub inlier_ids: Vec<ConstraintId>,
    pub inlier_count: usize,
    pub iterations: usize,
    pub degenerate_samples: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefineOutcome {
    pub model: Transform,
    pub iterations: usize,
    pub converged: bool,
    pub cost: f64,
}

/// Global solve: RANSAC seed followed by robust refinement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalSolution {
    pub stack: TransformStack,
    pub ransac: RansacOutcome,
    pub refine: RefineOutcome,
    pub warnings: Vec<SolveWarning>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalSolution {
    pub stack: TransformStack,
    pub control_points: usize,
    pub anchor_samples: usize,
    pub warnings: Vec<SolveWarning>,
}
