//! Registration solvers for georeg.
//!
//! The pipeline reduces constraints to point correspondences, seeds a global
//! similarity or affine with seeded RANSAC, refines it against every
//! constraint with robust Gauss-Newton, and can then layer a smooth local
//! warp (thin-plate spline or free-form grid) on top.
//!
//! ```no_run
//! use georeg_core::{Constraint, ConstraintKind};
//! use georeg_solver::{solve_global, GlobalModel, SolverParams};
//! use nalgebra::Point2;
//!
//! let constraints = vec![
//!     Constraint { id: 1, kind: ConstraintKind::point_pair(Point2::new(0.0, 0.0), Point2::new(5.0, 5.0)) },
//!     Constraint { id: 2, kind: ConstraintKind::point_pair(Point2::new(10.0, 0.0), Point2::new(15.0, 5.0)) },
//! ];
//! let solution = solve_global(&constraints, GlobalModel::Similarity, &SolverParams::default())?;
//! println!("{:?}", solution.stack);
//! # Ok::<(), georeg_solver::SolveError>(())
//! ```

mod error;
mod fit;
pub mod local_warp;
mod metrics;
mod observations;
mod params;
pub mod ransac;
pub mod refine;
mod result;

use georeg_core::{Constraint, Transform, TransformStack};

#[cfg(feature = "tracing")]
use tracing::instrument;

pub use error::SolveError;
pub use fit::{fit_affine, fit_model, fit_similarity};
pub use local_warp::{control_points, solve_local_warp, ControlPoint};
pub use metrics::{compute_metrics, constraint_residual, p90, rmse, ErrorUnit, QualityMetrics};
pub use observations::{excluded_ids, point_correspondences, source_variance, Correspondence};
pub use params::{
    GlobalModel, LocalWarpParams, RansacParams, RefineParams, RobustLoss, SolverParams, WarpModel,
};
pub use result::{GlobalSolution, LocalSolution, RansacOutcome, RefineOutcome, SolveWarning};

/// Source spread below which a fit is flagged as poorly constrained.
const LOW_SOURCE_VARIANCE: f64 = 1e-6;

/// RANSAC followed by robust refinement. The stack holds the single global
/// stage.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(constraints, params), fields(constraints = constraints.len(), model = model.label()))
)]
pub fn solve_global(
    constraints: &[Constraint],
    model: GlobalModel,
    params: &SolverParams,
) -> Result<GlobalSolution, SolveError> {
    let corrs = point_correspondences(constraints);
    let mut warnings = Vec::new();

    let variance = source_variance(&corrs);
    if corrs.len() >= model.min_points() && variance < LOW_SOURCE_VARIANCE {
        log::warn!("solve_global: source variance {variance:.3e} is very low");
        warnings.push(SolveWarning::LowSourceSpread { variance });
    }

    let ransac = ransac::estimate(&corrs, model, &params.ransac)?;
    let refine = refine::refine(&ransac.model, model, constraints, &params.refine)?;
    if !refine.converged {
        warnings.push(SolveWarning::DidNotConverge {
            iterations: refine.iterations,
            cost: refine.cost,
        });
    }
    log::info!(
        "solve_global[{}]: {} correspondences, {} inliers, {} refine iterations",
        model.label(),
        corrs.len(),
        ransac.inlier_count,
        refine.iterations
    );
    Ok(GlobalSolution {
        stack: TransformStack::single(refine.model.clone()),
        ransac,
        refine,
        warnings,
    })
}

/// Local warp on top of an already solved global stage.
pub fn solve_local(
    global: &Transform,
    constraints: &[Constraint],
    params: &LocalWarpParams,
) -> Result<LocalSolution, SolveError> {
    if global.is_nonlinear() {
        return Err(SolveError::NoGlobalTransform);
    }
    solve_local_warp(global, constraints, params)
}
