//! Smooth local deformation layered on top of the global model.
//!
//! The warp acts in reference space: it receives `G(src)` and moves it
//! towards the user's target. Control points carry the residual
//! `target - G(src)`; anchor regions pin the displacement to zero.

mod ffd;
mod tps;

use georeg_core::{
    closest_point_on_polyline, Constraint, ConstraintId, ConstraintKind, Region, Transform,
    TransformStack,
};
use nalgebra::{Point2, Vector2};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::error::SolveError;
use crate::observations::{anchors, by_id, change_masks, is_masked};
use crate::params::{LocalWarpParams, WarpModel};
use crate::result::{LocalSolution, SolveWarning};

pub use ffd::fit_ffd;
pub use tps::fit_tps;

/// One residual sample of the local field, in reference space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControlPoint {
    pub id: ConstraintId,
    pub source: Point2<f64>,
    /// `G(source)`.
    pub position: Point2<f64>,
    pub displacement: Vector2<f64>,
}

/// Residual controls for `global`, in ascending id order, without those
/// inside an anchor or a change mask.
pub fn control_points(global: &Transform, constraints: &[Constraint]) -> Vec<ControlPoint> {
    let masks = change_masks(constraints);
    let anchor_regions = anchors(constraints);
    let mut out = Vec::new();
    for c in by_id(constraints) {
        if !c.kind.is_geometric() || is_masked(&c.kind, &masks) {
            continue;
        }
        let mut push = |source: Point2<f64>, target: Point2<f64>| {
            let position = global.apply(source);
            out.push(ControlPoint {
                id: c.id,
                source,
                position,
                displacement: target - position,
            });
        };
        match &c.kind {
            ConstraintKind::PointPair { src, dst, .. } => push(*src, *dst),
            ConstraintKind::Directional { src, point, .. } => push(*src, *point),
            ConstraintKind::Line {
                src_points,
                dst_points,
                ..
            } => {
                for v in src_points {
                    if let Some(hit) =
                        closest_point_on_polyline(dst_points, false, global.apply(*v))
                    {
                        push(*v, hit.point);
                    }
                }
            }
            ConstraintKind::Area {
                src_polygon,
                dst_polygon,
                ..
            } => {
                for v in src_polygon {
                    if let Some(hit) =
                        closest_point_on_polyline(dst_polygon, true, global.apply(*v))
                    {
                        push(*v, hit.point);
                    }
                }
            }
            ConstraintKind::Relational { .. }
            | ConstraintKind::Anchor { .. }
            | ConstraintKind::ChangeMask { .. } => {}
        }
    }
    let before = out.len();
    out.retain(|cp| !anchor_regions.iter().any(|r| r.contains(cp.source)));
    if out.len() < before {
        log::debug!(
            "local warp: dropped {} control points inside anchors",
            before - out.len()
        );
    }
    out
}

/// Keep every `ceil(n / max)`-th control. `None` when no subsampling was needed.
pub(crate) fn stride_subsample(controls: &mut Vec<ControlPoint>, max: usize) -> Option<SolveWarning> {
    let total = controls.len();
    if max == 0 || total <= max {
        return None;
    }
    let stride = total.div_ceil(max);
    let kept: Vec<ControlPoint> = controls.iter().copied().step_by(stride).collect();
    *controls = kept;
    log::warn!(
        "local warp: subsampled {total} control points to {} (stride {stride})",
        controls.len()
    );
    Some(SolveWarning::ControlPointsSubsampled {
        kept: controls.len(),
        total,
    })
}

/// Anchor samples in source space: boundary plus interior lattice.
pub(crate) fn anchor_samples(regions: &[&Region], spacing: f64) -> Vec<Point2<f64>> {
    regions
        .iter()
        .flat_map(|r| r.sample_points(spacing))
        .collect()
}

/// Fit the configured warp for `global` and return `[global, warp]`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(global, constraints, params), fields(constraints = constraints.len(), model = ?params.model))
)]
pub fn solve_local_warp(
    global: &Transform,
    constraints: &[Constraint],
    params: &LocalWarpParams,
) -> Result<LocalSolution, SolveError> {
    let mut controls = control_points(global, constraints);
    let mut warnings = Vec::new();
    if let Some(w) = stride_subsample(&mut controls, params.max_control_points) {
        warnings.push(w);
    }
    let anchor_regions = anchors(constraints);

    let (warp, anchor_count) = match params.model {
        WarpModel::Tps => {
            let (tps, anchors_used) = fit_tps(global, &controls, &anchor_regions, params)?;
            (Transform::ThinPlateSpline(tps), anchors_used)
        }
        WarpModel::Ffd => {
            let (ffd, fixed) = fit_ffd(global, &controls, &anchor_regions, params)?;
            (Transform::FreeFormDeformation(ffd), fixed)
        }
    };

    log::debug!(
        "local warp ({:?}): {} controls, {} anchor constraints",
        params.model,
        controls.len(),
        anchor_count
    );
    Ok(LocalSolution {
        stack: TransformStack::new(vec![global.clone(), warp]),
        control_points: controls.len(),
        anchor_samples: anchor_count,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use georeg_core::Similarity;

    fn pair(id: ConstraintId, src: (f64, f64), dst: (f64, f64)) -> Constraint {
        Constraint {
            id,
            kind: ConstraintKind::point_pair(Point2::new(src.0, src.1), Point2::new(dst.0, dst.1)),
        }
    }

    #[test]
    fn anchored_controls_are_dropped() {
        let constraints = vec![
            pair(1, (10.0, 10.0), (12.0, 10.0)),
            pair(2, (50.0, 50.0), (55.0, 50.0)),
            Constraint {
                id: 3,
                kind: ConstraintKind::Anchor {
                    region: Region::Circle {
                        center: Point2::new(50.0, 50.0),
                        radius: 5.0,
                    },
                    mode: Default::default(),
                },
            },
        ];
        let g = Transform::Similarity(Similarity::IDENTITY);
        let cps = control_points(&g, &constraints);
        assert_eq!(cps.len(), 1);
        assert_eq!(cps[0].id, 1);
        assert_eq!(cps[0].displacement, Vector2::new(2.0, 0.0));
    }

    #[test]
    fn stride_subsample_is_deterministic() {
        let mut cps: Vec<ControlPoint> = (0..10)
            .map(|i| ControlPoint {
                id: i,
                source: Point2::new(i as f64, 0.0),
                position: Point2::new(i as f64, 0.0),
                displacement: Vector2::zeros(),
            })
            .collect();
        let w = stride_subsample(&mut cps, 4).expect("subsampled");
        assert_eq!(w, SolveWarning::ControlPointsSubsampled { kept: 4, total: 10 });
        let ids: Vec<_> = cps.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 3, 6, 9]);
    }
}
