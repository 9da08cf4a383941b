//! Per-constraint residuals and aggregate quality figures.

use georeg_core::{
    closest_point_on_polyline, Constraint, ConstraintId, ConstraintKind, TransformStack,
};
use georeg_geodesy::GeodesyAdapter;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::error::SolveError;
use crate::observations::{by_id, change_masks, is_masked};
use crate::result::SolveWarning;

/// Unit of reported residuals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorUnit {
    #[default]
    #[serde(rename = "pixels")]
    Pixels,
    #[serde(rename = "meters")]
    Meters,
    /// Millimetres on the printed map at the given scale denominator.
    #[serde(rename = "mapmm")]
    MapMillimeters,
}

impl ErrorUnit {
    pub fn label(self) -> &'static str {
        match self {
            ErrorUnit::Pixels => "pixels",
            ErrorUnit::Meters => "meters",
            ErrorUnit::MapMillimeters => "mapmm",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub rmse: f64,
    pub p90_error: f64,
    /// Residual of every geometric constraint, ascending id, in `unit`.
    pub residuals_by_id: Vec<(ConstraintId, f64)>,
    /// Constraints left out of the aggregates by change masks.
    pub excluded_ids: Vec<ConstraintId>,
    pub unit: ErrorUnit,
    /// Map scale denominator used for `mapmm`.
    pub map_scale: Option<f64>,
    pub low_confidence_scale: bool,
    pub warnings: Vec<SolveWarning>,
}

/// Residual of one constraint under `stack`, in reference pixels.
///
/// `None` for constraints that carry no correspondence.
pub fn constraint_residual(stack: &TransformStack, kind: &ConstraintKind) -> Option<f64> {
    match kind {
        ConstraintKind::PointPair { src, dst, .. } => Some((stack.evaluate(*src) - dst).norm()),
        ConstraintKind::Directional { src, point, .. } => {
            Some((stack.evaluate(*src) - point).norm())
        }
        ConstraintKind::Line {
            src_points,
            dst_points,
            ..
        } => Some(
            src_points
                .iter()
                .filter_map(|v| {
                    closest_point_on_polyline(dst_points, false, stack.evaluate(*v))
                        .map(|h| h.distance)
                })
                .sum(),
        ),
        ConstraintKind::Area {
            src_polygon,
            dst_polygon,
            ..
        } => {
            let mapped: Vec<Point2<f64>> =
                src_polygon.iter().map(|v| stack.evaluate(*v)).collect();
            let forward: f64 = mapped
                .iter()
                .filter_map(|q| closest_point_on_polyline(dst_polygon, true, *q))
                .map(|h| h.distance)
                .sum();
            let backward: f64 = dst_polygon
                .iter()
                .filter_map(|d| closest_point_on_polyline(&mapped, true, *d))
                .map(|h| h.distance)
                .sum();
            Some((forward + backward) / (mapped.len() + dst_polygon.len()) as f64)
        }
        ConstraintKind::Relational { .. }
        | ConstraintKind::Anchor { .. }
        | ConstraintKind::ChangeMask { .. } => None,
    }
}

/// Nearest-rank 90th percentile (`sorted[ceil(0.9 n) - 1]`).
pub fn p90(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (0.9 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

pub fn rmse(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

/// Recompute all metrics for `stack` from scratch.
pub fn compute_metrics(
    stack: &TransformStack,
    constraints: &[Constraint],
    unit: ErrorUnit,
    map_scale: Option<f64>,
    adapter: Option<&GeodesyAdapter<'_>>,
) -> Result<QualityMetrics, SolveError> {
    let denominator = match unit {
        ErrorUnit::MapMillimeters => {
            let s = map_scale.ok_or(SolveError::MissingMapScale)?;
            if !s.is_finite() || s <= 0.0 {
                return Err(SolveError::InvalidMapScale(s));
            }
            Some(s)
        }
        ErrorUnit::Pixels | ErrorUnit::Meters => None,
    };

    let masks = change_masks(constraints);
    let mut residuals_by_id = Vec::new();
    let mut excluded_ids = Vec::new();
    let mut scored = Vec::new();
    let mut low_confidence: Option<String> = None;

    for c in by_id(constraints) {
        let Some(px) = constraint_residual(stack, &c.kind) else {
            continue;
        };
        let value = match unit {
            ErrorUnit::Pixels => px,
            ErrorUnit::Meters | ErrorUnit::MapMillimeters => {
                let at = c.kind.reference_point().unwrap_or_else(Point2::origin);
                let (mpp, note) = meters_per_pixel(adapter, at);
                if low_confidence.is_none() {
                    low_confidence = note;
                }
                match denominator {
                    Some(s) => px * mpp * 1000.0 / s,
                    None => px * mpp,
                }
            }
        };
        residuals_by_id.push((c.id, value));
        if is_masked(&c.kind, &masks) {
            excluded_ids.push(c.id);
        } else {
            scored.push(value);
        }
    }

    let mut warnings = Vec::new();
    if let Some(reason) = &low_confidence {
        log::warn!("metrics: {reason}");
        warnings.push(SolveWarning::LowConfidenceScale {
            reason: reason.clone(),
        });
    }

    Ok(QualityMetrics {
        rmse: rmse(&scored),
        p90_error: p90(&scored),
        residuals_by_id,
        excluded_ids,
        unit,
        map_scale: denominator,
        low_confidence_scale: low_confidence.is_some(),
        warnings,
    })
}

/// Metres per reference pixel and, when approximate, why.
fn meters_per_pixel(
    adapter: Option<&GeodesyAdapter<'_>>,
    at: Point2<f64>,
) -> (f64, Option<String>) {
    let Some(adapter) = adapter else {
        return (1.0, Some("no reference georeference; 1 px taken as 1 m".into()));
    };
    match adapter.metric_scale_at(at.x, at.y) {
        Ok(scale) if scale.low_confidence => (
            scale.meters_per_pixel,
            Some("reference CRS unknown; world units taken as metres".into()),
        ),
        Ok(scale) => (scale.meters_per_pixel, None),
        Err(err) => (1.0, Some(format!("metric scale unavailable ({err})"))),
    }
}
