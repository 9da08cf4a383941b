//! Typed registration constraints.
//!
//! Every consumer (residuals, weighting, serialization) matches on
//! [`ConstraintKind`] exhaustively, so adding a kind is a compile-time change.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::error::ConstraintError;
use crate::geometry::{centroid, polygon_area, polyline_length, Region};

/// Session-unique constraint identifier. Never reused after deletion.
pub type ConstraintId = u64;

/// Extent of the source document in pixels; source coordinates must lie in
/// `[0, width] x [0, height]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceBounds {
    pub width: f64,
    pub height: f64,
}

impl SourceBounds {
    pub fn contains(&self, p: Point2<f64>) -> bool {
        p.x >= 0.0 && p.y >= 0.0 && p.x <= self.width && p.y <= self.height
    }
}

/// Ordering / distance-band relation between two constraints, evaluated on
/// their mapped representative source points `a` and `b`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// `|a - b| <= param`
    MaxDistance,
    /// `|a - b| >= param`
    MinDistance,
    /// `a.x + param <= b.x`
    LeftOf,
    /// `a.y + param <= b.y` (pixel rows grow downwards)
    Above,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorMode {
    #[default]
    NoWarp,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintKind {
    PointPair {
        src: Point2<f64>,
        dst: Point2<f64>,
        /// World coordinates of `dst` in the reference CRS. Derived.
        #[serde(default)]
        dst_real: Option<Point2<f64>>,
        /// Local metric coordinates of `dst`. Derived.
        #[serde(default)]
        dst_local: Option<Point2<f64>>,
        #[serde(default = "default_weight")]
        weight: f64,
    },
    Line {
        src_points: Vec<Point2<f64>>,
        dst_points: Vec<Point2<f64>>,
        #[serde(default = "default_weight")]
        weight: f64,
    },
    Area {
        src_polygon: Vec<Point2<f64>>,
        dst_polygon: Vec<Point2<f64>>,
        #[serde(default = "default_weight")]
        weight: f64,
    },
    /// Elliptical pin: `src` should land on `point`, with tolerance
    /// `semi_axes = [major, minor]` along the axis rotated by `axis_angle`.
    Directional {
        src: Point2<f64>,
        point: Point2<f64>,
        axis_angle: f64,
        semi_axes: [f64; 2],
        #[serde(default = "default_weight")]
        weight: f64,
    },
    Relational {
        a_id: ConstraintId,
        b_id: ConstraintId,
        relation: RelationKind,
        param: f64,
    },
    Anchor {
        region: Region,
        #[serde(default)]
        mode: AnchorMode,
    },
    ChangeMask {
        region: Region,
    },
}

impl ConstraintKind {
    pub fn point_pair(src: Point2<f64>, dst: Point2<f64>) -> Self {
        ConstraintKind::PointPair {
            src,
            dst,
            dst_real: None,
            dst_local: None,
            weight: 1.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConstraintKind::PointPair { .. } => "point_pair",
            ConstraintKind::Line { .. } => "line",
            ConstraintKind::Area { .. } => "area",
            ConstraintKind::Directional { .. } => "directional",
            ConstraintKind::Relational { .. } => "relational",
            ConstraintKind::Anchor { .. } => "anchor",
            ConstraintKind::ChangeMask { .. } => "change_mask",
        }
    }

    /// Constraints that carry a source→reference correspondence and get a
    /// residual of their own.
    pub fn is_geometric(&self) -> bool {
        match self {
            ConstraintKind::PointPair { .. }
            | ConstraintKind::Line { .. }
            | ConstraintKind::Area { .. }
            | ConstraintKind::Directional { .. } => true,
            ConstraintKind::Relational { .. }
            | ConstraintKind::Anchor { .. }
            | ConstraintKind::ChangeMask { .. } => false,
        }
    }

    /// User weight; relations use unit weight, regions carry none.
    pub fn weight(&self) -> f64 {
        match self {
            ConstraintKind::PointPair { weight, .. }
            | ConstraintKind::Line { weight, .. }
            | ConstraintKind::Area { weight, .. }
            | ConstraintKind::Directional { weight, .. } => *weight,
            ConstraintKind::Relational { .. } => 1.0,
            ConstraintKind::Anchor { .. } | ConstraintKind::ChangeMask { .. } => 0.0,
        }
    }

    /// Representative point in source space.
    pub fn source_point(&self) -> Option<Point2<f64>> {
        match self {
            ConstraintKind::PointPair { src, .. } | ConstraintKind::Directional { src, .. } => {
                Some(*src)
            }
            ConstraintKind::Line { src_points, .. } => Some(centroid(src_points)),
            ConstraintKind::Area { src_polygon, .. } => Some(centroid(src_polygon)),
            ConstraintKind::Relational { .. }
            | ConstraintKind::Anchor { .. }
            | ConstraintKind::ChangeMask { .. } => None,
        }
    }

    /// Representative point in reference space.
    pub fn reference_point(&self) -> Option<Point2<f64>> {
        match self {
            ConstraintKind::PointPair { dst, .. } => Some(*dst),
            ConstraintKind::Directional { point, .. } => Some(*point),
            ConstraintKind::Line { dst_points, .. } => Some(centroid(dst_points)),
            ConstraintKind::Area { dst_polygon, .. } => Some(centroid(dst_polygon)),
            ConstraintKind::Relational { .. }
            | ConstraintKind::Anchor { .. }
            | ConstraintKind::ChangeMask { .. } => None,
        }
    }

    /// Check the constraint's own geometry.
    ///
    /// References between constraints (relations) are checked by the store,
    /// which owns identity.
    pub fn validate(&self, bounds: Option<&SourceBounds>) -> Result<(), ConstraintError> {
        let kind = self.label();
        let check_src = |pts: &[Point2<f64>]| -> Result<(), ConstraintError> {
            for p in pts {
                if !is_finite(p) {
                    return Err(ConstraintError::invalid(kind, "non-finite source coordinate"));
                }
                if let Some(b) = bounds {
                    if !b.contains(*p) {
                        return Err(ConstraintError::invalid(
                            kind,
                            format!(
                                "source point ({}, {}) outside {}x{} document",
                                p.x, p.y, b.width, b.height
                            ),
                        ));
                    }
                }
            }
            Ok(())
        };
        let check_dst = |pts: &[Point2<f64>]| -> Result<(), ConstraintError> {
            if pts.iter().all(is_finite) {
                Ok(())
            } else {
                Err(ConstraintError::invalid(kind, "non-finite destination coordinate"))
            }
        };
        let check_weight = |w: f64| -> Result<(), ConstraintError> {
            if w.is_finite() && w > 0.0 {
                Ok(())
            } else {
                Err(ConstraintError::invalid(
                    kind,
                    format!("weight must be in (0, inf), got {w}"),
                ))
            }
        };

        match self {
            ConstraintKind::PointPair {
                src, dst, weight, ..
            } => {
                check_src(&[*src])?;
                check_dst(&[*dst])?;
                check_weight(*weight)
            }
            ConstraintKind::Line {
                src_points,
                dst_points,
                weight,
            } => {
                if src_points.len() < 2 || dst_points.len() < 2 {
                    return Err(ConstraintError::invalid(
                        kind,
                        "polylines need at least two vertices on each side",
                    ));
                }
                check_src(src_points)?;
                check_dst(dst_points)?;
                if polyline_length(src_points) <= f64::EPSILON
                    || polyline_length(dst_points) <= f64::EPSILON
                {
                    return Err(ConstraintError::invalid(kind, "zero-length polyline"));
                }
                check_weight(*weight)
            }
            ConstraintKind::Area {
                src_polygon,
                dst_polygon,
                weight,
            } => {
                if src_polygon.len() < 3 || dst_polygon.len() < 3 {
                    return Err(ConstraintError::invalid(
                        kind,
                        "polygons need at least three vertices",
                    ));
                }
                check_src(src_polygon)?;
                check_dst(dst_polygon)?;
                if polygon_area(src_polygon).abs() <= f64::EPSILON
                    || polygon_area(dst_polygon).abs() <= f64::EPSILON
                {
                    return Err(ConstraintError::invalid(kind, "zero-area polygon"));
                }
                check_weight(*weight)
            }
            ConstraintKind::Directional {
                src,
                point,
                axis_angle,
                semi_axes,
                weight,
            } => {
                check_src(&[*src])?;
                check_dst(&[*point])?;
                if !axis_angle.is_finite() {
                    return Err(ConstraintError::invalid(kind, "non-finite axis angle"));
                }
                if semi_axes.iter().any(|s| !s.is_finite() || *s <= 0.0) {
                    return Err(ConstraintError::invalid(
                        kind,
                        "semi-axes must be finite and positive",
                    ));
                }
                check_weight(*weight)
            }
            ConstraintKind::Relational {
                a_id,
                b_id,
                relation,
                param,
            } => {
                if a_id == b_id {
                    return Err(ConstraintError::invalid(kind, "relation references itself"));
                }
                if !param.is_finite() {
                    return Err(ConstraintError::invalid(kind, "non-finite parameter"));
                }
                let is_band = matches!(
                    relation,
                    RelationKind::MaxDistance | RelationKind::MinDistance
                );
                if is_band && *param < 0.0 {
                    return Err(ConstraintError::invalid(
                        kind,
                        "distance band must be non-negative",
                    ));
                }
                Ok(())
            }
            ConstraintKind::Anchor { region, .. } | ConstraintKind::ChangeMask { region } => {
                validate_region(kind, region, &check_src)
            }
        }
    }
}

fn validate_region(
    kind: &'static str,
    region: &Region,
    check_src: &dyn Fn(&[Point2<f64>]) -> Result<(), ConstraintError>,
) -> Result<(), ConstraintError> {
    match region {
        Region::Polygon { vertices } => {
            if vertices.len() < 3 {
                return Err(ConstraintError::invalid(
                    kind,
                    "region polygon needs at least three vertices",
                ));
            }
            check_src(vertices)?;
            if polygon_area(vertices).abs() <= f64::EPSILON {
                return Err(ConstraintError::invalid(kind, "zero-area region"));
            }
            Ok(())
        }
        Region::Circle { center, radius } => {
            check_src(&[*center])?;
            if !radius.is_finite() || *radius <= 0.0 {
                return Err(ConstraintError::invalid(
                    kind,
                    "circle radius must be finite and positive",
                ));
            }
            Ok(())
        }
    }
}

fn is_finite(p: &Point2<f64>) -> bool {
    p.x.is_finite() && p.y.is_finite()
}

/// A stored constraint with its session id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub id: ConstraintId,
    #[serde(flatten)]
    pub kind: ConstraintKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_weight_and_nan() {
        let mut c = ConstraintKind::point_pair(Point2::new(1.0, 1.0), Point2::new(2.0, 2.0));
        if let ConstraintKind::PointPair { weight, .. } = &mut c {
            *weight = 0.0;
        }
        assert!(c.validate(None).is_err());

        let nan = ConstraintKind::point_pair(Point2::new(f64::NAN, 1.0), Point2::new(2.0, 2.0));
        assert!(nan.validate(None).is_err());

        let inf_dst =
            ConstraintKind::point_pair(Point2::new(1.0, 1.0), Point2::new(f64::INFINITY, 2.0));
        assert!(inf_dst.validate(None).is_err());
    }

    #[test]
    fn out_of_bounds_source_is_rejected_not_clipped() {
        let bounds = SourceBounds {
            width: 100.0,
            height: 50.0,
        };
        let inside = ConstraintKind::point_pair(Point2::new(100.0, 50.0), Point2::new(0.0, 0.0));
        assert!(inside.validate(Some(&bounds)).is_ok());
        let outside = ConstraintKind::point_pair(Point2::new(100.5, 10.0), Point2::new(0.0, 0.0));
        let err = outside.validate(Some(&bounds)).unwrap_err();
        assert!(err.to_string().contains("outside"));
    }

    #[test]
    fn degenerate_shapes_are_rejected() {
        let line = ConstraintKind::Line {
            src_points: vec![Point2::new(1.0, 1.0), Point2::new(1.0, 1.0)],
            dst_points: vec![Point2::new(0.0, 0.0), Point2::new(5.0, 0.0)],
            weight: 1.0,
        };
        assert!(line.validate(None).is_err());

        let area = ConstraintKind::Area {
            src_polygon: vec![
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 1.0),
                Point2::new(2.0, 2.0),
            ],
            dst_polygon: vec![
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 0.0),
                Point2::new(0.0, 1.0),
            ],
            weight: 1.0,
        };
        assert!(area.validate(None).is_err());

        let pin = ConstraintKind::Directional {
            src: Point2::new(1.0, 1.0),
            point: Point2::new(1.0, 1.0),
            axis_angle: 0.0,
            semi_axes: [2.0, 0.0],
            weight: 1.0,
        };
        assert!(pin.validate(None).is_err());
    }

    #[test]
    fn serializes_with_type_tag_and_flattened_id() {
        let c = Constraint {
            id: 7,
            kind: ConstraintKind::point_pair(Point2::new(1.0, 2.0), Point2::new(3.0, 4.0)),
        };
        let json = serde_json::to_value(&c).expect("serialize");
        assert_eq!(json["id"], 7);
        assert_eq!(json["type"], "point_pair");
        let back: Constraint = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, c);
    }
}
