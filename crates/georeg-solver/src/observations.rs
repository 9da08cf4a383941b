//! Reduction of heterogeneous constraints to what each solver stage consumes.

use georeg_core::{Constraint, ConstraintId, ConstraintKind, Region};
use nalgebra::Point2;

/// One source→reference point correspondence owned by a constraint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Correspondence {
    pub id: ConstraintId,
    pub src: Point2<f64>,
    pub dst: Point2<f64>,
    pub weight: f64,
}

/// Constraints sorted by ascending id.
pub fn by_id(constraints: &[Constraint]) -> Vec<&Constraint> {
    let mut out: Vec<&Constraint> = constraints.iter().collect();
    out.sort_by_key(|c| c.id);
    out
}

pub fn change_masks(constraints: &[Constraint]) -> Vec<&Region> {
    constraints
        .iter()
        .filter_map(|c| match &c.kind {
            ConstraintKind::ChangeMask { region } => Some(region),
            _ => None,
        })
        .collect()
}

pub fn anchors(constraints: &[Constraint]) -> Vec<&Region> {
    constraints
        .iter()
        .filter_map(|c| match &c.kind {
            ConstraintKind::Anchor { region, .. } => Some(region),
            _ => None,
        })
        .collect()
}

/// Whether a geometric constraint's representative source point falls in a
/// change mask.
pub fn is_masked(kind: &ConstraintKind, masks: &[&Region]) -> bool {
    kind.source_point()
        .is_some_and(|p| masks.iter().any(|m| m.contains(p)))
}

/// Ids of geometric constraints excluded from scoring by change masks,
/// ascending.
pub fn excluded_ids(constraints: &[Constraint]) -> Vec<ConstraintId> {
    let masks = change_masks(constraints);
    by_id(constraints)
        .into_iter()
        .filter(|c| c.kind.is_geometric() && is_masked(&c.kind, &masks))
        .map(|c| c.id)
        .collect()
}

/// Point correspondences for the closed-form and RANSAC stages.
///
/// Point pairs are used directly, lines contribute their end points and
/// areas their vertices when both rings have the same count. Directional
/// pins count as point pairs. Masked constraints are skipped. Output is in
/// ascending id order.
pub fn point_correspondences(constraints: &[Constraint]) -> Vec<Correspondence> {
    let masks = change_masks(constraints);
    let mut out = Vec::new();
    for c in by_id(constraints) {
        if is_masked(&c.kind, &masks) {
            continue;
        }
        let id = c.id;
        match &c.kind {
            ConstraintKind::PointPair {
                src, dst, weight, ..
            } => out.push(Correspondence {
                id,
                src: *src,
                dst: *dst,
                weight: *weight,
            }),
            ConstraintKind::Directional {
                src, point, weight, ..
            } => out.push(Correspondence {
                id,
                src: *src,
                dst: *point,
                weight: *weight,
            }),
            ConstraintKind::Line {
                src_points,
                dst_points,
                weight,
            } => {
                if let (Some(s0), Some(s1), Some(d0), Some(d1)) = (
                    src_points.first(),
                    src_points.last(),
                    dst_points.first(),
                    dst_points.last(),
                ) {
                    out.push(Correspondence {
                        id,
                        src: *s0,
                        dst: *d0,
                        weight: *weight,
                    });
                    out.push(Correspondence {
                        id,
                        src: *s1,
                        dst: *d1,
                        weight: *weight,
                    });
                }
            }
            ConstraintKind::Area {
                src_polygon,
                dst_polygon,
                weight,
            } => {
                if src_polygon.len() == dst_polygon.len() {
                    out.extend(src_polygon.iter().zip(dst_polygon).map(|(s, d)| {
                        Correspondence {
                            id,
                            src: *s,
                            dst: *d,
                            weight: *weight,
                        }
                    }));
                }
            }
            ConstraintKind::Relational { .. }
            | ConstraintKind::Anchor { .. }
            | ConstraintKind::ChangeMask { .. } => {}
        }
    }
    out
}

/// Mean squared distance of the source points from their centroid.
pub fn source_variance(corrs: &[Correspondence]) -> f64 {
    if corrs.is_empty() {
        return 0.0;
    }
    let n = corrs.len() as f64;
    let (sx, sy) = corrs
        .iter()
        .fold((0.0, 0.0), |(x, y), c| (x + c.src.x, y + c.src.y));
    let (mx, my) = (sx / n, sy / n);
    corrs
        .iter()
        .map(|c| (c.src.x - mx).powi(2) + (c.src.y - my).powi(2))
        .sum::<f64>()
        / n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(id: ConstraintId, kind: ConstraintKind) -> Constraint {
        Constraint { id, kind }
    }

    #[test]
    fn reduction_follows_id_order_and_kinds() {
        let p = |x: f64, y: f64| Point2::new(x, y);
        let constraints = vec![
            c(
                5,
                ConstraintKind::Line {
                    src_points: vec![p(0.0, 0.0), p(5.0, 0.0), p(10.0, 0.0)],
                    dst_points: vec![p(1.0, 1.0), p(11.0, 1.0)],
                    weight: 2.0,
                },
            ),
            c(1, ConstraintKind::point_pair(p(1.0, 2.0), p(3.0, 4.0))),
            c(
                3,
                ConstraintKind::Area {
                    src_polygon: vec![p(0.0, 0.0), p(1.0, 0.0), p(1.0, 1.0)],
                    dst_polygon: vec![p(0.0, 0.0), p(1.0, 0.0), p(1.0, 1.0), p(0.0, 1.0)],
                    weight: 1.0,
                },
            ),
        ];
        let corrs = point_correspondences(&constraints);
        let ids: Vec<_> = corrs.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 5, 5]);
        assert_eq!(corrs[2].src, p(10.0, 0.0));
        assert_eq!(corrs[2].dst, p(11.0, 1.0));
        assert_eq!(corrs[1].weight, 2.0);
    }

    #[test]
    fn masked_constraints_are_excluded() {
        let p = |x: f64, y: f64| Point2::new(x, y);
        let constraints = vec![
            c(1, ConstraintKind::point_pair(p(1.0, 1.0), p(1.0, 1.0))),
            c(2, ConstraintKind::point_pair(p(50.0, 50.0), p(50.0, 50.0))),
            c(
                3,
                ConstraintKind::ChangeMask {
                    region: Region::Circle {
                        center: p(50.0, 50.0),
                        radius: 5.0,
                    },
                },
            ),
        ];
        assert_eq!(excluded_ids(&constraints), vec![2]);
        let corrs = point_correspondences(&constraints);
        assert_eq!(corrs.len(), 1);
        assert_eq!(corrs[0].id, 1);
    }
}
