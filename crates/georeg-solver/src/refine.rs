//! Robust Gauss-Newton refinement of the global model (IRLS).
//!
//! Parameters live in Hartley-normalized source coordinates
//! `p_n = s (p - c)`: for a model `q = A p + t` the normalized parameters are
//! `A_n = A / s` and `t_n = A c + t`. Every geometric constraint contributes
//! a small group of residual rows; its robust weight comes from the L2 norm
//! of that group.

use std::collections::HashMap;

use georeg_core::{
    closest_point_on_polyline, Affine, BoundaryHit, Constraint, ConstraintId, ConstraintKind,
    Normalization, RelationKind, Similarity, Transform,
};
use nalgebra::{DMatrix, DVector, Point2, Vector2};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::error::SolveError;
use crate::observations::{by_id, change_masks, is_masked};
use crate::params::{GlobalModel, RefineParams};
use crate::result::RefineOutcome;

/// Consecutive cost increases tolerated before reverting to the best model.
const MAX_COST_INCREASES: usize = 2;

#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(initial, constraints, params), fields(constraints = constraints.len(), model = model.label()))
)]
pub fn refine(
    initial: &Transform,
    model: GlobalModel,
    constraints: &[Constraint],
    params: &RefineParams,
) -> Result<RefineOutcome, SolveError> {
    let problem = Problem::new(model, constraints);
    let mut theta = problem.param.to_theta(initial);

    let mut system = problem.system(&theta, params);
    let mut best = (theta.clone(), system.cost);
    let mut step_scale = 1.0;
    let mut increases = 0usize;
    let mut converged = false;
    let mut iterations = 0usize;

    while iterations < params.max_iterations {
        iterations += 1;
        let delta = solve_normal_equations(&system.h, &system.g, params.ridge)?;
        let step = delta * step_scale;
        let next = &theta + &step;
        let next_system = problem.system(&next, params);

        if next_system.cost < best.1 {
            best = (next.clone(), next_system.cost);
        }
        if next_system.cost > system.cost {
            increases += 1;
        } else {
            increases = 0;
        }
        theta = next;
        system = next_system;

        if step.norm() < params.tolerance * (1.0 + theta.norm()) {
            converged = true;
            break;
        }
        if increases >= MAX_COST_INCREASES {
            theta = best.0.clone();
            system = problem.system(&theta, params);
            step_scale *= 0.5;
            increases = 0;
            log::debug!("refine: cost rising, reverting to best and halving step to {step_scale}");
        }
    }

    let (theta, cost) = best;
    let model_t = problem.param.from_theta(&theta);
    if converged {
        log::debug!("refine: converged after {iterations} iterations, cost {cost:.6e}");
    } else {
        log::warn!("refine: no convergence within {iterations} iterations, cost {cost:.6e}");
    }
    Ok(RefineOutcome {
        model: model_t,
        iterations,
        converged,
        cost,
    })
}

/// Solve `(H + ridge I) δ = -g`, Cholesky first, LU as fallback.
fn solve_normal_equations(
    h: &DMatrix<f64>,
    g: &DVector<f64>,
    ridge: f64,
) -> Result<DVector<f64>, SolveError> {
    let n = h.nrows();
    let lhs = h + DMatrix::<f64>::identity(n, n) * ridge;
    let rhs = -g;
    if let Some(chol) = lhs.clone().cholesky() {
        return Ok(chol.solve(&rhs));
    }
    lhs.lu()
        .solve(&rhs)
        .ok_or(SolveError::SingularSystem { stage: "refine" })
}

/// Mapping between a global model and its normalized parameter vector.
struct Parametrization {
    model: GlobalModel,
    norm: Normalization,
}

impl Parametrization {
    fn len(&self) -> usize {
        self.model.param_count()
    }

    fn to_theta(&self, t: &Transform) -> DVector<f64> {
        let aff = t.as_affine().unwrap_or(Affine::IDENTITY);
        let (s, c) = (self.norm.scale, self.norm.center);
        let tn = aff.apply(c);
        match self.model {
            GlobalModel::Similarity => {
                let (a, b) = match t {
                    Transform::Similarity(sim) => {
                        let [a, b, _, _] = sim.linear_params();
                        (a, b)
                    }
                    // Closest similarity to a general linear part.
                    _ => (0.5 * (aff.a + aff.d), 0.5 * (aff.c - aff.b)),
                };
                DVector::from_vec(vec![a / s, b / s, tn.x, tn.y])
            }
            GlobalModel::Affine => DVector::from_vec(vec![
                aff.a / s,
                aff.b / s,
                aff.c / s,
                aff.d / s,
                tn.x,
                tn.y,
            ]),
        }
    }

    fn from_theta(&self, theta: &DVector<f64>) -> Transform {
        let (s, c) = (self.norm.scale, self.norm.center);
        match self.model {
            GlobalModel::Similarity => {
                let (a, b) = (theta[0] * s, theta[1] * s);
                let tx = theta[2] - (a * c.x - b * c.y);
                let ty = theta[3] - (b * c.x + a * c.y);
                Transform::Similarity(Similarity::from_linear(a, b, tx, ty))
            }
            GlobalModel::Affine => {
                let (a, b, cc, d) = (theta[0] * s, theta[1] * s, theta[2] * s, theta[3] * s);
                Transform::Affine(Affine {
                    a,
                    b,
                    c: cc,
                    d,
                    tx: theta[4] - (a * c.x + b * c.y),
                    ty: theta[5] - (cc * c.x + d * c.y),
                })
            }
        }
    }

    fn map(&self, theta: &DVector<f64>, p: Point2<f64>) -> Point2<f64> {
        let n = self.norm.apply(p);
        match self.model {
            GlobalModel::Similarity => Point2::new(
                theta[0] * n.x - theta[1] * n.y + theta[2],
                theta[1] * n.x + theta[0] * n.y + theta[3],
            ),
            GlobalModel::Affine => Point2::new(
                theta[0] * n.x + theta[1] * n.y + theta[4],
                theta[2] * n.x + theta[3] * n.y + theta[5],
            ),
        }
    }

    /// Parameter gradients of the mapped `x` and `y`.
    fn jacobian(&self, p: Point2<f64>) -> PointJacobian {
        let n = self.norm.apply(p);
        match self.model {
            GlobalModel::Similarity => PointJacobian {
                x: DVector::from_vec(vec![n.x, -n.y, 1.0, 0.0]),
                y: DVector::from_vec(vec![n.y, n.x, 0.0, 1.0]),
            },
            GlobalModel::Affine => PointJacobian {
                x: DVector::from_vec(vec![n.x, n.y, 0.0, 0.0, 1.0, 0.0]),
                y: DVector::from_vec(vec![0.0, 0.0, n.x, n.y, 0.0, 1.0]),
            },
        }
    }
}

#[derive(Clone)]
struct PointJacobian {
    x: DVector<f64>,
    y: DVector<f64>,
}

impl PointJacobian {
    /// Gradient of `u · q`.
    fn project(&self, u: Vector2<f64>) -> DVector<f64> {
        &self.x * u.x + &self.y * u.y
    }

    fn lerp(&self, other: &PointJacobian, t: f64) -> PointJacobian {
        PointJacobian {
            x: &self.x * (1.0 - t) + &other.x * t,
            y: &self.y * (1.0 - t) + &other.y * t,
        }
    }

    fn sub(&self, other: &PointJacobian) -> PointJacobian {
        PointJacobian {
            x: &self.x - &other.x,
            y: &self.y - &other.y,
        }
    }
}

struct Row {
    r: f64,
    g: DVector<f64>,
}

struct System {
    h: DMatrix<f64>,
    g: DVector<f64>,
    cost: f64,
}

struct Problem<'a> {
    param: Parametrization,
    /// Scored constraints in ascending id order, masked ones removed.
    active: Vec<&'a Constraint>,
    by_id: HashMap<ConstraintId, &'a Constraint>,
}

impl<'a> Problem<'a> {
    fn new(model: GlobalModel, constraints: &'a [Constraint]) -> Self {
        let masks = change_masks(constraints);
        let sorted = by_id(constraints);
        let active: Vec<&Constraint> = sorted
            .iter()
            .copied()
            .filter(|c| match &c.kind {
                ConstraintKind::Relational { .. } => true,
                kind if kind.is_geometric() => !is_masked(kind, &masks),
                _ => false,
            })
            .collect();
        let mut src_points = Vec::new();
        for c in &active {
            match &c.kind {
                ConstraintKind::PointPair { src, .. }
                | ConstraintKind::Directional { src, .. } => src_points.push(*src),
                ConstraintKind::Line { src_points: pts, .. }
                | ConstraintKind::Area {
                    src_polygon: pts, ..
                } => src_points.extend_from_slice(pts),
                _ => {}
            }
        }
        let by_id = sorted.iter().map(|c| (c.id, *c)).collect();
        Self {
            param: Parametrization {
                model,
                norm: Normalization::from_points(&src_points),
            },
            active,
            by_id,
        }
    }

    fn system(&self, theta: &DVector<f64>, params: &RefineParams) -> System {
        let n = self.param.len();
        let mut h = DMatrix::<f64>::zeros(n, n);
        let mut g = DVector::<f64>::zeros(n);
        let mut cost = 0.0;
        for c in &self.active {
            let rows = self.rows(theta, &c.kind);
            if rows.is_empty() {
                continue;
            }
            let magnitude = rows.iter().map(|row| row.r * row.r).sum::<f64>().sqrt();
            let user_weight = c.kind.weight();
            let w = user_weight * params.loss.weight(magnitude, params.loss_scale);
            cost += user_weight * params.loss.rho(magnitude, params.loss_scale);
            for row in &rows {
                h += &row.g * row.g.transpose() * w;
                g += &row.g * (row.r * w);
            }
        }
        System { h, g, cost }
    }

    fn rows(&self, theta: &DVector<f64>, kind: &ConstraintKind) -> Vec<Row> {
        let p = &self.param;
        match kind {
            ConstraintKind::PointPair { src, dst, .. } => {
                let q = p.map(theta, *src);
                let j = p.jacobian(*src);
                vec![
                    Row {
                        r: q.x - dst.x,
                        g: j.x,
                    },
                    Row {
                        r: q.y - dst.y,
                        g: j.y,
                    },
                ]
            }
            ConstraintKind::Line {
                src_points,
                dst_points,
                ..
            } => src_points
                .iter()
                .filter_map(|v| {
                    let q = p.map(theta, *v);
                    let hit = closest_point_on_polyline(dst_points, false, q)?;
                    let (r, u) = boundary_offset(q, &hit, dst_points, false);
                    Some(Row {
                        r,
                        g: p.jacobian(*v).project(u),
                    })
                })
                .collect(),
            ConstraintKind::Area {
                src_polygon,
                dst_polygon,
                ..
            } => {
                let mapped: Vec<Point2<f64>> =
                    src_polygon.iter().map(|v| p.map(theta, *v)).collect();
                let jacs: Vec<PointJacobian> =
                    src_polygon.iter().map(|v| p.jacobian(*v)).collect();
                let inv_src = 1.0 / src_polygon.len() as f64;
                let inv_dst = 1.0 / dst_polygon.len() as f64;
                let mut rows = Vec::with_capacity(mapped.len() + dst_polygon.len());
                for (q, j) in mapped.iter().zip(&jacs) {
                    if let Some(hit) = closest_point_on_polyline(dst_polygon, true, *q) {
                        let (r, u) = boundary_offset(*q, &hit, dst_polygon, true);
                        rows.push(Row {
                            r: r * inv_src,
                            g: j.project(u) * inv_src,
                        });
                    }
                }
                let n = mapped.len();
                for d in dst_polygon {
                    if let Some(hit) = closest_point_on_polyline(&mapped, true, *d) {
                        // Offset of the mapped boundary from the destination vertex.
                        let (r, u) = boundary_offset(*d, &hit, &mapped, true);
                        let j = jacs[hit.segment].lerp(&jacs[(hit.segment + 1) % n], hit.t);
                        rows.push(Row {
                            r: -r * inv_dst,
                            g: j.project(u) * inv_dst,
                        });
                    }
                }
                rows
            }
            ConstraintKind::Directional {
                src,
                point,
                axis_angle,
                semi_axes,
                ..
            } => {
                let q = p.map(theta, *src);
                let j = p.jacobian(*src);
                let d = q - point;
                let (sin, cos) = axis_angle.sin_cos();
                let major = Vector2::new(cos, sin);
                let minor = Vector2::new(-sin, cos);
                vec![
                    Row {
                        r: major.dot(&d) / semi_axes[0],
                        g: j.project(major) / semi_axes[0],
                    },
                    Row {
                        r: minor.dot(&d) / semi_axes[1],
                        g: j.project(minor) / semi_axes[1],
                    },
                ]
            }
            ConstraintKind::Relational {
                a_id,
                b_id,
                relation,
                param,
            } => {
                let (Some(a), Some(b)) = (
                    self.by_id.get(a_id).and_then(|c| c.kind.source_point()),
                    self.by_id.get(b_id).and_then(|c| c.kind.source_point()),
                ) else {
                    return Vec::new();
                };
                let qa = p.map(theta, a);
                let qb = p.map(theta, b);
                let jd = p.jacobian(a).sub(&p.jacobian(b));
                vec![relation_row(*relation, *param, qa, qb, &jd)]
            }
            ConstraintKind::Anchor { .. } | ConstraintKind::ChangeMask { .. } => Vec::new(),
        }
    }
}

/// One-sided penalty; inactive relations yield a zero row with zero gradient.
fn relation_row(
    relation: RelationKind,
    param: f64,
    qa: Point2<f64>,
    qb: Point2<f64>,
    jd: &PointJacobian,
) -> Row {
    let inactive = || Row {
        r: 0.0,
        g: DVector::zeros(jd.x.len()),
    };
    let diff = qa - qb;
    match relation {
        RelationKind::MaxDistance | RelationKind::MinDistance => {
            let dist = diff.norm();
            if dist <= 1e-12 {
                return if relation == RelationKind::MinDistance && param > 0.0 {
                    // No direction to push along; report the violation only.
                    Row {
                        r: param,
                        g: DVector::zeros(jd.x.len()),
                    }
                } else {
                    inactive()
                };
            }
            let u = diff / dist;
            match relation {
                RelationKind::MaxDistance if dist > param => Row {
                    r: dist - param,
                    g: jd.project(u),
                },
                RelationKind::MinDistance if dist < param => Row {
                    r: param - dist,
                    g: -jd.project(u),
                },
                _ => inactive(),
            }
        }
        RelationKind::LeftOf => {
            let v = qa.x + param - qb.x;
            if v > 0.0 {
                Row {
                    r: v,
                    g: jd.x.clone(),
                }
            } else {
                inactive()
            }
        }
        RelationKind::Above => {
            let v = qa.y + param - qb.y;
            if v > 0.0 {
                Row {
                    r: v,
                    g: jd.y.clone(),
                }
            } else {
                inactive()
            }
        }
    }
}

/// Signed offset of `q` from a boundary and the direction it is measured in.
///
/// Interior hits use the segment normal; hits clamped to a vertex use the
/// direction from the vertex.
pub(crate) fn boundary_offset(
    q: Point2<f64>,
    hit: &BoundaryHit,
    vertices: &[Point2<f64>],
    closed: bool,
) -> (f64, Vector2<f64>) {
    let n = vertices.len();
    let a = vertices[hit.segment];
    let b = if closed || hit.segment + 1 < n {
        vertices[(hit.segment + 1) % n]
    } else {
        a
    };
    let e = b - a;
    let len = e.norm();
    let normal = if len > 1e-12 {
        Vector2::new(-e.y, e.x) / len
    } else {
        Vector2::zeros()
    };
    if len > 1e-12 && hit.t > 0.0 && hit.t < 1.0 {
        return (normal.dot(&(q - a)), normal);
    }
    let d = q - hit.point;
    let dist = d.norm();
    if dist > 1e-12 {
        (dist, d / dist)
    } else {
        (0.0, normal)
    }
}
