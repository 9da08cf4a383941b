use georeg_core::{tps_kernel, Region, ThinPlateSpline, Transform};
use nalgebra::{DMatrix, Point2, Vector2};

use super::{anchor_samples, ControlPoint};
use crate::error::SolveError;
use crate::params::LocalWarpParams;

/// Anchor sampling may coarsen to at most this multiple of the configured
/// spacing before the fit is refused.
const MAX_ANCHOR_COARSENING: f64 = 4.0;

/// Upper bound on anchor check points per fit.
const MAX_ANCHOR_CHECKS: usize = 40_000;

/// Fit a thin-plate displacement field through `controls`, with anchor
/// samples injected as exact zero-displacement rows.
///
/// Controls and anchor samples share `max_control_points`. After each fit
/// the anchors are checked on a `anchor_check_spacing` lattice; while the
/// largest displacement exceeds `anchor_tolerance` the anchor spacing is
/// halved and the system solved again.
///
/// Returns the spline and the number of anchor samples used.
pub fn fit_tps(
    global: &Transform,
    controls: &[ControlPoint],
    anchor_regions: &[&Region],
    params: &LocalWarpParams,
) -> Result<(ThinPlateSpline, usize), SolveError> {
    if anchor_regions.is_empty() {
        return Ok((solve_system(controls, Vec::new(), params)?, 0));
    }

    let budget = params.max_control_points.saturating_sub(controls.len());
    let (mut spacing, mut samples) = initial_anchor_samples(anchor_regions, params, budget)?;
    let checks = check_points(anchor_regions, params.anchor_check_spacing);
    loop {
        let anchors: Vec<Point2<f64>> = samples.iter().map(|p| global.apply(*p)).collect();
        let count = anchors.len();
        let tps = solve_system(controls, anchors, params)?;
        let (drift, at) = max_anchor_drift(&tps, global, &checks);
        if drift <= params.anchor_tolerance {
            log::debug!("tps: anchor drift {drift:.2e} px with spacing {spacing:.2} px");
            return Ok((tps, count));
        }

        let finer = 0.5 * spacing;
        let finer_samples = anchor_samples(anchor_regions, finer);
        if finer < params.anchor_check_spacing || finer_samples.len() > budget {
            return Err(SolveError::AnchorDrift {
                max_displacement: drift,
                tolerance: params.anchor_tolerance,
            });
        }
        log::info!(
            "tps: anchor drift {drift:.4} px at ({:.1}, {:.1}), resampling at {finer:.2} px",
            at.x,
            at.y
        );
        spacing = finer;
        samples = finer_samples;
    }
}

/// Solve the bordered kernel system. Controls come first and carry
/// `lambda` on the diagonal; anchors are exact.
fn solve_system(
    controls: &[ControlPoint],
    anchors: Vec<Point2<f64>>,
    params: &LocalWarpParams,
) -> Result<ThinPlateSpline, SolveError> {
    let mut centers: Vec<Point2<f64>> = controls.iter().map(|c| c.position).collect();
    let n_anchors = anchors.len();
    centers.extend(anchors);
    check_conditioning(&centers, params.min_control_separation)?;

    let n = centers.len();
    let n_controls = controls.len();
    let size = n + 3;
    let mut l = DMatrix::<f64>::zeros(size, size);
    let mut rhs = DMatrix::<f64>::zeros(size, 2);

    for i in 0..n {
        for j in (i + 1)..n {
            let u = tps_kernel((centers[i] - centers[j]).norm_squared());
            l[(i, j)] = u;
            l[(j, i)] = u;
        }
        if i < n_controls {
            l[(i, i)] = params.lambda;
            rhs[(i, 0)] = controls[i].displacement.x;
            rhs[(i, 1)] = controls[i].displacement.y;
        }
        let p = centers[i];
        for (k, v) in [1.0, p.x, p.y].into_iter().enumerate() {
            l[(i, n + k)] = v;
            l[(n + k, i)] = v;
        }
    }

    let sol = l
        .lu()
        .solve(&rhs)
        .ok_or(SolveError::SingularSystem { stage: "tps" })?;
    if sol.iter().any(|v| !v.is_finite()) {
        return Err(SolveError::SingularSystem { stage: "tps" });
    }

    let weights = (0..n)
        .map(|i| Vector2::new(sol[(i, 0)], sol[(i, 1)]))
        .collect();
    let affine = [
        [sol[(n, 0)], sol[(n + 1, 0)], sol[(n + 2, 0)]],
        [sol[(n, 1)], sol[(n + 1, 1)], sol[(n + 2, 1)]],
    ];
    log::debug!(
        "tps: {} controls + {} anchor samples, lambda {}",
        n_controls,
        n_anchors,
        params.lambda
    );
    Ok(ThinPlateSpline {
        control_points: centers,
        weights,
        affine,
        lambda: params.lambda,
    })
}

/// Anchor samples at the configured spacing, coarsened (up to
/// [`MAX_ANCHOR_COARSENING`]) until they fit in `budget`.
fn initial_anchor_samples(
    regions: &[&Region],
    params: &LocalWarpParams,
    budget: usize,
) -> Result<(f64, Vec<Point2<f64>>), SolveError> {
    let base = params.anchor_sample_spacing.max(f64::EPSILON);
    let limit = base * MAX_ANCHOR_COARSENING;
    let mut spacing = base;
    let mut samples = anchor_samples(regions, spacing);
    while samples.len() > budget {
        if spacing >= limit || budget == 0 {
            return Err(SolveError::AnchorBudgetExceeded {
                samples: samples.len(),
                budget,
            });
        }
        let grow = (samples.len() as f64 / budget as f64).sqrt().max(1.25);
        spacing = (spacing * grow).min(limit);
        samples = anchor_samples(regions, spacing);
    }
    if spacing > base {
        log::info!("tps: anchor sample spacing raised to {spacing:.2} px");
    }
    Ok((spacing, samples))
}

/// Source-space points on which anchors are checked, thinned to at most
/// [`MAX_ANCHOR_CHECKS`].
fn check_points(regions: &[&Region], spacing: f64) -> Vec<Point2<f64>> {
    let mut spacing = spacing.max(f64::EPSILON);
    let mut points = anchor_samples(regions, spacing);
    while points.len() > MAX_ANCHOR_CHECKS {
        spacing *= (points.len() as f64 / MAX_ANCHOR_CHECKS as f64).sqrt().max(1.25);
        points = anchor_samples(regions, spacing);
    }
    points
}

/// Largest displacement of `tps` over `G(checks)` and the source point where
/// it occurs.
fn max_anchor_drift(
    tps: &ThinPlateSpline,
    global: &Transform,
    checks: &[Point2<f64>],
) -> (f64, Point2<f64>) {
    checks
        .iter()
        .map(|p| (tps.displacement(global.apply(*p)).norm(), *p))
        .fold((0.0, Point2::origin()), |best, cur| {
            if cur.0 > best.0 {
                cur
            } else {
                best
            }
        })
}

/// Reject near-coincident centers and point sets without 2D extent.
fn check_conditioning(centers: &[Point2<f64>], min_separation: f64) -> Result<(), SolveError> {
    if centers.len() < 3 {
        return Err(SolveError::DegenerateControlPoints {
            reason: format!("{} control points, need at least 3", centers.len()),
        });
    }
    for (i, a) in centers.iter().enumerate() {
        for b in &centers[i + 1..] {
            if (a - b).norm() < min_separation {
                return Err(SolveError::DegenerateControlPoints {
                    reason: format!(
                        "points ({:.3}, {:.3}) and ({:.3}, {:.3}) are closer than {min_separation}",
                        a.x, a.y, b.x, b.y
                    ),
                });
            }
        }
    }
    // Second moments: both eigenvalues must be non-negligible.
    let n = centers.len() as f64;
    let (mx, my) = centers
        .iter()
        .fold((0.0, 0.0), |(x, y), p| (x + p.x / n, y + p.y / n));
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in centers {
        let (dx, dy) = (p.x - mx, p.y - my);
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    let trace = sxx + syy;
    let det = sxx * syy - sxy * sxy;
    let disc = (0.25 * (sxx - syy).powi(2) + sxy * sxy).sqrt();
    let lambda_min = 0.5 * trace - disc;
    if trace <= 0.0 || det <= 0.0 || lambda_min <= 1e-10 * trace {
        return Err(SolveError::DegenerateControlPoints {
            reason: "control points are collinear".into(),
        });
    }
    Ok(())
}
