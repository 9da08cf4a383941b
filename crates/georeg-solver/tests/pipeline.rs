use approx::assert_abs_diff_eq;
use georeg_core::{Affine, AnchorMode, Constraint, ConstraintKind, Region, Transform};
use georeg_solver::{
    compute_metrics, solve_global, solve_local, ErrorUnit, GlobalModel, LocalWarpParams,
    SolveError, SolverParams, WarpModel,
};
use nalgebra::{Point2, Vector2};

fn pair(id: u64, src: Point2<f64>, dst: Point2<f64>) -> Constraint {
    Constraint {
        id,
        kind: ConstraintKind::point_pair(src, dst),
    }
}

/// Grid of pairs following `truth` plus a smooth bump, and a square anchor.
fn bumpy_scene() -> (Vec<Constraint>, Region) {
    let truth = Affine::from_params([1.1, 0.05, -0.02, 0.95, 40.0, 15.0]);
    let mut constraints = Vec::new();
    let mut id = 1;
    for j in 0..6 {
        for i in 0..6 {
            let src = Point2::new(i as f64 * 100.0, j as f64 * 100.0);
            let bump = Vector2::new(3.0 * (src.x / 150.0).sin(), 2.0 * (src.y / 170.0).cos());
            constraints.push(pair(id, src, truth.apply(src) + bump));
            id += 1;
        }
    }
    let anchor = Region::Polygon {
        vertices: vec![
            Point2::new(210.0, 210.0),
            Point2::new(290.0, 210.0),
            Point2::new(290.0, 290.0),
            Point2::new(210.0, 290.0),
        ],
    };
    constraints.push(Constraint {
        id,
        kind: ConstraintKind::Anchor {
            region: anchor.clone(),
            mode: AnchorMode::NoWarp,
        },
    });
    (constraints, anchor)
}

#[test]
fn scenario_a_exact_affine() {
    let truth = Affine::from_params([0.9, -0.2, 0.3, 1.2, 50.0, -20.0]);
    let constraints: Vec<_> = [(10.0, 10.0), (300.0, 40.0), (60.0, 250.0)]
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| {
            let src = Point2::new(x, y);
            pair(i as u64 + 1, src, truth.apply(src))
        })
        .collect();
    let solution =
        solve_global(&constraints, GlobalModel::Affine, &SolverParams::default()).expect("solve");
    let affine = solution.stack.as_affine().expect("affine stack");
    for (got, want) in affine.params().iter().zip(truth.params()) {
        assert_abs_diff_eq!(*got, want, epsilon = 1e-6);
    }
    let metrics = compute_metrics(&solution.stack, &constraints, ErrorUnit::Pixels, None, None)
        .expect("metrics");
    assert_abs_diff_eq!(metrics.rmse, 0.0, epsilon = 1e-6);
    assert!(solution.warnings.is_empty());
}

#[test]
fn scenario_b_translation_similarity() {
    let constraints = vec![
        pair(1, Point2::new(0.0, 0.0), Point2::new(5.0, 5.0)),
        pair(2, Point2::new(10.0, 0.0), Point2::new(15.0, 5.0)),
    ];
    let solution = solve_global(&constraints, GlobalModel::Similarity, &SolverParams::default())
        .expect("solve");
    let Some(Transform::Similarity(s)) = solution.stack.global_stage() else {
        panic!("expected a similarity stage");
    };
    assert_abs_diff_eq!(s.scale, 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(s.rotation, 0.0, epsilon = 1e-9);
    assert_abs_diff_eq!(s.tx, 5.0, epsilon = 1e-9);
    assert_abs_diff_eq!(s.ty, 5.0, epsilon = 1e-9);
}

#[test]
fn scenario_c_single_constraint() {
    let constraints = vec![pair(1, Point2::new(0.0, 0.0), Point2::new(5.0, 5.0))];
    for model in [GlobalModel::Similarity, GlobalModel::Affine] {
        let err = solve_global(&constraints, model, &SolverParams::default()).unwrap_err();
        assert!(matches!(err, SolveError::InsufficientConstraints { available: 1, .. }));
    }
}

#[test]
fn repeated_solves_are_bit_identical() {
    let (constraints, _) = bumpy_scene();
    let params = SolverParams::default();
    let a = solve_global(&constraints, GlobalModel::Affine, &params).expect("solve");
    let b = solve_global(&constraints, GlobalModel::Affine, &params).expect("solve");
    assert_eq!(a, b);
}

#[test]
fn tps_holds_anchor_interior_and_inverts() {
    let (constraints, anchor) = bumpy_scene();
    let params = SolverParams::default();
    let global = solve_global(&constraints, GlobalModel::Affine, &params).expect("solve");
    let g = global.stack.global_stage().cloned().expect("global stage");
    let local = solve_local(&g, &constraints, &params.local_warp).expect("tps");
    assert!(local.stack.has_nonlinear_stage());
    // The configured lattice leaves more than 0.05 px between samples here,
    // so the anchor must have been resampled.
    let coarse = anchor.sample_points(params.local_warp.anchor_sample_spacing).len();
    assert!(local.anchor_samples > coarse, "{} samples", local.anchor_samples);

    let eps = params.local_warp.anchor_tolerance;
    for p in anchor.sample_points(1.0) {
        let d = local.stack.evaluate(p) - g.apply(p);
        assert!(d.norm() <= eps, "anchor point {p:?} moved by {:.4} px", d.norm());
    }

    // Controls are interpolated exactly with the default lambda.
    for c in constraints.iter().take(36) {
        if let ConstraintKind::PointPair { src, dst, .. } = &c.kind {
            if anchor.contains(*src) {
                continue;
            }
            let q = local.stack.evaluate(*src);
            assert!((q - dst).norm() < 1e-6);
        }
    }

    for p in [Point2::new(50.0, 60.0), Point2::new(420.0, 130.0), Point2::new(333.0, 470.0)] {
        let back = local.stack.invert(local.stack.evaluate(p)).expect("invert");
        assert!((back - p).norm() < 1e-5, "{p:?} -> {back:?}");
    }
}

#[test]
fn ffd_is_identity_inside_anchor() {
    let (constraints, anchor) = bumpy_scene();
    let params = SolverParams::default();
    let global = solve_global(&constraints, GlobalModel::Affine, &params).expect("solve");
    let g = global.stack.global_stage().cloned().expect("global stage");
    let warp = LocalWarpParams {
        model: WarpModel::Ffd,
        ffd_spacing: 50.0,
        lambda: 0.1,
        ..Default::default()
    };
    let local = solve_local(&g, &constraints, &warp).expect("ffd");
    for p in anchor.sample_points(3.0) {
        let d = local.stack.evaluate(p) - g.apply(p);
        assert!(d.norm() < 1e-9, "anchor point {p:?} moved by {d:?}");
    }
    let p = Point2::new(480.0, 90.0);
    let back = local.stack.invert(local.stack.evaluate(p)).expect("invert");
    assert!((back - p).norm() < 1e-5);
}

#[test]
fn local_warp_reduces_residuals() {
    let (constraints, _) = bumpy_scene();
    let params = SolverParams::default();
    let global = solve_global(&constraints, GlobalModel::Affine, &params).expect("solve");
    let before = compute_metrics(&global.stack, &constraints, ErrorUnit::Pixels, None, None)
        .expect("metrics");
    let g = global.stack.global_stage().cloned().expect("global stage");
    let local = solve_local(&g, &constraints, &params.local_warp).expect("tps");
    let after = compute_metrics(&local.stack, &constraints, ErrorUnit::Pixels, None, None)
        .expect("metrics");
    assert!(after.rmse < before.rmse);
}
