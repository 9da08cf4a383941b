use approx::assert_abs_diff_eq;
use georeg::core::{Affine, TransformError};
use georeg::solver::SolveError;
use georeg::{
    AnchorMode, ConstraintKind, CoordinateMode, ErrorUnit, Georef, GlobalModel, Region, Session,
    SessionConfig, SessionError, WarpModel,
};
use nalgebra::{Point2, Vector2};

fn pp(src: Point2<f64>, dst: Point2<f64>) -> ConstraintKind {
    ConstraintKind::point_pair(src, dst)
}

/// 5x5 control grid following an affine plus a gentle bump, and an anchor.
fn bumpy_session() -> Session {
    let truth = Affine::from_params([1.05, 0.03, -0.01, 0.97, 20.0, 35.0]);
    let mut session = Session::default();
    for j in 0..5 {
        for i in 0..5 {
            let src = Point2::new(i as f64 * 120.0, j as f64 * 120.0);
            let bump = Vector2::new(2.5 * (src.y / 140.0).sin(), 1.5 * (src.x / 160.0).cos());
            session
                .add_constraint(pp(src, truth.apply(src) + bump))
                .expect("add");
        }
    }
    session
        .add_constraint(ConstraintKind::Anchor {
            region: Region::Circle {
                center: Point2::new(180.0, 180.0),
                radius: 30.0,
            },
            mode: AnchorMode::NoWarp,
        })
        .expect("anchor");
    session
}

fn translation_session() -> Session {
    let mut session = Session::default();
    for (sx, sy) in [(0.0, 0.0), (100.0, 0.0), (0.0, 80.0), (100.0, 80.0)] {
        let src = Point2::new(sx, sy);
        session
            .add_constraint(pp(src, src + Vector2::new(5.0, 5.0)))
            .expect("add");
    }
    session
}

fn proj_value(pipeline: &str, key: &str) -> f64 {
    pipeline
        .split_whitespace()
        .find_map(|tok| tok.strip_prefix(key))
        .and_then(|v| v.parse().ok())
        .unwrap_or(f64::NAN)
}

#[test]
fn scenario_d_proj_export_rejects_spline_stage() {
    let mut session = bumpy_session();
    session
        .solve_global(GlobalModel::Affine, ErrorUnit::Pixels, None)
        .expect("global");
    let (stack, _) = session.solve_local(WarpModel::Tps, 0.0).expect("local");
    assert!(stack.has_nonlinear_stage());
    let err = session.get_proj_string(GlobalModel::Affine).unwrap_err();
    assert!(matches!(
        err,
        SessionError::Transform(TransformError::UnsupportedForProjExport { stage: 1, .. })
    ));
}

#[test]
fn scenario_e_map_units_need_a_scale() {
    let mut session = translation_session();
    let err = session
        .solve_global(GlobalModel::Affine, ErrorUnit::MapMillimeters, None)
        .unwrap_err();
    assert!(matches!(err, SessionError::Solve(SolveError::MissingMapScale)));
    assert!(session.stack().is_none());
    assert!(session.metrics().is_none());
}

#[test]
fn failed_solve_keeps_previous_solution() {
    let mut session = translation_session();
    let (stack, metrics) = session
        .solve_global(GlobalModel::Similarity, ErrorUnit::Pixels, None)
        .expect("solve");
    for id in [2, 3, 4] {
        session.delete_constraint(id).expect("delete");
    }
    let err = session
        .solve_global(GlobalModel::Affine, ErrorUnit::Pixels, None)
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Solve(SolveError::InsufficientConstraints { available: 1, .. })
    ));
    assert_eq!(session.stack(), Some(&stack));
    assert_eq!(session.metrics(), Some(&metrics));
}

#[test]
fn local_warp_reports_in_last_unit() {
    let mut session = bumpy_session();
    session.set_reference_georef(Some(Georef::new(
        [0.5, 0.0, 0.0, -0.5, 1000.0, 2000.0],
        None,
    )));
    let (_, global) = session
        .solve_global(GlobalModel::Affine, ErrorUnit::Meters, None)
        .expect("global");
    let (_, local) = session.solve_local(WarpModel::Ffd, 0.01).expect("local");
    assert_eq!(local.unit, ErrorUnit::Meters);
    assert!(local.low_confidence_scale);
    assert!(local.rmse < global.rmse);
}

#[test]
fn proj_string_is_composed_with_georef() {
    let mut session = translation_session();
    session.set_reference_georef(Some(Georef::new(
        [2.0, 0.0, 0.0, -2.0, 1000.0, 5000.0],
        None,
    )));
    // No published stack: solved on the fly and not published.
    let pipeline = session
        .get_proj_string(GlobalModel::Similarity)
        .expect("proj");
    assert!(pipeline.starts_with("+proj=pipeline +step +proj=affine"));
    assert!(session.stack().is_none());
    assert_abs_diff_eq!(proj_value(&pipeline, "+xoff="), 1010.0, epsilon = 1e-6);
    assert_abs_diff_eq!(proj_value(&pipeline, "+yoff="), 4990.0, epsilon = 1e-6);
    assert_abs_diff_eq!(proj_value(&pipeline, "+s11="), 2.0, epsilon = 1e-9);
    assert_abs_diff_eq!(proj_value(&pipeline, "+s22="), -2.0, epsilon = 1e-9);
}

#[test]
fn utm_reference_queries() {
    let mut session = Session::default();
    session.set_reference_georef(Some(Georef::new(
        [10.0, 0.0, 0.0, -10.0, 500_000.0, 5_000_000.0],
        Some("EPSG:32633".into()),
    )));
    let ll = session
        .pixel_to(0.0, 0.0, CoordinateMode::LonLat)
        .expect("lonlat");
    assert_abs_diff_eq!(ll.x, 15.0, epsilon = 1e-7);
    assert!(ll.y > 45.0 && ll.y < 45.3);

    let utm = session
        .pixel_to(12.0, 7.0, CoordinateMode::Utm)
        .expect("utm");
    assert_abs_diff_eq!(utm.x, 500_120.0, epsilon = 5e-3);
    assert_abs_diff_eq!(utm.y, 4_999_930.0, epsilon = 5e-3);

    let scale = session.metric_scale_at(0.0, 0.0).expect("scale");
    assert!(!scale.low_confidence);
    assert_abs_diff_eq!(scale.meters_per_pixel, 10.0, epsilon = 0.01);

    let info = session.reference_crs_info().expect("crs info");
    assert_eq!(info.code.as_deref(), Some("EPSG:32633"));
}

#[test]
fn json_reload_restores_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session.json");

    let mut session = Session::new(SessionConfig {
        reference_size: Some([800.0, 600.0]),
        ..Default::default()
    });
    for (s, d) in [((0.0, 0.0), (3.0, 1.0)), ((50.0, 0.0), (53.0, 2.0)), ((0.0, 40.0), (2.0, 41.0))] {
        session
            .add_constraint(pp(Point2::new(s.0, s.1), Point2::new(d.0, d.1)))
            .expect("add");
    }
    session.delete_constraint(3).expect("delete");
    session
        .add_constraint(pp(Point2::new(60.0, 60.0), Point2::new(62.0, 63.0)))
        .expect("add");
    session
        .solve_global(GlobalModel::Affine, ErrorUnit::Pixels, None)
        .expect("solve");
    session.save_json(&path).expect("save");

    let mut reopened = Session::load_json(&path).expect("load");
    assert_eq!(reopened.constraints(), session.constraints());
    assert_eq!(reopened.next_id(), 5);
    assert_eq!(reopened.stack(), session.stack());
    assert_eq!(reopened.metrics(), session.metrics());
    assert_eq!(reopened.config(), session.config());

    let list = reopened
        .add_constraint(pp(Point2::new(10.0, 10.0), Point2::new(12.0, 11.0)))
        .expect("add");
    assert_eq!(list.last().map(|c| c.id), Some(5));
}

#[test]
fn loading_the_last_possible_id_fails_cleanly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session.json");

    let mut session = Session::default();
    session
        .add_constraint(pp(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)))
        .expect("add");
    let mut snapshot = session.snapshot();
    snapshot.constraints[0].id = u64::MAX;
    snapshot.write_json(&path).expect("write");

    let err = Session::load_json(&path).unwrap_err();
    assert!(matches!(err, SessionError::IdExhausted(u64::MAX)));
}

#[test]
fn exports_need_a_solution() {
    let mut session = translation_session();
    assert!(matches!(
        session.model_transformation_tag(),
        Err(SessionError::Solve(SolveError::NoGlobalTransform))
    ));
    session
        .solve_global(GlobalModel::Similarity, ErrorUnit::Pixels, None)
        .expect("solve");
    let tag = session.model_transformation_tag().expect("tag");
    assert_abs_diff_eq!(tag[3], 5.0, epsilon = 1e-9);
    assert_abs_diff_eq!(tag[7], 5.0, epsilon = 1e-9);

    let dir = tempfile::tempdir().expect("tempdir");
    let wld = dir.path().join("scan.wld");
    session.export_world_file(&wld).expect("world file");
    let lines = georeg::geodesy::read_world_file(&wld).expect("read back");
    assert_abs_diff_eq!(lines[4], 5.0, epsilon = 1e-9);
    assert_abs_diff_eq!(lines[5], 5.0, epsilon = 1e-9);
}
