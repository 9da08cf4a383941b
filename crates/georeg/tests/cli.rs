use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn georeg(session: &Path) -> Command {
    let mut cmd = Command::cargo_bin("georeg").expect("georeg binary");
    cmd.arg("--session").arg(session);
    cmd
}

fn add_point(session: &Path, src: &str, dst: &str) {
    georeg(session)
        .args(["add-point", "--src", src, "--dst", dst])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("added"));
}

#[test]
fn solve_and_export_a_saved_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = dir.path().join("session.json");

    add_point(&session, "0,0", "10,20");
    add_point(&session, "100,0", "110,20");
    add_point(&session, "0,50", "10,70");
    assert!(session.is_file());

    georeg(&session)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("3\tpoint_pair"));

    georeg(&session)
        .args(["solve", "--model", "affine"])
        .assert()
        .success()
        .stdout(predicate::str::contains("rmse 0.000000 pixels"));

    georeg(&session)
        .args(["proj", "--model", "affine"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("+proj=pipeline +step +proj=affine"));

    let wld = dir.path().join("scan.wld");
    georeg(&session)
        .args(["export", "--world-file"])
        .arg(&wld)
        .assert()
        .success();
    let text = std::fs::read_to_string(&wld).expect("world file");
    assert_eq!(text.lines().count(), 6);
}

#[test]
fn map_units_without_scale_fail() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = dir.path().join("session.json");
    add_point(&session, "0,0", "1,1");
    add_point(&session, "10,0", "11,1");
    add_point(&session, "0,10", "1,11");

    georeg(&session)
        .args(["solve", "--unit", "mapmm"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("MissingMapScale"));
}

#[test]
fn deleted_ids_are_not_reused() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = dir.path().join("session.json");
    add_point(&session, "0,0", "1,1");
    add_point(&session, "5,5", "6,6");

    georeg(&session)
        .args(["delete", "--id", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted 2"));

    georeg(&session)
        .args(["add-point", "--src", "7,7", "--dst", "8,8"])
        .assert()
        .success()
        .stdout(predicate::str::contains("added 3"));

    georeg(&session)
        .args(["delete", "--id", "2"])
        .assert()
        .failure();
}

#[test]
fn pixel_mode_works_without_georef() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = dir.path().join("session.json");
    georeg(&session)
        .args(["pixel-to", "--u", "12.5", "--v", "3", "--mode", "pixel"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("12.5 3"));

    georeg(&session)
        .args(["pixel-to", "--u", "1", "--v", "1", "--mode", "lonlat"])
        .assert()
        .failure();
}
