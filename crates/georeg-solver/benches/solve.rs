//! Global and local solve timings on a synthetic control grid.
//!
//! Run with: cargo bench -p georeg-solver

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use georeg_core::{Affine, Constraint, ConstraintKind};
use georeg_solver::{solve_global, solve_local, GlobalModel, LocalWarpParams, SolverParams, WarpModel};
use nalgebra::{Point2, Vector2};

fn synthetic(n_side: usize) -> Vec<Constraint> {
    let truth = Affine::from_params([0.98, 0.05, -0.04, 1.02, 310.0, -75.0]);
    let mut out = Vec::new();
    let mut id = 1;
    for j in 0..n_side {
        for i in 0..n_side {
            let src = Point2::new(i as f64 * 37.0, j as f64 * 29.0);
            let wobble = Vector2::new((i as f64 * 0.7).sin(), (j as f64 * 0.9).cos()) * 1.5;
            let mut dst = truth.apply(src) + wobble;
            if id % 11 == 0 {
                dst += Vector2::new(60.0, -40.0);
            }
            out.push(Constraint {
                id,
                kind: ConstraintKind::point_pair(src, dst),
            });
            id += 1;
        }
    }
    out
}

fn bench_global(c: &mut Criterion) {
    let mut group = c.benchmark_group("solve/global");
    let params = SolverParams::default();
    for n_side in [4, 8, 16] {
        let constraints = synthetic(n_side);
        for model in [GlobalModel::Similarity, GlobalModel::Affine] {
            group.bench_with_input(
                BenchmarkId::new(model.label(), n_side * n_side),
                &constraints,
                |b, cs| b.iter(|| black_box(solve_global(cs, model, &params))),
            );
        }
    }
    group.finish();
}

fn bench_local(c: &mut Criterion) {
    let mut group = c.benchmark_group("solve/local");
    let params = SolverParams::default();
    for n_side in [4, 8, 12] {
        let constraints = synthetic(n_side);
        let Ok(global) = solve_global(&constraints, GlobalModel::Affine, &params) else {
            continue;
        };
        let Some(stage) = global.stack.global_stage().cloned() else {
            continue;
        };
        for model in [WarpModel::Tps, WarpModel::Ffd] {
            let warp = LocalWarpParams {
                model,
                ..Default::default()
            };
            group.bench_with_input(
                BenchmarkId::new(format!("{model:?}"), n_side * n_side),
                &constraints,
                |b, cs| b.iter(|| black_box(solve_local(&stage, cs, &warp))),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_global, bench_local);
criterion_main!(benches);
