//! Seeded RANSAC over point correspondences.
//!
//! The loop is fully determined by the seed and the (id-ordered) input:
//! 1. draw a minimal sample of distinct indices,
//! 2. reject near-degenerate samples,
//! 3. solve the closed form and score every correspondence,
//! 4. keep the best hypothesis by inlier count, then by residual sum,
//! 5. optionally refit by least squares on the winning inliers.

use georeg_core::{ConstraintId, Transform};
use nalgebra::Point2;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::error::SolveError;
use crate::fit::fit_model;
use crate::observations::Correspondence;
use crate::params::{GlobalModel, RansacParams};
use crate::result::RansacOutcome;

#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(corrs, params), fields(correspondences = corrs.len(), model = model.label()))
)]
pub fn estimate(
    corrs: &[Correspondence],
    model: GlobalModel,
    params: &RansacParams,
) -> Result<RansacOutcome, SolveError> {
    let n = corrs.len();
    let k = model.min_points();
    if n < k {
        return Err(SolveError::InsufficientConstraints {
            model: model.label(),
            required: k,
            available: n,
        });
    }

    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let mut sample = Vec::with_capacity(k);
    let mut subset = Vec::with_capacity(k);

    let mut best: Option<(Transform, Vec<usize>, f64)> = None;
    let mut degenerate = 0usize;
    let iterations = params.max_iterations.max(1);

    for _ in 0..iterations {
        random_sample_into(&mut rng, n, k, &mut sample);
        subset.clear();
        subset.extend(sample.iter().map(|&i| corrs[i]));

        if is_degenerate(&subset, model, params) {
            degenerate += 1;
            continue;
        }
        let Some(hypothesis) = fit_model(model, &subset) else {
            degenerate += 1;
            continue;
        };

        let (inliers, residual_sum) = score(corrs, &hypothesis, params.inlier_threshold);
        let better = match &best {
            None => true,
            Some((_, best_inliers, best_sum)) => {
                inliers.len() > best_inliers.len()
                    || (inliers.len() == best_inliers.len() && residual_sum < *best_sum)
            }
        };
        if better {
            best = Some((hypothesis, inliers, residual_sum));
        }
    }

    let Some((mut model_t, mut inliers, _)) = best else {
        log::warn!("ransac: all {iterations} samples degenerate");
        return Err(SolveError::DegenerateGeometry {
            samples: degenerate,
        });
    };

    if params.refit_inliers && inliers.len() >= k {
        let inlier_corrs: Vec<Correspondence> = inliers.iter().map(|&i| corrs[i]).collect();
        if let Some(refit) = fit_model(model, &inlier_corrs) {
            let (refit_inliers, _) = score(corrs, &refit, params.inlier_threshold);
            if refit_inliers.len() >= inliers.len() {
                model_t = refit;
                inliers = refit_inliers;
            }
        }
    }

    let mut inlier_ids: Vec<ConstraintId> = inliers.iter().map(|&i| corrs[i].id).collect();
    inlier_ids.dedup();

    log::debug!(
        "ransac[{}]: {}/{} inliers after {} iterations ({} degenerate samples)",
        model.label(),
        inliers.len(),
        n,
        iterations,
        degenerate
    );

    Ok(RansacOutcome {
        model: model_t,
        inlier_ids,
        inlier_count: inliers.len(),
        iterations,
        degenerate_samples: degenerate,
    })
}

/// Sample `k` distinct indices from `0..n` into `buffer`.
fn random_sample_into<R: Rng>(rng: &mut R, n: usize, k: usize, buffer: &mut Vec<usize>) {
    debug_assert!(k <= n, "cannot sample {k} indices from {n}");
    buffer.clear();
    if k <= n / 2 {
        // Floyd's algorithm
        for j in (n - k)..n {
            let t = rng.random_range(0..=j);
            if buffer.contains(&t) {
                buffer.push(j);
            } else {
                buffer.push(t);
            }
        }
    } else {
        buffer.extend(0..n);
        buffer.shuffle(rng);
        buffer.truncate(k);
    }
}

fn is_degenerate(sample: &[Correspondence], model: GlobalModel, params: &RansacParams) -> bool {
    let pts: Vec<Point2<f64>> = sample.iter().map(|c| c.src).collect();
    for i in 0..pts.len() {
        for j in (i + 1)..pts.len() {
            if (pts[i] - pts[j]).norm() < params.min_separation {
                return true;
            }
        }
    }
    if model == GlobalModel::Affine && pts.len() >= 3 {
        let (a, b, c) = (pts[0], pts[1], pts[2]);
        let area = 0.5 * ((b - a).perp(&(c - a))).abs();
        let longest = (b - a)
            .norm_squared()
            .max((c - b).norm_squared())
            .max((a - c).norm_squared());
        if longest <= 0.0 || area / longest < params.min_triangle_ratio {
            return true;
        }
    }
    false
}

/// Indices within `threshold` and the sum of their residuals.
fn score(corrs: &[Correspondence], model: &Transform, threshold: f64) -> (Vec<usize>, f64) {
    let mut inliers = Vec::new();
    let mut sum = 0.0;
    for (i, c) in corrs.iter().enumerate() {
        let r = (model.apply(c.src) - c.dst).norm();
        if r <= threshold {
            inliers.push(i);
            sum += r;
        }
    }
    (inliers, sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use georeg_core::Affine;

    fn corr(id: u64, src: (f64, f64), dst: Point2<f64>) -> Correspondence {
        Correspondence {
            id,
            src: Point2::new(src.0, src.1),
            dst,
            weight: 1.0,
        }
    }

    fn grid_with_outliers() -> (Affine, Vec<Correspondence>) {
        let truth = Affine::from_params([0.8, 0.15, -0.1, 1.1, 40.0, 25.0]);
        let mut corrs = Vec::new();
        let mut id = 1;
        for j in 0..4 {
            for i in 0..5 {
                let src = (i as f64 * 50.0, j as f64 * 40.0);
                corrs.push(corr(id, src, truth.apply(Point2::new(src.0, src.1))));
                id += 1;
            }
        }
        // Gross outliers.
        corrs[3].dst += nalgebra::Vector2::new(80.0, -60.0);
        corrs[11].dst += nalgebra::Vector2::new(-45.0, 90.0);
        (truth, corrs)
    }

    #[test]
    fn rejects_outliers() {
        let (truth, corrs) = grid_with_outliers();
        let out = estimate(&corrs, GlobalModel::Affine, &RansacParams::default()).expect("ransac");
        assert_eq!(out.inlier_count, corrs.len() - 2);
        assert!(!out.inlier_ids.contains(&corrs[3].id));
        assert!(!out.inlier_ids.contains(&corrs[11].id));
        let a = out.model.as_affine().expect("affine");
        for (got, want) in a.params().iter().zip(truth.params()) {
            assert!((got - want).abs() < 1e-6, "{got} vs {want}");
        }
    }

    #[test]
    fn same_seed_same_result() {
        let (_, corrs) = grid_with_outliers();
        let params = RansacParams {
            refit_inliers: false,
            max_iterations: 25,
            ..Default::default()
        };
        let a = estimate(&corrs, GlobalModel::Similarity, &params).expect("ransac");
        let b = estimate(&corrs, GlobalModel::Similarity, &params).expect("ransac");
        assert_eq!(a, b);
    }

    #[test]
    fn too_few_points() {
        let corrs = [corr(1, (0.0, 0.0), Point2::new(1.0, 1.0))];
        let err = estimate(&corrs, GlobalModel::Similarity, &RansacParams::default()).unwrap_err();
        assert_eq!(
            err,
            SolveError::InsufficientConstraints {
                model: "similarity",
                required: 2,
                available: 1
            }
        );
    }

    #[test]
    fn collinear_affine_samples_are_degenerate() {
        let corrs: Vec<_> = (0..5)
            .map(|i| {
                let x = i as f64 * 10.0;
                corr(i, (x, x), Point2::new(x, 2.0 * x))
            })
            .collect();
        let params = RansacParams {
            max_iterations: 40,
            ..Default::default()
        };
        let err = estimate(&corrs, GlobalModel::Affine, &params).unwrap_err();
        assert_eq!(err, SolveError::DegenerateGeometry { samples: 40 });
    }
}
