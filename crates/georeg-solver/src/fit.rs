//! Closed-form least-squares fits used for RANSAC hypotheses and refits.

use georeg_core::{Affine, Similarity, Transform};
use nalgebra::{Matrix3, Point2, Vector3};

use crate::observations::Correspondence;
use crate::params::GlobalModel;

/// Weighted Procrustes similarity. `None` when the sources are coincident.
pub fn fit_similarity(corrs: &[Correspondence]) -> Option<Similarity> {
    let wsum: f64 = corrs.iter().map(|c| c.weight).sum();
    if corrs.len() < 2 || wsum <= 0.0 {
        return None;
    }
    let (src_c, dst_c) = weighted_centroids(corrs, wsum);

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syx = 0.0;
    let mut syy = 0.0;
    let mut src_var = 0.0;
    for c in corrs {
        let r = c.src - src_c;
        let t = c.dst - dst_c;
        sxx += c.weight * r.x * t.x;
        sxy += c.weight * r.x * t.y;
        syx += c.weight * r.y * t.x;
        syy += c.weight * r.y * t.y;
        src_var += c.weight * r.norm_squared();
    }
    if src_var < 1e-12 {
        return None;
    }

    // a = s cos θ, b = s sin θ
    let a = (sxx + syy) / src_var;
    let b = (sxy - syx) / src_var;
    if a.hypot(b) <= 1e-12 {
        return None;
    }
    let tx = dst_c.x - (a * src_c.x - b * src_c.y);
    let ty = dst_c.y - (b * src_c.x + a * src_c.y);
    Some(Similarity::from_linear(a, b, tx, ty))
}

/// Weighted least-squares affine from the 3x3 normal equations, shared by
/// both output rows. `None` when the sources are collinear.
pub fn fit_affine(corrs: &[Correspondence]) -> Option<Affine> {
    if corrs.len() < 3 {
        return None;
    }
    let wsum: f64 = corrs.iter().map(|c| c.weight).sum();
    if wsum <= 0.0 {
        return None;
    }
    // Center on the weighted source centroid for conditioning.
    let (src_c, _) = weighted_centroids(corrs, wsum);

    let mut ata = Matrix3::<f64>::zeros();
    let mut atx = Vector3::<f64>::zeros();
    let mut aty = Vector3::<f64>::zeros();
    for c in corrs {
        let r = c.src - src_c;
        let row = Vector3::new(r.x, r.y, 1.0);
        ata += c.weight * row * row.transpose();
        atx += c.weight * c.dst.x * row;
        aty += c.weight * c.dst.y * row;
    }
    let scale = ata[(0, 0)] + ata[(1, 1)];
    let det = ata.determinant();
    if !det.is_finite() || det.abs() <= 1e-12 * scale.max(1.0) * scale.max(1.0) * wsum {
        return None;
    }
    let chol = ata.cholesky()?;
    let px = chol.solve(&atx);
    let py = chol.solve(&aty);

    let (a, b, c, d) = (px[0], px[1], py[0], py[1]);
    let affine = Affine {
        a,
        b,
        c,
        d,
        tx: px[2] - (a * src_c.x + b * src_c.y),
        ty: py[2] - (c * src_c.x + d * src_c.y),
    };
    affine.inverse().map(|_| affine)
}

pub fn fit_model(model: GlobalModel, corrs: &[Correspondence]) -> Option<Transform> {
    match model {
        GlobalModel::Similarity => fit_similarity(corrs).map(Transform::Similarity),
        GlobalModel::Affine => fit_affine(corrs).map(Transform::Affine),
    }
}

fn weighted_centroids(corrs: &[Correspondence], wsum: f64) -> (Point2<f64>, Point2<f64>) {
    let mut s = Point2::origin();
    let mut d = Point2::origin();
    for c in corrs {
        s.coords += c.src.coords * c.weight;
        d.coords += c.dst.coords * c.weight;
    }
    (
        Point2::from(s.coords / wsum),
        Point2::from(d.coords / wsum),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn corr(id: u64, src: (f64, f64), dst: (f64, f64)) -> Correspondence {
        Correspondence {
            id,
            src: Point2::new(src.0, src.1),
            dst: Point2::new(dst.0, dst.1),
            weight: 1.0,
        }
    }

    #[test]
    fn similarity_translation_only() {
        let corrs = [corr(1, (0.0, 0.0), (5.0, 5.0)), corr(2, (10.0, 0.0), (15.0, 5.0))];
        let s = fit_similarity(&corrs).expect("fit");
        assert_relative_eq!(s.scale, 1.0, epsilon = 1e-12);
        assert_relative_eq!(s.rotation, 0.0, epsilon = 1e-12);
        assert_relative_eq!(s.tx, 5.0, epsilon = 1e-12);
        assert_relative_eq!(s.ty, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn similarity_recovers_rotation_and_scale() {
        let truth = Similarity {
            scale: 2.5,
            rotation: 0.3,
            tx: -4.0,
            ty: 7.0,
        };
        let corrs: Vec<_> = [(0.0, 0.0), (10.0, 3.0), (-2.0, 8.0)]
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| {
                let q = truth.apply(Point2::new(x, y));
                corr(i as u64, (x, y), (q.x, q.y))
            })
            .collect();
        let s = fit_similarity(&corrs).expect("fit");
        assert_relative_eq!(s.scale, truth.scale, epsilon = 1e-10);
        assert_relative_eq!(s.rotation, truth.rotation, epsilon = 1e-10);
        assert_relative_eq!(s.tx, truth.tx, epsilon = 1e-9);
        assert_relative_eq!(s.ty, truth.ty, epsilon = 1e-9);
    }

    #[test]
    fn affine_exact_from_three_points() {
        let truth = Affine::from_params([1.2, 0.1, -0.2, 0.9, 30.0, -12.0]);
        let corrs: Vec<_> = [(0.0, 0.0), (100.0, 0.0), (0.0, 80.0)]
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| {
                let q = truth.apply(Point2::new(x, y));
                corr(i as u64, (x, y), (q.x, q.y))
            })
            .collect();
        let a = fit_affine(&corrs).expect("fit");
        for (got, want) in a.params().iter().zip(truth.params()) {
            assert_relative_eq!(*got, want, epsilon = 1e-9);
        }
    }

    #[test]
    fn collinear_sources_have_no_affine() {
        let corrs = [
            corr(1, (0.0, 0.0), (0.0, 0.0)),
            corr(2, (1.0, 1.0), (2.0, 1.0)),
            corr(3, (2.0, 2.0), (4.0, 3.0)),
        ];
        assert!(fit_affine(&corrs).is_none());
        let same = [corr(1, (3.0, 3.0), (0.0, 0.0)), corr(2, (3.0, 3.0), (1.0, 1.0))];
        assert!(fit_similarity(&same).is_none());
    }
}
