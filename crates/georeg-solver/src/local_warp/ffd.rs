use georeg_core::{BoundingBox, FreeFormDeformation, Region, Transform};
use nalgebra::{DMatrix, DVector, Point2, Vector2};

use super::ControlPoint;
use crate::error::SolveError;
use crate::params::LocalWarpParams;

/// Smoothing floor so nodes without data stay determined.
const MIN_SMOOTHING: f64 = 1e-6;

/// Fit a bilinear displacement grid to `controls`.
///
/// The grid covers the controls and anchors in reference space, padded by
/// one cell. The outer ring and every node of a cell touching an anchor are
/// fixed at zero. Returns the grid and the number of fixed nodes.
pub fn fit_ffd(
    global: &Transform,
    controls: &[ControlPoint],
    anchor_regions: &[&Region],
    params: &LocalWarpParams,
) -> Result<(FreeFormDeformation, usize), SolveError> {
    let mut extent = BoundingBox::from_points(controls.iter().map(|c| &c.position));
    for region in anchor_regions {
        for p in region.boundary_points(params.anchor_sample_spacing) {
            let q = global.apply(p);
            match extent.as_mut() {
                Some(bb) => bb.include(q),
                None => {
                    extent = Some(BoundingBox { min: q, max: q });
                }
            }
        }
    }
    let Some(extent) = extent else {
        return Err(SolveError::DegenerateControlPoints {
            reason: "no control points or anchors for the grid".into(),
        });
    };

    let (spacing, cols, rows) = grid_shape(&extent, params);
    let origin = Point2::new(extent.min.x - spacing, extent.min.y - spacing);
    let mut grid = FreeFormDeformation::zeros(origin, spacing, cols, rows);

    let fixed = fixed_nodes(&grid, global, anchor_regions)?;
    let fixed_count = fixed.iter().filter(|f| **f).count();

    // Unknown index per free node.
    let mut unknown = vec![None; cols * rows];
    let mut n = 0usize;
    for (idx, is_fixed) in fixed.iter().enumerate() {
        if !is_fixed {
            unknown[idx] = Some(n);
            n += 1;
        }
    }
    if n == 0 {
        log::debug!("ffd: every node is fixed, warp is the identity");
        return Ok((grid, fixed_count));
    }

    let mut m = DMatrix::<f64>::zeros(n, n);
    let mut bx = DVector::<f64>::zeros(n);
    let mut by = DVector::<f64>::zeros(n);

    for c in controls {
        let Some(ws) = grid.bilinear_weights(c.position) else {
            continue;
        };
        for &(ia, wa) in &ws {
            let Some(ua) = unknown[ia] else { continue };
            bx[ua] += wa * c.displacement.x;
            by[ua] += wa * c.displacement.y;
            for &(ib, wb) in &ws {
                if let Some(ub) = unknown[ib] {
                    m[(ua, ub)] += wa * wb;
                }
            }
        }
    }

    // λ Σ (d_i - d_j)² over 4-neighbour edges; fixed neighbours are zero.
    let lambda = params.lambda.max(MIN_SMOOTHING);
    for j in 0..rows {
        for i in 0..cols {
            let a = grid.node_index(i, j);
            let mut edge = |b: usize| match (unknown[a], unknown[b]) {
                (Some(ua), Some(ub)) => {
                    m[(ua, ua)] += lambda;
                    m[(ub, ub)] += lambda;
                    m[(ua, ub)] -= lambda;
                    m[(ub, ua)] -= lambda;
                }
                (Some(ua), None) => m[(ua, ua)] += lambda,
                (None, Some(ub)) => m[(ub, ub)] += lambda,
                (None, None) => {}
            };
            if i + 1 < cols {
                edge(grid.node_index(i + 1, j));
            }
            if j + 1 < rows {
                edge(grid.node_index(i, j + 1));
            }
        }
    }

    let chol = m
        .cholesky()
        .ok_or(SolveError::SingularSystem { stage: "ffd" })?;
    let dx = chol.solve(&bx);
    let dy = chol.solve(&by);
    for (idx, u) in unknown.iter().enumerate() {
        if let Some(u) = u {
            grid.displacements[idx] = Vector2::new(dx[*u], dy[*u]);
        }
    }
    log::debug!(
        "ffd: {cols}x{rows} grid at {spacing:.2} px, {n} free nodes, {fixed_count} fixed"
    );
    Ok((grid, fixed_count))
}

/// Spacing and node counts, growing the spacing until the grid respects
/// `max_ffd_nodes`.
fn grid_shape(extent: &BoundingBox, params: &LocalWarpParams) -> (f64, usize, usize) {
    let mut spacing = params.ffd_spacing.max(f64::EPSILON);
    let max_nodes = params.max_ffd_nodes.max(16);
    loop {
        let cols = (extent.width() / spacing).ceil() as usize + 3;
        let rows = (extent.height() / spacing).ceil() as usize + 3;
        if cols * rows <= max_nodes {
            if spacing > params.ffd_spacing {
                log::info!("ffd: grid spacing raised to {spacing:.2} px ({cols}x{rows} nodes)");
            }
            return (spacing, cols, rows);
        }
        spacing *= 1.25;
    }
}

/// Outer ring plus all nodes of cells whose source-space footprint touches an
/// anchor.
fn fixed_nodes(
    grid: &FreeFormDeformation,
    global: &Transform,
    anchor_regions: &[&Region],
) -> Result<Vec<bool>, SolveError> {
    let (cols, rows) = (grid.cols, grid.rows);
    let mut fixed = vec![false; cols * rows];
    for j in 0..rows {
        for i in 0..cols {
            if i == 0 || j == 0 || i + 1 == cols || j + 1 == rows {
                fixed[grid.node_index(i, j)] = true;
            }
        }
    }
    if anchor_regions.is_empty() {
        return Ok(fixed);
    }
    let to_source = |q: Point2<f64>| {
        global
            .invert(q, 0)
            .map_err(|_| SolveError::SingularSystem { stage: "ffd" })
    };
    for j in 0..rows - 1 {
        for i in 0..cols - 1 {
            let footprint = [
                to_source(grid.node_position(i, j))?,
                to_source(grid.node_position(i + 1, j))?,
                to_source(grid.node_position(i + 1, j + 1))?,
                to_source(grid.node_position(i, j + 1))?,
            ];
            if anchor_regions
                .iter()
                .any(|r| r.intersects_polygon(&footprint))
            {
                for (di, dj) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    fixed[grid.node_index(i + di, j + dj)] = true;
                }
            }
        }
    }
    Ok(fixed)
}
