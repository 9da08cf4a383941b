//! Core types for human-assisted georeferencing.
//!
//! This crate is purely geometric: it holds the constraint data model, the
//! transform variants and their composable stack, and a handful of planar
//! geometry helpers. It knows nothing about CRSs or solvers.

mod constraint;
mod error;
mod geometry;
mod logger;
mod transform;

pub use constraint::{
    AnchorMode, Constraint, ConstraintId, ConstraintKind, RelationKind, SourceBounds,
};
pub use error::{ConstraintError, TransformError};
pub use geometry::{
    centroid, closest_point_on_polyline, polygon_area, polygon_contains, polygons_intersect,
    polyline_length, segments_intersect, BoundaryHit, BoundingBox, Normalization, Region,
};
pub use transform::{
    tps_kernel, Affine, FreeFormDeformation, Homography, Similarity, ThinPlateSpline, Transform,
    TransformStack, INVERSE_MAX_ITERATIONS,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_from_env, init_with_level};
