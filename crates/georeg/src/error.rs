use georeg_core::{ConstraintError, ConstraintId, TransformError};
use georeg_geodesy::GeodesyError;
use georeg_solver::SolveError;

use crate::io::SessionIoError;

/// Errors surfaced by [`crate::Session`] and the constraint store.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Constraint(#[from] ConstraintError),
    #[error(transparent)]
    Solve(#[from] SolveError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Geodesy(#[from] GeodesyError),
    #[error(transparent)]
    Persist(#[from] SessionIoError),
    #[error("no constraint with id {0}")]
    UnknownConstraint(ConstraintId),
    #[error("constraint id {id} is below the next free id {next_id}")]
    IdReused {
        id: ConstraintId,
        next_id: ConstraintId,
    },
    #[error("constraint id {0} leaves no next id")]
    IdExhausted(ConstraintId),
    #[error("smoothing weight must be finite and non-negative, got {0}")]
    InvalidSmoothing(f64),
    #[error("stack cannot be written as a world file: stage {stage} ({kind}) is not affine")]
    NotAffine { stage: usize, kind: &'static str },
}
