/// Rejection of a constraint at insertion time.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConstraintError {
    #[error("invalid {kind} constraint: {reason}")]
    InvalidConstraint { kind: &'static str, reason: String },
}

impl ConstraintError {
    pub(crate) fn invalid(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConstraint {
            kind,
            reason: reason.into(),
        }
    }
}

/// Errors produced while evaluating, inverting or exporting a transform stack.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("inverse of stage {stage} ({kind}) did not converge within {iterations} iterations")]
    InverseDidNotConverge {
        stage: usize,
        kind: &'static str,
        iterations: usize,
    },
    #[error("stage {stage} ({kind}) is not invertible")]
    NotInvertible { stage: usize, kind: &'static str },
    #[error("stage {stage} ({kind}) cannot be exported as an affine PROJ step")]
    UnsupportedForProjExport { stage: usize, kind: &'static str },
}
