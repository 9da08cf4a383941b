/// Failure of a solve stage. A failed solve never carries a partial model.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    #[error("{model} needs at least {required} point correspondences, got {available}")]
    InsufficientConstraints {
        model: &'static str,
        required: usize,
        available: usize,
    },
    #[error("all {samples} RANSAC samples were degenerate")]
    DegenerateGeometry { samples: usize },
    #[error("control points are degenerate: {reason}")]
    DegenerateControlPoints { reason: String },
    #[error("map-millimetre errors need a map scale denominator")]
    MissingMapScale,
    #[error("map scale denominator must be finite and positive, got {0}")]
    InvalidMapScale(f64),
    #[error("no global transform has been solved yet")]
    NoGlobalTransform,
    #[error("anchors need {samples} samples but only {budget} centres are left")]
    AnchorBudgetExceeded { samples: usize, budget: usize },
    #[error("anchor moves by {max_displacement:.4} px, tolerance is {tolerance} px")]
    AnchorDrift { max_displacement: f64, tolerance: f64 },
    #[error("linear system for {stage} is singular")]
    SingularSystem { stage: &'static str },
}
