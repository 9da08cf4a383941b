use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use super::{Affine, Transform};
use crate::error::TransformError;

/// Ordered composition of [`Transform`] stages, applied first to last.
///
/// A solved stack maps source pixels to reference pixels; composed with a
/// georeference it maps source pixels to world coordinates.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformStack {
    pub stages: Vec<Transform>,
}

impl TransformStack {
    pub fn new(stages: Vec<Transform>) -> Self {
        Self { stages }
    }

    pub fn single(stage: impl Into<Transform>) -> Self {
        Self {
            stages: vec![stage.into()],
        }
    }

    pub fn push(&mut self, stage: impl Into<Transform>) {
        self.stages.push(stage.into());
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// The first stage, which is the global model for solved stacks.
    pub fn global_stage(&self) -> Option<&Transform> {
        self.stages.first()
    }

    pub fn evaluate(&self, p: Point2<f64>) -> Point2<f64> {
        self.stages.iter().fold(p, |acc, stage| stage.apply(acc))
    }

    /// Map a reference-space point back to source space.
    pub fn invert(&self, q: Point2<f64>) -> Result<Point2<f64>, TransformError> {
        self.stages
            .iter()
            .enumerate()
            .rev()
            .try_fold(q, |acc, (idx, stage)| stage.invert(acc, idx))
    }

    pub fn has_nonlinear_stage(&self) -> bool {
        self.stages.iter().any(Transform::is_nonlinear)
    }

    /// Collapse the stack into a single affine map; `None` if any stage is
    /// not affine. An empty stack is the identity.
    pub fn as_affine(&self) -> Option<Affine> {
        self.stages
            .iter()
            .try_fold(Affine::IDENTITY, |acc, stage| {
                stage.as_affine().map(|a| acc.then(&a))
            })
    }

    /// Append `affine` as a final stage, e.g. a pixel-to-world georeference.
    pub fn compose_with(&self, affine: &Affine) -> TransformStack {
        let mut out = self.clone();
        out.stages.push(Transform::Affine(*affine));
        out
    }

    /// Render the stack as a single-step PROJ affine pipeline.
    pub fn to_proj_pipeline(&self) -> Result<String, TransformError> {
        if let Some((stage, t)) = self
            .stages
            .iter()
            .enumerate()
            .find(|(_, t)| t.is_nonlinear())
        {
            return Err(TransformError::UnsupportedForProjExport {
                stage,
                kind: t.label(),
            });
        }
        let a = self.as_affine().unwrap_or(Affine::IDENTITY);
        Ok(format!(
            "+proj=pipeline +step +proj=affine +xoff={} +yoff={} +s11={} +s12={} +s21={} +s22={}",
            a.tx, a.ty, a.a, a.b, a.c, a.d
        ))
    }
}
