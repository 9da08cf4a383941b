//! The session: one constraint set, one reference georeference and the last
//! published solution.

use std::path::Path;

use georeg_core::{Constraint, ConstraintId, ConstraintKind, Transform, TransformStack};
use georeg_geodesy::{
    Coordinate, CoordinateMode, CrsInfo, CrsSuggestion, DatumPolicy, GeodesyAdapter, GeodesyError,
    Georef, MetricScale,
};
use georeg_solver::{
    compute_metrics, ErrorUnit, GlobalModel, LocalWarpParams, QualityMetrics, SolveError,
    SolveWarning, WarpModel,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::error::SessionError;
use crate::export;
use crate::io::{SessionConfig, SessionSnapshot};
use crate::store::ConstraintStore;

/// Explicit session state. Every call takes `&self` or `&mut self`; nothing
/// is global.
///
/// Solves publish a new stack and metrics only on success, so a failed call
/// leaves the previous solution in place.
#[derive(Clone, Debug, Default)]
pub struct Session {
    config: SessionConfig,
    store: ConstraintStore,
    georef: Option<Georef>,
    stack: Option<TransformStack>,
    metrics: Option<QualityMetrics>,
}

fn make_adapter<'a>(
    georef: Option<&'a Georef>,
    config: &SessionConfig,
) -> Option<GeodesyAdapter<'a>> {
    georef.map(|g| {
        GeodesyAdapter::new(g)
            .with_origin(config.resolved_origin())
            .with_datum_policy(config.datum_policy)
    })
}

fn merge_warnings(solve: Vec<SolveWarning>, metrics: &mut QualityMetrics) {
    let mut all = solve;
    all.append(&mut metrics.warnings);
    metrics.warnings = all;
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Replace the configuration. Derived point-pair fields are recomputed
    /// since the local-metres origin may have moved.
    pub fn set_config(&mut self, config: SessionConfig) {
        self.config = config;
        let adapter = make_adapter(self.georef.as_ref(), &self.config);
        self.store.rederive(adapter.as_ref());
    }

    fn adapter(&self) -> Option<GeodesyAdapter<'_>> {
        make_adapter(self.georef.as_ref(), &self.config)
    }

    // ---- constraints -------------------------------------------------------

    pub fn add_constraint(&mut self, kind: ConstraintKind) -> Result<&[Constraint], SessionError> {
        let adapter = make_adapter(self.georef.as_ref(), &self.config);
        self.store
            .add(kind, self.config.source_size.as_ref(), adapter.as_ref())
    }

    pub fn add_constraint_with_id(
        &mut self,
        id: ConstraintId,
        kind: ConstraintKind,
    ) -> Result<&[Constraint], SessionError> {
        let adapter = make_adapter(self.georef.as_ref(), &self.config);
        self.store
            .add_with_id(id, kind, self.config.source_size.as_ref(), adapter.as_ref())
    }

    /// Remove a constraint and the relations that reference it.
    pub fn delete_constraint(&mut self, id: ConstraintId) -> Result<&[Constraint], SessionError> {
        self.store.delete(id)
    }

    pub fn constraints(&self) -> &[Constraint] {
        self.store.list()
    }

    pub fn constraint(&self, id: ConstraintId) -> Option<&Constraint> {
        self.store.get(id)
    }

    pub fn next_id(&self) -> ConstraintId {
        self.store.next_id()
    }

    // ---- solving -----------------------------------------------------------

    pub fn stack(&self) -> Option<&TransformStack> {
        self.stack.as_ref()
    }

    pub fn metrics(&self) -> Option<&QualityMetrics> {
        self.metrics.as_ref()
    }

    /// Robust global fit of every current constraint.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self), fields(constraints = self.store.len()))
    )]
    pub fn solve_global(
        &mut self,
        model: GlobalModel,
        unit: ErrorUnit,
        map_scale: Option<f64>,
    ) -> Result<(TransformStack, QualityMetrics), SessionError> {
        if unit == ErrorUnit::MapMillimeters && map_scale.is_none() {
            return Err(SolveError::MissingMapScale.into());
        }
        let solution =
            georeg_solver::solve_global(self.store.list(), model, &self.config.solver)?;
        let mut metrics = compute_metrics(
            &solution.stack,
            self.store.list(),
            unit,
            map_scale,
            self.adapter().as_ref(),
        )?;
        merge_warnings(solution.warnings, &mut metrics);
        log::info!(
            "session: global {} rmse {:.4} {} over {} constraints",
            model.label(),
            metrics.rmse,
            unit.label(),
            self.store.len()
        );
        self.stack = Some(solution.stack.clone());
        self.metrics = Some(metrics.clone());
        Ok((solution.stack, metrics))
    }

    /// Local warp on top of the published global stage, reported in the unit
    /// of the last solve.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self), fields(constraints = self.store.len()))
    )]
    pub fn solve_local(
        &mut self,
        model: WarpModel,
        lambda: f64,
    ) -> Result<(TransformStack, QualityMetrics), SessionError> {
        if !lambda.is_finite() || lambda < 0.0 {
            return Err(SessionError::InvalidSmoothing(lambda));
        }
        let global = self
            .stack
            .as_ref()
            .and_then(TransformStack::global_stage)
            .cloned()
            .ok_or(SolveError::NoGlobalTransform)?;
        let params = LocalWarpParams {
            model,
            lambda,
            ..self.config.solver.local_warp.clone()
        };
        let (unit, map_scale) = self
            .metrics
            .as_ref()
            .map_or((ErrorUnit::Pixels, None), |m| (m.unit, m.map_scale));

        let solution = georeg_solver::solve_local(&global, self.store.list(), &params)?;
        let mut metrics = compute_metrics(
            &solution.stack,
            self.store.list(),
            unit,
            map_scale,
            self.adapter().as_ref(),
        )?;
        merge_warnings(solution.warnings, &mut metrics);
        log::info!(
            "session: local {:?} rmse {:.4} {} ({} controls)",
            model,
            metrics.rmse,
            unit.label(),
            solution.control_points
        );
        self.stack = Some(solution.stack.clone());
        self.metrics = Some(metrics.clone());
        Ok((solution.stack, metrics))
    }

    /// PROJ pipeline for `model`, composed with the reference georeference
    /// when one is set.
    ///
    /// Uses the published stack when its global stage is of the requested
    /// kind; otherwise runs a fresh global solve that is not published.
    pub fn get_proj_string(&self, model: GlobalModel) -> Result<String, SessionError> {
        let published = self.stack.as_ref().filter(|s| {
            matches!(
                (model, s.global_stage()),
                (GlobalModel::Similarity, Some(Transform::Similarity(_)))
                    | (GlobalModel::Affine, Some(Transform::Affine(_)))
            )
        });
        let stack = match published {
            Some(stack) => stack.clone(),
            None => {
                log::debug!("session: no published {} stack, solving", model.label());
                georeg_solver::solve_global(self.store.list(), model, &self.config.solver)?.stack
            }
        };
        let composed = match &self.georef {
            Some(g) => stack.compose_with(&g.to_affine()),
            None => stack,
        };
        Ok(composed.to_proj_pipeline()?)
    }

    // ---- geodesy -----------------------------------------------------------

    /// Convert a reference pixel. `Pixel` mode works without a georeference.
    pub fn pixel_to(&self, u: f64, v: f64, mode: CoordinateMode) -> Result<Coordinate, SessionError> {
        match (self.adapter(), mode) {
            (Some(adapter), _) => Ok(adapter.pixel_to(u, v, mode)?),
            (None, CoordinateMode::Pixel) => Ok(Coordinate {
                x: u,
                y: v,
                low_confidence: false,
            }),
            (None, _) => Err(GeodesyError::MissingGeoref.into()),
        }
    }

    pub fn metric_scale_at(&self, u: f64, v: f64) -> Result<MetricScale, SessionError> {
        let adapter = self.adapter().ok_or(GeodesyError::MissingGeoref)?;
        Ok(adapter.metric_scale_at(u, v)?)
    }

    pub fn get_reference_georef(&self) -> Option<&Georef> {
        self.georef.as_ref()
    }

    /// Replace (or clear) the reference georeference and re-derive the
    /// world and local-metre fields of every point pair.
    pub fn set_reference_georef(&mut self, georef: Option<Georef>) {
        self.georef = georef;
        let adapter = make_adapter(self.georef.as_ref(), &self.config);
        self.store.rederive(adapter.as_ref());
        log::info!(
            "session: reference georeference {}",
            if self.georef.is_some() { "set" } else { "cleared" }
        );
    }

    /// Load the world file and `.prj` sidecars of a reference image.
    pub fn load_reference_sidecars(&mut self, image: impl AsRef<Path>) -> Result<(), SessionError> {
        let georef = Georef::load_sidecars(image)?;
        self.set_reference_georef(Some(georef));
        Ok(())
    }

    pub fn suggest_output_crs(&self, policy: DatumPolicy) -> Result<CrsSuggestion, SessionError> {
        let adapter = self.adapter().ok_or(GeodesyError::MissingGeoref)?;
        Ok(adapter.suggest_output_crs(policy)?)
    }

    pub fn reference_crs_info(&self) -> Option<CrsInfo> {
        self.adapter().map(|a| a.reference_crs_info())
    }

    // ---- exports -----------------------------------------------------------

    fn published(&self) -> Result<&TransformStack, SessionError> {
        self.stack
            .as_ref()
            .ok_or(SessionError::Solve(SolveError::NoGlobalTransform))
    }

    pub fn export_world_file(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        export::export_world_file(path, self.published()?, self.georef.as_ref())
    }

    pub fn export_prj(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        export::export_prj(path, self.georef.as_ref())
    }

    pub fn model_transformation_tag(&self) -> Result<[f64; 16], SessionError> {
        export::model_transformation_tag(self.published()?, self.georef.as_ref())
    }

    // ---- persistence -------------------------------------------------------

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            next_id: self.store.next_id(),
            constraints: self.store.list().to_vec(),
            stack: self.stack.clone(),
            metrics: self.metrics.clone(),
            georef: self.georef.clone(),
            config: self.config.clone(),
        }
    }

    /// Restore a snapshot as saved; nothing is recomputed.
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Result<Self, SessionError> {
        Ok(Self {
            store: ConstraintStore::from_parts(snapshot.next_id, snapshot.constraints)?,
            config: snapshot.config,
            georef: snapshot.georef,
            stack: snapshot.stack,
            metrics: snapshot.metrics,
        })
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        self.snapshot().write_json(path)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        Self::from_snapshot(SessionSnapshot::load_json(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point2;

    #[test]
    fn solve_local_needs_a_global_stack() {
        let mut session = Session::default();
        let err = session.solve_local(WarpModel::Tps, 0.0).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Solve(SolveError::NoGlobalTransform)
        ));
        assert!(matches!(
            session.solve_local(WarpModel::Tps, -1.0),
            Err(SessionError::InvalidSmoothing(_))
        ));
    }

    #[test]
    fn pixel_mode_without_georef() {
        let session = Session::default();
        let c = session
            .pixel_to(3.0, 4.0, CoordinateMode::Pixel)
            .expect("pixel");
        assert_eq!((c.x, c.y), (3.0, 4.0));
        assert!(matches!(
            session.pixel_to(3.0, 4.0, CoordinateMode::LonLat),
            Err(SessionError::Geodesy(GeodesyError::MissingGeoref))
        ));
    }

    #[test]
    fn setting_a_georef_rederives_point_pairs() {
        let mut session = Session::default();
        session
            .add_constraint(ConstraintKind::point_pair(
                Point2::new(1.0, 1.0),
                Point2::new(10.0, 10.0),
            ))
            .expect("add");
        session.set_reference_georef(Some(Georef::new(
            [1.0, 0.0, 0.0, -1.0, 500.0, 900.0],
            None,
        )));
        let ConstraintKind::PointPair { dst_real, .. } = &session.constraints()[0].kind else {
            panic!("expected a point pair");
        };
        assert_eq!(*dst_real, Some(Point2::new(510.0, 890.0)));
    }
}
