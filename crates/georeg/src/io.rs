//! JSON configuration and session persistence.

use std::fs;
use std::path::Path;

use georeg_core::{Constraint, ConstraintId, SourceBounds, TransformStack};
use georeg_geodesy::{DatumPolicy, Georef};
use georeg_solver::{QualityMetrics, SolverParams};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum SessionIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Session-wide settings. Every field is optional in JSON.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub solver: SolverParams,
    /// Datum used when suggesting or producing UTM output.
    pub datum_policy: DatumPolicy,
    /// Source document size; enables the in-bounds check on `add`.
    pub source_size: Option<SourceBounds>,
    /// Reference raster size `[width, height]` in pixels.
    pub reference_size: Option<[f64; 2]>,
    /// Reference pixel used as the local-metres origin. Defaults to the
    /// centre of `reference_size`, else pixel `(0, 0)`.
    pub local_origin: Option<Point2<f64>>,
}

impl SessionConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, SessionIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), SessionIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Origin handed to the geodesy adapter for local metres.
    pub fn resolved_origin(&self) -> Point2<f64> {
        match (self.local_origin, self.reference_size) {
            (Some(origin), _) => origin,
            (None, Some([w, h])) => Point2::new(0.5 * w, 0.5 * h),
            (None, None) => Point2::origin(),
        }
    }
}

/// Everything needed to reopen a session without recomputation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub next_id: ConstraintId,
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub stack: Option<TransformStack>,
    #[serde(default)]
    pub metrics: Option<QualityMetrics>,
    #[serde(default)]
    pub georef: Option<Georef>,
    #[serde(default)]
    pub config: SessionConfig,
}

impl SessionSnapshot {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, SessionIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), SessionIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let cfg: SessionConfig =
            serde_json::from_str(r#"{ "datum_policy": "NAD83_2011", "reference_size": [400, 200] }"#)
                .expect("config");
        assert_eq!(cfg.datum_policy, DatumPolicy::Nad83_2011);
        assert_eq!(cfg.solver, SolverParams::default());
        assert_eq!(cfg.resolved_origin(), Point2::new(200.0, 100.0));
    }

    #[test]
    fn explicit_origin_wins() {
        let cfg = SessionConfig {
            reference_size: Some([400.0, 200.0]),
            local_origin: Some(Point2::new(10.0, 20.0)),
            ..Default::default()
        };
        assert_eq!(cfg.resolved_origin(), Point2::new(10.0, 20.0));
        assert_eq!(SessionConfig::default().resolved_origin(), Point2::origin());
    }

    #[test]
    fn config_file_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let mut cfg = SessionConfig::default();
        cfg.solver.ransac.seed = 7;
        cfg.source_size = Some(SourceBounds {
            width: 800.0,
            height: 600.0,
        });
        cfg.write_json(&path).expect("write");
        assert_eq!(SessionConfig::load_json(&path).expect("load"), cfg);
    }
}
