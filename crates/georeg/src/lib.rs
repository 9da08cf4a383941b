//! High-level facade crate for the `georeg-*` workspace.
//!
//! This crate provides:
//! - stable re-exports of the core, geodesy and solver crates
//! - [`Session`], the command surface: constraint editing, global and local
//!   solves, coordinate queries, exports and JSON persistence
//! - (feature `cli`) the `georeg` binary, a thin driver over a saved session
//!
//! ## Quickstart
//!
//! ```no_run
//! use georeg::{ConstraintKind, ErrorUnit, GlobalModel, Session, SessionConfig};
//! use nalgebra::Point2;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::new(SessionConfig::default());
//! for (src, dst) in [((0.0, 0.0), (5.0, 5.0)), ((10.0, 0.0), (15.0, 5.0))] {
//!     let kind = ConstraintKind::point_pair(Point2::new(src.0, src.1), Point2::new(dst.0, dst.1));
//!     session.add_constraint(kind)?;
//! }
//! let (_stack, metrics) = session.solve_global(GlobalModel::Similarity, ErrorUnit::Pixels, None)?;
//! println!("rmse {:.3} px", metrics.rmse);
//! println!("{}", session.get_proj_string(GlobalModel::Similarity)?);
//! session.save_json("session.json")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `georeg::core`: constraints, regions, transforms and [`TransformStack`].
//! - `georeg::geodesy`: [`Georef`], CRS parsing, projections, [`GeodesyAdapter`].
//! - `georeg::solver`: RANSAC, refinement, local warps and metrics.
//! - `georeg::store`, `georeg::export`, `georeg::io`: the pieces [`Session`]
//!   is built from.

pub use georeg_core as core;
pub use georeg_geodesy as geodesy;
pub use georeg_solver as solver;

mod error;
pub mod export;
pub mod io;
mod session;
pub mod store;

pub use error::SessionError;
pub use io::{SessionConfig, SessionIoError, SessionSnapshot};
pub use session::Session;
pub use store::ConstraintStore;

pub use georeg_core::{
    AnchorMode, Constraint, ConstraintId, ConstraintKind, Region, RelationKind, SourceBounds,
    Transform, TransformStack,
};
pub use georeg_geodesy::{
    Coordinate, CoordinateMode, CrsInfo, CrsSuggestion, DatumPolicy, GeodesyAdapter, Georef,
    MetricScale,
};
pub use georeg_solver::{
    ErrorUnit, GlobalModel, QualityMetrics, SolveWarning, SolverParams, WarpModel,
};
