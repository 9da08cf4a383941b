//! Geodesy boundary for georeg.
//!
//! Holds the reference [`Georef`] (world file plus optional CRS), sidecar
//! I/O, a small WKT/EPSG parser, closed-form projections, and the
//! [`GeodesyAdapter`] that turns reference pixels into lon/lat, local metres
//! or UTM. No external PROJ installation is required; datum shifts are not
//! modelled.

mod adapter;
mod crs;
mod error;
mod georef;
pub mod projection;

pub use adapter::{
    Coordinate, CoordinateMode, CrsInfo, CrsSuggestion, DatumPolicy, GeodesyAdapter, MetricScale,
};
pub use crs::{Crs, Projection, NAD83_2011_WKT};
pub use error::GeodesyError;
pub use georef::{
    format_world_file, parse_world_file, read_prj, read_world_file, world_file_candidates,
    write_prj, write_world_file, Georef,
};
