use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum GeodesyError {
    #[error("reference CRS is missing or could not be parsed")]
    MissingCrs,
    #[error("unsupported CRS: {0}")]
    UnsupportedCrs(String),
    #[error("no reference georeference loaded")]
    MissingGeoref,
    #[error("invalid world file {path}: {reason}")]
    InvalidWorldFile { path: PathBuf, reason: String },
    #[error("malformed WKT: {0}")]
    Wkt(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
