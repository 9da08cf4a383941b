//! Reference georeferencing: a pixel-to-world affine plus an optional CRS.

use std::fs;
use std::path::{Path, PathBuf};

use georeg_core::Affine;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::crs::Crs;
use crate::error::GeodesyError;

/// Pixel-to-world affine in ESRI world-file line order `[A, D, B, E, C, F]`:
/// `x = A u + B v + C`, `y = D u + E v + F`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Georef {
    pub affine: [f64; 6],
    #[serde(default)]
    pub wkt: Option<String>,
}

impl Georef {
    pub fn new(affine: [f64; 6], wkt: Option<String>) -> Self {
        Self { affine, wkt }
    }

    pub fn from_affine(t: &Affine, wkt: Option<String>) -> Self {
        Self {
            affine: [t.a, t.c, t.b, t.d, t.tx, t.ty],
            wkt,
        }
    }

    pub fn to_affine(&self) -> Affine {
        let [a, d, b, e, c, f] = self.affine;
        Affine {
            a,
            b,
            c: d,
            d: e,
            tx: c,
            ty: f,
        }
    }

    pub fn pixel_to_world(&self, u: f64, v: f64) -> Point2<f64> {
        self.to_affine().apply(Point2::new(u, v))
    }

    pub fn world_to_pixel(&self, x: f64, y: f64) -> Option<Point2<f64>> {
        self.to_affine()
            .inverse()
            .map(|inv| inv.apply(Point2::new(x, y)))
    }

    /// Parsed CRS; `MissingCrs` when absent or unparsable.
    pub fn crs(&self) -> Result<Crs, GeodesyError> {
        let wkt = self.wkt.as_deref().ok_or(GeodesyError::MissingCrs)?;
        Crs::parse(wkt).map_err(|err| {
            log::warn!("reference CRS not usable: {err}");
            GeodesyError::MissingCrs
        })
    }

    /// Load the world file and optional `.prj` sidecar next to `image`.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(image = %image.as_ref().display()))
    )]
    pub fn load_sidecars(image: impl AsRef<Path>) -> Result<Self, GeodesyError> {
        let image = image.as_ref();
        let candidates = world_file_candidates(image);
        let world = candidates
            .iter()
            .find(|p| p.is_file())
            .ok_or_else(|| GeodesyError::InvalidWorldFile {
                path: candidates
                    .first()
                    .cloned()
                    .unwrap_or_else(|| image.to_path_buf()),
                reason: "no world file found".into(),
            })?;
        let affine = read_world_file(world)?;
        let prj = image.with_extension("prj");
        let wkt = if prj.is_file() {
            Some(read_prj(&prj)?)
        } else {
            None
        };
        log::debug!(
            "loaded georeference from {} (crs: {})",
            world.display(),
            if wkt.is_some() { "yes" } else { "no" }
        );
        Ok(Self { affine, wkt })
    }
}

/// World-file sidecar names for an image, most specific first
/// (`map.tif` -> `map.tfw`, `map.tifw`, `map.wld`).
pub fn world_file_candidates(image: &Path) -> Vec<PathBuf> {
    let ext = image
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let mut out = Vec::new();
    if let (Some(first), Some(last)) = (ext.chars().next(), ext.chars().last()) {
        if ext.len() >= 2 {
            out.push(image.with_extension(format!("{first}{last}w")));
        }
        out.push(image.with_extension(format!("{ext}w")));
    }
    out.push(image.with_extension("wld"));
    out
}

pub fn parse_world_file(text: &str, path: &Path) -> Result<[f64; 6], GeodesyError> {
    let invalid = |reason: String| GeodesyError::InvalidWorldFile {
        path: path.to_path_buf(),
        reason,
    };
    let values: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if values.len() < 6 {
        return Err(invalid(format!("expected 6 values, found {}", values.len())));
    }
    let mut out = [0.0; 6];
    for (i, raw) in values.iter().take(6).enumerate() {
        let v = raw
            .parse::<f64>()
            .map_err(|_| invalid(format!("line {}: not a number: {raw}", i + 1)))?;
        if !v.is_finite() {
            return Err(invalid(format!("line {}: non-finite value", i + 1)));
        }
        out[i] = v;
    }
    Ok(out)
}

pub fn format_world_file(affine: &[f64; 6]) -> String {
    affine.iter().map(|v| format!("{v}\n")).collect()
}

pub fn read_world_file(path: impl AsRef<Path>) -> Result<[f64; 6], GeodesyError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    parse_world_file(&text, path)
}

pub fn write_world_file(path: impl AsRef<Path>, affine: &[f64; 6]) -> Result<(), GeodesyError> {
    fs::write(path, format_world_file(affine))?;
    Ok(())
}

pub fn read_prj(path: impl AsRef<Path>) -> Result<String, GeodesyError> {
    Ok(fs::read_to_string(path)?.trim().to_string())
}

pub fn write_prj(path: impl AsRef<Path>, wkt: &str) -> Result<(), GeodesyError> {
    fs::write(path, wkt.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn esri_order_maps_pixels() {
        // 2 m pixels, north-up, origin (1000, 5000).
        let g = Georef::new([2.0, 0.0, 0.0, -2.0, 1000.0, 5000.0], None);
        let w = g.pixel_to_world(10.0, 20.0);
        assert_eq!((w.x, w.y), (1020.0, 4960.0));
        let back = g.world_to_pixel(w.x, w.y).expect("invertible");
        assert!((back.x - 10.0).abs() < 1e-12 && (back.y - 20.0).abs() < 1e-12);
    }

    #[test]
    fn rotation_terms_use_line_order() {
        // Line 2 (D) rotates y with u, line 3 (B) rotates x with v.
        let g = Georef::new([1.0, 0.5, 0.25, -1.0, 0.0, 0.0], None);
        let w = g.pixel_to_world(4.0, 8.0);
        assert_eq!(w.x, 1.0 * 4.0 + 0.25 * 8.0);
        assert_eq!(w.y, 0.5 * 4.0 - 1.0 * 8.0);
        assert_eq!(Georef::from_affine(&g.to_affine(), None), g);
    }

    #[test]
    fn world_file_text_is_validated() {
        let p = Path::new("x.tfw");
        assert!(parse_world_file("1\n0\n0\n-1\n10\n", p).is_err());
        assert!(parse_world_file("1\n0\nzero\n-1\n10\n20\n", p).is_err());
        let ok = parse_world_file("  1.5\n0\n0\n-1.5\n\n10\n20\n", p).expect("valid");
        assert_eq!(ok, [1.5, 0.0, 0.0, -1.5, 10.0, 20.0]);
    }

    #[test]
    fn sidecar_candidates() {
        let c = world_file_candidates(Path::new("/data/map.tif"));
        assert_eq!(c[0], PathBuf::from("/data/map.tfw"));
        assert_eq!(c[1], PathBuf::from("/data/map.tifw"));
        assert_eq!(c[2], PathBuf::from("/data/map.wld"));
    }

    #[test]
    fn missing_or_broken_wkt_is_missing_crs() {
        let g = Georef::new([1.0, 0.0, 0.0, -1.0, 0.0, 0.0], None);
        assert!(matches!(g.crs(), Err(GeodesyError::MissingCrs)));
        let g = Georef::new([1.0, 0.0, 0.0, -1.0, 0.0, 0.0], Some("garbage".into()));
        assert!(matches!(g.crs(), Err(GeodesyError::MissingCrs)));
    }
}
