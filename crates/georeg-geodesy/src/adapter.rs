//! Reference pixel conversions on top of a borrowed [`Georef`].

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::crs::Crs;
use crate::error::GeodesyError;
use crate::georef::Georef;
use crate::projection::{utm_zone, AzimuthalEquidistant, Ellipsoid};

/// Output space for [`GeodesyAdapter::pixel_to`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateMode {
    #[serde(rename = "pixel")]
    Pixel,
    /// Geographic, always `(lon, lat)` order.
    #[serde(rename = "lonlat")]
    LonLat,
    #[serde(rename = "local_m")]
    LocalMeters,
    #[serde(rename = "utm")]
    Utm,
}

/// Datum used for UTM output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatumPolicy {
    /// EPSG 326xx / 327xx.
    #[default]
    #[serde(rename = "WGS84")]
    Wgs84,
    /// GRS80 ellipsoid, northern zones, no EPSG code.
    #[serde(rename = "NAD83_2011")]
    Nad83_2011,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    /// Set when the value is in world units rather than true metres.
    #[serde(default)]
    pub low_confidence: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricScale {
    pub meters_per_pixel: f64,
    #[serde(default)]
    pub low_confidence: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrsSuggestion {
    pub epsg: Option<String>,
    pub proj: String,
    pub name: String,
    pub datum: String,
    pub zone: u8,
    pub north: bool,
    pub notice: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrsInfo {
    pub name: String,
    pub code: Option<String>,
    pub proj: Option<String>,
    pub wkt: Option<String>,
}

/// Query helper over a loaded reference georeference.
///
/// The CRS is parsed once on construction; an unparsable CRS behaves like a
/// missing one.
#[derive(Clone, Debug)]
pub struct GeodesyAdapter<'a> {
    georef: &'a Georef,
    crs: Option<Crs>,
    origin: Point2<f64>,
    policy: DatumPolicy,
}

impl<'a> GeodesyAdapter<'a> {
    pub fn new(georef: &'a Georef) -> Self {
        Self {
            georef,
            crs: georef.crs().ok(),
            origin: Point2::origin(),
            policy: DatumPolicy::default(),
        }
    }

    /// Reference pixel used as the local-metres origin.
    pub fn with_origin(mut self, origin: Point2<f64>) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_datum_policy(mut self, policy: DatumPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn georef(&self) -> &Georef {
        self.georef
    }

    pub fn crs(&self) -> Option<&Crs> {
        self.crs.as_ref()
    }

    pub fn origin(&self) -> Point2<f64> {
        self.origin
    }

    pub fn pixel_to_world(&self, u: f64, v: f64) -> Point2<f64> {
        self.georef.pixel_to_world(u, v)
    }

    pub fn pixel_to_lonlat(&self, u: f64, v: f64) -> Result<(f64, f64), GeodesyError> {
        let crs = self.crs.as_ref().ok_or(GeodesyError::MissingCrs)?;
        let w = self.pixel_to_world(u, v);
        Ok(crs.to_lonlat(w.x, w.y))
    }

    pub fn pixel_to(&self, u: f64, v: f64, mode: CoordinateMode) -> Result<Coordinate, GeodesyError> {
        match mode {
            CoordinateMode::Pixel => Ok(Coordinate {
                x: u,
                y: v,
                low_confidence: false,
            }),
            CoordinateMode::LonLat => {
                let (lon, lat) = self.pixel_to_lonlat(u, v)?;
                Ok(Coordinate {
                    x: lon,
                    y: lat,
                    low_confidence: false,
                })
            }
            CoordinateMode::LocalMeters => self.local_meters(u, v),
            CoordinateMode::Utm => {
                let (lon, lat) = self.pixel_to_lonlat(u, v)?;
                let (crs, _) = utm_for(self.policy, lon, lat);
                let (x, y) = crs.from_lonlat(lon, lat);
                Ok(Coordinate {
                    x,
                    y,
                    low_confidence: false,
                })
            }
        }
    }

    fn local_meters(&self, u: f64, v: f64) -> Result<Coordinate, GeodesyError> {
        match &self.crs {
            Some(crs) => {
                let (lon0, lat0) = self.pixel_to_lonlat(self.origin.x, self.origin.y)?;
                let (lon, lat) = self.pixel_to_lonlat(u, v)?;
                let aeqd = AzimuthalEquidistant::centered(lon0, lat0, &crs.ellipsoid);
                let (x, y) = aeqd.forward(lon, lat);
                Ok(Coordinate {
                    x,
                    y,
                    low_confidence: false,
                })
            }
            None => {
                let w0 = self.pixel_to_world(self.origin.x, self.origin.y);
                let w = self.pixel_to_world(u, v);
                Ok(Coordinate {
                    x: w.x - w0.x,
                    y: w.y - w0.y,
                    low_confidence: true,
                })
            }
        }
    }

    /// Metres per reference pixel at `(u, v)` by one-pixel finite differences.
    pub fn metric_scale_at(&self, u: f64, v: f64) -> Result<MetricScale, GeodesyError> {
        let step = |a: (f64, f64), b: (f64, f64)| (b.0 - a.0).hypot(b.1 - a.1);
        match &self.crs {
            Some(crs) => {
                let p0 = self.pixel_to_lonlat(u, v)?;
                let pu = self.pixel_to_lonlat(u + 1.0, v)?;
                let pv = self.pixel_to_lonlat(u, v + 1.0)?;
                let aeqd = AzimuthalEquidistant::centered(p0.0, p0.1, &crs.ellipsoid);
                let origin = aeqd.forward(p0.0, p0.1);
                let du = step(origin, aeqd.forward(pu.0, pu.1));
                let dv = step(origin, aeqd.forward(pv.0, pv.1));
                Ok(MetricScale {
                    meters_per_pixel: 0.5 * (du + dv),
                    low_confidence: false,
                })
            }
            None => {
                let w0 = self.pixel_to_world(u, v);
                let wu = self.pixel_to_world(u + 1.0, v);
                let wv = self.pixel_to_world(u, v + 1.0);
                let du = step((w0.x, w0.y), (wu.x, wu.y));
                let dv = step((w0.x, w0.y), (wv.x, wv.y));
                Ok(MetricScale {
                    meters_per_pixel: 0.5 * (du + dv),
                    low_confidence: true,
                })
            }
        }
    }

    /// Suggested UTM output CRS for the reference origin under `policy`.
    pub fn suggest_output_crs(&self, policy: DatumPolicy) -> Result<CrsSuggestion, GeodesyError> {
        let (lon, lat) = self.pixel_to_lonlat(self.origin.x, self.origin.y)?;
        Ok(utm_for(policy, lon, lat).1)
    }

    pub fn reference_crs_info(&self) -> CrsInfo {
        let wkt = self.georef.wkt.clone();
        match &self.crs {
            Some(crs) => CrsInfo {
                name: crs.name.clone(),
                code: crs.epsg.map(|c| format!("EPSG:{c}")),
                proj: Some(crs.proj_definition()),
                wkt,
            },
            None => CrsInfo {
                name: wkt
                    .as_deref()
                    .and_then(|w| w.split('[').next())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .unwrap_or("Unknown")
                    .to_string(),
                code: None,
                proj: None,
                wkt,
            },
        }
    }
}

fn utm_for(policy: DatumPolicy, lon: f64, lat: f64) -> (Crs, CrsSuggestion) {
    let zone = utm_zone(lon);
    match policy {
        DatumPolicy::Nad83_2011 => {
            let name = format!("NAD83(2011) / UTM zone {zone}N");
            let crs = Crs::utm(zone, true, Ellipsoid::GRS80, name.clone(), None);
            let suggestion = CrsSuggestion {
                epsg: None,
                proj: format!("+proj=utm +zone={zone} +ellps=GRS80 +units=m +no_defs +type=crs"),
                name,
                datum: "NAD83(2011)".into(),
                zone,
                north: true,
                notice: Some("Using NAD83(2011) UTM (no EPSG code)".into()),
            };
            (crs, suggestion)
        }
        DatumPolicy::Wgs84 => {
            let north = lat >= 0.0;
            let code = if north { 32600 } else { 32700 } + zone as u32;
            let name = format!(
                "WGS 84 / UTM zone {zone}{}",
                if north { "N" } else { "S" }
            );
            let crs = Crs::utm(zone, north, Ellipsoid::WGS84, name.clone(), Some(code));
            let suggestion = CrsSuggestion {
                epsg: Some(format!("EPSG:{code}")),
                proj: format!(
                    "+proj=utm +zone={zone}{} +datum=WGS84 +units=m +no_defs +type=crs",
                    if north { "" } else { " +south" }
                ),
                name,
                datum: "WGS84".into(),
                zone,
                north,
                notice: None,
            };
            (crs, suggestion)
        }
    }
}
