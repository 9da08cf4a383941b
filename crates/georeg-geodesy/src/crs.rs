//! Coordinate reference systems understood without an external PROJ install.
//!
//! Supported: geographic lon/lat, transverse Mercator (including UTM) and
//! web Mercator, from WKT1/WKT2 text or a handful of `EPSG:` codes.

use crate::error::GeodesyError;
use crate::projection::{web_mercator, Ellipsoid, TransverseMercator};

#[derive(Clone, Debug, PartialEq)]
pub enum Projection {
    /// World coordinates are `(lon, lat)` in degrees.
    Geographic,
    TransverseMercator(TransverseMercator),
    WebMercator,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Crs {
    pub name: String,
    pub epsg: Option<u32>,
    pub ellipsoid: Ellipsoid,
    pub projection: Projection,
    /// Metres per linear unit for projected systems.
    pub unit_to_meter: f64,
}

impl Crs {
    pub fn wgs84() -> Self {
        Self {
            name: "WGS 84".into(),
            epsg: Some(4326),
            ellipsoid: Ellipsoid::WGS84,
            projection: Projection::Geographic,
            unit_to_meter: 1.0,
        }
    }

    pub fn utm(zone: u8, north: bool, ellipsoid: Ellipsoid, name: String, epsg: Option<u32>) -> Self {
        Self {
            name,
            epsg,
            ellipsoid,
            projection: Projection::TransverseMercator(TransverseMercator::utm(
                zone, north, ellipsoid,
            )),
            unit_to_meter: 1.0,
        }
    }

    /// Parse `EPSG:<code>` or WKT.
    pub fn parse(text: &str) -> Result<Self, GeodesyError> {
        let trimmed = text.trim();
        let upper = trimmed.to_ascii_uppercase();
        if let Some(code) = upper.strip_prefix("EPSG:") {
            let code = code
                .trim()
                .parse::<u32>()
                .map_err(|_| GeodesyError::UnsupportedCrs(trimmed.to_string()))?;
            return Self::from_epsg(code);
        }
        let root = parse_wkt(trimmed)?;
        Self::from_wkt_node(&root)
    }

    pub fn from_epsg(code: u32) -> Result<Self, GeodesyError> {
        let crs = match code {
            4326 => Self::wgs84(),
            4269 | 6318 => Self {
                name: if code == 4269 { "NAD83" } else { "NAD83(2011)" }.into(),
                epsg: Some(code),
                ellipsoid: Ellipsoid::GRS80,
                projection: Projection::Geographic,
                unit_to_meter: 1.0,
            },
            3857 => Self {
                name: "WGS 84 / Pseudo-Mercator".into(),
                epsg: Some(code),
                ellipsoid: Ellipsoid::WGS84,
                projection: Projection::WebMercator,
                unit_to_meter: 1.0,
            },
            32601..=32660 => {
                let zone = (code - 32600) as u8;
                Self::utm(
                    zone,
                    true,
                    Ellipsoid::WGS84,
                    format!("WGS 84 / UTM zone {zone}N"),
                    Some(code),
                )
            }
            32701..=32760 => {
                let zone = (code - 32700) as u8;
                Self::utm(
                    zone,
                    false,
                    Ellipsoid::WGS84,
                    format!("WGS 84 / UTM zone {zone}S"),
                    Some(code),
                )
            }
            26901..=26923 => {
                let zone = (code - 26900) as u8;
                Self::utm(
                    zone,
                    true,
                    Ellipsoid::GRS80,
                    format!("NAD83 / UTM zone {zone}N"),
                    Some(code),
                )
            }
            _ => return Err(GeodesyError::UnsupportedCrs(format!("EPSG:{code}"))),
        };
        Ok(crs)
    }

    fn from_wkt_node(root: &WktNode) -> Result<Self, GeodesyError> {
        let keyword = root.keyword.to_ascii_uppercase();
        let name = root.first_string().unwrap_or("Unknown").to_string();
        let epsg = root.authority_code();
        let ellipsoid = root.find_ellipsoid().unwrap_or(Ellipsoid::WGS84);

        match keyword.as_str() {
            "GEOGCS" | "GEOGCRS" | "GEODCRS" | "GEOGRAPHICCRS" => Ok(Self {
                name,
                epsg,
                ellipsoid,
                projection: Projection::Geographic,
                unit_to_meter: 1.0,
            }),
            "PROJCS" | "PROJCRS" | "PROJECTEDCRS" => {
                let method = root
                    .find_child(&["PROJECTION", "METHOD"])
                    .and_then(WktNode::first_string)
                    .ok_or_else(|| GeodesyError::Wkt("projected CRS without a method".into()))?
                    .to_ascii_lowercase()
                    .replace([' ', '-'], "_");
                let unit_to_meter = root
                    .direct_child(&["UNIT", "LENGTHUNIT"])
                    .and_then(|u| u.number(0))
                    .unwrap_or(1.0);
                let projection = if method.contains("pseudo_mercator")
                    || method.contains("popular_visualisation")
                    || (method.contains("mercator") && name.contains("Pseudo"))
                {
                    Projection::WebMercator
                } else if method.contains("transverse_mercator") {
                    let param = |names: &[&str]| root.parameter(names);
                    Projection::TransverseMercator(TransverseMercator {
                        ellipsoid,
                        lon0: param(&["central_meridian", "longitude_of_natural_origin"])
                            .unwrap_or(0.0),
                        lat0: param(&["latitude_of_origin", "latitude_of_natural_origin"])
                            .unwrap_or(0.0),
                        k0: param(&["scale_factor", "scale_factor_at_natural_origin"])
                            .unwrap_or(1.0),
                        false_easting: param(&["false_easting"]).unwrap_or(0.0) * unit_to_meter,
                        false_northing: param(&["false_northing"]).unwrap_or(0.0) * unit_to_meter,
                    })
                } else {
                    return Err(GeodesyError::UnsupportedCrs(format!(
                        "{name}: projection method {method}"
                    )));
                };
                Ok(Self {
                    name,
                    epsg,
                    ellipsoid,
                    projection,
                    unit_to_meter,
                })
            }
            other => Err(GeodesyError::UnsupportedCrs(format!("WKT root {other}"))),
        }
    }

    /// World coordinates in this CRS to `(lon, lat)` degrees.
    pub fn to_lonlat(&self, x: f64, y: f64) -> (f64, f64) {
        match &self.projection {
            Projection::Geographic => (x, y),
            Projection::TransverseMercator(tm) => {
                tm.inverse(x * self.unit_to_meter, y * self.unit_to_meter)
            }
            Projection::WebMercator => web_mercator::inverse(x, y),
        }
    }

    /// `(lon, lat)` degrees to world coordinates in this CRS.
    pub fn from_lonlat(&self, lon: f64, lat: f64) -> (f64, f64) {
        match &self.projection {
            Projection::Geographic => (lon, lat),
            Projection::TransverseMercator(tm) => {
                let (e, n) = tm.forward(lon, lat);
                (e / self.unit_to_meter, n / self.unit_to_meter)
            }
            Projection::WebMercator => web_mercator::forward(lon, lat),
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self.projection, Projection::Geographic)
    }

    /// PROJ-style definition, informational only.
    pub fn proj_definition(&self) -> String {
        let ellps = if self.ellipsoid == Ellipsoid::GRS80 {
            "+ellps=GRS80"
        } else {
            "+datum=WGS84"
        };
        match &self.projection {
            Projection::Geographic => format!("+proj=longlat {ellps} +no_defs +type=crs"),
            Projection::TransverseMercator(tm) => format!(
                "+proj=tmerc +lat_0={} +lon_0={} +k={} +x_0={} +y_0={} {ellps} +units=m +no_defs +type=crs",
                tm.lat0, tm.lon0, tm.k0, tm.false_easting, tm.false_northing
            ),
            Projection::WebMercator => "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +nadgrids=@null +no_defs +type=crs".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum WktValue {
    Text(String),
    Number(f64),
    Keyword(String),
    Node(WktNode),
}

#[derive(Clone, Debug, PartialEq)]
struct WktNode {
    keyword: String,
    args: Vec<WktValue>,
}

impl WktNode {
    fn first_string(&self) -> Option<&str> {
        self.args.iter().find_map(|a| match a {
            WktValue::Text(s) => Some(s.as_str()),
            _ => None,
        })
    }

    fn number(&self, nth: usize) -> Option<f64> {
        self.args
            .iter()
            .filter_map(|a| match a {
                WktValue::Number(v) => Some(*v),
                _ => None,
            })
            .nth(nth)
    }

    fn children(&self) -> impl Iterator<Item = &WktNode> {
        self.args.iter().filter_map(|a| match a {
            WktValue::Node(n) => Some(n),
            _ => None,
        })
    }

    fn direct_child(&self, keywords: &[&str]) -> Option<&WktNode> {
        self.children()
            .find(|c| keywords.iter().any(|k| c.keyword.eq_ignore_ascii_case(k)))
    }

    /// Depth-first search.
    fn find_child(&self, keywords: &[&str]) -> Option<&WktNode> {
        for child in self.children() {
            if keywords.iter().any(|k| child.keyword.eq_ignore_ascii_case(k)) {
                return Some(child);
            }
            if let Some(found) = child.find_child(keywords) {
                return Some(found);
            }
        }
        None
    }

    fn find_ellipsoid(&self) -> Option<Ellipsoid> {
        let node = self.find_child(&["SPHEROID", "ELLIPSOID"])?;
        Some(Ellipsoid {
            a: node.number(0)?,
            inv_f: node.number(1)?,
        })
    }

    /// WKT1 keeps parameters on the root, WKT2 nests them in `CONVERSION`.
    fn parameter(&self, names: &[&str]) -> Option<f64> {
        for child in self.children() {
            if child.keyword.eq_ignore_ascii_case("PARAMETER") {
                let matches = child.first_string().is_some_and(|n| {
                    let n = n.to_ascii_lowercase().replace(' ', "_");
                    names.iter().any(|want| n == *want)
                });
                if matches {
                    return child.number(0);
                }
            } else if let Some(v) = child.parameter(names) {
                return Some(v);
            }
        }
        None
    }

    fn authority_code(&self) -> Option<u32> {
        let node = self.direct_child(&["AUTHORITY", "ID"])?;
        if !node.first_string()?.eq_ignore_ascii_case("EPSG") {
            return None;
        }
        node.args.iter().skip(1).find_map(|a| match a {
            WktValue::Text(s) => s.parse().ok(),
            WktValue::Number(v) if v.fract() == 0.0 && *v >= 0.0 => Some(*v as u32),
            _ => None,
        })
    }
}

struct WktParser<'a> {
    src: &'a str,
    pos: usize,
}

fn parse_wkt(text: &str) -> Result<WktNode, GeodesyError> {
    let mut parser = WktParser { src: text, pos: 0 };
    let node = parser.node()?;
    parser.skip_ws();
    if parser.pos != parser.src.len() {
        return Err(GeodesyError::Wkt(format!(
            "trailing input at byte {}",
            parser.pos
        )));
    }
    Ok(node)
}

impl WktParser<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn word(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' || c == '+' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        self.src[start..self.pos].to_string()
    }

    fn node(&mut self) -> Result<WktNode, GeodesyError> {
        self.skip_ws();
        let keyword = self.word();
        if keyword.is_empty() {
            return Err(GeodesyError::Wkt(format!("expected keyword at byte {}", self.pos)));
        }
        self.skip_ws();
        let close = match self.peek() {
            Some('[') => ']',
            Some('(') => ')',
            _ => {
                return Err(GeodesyError::Wkt(format!(
                    "expected '[' after {keyword}"
                )))
            }
        };
        self.pos += 1;
        let mut args = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(c) if c == close => {
                    self.pos += 1;
                    break;
                }
                Some(',') => {
                    self.pos += 1;
                }
                Some('"') => args.push(WktValue::Text(self.quoted()?)),
                Some(_) => {
                    let save = self.pos;
                    let word = self.word();
                    if word.is_empty() {
                        return Err(GeodesyError::Wkt(format!(
                            "unexpected character at byte {}",
                            self.pos
                        )));
                    }
                    self.skip_ws();
                    if matches!(self.peek(), Some('[') | Some('(')) {
                        self.pos = save;
                        args.push(WktValue::Node(self.node()?));
                    } else if let Ok(v) = word.parse::<f64>() {
                        args.push(WktValue::Number(v));
                    } else {
                        args.push(WktValue::Keyword(word));
                    }
                }
                None => return Err(GeodesyError::Wkt(format!("unterminated {keyword}"))),
            }
        }
        Ok(WktNode { keyword, args })
    }

    fn quoted(&mut self) -> Result<String, GeodesyError> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(GeodesyError::Wkt("unterminated string".into()));
            };
            self.pos += c.len_utf8();
            if c == '"' {
                // WKT escapes quotes by doubling them.
                if self.peek() == Some('"') {
                    self.pos += 1;
                    out.push('"');
                    continue;
                }
                return Ok(out);
            }
            out.push(c);
        }
    }
}

/// WKT for NAD83(2011) geographic coordinates.
pub const NAD83_2011_WKT: &str = "GEOGCS[\"NAD83(2011)\",DATUM[\"NAD83_National_Spatial_Reference_System_2011\",SPHEROID[\"GRS 1980\",6378137,298.257222101]],PRIMEM[\"Greenwich\",0],UNIT[\"degree\",0.0174532925199433]]";

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const UTM33N: &str = r#"PROJCS["WGS 84 / UTM zone 33N",
        GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]]],
            PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433]],
        PROJECTION["Transverse_Mercator"],
        PARAMETER["latitude_of_origin",0],PARAMETER["central_meridian",15],
        PARAMETER["scale_factor",0.9996],PARAMETER["false_easting",500000],
        PARAMETER["false_northing",0],UNIT["metre",1],AUTHORITY["EPSG","32633"]]"#;

    #[test]
    fn parses_wkt1_utm() {
        let crs = Crs::parse(UTM33N).expect("parse");
        assert_eq!(crs.name, "WGS 84 / UTM zone 33N");
        assert_eq!(crs.epsg, Some(32633));
        assert_eq!(crs.ellipsoid, Ellipsoid::WGS84);
        let Projection::TransverseMercator(tm) = crs.projection else {
            panic!("expected transverse mercator");
        };
        assert_eq!(tm.lon0, 15.0);
        assert_eq!(tm.k0, 0.9996);
    }

    #[test]
    fn parses_geographic_with_grs80() {
        let crs = Crs::parse(NAD83_2011_WKT).expect("parse");
        assert!(crs.is_geographic());
        assert_eq!(crs.ellipsoid, Ellipsoid::GRS80);
        assert_eq!(crs.to_lonlat(-100.0, 40.0), (-100.0, 40.0));
    }

    #[test]
    fn epsg_codes_match_wkt() {
        let from_code = Crs::parse("epsg:32633").expect("code");
        let from_wkt = Crs::parse(UTM33N).expect("wkt");
        assert_eq!(from_code.projection, from_wkt.projection);
        assert!(matches!(
            Crs::parse("EPSG:2154"),
            Err(GeodesyError::UnsupportedCrs(_))
        ));
    }

    #[test]
    fn utm_codes_project_known_points() {
        let crs = Crs::parse("EPSG:32631").expect("code");
        let (e, n) = crs.from_lonlat(2.294481, 48.858370);
        assert_abs_diff_eq!(e, 448_250.577, epsilon = 2e-3);
        assert_abs_diff_eq!(n, 5_411_951.588, epsilon = 2e-3);

        let crs = Crs::parse("EPSG:32733").expect("code");
        let (e, n) = crs.from_lonlat(18.4241, -33.9249);
        assert_abs_diff_eq!(e, 816_557.796, epsilon = 2e-3);
        assert_abs_diff_eq!(n, 6_240_887.996, epsilon = 2e-3);
    }

    #[test]
    fn malformed_wkt_is_an_error() {
        assert!(Crs::parse("GEOGCS[\"broken\"").is_err());
        assert!(Crs::parse("not a crs").is_err());
    }
}
