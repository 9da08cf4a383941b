//! Closed-form map projections.
//!
//! Angles are in degrees at the public boundary and radians inside.

use serde::{Deserialize, Serialize};

/// Reference ellipsoid given by semi-major axis and inverse flattening.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ellipsoid {
    pub a: f64,
    pub inv_f: f64,
}

impl Ellipsoid {
    pub const WGS84: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        inv_f: 298.257_223_563,
    };
    pub const GRS80: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        inv_f: 298.257_222_101,
    };

    pub fn flattening(&self) -> f64 {
        if self.inv_f == 0.0 {
            0.0
        } else {
            1.0 / self.inv_f
        }
    }

    /// First eccentricity squared.
    pub fn e2(&self) -> f64 {
        let f = self.flattening();
        f * (2.0 - f)
    }

    /// `sqrt(M N)` at the given latitude (degrees).
    pub fn gaussian_mean_radius(&self, lat_deg: f64) -> f64 {
        let e2 = self.e2();
        let s = lat_deg.to_radians().sin();
        self.a * (1.0 - e2).sqrt() / (1.0 - e2 * s * s)
    }
}

/// Transverse Mercator parameters. Easting/northing in metres.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransverseMercator {
    pub ellipsoid: Ellipsoid,
    pub lon0: f64,
    pub lat0: f64,
    pub k0: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

/// UTM zone (1..=60) containing `lon`.
pub fn utm_zone(lon: f64) -> u8 {
    (((lon + 180.0) / 6.0).floor() as i64).clamp(0, 59) as u8 + 1
}

pub fn utm_central_meridian(zone: u8) -> f64 {
    zone as f64 * 6.0 - 183.0
}

/// Krüger series coefficients to third order in `n`.
struct KruegerSeries {
    /// Rectifying radius `A`.
    radius: f64,
    alpha: [f64; 3],
    beta: [f64; 3],
    delta: [f64; 3],
    e: f64,
}

impl KruegerSeries {
    fn new(ell: &Ellipsoid) -> Self {
        let f = ell.flattening();
        let n = f / (2.0 - f);
        let (n2, n3) = (n * n, n * n * n);
        Self {
            radius: ell.a / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0),
            alpha: [
                n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
                13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
                61.0 * n3 / 240.0,
            ],
            beta: [
                n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0,
                n2 / 48.0 + n3 / 15.0,
                17.0 * n3 / 480.0,
            ],
            delta: [
                2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3,
                7.0 * n2 / 3.0 - 8.0 * n3 / 5.0,
                56.0 * n3 / 15.0,
            ],
            e: ell.e2().sqrt(),
        }
    }

    /// Conformal-sphere coordinates `(ξ', η')` for a longitude offset.
    fn conformal(&self, lat: f64, dlon: f64) -> (f64, f64) {
        let s = lat.sin();
        let t = (s.atanh() - self.e * (self.e * s).atanh()).sinh();
        let xi = t.atan2(dlon.cos());
        let eta = (dlon.sin() / (1.0 + t * t).sqrt()).atanh();
        (xi, eta)
    }

    /// Scaled `(ξ, η)` after the forward series.
    fn forward(&self, lat: f64, dlon: f64) -> (f64, f64) {
        let (xi_p, eta_p) = self.conformal(lat, dlon);
        let mut xi = xi_p;
        let mut eta = eta_p;
        for (j, a) in self.alpha.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi += a * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += a * (k * xi_p).cos() * (k * eta_p).sinh();
        }
        (xi, eta)
    }
}

impl TransverseMercator {
    pub fn utm(zone: u8, north: bool, ellipsoid: Ellipsoid) -> Self {
        Self {
            ellipsoid,
            lon0: utm_central_meridian(zone),
            lat0: 0.0,
            k0: 0.9996,
            false_easting: 500_000.0,
            false_northing: if north { 0.0 } else { 10_000_000.0 },
        }
    }

    fn northing_origin(&self, series: &KruegerSeries) -> f64 {
        if self.lat0 == 0.0 {
            return 0.0;
        }
        let (xi0, _) = series.forward(self.lat0.to_radians(), 0.0);
        self.k0 * series.radius * xi0
    }

    /// `(lon, lat)` in degrees to `(easting, northing)`.
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let series = KruegerSeries::new(&self.ellipsoid);
        let dlon = (lon - self.lon0).to_radians();
        let (xi, eta) = series.forward(lat.to_radians(), dlon);
        let scale = self.k0 * series.radius;
        (
            self.false_easting + scale * eta,
            self.false_northing + scale * xi - self.northing_origin(&series),
        )
    }

    /// `(easting, northing)` to `(lon, lat)` in degrees.
    pub fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let series = KruegerSeries::new(&self.ellipsoid);
        let scale = self.k0 * series.radius;
        let xi = (northing - self.false_northing + self.northing_origin(&series)) / scale;
        let eta = (easting - self.false_easting) / scale;

        let mut xi_p = xi;
        let mut eta_p = eta;
        for (j, b) in series.beta.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi_p -= b * (k * xi).sin() * (k * eta).cosh();
            eta_p -= b * (k * xi).cos() * (k * eta).sinh();
        }
        let chi = (xi_p.sin() / eta_p.cosh()).asin();
        let mut lat = chi;
        for (j, d) in series.delta.iter().enumerate() {
            lat += d * (2.0 * (j + 1) as f64 * chi).sin();
        }
        let dlon = eta_p.sinh().atan2(xi_p.cos());
        (self.lon0 + dlon.to_degrees(), lat.to_degrees())
    }
}

/// Spherical azimuthal equidistant projection about a fixed centre.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AzimuthalEquidistant {
    pub lon0: f64,
    pub lat0: f64,
    pub radius: f64,
}

impl AzimuthalEquidistant {
    /// Centred at `(lon0, lat0)` on the ellipsoid's Gaussian mean radius there.
    pub fn centered(lon0: f64, lat0: f64, ellipsoid: &Ellipsoid) -> Self {
        Self {
            lon0,
            lat0,
            radius: ellipsoid.gaussian_mean_radius(lat0),
        }
    }

    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let (phi0, phi) = (self.lat0.to_radians(), lat.to_radians());
        let dlon = (lon - self.lon0).to_radians();
        let cos_c = (phi0.sin() * phi.sin() + phi0.cos() * phi.cos() * dlon.cos()).clamp(-1.0, 1.0);
        let c = cos_c.acos();
        let k = if c.abs() < 1e-12 { 1.0 } else { c / c.sin() };
        (
            self.radius * k * phi.cos() * dlon.sin(),
            self.radius * k * (phi0.cos() * phi.sin() - phi0.sin() * phi.cos() * dlon.cos()),
        )
    }

    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let rho = x.hypot(y);
        if rho < 1e-12 {
            return (self.lon0, self.lat0);
        }
        let phi0 = self.lat0.to_radians();
        let c = rho / self.radius;
        let (sin_c, cos_c) = c.sin_cos();
        let lat = (cos_c * phi0.sin() + y * sin_c * phi0.cos() / rho).clamp(-1.0, 1.0).asin();
        let dlon = (x * sin_c).atan2(rho * phi0.cos() * cos_c - y * phi0.sin() * sin_c);
        (self.lon0 + dlon.to_degrees(), lat.to_degrees())
    }
}

/// Spherical ("pseudo") Mercator used by web tiles, EPSG:3857.
pub mod web_mercator {
    const RADIUS: f64 = 6_378_137.0;

    pub fn forward(lon: f64, lat: f64) -> (f64, f64) {
        let phi = lat.to_radians();
        (
            RADIUS * lon.to_radians(),
            RADIUS * (std::f64::consts::FRAC_PI_4 + phi / 2.0).tan().ln(),
        )
    }

    pub fn inverse(x: f64, y: f64) -> (f64, f64) {
        let lat = 2.0 * (y / RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2;
        ((x / RADIUS).to_degrees(), lat.to_degrees())
    }
}
