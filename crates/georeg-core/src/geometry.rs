//! Planar geometry helpers shared by the constraint model and the solvers.

use nalgebra::{Matrix3, Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Point2<f64>,
    pub max: Point2<f64>,
}

impl BoundingBox {
    /// Bounding box of a point set, `None` when the set is empty.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point2<f64>>) -> Option<Self> {
        let mut it = points.into_iter();
        let first = *it.next()?;
        let mut bb = BoundingBox {
            min: first,
            max: first,
        };
        for p in it {
            bb.include(*p);
        }
        Some(bb)
    }

    pub fn include(&mut self, p: Point2<f64>) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let mut out = *self;
        out.include(other.min);
        out.include(other.max);
        out
    }

    pub fn expanded(&self, margin: f64) -> BoundingBox {
        BoundingBox {
            min: Point2::new(self.min.x - margin, self.min.y - margin),
            max: Point2::new(self.max.x + margin, self.max.y + margin),
        }
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn diagonal(&self) -> f64 {
        self.width().hypot(self.height())
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }
}

/// A closed region of the plane used by anchors and change masks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Region {
    Polygon { vertices: Vec<Point2<f64>> },
    Circle { center: Point2<f64>, radius: f64 },
}

impl Region {
    /// Inclusive point-in-region test.
    pub fn contains(&self, p: Point2<f64>) -> bool {
        match self {
            Region::Polygon { vertices } => polygon_contains(vertices, p),
            Region::Circle { center, radius } => (p - center).norm() <= *radius,
        }
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        match self {
            Region::Polygon { vertices } => BoundingBox::from_points(vertices),
            Region::Circle { center, radius } => Some(BoundingBox {
                min: Point2::new(center.x - radius, center.y - radius),
                max: Point2::new(center.x + radius, center.y + radius),
            }),
        }
    }

    /// Points on the boundary spaced at most `spacing` apart.
    pub fn boundary_points(&self, spacing: f64) -> Vec<Point2<f64>> {
        let spacing = spacing.max(f64::EPSILON);
        match self {
            Region::Polygon { vertices } => {
                let n = vertices.len();
                let mut out = Vec::new();
                for i in 0..n {
                    let a = vertices[i];
                    let b = vertices[(i + 1) % n];
                    let steps = ((b - a).norm() / spacing).ceil().max(1.0) as usize;
                    for k in 0..steps {
                        let t = k as f64 / steps as f64;
                        out.push(a + (b - a) * t);
                    }
                }
                out
            }
            Region::Circle { center, radius } => {
                let circumference = std::f64::consts::TAU * radius;
                let steps = ((circumference / spacing).ceil() as usize).max(16);
                (0..steps)
                    .map(|k| {
                        let phi = std::f64::consts::TAU * k as f64 / steps as f64;
                        Point2::new(center.x + radius * phi.cos(), center.y + radius * phi.sin())
                    })
                    .collect()
            }
        }
    }

    /// Boundary points plus an interior lattice with the given spacing.
    ///
    /// Output order is deterministic: boundary first, then lattice rows.
    pub fn sample_points(&self, spacing: f64) -> Vec<Point2<f64>> {
        let mut out = self.boundary_points(spacing);
        let Some(bb) = self.bounding_box() else {
            return out;
        };
        let spacing = spacing.max(f64::EPSILON);
        let nx = (bb.width() / spacing).floor() as usize;
        let ny = (bb.height() / spacing).floor() as usize;
        for j in 0..ny {
            for i in 0..nx {
                let p = Point2::new(
                    bb.min.x + (i as f64 + 0.5) * spacing,
                    bb.min.y + (j as f64 + 0.5) * spacing,
                );
                if self.contains(p) {
                    out.push(p);
                }
            }
        }
        out
    }

    /// Whether the region and the closed polygon `poly` share any point.
    pub fn intersects_polygon(&self, poly: &[Point2<f64>]) -> bool {
        match self {
            Region::Circle { center, radius } => {
                polygon_contains(poly, *center)
                    || closest_point_on_polyline(poly, true, *center)
                        .is_some_and(|hit| hit.distance <= *radius)
            }
            Region::Polygon { vertices } => polygons_intersect(vertices, poly),
        }
    }
}

/// Proper or touching intersection of segments `a0-a1` and `b0-b1`.
pub fn segments_intersect(
    a0: Point2<f64>,
    a1: Point2<f64>,
    b0: Point2<f64>,
    b1: Point2<f64>,
) -> bool {
    let cross = |o: Point2<f64>, p: Point2<f64>, q: Point2<f64>| {
        (p.x - o.x) * (q.y - o.y) - (p.y - o.y) * (q.x - o.x)
    };
    let on_segment = |o: Point2<f64>, p: Point2<f64>, q: Point2<f64>| {
        q.x >= o.x.min(p.x) && q.x <= o.x.max(p.x) && q.y >= o.y.min(p.y) && q.y <= o.y.max(p.y)
    };
    let d1 = cross(b0, b1, a0);
    let d2 = cross(b0, b1, a1);
    let d3 = cross(a0, a1, b0);
    let d4 = cross(a0, a1, b1);
    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && on_segment(b0, b1, a0))
        || (d2 == 0.0 && on_segment(b0, b1, a1))
        || (d3 == 0.0 && on_segment(a0, a1, b0))
        || (d4 == 0.0 && on_segment(a0, a1, b1))
}

/// Closed polygons overlap or touch.
pub fn polygons_intersect(a: &[Point2<f64>], b: &[Point2<f64>]) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if polygon_contains(b, a[0]) || polygon_contains(a, b[0]) {
        return true;
    }
    let (na, nb) = (a.len(), b.len());
    (0..na).any(|i| {
        (0..nb).any(|j| segments_intersect(a[i], a[(i + 1) % na], b[j], b[(j + 1) % nb]))
    })
}

/// Even-odd point-in-polygon test. Points on an edge count as inside.
pub fn polygon_contains(vertices: &[Point2<f64>], p: Point2<f64>) -> bool {
    let n = vertices.len();
    if n < 3 {
        return false;
    }
    if let Some(hit) = closest_point_on_polyline(vertices, true, p) {
        if hit.distance <= 1e-9 {
            return true;
        }
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (a, b) = (vertices[i], vertices[j]);
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Signed shoelace area (positive for counter-clockwise in a y-up frame).
pub fn polygon_area(vertices: &[Point2<f64>]) -> f64 {
    let n = vertices.len();
    if n < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    for i in 0..n {
        let a = vertices[i];
        let b = vertices[(i + 1) % n];
        acc += a.x * b.y - b.x * a.y;
    }
    0.5 * acc
}

pub fn polyline_length(vertices: &[Point2<f64>]) -> f64 {
    vertices.windows(2).map(|w| (w[1] - w[0]).norm()).sum()
}

/// Arithmetic mean of the points; the origin for an empty slice.
pub fn centroid(points: &[Point2<f64>]) -> Point2<f64> {
    if points.is_empty() {
        return Point2::origin();
    }
    let mut acc = Vector2::zeros();
    for p in points {
        acc += p.coords;
    }
    Point2::from(acc / points.len() as f64)
}

/// Nearest point on a polyline (or closed polygon boundary).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundaryHit {
    pub point: Point2<f64>,
    /// Index of the segment start vertex.
    pub segment: usize,
    /// Parameter along the segment in `[0, 1]`.
    pub t: f64,
    pub distance: f64,
}

pub fn closest_point_on_polyline(
    vertices: &[Point2<f64>],
    closed: bool,
    p: Point2<f64>,
) -> Option<BoundaryHit> {
    let n = vertices.len();
    if n == 0 {
        return None;
    }
    if n == 1 {
        return Some(BoundaryHit {
            point: vertices[0],
            segment: 0,
            t: 0.0,
            distance: (p - vertices[0]).norm(),
        });
    }
    let segments = if closed { n } else { n - 1 };
    let mut best: Option<BoundaryHit> = None;
    for s in 0..segments {
        let a = vertices[s];
        let b = vertices[(s + 1) % n];
        let ab = b - a;
        let len2 = ab.norm_squared();
        let t = if len2 <= f64::EPSILON {
            0.0
        } else {
            ((p - a).dot(&ab) / len2).clamp(0.0, 1.0)
        };
        let q = a + ab * t;
        let distance = (p - q).norm();
        if best.is_none_or(|h| distance < h.distance) {
            best = Some(BoundaryHit {
                point: q,
                segment: s,
                t,
                distance,
            });
        }
    }
    best
}

/// Hartley-style isotropic normalization: translate to the centroid and scale
/// so the mean distance from it is `sqrt(2)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Normalization {
    pub center: Point2<f64>,
    pub scale: f64,
}

impl Normalization {
    pub const IDENTITY: Normalization = Normalization {
        center: Point2::new(0.0, 0.0),
        scale: 1.0,
    };

    pub fn from_points(points: &[Point2<f64>]) -> Self {
        if points.is_empty() {
            return Self::IDENTITY;
        }
        let center = centroid(points);
        let mean_dist =
            points.iter().map(|p| (p - center).norm()).sum::<f64>() / points.len() as f64;
        let scale = if mean_dist > 1e-12 {
            std::f64::consts::SQRT_2 / mean_dist
        } else {
            1.0
        };
        Self { center, scale }
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::from((p - self.center) * self.scale)
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        let s = self.scale;
        Matrix3::new(
            s,
            0.0,
            -s * self.center.x,
            0.0,
            s,
            -s * self.center.y,
            0.0,
            0.0,
            1.0,
        )
    }
}
