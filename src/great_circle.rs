//! Sampling points along the shortest path between two coordinates.

use crate::geo::LatLon;

/// Below this `sin(ω)` the endpoints are treated as coincident or antipodal.
const DEGENERATE_SINE: f64 = 1e-6;

type Vec3 = [f64; 3];

/// The great-circle arc between two points on the unit sphere.
#[derive(Clone, Copy, Debug)]
pub struct GreatCircle {
    from: Vec3,
    to: Vec3,
    omega: f64,
}

impl GreatCircle {
    pub fn new(from: LatLon, to: LatLon) -> Self {
        let from = to_vector(from);
        let to = to_vector(to);
        let omega = dot(from, to).clamp(-1.0, 1.0).acos();

        Self { from, to, omega }
    }

    /// `count` evenly spaced points, both endpoints included when
    /// `count >= 2`.
    pub fn points(&self, count: usize) -> Points {
        Points {
            arc: *self,
            count,
            next: 0,
        }
    }

    /// The point at step `i` of `count`.
    ///
    /// Both weights are derived from integer step counts so a reversed arc
    /// yields bit-identical points.
    fn point(&self, i: usize, count: usize) -> LatLon {
        let (s, t) = if count <= 1 {
            (1.0, 0.0)
        } else {
            let last = (count - 1) as f64;
            ((count - 1 - i) as f64 / last, i as f64 / last)
        };

        let sin_omega = self.omega.sin();
        let blended = if sin_omega < DEGENERATE_SINE {
            add(scale(self.from, s), scale(self.to, t))
        } else {
            let a = (s * self.omega).sin() / sin_omega;
            let b = (t * self.omega).sin() / sin_omega;
            add(scale(self.from, a), scale(self.to, b))
        };

        // the midpoint of an antipodal pair blends to the zero vector
        match normalize(blended) {
            Some(v) => to_lat_lon(v),
            None => to_lat_lon(self.from),
        }
    }
}

/// Iterator over the sampled points of a [`GreatCircle`].
#[derive(Clone, Debug)]
pub struct Points {
    arc: GreatCircle,
    count: usize,
    next: usize,
}

impl Iterator for Points {
    type Item = LatLon;

    fn next(&mut self) -> Option<LatLon> {
        if self.next >= self.count {
            return None;
        }
        let point = self.arc.point(self.next, self.count);
        self.next += 1;
        Some(point)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Points {}

/// `count` points along the great circle from `(lat1, lon1)` to
/// `(lat2, lon2)`.
pub fn points_along(lat1: f64, lon1: f64, lat2: f64, lon2: f64, count: usize) -> Vec<LatLon> {
    GreatCircle::new(LatLon::new(lat1, lon1), LatLon::new(lat2, lon2))
        .points(count)
        .collect()
}

fn to_vector(point: LatLon) -> Vec3 {
    let (lat, lon) = (point.lat.to_radians(), point.lon.to_radians());
    [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
}

fn to_lat_lon(v: Vec3) -> LatLon {
    LatLon::new(
        v[2].clamp(-1.0, 1.0).asin().to_degrees(),
        v[1].atan2(v[0]).to_degrees(),
    )
}

fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn scale(v: Vec3, k: f64) -> Vec3 {
    [v[0] * k, v[1] * k, v[2] * k]
}

fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn normalize(v: Vec3) -> Option<Vec3> {
    let norm = dot(v, v).sqrt();
    if norm < 1e-12 {
        None
    } else {
        Some(scale(v, 1.0 / norm))
    }
}
