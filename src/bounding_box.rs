use std::f64::consts::PI;

use tracing::warn;

use crate::geo::{is_valid, tile_width, LatLon, TILE_HEIGHT_DEG};

/// Web-Mercator sphere radius in meters.
pub const MERCATOR_RADIUS: f64 = 6_378_137.0;

/// The bounding box of one scenery tile, in degrees.
///
/// # Example
/// ```rust
/// # use terrasync_mirror::TileBounds;
/// let ksfo = TileBounds::of(37.62, -122.38);
/// assert_eq!((ksfo.south, ksfo.west), (37.5, -122.5));
/// assert_eq!((ksfo.north, ksfo.east), (37.625, -122.25));
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TileBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl TileBounds {
    /// Bounds of the tile containing the given point.
    ///
    /// Latitude is quantized to 1/8°, longitude to the band's tile width.
    /// Out-of-range input yields the all-zero box.
    pub fn of(lat: f64, lon: f64) -> Self {
        if !is_valid(lat, lon) {
            warn!(lat, lon, "latitude or longitude out of range");
            return Self::default();
        }

        let width = tile_width(lat);
        // the poles and the antimeridian belong to the last row/column
        let south = ((lat / TILE_HEIGHT_DEG).floor() * TILE_HEIGHT_DEG).min(90.0 - TILE_HEIGHT_DEG);
        let west = ((lon / width).floor() * width).min(180.0 - width);

        TileBounds {
            south,
            west,
            north: south + TILE_HEIGHT_DEG,
            east: west + width,
        }
    }

    /// The south-west and north-east corners as `[[lat, lon], [lat, lon]]`.
    pub fn corners(&self) -> [[f64; 2]; 2] {
        [[self.south, self.west], [self.north, self.east]]
    }

    pub fn center(&self) -> LatLon {
        LatLon::new(
            (self.south + self.north) / 2.0,
            (self.west + self.east) / 2.0,
        )
    }

    /// Whether `point` lies inside, edges included.
    pub fn contains(&self, point: LatLon) -> bool {
        const EPSILON: f64 = 1e-9;

        point.lat >= self.south - EPSILON
            && point.lat <= self.north + EPSILON
            && point.lon >= self.west - EPSILON
            && point.lon <= self.east + EPSILON
    }

    /// Reprojects the box to Web-Mercator meters.
    pub fn to_mercator(&self) -> MercatorBounds {
        MercatorBounds {
            min_x: mercator_x(self.west),
            min_y: mercator_y(self.south),
            max_x: mercator_x(self.east),
            max_y: mercator_y(self.north),
        }
    }
}

/// A box in Web-Mercator meters (EPSG:3857).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MercatorBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl MercatorBounds {
    pub fn width(&self) -> f64 {
        (self.max_x - self.min_x).abs()
    }

    pub fn height(&self) -> f64 {
        (self.max_y - self.min_y).abs()
    }

    /// Splits the box into `per_side × per_side` equal cells, ordered
    /// row-major from the south-west corner: south row first, west to east.
    pub fn split(&self, per_side: usize) -> Vec<MercatorBounds> {
        let per_side = per_side.max(1);
        let step_x = self.width() / per_side as f64;
        let step_y = self.height() / per_side as f64;

        (0..per_side)
            .flat_map(move |row| {
                (0..per_side).map(move |col| MercatorBounds {
                    min_x: self.min_x + col as f64 * step_x,
                    min_y: self.min_y + row as f64 * step_y,
                    max_x: self.min_x + (col + 1) as f64 * step_x,
                    max_y: self.min_y + (row + 1) as f64 * step_y,
                })
            })
            .collect()
    }
}

pub(crate) fn mercator_x(lon: f64) -> f64 {
    lon * PI * MERCATOR_RADIUS / 180.0
}

pub(crate) fn mercator_y(lat: f64) -> f64 {
    ((90.0 + lat) * PI / 360.0).tan().ln() * MERCATOR_RADIUS
}
