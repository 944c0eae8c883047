//! Mapping between geographic coordinates and the TerraSync tile grid.
//!
//! Tiles are always 1/8° tall. Their width depends on the latitude band the
//! tile lives in, growing from 1/8° near the equator to 12° at the poles.
//!
//! None of these functions fail on bad input. Coordinates outside
//! `[-90, 90] × [-180, 180]` produce a warning and a zero/empty result, since
//! they are called from tight loops over whole routes.

use std::{
    collections::HashSet,
    hash::{Hash, Hasher},
};

use tracing::warn;

use crate::bounding_box::TileBounds;

/// Height of every tile in degrees of latitude.
pub const TILE_HEIGHT_DEG: f64 = 0.125;

const EARTH_RADIUS_MILES: f64 = 3963.19;
const EARTH_CIRCUMFERENCE_MILES: f64 = 24880.598;

/// `(minimum |latitude|, tile width in degrees)`, scanned from the pole
/// towards the equator. The first threshold the latitude meets wins.
pub const LATITUDE_BANDS: [(f64, f64); 7] = [
    (89.0, 12.0),
    (86.0, 4.0),
    (83.0, 2.0),
    (76.0, 1.0),
    (62.0, 0.5),
    (22.0, 0.25),
    (0.0, 0.125),
];

/// A point in degrees.
///
/// Equality and hashing are bitwise, so sets of tile centers deduplicate on
/// the exact value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        is_valid(self.lat, self.lon)
    }
}

impl Eq for LatLon {}

impl Hash for LatLon {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // `+ 0.0` folds -0.0 into 0.0 so hashing agrees with `==`
        (self.lat + 0.0).to_bits().hash(state);
        (self.lon + 0.0).to_bits().hash(state);
    }
}

pub(crate) fn is_valid(lat: f64, lon: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Width in degrees of longitude of the tiles at the given latitude.
pub fn tile_width(lat: f64) -> f64 {
    let lookup = lat.abs();
    LATITUDE_BANDS
        .iter()
        .find(|(threshold, _)| lookup >= *threshold)
        .map(|(_, width)| *width)
        .unwrap_or(TILE_HEIGHT_DEG)
}

/// Packs the tile containing `(lat, lon)` into its index.
///
/// Layout, low bits first: 3 bits column within the base cell, 3 bits row in
/// eighths of a degree, 8 bits `floor(lat) + 90`, then `base_lon + 180` where
/// `base_lon` is the longitude snapped to the band's grid.
///
/// Returns `0` for out-of-range coordinates.
pub fn tile_index(lat: f64, lon: f64) -> u32 {
    if !is_valid(lat, lon) {
        warn!(lat, lon, "latitude or longitude out of range");
        return 0;
    }

    let width = tile_width(lat);
    let base_x = ((lon / width).floor() * width).floor();
    let x = ((lon - base_x) / width).floor() as u32;
    let base_y = lat.floor();
    let y = ((lat - base_y) * 8.0).trunc() as u32;

    (((base_x as i32 + 180) as u32) << 14) | (((base_y as i32 + 90) as u32) << 6) | (y << 3) | x
}

/// Unpacks a tile index into the tile's south-west anchor point.
///
/// The index does not store the tile width, so it is recovered from the
/// band of the row's middle latitude. That matches the encoder everywhere
/// except for a point lying exactly on a southern band threshold
/// (`-22.0`, `-62.0`, ...): [`tile_index`] takes the width from the point
/// itself, i.e. the wider band, while the rest of that row uses the narrower
/// one. Such an index decodes with the narrower width and its anchor can
/// fall outside the tile's bounds.
pub fn lat_lon_of(index: u32) -> LatLon {
    let x = index & 0b111;
    let y = (index >> 3) & 0b111;
    let base_y = ((index >> 6) & 0xff) as i32 - 90;
    let base_x = ((index >> 14) & 0x1ff) as i32 - 180;

    let lat = f64::from(base_y) + f64::from(y) / 8.0;
    // the band is taken from the row's middle so southern rows sitting on a
    // band threshold resolve to the same width the encoder used
    let width = tile_width(lat + TILE_HEIGHT_DEG / 2.0);

    LatLon::new(lat, f64::from(base_x) + f64::from(x) * width)
}

/// Bounding box of the tile containing `(lat, lon)`.
pub fn bounds_of(lat: f64, lon: f64) -> TileBounds {
    TileBounds::of(lat, lon)
}

/// Great-circle distance in miles.
///
/// Note the argument order: both latitudes first, then both longitudes.
pub fn haversine(lat1: f64, lat2: f64, lon1: f64, lon2: f64) -> f64 {
    if !is_valid(lat1, lon1) || !is_valid(lat2, lon2) {
        warn!(lat1, lon1, lat2, lon2, "latitude or longitude out of range");
        return 0.0;
    }

    let (lat1, lat2) = (lat1.to_radians(), lat2.to_radians());
    let (lon1, lon2) = (lon1.to_radians(), lon2.to_radians());

    let sdlat = ((lat2 - lat1) / 2.0).sin();
    let sdlon = ((lon2 - lon1) / 2.0).sin();
    let q = sdlat * sdlat + lat1.cos() * lat2.cos() * sdlon * sdlon;

    2.0 * EARTH_RADIUS_MILES * q.sqrt().min(1.0).asin()
}

/// Centers of all tiles whose center lies within `radius_miles` of the center
/// of the tile containing `(lat, lon)`.
pub fn tiles_within_radius(lat: f64, lon: f64, radius_miles: f64) -> HashSet<LatLon> {
    let mut tiles = HashSet::new();

    if !is_valid(lat, lon) {
        warn!(lat, lon, "latitude or longitude out of range");
        return tiles;
    }
    if !(radius_miles >= 0.0) {
        warn!(radius_miles, "radius must be a non-negative number of miles");
        return tiles;
    }

    let center = TileBounds::of(lat, lon).center();
    let lat_span = radius_miles / EARTH_CIRCUMFERENCE_MILES * 360.0;
    let lon_span = (radius_miles / (EARTH_CIRCUMFERENCE_MILES * center.lat.to_radians().cos())
        * 360.0)
        .min(180.0);

    let mut row = center.lat - lat_span;
    while row <= center.lat + lat_span {
        if row.abs() <= 90.0 {
            let step = tile_width(row);
            let mut col = center.lon - lon_span;

            while col <= center.lon + lon_span {
                let candidate = TileBounds::of(row, wrap_longitude(col)).center();
                if haversine(candidate.lat, center.lat, candidate.lon, center.lon) <= radius_miles {
                    tiles.insert(candidate);
                }
                col += step;
            }
        }
        row += TILE_HEIGHT_DEG;
    }

    tiles
}

fn wrap_longitude(lon: f64) -> f64 {
    if (-180.0..=180.0).contains(&lon) {
        lon
    } else {
        (lon + 180.0).rem_euclid(360.0) - 180.0
    }
}
