use crate::bounding_box::TileBounds;
use crate::geo::{tile_index, LatLon};
use crate::storage::TileFolder;

/// A TerraSync scenery tile: a 1/8° tall cell whose width depends on the
/// latitude band.
#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
    /// Center of the tile.
    pub center: LatLon,
    pub index: u32,
    pub folder: TileFolder,
    pub bounds: TileBounds,
}

impl Tile {
    /// The tile containing `(lat, lon)`, or `None` for out-of-range input.
    pub fn at(lat: f64, lon: f64) -> Option<Self> {
        let point = LatLon::new(lat, lon);
        if !point.is_valid() {
            return None;
        }

        let bounds = TileBounds::of(lat, lon);
        let center = bounds.center();

        Some(Self {
            center,
            index: tile_index(center.lat, center.lon),
            folder: TileFolder::of(center.lat, center.lon),
            bounds,
        })
    }
}
