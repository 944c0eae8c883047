//! Mirror FlightGear TerraSync scenery to your disk.
//!
//! For every requested tile this fetches the terrain, the objects placed on
//! it together with the shared models and textures they reference, an
//! orthophoto texture assembled from satellite imagery, and the osm2city
//! overlays. Local copies that still match the mirror's `.dirindex`
//! manifests are not downloaded again.
//!
//! **Be nice to the mirrors.** They are run by volunteers; keep the rate
//! low when syncing large areas.
//!
//! # Usage
//!
//! The `terrasync-mirror` binary features a helpful CLI you can access via
//! `-h` / `--help`. It is also available as a library.
//!
//! # CLI Example
//!
//! ```bash
//! # everything within 20 miles of Zurich airport
//! terrasync-mirror tile --lat 47.46 --lon 8.55 --radius 20 --output ./scenery
//!
//! # a 10 mile corridor along a flight plan
//! terrasync-mirror plan ./LSZH-LSGG.fgfp --radius 10 --output ./scenery
//!
//! # what is stale in the local mirror
//! terrasync-mirror scan --deep --output ./scenery
//! ```
//!
//! # Library Example
//! ```rust,no_run
//! use terrasync_mirror::{sync, Config, Target};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = Config {
//!     save_root: "./scenery".into(),
//!     concurrency: 10,
//!     ..Config::default()
//! };
//!
//! let report = sync(config, Target::Tile { lat: 47.46, lon: 8.55, radius: 0.0 })
//!     .await
//!     .expect("failed syncing scenery");
//! println!("{}", report);
//! # }
//! ```

mod airport;
mod archive;
mod bounding_box;
mod config;
mod dds;
mod dedup;
mod downloader;
mod error;
mod fetch;
mod freshness;
mod geo;
mod great_circle;
mod http;
mod inventory;
mod ortho;
mod plan;
mod stg;
mod storage;
mod tile;
mod url;

pub use bounding_box::{MercatorBounds, TileBounds, MERCATOR_RADIUS};
pub use config::{
    Config, SceneryVersion, Stages, DEFAULT_MIRRORS, DEFAULT_ORTHO_RESOLUTION, MAX_SUB_TILE_SIZE,
};
pub use dds::{encode_bc3, DdsError};
pub use dedup::{Claim, TaskDedup, DEFAULT_CONCURRENCY};
pub use downloader::{Downloader, TileOutcome};
pub use error::Error;
pub use fetch::{resolve_targets, sync, sync_tiles, SyncReport, Target};
pub use freshness::{sha1_hex, DirIndex, FreshnessChecker, DIRINDEX};
pub use geo::{
    bounds_of, haversine, lat_lon_of, tile_index, tile_width, tiles_within_radius, LatLon,
    LATITUDE_BANDS, TILE_HEIGHT_DEG,
};
pub use great_circle::{points_along, GreatCircle, Points};
pub use http::{Fetch, HttpFetcher, Remote};
pub use inventory::{Inventory, TileKind, TileRecord};
pub use ortho::{fetch_orthophoto, OrthoPlan, SubTile};
pub use plan::{expand_plan, expand_route, parse_waypoints, FLIGHT_PLAN_EXTENSION};
pub use stg::{Reference, StgEntry};
pub use storage::{Overlay, RemotePath, Storage, TileFolder};
pub use tile::Tile;
pub use url::{ImageryUrl, Mirrors, DEFAULT_IMAGERY_URL};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_points_have_no_tile() {
        assert_eq!(tile_index(91.0, 0.0), 0);
        assert_eq!(tile_index(0.0, 181.0), 0);
        assert!(Tile::at(-90.5, 10.0).is_none());
    }

    #[test]
    fn tile_index_roundtrips_through_its_center() {
        let tile = Tile::at(37.62, -122.38).unwrap();
        assert_eq!(tile.index, 942_050);
        assert_eq!(tile_index(tile.center.lat, tile.center.lon), tile.index);
        assert!(tile.bounds.contains(lat_lon_of(tile.index)));
    }

    #[test]
    fn tile_folder_matches_the_index() {
        let tile = Tile::at(47.56, 8.07).unwrap();
        assert_eq!(tile.folder.path(), "e000n40/e008n47");
        assert_eq!(
            Storage::new("/s", "/t", SceneryVersion::Ws2)
                .terrain_dir(&tile.folder)
                .join(&format!("{}.stg", tile.index))
                .unwrap()
                .as_str(),
            format!("ws2/Terrain/e000n40/e008n47/{}.stg", tile.index)
        );
    }
}
