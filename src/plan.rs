//! Turning a FlightGear flight plan into the tiles along its route.

use std::{collections::HashSet, path::Path};

use tracing::{debug, warn};

use crate::error::Error;
use crate::geo::{haversine, tiles_within_radius, LatLon};
use crate::great_circle::GreatCircle;

/// The only route format understood.
pub const FLIGHT_PLAN_EXTENSION: &str = "fgfp";

/// Spacing of the sampled points along each leg.
const MILES_PER_POINT: f64 = 5.0;

/// Reads the ordered waypoints of an `.fgfp` document.
///
/// Each `<wp>` element must carry `<lat>` and `<lon>` children.
pub fn parse_waypoints(text: &str) -> Result<Vec<LatLon>, String> {
    let doc = roxmltree::Document::parse(text).map_err(|e| e.to_string())?;

    doc.descendants()
        .filter(|node| node.has_tag_name("wp"))
        .enumerate()
        .map(|(i, wp)| {
            let field = |name: &str| -> Result<f64, String> {
                let value = wp
                    .children()
                    .find(|child| child.has_tag_name(name))
                    .and_then(|child| child.text())
                    .ok_or_else(|| format!("waypoint {i} has no <{name}>"))?;
                value
                    .trim()
                    .parse()
                    .map_err(|_| format!("waypoint {i} has a non-numeric <{name}> '{value}'"))
            };
            Ok(LatLon::new(field("lat")?, field("lon")?))
        })
        .collect()
}

/// Tile centers within `radius_miles` of the great-circle route through
/// `waypoints`.
///
/// Every leg is sampled every five miles, endpoints included, so the result
/// does not depend on the direction the route is flown. A single waypoint
/// yields the tiles around it.
pub fn expand_route(waypoints: &[LatLon], radius_miles: f64) -> HashSet<LatLon> {
    let mut tiles = HashSet::new();

    if let [only] = waypoints {
        tiles.extend(tiles_within_radius(only.lat, only.lon, radius_miles));
        return tiles;
    }

    for leg in waypoints.windows(2) {
        let (from, to) = (leg[0], leg[1]);
        let miles = haversine(from.lat, to.lat, from.lon, to.lon);
        let count = ((miles.floor() / MILES_PER_POINT) as usize).max(2);

        debug!(?from, ?to, miles, points = count, "sampling leg");
        for point in GreatCircle::new(from, to).points(count) {
            tiles.extend(tiles_within_radius(point.lat, point.lon, radius_miles));
        }
    }

    tiles
}

/// Reads the flight plan at `path` and expands its route.
///
/// Files with another extension are skipped with a warning and yield no tiles.
pub async fn expand_plan(path: &Path, radius_miles: f64) -> Result<HashSet<LatLon>, Error> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(FLIGHT_PLAN_EXTENSION) {
        warn!(path = %path.display(), "not a .{} flight plan, skipping", FLIGHT_PLAN_EXTENSION);
        return Ok(HashSet::new());
    }

    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::io(path, e))?;
    let waypoints = parse_waypoints(&text).map_err(|reason| Error::Plan {
        path: path.to_owned(),
        reason,
    })?;

    let tiles = expand_route(&waypoints, radius_miles);
    debug!(path = %path.display(), waypoints = waypoints.len(), tiles = tiles.len(), "expanded flight plan");
    Ok(tiles)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"<?xml version="1.0"?>
<PropertyList>
  <version type="int">2</version>
  <route>
    <wp n="0">
      <type type="string">navaid</type>
      <ident type="string">SFO</ident>
      <lat type="double">37.619</lat>
      <lon type="double">-122.375</lon>
    </wp>
    <wp n="1">
      <type type="string">navaid</type>
      <ident type="string">OAK</ident>
      <lat type="double">37.726</lat>
      <lon type="double">-122.221</lon>
    </wp>
  </route>
</PropertyList>"#;

    #[test]
    fn reads_waypoints_in_order() {
        let waypoints = parse_waypoints(PLAN).unwrap();
        assert_eq!(
            waypoints,
            vec![LatLon::new(37.619, -122.375), LatLon::new(37.726, -122.221)]
        );
    }

    #[test]
    fn waypoint_without_coordinates_is_rejected() {
        let err = parse_waypoints("<route><wp><lat>1</lat></wp></route>").unwrap_err();
        assert!(err.contains("<lon>"), "{err}");
    }

    #[test]
    fn empty_route_has_no_tiles() {
        assert!(expand_route(&[], 10.0).is_empty());
    }

    #[test]
    fn single_waypoint_covers_its_surroundings() {
        let point = LatLon::new(47.56, 8.07);
        assert_eq!(
            expand_route(&[point], 10.0),
            tiles_within_radius(point.lat, point.lon, 10.0)
        );
    }

    #[test]
    fn route_covers_both_ends() {
        let waypoints = parse_waypoints(PLAN).unwrap();
        let tiles = expand_route(&waypoints, 5.0);

        for wp in &waypoints {
            assert!(tiles_within_radius(wp.lat, wp.lon, 5.0).is_subset(&tiles));
        }
    }

    #[tokio::test]
    async fn other_extensions_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("route.gpx");
        std::fs::write(&path, PLAN).unwrap();

        assert!(expand_plan(&path, 10.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_plan_is_a_plan_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.fgfp");
        std::fs::write(&path, "<PropertyList><route>").unwrap();

        assert!(matches!(expand_plan(&path, 10.0).await, Err(Error::Plan { .. })));
    }
}
