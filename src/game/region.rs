//! Region resolution - which building (and floor set) contains a map point

use serde::{Deserialize, Serialize};

use crate::model::Point;

/// A building footprint with the floors a photo inside it can be on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Closed vertex list in map percentage space
    pub polygon: Vec<Point>,
    pub floors: Vec<i32>,
}

/// Optional boundary outside which map clicks are not accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayingArea {
    pub polygon: Vec<Point>,
}

/// Stateless geometry over catalog data
pub struct RegionResolver;

impl RegionResolver {
    /// Ray-casting containment test. Polygons with fewer than 3 vertices
    /// contain nothing.
    pub fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
        if polygon.len() < 3 {
            return false;
        }

        let mut inside = false;
        let mut j = polygon.len() - 1;
        for i in 0..polygon.len() {
            let (pi, pj) = (polygon[i], polygon[j]);
            let crosses = (pi.y > point.y) != (pj.y > point.y)
                && point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x;
            if crosses {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// First region in catalog order containing the point
    pub fn region_for_point(point: Point, regions: &[Region]) -> Option<&Region> {
        regions
            .iter()
            .find(|region| Self::point_in_polygon(point, &region.polygon))
    }

    /// Valid floors at the point, or `None` when no floor guess should be asked for
    pub fn floors_for_point(point: Point, regions: &[Region]) -> Option<&[i32]> {
        Self::region_for_point(point, regions).map(|region| region.floors.as_slice())
    }

    /// Whether a click is eligible. Without a playing area every click is.
    pub fn is_inside_playing_area(point: Point, area: Option<&PlayingArea>) -> bool {
        match area {
            Some(area) => Self::point_in_polygon(point, &area.polygon),
            None => true,
        }
    }

    /// Whether two points resolve to the same building (or both to none)
    pub fn same_building(a: Point, b: Point, regions: &[Region]) -> bool {
        let region_a = Self::region_for_point(a, regions).map(|r| r.id.as_str());
        let region_b = Self::region_for_point(b, regions).map(|r| r.id.as_str());
        region_a == region_b
    }
}
