//! Built-in campus map for local self-play

use crate::game::region::{PlayingArea, Region};
use crate::model::{Difficulty, Point, RoundImage};

fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Point> {
    vec![
        Point::new(x0, y0),
        Point::new(x1, y0),
        Point::new(x1, y1),
        Point::new(x0, y1),
    ]
}

pub fn regions() -> Vec<Region> {
    vec![
        Region {
            id: "library".to_string(),
            name: Some("Library".to_string()),
            polygon: rect(10.0, 10.0, 35.0, 30.0),
            floors: vec![1, 2, 3, 4],
        },
        Region {
            id: "science-hall".to_string(),
            name: Some("Science Hall".to_string()),
            polygon: rect(55.0, 15.0, 85.0, 40.0),
            floors: vec![1, 2, 3],
        },
        Region {
            id: "student-union".to_string(),
            name: Some("Student Union".to_string()),
            polygon: rect(30.0, 60.0, 60.0, 80.0),
            floors: vec![1, 2],
        },
    ]
}

pub fn playing_area() -> PlayingArea {
    PlayingArea {
        polygon: rect(2.0, 2.0, 98.0, 98.0),
    }
}

pub fn images() -> Vec<RoundImage> {
    let image = |id: &str, x: f64, y: f64, floor: Option<i32>, difficulty: Difficulty| RoundImage {
        id: id.to_string(),
        url: format!("https://images.geoduel.local/{}.jpg", id),
        correct_location: Point::new(x, y),
        correct_floor: floor,
        difficulty,
    };

    vec![
        image("quad-fountain", 45.0, 45.0, None, Difficulty::Easy),
        image("library-steps", 22.0, 31.0, None, Difficulty::Easy),
        image("union-food-court", 40.0, 70.0, Some(1), Difficulty::Easy),
        image("north-lawn", 50.0, 8.0, None, Difficulty::Easy),
        image("library-stacks", 20.0, 20.0, Some(3), Difficulty::Medium),
        image("lab-corridor", 70.0, 25.0, Some(2), Difficulty::Medium),
        image("bike-racks", 88.0, 50.0, None, Difficulty::Medium),
        image("union-balcony", 55.0, 62.0, Some(2), Difficulty::Medium),
        image("rooftop-vent", 80.0, 35.0, Some(3), Difficulty::Hard),
        image("reading-nook", 12.0, 28.0, Some(4), Difficulty::Hard),
        image("loading-dock", 93.0, 90.0, None, Difficulty::Hard),
        image("stairwell-b", 58.0, 17.0, Some(1), Difficulty::Hard),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::region::RegionResolver;

    #[test]
    fn test_floor_photos_sit_inside_a_building_with_that_floor() {
        let regions = regions();
        for image in images() {
            if let Some(floor) = image.correct_floor {
                let floors = RegionResolver::floors_for_point(image.correct_location, &regions);
                assert!(
                    floors.map_or(false, |f| f.contains(&floor)),
                    "{} is not on a valid floor",
                    image.id
                );
            }
            assert!(RegionResolver::is_inside_playing_area(
                image.correct_location,
                Some(&playing_area())
            ));
        }
    }
}
