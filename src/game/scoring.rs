//! Scoring engine - guess accuracy, floor and time multipliers, round damage
//!
//! Both clients run these functions independently, so every output is an
//! integer derived deterministically from its inputs.

use crate::game::region::{Region, RegionResolver};
use crate::model::{Guess, GuessSubmission, Point, RoundImage};

/// Score for a guess inside the perfect radius
pub const MAX_LOCATION_SCORE: u32 = 5000;
/// Radius (map units, roughly 10 ft) that earns full marks
pub const PERFECT_RADIUS: f64 = 5.0;
/// Diagonal of the 100 x 100 map
pub const MAP_DIAGONAL: f64 = 141.421_356_237_309_5;
/// Share of the location score kept when the floor is wrong
pub const WRONG_FLOOR_MULTIPLIER: f64 = 0.8;
/// Steepness of the decay curve
const DECAY_STEEPNESS: f64 = 100.0;

/// Linear score decay over the guessing window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeDecay {
    /// Round time limit (seconds)
    pub time_limit_seconds: f64,
    /// Multiplier reached at the time limit
    pub min_multiplier: f64,
}

impl Default for TimeDecay {
    fn default() -> Self {
        Self {
            time_limit_seconds: 60.0,
            min_multiplier: 0.5,
        }
    }
}

/// Everything needed to score one submission
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext<'a> {
    pub image: &'a RoundImage,
    pub regions: &'a [Region],
    /// Seconds since the round started, when known
    pub elapsed_seconds: Option<f64>,
    /// Set only when the mode has time decay enabled
    pub time_decay: Option<TimeDecay>,
}

/// Pure scoring functions
pub struct ScoringEngine;

impl ScoringEngine {
    pub fn distance(guess: Point, actual: Point) -> f64 {
        let dx = guess.x - actual.x;
        let dy = guess.y - actual.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Exponential-decay location score in `[0, 5000]`
    pub fn location_score(distance: f64) -> u32 {
        if !distance.is_finite() {
            return 0;
        }
        if distance <= PERFECT_RADIUS {
            return MAX_LOCATION_SCORE;
        }

        let max_distance = MAP_DIAGONAL - PERFECT_RADIUS;
        let normalized = (distance - PERFECT_RADIUS) / max_distance;
        let raw = MAX_LOCATION_SCORE as f64 * (-DECAY_STEEPNESS * normalized * normalized).exp();
        raw.round().clamp(0.0, MAX_LOCATION_SCORE as f64) as u32
    }

    pub fn floor_multiplier(floor_correct: bool) -> f64 {
        if floor_correct {
            1.0
        } else {
            WRONG_FLOOR_MULTIPLIER
        }
    }

    /// 1.0 at t=0 falling linearly to `min_multiplier` at the time limit
    pub fn time_decay_multiplier(elapsed_seconds: f64, decay: &TimeDecay) -> f64 {
        if decay.time_limit_seconds <= 0.0 {
            return 1.0;
        }
        let progress = (elapsed_seconds / decay.time_limit_seconds).clamp(0.0, 1.0);
        1.0 - (1.0 - decay.min_multiplier) * progress
    }

    /// Damage multiplier escalating with the round number
    pub fn damage_multiplier(round: u32) -> f64 {
        match round {
            0..=2 => 1.0,
            3..=4 => 1.5,
            _ => 2.0,
        }
    }

    /// Damage dealt to the worse scorer of a round
    pub fn round_damage(best_score: u32, worst_score: u32, round: u32) -> u32 {
        let differential = best_score.saturating_sub(worst_score) as f64;
        (differential * Self::damage_multiplier(round)).round() as u32
    }

    /// Apply damage to health, returns (new_health, is_knocked_out)
    pub fn apply_damage(current_health: u32, damage: u32) -> (u32, bool) {
        let new_health = current_health.saturating_sub(damage);
        (new_health, new_health == 0)
    }

    /// A floor guess counts only in the right building and on the right floor
    pub fn is_floor_correct(
        guess_location: Point,
        guess_floor: Option<i32>,
        image: &RoundImage,
        regions: &[Region],
    ) -> bool {
        match (guess_floor, image.correct_floor) {
            (Some(guessed), Some(actual)) if guessed == actual => {
                RegionResolver::same_building(guess_location, image.correct_location, regions)
            }
            _ => false,
        }
    }

    /// Score a submission without looking at the opponent
    pub fn score_guess(submission: &GuessSubmission, ctx: &ScoringContext<'_>) -> Guess {
        let location = match submission.location {
            Some(location) if !submission.timed_out => location,
            _ => return Guess::empty(submission.timed_out, ctx.elapsed_seconds),
        };

        let distance = Self::distance(location, ctx.image.correct_location);
        let location_score = Self::location_score(distance);

        let floor_correct = ctx.image.correct_floor.map(|_| {
            Self::is_floor_correct(location, submission.floor, ctx.image, ctx.regions)
        });
        let floor_multiplier = floor_correct.map(Self::floor_multiplier).unwrap_or(1.0);
        let mut score = (location_score as f64 * floor_multiplier).round() as u32;

        let mut time_penalty = None;
        if let (Some(decay), Some(elapsed)) = (ctx.time_decay, ctx.elapsed_seconds) {
            let multiplier = Self::time_decay_multiplier(elapsed, &decay);
            let decayed = (score as f64 * multiplier).round() as u32;
            time_penalty = Some(score - decayed.min(score));
            score = decayed.min(score);
        }

        Guess {
            location: Some(location),
            floor: submission.floor,
            score,
            location_score,
            distance: Some(distance),
            floor_correct,
            timed_out: false,
            no_guess: false,
            time_taken_seconds: ctx.elapsed_seconds,
            time_penalty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Difficulty;

    fn image(floor: Option<i32>) -> RoundImage {
        RoundImage {
            id: "img-1".to_string(),
            url: "https://cdn.example/img-1.jpg".to_string(),
            correct_location: Point::new(20.0, 20.0),
            correct_floor: floor,
            difficulty: Difficulty::Medium,
        }
    }

    fn buildings() -> Vec<Region> {
        let square = |id: &str, x0: f64| Region {
            id: id.to_string(),
            name: None,
            polygon: vec![
                Point::new(x0, 10.0),
                Point::new(x0 + 20.0, 10.0),
                Point::new(x0 + 20.0, 30.0),
                Point::new(x0, 30.0),
            ],
            floors: vec![1, 2, 3],
        };
        vec![square("north-hall", 10.0), square("south-hall", 50.0)]
    }

    #[test]
    fn test_perfect_radius_scores_full_marks() {
        for d in [0.0, 1.0, 4.99, 5.0] {
            assert_eq!(ScoringEngine::location_score(d), MAX_LOCATION_SCORE);
        }
        assert!(ScoringEngine::location_score(5.5) < MAX_LOCATION_SCORE);
    }

    #[test]
    fn test_location_score_is_monotonic_and_bounded() {
        let mut previous = ScoringEngine::location_score(0.0);
        let mut d = 0.0;
        while d <= MAP_DIAGONAL {
            let score = ScoringEngine::location_score(d);
            assert!(score <= previous, "score rose at distance {}", d);
            assert!(score <= MAX_LOCATION_SCORE);
            previous = score;
            d += 0.25;
        }
        assert_eq!(ScoringEngine::location_score(MAP_DIAGONAL), 0);
        assert_eq!(ScoringEngine::location_score(f64::NAN), 0);
    }

    #[test]
    fn test_curve_is_steep() {
        // 10 units past the perfect radius already loses ~40% of the score
        let score = ScoringEngine::location_score(15.0);
        assert_eq!(score, 2922);
    }

    #[test]
    fn test_damage_multiplier_steps() {
        assert_eq!(ScoringEngine::damage_multiplier(1), 1.0);
        assert_eq!(ScoringEngine::damage_multiplier(2), 1.0);
        assert_eq!(ScoringEngine::damage_multiplier(3), 1.5);
        assert_eq!(ScoringEngine::damage_multiplier(4), 1.5);
        assert_eq!(ScoringEngine::damage_multiplier(5), 2.0);
        assert_eq!(ScoringEngine::damage_multiplier(42), 2.0);
    }

    #[test]
    fn test_round_damage() {
        assert_eq!(ScoringEngine::round_damage(5000, 3000, 1), 2000);
        assert_eq!(ScoringEngine::round_damage(4000, 0, 5), 8000);
        assert_eq!(ScoringEngine::round_damage(1001, 0, 3), 1502);
        assert_eq!(ScoringEngine::round_damage(3000, 3000, 4), 0);
        assert_eq!(ScoringEngine::round_damage(100, 300, 1), 0);
    }

    #[test]
    fn test_apply_damage_clamps_at_zero() {
        assert_eq!(ScoringEngine::apply_damage(6000, 2000), (4000, false));
        assert_eq!(ScoringEngine::apply_damage(1000, 8000), (0, true));
    }

    #[test]
    fn test_floor_needs_matching_building() {
        let regions = buildings();
        let img = image(Some(2));
        // Right building, right floor
        assert!(ScoringEngine::is_floor_correct(Point::new(22.0, 22.0), Some(2), &img, &regions));
        // Same floor number, wrong building
        assert!(!ScoringEngine::is_floor_correct(Point::new(55.0, 20.0), Some(2), &img, &regions));
        // Right building, wrong floor
        assert!(!ScoringEngine::is_floor_correct(Point::new(22.0, 22.0), Some(3), &img, &regions));
        assert!(!ScoringEngine::is_floor_correct(Point::new(22.0, 22.0), None, &img, &regions));
    }

    #[test]
    fn test_wrong_floor_keeps_eighty_percent() {
        let regions = buildings();
        let img = image(Some(2));
        let ctx = ScoringContext {
            image: &img,
            regions: &regions,
            elapsed_seconds: None,
            time_decay: None,
        };
        let right = ScoringEngine::score_guess(&GuessSubmission::at(Point::new(20.0, 20.0), Some(2)), &ctx);
        assert_eq!(right.score, 5000);
        assert_eq!(right.floor_correct, Some(true));

        let wrong = ScoringEngine::score_guess(&GuessSubmission::at(Point::new(20.0, 20.0), Some(1)), &ctx);
        assert_eq!(wrong.location_score, 5000);
        assert_eq!(wrong.score, 4000);
        assert_eq!(wrong.floor_correct, Some(false));
    }

    #[test]
    fn test_outdoor_photo_skips_floor_scoring() {
        let regions = buildings();
        let img = image(None);
        let ctx = ScoringContext {
            image: &img,
            regions: &regions,
            elapsed_seconds: Some(12.0),
            time_decay: None,
        };
        let guess = ScoringEngine::score_guess(&GuessSubmission::at(Point::new(21.0, 21.0), None), &ctx);
        assert_eq!(guess.score, 5000);
        assert_eq!(guess.floor_correct, None);
        assert_eq!(guess.time_taken_seconds, Some(12.0));
        assert_eq!(guess.time_penalty, None);
    }

    #[test]
    fn test_no_guess_and_timeout_score_zero() {
        let img = image(Some(1));
        let ctx = ScoringContext {
            image: &img,
            regions: &[],
            elapsed_seconds: Some(60.0),
            time_decay: None,
        };
        let none = ScoringEngine::score_guess(&GuessSubmission::default(), &ctx);
        assert_eq!(none.score, 0);
        assert!(none.no_guess);
        assert!(!none.timed_out);

        let mut late = GuessSubmission::at(Point::new(20.0, 20.0), Some(1));
        late.timed_out = true;
        let late = ScoringEngine::score_guess(&late, &ctx);
        assert_eq!(late.score, 0);
        assert!(late.timed_out);
    }

    #[test]
    fn test_time_decay() {
        let decay = TimeDecay::default();
        assert_eq!(ScoringEngine::time_decay_multiplier(0.0, &decay), 1.0);
        assert_eq!(ScoringEngine::time_decay_multiplier(30.0, &decay), 0.75);
        assert_eq!(ScoringEngine::time_decay_multiplier(60.0, &decay), 0.5);
        assert_eq!(ScoringEngine::time_decay_multiplier(600.0, &decay), 0.5);
        assert_eq!(ScoringEngine::time_decay_multiplier(-5.0, &decay), 1.0);

        let img = image(None);
        let ctx = ScoringContext {
            image: &img,
            regions: &[],
            elapsed_seconds: Some(30.0),
            time_decay: Some(decay),
        };
        let guess = ScoringEngine::score_guess(&GuessSubmission::at(Point::new(20.0, 20.0), None), &ctx);
        assert_eq!(guess.score, 3750);
        assert_eq!(guess.time_penalty, Some(1250));
        assert_eq!(guess.location_score, 5000);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let regions = buildings();
        let img = image(Some(3));
        let ctx = ScoringContext {
            image: &img,
            regions: &regions,
            elapsed_seconds: Some(17.3),
            time_decay: Some(TimeDecay::default()),
        };
        let submission = GuessSubmission::at(Point::new(33.3, 27.1), Some(3));
        let first = ScoringEngine::score_guess(&submission, &ctx);
        for _ in 0..10 {
            assert_eq!(ScoringEngine::score_guess(&submission, &ctx), first);
        }
    }
}
