//! Game rules: region lookup, scoring, and the duel state machine

pub mod duel;
pub mod region;
pub mod scoring;

pub use duel::{DuelError, DuelService, DuelSettings};
pub use region::{PlayingArea, Region, RegionResolver};
pub use scoring::{ScoringContext, ScoringEngine, TimeDecay};
