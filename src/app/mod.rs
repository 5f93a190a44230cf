//! Application wiring

pub mod demo;
pub mod state;

pub use state::AppState;
