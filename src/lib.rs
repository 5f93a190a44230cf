//! GeoDuel - head-to-head campus photo location duels
//!
//! Two clients share one lobby document in a record store. Lobby lifecycle,
//! the duel state machine and scoring all run client side; writes are
//! guarded so that either client may drive any transition.

pub mod app;
pub mod client;
pub mod config;
pub mod game;
pub mod lobby;
pub mod model;
pub mod store;
pub mod util;
