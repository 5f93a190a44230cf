//! Lobby lifecycle: creation, discovery, membership and liveness

pub mod code;
pub mod discovery;
pub mod heartbeat;
pub mod service;

use std::time::Duration;

pub use discovery::LobbyDiscovery;
pub use heartbeat::HeartbeatHandle;
pub use service::{CreatedLobby, LobbyService};

use crate::model::Difficulty;
use crate::store::{CatalogError, StoreError};

/// Lobby tunables
#[derive(Debug, Clone)]
pub struct LobbySettings {
    /// Lobbies older than this are treated as gone
    pub ttl: Duration,
    /// How often a present client refreshes its heartbeat
    pub heartbeat_interval: Duration,
    /// Heartbeat age after which a player counts as disconnected
    pub stale_timeout: Duration,
    pub default_round_time_secs: u32,
}

impl LobbySettings {
    pub const MIN_ROUND_TIME_SECS: u32 = 10;
    pub const MAX_ROUND_TIME_SECS: u32 = 300;
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60),
            heartbeat_interval: Duration::from_secs(10),
            stale_timeout: Duration::from_secs(30),
            default_round_time_secs: 60,
        }
    }
}

/// Join and lifecycle failures, each surfaced to the player as-is
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("Lobby not found")]
    NotFound,

    #[error("Lobby has expired")]
    Expired,

    #[error("Game has already started")]
    AlreadyStarted,

    #[error("Lobby is full")]
    Full,

    #[error("Lobby is set to {lobby} difficulty, not {requested}")]
    DifficultyMismatch {
        lobby: Difficulty,
        requested: Difficulty,
    },

    #[error("You are already in this lobby")]
    AlreadyJoined,

    #[error("Only friends of the host can join this lobby")]
    FriendshipRequired,

    #[error("Player {0} is not in this lobby")]
    NotAMember(String),

    #[error("Could not allocate a unique join code")]
    CodeExhausted,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Friend lookup failed: {0}")]
    Catalog(#[from] CatalogError),
}
