//! Configuration module - environment variable parsing

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::game::DuelSettings;
use crate::lobby::LobbySettings;
use crate::model::{Difficulty, Visibility};

/// Where the shared lobby documents live
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process store; the binary plays both sides itself
    Memory,
    Supabase,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "supabase" => Ok(Self::Supabase),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

/// Supabase connection settings
#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    /// Supabase project URL
    pub url: String,
    /// Service role key (bypasses RLS)
    pub service_role_key: String,
    /// Refresh period for live subscriptions
    pub poll_interval: Duration,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub backend: StoreBackend,
    /// Present when `backend` is Supabase
    pub supabase: Option<SupabaseConfig>,

    /// Identity this client plays as
    pub player_uid: String,
    pub player_username: String,
    /// Join this lobby instead of hosting one
    pub join_code: Option<String>,
    pub difficulty: Difficulty,
    pub visibility: Visibility,

    pub lobby: LobbySettings,
    pub duel: DuelSettings,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend: StoreBackend = parse_or("STORE_BACKEND", StoreBackend::Memory)?;

        let supabase = match backend {
            StoreBackend::Memory => None,
            StoreBackend::Supabase => Some(SupabaseConfig {
                url: env::var("SUPABASE_URL").map_err(|_| ConfigError::Missing("SUPABASE_URL"))?,
                service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                    .map_err(|_| ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY"))?,
                poll_interval: Duration::from_millis(parse_or("SUPABASE_POLL_MS", 1000u64)?),
            }),
        };

        let lobby = LobbySettings {
            ttl: Duration::from_secs(parse_or("LOBBY_TTL_SECS", 3600u64)?),
            heartbeat_interval: Duration::from_secs(parse_or("HEARTBEAT_INTERVAL_SECS", 10u64)?),
            stale_timeout: Duration::from_secs(parse_or("STALE_TIMEOUT_SECS", 30u64)?),
            default_round_time_secs: parse_or("ROUND_TIME_SECS", 60u32)?.clamp(
                LobbySettings::MIN_ROUND_TIME_SECS,
                LobbySettings::MAX_ROUND_TIME_SECS,
            ),
        };

        let duel = DuelSettings {
            time_decay: parse_or("TIME_DECAY", false)?,
            ..DuelSettings::default()
        };

        Ok(Self {
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            backend,
            supabase,
            player_uid: env::var("PLAYER_UID").map_err(|_| ConfigError::Missing("PLAYER_UID"))?,
            player_username: env::var("PLAYER_USERNAME")
                .map_err(|_| ConfigError::Missing("PLAYER_USERNAME"))?,
            join_code: env::var("JOIN_CODE").ok().filter(|code| !code.trim().is_empty()),
            difficulty: parse_or("DIFFICULTY", Difficulty::Medium)?,
            visibility: parse_or("VISIBILITY", Visibility::Public)?,
            lobby,
            duel,
        })
    }
}

/// Parse an optional variable, falling back to `default` when unset
fn parse_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            key,
            reason: err.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
