//! Shared-record schema
//! These are the document types both clients read and write. The record is the
//! only protocol between the two participants of a match.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Player identifier as issued by the external auth provider
pub type Uid = String;

/// Map coordinates in percentage-of-map units (0..100 on both axes)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Photo difficulty, used as a filter on the photo catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Default for Difficulty {
    fn default() -> Self {
        Self::Medium
    }
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => Err(format!("unknown difficulty '{}'", other)),
        }
    }
}

/// Who may discover and join a lobby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Listed for everyone
    Public,
    /// Reachable by join code only
    Private,
    /// Listed for, and joinable by, the host's friends
    Friends,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Friends => "friends",
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            "friends" => Ok(Self::Friends),
            other => Err(format!("unknown visibility '{}'", other)),
        }
    }
}

/// Lobby lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
    Waiting,
    InProgress,
    Finished,
}

impl LobbyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::InProgress => "in_progress",
            Self::Finished => "finished",
        }
    }
}

/// Game mode of a lobby, which fixes its capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LobbyMode {
    /// Head-to-head match, always two players
    Duel,
    /// Larger room
    Party { max_players: usize },
}

impl LobbyMode {
    pub const MIN_PLAYERS: usize = 2;
    pub const MAX_PARTY_PLAYERS: usize = 10;

    pub fn max_players(&self) -> usize {
        match self {
            Self::Duel => 2,
            Self::Party { max_players } => {
                (*max_players).clamp(Self::MIN_PLAYERS, Self::MAX_PARTY_PLAYERS)
            }
        }
    }
}

/// Member of a lobby
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyPlayer {
    pub uid: Uid,
    pub username: String,
    pub joined_at: DateTime<Utc>,
}

/// Ground truth for one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundImage {
    pub id: String,
    pub url: String,
    pub correct_location: Point,
    /// Floor the photo was taken on, if it was taken inside a building
    pub correct_floor: Option<i32>,
    pub difficulty: Difficulty,
}

/// A player's scored guess for the current round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guess {
    pub location: Option<Point>,
    pub floor: Option<i32>,
    pub score: u32,
    pub location_score: u32,
    pub distance: Option<f64>,
    /// `None` when the photo has no floor and floor scoring does not apply
    pub floor_correct: Option<bool>,
    pub timed_out: bool,
    pub no_guess: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_taken_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_penalty: Option<u32>,
}

impl Guess {
    /// Zero-score guess for a player who never clicked or ran out of time
    pub fn empty(timed_out: bool, time_taken_seconds: Option<f64>) -> Self {
        Self {
            location: None,
            floor: None,
            score: 0,
            location_score: 0,
            distance: None,
            floor_correct: None,
            timed_out,
            no_guess: true,
            time_taken_seconds,
            time_penalty: None,
        }
    }
}

/// What a client submits before scoring
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuessSubmission {
    pub location: Option<Point>,
    pub floor: Option<i32>,
    #[serde(default)]
    pub timed_out: bool,
}

impl GuessSubmission {
    pub fn at(location: Point, floor: Option<i32>) -> Self {
        Self {
            location: Some(location),
            floor,
            timed_out: false,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            location: None,
            floor: None,
            timed_out: true,
        }
    }
}

/// Immutable recap of a resolved round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundHistoryEntry {
    pub round: u32,
    pub image: RoundImage,
    pub guesses: BTreeMap<Uid, Guess>,
    pub damage: u32,
    pub multiplier: f64,
    pub damaged_player: Option<Uid>,
    pub health_after: BTreeMap<Uid, u32>,
}

/// Duel phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelPhase {
    Guessing,
    Results,
    Finished,
}

/// Terminal result of a duel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuelOutcome {
    pub winner: Option<Uid>,
    pub loser: Option<Uid>,
    pub forfeit_by: Option<Uid>,
    pub finished_at: DateTime<Utc>,
}

/// Duel fields of the shared record, present once the match has started
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuelState {
    pub phase: DuelPhase,
    pub current_round: u32,
    pub current_image: RoundImage,
    pub round_started_at: DateTime<Utc>,
    #[serde(default)]
    pub guesses: BTreeMap<Uid, Guess>,
    #[serde(default)]
    pub health: BTreeMap<Uid, u32>,
    #[serde(default)]
    pub round_history: Vec<RoundHistoryEntry>,
    #[serde(default)]
    pub time_decay: bool,
    pub winner: Option<Uid>,
    pub loser: Option<Uid>,
    pub forfeit_by: Option<Uid>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DuelState {
    /// Round 1 state with every player at full health
    pub fn first_round<'a>(
        players: impl IntoIterator<Item = &'a Uid>,
        image: RoundImage,
        starting_health: u32,
        time_decay: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            phase: DuelPhase::Guessing,
            current_round: 1,
            current_image: image,
            round_started_at: started_at,
            guesses: BTreeMap::new(),
            health: players
                .into_iter()
                .map(|uid| (uid.clone(), starting_health))
                .collect(),
            round_history: Vec::new(),
            time_decay,
            winner: None,
            loser: None,
            forfeit_by: None,
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase == DuelPhase::Finished
    }

    pub fn is_alive(&self, uid: &str) -> bool {
        self.health.get(uid).copied().unwrap_or(0) > 0
    }

    /// Players with health left, in uid order
    pub fn alive_players(&self) -> Vec<&Uid> {
        self.health
            .iter()
            .filter(|(_, hp)| **hp > 0)
            .map(|(uid, _)| uid)
            .collect()
    }

    /// True once every alive player has a guess for the current round
    pub fn all_alive_guessed(&self) -> bool {
        self.alive_players()
            .iter()
            .all(|uid| self.guesses.contains_key(*uid))
    }
}

/// The shared document: a lobby, extended with duel fields once started
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyRecord {
    pub id: String,
    pub join_code: String,
    pub host_uid: Uid,
    pub host_username: String,
    pub difficulty: Difficulty,
    pub visibility: Visibility,
    pub mode: LobbyMode,
    pub status: LobbyStatus,
    pub max_players: usize,
    pub round_time_seconds: u32,
    pub players: Vec<LobbyPlayer>,
    #[serde(default)]
    pub heartbeats: BTreeMap<Uid, DateTime<Utc>>,
    #[serde(default)]
    pub ready_status: BTreeMap<Uid, bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the store on every applied write
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub duel: Option<DuelState>,
}

impl LobbyRecord {
    pub fn is_member(&self, uid: &str) -> bool {
        self.players.iter().any(|p| p.uid == uid)
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players
    }

    pub fn player(&self, uid: &str) -> Option<&LobbyPlayer> {
        self.players.iter().find(|p| p.uid == uid)
    }

    /// Other members, in join order
    pub fn opponents_of<'a>(&'a self, uid: &'a str) -> impl Iterator<Item = &'a LobbyPlayer> {
        self.players.iter().filter(move |p| p.uid != uid)
    }

    pub fn uids(&self) -> Vec<Uid> {
        self.players.iter().map(|p| p.uid.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duel_mode_fixes_two_players() {
        assert_eq!(LobbyMode::Duel.max_players(), 2);
        assert_eq!(LobbyMode::Party { max_players: 1 }.max_players(), 2);
        assert_eq!(LobbyMode::Party { max_players: 6 }.max_players(), 6);
        assert_eq!(LobbyMode::Party { max_players: 40 }.max_players(), 10);
    }

    #[test]
    fn test_record_uses_camel_case_schema() {
        let guess = Guess::empty(true, Some(60.0));
        let json = serde_json::to_value(&guess).unwrap();
        assert_eq!(json["timedOut"], true);
        assert_eq!(json["noGuess"], true);
        assert_eq!(json["timeTakenSeconds"], 60.0);
        assert!(json.get("timePenalty").is_none());
    }

    #[test]
    fn test_difficulty_parses_case_insensitively() {
        assert_eq!("HARD".parse::<Difficulty>(), Ok(Difficulty::Hard));
        assert!("extreme".parse::<Difficulty>().is_err());
    }
}
