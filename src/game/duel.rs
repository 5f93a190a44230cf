//! Duel state machine
//!
//! `guessing -> results -> guessing -> ... -> finished`. Both clients may
//! call any step; the guards on each [`FieldUpdate`] make the second call a
//! no-op, so resolution is applied exactly once.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::game::region::RegionResolver;
use crate::game::scoring::{ScoringContext, ScoringEngine, TimeDecay};
use crate::lobby::heartbeat::stale_players;
use crate::model::{
    Difficulty, DuelOutcome, DuelPhase, DuelState, Guess, GuessSubmission, LobbyRecord, Point,
    RoundHistoryEntry, RoundImage, Uid,
};
use crate::store::{
    CatalogError, FieldUpdate, ImageExclusions, PhotoCatalog, RecordStore, RegionCatalog, StoreError,
};
use crate::util::time::{elapsed_secs, older_than};

/// Duel tunables
#[derive(Debug, Clone)]
pub struct DuelSettings {
    pub starting_health: u32,
    /// Whether new duels score with time decay
    pub time_decay: bool,
    /// Multiplier reached at the round time limit when decay is on
    pub min_time_multiplier: f64,
}

impl Default for DuelSettings {
    fn default() -> Self {
        Self {
            starting_health: 6000,
            time_decay: false,
            min_time_multiplier: 0.5,
        }
    }
}

/// Duel errors
#[derive(Debug, thiserror::Error)]
pub enum DuelError {
    #[error("Lobby not found")]
    NotFound,

    #[error("Duel has not started")]
    NotStarted,

    #[error("Duel has already started")]
    AlreadyStarted,

    #[error("A duel needs between 2 and the lobby's maximum players, got {0}")]
    InvalidPlayers(usize),

    #[error("Player {0} is not in this duel")]
    NotAPlayer(Uid),

    #[error("Round is no longer accepting guesses")]
    RoundClosed,

    #[error("No eligible {0} image in the catalog")]
    NoEligibleImage(Difficulty),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

/// Everything a round resolution writes
#[derive(Debug, Clone, PartialEq)]
pub struct RoundResolution {
    pub entry: RoundHistoryEntry,
    pub health: BTreeMap<Uid, u32>,
    pub outcome: Option<DuelOutcome>,
}

/// Resolve the current round from a snapshot. `None` while an alive player
/// has not guessed, or once the round is already resolved.
pub fn resolve_round(duel: &DuelState, finished_at: DateTime<Utc>) -> Option<RoundResolution> {
    if duel.phase != DuelPhase::Guessing || !duel.all_alive_guessed() {
        return None;
    }
    if duel.round_history.iter().any(|e| e.round == duel.current_round) {
        return None;
    }

    let mut ranked: Vec<(&Uid, u32)> = duel
        .alive_players()
        .into_iter()
        .filter_map(|uid| duel.guesses.get(uid).map(|g| (uid, g.score)))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let (best_uid, best_score) = *ranked.first()?;
    let (worst_uid, worst_score) = *ranked.last()?;

    let round = duel.current_round;
    let multiplier = ScoringEngine::damage_multiplier(round);
    let damage = ScoringEngine::round_damage(best_score, worst_score, round);
    let damaged_player = (best_score > worst_score).then(|| worst_uid.clone());

    let mut health = duel.health.clone();
    if let Some(uid) = &damaged_player {
        if let Some(hp) = health.get_mut(uid) {
            *hp = ScoringEngine::apply_damage(*hp, damage).0;
        }
    }

    let survivors: Vec<&Uid> = health
        .iter()
        .filter(|(_, hp)| **hp > 0)
        .map(|(uid, _)| uid)
        .collect();

    let outcome = (survivors.len() <= 1).then(|| {
        // Prefer the survivor; with nobody left the best scorer takes it
        let winner = survivors.first().copied().unwrap_or(best_uid).clone();
        let loser = damaged_player.clone().unwrap_or_else(|| worst_uid.clone());
        DuelOutcome {
            winner: Some(winner),
            loser: Some(loser),
            forfeit_by: None,
            finished_at,
        }
    });

    let entry = RoundHistoryEntry {
        round,
        image: duel.current_image.clone(),
        guesses: duel.guesses.clone(),
        damage: if damaged_player.is_some() { damage } else { 0 },
        multiplier,
        damaged_player,
        health_after: health.clone(),
    };

    Some(RoundResolution {
        entry,
        health,
        outcome,
    })
}

/// Images already shown this match, including the current one
pub fn used_images(duel: &DuelState) -> ImageExclusions {
    let mut exclude = ImageExclusions::default();
    let images = duel
        .round_history
        .iter()
        .map(|entry| &entry.image)
        .chain(std::iter::once(&duel.current_image));
    for image in images {
        exclude.ids.insert(image.id.clone());
        exclude.urls.insert(image.url.clone());
    }
    exclude
}

/// Opponent credited with the win when `uid` walks away: the alive player
/// with the most health, lowest uid on ties
pub fn forfeit_winner(duel: &DuelState, uid: &str) -> Option<Uid> {
    duel.health
        .iter()
        .filter(|(other, hp)| other.as_str() != uid && **hp > 0)
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(other, _)| other.clone())
}

/// The stale opponent to record as the loser when every other alive player
/// has stopped heartbeating, seen from `self_uid`
pub fn abandoned_by(
    record: &LobbyRecord,
    self_uid: &str,
    stale_timeout: Duration,
    now: DateTime<Utc>,
) -> Option<Uid> {
    let duel = record.duel.as_ref().filter(|d| !d.is_finished())?;
    let stale: Vec<Uid> = stale_players(record, self_uid, stale_timeout, now)
        .into_iter()
        .filter(|uid| duel.is_alive(uid))
        .collect();

    let live_opponents = duel
        .alive_players()
        .into_iter()
        .filter(|uid| uid.as_str() != self_uid && !stale.contains(uid))
        .count();
    if live_opponents > 0 {
        return None;
    }
    stale.into_iter().next()
}

/// Duel operations against the shared store
#[derive(Clone)]
pub struct DuelService {
    store: Arc<dyn RecordStore>,
    photos: Arc<dyn PhotoCatalog>,
    regions: Arc<dyn RegionCatalog>,
    settings: DuelSettings,
}

impl DuelService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        photos: Arc<dyn PhotoCatalog>,
        regions: Arc<dyn RegionCatalog>,
        settings: DuelSettings,
    ) -> Self {
        Self {
            store,
            photos,
            regions,
            settings,
        }
    }

    pub fn settings(&self) -> &DuelSettings {
        &self.settings
    }

    /// Seed round 1 on a waiting lobby
    pub async fn start_duel(
        &self,
        document_id: &str,
        players: &[Uid],
        difficulty: Difficulty,
    ) -> Result<DuelState, DuelError> {
        let record = self.load(document_id).await?;
        if record.duel.is_some() {
            return Err(DuelError::AlreadyStarted);
        }

        let mut roster: Vec<&Uid> = players.iter().collect();
        roster.sort();
        roster.dedup();
        if roster.len() < 2 || roster.len() > record.max_players {
            return Err(DuelError::InvalidPlayers(roster.len()));
        }
        if let Some(stranger) = roster.iter().find(|uid| !record.is_member(uid)) {
            return Err(DuelError::NotAPlayer((*stranger).clone()));
        }

        let image = self
            .photos
            .random_image(difficulty, &ImageExclusions::default())
            .await?
            .ok_or(DuelError::NoEligibleImage(difficulty))?;

        let duel = DuelState::first_round(
            roster,
            image,
            self.settings.starting_health,
            self.settings.time_decay,
            Utc::now(),
        );

        let updated = self
            .update(document_id, vec![FieldUpdate::BeginDuel { duel: duel.clone() }])
            .await?;
        if updated.duel.as_ref() != Some(&duel) {
            return Err(DuelError::AlreadyStarted);
        }

        info!(
            lobby_id = %document_id,
            players = duel.health.len(),
            image = %duel.current_image.id,
            "Duel started"
        );
        Ok(duel)
    }

    /// Score a guess against the image the player saw and record it for the
    /// current round. Submitting again replaces the earlier guess.
    pub async fn submit_guess(
        &self,
        document_id: &str,
        uid: &str,
        submission: &GuessSubmission,
        image: &RoundImage,
        round_started_at: Option<DateTime<Utc>>,
        time_decay: bool,
    ) -> Result<Guess, DuelError> {
        let record = self.load(document_id).await?;
        let duel = record.duel.as_ref().ok_or(DuelError::NotStarted)?;
        if !duel.health.contains_key(uid) {
            return Err(DuelError::NotAPlayer(uid.to_string()));
        }
        if duel.phase != DuelPhase::Guessing || !duel.is_alive(uid) || duel.current_image.id != image.id {
            return Err(DuelError::RoundClosed);
        }

        // Regions only matter when floor scoring applies
        let regions = if image.correct_floor.is_some() && submission.location.is_some() {
            self.regions.regions().await?
        } else {
            Vec::new()
        };

        let elapsed = round_started_at.map(|started| elapsed_secs(started, Utc::now()));
        let decay = time_decay.then(|| TimeDecay {
            time_limit_seconds: record.round_time_seconds as f64,
            min_multiplier: self.settings.min_time_multiplier,
        });
        let guess = ScoringEngine::score_guess(
            submission,
            &ScoringContext {
                image,
                regions: &regions,
                elapsed_seconds: elapsed,
                time_decay: decay,
            },
        );

        let round = duel.current_round;
        let updated = self
            .update(
                document_id,
                vec![FieldUpdate::SetGuess {
                    uid: uid.to_string(),
                    round,
                    guess: guess.clone(),
                }],
            )
            .await?;

        let stored = updated
            .duel
            .as_ref()
            .filter(|d| d.current_round == round)
            .and_then(|d| d.guesses.get(uid));
        if stored != Some(&guess) {
            return Err(DuelError::RoundClosed);
        }

        debug!(
            lobby_id = %document_id,
            uid = %uid,
            round,
            score = guess.score,
            timed_out = guess.timed_out,
            "Guess recorded"
        );
        Ok(guess)
    }

    /// Host-authoritative resolution. Safe to call speculatively: returns
    /// `None` until every alive player has guessed and after the round has
    /// been resolved.
    pub async fn process_round(&self, document_id: &str) -> Result<Option<RoundHistoryEntry>, DuelError> {
        let record = self.load(document_id).await?;
        let Some(duel) = record.duel.as_ref() else {
            return Ok(None);
        };

        let Some(resolution) = resolve_round(duel, Utc::now()) else {
            debug!(
                lobby_id = %document_id,
                round = duel.current_round,
                phase = ?duel.phase,
                "Round not ready or already resolved"
            );
            return Ok(None);
        };

        let round = resolution.entry.round;
        let updated = self
            .update(
                document_id,
                vec![FieldUpdate::ResolveRound {
                    entry: resolution.entry.clone(),
                    health: resolution.health.clone(),
                    outcome: resolution.outcome.clone(),
                }],
            )
            .await?;

        let applied = updated
            .duel
            .as_ref()
            .and_then(|d| d.round_history.iter().find(|e| e.round == round))
            == Some(&resolution.entry);
        if !applied {
            debug!(lobby_id = %document_id, round, "Round resolved by another writer");
            return Ok(None);
        }

        info!(
            lobby_id = %document_id,
            round,
            damage = resolution.entry.damage,
            damaged = ?resolution.entry.damaged_player,
            "Round resolved"
        );
        if let Some(outcome) = &resolution.outcome {
            info!(
                lobby_id = %document_id,
                winner = ?outcome.winner,
                loser = ?outcome.loser,
                "Duel finished"
            );
        }
        Ok(Some(resolution.entry))
    }

    /// Move from results to the next round with a fresh image
    pub async fn advance_to_next_round(
        &self,
        document_id: &str,
        difficulty: Difficulty,
    ) -> Result<Option<RoundImage>, DuelError> {
        let record = self.load(document_id).await?;
        let duel = record.duel.as_ref().ok_or(DuelError::NotStarted)?;
        if duel.phase != DuelPhase::Results {
            debug!(lobby_id = %document_id, phase = ?duel.phase, "Not in results, nothing to advance");
            return Ok(None);
        }

        let exclude = used_images(duel);
        let image = match self.photos.random_image(difficulty, &exclude).await? {
            Some(image) => image,
            None => {
                warn!(
                    lobby_id = %document_id,
                    used = exclude.ids.len(),
                    "Image pool exhausted, drawing from the full pool"
                );
                self.photos
                    .random_image(difficulty, &ImageExclusions::default())
                    .await?
                    .ok_or(DuelError::NoEligibleImage(difficulty))?
            }
        };

        let round = duel.current_round + 1;
        let updated = self
            .update(
                document_id,
                vec![FieldUpdate::BeginRound {
                    round,
                    image: image.clone(),
                    started_at: Utc::now(),
                }],
            )
            .await?;

        let advanced = updated
            .duel
            .as_ref()
            .map_or(false, |d| d.current_round == round && d.current_image == image);
        if !advanced {
            debug!(lobby_id = %document_id, round, "Round already advanced by another writer");
            return Ok(None);
        }

        info!(lobby_id = %document_id, round, image = %image.id, "Round started");
        Ok(Some(image))
    }

    /// End the duel outside normal resolution. Returns whether this call
    /// finished it.
    pub async fn handle_disconnect(
        &self,
        document_id: &str,
        winner_uid: &str,
        loser_uid: &str,
        forfeit_by: Option<&str>,
    ) -> Result<bool, DuelError> {
        let record = self.load(document_id).await?;
        let duel = record.duel.as_ref().ok_or(DuelError::NotStarted)?;
        if duel.is_finished() {
            debug!(lobby_id = %document_id, "Duel already finished");
            return Ok(false);
        }

        let finished_at = Utc::now();
        let outcome = DuelOutcome {
            winner: Some(winner_uid.to_string()),
            loser: Some(loser_uid.to_string()),
            forfeit_by: forfeit_by.map(str::to_string),
            finished_at,
        };
        let updated = self
            .update(
                document_id,
                vec![FieldUpdate::Finish {
                    outcome,
                    knocked_out: Some(loser_uid.to_string()),
                }],
            )
            .await?;

        let finished_here = updated
            .duel
            .as_ref()
            .map_or(false, |d| d.finished_at == Some(finished_at));
        if finished_here {
            info!(
                lobby_id = %document_id,
                winner = %winner_uid,
                loser = %loser_uid,
                forfeit = forfeit_by.is_some(),
                "Duel ended early"
            );
        }
        Ok(finished_here)
    }

    /// Voluntary leave: the strongest remaining opponent wins
    pub async fn forfeit(&self, document_id: &str, uid: &str) -> Result<bool, DuelError> {
        let record = self.load(document_id).await?;
        let duel = record.duel.as_ref().ok_or(DuelError::NotStarted)?;
        if !duel.health.contains_key(uid) {
            return Err(DuelError::NotAPlayer(uid.to_string()));
        }

        let Some(winner) = forfeit_winner(duel, uid) else {
            return Ok(false);
        };

        self.handle_disconnect(document_id, &winner, uid, Some(uid)).await
    }

    /// End the duel in `self_uid`'s favour when every other alive player has
    /// stopped heartbeating. Returns the player recorded as the loser.
    pub async fn check_opponent_liveness(
        &self,
        document_id: &str,
        self_uid: &str,
        stale_timeout: Duration,
    ) -> Result<Option<Uid>, DuelError> {
        let record = self.load(document_id).await?;
        let Some(loser) = abandoned_by(&record, self_uid, stale_timeout, Utc::now()) else {
            return Ok(None);
        };

        warn!(lobby_id = %document_id, uid = %loser, "Opponent stopped responding, ending duel");
        if self.handle_disconnect(document_id, self_uid, &loser, None).await? {
            Ok(Some(loser))
        } else {
            Ok(None)
        }
    }

    /// Whether the guessing window of the current round has elapsed
    pub fn round_timed_out(duel: &DuelState, now: DateTime<Utc>, round_time: Duration) -> bool {
        duel.phase == DuelPhase::Guessing && older_than(duel.round_started_at, now, round_time)
    }

    /// Whether a click at `point` may be submitted as a guess
    pub async fn is_click_eligible(&self, point: Point) -> Result<bool, DuelError> {
        let area = self.regions.playing_area().await?;
        Ok(RegionResolver::is_inside_playing_area(point, area.as_ref()))
    }

    async fn load(&self, document_id: &str) -> Result<LobbyRecord, DuelError> {
        self.store
            .get(document_id)
            .await?
            .ok_or(DuelError::NotFound)
    }

    async fn update(&self, document_id: &str, updates: Vec<FieldUpdate>) -> Result<LobbyRecord, DuelError> {
        self.store
            .update(document_id, updates)
            .await
            .map_err(|err| match err {
                StoreError::NotFound(_) => DuelError::NotFound,
                other => DuelError::Store(other),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: &str) -> RoundImage {
        RoundImage {
            id: id.to_string(),
            url: format!("https://cdn.example/{}.jpg", id),
            correct_location: Point::new(50.0, 50.0),
            correct_floor: None,
            difficulty: Difficulty::Medium,
        }
    }

    fn scored(score: u32) -> Guess {
        Guess {
            location: Some(Point::new(50.0, 50.0)),
            floor: None,
            score,
            location_score: score,
            distance: Some(0.0),
            floor_correct: None,
            timed_out: false,
            no_guess: false,
            time_taken_seconds: None,
            time_penalty: None,
        }
    }

    fn duel(round: u32, health: &[(&str, u32)], guesses: &[(&str, u32)]) -> DuelState {
        let uids: Vec<Uid> = health.iter().map(|(uid, _)| uid.to_string()).collect();
        let mut duel = DuelState::first_round(&uids, image("img-1"), 6000, false, Utc::now());
        duel.current_round = round;
        duel.health = health.iter().map(|(uid, hp)| (uid.to_string(), *hp)).collect();
        duel.guesses = guesses
            .iter()
            .map(|(uid, score)| (uid.to_string(), scored(*score)))
            .collect();
        duel
    }

    #[test]
    fn test_worse_scorer_takes_the_differential() {
        let state = duel(1, &[("alice", 6000), ("bob", 6000)], &[("alice", 5000), ("bob", 3000)]);
        let resolution = resolve_round(&state, Utc::now()).unwrap();

        assert_eq!(resolution.entry.damage, 2000);
        assert_eq!(resolution.entry.multiplier, 1.0);
        assert_eq!(resolution.entry.damaged_player.as_deref(), Some("bob"));
        assert_eq!(resolution.health["alice"], 6000);
        assert_eq!(resolution.health["bob"], 4000);
        assert!(resolution.outcome.is_none());
    }

    #[test]
    fn test_knockout_finishes_with_survivor_as_winner() {
        let state = duel(5, &[("alice", 3000), ("bob", 6000)], &[("alice", 0), ("bob", 4000)]);
        let resolution = resolve_round(&state, Utc::now()).unwrap();

        assert_eq!(resolution.entry.damage, 8000);
        assert_eq!(resolution.health["alice"], 0);
        let outcome = resolution.outcome.unwrap();
        assert_eq!(outcome.winner.as_deref(), Some("bob"));
        assert_eq!(outcome.loser.as_deref(), Some("alice"));
    }

    #[test]
    fn test_tie_deals_no_damage() {
        let state = duel(3, &[("alice", 6000), ("bob", 6000)], &[("alice", 2500), ("bob", 2500)]);
        let resolution = resolve_round(&state, Utc::now()).unwrap();
        assert_eq!(resolution.entry.damage, 0);
        assert_eq!(resolution.entry.damaged_player, None);
        assert_eq!(resolution.health, state.health);
    }

    #[test]
    fn test_waits_for_every_alive_player() {
        let state = duel(1, &[("alice", 6000), ("bob", 6000)], &[("alice", 5000)]);
        assert!(resolve_round(&state, Utc::now()).is_none());

        // A knocked-out party member does not hold the round up
        let party = duel(
            2,
            &[("alice", 6000), ("bob", 5000), ("carol", 0)],
            &[("alice", 100), ("bob", 4000)],
        );
        let resolution = resolve_round(&party, Utc::now()).unwrap();
        assert_eq!(resolution.entry.damaged_player.as_deref(), Some("alice"));
        assert_eq!(resolution.health["alice"], 2100);
    }

    #[test]
    fn test_resolved_round_is_not_resolved_again() {
        let mut state = duel(1, &[("alice", 6000), ("bob", 6000)], &[("alice", 5000), ("bob", 3000)]);
        let resolution = resolve_round(&state, Utc::now()).unwrap();
        state.round_history.push(resolution.entry);
        assert!(resolve_round(&state, Utc::now()).is_none());
    }

    #[test]
    fn test_used_images_cover_history_and_current() {
        let mut state = duel(2, &[("alice", 6000), ("bob", 6000)], &[]);
        let mut entry = resolve_round(
            &duel(1, &[("alice", 6000), ("bob", 6000)], &[("alice", 1), ("bob", 1)]),
            Utc::now(),
        )
        .unwrap()
        .entry;
        entry.image = image("img-0");
        state.round_history.push(entry);

        let exclude = used_images(&state);
        assert!(exclude.ids.contains("img-0"));
        assert!(exclude.ids.contains("img-1"));
        assert!(exclude.urls.contains("https://cdn.example/img-0.jpg"));
    }

    #[test]
    fn test_round_timeout_only_while_guessing() {
        let mut state = duel(1, &[("alice", 6000), ("bob", 6000)], &[]);
        let now = state.round_started_at + chrono::Duration::seconds(61);
        assert!(DuelService::round_timed_out(&state, now, Duration::from_secs(60)));
        assert!(!DuelService::round_timed_out(&state, now, Duration::from_secs(90)));

        state.phase = DuelPhase::Results;
        assert!(!DuelService::round_timed_out(&state, now, Duration::from_secs(60)));
    }
}
