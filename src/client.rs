//! Headless duel player
//!
//! Drives one seat of a duel from lobby snapshots: readies up, guesses near
//! the answer after a short think, and, as host, resolves and advances
//! rounds. Both seats run the same loop against the same store.

use std::time::Duration;

use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::game::{DuelError, DuelService};
use crate::lobby::{HeartbeatHandle, LobbyError};
use crate::model::{
    DuelOutcome, DuelPhase, DuelState, GuessSubmission, LobbyMode, LobbyRecord, LobbyStatus, Point,
    RoundImage, Uid,
};
use crate::store::StoreError;

/// How often timers (think time, round timeout, results pause) are checked
const PACE: Duration = Duration::from_millis(250);
/// How long the host leaves round results up before advancing
const RESULTS_PAUSE: Duration = Duration::from_secs(3);
/// Attempts at finding an eligible click before giving up on the round
const CLICK_ATTEMPTS: usize = 3;

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("No open lobby with code {0}")]
    UnknownCode(String),

    #[error(transparent)]
    Lobby(#[from] LobbyError),

    #[error(transparent)]
    Duel(#[from] DuelError),

    #[error("Lobby subscription failed: {0}")]
    Subscription(#[from] StoreError),
}

/// One seat at a duel
pub struct DuelClient {
    state: AppState,
    uid: Uid,
    lobby_id: String,
    join_code: String,
    rng: ChaCha8Rng,
    /// Round this seat already submitted for
    guessed_round: Option<u32>,
    guess_due: Option<(u32, Instant)>,
    advance_due: Option<(u32, Instant)>,
    reported_round: Option<u32>,
}

impl DuelClient {
    /// Create a lobby and take the host seat
    pub async fn host(state: AppState, uid: &str, username: &str) -> Result<Self, ClientError> {
        let config = state.config.clone();
        let created = state
            .lobbies
            .create_lobby(
                uid,
                username,
                config.difficulty,
                config.visibility,
                LobbyMode::Duel,
            )
            .await?;
        info!(code = %created.join_code, "Hosting lobby");
        Ok(Self::seated(state, uid, created.document_id, created.join_code))
    }

    /// Join an open lobby by its code
    pub async fn join(state: AppState, uid: &str, username: &str, code: &str) -> Result<Self, ClientError> {
        let record = state
            .lobbies
            .find_lobby_by_code(code)
            .await?
            .ok_or_else(|| ClientError::UnknownCode(code.to_string()))?;
        let joined = state
            .lobbies
            .join_lobby(&record.id, uid, username, state.config.difficulty)
            .await?;
        Ok(Self::seated(state, uid, joined.id, joined.join_code))
    }

    fn seated(state: AppState, uid: &str, lobby_id: String, join_code: String) -> Self {
        Self {
            state,
            uid: uid.to_string(),
            lobby_id,
            join_code,
            rng: ChaCha8Rng::seed_from_u64(rand::random::<u64>()),
            guessed_round: None,
            guess_due: None,
            advance_due: None,
            reported_round: None,
        }
    }

    pub fn lobby_id(&self) -> &str {
        &self.lobby_id
    }

    pub fn join_code(&self) -> &str {
        &self.join_code
    }

    /// Play until the duel finishes or the lobby disappears
    pub async fn play(mut self) -> Result<Option<DuelOutcome>, ClientError> {
        let settings = self.state.lobbies.settings().clone();
        let heartbeat = HeartbeatHandle::spawn(
            self.state.lobbies.clone(),
            &self.lobby_id,
            &self.uid,
            settings.heartbeat_interval,
        );
        let mut updates = self.state.lobbies.subscribe_lobby(&self.lobby_id).await?;

        let mut pace = interval(PACE);
        pace.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut liveness = interval((settings.stale_timeout / 2).max(PACE));
        liveness.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut latest: Option<LobbyRecord> = None;
        let outcome = loop {
            tokio::select! {
                snapshot = updates.next_snapshot() => match snapshot {
                    Some(Ok(Some(record))) => {
                        if let Some(outcome) = self.on_snapshot(&record).await? {
                            break Some(outcome);
                        }
                        latest = Some(record);
                    }
                    Some(Ok(None)) | None => {
                        info!(lobby_id = %self.lobby_id, "Lobby closed");
                        break None;
                    }
                    Some(Err(err)) => return Err(err.into()),
                },
                _ = pace.tick() => {
                    if let Some(record) = &latest {
                        self.on_tick(record).await?;
                    }
                }
                _ = liveness.tick() => {
                    if let Some(record) = &latest {
                        self.check_liveness(record).await?;
                    }
                }
            }
        };

        heartbeat.stop();
        updates.close();
        Ok(outcome)
    }

    async fn on_snapshot(&mut self, record: &LobbyRecord) -> Result<Option<DuelOutcome>, ClientError> {
        let is_host = record.host_uid == self.uid;

        let Some(duel) = &record.duel else {
            if record.status == LobbyStatus::Waiting {
                self.on_waiting(record, is_host).await?;
            }
            return Ok(None);
        };

        self.report_last_round(duel);
        match duel.phase {
            DuelPhase::Finished => {
                return Ok(Some(DuelOutcome {
                    winner: duel.winner.clone(),
                    loser: duel.loser.clone(),
                    forfeit_by: duel.forfeit_by.clone(),
                    finished_at: duel.finished_at.unwrap_or(record.updated_at),
                }));
            }
            DuelPhase::Guessing => {
                let round = duel.current_round;
                let scheduled = self.guess_due.map(|(r, _)| r) == Some(round);
                if duel.is_alive(&self.uid) && self.guessed_round != Some(round) && !scheduled {
                    let think = Duration::from_millis(self.rng.gen_range(800..4000));
                    self.guess_due = Some((round, Instant::now() + think));
                }
                if is_host && duel.all_alive_guessed() {
                    self.state.duels.process_round(&self.lobby_id).await?;
                }
            }
            DuelPhase::Results => {
                let round = duel.current_round;
                if is_host && self.advance_due.map(|(r, _)| r) != Some(round) {
                    self.advance_due = Some((round, Instant::now() + RESULTS_PAUSE));
                }
            }
        }
        Ok(None)
    }

    async fn on_waiting(&mut self, record: &LobbyRecord, is_host: bool) -> Result<(), ClientError> {
        if !is_host {
            if record.ready_status.get(&self.uid) != Some(&true) {
                self.state
                    .lobbies
                    .set_player_ready(&self.lobby_id, &self.uid, true)
                    .await?;
            }
            return Ok(());
        }

        let everyone_ready = record.players.len() >= LobbyMode::MIN_PLAYERS
            && record
                .opponents_of(&self.uid)
                .all(|p| record.ready_status.get(&p.uid).copied().unwrap_or(false));
        if !everyone_ready {
            return Ok(());
        }

        match self
            .state
            .duels
            .start_duel(&self.lobby_id, &record.uids(), record.difficulty)
            .await
        {
            Ok(_) | Err(DuelError::AlreadyStarted) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn on_tick(&mut self, record: &LobbyRecord) -> Result<(), ClientError> {
        let Some(duel) = &record.duel else {
            return Ok(());
        };
        let now = Instant::now();
        let round = duel.current_round;

        if duel.phase == DuelPhase::Guessing && self.guessed_round != Some(round) {
            let round_time = Duration::from_secs(record.round_time_seconds as u64);
            if DuelService::round_timed_out(duel, Utc::now(), round_time) {
                self.guess_due = None;
                self.submit(duel, true).await?;
            } else if matches!(self.guess_due, Some((r, due)) if r == round && now >= due) {
                self.guess_due = None;
                self.submit(duel, false).await?;
            }
        }

        if let Some((due_round, due)) = self.advance_due {
            if duel.phase != DuelPhase::Results || duel.current_round != due_round {
                self.advance_due = None;
            } else if now >= due {
                self.advance_due = None;
                self.state
                    .duels
                    .advance_to_next_round(&self.lobby_id, record.difficulty)
                    .await?;
            }
        }
        Ok(())
    }

    async fn submit(&mut self, duel: &DuelState, timed_out: bool) -> Result<(), ClientError> {
        self.guessed_round = Some(duel.current_round);
        let submission = if timed_out {
            GuessSubmission::timed_out()
        } else {
            self.pick_guess(&duel.current_image).await?
        };

        match self
            .state
            .duels
            .submit_guess(
                &self.lobby_id,
                &self.uid,
                &submission,
                &duel.current_image,
                Some(duel.round_started_at),
                duel.time_decay,
            )
            .await
        {
            Ok(guess) => {
                info!(
                    uid = %self.uid,
                    round = duel.current_round,
                    score = guess.score,
                    timed_out = guess.timed_out,
                    "Submitted guess"
                );
                Ok(())
            }
            Err(DuelError::RoundClosed) => {
                debug!(uid = %self.uid, round = duel.current_round, "Round closed before guess landed");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// A click somewhere near the answer, inside the playing area
    async fn pick_guess(&mut self, image: &RoundImage) -> Result<GuessSubmission, ClientError> {
        for _ in 0..CLICK_ATTEMPTS {
            let radius = self.rng.gen_range(0.0..25.0);
            let angle = self.rng.gen_range(0.0..std::f64::consts::TAU);
            let point = Point::new(
                (image.correct_location.x + radius * angle.cos()).clamp(0.0, 100.0),
                (image.correct_location.y + radius * angle.sin()).clamp(0.0, 100.0),
            );
            if !self.state.duels.is_click_eligible(point).await? {
                continue;
            }

            let floor = image.correct_floor.map(|floor| {
                if self.rng.gen_bool(0.6) {
                    floor
                } else {
                    floor + self.rng.gen_range(1..=2)
                }
            });
            return Ok(GuessSubmission::at(point, floor));
        }

        warn!(uid = %self.uid, "No eligible click found, passing this round");
        Ok(GuessSubmission::default())
    }

    fn report_last_round(&mut self, duel: &DuelState) {
        let Some(entry) = duel.round_history.last() else {
            return;
        };
        if self.reported_round == Some(entry.round) {
            return;
        }
        self.reported_round = Some(entry.round);

        let mine = entry.guesses.get(&self.uid).map_or(0, |g| g.score);
        info!(
            uid = %self.uid,
            round = entry.round,
            score = mine,
            damage = entry.damage,
            hit = entry.damaged_player.as_deref() == Some(self.uid.as_str()),
            health = entry.health_after.get(&self.uid).copied().unwrap_or(0),
            "Round result"
        );
    }

    async fn check_liveness(&self, record: &LobbyRecord) -> Result<(), ClientError> {
        let timeout = self.state.lobbies.settings().stale_timeout;
        match &record.duel {
            None if record.status == LobbyStatus::Waiting => {
                match self
                    .state
                    .lobbies
                    .remove_stale_players(&self.lobby_id, &self.uid, timeout)
                    .await
                {
                    Ok(_) | Err(LobbyError::NotFound) => Ok(()),
                    Err(err) => Err(err.into()),
                }
            }
            Some(duel) if !duel.is_finished() => {
                match self
                    .state
                    .duels
                    .check_opponent_liveness(&self.lobby_id, &self.uid, timeout)
                    .await
                {
                    Ok(_) | Err(DuelError::NotFound) => Ok(()),
                    Err(err) => Err(err.into()),
                }
            }
            _ => Ok(()),
        }
    }
}

/// Leave whatever this seat is in: forfeit a running duel, otherwise leave
/// the lobby
pub async fn leave(state: &AppState, lobby_id: &str, uid: &str) -> Result<(), ClientError> {
    let Some(record) = state.lobbies.get_lobby(lobby_id).await? else {
        return Ok(());
    };

    match &record.duel {
        Some(duel) if !duel.is_finished() => {
            state.duels.forfeit(lobby_id, uid).await?;
        }
        Some(_) => {}
        None => state.lobbies.leave_lobby(lobby_id, uid).await?,
    }
    Ok(())
}
