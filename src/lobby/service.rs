//! Lobby lifecycle manager
//!
//! Every mutator re-reads the document right before writing and expresses
//! its write as guarded [`FieldUpdate`]s, so two clients acting on the same
//! lobby never push it into an inconsistent state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::game::duel::{abandoned_by, forfeit_winner};
use crate::model::{
    Difficulty, DuelOutcome, LobbyMode, LobbyPlayer, LobbyRecord, LobbyStatus, Uid, Visibility,
};
use crate::store::{
    FieldUpdate, FriendDirectory, LobbyQuery, RecordStore, StoreError, Subscription,
};
use crate::util::time::older_than;

use super::code::{generate_join_code, is_valid_join_code, normalize_join_code};
use super::heartbeat::stale_players;
use super::{LobbyError, LobbySettings};

/// Attempts at finding a join code no waiting lobby uses
const MAX_CODE_ATTEMPTS: usize = 5;

/// Identifiers handed back to the creator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedLobby {
    pub document_id: String,
    pub join_code: String,
}

/// Lobby operations against the shared store
#[derive(Clone)]
pub struct LobbyService {
    store: Arc<dyn RecordStore>,
    friends: Arc<dyn FriendDirectory>,
    settings: LobbySettings,
}

impl LobbyService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        friends: Arc<dyn FriendDirectory>,
        settings: LobbySettings,
    ) -> Self {
        Self {
            store,
            friends,
            settings,
        }
    }

    pub fn settings(&self) -> &LobbySettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Create a lobby with the host as its only member
    pub async fn create_lobby(
        &self,
        host_uid: &str,
        host_username: &str,
        difficulty: Difficulty,
        visibility: Visibility,
        mode: LobbyMode,
    ) -> Result<CreatedLobby, LobbyError> {
        let join_code = self.unique_join_code().await?;
        let now = Utc::now();

        let record = LobbyRecord {
            id: String::new(),
            join_code,
            host_uid: host_uid.to_string(),
            host_username: host_username.to_string(),
            difficulty,
            visibility,
            mode,
            status: LobbyStatus::Waiting,
            max_players: mode.max_players(),
            round_time_seconds: self.settings.default_round_time_secs,
            players: vec![LobbyPlayer {
                uid: host_uid.to_string(),
                username: host_username.to_string(),
                joined_at: now,
            }],
            heartbeats: BTreeMap::from([(host_uid.to_string(), now)]),
            ready_status: BTreeMap::from([(host_uid.to_string(), false)]),
            created_at: now,
            updated_at: now,
            version: 0,
            duel: None,
        };

        let created = self.store.create(record).await?;
        info!(
            lobby_id = %created.id,
            code = %created.join_code,
            host = %host_uid,
            ?visibility,
            max_players = created.max_players,
            "Created lobby"
        );

        Ok(CreatedLobby {
            document_id: created.id,
            join_code: created.join_code,
        })
    }

    async fn unique_join_code(&self) -> Result<String, LobbyError> {
        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = generate_join_code();
            let taken = self.store.query(&LobbyQuery::by_code(&code)).await?;
            if taken.is_empty() {
                debug!("Generated unique join code '{}' on attempt {}", code, attempt);
                return Ok(code);
            }
        }
        Err(LobbyError::CodeExhausted)
    }

    pub fn is_expired(&self, record: &LobbyRecord, now: DateTime<Utc>) -> bool {
        older_than(record.created_at, now, self.settings.ttl)
    }

    /// Look up a waiting lobby by join code, deleting it if it has expired
    pub async fn find_lobby_by_code(&self, code: &str) -> Result<Option<LobbyRecord>, LobbyError> {
        let code = normalize_join_code(code);
        if !is_valid_join_code(&code) {
            return Ok(None);
        }

        let found = self.store.query(&LobbyQuery::by_code(&code)).await?;
        let Some(record) = found.into_iter().next() else {
            return Ok(None);
        };

        if self.is_expired(&record, Utc::now()) {
            info!(lobby_id = %record.id, code = %code, "Deleting expired lobby");
            self.store.delete(&record.id).await?;
            return Ok(None);
        }
        Ok(Some(record))
    }

    pub async fn get_lobby(&self, document_id: &str) -> Result<Option<LobbyRecord>, LobbyError> {
        Ok(self.store.get(document_id).await?)
    }

    /// Live snapshots of one lobby (and the duel it turns into)
    pub async fn subscribe_lobby(
        &self,
        document_id: &str,
    ) -> Result<Subscription<Option<LobbyRecord>>, LobbyError> {
        Ok(self.store.watch(document_id).await?)
    }

    /// Join a waiting lobby. Every rejection leaves the document untouched.
    pub async fn join_lobby(
        &self,
        document_id: &str,
        uid: &str,
        username: &str,
        requested_difficulty: Difficulty,
    ) -> Result<LobbyRecord, LobbyError> {
        let record = self
            .store
            .get(document_id)
            .await?
            .ok_or(LobbyError::NotFound)?;

        if self.is_expired(&record, Utc::now()) {
            info!(lobby_id = %document_id, "Join attempted on expired lobby, deleting it");
            self.store.delete(document_id).await?;
            return Err(LobbyError::Expired);
        }
        if record.status != LobbyStatus::Waiting {
            return Err(LobbyError::AlreadyStarted);
        }
        if record.difficulty != requested_difficulty {
            return Err(LobbyError::DifficultyMismatch {
                lobby: record.difficulty,
                requested: requested_difficulty,
            });
        }
        if record.is_full() {
            return Err(LobbyError::Full);
        }
        if record.is_member(uid) {
            return Err(LobbyError::AlreadyJoined);
        }
        if record.visibility == Visibility::Friends
            && record.host_uid != uid
            && !self.friends.are_friends(uid, &record.host_uid).await?
        {
            return Err(LobbyError::FriendshipRequired);
        }

        let now = Utc::now();
        let updated = self
            .update(
                document_id,
                vec![FieldUpdate::AddPlayer {
                    player: LobbyPlayer {
                        uid: uid.to_string(),
                        username: username.to_string(),
                        joined_at: now,
                    },
                    heartbeat: now,
                }],
            )
            .await?;

        if !updated.is_member(uid) {
            // Someone else filled the slot or started the game in between
            return Err(if updated.status != LobbyStatus::Waiting {
                LobbyError::AlreadyStarted
            } else {
                LobbyError::Full
            });
        }

        info!(
            lobby_id = %document_id,
            uid = %uid,
            players = updated.players.len(),
            "Player joined lobby"
        );
        Ok(updated)
    }

    /// Leave a lobby; the last player out deletes it. Leaving a running duel
    /// forfeits it instead.
    pub async fn leave_lobby(&self, document_id: &str, uid: &str) -> Result<(), LobbyError> {
        let Some(record) = self.store.get(document_id).await? else {
            return Ok(());
        };

        match record.status {
            LobbyStatus::Waiting => {
                self.remove_member(&record, uid).await?;
            }
            LobbyStatus::InProgress => {
                let winner = record
                    .duel
                    .as_ref()
                    .filter(|duel| duel.is_alive(uid))
                    .and_then(|duel| forfeit_winner(duel, uid));
                match winner {
                    Some(winner) if record.is_member(uid) => {
                        self.finish_duel(document_id, &winner, uid, Some(uid)).await?;
                    }
                    _ => debug!(lobby_id = %document_id, uid = %uid, "Nothing to forfeit"),
                }
            }
            LobbyStatus::Finished => {
                debug!(lobby_id = %document_id, uid = %uid, "Duel already over, lobby left as is");
            }
        }
        Ok(())
    }

    /// Remove one member from a freshly read waiting lobby. Returns whether
    /// the removal happened.
    async fn remove_member(&self, record: &LobbyRecord, uid: &str) -> Result<bool, LobbyError> {
        if !record.is_member(uid) {
            debug!(lobby_id = %record.id, uid = %uid, "Not a member, nothing to remove");
            return Ok(false);
        }

        let updated = match self
            .store
            .update(&record.id, vec![FieldUpdate::RemovePlayer { uid: uid.to_string() }])
            .await
        {
            Ok(updated) => updated,
            Err(StoreError::NotFound(_)) => return Ok(false),
            Err(err) => return Err(err.into()),
        };

        if updated.is_member(uid) {
            debug!(lobby_id = %record.id, uid = %uid, "Lobby started before the removal landed");
            return Ok(false);
        }

        if updated.players.is_empty() {
            self.store.delete(&record.id).await?;
            info!(lobby_id = %record.id, uid = %uid, "Last player left, deleted lobby");
            return Ok(true);
        }

        if record.host_uid == uid && updated.host_uid != uid {
            info!(
                lobby_id = %record.id,
                from = %uid,
                to = %updated.host_uid,
                "Host transferred"
            );
        }
        info!(lobby_id = %record.id, uid = %uid, "Player left lobby");
        Ok(true)
    }

    /// Refresh this player's liveness timestamp
    pub async fn send_heartbeat(&self, document_id: &str, uid: &str) -> Result<(), LobbyError> {
        self.update(
            document_id,
            vec![FieldUpdate::Heartbeat {
                uid: uid.to_string(),
                at: Utc::now(),
            }],
        )
        .await?;
        Ok(())
    }

    /// Remove every other player whose heartbeat is older than the timeout,
    /// one at a time with a fresh read before each removal. In a running duel
    /// the roster is fixed: once every opponent has gone quiet the duel ends
    /// in the caller's favour and the recorded loser is returned.
    pub async fn remove_stale_players(
        &self,
        document_id: &str,
        current_uid: &str,
        stale_timeout: Duration,
    ) -> Result<Vec<Uid>, LobbyError> {
        let mut removed = Vec::new();

        loop {
            let Some(record) = self.store.get(document_id).await? else {
                break;
            };
            if record.status == LobbyStatus::InProgress {
                if let Some(loser) = abandoned_by(&record, current_uid, stale_timeout, Utc::now()) {
                    warn!(lobby_id = %document_id, uid = %loser, "Opponent stopped responding, ending duel");
                    if self.finish_duel(document_id, current_uid, &loser, None).await? {
                        removed.push(loser);
                    }
                }
                break;
            }
            if record.status != LobbyStatus::Waiting {
                break;
            }

            let stale = stale_players(&record, current_uid, stale_timeout, Utc::now());
            let Some(uid) = stale.into_iter().next() else {
                break;
            };

            warn!(lobby_id = %document_id, uid = %uid, "Removing stale player");
            if !self.remove_member(&record, &uid).await? {
                break;
            }
            removed.push(uid);
        }

        Ok(removed)
    }

    pub async fn set_player_ready(
        &self,
        document_id: &str,
        uid: &str,
        ready: bool,
    ) -> Result<(), LobbyError> {
        let updated = self
            .update(
                document_id,
                vec![FieldUpdate::SetReady {
                    uid: uid.to_string(),
                    ready,
                }],
            )
            .await?;

        if !updated.is_member(uid) {
            return Err(LobbyError::NotAMember(uid.to_string()));
        }
        Ok(())
    }

    /// Set the guessing window, clamped to the allowed range
    pub async fn update_round_time(&self, document_id: &str, seconds: u32) -> Result<u32, LobbyError> {
        let seconds = seconds.clamp(
            LobbySettings::MIN_ROUND_TIME_SECS,
            LobbySettings::MAX_ROUND_TIME_SECS,
        );
        let updated = self
            .update(document_id, vec![FieldUpdate::SetRoundTime { seconds }])
            .await?;
        Ok(updated.round_time_seconds)
    }

    /// Terminal finish of a running duel with `loser` knocked out. Returns
    /// whether this call ended it.
    async fn finish_duel(
        &self,
        document_id: &str,
        winner: &str,
        loser: &str,
        forfeit_by: Option<&str>,
    ) -> Result<bool, LobbyError> {
        let finished_at = Utc::now();
        let updated = self
            .update(
                document_id,
                vec![FieldUpdate::Finish {
                    outcome: DuelOutcome {
                        winner: Some(winner.to_string()),
                        loser: Some(loser.to_string()),
                        forfeit_by: forfeit_by.map(str::to_string),
                        finished_at,
                    },
                    knocked_out: Some(loser.to_string()),
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
                winner = %winner,
                loser = %loser,
                forfeit = forfeit_by.is_some(),
                "Duel ended by departure"
            );
        }
        Ok(finished_here)
    }

    async fn update(
        &self,
        document_id: &str,
        updates: Vec<FieldUpdate>,
    ) -> Result<LobbyRecord, LobbyError> {
        self.store
            .update(document_id, updates)
            .await
            .map_err(|err| match err {
                StoreError::NotFound(_) => LobbyError::NotFound,
                other => LobbyError::Store(other),
            })
    }
}
