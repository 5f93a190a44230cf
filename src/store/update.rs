//! Field-level writes against the shared record
//!
//! Every backend applies a batch of updates atomically per document. Each
//! variant carries the guard it needs so that a write computed from a stale
//! read, or replayed by the second client, leaves the record untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::model::{
    DuelOutcome, DuelPhase, DuelState, Guess, LobbyPlayer, LobbyRecord, LobbyStatus, RoundHistoryEntry,
    RoundImage, Uid,
};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    /// Append a member; skipped when the lobby is not waiting, full, or already has them
    AddPlayer {
        player: LobbyPlayer,
        heartbeat: DateTime<Utc>,
    },
    /// Remove a member of a waiting lobby, handing host to the next remaining player
    RemovePlayer { uid: Uid },
    Heartbeat { uid: Uid, at: DateTime<Utc> },
    SetReady { uid: Uid, ready: bool },
    SetRoundTime { seconds: u32 },
    /// Seed round 1; only applies to a waiting lobby
    BeginDuel { duel: DuelState },
    /// Record a guess for `round`; skipped once that round stopped accepting guesses
    SetGuess { uid: Uid, round: u32, guess: Guess },
    /// Append the round recap and new health totals exactly once per round
    ResolveRound {
        entry: RoundHistoryEntry,
        health: BTreeMap<Uid, u32>,
        outcome: Option<DuelOutcome>,
    },
    /// Move from results into the next round's guessing phase
    BeginRound {
        round: u32,
        image: RoundImage,
        started_at: DateTime<Utc>,
    },
    /// Terminal transition outside normal round resolution (disconnect, forfeit)
    Finish {
        outcome: DuelOutcome,
        knocked_out: Option<Uid>,
    },
}

impl FieldUpdate {
    /// Apply to a record in place, returns whether anything changed
    pub fn apply(&self, record: &mut LobbyRecord) -> bool {
        match self {
            Self::AddPlayer { player, heartbeat } => {
                if record.status != LobbyStatus::Waiting
                    || record.is_full()
                    || record.is_member(&player.uid)
                {
                    return false;
                }
                record.players.push(player.clone());
                record.heartbeats.insert(player.uid.clone(), *heartbeat);
                reset_ready(record);
                true
            }
            Self::RemovePlayer { uid } => {
                // Once started, the roster is pinned to the duel's health map
                if record.status != LobbyStatus::Waiting {
                    return false;
                }
                let Some(index) = record.players.iter().position(|p| &p.uid == uid) else {
                    return false;
                };
                record.players.remove(index);
                record.heartbeats.remove(uid);
                record.ready_status.remove(uid);

                if &record.host_uid == uid {
                    if let Some(next) = record.players.first() {
                        record.host_uid = next.uid.clone();
                        record.host_username = next.username.clone();
                    }
                }
                reset_ready(record);
                true
            }
            Self::Heartbeat { uid, at } => {
                if !record.is_member(uid) {
                    return false;
                }
                record.heartbeats.insert(uid.clone(), *at);
                true
            }
            Self::SetReady { uid, ready } => {
                if !record.is_member(uid) || record.status != LobbyStatus::Waiting {
                    return false;
                }
                record.ready_status.insert(uid.clone(), *ready);
                true
            }
            Self::SetRoundTime { seconds } => {
                if record.status != LobbyStatus::Waiting {
                    return false;
                }
                record.round_time_seconds = *seconds;
                true
            }
            Self::BeginDuel { duel } => {
                if record.status != LobbyStatus::Waiting {
                    return false;
                }
                record.status = LobbyStatus::InProgress;
                record.duel = Some(duel.clone());
                true
            }
            Self::SetGuess { uid, round, guess } => {
                let Some(duel) = record.duel.as_mut() else {
                    return false;
                };
                if duel.phase != DuelPhase::Guessing
                    || duel.current_round != *round
                    || !duel.health.contains_key(uid)
                {
                    return false;
                }
                duel.guesses.insert(uid.clone(), guess.clone());
                true
            }
            Self::ResolveRound {
                entry,
                health,
                outcome,
            } => {
                let Some(duel) = record.duel.as_mut() else {
                    return false;
                };
                let already_recorded = duel.round_history.iter().any(|e| e.round == entry.round);
                if duel.phase != DuelPhase::Guessing
                    || duel.current_round != entry.round
                    || already_recorded
                {
                    return false;
                }
                duel.round_history.push(entry.clone());
                duel.health = health.clone();
                match outcome {
                    Some(outcome) => {
                        finish(duel, outcome);
                        record.status = LobbyStatus::Finished;
                    }
                    None => duel.phase = DuelPhase::Results,
                }
                true
            }
            Self::BeginRound {
                round,
                image,
                started_at,
            } => {
                let Some(duel) = record.duel.as_mut() else {
                    return false;
                };
                if duel.phase != DuelPhase::Results || duel.current_round + 1 != *round {
                    return false;
                }
                duel.phase = DuelPhase::Guessing;
                duel.current_round = *round;
                duel.current_image = image.clone();
                duel.round_started_at = *started_at;
                duel.guesses.clear();
                true
            }
            Self::Finish {
                outcome,
                knocked_out,
            } => {
                let Some(duel) = record.duel.as_mut() else {
                    return false;
                };
                if duel.is_finished() {
                    return false;
                }
                if let Some(uid) = knocked_out {
                    if let Some(hp) = duel.health.get_mut(uid) {
                        *hp = 0;
                    }
                }
                finish(duel, outcome);
                record.status = LobbyStatus::Finished;
                true
            }
        }
    }

    /// Apply a batch in order, returns whether any update changed the record
    pub fn apply_all(updates: &[FieldUpdate], record: &mut LobbyRecord) -> bool {
        updates
            .iter()
            .fold(false, |changed, update| update.apply(record) || changed)
    }
}

/// A membership change invalidates everyone's readiness
fn reset_ready(record: &mut LobbyRecord) {
    record.ready_status = record
        .players
        .iter()
        .map(|p| (p.uid.clone(), false))
        .collect();
}

fn finish(duel: &mut DuelState, outcome: &DuelOutcome) {
    duel.phase = DuelPhase::Finished;
    duel.winner = outcome.winner.clone();
    duel.loser = outcome.loser.clone();
    duel.forfeit_by = outcome.forfeit_by.clone();
    duel.finished_at = Some(outcome.finished_at);
}
