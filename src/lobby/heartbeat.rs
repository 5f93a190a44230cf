//! Liveness heartbeats and stale-player detection

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error};

use crate::model::{LobbyRecord, Uid};
use crate::util::time::older_than;

use super::{LobbyError, LobbyService};

/// Handle for a running heartbeat loop; dropping it stops the loop
pub struct HeartbeatHandle {
    task: JoinHandle<()>,
    pub document_id: String,
    pub uid: Uid,
}

impl HeartbeatHandle {
    /// Refresh `uid`'s heartbeat every `period` until stopped or the lobby
    /// document disappears
    pub fn spawn(lobbies: LobbyService, document_id: &str, uid: &str, period: Duration) -> Self {
        let lobby_id = document_id.to_string();
        let player = uid.to_string();

        let task = tokio::spawn(async move {
            let mut ticker = interval(period.max(Duration::from_millis(100)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match lobbies.send_heartbeat(&lobby_id, &player).await {
                    Ok(()) => {}
                    Err(LobbyError::NotFound) => {
                        debug!(lobby_id = %lobby_id, uid = %player, "Lobby gone, stopping heartbeat");
                        break;
                    }
                    Err(err) => {
                        error!("Failed to send heartbeat for {} in {}: {}", player, lobby_id, err);
                    }
                }
            }
        });

        Self {
            task,
            document_id: document_id.to_string(),
            uid: uid.to_string(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(self) {}
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Players other than `current_uid` whose last heartbeat is older than
/// `timeout`. A player with no heartbeat is aged from when they joined.
pub fn stale_players(
    record: &LobbyRecord,
    current_uid: &str,
    timeout: Duration,
    now: DateTime<Utc>,
) -> Vec<Uid> {
    record
        .players
        .iter()
        .filter(|player| player.uid != current_uid)
        .filter(|player| {
            let last_seen = record
                .heartbeats
                .get(&player.uid)
                .copied()
                .unwrap_or(player.joined_at);
            older_than(last_seen, now, timeout)
        })
        .map(|player| player.uid.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Difficulty, LobbyMode, LobbyPlayer, LobbyStatus, Visibility};
    use chrono::Duration as ChronoDuration;
    use std::collections::BTreeMap;

    fn lobby(now: DateTime<Utc>) -> LobbyRecord {
        let player = |uid: &str, secs: i64| LobbyPlayer {
            uid: uid.to_string(),
            username: uid.to_uppercase(),
            joined_at: now - ChronoDuration::seconds(secs),
        };
        LobbyRecord {
            id: "lobby".to_string(),
            join_code: "ABCDEF".to_string(),
            host_uid: "me".to_string(),
            host_username: "ME".to_string(),
            difficulty: Difficulty::Medium,
            visibility: Visibility::Public,
            mode: LobbyMode::Party { max_players: 4 },
            status: LobbyStatus::Waiting,
            max_players: 4,
            round_time_seconds: 60,
            players: vec![player("me", 120), player("fresh", 60), player("stale", 60), player("silent", 45)],
            heartbeats: BTreeMap::from([
                ("me".to_string(), now - ChronoDuration::seconds(90)),
                ("fresh".to_string(), now - ChronoDuration::seconds(5)),
                ("stale".to_string(), now - ChronoDuration::seconds(31)),
            ]),
            ready_status: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            version: 1,
            duel: None,
        }
    }

    #[test]
    fn test_stale_players_skips_caller() {
        let now = Utc::now();
        let stale = stale_players(&lobby(now), "me", Duration::from_secs(30), now);
        assert_eq!(stale, vec!["stale".to_string(), "silent".to_string()]);
    }

    #[test]
    fn test_nobody_stale_within_window() {
        let now = Utc::now();
        let stale = stale_players(&lobby(now), "me", Duration::from_secs(120), now);
        assert!(stale.is_empty());
    }
}
