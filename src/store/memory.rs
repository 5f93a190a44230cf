//! In-process record store with live notifications
//!
//! Used for local self-play and tests. Documents live in a `DashMap`; every
//! applied write bumps a revision on a `watch` channel that standing reads
//! re-evaluate against.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tracing::debug;
use uuid::Uuid;

use crate::model::LobbyRecord;

use super::{FieldUpdate, LobbyQuery, RecordStore, StoreError, Subscription, SUBSCRIPTION_BUFFER};

struct MemoryInner {
    records: DashMap<String, LobbyRecord>,
    revision: watch::Sender<u64>,
    /// Reject ordered queries, like a backend missing its composite index
    missing_index: bool,
}

impl MemoryInner {
    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn run_query(&self, query: &LobbyQuery) -> Result<Vec<LobbyRecord>, StoreError> {
        if self.missing_index && query.is_ordered() {
            return Err(StoreError::MissingIndex(
                "lobbies(visibility, status, createdAt desc)".to_string(),
            ));
        }
        let matched = self
            .records
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        Ok(query.finish(matched))
    }
}

/// Shared in-memory store; clones share the same documents
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Store whose ordered queries fail with [`StoreError::MissingIndex`]
    pub fn with_missing_index() -> Self {
        Self::build(true)
    }

    fn build(missing_index: bool) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(MemoryInner {
                records: DashMap::new(),
                revision,
                missing_index,
            }),
        }
    }

    /// Insert or replace a document verbatim, keeping its timestamps
    pub fn put(&self, record: LobbyRecord) {
        self.inner.records.insert(record.id.clone(), record);
        self.inner.bump();
    }

    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create(&self, mut record: LobbyRecord) -> Result<LobbyRecord, StoreError> {
        let now = Utc::now();
        record.id = Uuid::new_v4().to_string();
        record.created_at = now;
        record.updated_at = now;
        record.version = 1;

        self.inner.records.insert(record.id.clone(), record.clone());
        self.inner.bump();
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<LobbyRecord>, StoreError> {
        Ok(self.inner.records.get(id).map(|r| r.value().clone()))
    }

    async fn update(&self, id: &str, updates: Vec<FieldUpdate>) -> Result<LobbyRecord, StoreError> {
        let (record, changed) = {
            let mut entry = self
                .inner
                .records
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            let record = entry.value_mut();
            let changed = FieldUpdate::apply_all(&updates, record);
            if changed {
                record.version += 1;
                record.updated_at = Utc::now();
            }
            (record.clone(), changed)
        };

        if changed {
            self.inner.bump();
        } else {
            debug!(id, "Update batch left document unchanged");
        }
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        if self.inner.records.remove(id).is_some() {
            self.inner.bump();
        }
        Ok(())
    }

    async fn query(&self, query: &LobbyQuery) -> Result<Vec<LobbyRecord>, StoreError> {
        self.inner.run_query(query)
    }

    async fn watch(&self, id: &str) -> Result<Subscription<Option<LobbyRecord>>, StoreError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let inner = self.inner.clone();
        let id = id.to_string();
        let mut revision = inner.revision.subscribe();

        let task = tokio::spawn(async move {
            let mut last_version: Option<Option<u64>> = None;
            loop {
                let snapshot = inner.records.get(&id).map(|r| r.value().clone());
                let version = snapshot.as_ref().map(|r| r.version);

                if last_version != Some(version) {
                    last_version = Some(version);
                    let deleted = snapshot.is_none();
                    if tx.send(Ok(snapshot)).await.is_err() || deleted {
                        break;
                    }
                }

                if revision.changed().await.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, task))
    }

    async fn watch_query(&self, query: LobbyQuery) -> Result<Subscription<Vec<LobbyRecord>>, StoreError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let inner = self.inner.clone();
        let mut revision = inner.revision.subscribe();

        let task = tokio::spawn(async move {
            let mut last_seen: Option<Vec<(String, u64)>> = None;
            loop {
                match inner.run_query(&query) {
                    Ok(records) => {
                        let fingerprint: Vec<_> =
                            records.iter().map(|r| (r.id.clone(), r.version)).collect();
                        if last_seen.as_ref() != Some(&fingerprint) {
                            last_seen = Some(fingerprint);
                            if tx.send(Ok(records)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                }

                if revision.changed().await.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Difficulty, LobbyMode, LobbyPlayer, LobbyStatus, Visibility};
    use std::collections::BTreeMap;
    use tokio_test::{assert_err, assert_ok};

    fn draft(code: &str, visibility: Visibility) -> LobbyRecord {
        let now = Utc::now();
        LobbyRecord {
            id: String::new(),
            join_code: code.to_string(),
            host_uid: "host".to_string(),
            host_username: "Host".to_string(),
            difficulty: Difficulty::Easy,
            visibility,
            mode: LobbyMode::Duel,
            status: LobbyStatus::Waiting,
            max_players: 2,
            round_time_seconds: 60,
            players: vec![LobbyPlayer {
                uid: "host".to_string(),
                username: "Host".to_string(),
                joined_at: now,
            }],
            heartbeats: BTreeMap::new(),
            ready_status: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            version: 0,
            duel: None,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_identity() {
        let store = MemoryStore::new();
        let created = assert_ok!(store.create(draft("AAAAAA", Visibility::Public)).await);
        assert!(!created.id.is_empty());
        assert_eq!(created.version, 1);
        assert_eq!(store.get(&created.id).await.unwrap(), Some(created));
    }

    #[tokio::test]
    async fn test_update_bumps_version_only_on_change() {
        let store = MemoryStore::new();
        let created = store.create(draft("BBBBBB", Visibility::Public)).await.unwrap();

        let updated = store
            .update(&created.id, vec![FieldUpdate::SetRoundTime { seconds: 90 }])
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.round_time_seconds, 90);

        let untouched = store
            .update(&created.id, vec![FieldUpdate::RemovePlayer { uid: "ghost".to_string() }])
            .await
            .unwrap();
        assert_eq!(untouched.version, 2);

        let missing = store.update("nope", vec![]).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_watch_delivers_snapshots_until_deleted() {
        let store = MemoryStore::new();
        let created = store.create(draft("CCCCCC", Visibility::Public)).await.unwrap();
        let mut sub = store.watch(&created.id).await.unwrap();

        let first = sub.next_snapshot().await.unwrap().unwrap().unwrap();
        assert_eq!(first.version, 1);

        store
            .update(&created.id, vec![FieldUpdate::SetRoundTime { seconds: 45 }])
            .await
            .unwrap();
        let second = sub.next_snapshot().await.unwrap().unwrap().unwrap();
        assert_eq!(second.round_time_seconds, 45);

        store.delete(&created.id).await.unwrap();
        let gone = sub.next_snapshot().await.unwrap().unwrap();
        assert!(gone.is_none());
        assert!(sub.next_snapshot().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_index_fails_ordered_queries_only() {
        let store = MemoryStore::with_missing_index();
        store.create(draft("DDDDDD", Visibility::Public)).await.unwrap();

        let ordered = LobbyQuery::open(Visibility::Public);
        assert_err!(store.query(&ordered).await);
        let unordered = assert_ok!(store.query(&ordered.clone().unordered()).await);
        assert_eq!(unordered.len(), 1);

        let mut sub = store.watch_query(ordered).await.unwrap();
        assert!(matches!(sub.next_snapshot().await, Some(Err(StoreError::MissingIndex(_)))));
        assert!(sub.next_snapshot().await.is_none());
    }
}
