//! Lobby documents stored in a PostgREST `lobbies` table
//!
//! Filterable fields are mirrored into columns; the full record lives in a
//! JSON `record` column. Writes are optimistic: read, apply, then PATCH
//! filtered on the version that was read.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{LobbyRecord, LobbyStatus, Uid, Visibility};

use super::supabase::SupabaseClient;
use super::{FieldUpdate, LobbyQuery, RecordStore, StoreError, Subscription, SUBSCRIPTION_BUFFER};

const TABLE: &str = "lobbies";
const MAX_UPDATE_ATTEMPTS: usize = 5;

/// Row shape of the `lobbies` table
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LobbyRow {
    id: String,
    join_code: String,
    visibility: Visibility,
    status: LobbyStatus,
    host_uid: Uid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
    record: LobbyRecord,
}

impl LobbyRow {
    fn from_record(record: &LobbyRecord) -> Self {
        Self {
            id: record.id.clone(),
            join_code: record.join_code.clone(),
            visibility: record.visibility,
            status: record.status,
            host_uid: record.host_uid.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            version: record.version as i64,
            record: record.clone(),
        }
    }

    /// Columns are authoritative for store-assigned fields
    fn into_record(self) -> LobbyRecord {
        let mut record = self.record;
        record.id = self.id;
        record.created_at = self.created_at;
        record.updated_at = self.updated_at;
        record.version = self.version.max(0) as u64;
        record
    }
}

/// Supabase-backed [`RecordStore`]
#[derive(Clone)]
pub struct SupabaseRecordStore {
    client: SupabaseClient,
    /// Refresh period for standing reads
    poll_interval: Duration,
}

impl SupabaseRecordStore {
    pub fn new(client: SupabaseClient, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }

    fn id_filter(id: &str) -> String {
        format!("id=eq.{}", id)
    }

    /// PostgREST query string for a lobby query
    fn query_string(query: &LobbyQuery) -> String {
        let mut parts = Vec::new();
        if let Some(visibility) = query.visibility {
            parts.push(format!("visibility=eq.{}", visibility.as_str()));
        }
        if let Some(status) = query.status {
            parts.push(format!("status=eq.{}", status.as_str()));
        }
        if let Some(code) = &query.join_code {
            parts.push(format!("join_code=eq.{}", code));
        }
        if let Some(hosts) = &query.host_uids {
            parts.push(format!("host_uid=in.({})", hosts.join(",")));
        }
        if query.is_ordered() {
            parts.push("order=created_at.desc".to_string());
        }
        if let Some(limit) = query.limit {
            parts.push(format!("limit={}", limit));
        }
        parts.join("&")
    }

    async fn fetch(client: &SupabaseClient, id: &str) -> Result<Option<LobbyRecord>, StoreError> {
        let row: Option<LobbyRow> = client.get_one(TABLE, &Self::id_filter(id)).await?;
        Ok(row.map(LobbyRow::into_record))
    }

    async fn run_query(client: &SupabaseClient, query: &LobbyQuery) -> Result<Vec<LobbyRecord>, StoreError> {
        let rows: Vec<LobbyRow> = client
            .get(TABLE, &Self::query_string(query))
            .await
            .map_err(|err| {
                if err.is_query_rejected() {
                    StoreError::MissingIndex(err.to_string())
                } else {
                    StoreError::Backend(err)
                }
            })?;
        Ok(rows.into_iter().map(LobbyRow::into_record).collect())
    }
}

#[async_trait]
impl RecordStore for SupabaseRecordStore {
    async fn create(&self, mut record: LobbyRecord) -> Result<LobbyRecord, StoreError> {
        let now = Utc::now();
        record.id = Uuid::new_v4().to_string();
        record.created_at = now;
        record.updated_at = now;
        record.version = 1;

        let row: LobbyRow = self.client.insert(TABLE, &LobbyRow::from_record(&record)).await?;
        Ok(row.into_record())
    }

    async fn get(&self, id: &str) -> Result<Option<LobbyRecord>, StoreError> {
        Self::fetch(&self.client, id).await
    }

    async fn update(&self, id: &str, updates: Vec<FieldUpdate>) -> Result<LobbyRecord, StoreError> {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let current = Self::fetch(&self.client, id)
                .await?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

            let mut next = current.clone();
            if !FieldUpdate::apply_all(&updates, &mut next) {
                return Ok(current);
            }
            next.version = current.version + 1;
            next.updated_at = Utc::now();

            let filter = format!("{}&version=eq.{}", Self::id_filter(id), current.version);
            let written: Vec<LobbyRow> = self
                .client
                .update(TABLE, &filter, &LobbyRow::from_record(&next))
                .await?;

            match written.into_iter().next() {
                Some(row) => return Ok(row.into_record()),
                None => {
                    debug!(id, attempt, "Concurrent write won, re-reading lobby");
                }
            }
        }

        warn!(id, "Giving up on lobby update after repeated conflicts");
        Err(StoreError::Conflict {
            attempts: MAX_UPDATE_ATTEMPTS,
        })
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.client.delete(TABLE, &Self::id_filter(id)).await?;
        Ok(())
    }

    async fn query(&self, query: &LobbyQuery) -> Result<Vec<LobbyRecord>, StoreError> {
        Self::run_query(&self.client, query).await
    }

    async fn watch(&self, id: &str) -> Result<Subscription<Option<LobbyRecord>>, StoreError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let client = self.client.clone();
        let id = id.to_string();
        let period = self.poll_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last_version: Option<Option<u64>> = None;

            loop {
                ticker.tick().await;
                match Self::fetch(&client, &id).await {
                    Ok(snapshot) => {
                        let version = snapshot.as_ref().map(|r| r.version);
                        if last_version == Some(version) {
                            continue;
                        }
                        last_version = Some(version);
                        let deleted = snapshot.is_none();
                        if tx.send(Ok(snapshot)).await.is_err() || deleted {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(rx, task))
    }

    async fn watch_query(&self, query: LobbyQuery) -> Result<Subscription<Vec<LobbyRecord>>, StoreError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let client = self.client.clone();
        let period = self.poll_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last_seen: Option<Vec<(String, u64)>> = None;

            loop {
                ticker.tick().await;
                match Self::run_query(&client, &query).await {
                    Ok(records) => {
                        let fingerprint: Vec<_> =
                            records.iter().map(|r| (r.id.clone(), r.version)).collect();
                        if last_seen.as_ref() == Some(&fingerprint) {
                            continue;
                        }
                        last_seen = Some(fingerprint);
                        if tx.send(Ok(records)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(rx, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string_for_public_listing() {
        let query = LobbyQuery::open(Visibility::Public);
        assert_eq!(
            SupabaseRecordStore::query_string(&query),
            "visibility=eq.public&status=eq.waiting&order=created_at.desc"
        );
    }

    #[test]
    fn test_query_string_for_code_and_hosts() {
        assert_eq!(
            SupabaseRecordStore::query_string(&LobbyQuery::by_code("K7QX2M")),
            "status=eq.waiting&join_code=eq.K7QX2M&limit=1"
        );

        let friends = LobbyQuery::open(Visibility::Friends)
            .hosted_by(vec!["u1".to_string(), "u2".to_string()])
            .unordered();
        assert_eq!(
            SupabaseRecordStore::query_string(&friends),
            "visibility=eq.friends&status=eq.waiting&host_uid=in.(u1,u2)"
        );
    }
}
