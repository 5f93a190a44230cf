//! Shared record store and read-only collaborators
//!
//! The lobby and duel layers only talk to the [`RecordStore`] trait. Two
//! backends exist: an in-process store with live notifications and a
//! Supabase/PostgREST store.

pub mod catalog;
pub mod lobbies;
pub mod memory;
pub mod photos;
pub mod supabase;
pub mod update;

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::model::{LobbyRecord, LobbyStatus, Uid, Visibility};

pub use catalog::{
    CatalogError, FriendDirectory, ImageExclusions, PhotoCatalog, RegionCatalog, StaticFriendDirectory,
    StaticPhotoCatalog, StaticRegionCatalog,
};
pub use lobbies::SupabaseRecordStore;
pub use memory::MemoryStore;
pub use photos::SupabaseCatalog;
pub use supabase::{SupabaseClient, SupabaseError};
pub use update::FieldUpdate;

/// Result ordering for lobby queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryOrder {
    /// Newest `createdAt` first; needs a composite index on real backends
    #[default]
    NewestFirst,
    Unordered,
}

/// Filter over lobby documents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LobbyQuery {
    pub visibility: Option<Visibility>,
    pub status: Option<LobbyStatus>,
    pub join_code: Option<String>,
    /// Restrict to lobbies hosted by one of these players
    pub host_uids: Option<Vec<Uid>>,
    pub order: QueryOrder,
    pub limit: Option<usize>,
}

impl LobbyQuery {
    /// Waiting lobbies with the given visibility, newest first
    pub fn open(visibility: Visibility) -> Self {
        Self {
            visibility: Some(visibility),
            status: Some(LobbyStatus::Waiting),
            ..Default::default()
        }
    }

    pub fn by_code(code: &str) -> Self {
        Self {
            status: Some(LobbyStatus::Waiting),
            join_code: Some(code.to_string()),
            order: QueryOrder::Unordered,
            limit: Some(1),
            ..Default::default()
        }
    }

    pub fn hosted_by(mut self, hosts: Vec<Uid>) -> Self {
        self.host_uids = Some(hosts);
        self
    }

    pub fn unordered(mut self) -> Self {
        self.order = QueryOrder::Unordered;
        self
    }

    pub fn is_ordered(&self) -> bool {
        self.order == QueryOrder::NewestFirst
    }

    /// Client-side evaluation of the filter part of the query
    pub fn matches(&self, record: &LobbyRecord) -> bool {
        self.visibility.map_or(true, |v| record.visibility == v)
            && self.status.map_or(true, |s| record.status == s)
            && self
                .join_code
                .as_ref()
                .map_or(true, |code| &record.join_code == code)
            && self
                .host_uids
                .as_ref()
                .map_or(true, |hosts| hosts.contains(&record.host_uid))
    }

    /// Sort and truncate a filtered result set
    pub fn finish(&self, mut records: Vec<LobbyRecord>) -> Vec<LobbyRecord> {
        if self.is_ordered() {
            records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }
        if let Some(limit) = self.limit {
            records.truncate(limit);
        }
        records
    }
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Query requires an index that does not exist: {0}")]
    MissingIndex(String),

    #[error("Write conflicted with concurrent updates after {attempts} attempts")]
    Conflict { attempts: usize },

    #[error("Backend error: {0}")]
    Backend(#[from] SupabaseError),

    #[error("Subscription closed")]
    Closed,
}

/// Shared document database as seen by one client
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new document. The store assigns `id`, `createdAt`,
    /// `updatedAt` and `version`.
    async fn create(&self, record: LobbyRecord) -> Result<LobbyRecord, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<LobbyRecord>, StoreError>;

    /// Apply a batch atomically and return the document as it is afterwards
    async fn update(&self, id: &str, updates: Vec<FieldUpdate>) -> Result<LobbyRecord, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// One-shot read
    async fn query(&self, query: &LobbyQuery) -> Result<Vec<LobbyRecord>, StoreError>;

    /// Live snapshots of one document; `None` once it is deleted
    async fn watch(&self, id: &str) -> Result<Subscription<Option<LobbyRecord>>, StoreError>;

    /// Live result sets of a standing query. An error item ends the stream.
    async fn watch_query(&self, query: LobbyQuery) -> Result<Subscription<Vec<LobbyRecord>>, StoreError>;
}

/// A standing read: full snapshots until closed or dropped
pub struct Subscription<T> {
    rx: mpsc::Receiver<Result<T, StoreError>>,
    task: JoinHandle<()>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::Receiver<Result<T, StoreError>>, task: JoinHandle<()>) -> Self {
        Self { rx, task }
    }

    /// Next snapshot, or `None` once the feed has ended
    pub async fn next_snapshot(&mut self) -> Option<Result<T, StoreError>> {
        self.rx.recv().await
    }

    pub fn close(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<T> Unpin for Subscription<T> {}

impl<T> Stream for Subscription<T> {
    type Item = Result<T, StoreError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Snapshot channel capacity for subscriptions
pub(crate) const SUBSCRIPTION_BUFFER: usize = 16;
