//! Live lobby listings
//!
//! A failing standing query (typically a missing index) is answered with an
//! empty listing and at most one unordered one-shot read. The error path
//! never opens another standing query.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::model::{LobbyRecord, Visibility};
use crate::store::{
    FriendDirectory, LobbyQuery, RecordStore, StoreError, Subscription, SUBSCRIPTION_BUFFER,
};

use super::LobbyError;

type Sender = mpsc::Sender<Result<Vec<LobbyRecord>, StoreError>>;

/// Subscriptions to open lobbies
#[derive(Clone)]
pub struct LobbyDiscovery {
    store: Arc<dyn RecordStore>,
    friends: Arc<dyn FriendDirectory>,
}

impl LobbyDiscovery {
    pub fn new(store: Arc<dyn RecordStore>, friends: Arc<dyn FriendDirectory>) -> Self {
        Self { store, friends }
    }

    /// Waiting public lobbies, newest first
    pub async fn subscribe_public_lobbies(&self) -> Result<Subscription<Vec<LobbyRecord>>, LobbyError> {
        Ok(self.listen(LobbyQuery::open(Visibility::Public)).await)
    }

    /// Waiting friends-only lobbies hosted by a friend of `uid`
    pub async fn subscribe_friends_lobbies(
        &self,
        uid: &str,
    ) -> Result<Subscription<Vec<LobbyRecord>>, LobbyError> {
        let friends = self.friends.friends_of(uid).await?;
        if friends.is_empty() {
            debug!(uid = %uid, "No friends, friends listing is empty");
            let (tx, rx) = mpsc::channel(1);
            let task = tokio::spawn(async move {
                let _ = tx.send(Ok(Vec::new())).await;
            });
            return Ok(Subscription::new(rx, task));
        }

        Ok(self
            .listen(LobbyQuery::open(Visibility::Friends).hosted_by(friends))
            .await)
    }

    async fn listen(&self, query: LobbyQuery) -> Subscription<Vec<LobbyRecord>> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let store = self.store.clone();

        let upstream = match store.watch_query(query.clone()).await {
            Ok(upstream) => Some(upstream),
            Err(err) => {
                warn!(error = %err, "Could not open lobby listing");
                None
            }
        };

        let task = tokio::spawn(async move {
            if let Some(mut upstream) = upstream {
                loop {
                    match upstream.next_snapshot().await {
                        Some(Ok(records)) => {
                            if tx.send(Ok(records)).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "Lobby listing failed");
                            break;
                        }
                        None => return,
                    }
                }
            }
            degrade(store.as_ref(), query, &tx).await;
        });

        Subscription::new(rx, task)
    }
}

/// Emit an empty listing, then the result of one unordered read sorted
/// locally
async fn degrade(store: &dyn RecordStore, query: LobbyQuery, tx: &Sender) {
    if tx.send(Ok(Vec::new())).await.is_err() {
        return;
    }

    let ordered = query.is_ordered();
    let fallback = query.unordered();
    match store.query(&fallback).await {
        Ok(mut records) => {
            if ordered {
                records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            }
            info!(count = records.len(), "Serving lobby listing from one-shot fallback read");
            let _ = tx.send(Ok(records)).await;
        }
        Err(err) => {
            warn!(error = %err, "Fallback lobby read failed, listing stays empty");
        }
    }
}
