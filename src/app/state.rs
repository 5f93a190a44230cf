//! Application state shared by every client task

use std::sync::Arc;

use crate::config::Config;
use crate::game::DuelService;
use crate::lobby::{LobbyDiscovery, LobbyService};
use crate::store::{
    FriendDirectory, MemoryStore, PhotoCatalog, RecordStore, RegionCatalog, StaticFriendDirectory,
    StaticPhotoCatalog, StaticRegionCatalog, SupabaseCatalog, SupabaseClient, SupabaseRecordStore,
};

use super::demo;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn RecordStore>,
    pub lobbies: LobbyService,
    pub discovery: LobbyDiscovery,
    pub duels: DuelService,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        match config.supabase.clone() {
            Some(supabase) => {
                // Initialize Supabase client
                let client = SupabaseClient::new(&supabase.url, &supabase.service_role_key);
                let store = Arc::new(SupabaseRecordStore::new(client.clone(), supabase.poll_interval));
                let catalog = Arc::new(SupabaseCatalog::new(client));
                Self::with_parts(config, store, catalog.clone(), catalog.clone(), catalog)
            }
            None => Self::with_parts(
                config,
                Arc::new(MemoryStore::new()),
                Arc::new(StaticPhotoCatalog::new(demo::images())),
                Arc::new(StaticRegionCatalog::new(demo::regions(), Some(demo::playing_area()))),
                Arc::new(StaticFriendDirectory::new()),
            ),
        }
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn RecordStore>,
        photos: Arc<dyn PhotoCatalog>,
        regions: Arc<dyn RegionCatalog>,
        friends: Arc<dyn FriendDirectory>,
    ) -> Self {
        let config = Arc::new(config);

        let lobbies = LobbyService::new(store.clone(), friends.clone(), config.lobby.clone());
        let discovery = LobbyDiscovery::new(store.clone(), friends);
        let duels = DuelService::new(store.clone(), photos, regions, config.duel.clone());

        Self {
            config,
            store,
            lobbies,
            discovery,
            duels,
        }
    }
}
