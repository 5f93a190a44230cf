#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use geoduel::game::{DuelService, DuelSettings, PlayingArea, Region};
use geoduel::lobby::{LobbyDiscovery, LobbyService, LobbySettings};
use geoduel::model::{Difficulty, LobbyMode, Point, RoundImage, Visibility};
use geoduel::store::{
    MemoryStore, RecordStore, StaticFriendDirectory, StaticPhotoCatalog, StaticRegionCatalog,
};

pub const ALICE: &str = "alice";
pub const BOB: &str = "bob";
pub const CAROL: &str = "carol";

/// Services wired to one in-memory store
pub struct Harness {
    pub store: MemoryStore,
    pub lobbies: LobbyService,
    pub discovery: LobbyDiscovery,
    pub duels: DuelService,
}

/// Creates an outdoor image (no floor) at the given point
pub fn create_test_image(id: &str, x: f64, y: f64) -> RoundImage {
    RoundImage {
        id: id.to_string(),
        url: format!("https://cdn.example/{}.jpg", id),
        correct_location: Point::new(x, y),
        correct_floor: None,
        difficulty: Difficulty::Medium,
    }
}

/// Six medium images, all answered at the centre of the map
pub fn create_test_images() -> Vec<RoundImage> {
    (1..=6)
        .map(|n| create_test_image(&format!("img-{}", n), 50.0, 50.0))
        .collect()
}

pub fn create_test_regions() -> Vec<Region> {
    vec![Region {
        id: "hall".to_string(),
        name: Some("Hall".to_string()),
        polygon: vec![
            Point::new(40.0, 40.0),
            Point::new(60.0, 40.0),
            Point::new(60.0, 60.0),
            Point::new(40.0, 60.0),
        ],
        floors: vec![1, 2, 3],
    }]
}

pub fn create_harness() -> Harness {
    create_harness_with(
        MemoryStore::new(),
        StaticFriendDirectory::new(),
        create_test_images(),
    )
}

pub fn create_harness_with(
    store: MemoryStore,
    friends: StaticFriendDirectory,
    images: Vec<RoundImage>,
) -> Harness {
    let shared: Arc<dyn RecordStore> = Arc::new(store.clone());
    let friends = Arc::new(friends);
    let regions = StaticRegionCatalog::new(
        create_test_regions(),
        Some(PlayingArea {
            polygon: vec![
                Point::new(0.0, 0.0),
                Point::new(100.0, 0.0),
                Point::new(100.0, 100.0),
                Point::new(0.0, 100.0),
            ],
        }),
    );

    Harness {
        lobbies: LobbyService::new(shared.clone(), friends.clone(), LobbySettings::default()),
        discovery: LobbyDiscovery::new(shared.clone(), friends),
        duels: DuelService::new(
            shared,
            Arc::new(StaticPhotoCatalog::with_seed(images, 42)),
            Arc::new(regions),
            DuelSettings::default(),
        ),
        store,
    }
}

/// Alice hosts a medium duel lobby with the given visibility
pub async fn create_hosted_lobby(h: &Harness, visibility: Visibility) -> String {
    h.lobbies
        .create_lobby(ALICE, "Alice", Difficulty::Medium, visibility, LobbyMode::Duel)
        .await
        .expect("create lobby")
        .document_id
}

/// Alice hosts, Bob joins, and the duel is started
pub async fn create_started_duel(h: &Harness) -> String {
    let id = create_hosted_lobby(h, Visibility::Public).await;
    h.lobbies
        .join_lobby(&id, BOB, "Bob", Difficulty::Medium)
        .await
        .expect("join lobby");
    h.duels
        .start_duel(&id, &[ALICE.to_string(), BOB.to_string()], Difficulty::Medium)
        .await
        .expect("start duel");
    id
}

/// Guess `distance` map units east of the current round's answer
pub fn point_east_of(image: &RoundImage, distance: f64) -> Point {
    Point::new(image.correct_location.x + distance, image.correct_location.y)
}

/// Backdate a document's field in place
pub async fn backdate<F>(h: &Harness, id: &str, edit: F)
where
    F: FnOnce(&mut geoduel::model::LobbyRecord),
{
    let mut record = h.store.get(id).await.unwrap().expect("lobby exists");
    edit(&mut record);
    h.store.put(record);
}

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}
