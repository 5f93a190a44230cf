//! Read-only collaborators: photo catalog, region catalog, friendships

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::game::region::{PlayingArea, Region};
use crate::model::{Difficulty, RoundImage, Uid};

use super::supabase::SupabaseError;

/// Collaborator errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Catalog backend error: {0}")]
    Backend(#[from] SupabaseError),

    #[error("Catalog returned malformed data: {0}")]
    Malformed(String),
}

/// Images a round must not reuse
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageExclusions {
    pub ids: HashSet<String>,
    pub urls: HashSet<String>,
}

impl ImageExclusions {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.urls.is_empty()
    }

    pub fn excludes(&self, image: &RoundImage) -> bool {
        self.ids.contains(&image.id) || self.urls.contains(&image.url)
    }
}

/// Source of round photos
#[async_trait]
pub trait PhotoCatalog: Send + Sync {
    /// A random eligible image, or `None` when the filtered pool is empty
    async fn random_image(
        &self,
        difficulty: Difficulty,
        exclude: &ImageExclusions,
    ) -> Result<Option<RoundImage>, CatalogError>;
}

/// Building footprints and the optional click boundary
#[async_trait]
pub trait RegionCatalog: Send + Sync {
    async fn regions(&self) -> Result<Vec<Region>, CatalogError>;

    async fn playing_area(&self) -> Result<Option<PlayingArea>, CatalogError>;
}

/// Friendship lookups for friends-only lobbies
#[async_trait]
pub trait FriendDirectory: Send + Sync {
    async fn are_friends(&self, a: &str, b: &str) -> Result<bool, CatalogError>;

    async fn friends_of(&self, uid: &str) -> Result<Vec<Uid>, CatalogError>;
}

/// Fixed photo set with a seeded picker
pub struct StaticPhotoCatalog {
    images: Vec<RoundImage>,
    rng: Mutex<ChaCha8Rng>,
}

impl StaticPhotoCatalog {
    pub fn new(images: Vec<RoundImage>) -> Self {
        Self::with_seed(images, rand::random::<u64>())
    }

    pub fn with_seed(images: Vec<RoundImage>, seed: u64) -> Self {
        Self {
            images,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[async_trait]
impl PhotoCatalog for StaticPhotoCatalog {
    async fn random_image(
        &self,
        difficulty: Difficulty,
        exclude: &ImageExclusions,
    ) -> Result<Option<RoundImage>, CatalogError> {
        let pool: Vec<&RoundImage> = self
            .images
            .iter()
            .filter(|image| image.difficulty == difficulty && !exclude.excludes(image))
            .collect();

        let mut rng = self.rng.lock();
        Ok(pool.choose(&mut *rng).map(|image| (*image).clone()))
    }
}

/// Fixed region data
#[derive(Debug, Clone, Default)]
pub struct StaticRegionCatalog {
    regions: Vec<Region>,
    playing_area: Option<PlayingArea>,
}

impl StaticRegionCatalog {
    pub fn new(regions: Vec<Region>, playing_area: Option<PlayingArea>) -> Self {
        Self {
            regions,
            playing_area,
        }
    }
}

#[async_trait]
impl RegionCatalog for StaticRegionCatalog {
    async fn regions(&self) -> Result<Vec<Region>, CatalogError> {
        Ok(self.regions.clone())
    }

    async fn playing_area(&self) -> Result<Option<PlayingArea>, CatalogError> {
        Ok(self.playing_area.clone())
    }
}

/// Fixed, symmetric friendship pairs
#[derive(Debug, Clone, Default)]
pub struct StaticFriendDirectory {
    pairs: BTreeSet<(Uid, Uid)>,
}

impl StaticFriendDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_friendship(mut self, a: &str, b: &str) -> Self {
        self.pairs.insert(Self::key(a, b));
        self
    }

    fn key(a: &str, b: &str) -> (Uid, Uid) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }
}

#[async_trait]
impl FriendDirectory for StaticFriendDirectory {
    async fn are_friends(&self, a: &str, b: &str) -> Result<bool, CatalogError> {
        Ok(self.pairs.contains(&Self::key(a, b)))
    }

    async fn friends_of(&self, uid: &str) -> Result<Vec<Uid>, CatalogError> {
        Ok(self
            .pairs
            .iter()
            .filter_map(|(a, b)| match (a == uid, b == uid) {
                (true, _) => Some(b.clone()),
                (_, true) => Some(a.clone()),
                _ => None,
            })
            .collect())
    }
}
