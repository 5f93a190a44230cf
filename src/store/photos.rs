//! Supabase-backed photo, region and friendship catalogs

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::game::region::{PlayingArea, Region};
use crate::model::{Difficulty, Point, RoundImage, Uid};

use super::catalog::{CatalogError, FriendDirectory, ImageExclusions, PhotoCatalog, RegionCatalog};
use super::supabase::SupabaseClient;

/// Row in the `images` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRow {
    pub id: String,
    pub url: String,
    pub x: f64,
    pub y: f64,
    pub floor: Option<i32>,
    pub difficulty: Difficulty,
}

impl From<ImageRow> for RoundImage {
    fn from(row: ImageRow) -> Self {
        Self {
            id: row.id,
            url: row.url,
            correct_location: Point::new(row.x, row.y),
            correct_floor: row.floor,
            difficulty: row.difficulty,
        }
    }
}

/// Row in the `friendships` table; one row per pair, either direction
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FriendshipRow {
    user_a: Uid,
    user_b: Uid,
}

/// Catalog operations over Supabase tables
#[derive(Clone)]
pub struct SupabaseCatalog {
    client: SupabaseClient,
}

impl SupabaseCatalog {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    fn images_query(difficulty: Difficulty, exclude: &ImageExclusions) -> String {
        let mut query = format!(
            "difficulty=eq.{}&select=id,url,x,y,floor,difficulty",
            difficulty.as_str()
        );
        if !exclude.ids.is_empty() {
            let mut ids: Vec<&str> = exclude.ids.iter().map(String::as_str).collect();
            ids.sort_unstable();
            query.push_str(&format!("&id=not.in.({})", ids.join(",")));
        }
        query
    }
}

#[async_trait]
impl PhotoCatalog for SupabaseCatalog {
    async fn random_image(
        &self,
        difficulty: Difficulty,
        exclude: &ImageExclusions,
    ) -> Result<Option<RoundImage>, CatalogError> {
        let rows: Vec<ImageRow> = self
            .client
            .get("images", &Self::images_query(difficulty, exclude))
            .await?;

        // URLs can repeat across ids, so they are filtered client-side
        let pool: Vec<RoundImage> = rows
            .into_iter()
            .map(RoundImage::from)
            .filter(|image| !exclude.excludes(image))
            .collect();

        Ok(pool.choose(&mut rand::thread_rng()).cloned())
    }
}

#[async_trait]
impl RegionCatalog for SupabaseCatalog {
    async fn regions(&self) -> Result<Vec<Region>, CatalogError> {
        let regions: Vec<Region> = self
            .client
            .get("regions", "select=id,name,polygon,floors&order=sort_order.asc")
            .await?;

        if let Some(bad) = regions.iter().find(|r| r.polygon.len() < 3) {
            return Err(CatalogError::Malformed(format!(
                "region {} has fewer than 3 vertices",
                bad.id
            )));
        }
        Ok(regions)
    }

    async fn playing_area(&self) -> Result<Option<PlayingArea>, CatalogError> {
        Ok(self
            .client
            .get_one("playing_area", "select=polygon&limit=1")
            .await?)
    }
}

#[async_trait]
impl FriendDirectory for SupabaseCatalog {
    async fn are_friends(&self, a: &str, b: &str) -> Result<bool, CatalogError> {
        let query = format!(
            "or=(and(user_a.eq.{a},user_b.eq.{b}),and(user_a.eq.{b},user_b.eq.{a}))&select=user_a,user_b&limit=1"
        );
        let rows: Vec<FriendshipRow> = self.client.get("friendships", &query).await?;
        Ok(!rows.is_empty())
    }

    async fn friends_of(&self, uid: &str) -> Result<Vec<Uid>, CatalogError> {
        let query = format!("or=(user_a.eq.{uid},user_b.eq.{uid})&select=user_a,user_b");
        let rows: Vec<FriendshipRow> = self.client.get("friendships", &query).await?;
        Ok(rows
            .into_iter()
            .map(|row| if row.user_a == uid { row.user_b } else { row.user_a })
            .collect())
    }
}
