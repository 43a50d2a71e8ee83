//! Service-listing catalog and the shared catalog-number pool.
//!
//! Catalog numbers live in one namespace shared between service listings and
//! rating submissions, so a number can be looked up without knowing which
//! pool it landed in. Allocation mirrors UID allocation: uniform-random over
//! the unused remainder of `1..=MAX_CATALOG_NUMBER`, with the unique columns
//! on both tables as the race-closing backstop and a single retry on insert
//! conflict.

use std::collections::HashSet;

use log::{info, warn};
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, Set,
};

use crate::config::Config;
use crate::model::{catalog_post, rating_post};

type DateTimeUtc = chrono::DateTime<chrono::Utc>;

#[derive(Debug)]
pub enum CatalogError {
    /// The whole `1..=MAX_CATALOG_NUMBER` namespace is in use.
    NumbersExhausted,
    /// The priority pool already holds the configured maximum.
    PriorityFull(u64),
    Db(DbErr),
}

/// A hit in the shared number namespace: either pool may own the number.
#[derive(Debug, Clone, PartialEq)]
pub enum Numbered {
    Listing(catalog_post::Model),
    Ranked(rating_post::Model),
}

#[derive(Debug, Clone)]
pub struct NewListing {
    pub user_id: i64,
    pub category: String,
    pub name: String,
    pub description: Option<String>,
    pub media_file_id: Option<String>,
    pub is_priority: bool,
    pub is_ad: bool,
}

/// Picks an unused catalog number uniformly at random from `1..=max`.
pub fn pick_number<R: Rng + ?Sized>(used: &HashSet<i32>, max: i32, rng: &mut R) -> Option<i32> {
    let candidates: Vec<i32> = (1..=max).filter(|n| !used.contains(n)).collect();
    candidates.choose(rng).copied()
}

/// Union of catalog numbers used by both pools, re-read from the store on
/// every call. Caching this set would turn staleness into collisions.
pub async fn used_numbers(db: &DatabaseConnection) -> Result<HashSet<i32>, DbErr> {
    let mut used: HashSet<i32> = catalog_post::Entity::find()
        .all(db)
        .await?
        .into_iter()
        .map(|post| post.catalog_number)
        .collect();
    used.extend(
        rating_post::Entity::find()
            .all(db)
            .await?
            .into_iter()
            .map(|post| post.catalog_number),
    );
    Ok(used)
}

/// `Ok(None)` means the namespace is saturated.
pub async fn allocate_number(db: &DatabaseConnection, max: i32) -> Result<Option<i32>, DbErr> {
    let used = used_numbers(db).await?;
    let mut rng = thread_rng();
    Ok(pick_number(&used, max, &mut rng))
}

pub async fn create_listing(
    db: &DatabaseConnection,
    config: &Config,
    new: &NewListing,
    now: DateTimeUtc,
) -> Result<catalog_post::Model, CatalogError> {
    if new.is_priority {
        let priority_count = catalog_post::Entity::find()
            .filter(catalog_post::Column::IsActive.eq(true))
            .filter(catalog_post::Column::IsPriority.eq(true))
            .all(db)
            .await?
            .len() as u64;
        if priority_count >= config.max_priority_posts {
            return Err(CatalogError::PriorityFull(config.max_priority_posts));
        }
    }

    match insert_listing(db, config, new, now).await {
        Ok(post) => Ok(post),
        Err(CatalogError::Db(err)) => {
            warn!("catalog number insert failed ({err}), retrying once");
            insert_listing(db, config, new, now).await
        }
        Err(err) => Err(err),
    }
}

async fn insert_listing(
    db: &DatabaseConnection,
    config: &Config,
    new: &NewListing,
    now: DateTimeUtc,
) -> Result<catalog_post::Model, CatalogError> {
    let number = allocate_number(db, config.max_catalog_number)
        .await?
        .ok_or(CatalogError::NumbersExhausted)?;

    let active = catalog_post::ActiveModel {
        catalog_number: Set(number),
        user_id: Set(new.user_id),
        category: Set(new.category.clone()),
        name: Set(new.name.clone()),
        description: Set(new.description.clone()),
        media_file_id: Set(new.media_file_id.clone()),
        views: Set(0),
        clicks: Set(0),
        is_active: Set(true),
        is_priority: Set(new.is_priority),
        is_ad: Set(new.is_ad),
        created_at: Set(now),
        ..Default::default()
    };
    let inserted = catalog_post::Entity::insert(active).exec(db).await?;

    info!("listing #{number} created for user {}", new.user_id);
    catalog_post::Entity::find()
        .filter(catalog_post::Column::Id.eq(inserted.last_insert_id))
        .one(db)
        .await?
        .ok_or_else(|| {
            CatalogError::Db(DbErr::RecordNotFound(format!(
                "listing #{number} vanished after insert"
            )))
        })
}

/// Looks a catalog number up across both pools.
pub async fn find_by_number(
    db: &DatabaseConnection,
    number: i32,
) -> Result<Option<Numbered>, DbErr> {
    if let Some(post) = catalog_post::Entity::find()
        .filter(catalog_post::Column::CatalogNumber.eq(number))
        .one(db)
        .await?
    {
        return Ok(Some(Numbered::Listing(post)));
    }

    Ok(rating_post::Entity::find()
        .filter(rating_post::Column::CatalogNumber.eq(number))
        .one(db)
        .await?
        .map(Numbered::Ranked))
}

pub async fn record_click(db: &DatabaseConnection, id: i32) -> Result<(), DbErr> {
    catalog_post::Entity::update_many()
        .col_expr(
            catalog_post::Column::Clicks,
            Expr::col(catalog_post::Column::Clicks).add(1),
        )
        .filter(catalog_post::Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}

/// Soft delete. The row keeps its catalog number so the namespace never
/// hands the number out again while the listing exists.
pub async fn deactivate(
    db: &DatabaseConnection,
    number: i32,
) -> Result<Option<catalog_post::Model>, DbErr> {
    let post = catalog_post::Entity::find()
        .filter(catalog_post::Column::CatalogNumber.eq(number))
        .one(db)
        .await?;
    let post = match post {
        Some(post) => post,
        None => return Ok(None),
    };

    let id = post.id;
    let mut active = post.into_active_model();
    active.is_active = Set(false);
    active.update(db).await?;

    info!("listing #{number} deactivated");
    Ok(catalog_post::Entity::find()
        .filter(catalog_post::Column::Id.eq(id))
        .one(db)
        .await?)
}

pub async fn count_active(db: &DatabaseConnection) -> Result<usize, DbErr> {
    Ok(catalog_post::Entity::find()
        .filter(catalog_post::Column::IsActive.eq(true))
        .all(db)
        .await?
        .len())
}

impl From<DbErr> for CatalogError {
    fn from(e: DbErr) -> Self {
        Self::Db(e)
    }
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NumbersExhausted => write!(f, "no free catalog number left"),
            Self::PriorityFull(max) => write!(f, "priority pool already holds {max} posts"),
            Self::Db(e) => write!(f, "{:?}", e),
        }
    }
}

impl std::error::Error for CatalogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Db(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn picked_number_never_collides_with_either_pool() {
        let pool_a: HashSet<i32> = [1, 5, 9].into_iter().collect();
        let pool_b: HashSet<i32> = [2, 5, 8].into_iter().collect();
        let used: HashSet<i32> = pool_a.union(&pool_b).copied().collect();
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..200 {
            let number = pick_number(&used, 20, &mut rng).unwrap();
            assert!((1..=20).contains(&number));
            assert!(!pool_a.contains(&number));
            assert!(!pool_b.contains(&number));
        }
    }

    #[test]
    fn last_free_number_is_the_only_outcome() {
        // pool A {1,2}, pool B {2,3}, range [1,4]: only 4 remains
        let used: HashSet<i32> = [1, 2, 3].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..50 {
            assert_eq!(pick_number(&used, 4, &mut rng), Some(4));
        }
    }

    #[test]
    fn saturated_namespace_yields_none() {
        let used: HashSet<i32> = (1..=9).collect();
        let mut rng = StdRng::seed_from_u64(11);

        assert_eq!(pick_number(&used, 9, &mut rng), None);
    }
}
