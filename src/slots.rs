//! Catalog display composition: the "5 slots".
//!
//! Each /catalog invocation draws a fresh page from three pools:
//!
//!   - 2 slots of organic listings (active, neither priority nor ad),
//!   - 1 slot from the TopPeople pool, gender tossed per invocation,
//!   - 1 slot reserved for promoted listings (priority or ad); when that
//!     pool is empty the slot is dropped, or handed to the generic
//!     backfill when `BACKFILL_PROMOTED_SLOT` is set,
//!   - generic backfill up to the slot count, never repeating a listing.
//!
//! The final list is shuffled, so position carries no meaning. Every item
//! that made the page gets its view counter bumped inside one transaction,
//! as `views = views + 1` expressions rather than read-modify-write.

use std::collections::HashSet;

use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    TransactionTrait,
};

use crate::config::Config;
use crate::model::{catalog_post, rating_post};
use crate::rating::{Gender, STATUS_APPROVED};

#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Listing(catalog_post::Model),
    Ranked(rating_post::Model),
}

/// Selects the page from already-fetched pools. `organic` and `promoted`
/// must be disjoint (the queries guarantee it).
pub fn plan<R: Rng + ?Sized>(
    organic: &[catalog_post::Model],
    ranked: &[rating_post::Model],
    promoted: &[catalog_post::Model],
    slot_count: usize,
    backfill_promoted: bool,
    rng: &mut R,
) -> Vec<Slot> {
    let mut picked: Vec<Slot> = Vec::with_capacity(slot_count);
    let mut used_listings: HashSet<i32> = HashSet::new();

    for post in organic.choose_multiple(rng, 2) {
        used_listings.insert(post.id);
        picked.push(Slot::Listing(post.clone()));
    }

    if let Some(post) = ranked.choose(rng) {
        picked.push(Slot::Ranked(post.clone()));
    }

    let mut target = slot_count;
    match promoted.choose(rng) {
        Some(post) => {
            used_listings.insert(post.id);
            picked.push(Slot::Listing(post.clone()));
        }
        // nothing promoted to show: the reserved slot is dropped unless
        // configured to fall through to the generic backfill
        None if !backfill_promoted => target = target.saturating_sub(1),
        None => {}
    }

    let mut backfill: Vec<&catalog_post::Model> = organic
        .iter()
        .chain(promoted.iter())
        .filter(|post| !used_listings.contains(&post.id))
        .collect();
    backfill.shuffle(rng);
    while picked.len() < target {
        match backfill.pop() {
            Some(post) => picked.push(Slot::Listing(post.clone())),
            None => break,
        }
    }

    picked.shuffle(rng);
    picked.truncate(slot_count);
    picked
}

/// Ids to bump, split by pool. Every slot appears exactly once.
fn selected_ids(slots: &[Slot]) -> (Vec<i32>, Vec<i32>) {
    let mut listing_ids = Vec::new();
    let mut ranked_ids = Vec::new();
    for slot in slots {
        match slot {
            Slot::Listing(post) => listing_ids.push(post.id),
            Slot::Ranked(post) => ranked_ids.push(post.id),
        }
    }
    (listing_ids, ranked_ids)
}

/// Composes one catalog page and commits the view-counter bumps.
/// Exhausted pools shrink the page, they never fail it.
pub async fn compose(db: &DatabaseConnection, config: &Config) -> Result<Vec<Slot>, DbErr> {
    let organic = catalog_post::Entity::find()
        .filter(catalog_post::Column::IsActive.eq(true))
        .filter(catalog_post::Column::IsPriority.eq(false))
        .filter(catalog_post::Column::IsAd.eq(false))
        .all(db)
        .await?;

    let promoted = catalog_post::Entity::find()
        .filter(catalog_post::Column::IsActive.eq(true))
        .filter(
            Condition::any()
                .add(catalog_post::Column::IsPriority.eq(true))
                .add(catalog_post::Column::IsAd.eq(true)),
        )
        .all(db)
        .await?;

    let gender = if rand::random::<bool>() {
        Gender::Girl
    } else {
        Gender::Boy
    };
    let ranked = rating_post::Entity::find()
        .filter(rating_post::Column::Status.eq(STATUS_APPROVED))
        .filter(rating_post::Column::Gender.eq(gender.as_str()))
        .all(db)
        .await?;

    let slots = {
        let mut rng = rand::thread_rng();
        plan(
            &organic,
            &ranked,
            &promoted,
            config.catalog_slots,
            config.backfill_promoted_slot,
            &mut rng,
        )
    };

    let (listing_ids, ranked_ids) = selected_ids(&slots);
    let txn = db.begin().await?;
    if !listing_ids.is_empty() {
        catalog_post::Entity::update_many()
            .col_expr(
                catalog_post::Column::Views,
                Expr::col(catalog_post::Column::Views).add(1),
            )
            .filter(catalog_post::Column::Id.is_in(listing_ids))
            .exec(&txn)
            .await?;
    }
    if !ranked_ids.is_empty() {
        rating_post::Entity::update_many()
            .col_expr(
                rating_post::Column::Views,
                Expr::col(rating_post::Column::Views).add(1),
            )
            .filter(rating_post::Column::Id.is_in(ranked_ids))
            .exec(&txn)
            .await?;
    }
    txn.commit().await?;

    debug!(
        "composed {} slots ({} pool for the ranked slot)",
        slots.len(),
        gender.as_str()
    );
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn listing(id: i32, priority: bool, ad: bool) -> catalog_post::Model {
        catalog_post::Model {
            id,
            catalog_number: 1000 + id,
            user_id: 1,
            category: "services".to_string(),
            name: format!("listing {id}"),
            description: None,
            media_file_id: None,
            views: 0,
            clicks: 0,
            is_active: true,
            is_priority: priority,
            is_ad: ad,
            created_at: Utc::now(),
        }
    }

    fn ranked_post(id: i32) -> rating_post::Model {
        rating_post::Model {
            id,
            catalog_number: 2000 + id,
            name: format!("person {id}"),
            about: "calm sharp kind".to_string(),
            gender: "girl".to_string(),
            media_file_id: "file".to_string(),
            author_user_id: 1,
            author_username: None,
            status: STATUS_APPROVED.to_string(),
            published_link: None,
            total_score: 0,
            vote_count: 0,
            views: 0,
            created_at: Utc::now(),
        }
    }

    fn organic_pool(n: i32) -> Vec<catalog_post::Model> {
        (1..=n).map(|id| listing(id, false, false)).collect()
    }

    #[test]
    fn full_pools_fill_every_slot() {
        let organic = organic_pool(20);
        let ranked = vec![ranked_post(1), ranked_post(2)];
        let promoted = vec![listing(100, true, false), listing(101, false, true)];
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..50 {
            let slots = plan(&organic, &ranked, &promoted, 5, false, &mut rng);
            assert_eq!(slots.len(), 5);

            let ranked_count = slots
                .iter()
                .filter(|slot| matches!(slot, Slot::Ranked(_)))
                .count();
            assert_eq!(ranked_count, 1);
        }
    }

    #[test]
    fn no_listing_appears_twice() {
        let organic = organic_pool(6);
        let promoted = vec![listing(100, true, false)];
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..100 {
            let slots = plan(&organic, &[], &promoted, 5, false, &mut rng);
            let (listing_ids, _) = selected_ids(&slots);
            let unique: HashSet<i32> = listing_ids.iter().copied().collect();
            assert_eq!(unique.len(), listing_ids.len());
        }
    }

    #[test]
    fn empty_promoted_pool_drops_the_slot_by_default() {
        let organic = organic_pool(20);
        let ranked = vec![ranked_post(1)];
        let mut rng = StdRng::seed_from_u64(3);

        let slots = plan(&organic, &ranked, &[], 5, false, &mut rng);
        assert_eq!(slots.len(), 4);
    }

    #[test]
    fn empty_promoted_pool_backfills_when_configured() {
        let organic = organic_pool(20);
        let ranked = vec![ranked_post(1)];
        let mut rng = StdRng::seed_from_u64(3);

        let slots = plan(&organic, &ranked, &[], 5, true, &mut rng);
        assert_eq!(slots.len(), 5);
    }

    #[test]
    fn starved_pools_shrink_the_page_instead_of_failing() {
        let organic = organic_pool(1);
        let mut rng = StdRng::seed_from_u64(3);

        let slots = plan(&organic, &[], &[], 5, false, &mut rng);
        assert_eq!(slots.len(), 1);

        let empty = plan(&[], &[], &[], 5, false, &mut rng);
        assert!(empty.is_empty());
    }

    #[test]
    fn every_selected_slot_is_bumped_exactly_once() {
        let organic = organic_pool(20);
        let ranked = vec![ranked_post(1)];
        let promoted = vec![listing(100, false, true)];
        let mut rng = StdRng::seed_from_u64(3);

        let slots = plan(&organic, &ranked, &promoted, 5, false, &mut rng);
        let (listing_ids, ranked_ids) = selected_ids(&slots);

        assert_eq!(listing_ids.len() + ranked_ids.len(), slots.len());
        let unique: HashSet<i32> = listing_ids.iter().copied().collect();
        assert_eq!(unique.len(), listing_ids.len());
    }
}
