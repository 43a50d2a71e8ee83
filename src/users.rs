//! User registry and UID allocation.
//!
//! Every user gets a scarce community-facing UID picked uniformly at random
//! from `[MIN_UID, MAX_UID]` minus the reserved list minus everything already
//! handed out. Random selection keeps the numbers unguessable; the unique
//! index on `users.uid` is the authority that closes the race between two
//! concurrent registrations, so an insert conflict is retried once with a
//! freshly re-read exclusion set.

use std::collections::HashSet;

use log::{info, warn};
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, Set,
};

use crate::config::Config;
use crate::model::user;

type DateTimeUtc = chrono::DateTime<chrono::Utc>;

/// Profile fields supplied by the messaging platform with each update.
#[derive(Debug, Clone)]
pub struct Profile {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

#[derive(Debug)]
pub enum RegisterError {
    /// Every number in the valid range is reserved or taken.
    UidsExhausted,
    Db(DbErr),
}

#[derive(Debug)]
pub enum ReassignError {
    OutOfRange { min: i32, max: i32 },
    NotFound(i32),
    Taken(i32),
    Db(DbErr),
}

/// Picks a UID uniformly at random from the candidate set, or `None` when
/// the set is empty.
pub fn pick_uid<R: Rng + ?Sized>(
    taken: &HashSet<i32>,
    reserved: &HashSet<i32>,
    min: i32,
    max: i32,
    rng: &mut R,
) -> Option<i32> {
    let candidates: Vec<i32> = (min..=max)
        .filter(|n| !reserved.contains(n) && !taken.contains(n))
        .collect();
    candidates.choose(rng).copied()
}

/// Gets or creates the user behind an inbound update.
///
/// Existing users get their profile fields refreshed and activity counters
/// bumped; unknown users are registered with a freshly allocated UID.
pub async fn touch(
    db: &DatabaseConnection,
    config: &Config,
    profile: &Profile,
    now: DateTimeUtc,
) -> Result<user::Model, RegisterError> {
    let existing = user::Entity::find()
        .filter(user::Column::Id.eq(profile.id))
        .one(db)
        .await?;

    if let Some(user) = existing {
        let message_count = user.message_count + 1;
        let mut active = user.into_active_model();
        active.username = Set(profile.username.clone());
        active.first_name = Set(profile.first_name.clone());
        active.last_activity = Set(now);
        active.message_count = Set(message_count);
        active.update(db).await?;
        return Ok(fetch_by_id(db, profile.id).await?);
    }

    match register(db, config, profile, now).await {
        Ok(user) => Ok(user),
        Err(RegisterError::Db(err)) => {
            // Two registrations raced on the same UID, or the same user sent
            // two first messages at once. One retry with re-read state.
            warn!(
                "uid insert for user {} failed ({err}), retrying once",
                profile.id
            );
            if let Some(user) = user::Entity::find()
                .filter(user::Column::Id.eq(profile.id))
                .one(db)
                .await?
            {
                return Ok(user);
            }
            register(db, config, profile, now).await
        }
        Err(err) => Err(err),
    }
}

async fn register(
    db: &DatabaseConnection,
    config: &Config,
    profile: &Profile,
    now: DateTimeUtc,
) -> Result<user::Model, RegisterError> {
    let taken: HashSet<i32> = user::Entity::find()
        .all(db)
        .await?
        .into_iter()
        .map(|user| user.uid)
        .collect();

    let uid = {
        let mut rng = thread_rng();
        pick_uid(
            &taken,
            &config.reserved_uids,
            config.min_uid,
            config.max_uid,
            &mut rng,
        )
    }
    .ok_or(RegisterError::UidsExhausted)?;

    let active = user::ActiveModel {
        id: Set(profile.id),
        uid: Set(uid),
        username: Set(profile.username.clone()),
        first_name: Set(profile.first_name.clone()),
        is_banned: Set(false),
        is_admin: Set(false),
        is_moderator: Set(false),
        last_activity: Set(now),
        message_count: Set(1),
        created_at: Set(now),
    };
    user::Entity::insert(active).exec(db).await?;

    info!("registered user {} with uid {uid}", profile.id);
    Ok(fetch_by_id(db, profile.id).await?)
}

/// Moves a UID to a new value. Admin path: reserved values are assignable
/// here, only automatic allocation excludes them.
pub async fn reassign(
    db: &DatabaseConnection,
    config: &Config,
    current_uid: i32,
    new_uid: i32,
) -> Result<user::Model, ReassignError> {
    if new_uid < config.min_uid || new_uid > config.max_uid {
        return Err(ReassignError::OutOfRange {
            min: config.min_uid,
            max: config.max_uid,
        });
    }

    let user = find_by_uid(db, current_uid)
        .await?
        .ok_or(ReassignError::NotFound(current_uid))?;

    if find_by_uid(db, new_uid).await?.is_some() {
        return Err(ReassignError::Taken(new_uid));
    }

    let id = user.id;
    let mut active = user.into_active_model();
    active.uid = Set(new_uid);
    active.update(db).await?;

    info!("uid {current_uid} reassigned to {new_uid} for user {id}");
    Ok(fetch_by_id(db, id).await?)
}

pub async fn find_by_uid(
    db: &DatabaseConnection,
    uid: i32,
) -> Result<Option<user::Model>, DbErr> {
    user::Entity::find()
        .filter(user::Column::Uid.eq(uid))
        .one(db)
        .await
}

/// Soft ban toggle; the row stays so the UID is never recycled.
pub async fn set_banned(
    db: &DatabaseConnection,
    uid: i32,
    banned: bool,
) -> Result<Option<user::Model>, DbErr> {
    let user = match find_by_uid(db, uid).await? {
        Some(user) => user,
        None => return Ok(None),
    };
    let id = user.id;
    let mut active = user.into_active_model();
    active.is_banned = Set(banned);
    active.update(db).await?;
    info!("user {id} (uid {uid}) banned={banned}");
    Ok(Some(fetch_by_id(db, id).await?))
}

pub async fn count(db: &DatabaseConnection) -> Result<usize, DbErr> {
    Ok(user::Entity::find().all(db).await?.len())
}

async fn fetch_by_id(db: &DatabaseConnection, id: i64) -> Result<user::Model, DbErr> {
    user::Entity::find()
        .filter(user::Column::Id.eq(id))
        .one(db)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("user {id} vanished mid-operation")))
}

impl From<DbErr> for RegisterError {
    fn from(e: DbErr) -> Self {
        Self::Db(e)
    }
}

impl From<DbErr> for ReassignError {
    fn from(e: DbErr) -> Self {
        Self::Db(e)
    }
}

impl std::fmt::Display for RegisterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UidsExhausted => write!(f, "no free uid left in the configured range"),
            Self::Db(e) => write!(f, "{:?}", e),
        }
    }
}

impl std::fmt::Display for ReassignError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange { min, max } => write!(f, "uid outside {min}-{max}"),
            Self::NotFound(uid) => write!(f, "no user holds uid {uid}"),
            Self::Taken(uid) => write!(f, "uid {uid} already taken"),
            Self::Db(e) => write!(f, "{:?}", e),
        }
    }
}

impl std::error::Error for RegisterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Db(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ReassignError {
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
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[test]
    fn picked_uid_avoids_reserved_and_taken() {
        let reserved: HashSet<i32> = [1, 2, 3].into_iter().collect();
        let taken: HashSet<i32> = (10..=20).collect();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let uid = pick_uid(&taken, &reserved, 1, 50, &mut rng).unwrap();
            assert!((1..=50).contains(&uid));
            assert!(!reserved.contains(&uid));
            assert!(!taken.contains(&uid));
        }
    }

    #[test]
    fn exhausted_range_yields_none() {
        let reserved: HashSet<i32> = [1, 2].into_iter().collect();
        let taken: HashSet<i32> = [3, 4, 5].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(7);

        assert_eq!(pick_uid(&taken, &reserved, 1, 5, &mut rng), None);
    }

    #[test]
    fn only_unreserved_candidates_remain() {
        // range [1,5] with {1,2,3} reserved leaves exactly {4,5}
        let reserved: HashSet<i32> = [1, 2, 3].into_iter().collect();
        let taken = HashSet::new();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..50 {
            let uid = pick_uid(&taken, &reserved, 1, 5, &mut rng).unwrap();
            assert!(uid == 4 || uid == 5);
        }
    }

    #[tokio::test]
    async fn reassign_rejects_out_of_range_before_touching_the_store() {
        // no query results prepared: the range check must short-circuit
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let config = Config::for_tests();

        match reassign(&db, &config, 5, 1_000_000).await {
            Err(ReassignError::OutOfRange { min: 1, max: 99999 }) => {}
            other => panic!("expected OutOfRange, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn reassign_reports_unknown_current_uid() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![Vec::<user::Model>::new()])
            .into_connection();
        let config = Config::for_tests();

        match reassign(&db, &config, 5, 50).await {
            Err(ReassignError::NotFound(5)) => {}
            other => panic!("expected NotFound, got {:?}", other),
        }
    }
}
