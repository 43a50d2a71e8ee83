//! TopPeople ranking: submissions, moderation, and the voting ledger.
//!
//! A submission enters as `pending`, gets moderated exactly once
//! (`pending -> approved` or `pending -> rejected`, no way back), and only
//! approved posts accept votes. One vote per (post, voter), enforced twice:
//! a read before insert, and the composite unique index as the final word
//! when two votes race. The vote row and both aggregate columns commit as
//! one transaction so a half-applied vote is never observable.

use log::{info, warn};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    IntoActiveModel, Order, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};

use crate::catalog;
use crate::config::Config;
use crate::model::{rating_post, rating_vote};

type DateTimeUtc = chrono::DateTime<chrono::Utc>;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_APPROVED: &str = "approved";
pub const STATUS_REJECTED: &str = "rejected";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Girl,
    Boy,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Girl => "girl",
            Self::Boy => "boy",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "girl" | "girls" | "topgirls" => Some(Self::Girl),
            "boy" | "boys" | "topboys" => Some(Self::Boy),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum AboutError {
    WordCount { found: usize, expected: usize },
    WordTooLong { word: String, max: usize },
}

#[derive(Debug)]
pub enum SubmitError {
    InvalidAbout(AboutError),
    NumbersExhausted,
    Db(DbErr),
}

#[derive(Debug)]
pub enum VoteError {
    InvalidMagnitude { min: i32, max: i32 },
    PostNotFound,
    NotApproved,
    Duplicate,
    Db(DbErr),
}

#[derive(Debug)]
pub enum ModerationError {
    NotFound(i32),
    AlreadyDecided { number: i32, status: String },
    Db(DbErr),
}

/// Aggregate state right after a recorded vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteReceipt {
    pub value: i32,
    pub total_score: i32,
    pub vote_count: i32,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub name: String,
    pub about: String,
    pub gender: Gender,
    pub media_file_id: String,
    pub author_user_id: i64,
    pub author_username: Option<String>,
}

/// The "about" line is free text with a fixed shape: exactly
/// `max_about_words` words, each at most `max_word_length` chars.
pub fn validate_about(about: &str, config: &Config) -> Result<(), AboutError> {
    let words: Vec<&str> = about.split_whitespace().collect();
    if words.len() != config.max_about_words {
        return Err(AboutError::WordCount {
            found: words.len(),
            expected: config.max_about_words,
        });
    }
    for word in words {
        if word.chars().count() > config.max_word_length {
            return Err(AboutError::WordTooLong {
                word: word.to_string(),
                max: config.max_word_length,
            });
        }
    }
    Ok(())
}

pub async fn submit(
    db: &DatabaseConnection,
    config: &Config,
    submission: &Submission,
    now: DateTimeUtc,
) -> Result<rating_post::Model, SubmitError> {
    validate_about(&submission.about, config).map_err(SubmitError::InvalidAbout)?;

    match insert_submission(db, config, submission, now).await {
        Ok(post) => Ok(post),
        Err(SubmitError::Db(err)) => {
            warn!("rating submission insert failed ({err}), retrying once");
            insert_submission(db, config, submission, now).await
        }
        Err(err) => Err(err),
    }
}

async fn insert_submission(
    db: &DatabaseConnection,
    config: &Config,
    submission: &Submission,
    now: DateTimeUtc,
) -> Result<rating_post::Model, SubmitError> {
    let number = catalog::allocate_number(db, config.max_catalog_number)
        .await?
        .ok_or(SubmitError::NumbersExhausted)?;

    let active = rating_post::ActiveModel {
        catalog_number: Set(number),
        name: Set(submission.name.clone()),
        about: Set(submission.about.clone()),
        gender: Set(submission.gender.as_str().to_string()),
        media_file_id: Set(submission.media_file_id.clone()),
        author_user_id: Set(submission.author_user_id),
        author_username: Set(submission.author_username.clone()),
        status: Set(STATUS_PENDING.to_string()),
        published_link: Set(None),
        total_score: Set(0),
        vote_count: Set(0),
        views: Set(0),
        created_at: Set(now),
        ..Default::default()
    };
    let inserted = rating_post::Entity::insert(active).exec(db).await?;

    info!(
        "rating submission #{number} created by user {}",
        submission.author_user_id
    );
    fetch_by_id(db, inserted.last_insert_id)
        .await
        .map_err(SubmitError::Db)
}

pub async fn approve(
    db: &DatabaseConnection,
    number: i32,
    published_link: Option<String>,
) -> Result<rating_post::Model, ModerationError> {
    transition(db, number, STATUS_APPROVED, published_link).await
}

pub async fn reject(
    db: &DatabaseConnection,
    number: i32,
) -> Result<rating_post::Model, ModerationError> {
    transition(db, number, STATUS_REJECTED, None).await
}

async fn transition(
    db: &DatabaseConnection,
    number: i32,
    status: &str,
    published_link: Option<String>,
) -> Result<rating_post::Model, ModerationError> {
    let post = rating_post::Entity::find()
        .filter(rating_post::Column::CatalogNumber.eq(number))
        .one(db)
        .await?
        .ok_or(ModerationError::NotFound(number))?;

    if post.status != STATUS_PENDING {
        return Err(ModerationError::AlreadyDecided {
            number,
            status: post.status,
        });
    }

    let id = post.id;
    let mut active = post.into_active_model();
    active.status = Set(status.to_string());
    if published_link.is_some() {
        active.published_link = Set(published_link);
    }
    active.update(db).await?;

    info!("rating submission #{number} moderated: {status}");
    fetch_by_id(db, id).await.map_err(ModerationError::Db)
}

/// Records one vote. The magnitude check runs before any store access, so
/// an invalid vote never leaves a trace.
pub async fn vote(
    db: &DatabaseConnection,
    config: &Config,
    post_id: i32,
    voter_id: i64,
    value: i32,
    now: DateTimeUtc,
) -> Result<VoteReceipt, VoteError> {
    if value < config.min_vote || value > config.max_vote {
        return Err(VoteError::InvalidMagnitude {
            min: config.min_vote,
            max: config.max_vote,
        });
    }

    let post = rating_post::Entity::find()
        .filter(rating_post::Column::Id.eq(post_id))
        .one(db)
        .await?
        .ok_or(VoteError::PostNotFound)?;
    if post.status != STATUS_APPROVED {
        return Err(VoteError::NotApproved);
    }

    if find_vote(db, post_id, voter_id).await?.is_some() {
        return Err(VoteError::Duplicate);
    }

    let txn = db.begin().await?;

    let active = rating_vote::ActiveModel {
        rating_post_id: Set(post_id),
        user_id: Set(voter_id),
        value: Set(value),
        ts: Set(now),
        ..Default::default()
    };
    if let Err(err) = rating_vote::Entity::insert(active).exec(&txn).await {
        let _ = txn.rollback().await;
        // the unique (post, voter) index may have fired between our check
        // and the insert
        return Err(if find_vote(db, post_id, voter_id).await?.is_some() {
            VoteError::Duplicate
        } else {
            VoteError::Db(err)
        });
    }

    rating_post::Entity::update_many()
        .col_expr(
            rating_post::Column::VoteCount,
            Expr::col(rating_post::Column::VoteCount).add(1),
        )
        .col_expr(
            rating_post::Column::TotalScore,
            Expr::col(rating_post::Column::TotalScore).add(value),
        )
        .filter(rating_post::Column::Id.eq(post_id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    info!("user {voter_id} voted {value:+} on rating post {post_id}");
    Ok(VoteReceipt {
        value,
        total_score: post.total_score + value,
        vote_count: post.vote_count + 1,
    })
}

/// Approved posts ordered by score, descending. Ties keep storage order.
pub async fn top_ranked(
    db: &DatabaseConnection,
    gender: Option<Gender>,
    limit: u64,
) -> Result<Vec<rating_post::Model>, DbErr> {
    let mut query = rating_post::Entity::find()
        .filter(rating_post::Column::Status.eq(STATUS_APPROVED));
    if let Some(gender) = gender {
        query = query.filter(rating_post::Column::Gender.eq(gender.as_str()));
    }
    query
        .order_by(rating_post::Column::TotalScore, Order::Desc)
        .limit(limit)
        .all(db)
        .await
}

pub async fn count_approved(db: &DatabaseConnection) -> Result<usize, DbErr> {
    Ok(rating_post::Entity::find()
        .filter(rating_post::Column::Status.eq(STATUS_APPROVED))
        .all(db)
        .await?
        .len())
}

pub async fn count_votes(db: &DatabaseConnection) -> Result<usize, DbErr> {
    Ok(rating_vote::Entity::find().all(db).await?.len())
}

async fn find_vote(
    db: &DatabaseConnection,
    post_id: i32,
    voter_id: i64,
) -> Result<Option<rating_vote::Model>, DbErr> {
    rating_vote::Entity::find()
        .filter(rating_vote::Column::RatingPostId.eq(post_id))
        .filter(rating_vote::Column::UserId.eq(voter_id))
        .one(db)
        .await
}

async fn fetch_by_id(db: &DatabaseConnection, id: i32) -> Result<rating_post::Model, DbErr> {
    rating_post::Entity::find()
        .filter(rating_post::Column::Id.eq(id))
        .one(db)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("rating post {id} vanished mid-operation")))
}

impl From<DbErr> for SubmitError {
    fn from(e: DbErr) -> Self {
        Self::Db(e)
    }
}

impl From<DbErr> for VoteError {
    fn from(e: DbErr) -> Self {
        Self::Db(e)
    }
}

impl From<DbErr> for ModerationError {
    fn from(e: DbErr) -> Self {
        Self::Db(e)
    }
}

impl std::fmt::Display for AboutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WordCount { found, expected } => {
                write!(f, "about must be exactly {expected} words, got {found}")
            }
            Self::WordTooLong { word, max } => {
                write!(f, "word '{word}' longer than {max} chars")
            }
        }
    }
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAbout(e) => write!(f, "{e}"),
            Self::NumbersExhausted => write!(f, "no free catalog number left"),
            Self::Db(e) => write!(f, "{:?}", e),
        }
    }
}

impl std::fmt::Display for VoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagnitude { min, max } => write!(f, "vote outside {min}..{max}"),
            Self::PostNotFound => write!(f, "rating post not found"),
            Self::NotApproved => write!(f, "rating post is not open for voting"),
            Self::Duplicate => write!(f, "voter already voted on this post"),
            Self::Db(e) => write!(f, "{:?}", e),
        }
    }
}

impl std::fmt::Display for ModerationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(number) => write!(f, "no rating submission #{number}"),
            Self::AlreadyDecided { number, status } => {
                write!(f, "submission #{number} already {status}")
            }
            Self::Db(e) => write!(f, "{:?}", e),
        }
    }
}

impl std::error::Error for SubmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Db(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for VoteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Db(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ModerationError {
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
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn approved_post(id: i32) -> rating_post::Model {
        rating_post::Model {
            id,
            catalog_number: 100 + id,
            name: "Anna".to_string(),
            about: "calm sharp kind".to_string(),
            gender: "girl".to_string(),
            media_file_id: "file-id".to_string(),
            author_user_id: 1,
            author_username: None,
            status: STATUS_APPROVED.to_string(),
            published_link: None,
            total_score: 3,
            vote_count: 2,
            views: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn about_with_three_short_words_passes() {
        let config = Config::for_tests();
        assert!(validate_about("calm sharp kind", &config).is_ok());
    }

    #[test]
    fn about_word_count_is_exact() {
        let config = Config::for_tests();
        assert_eq!(
            validate_about("calm sharp", &config),
            Err(AboutError::WordCount {
                found: 2,
                expected: 3
            })
        );
        assert!(validate_about("a b c d", &config).is_err());
    }

    #[test]
    fn about_rejects_overlong_words_by_chars_not_bytes() {
        let config = Config::for_tests();
        assert_eq!(
            validate_about("calm absolute kind", &config),
            Err(AboutError::WordTooLong {
                word: "absolute".to_string(),
                max: 7
            })
        );
        // seven multibyte chars fit even though the byte length is larger
        assert!(validate_about("ééééééé ok go", &config).is_ok());
    }

    #[test]
    fn gender_parses_common_spellings() {
        assert_eq!(Gender::parse("girls"), Some(Gender::Girl));
        assert_eq!(Gender::parse("TopBoys"), Some(Gender::Boy));
        assert_eq!(Gender::parse("other"), None);
    }

    #[tokio::test]
    async fn out_of_range_vote_is_rejected_before_any_store_access() {
        // no prepared results: a query would fail the test
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let config = Config::for_tests();

        match vote(&db, &config, 1, 7, 3, Utc::now()).await {
            Err(VoteError::InvalidMagnitude { min: -2, max: 2 }) => {}
            other => panic!("expected InvalidMagnitude, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn second_vote_from_same_voter_is_a_duplicate() {
        let existing = rating_vote::Model {
            id: 1,
            rating_post_id: 1,
            user_id: 7,
            value: 2,
            ts: Utc::now(),
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![approved_post(1)]])
            .append_query_results(vec![vec![existing]])
            .into_connection();
        let config = Config::for_tests();

        match vote(&db, &config, 1, 7, 1, Utc::now()).await {
            Err(VoteError::Duplicate) => {}
            other => panic!("expected Duplicate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn vote_on_unknown_post_is_rejected() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![Vec::<rating_post::Model>::new()])
            .into_connection();
        let config = Config::for_tests();

        match vote(&db, &config, 9, 7, 1, Utc::now()).await {
            Err(VoteError::PostNotFound) => {}
            other => panic!("expected PostNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn pending_post_does_not_accept_votes() {
        let mut post = approved_post(1);
        post.status = STATUS_PENDING.to_string();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![post]])
            .into_connection();
        let config = Config::for_tests();

        match vote(&db, &config, 1, 7, 1, Utc::now()).await {
            Err(VoteError::NotApproved) => {}
            other => panic!("expected NotApproved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn moderation_is_single_shot() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![approved_post(1)]])
            .into_connection();

        match reject(&db, 101).await {
            Err(ModerationError::AlreadyDecided { number: 101, status }) => {
                assert_eq!(status, STATUS_APPROVED)
            }
            other => panic!("expected AlreadyDecided, got {:?}", other),
        }
    }
}
