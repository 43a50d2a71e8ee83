//! Per-(user, command) cooldowns with lazy expiry: an expired row counts as
//! absent and is deleted on the next check, there is no background sweeper.

use log::debug;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};

use crate::config::Config;
use crate::model::cooldown;

type DateTimeUtc = chrono::DateTime<chrono::Utc>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ready,
    Cooling { seconds_left: i64 },
}

/// Remaining-time arithmetic, separated out so the clock stays a parameter.
pub fn verdict(expires_at: DateTimeUtc, now: DateTimeUtc) -> Verdict {
    let seconds_left = (expires_at - now).num_seconds();
    if seconds_left <= 0 {
        Verdict::Ready
    } else {
        Verdict::Cooling { seconds_left }
    }
}

pub async fn check(
    db: &DatabaseConnection,
    user_id: i64,
    command: &str,
    now: DateTimeUtc,
) -> Result<Verdict, DbErr> {
    let row = cooldown::Entity::find()
        .filter(cooldown::Column::UserId.eq(user_id))
        .filter(cooldown::Column::Command.eq(command))
        .one(db)
        .await?;

    let row = match row {
        Some(row) => row,
        None => return Ok(Verdict::Ready),
    };

    match verdict(row.expires_at, now) {
        Verdict::Ready => {
            cooldown::Entity::delete_many()
                .filter(cooldown::Column::Id.eq(row.id))
                .exec(db)
                .await?;
            debug!("expired cooldown ({command}) dropped for user {user_id}");
            Ok(Verdict::Ready)
        }
        cooling => Ok(cooling),
    }
}

/// Replaces any live row for (user, command) with a fresh expiry.
pub async fn arm(
    db: &DatabaseConnection,
    config: &Config,
    user_id: i64,
    command: &str,
    now: DateTimeUtc,
) -> Result<(), DbErr> {
    let duration = config.cooldown_for(command);

    cooldown::Entity::delete_many()
        .filter(cooldown::Column::UserId.eq(user_id))
        .filter(cooldown::Column::Command.eq(command))
        .exec(db)
        .await?;

    let active = cooldown::ActiveModel {
        user_id: Set(user_id),
        command: Set(command.to_string()),
        expires_at: Set(now + chrono::Duration::seconds(duration)),
        ..Default::default()
    };
    cooldown::Entity::insert(active).exec(db).await?;

    debug!("cooldown ({command}) armed for user {user_id}, {duration}s");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn t0() -> DateTimeUtc {
        Utc.ymd(2025, 6, 1).and_hms(12, 0, 0)
    }

    #[test]
    fn fresh_arm_reports_full_duration() {
        // arm(duration=10800) at t, checked at t
        let expires = t0() + Duration::seconds(10800);
        assert_eq!(
            verdict(expires, t0()),
            Verdict::Cooling {
                seconds_left: 10800
            }
        );
    }

    #[test]
    fn expiry_boundary_is_ready() {
        let expires = t0() + Duration::seconds(10);
        assert_eq!(
            verdict(expires, t0() + Duration::seconds(10)),
            Verdict::Ready
        );
        assert_eq!(
            verdict(expires, t0() + Duration::seconds(11)),
            Verdict::Ready
        );
    }

    #[test]
    fn mid_window_reports_remaining_seconds() {
        let expires = t0() + Duration::seconds(3600);
        assert_eq!(
            verdict(expires, t0() + Duration::seconds(600)),
            Verdict::Cooling { seconds_left: 3000 }
        );
    }

    #[tokio::test]
    async fn no_row_means_ready() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![Vec::<cooldown::Model>::new()])
            .into_connection();

        assert_eq!(check(&db, 7, "gorateme", t0()).await.unwrap(), Verdict::Ready);
    }

    #[tokio::test]
    async fn live_row_blocks_with_time_left() {
        let row = cooldown::Model {
            id: 1,
            user_id: 7,
            command: "gorateme".to_string(),
            expires_at: t0() + Duration::seconds(10800),
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![row]])
            .into_connection();

        assert_eq!(
            check(&db, 7, "gorateme", t0()).await.unwrap(),
            Verdict::Cooling {
                seconds_left: 10800
            }
        );
    }
}
