use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::models::DirectoryUser;

/// Activity subtypes the aggregator recognizes; everything else the social
/// layer records is ignored.
pub const ACTIVITY_TYPE_POST: &str = "post";
pub const ACTIVITY_TYPE_COMMENT: &str = "comment";

/// Whether the social-activity layer's storage exists at all. The layer may
/// be uninstalled, in which case every social read degrades to "no data".
pub async fn social_store_exists(pool: &PgPool) -> anyhow::Result<bool> {
    let row = sqlx::query("SELECT to_regclass('engagement_index.activities') IS NOT NULL AS present")
        .fetch_one(pool)
        .await?;
    Ok(row.get("present"))
}

/// Count a user's activities of one recognized subtype. Zero when the social
/// store is absent.
pub async fn count_activities(
    pool: &PgPool,
    user_id: i64,
    activity_type: &str,
) -> anyhow::Result<i64> {
    if !social_store_exists(pool).await? {
        return Ok(0);
    }

    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM engagement_index.activities \
         WHERE user_id = $1 AND activity_type = $2",
    )
    .bind(user_id)
    .bind(activity_type)
    .fetch_one(pool)
    .await?;

    Ok(row.get("n"))
}

/// Timestamp of a user's most recent activity of any subtype, if the social
/// store exists and has seen the user at all.
pub async fn last_activity(
    pool: &PgPool,
    user_id: i64,
) -> anyhow::Result<Option<DateTime<Utc>>> {
    if !social_store_exists(pool).await? {
        return Ok(None);
    }

    let row = sqlx::query(
        "SELECT MAX(recorded_at) AS last_activity FROM engagement_index.activities \
         WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(row.get("last_activity"))
}

/// Look up a user in the directory. `None` when the user has been deleted.
pub async fn fetch_user(pool: &PgPool, user_id: i64) -> anyhow::Result<Option<DirectoryUser>> {
    let row = sqlx::query(
        "SELECT id, user_login, email, display_name, registered_at, last_login \
         FROM engagement_index.users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| DirectoryUser {
        id: row.get("id"),
        user_login: row.get("user_login"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        registered_at: row.get("registered_at"),
        last_login: row.get("last_login"),
    }))
}

/// Keyset-paged directory listing ordered by id. The rebuilder walks this
/// cursor until a short batch signals the end.
pub async fn list_users_after(
    pool: &PgPool,
    after_id: i64,
    limit: i64,
) -> anyhow::Result<Vec<DirectoryUser>> {
    let rows = sqlx::query(
        "SELECT id, user_login, email, display_name, registered_at, last_login \
         FROM engagement_index.users WHERE id > $1 ORDER BY id ASC LIMIT $2",
    )
    .bind(after_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| DirectoryUser {
            id: row.get("id"),
            user_login: row.get("user_login"),
            email: row.get("email"),
            display_name: row.get("display_name"),
            registered_at: row.get("registered_at"),
            last_login: row.get("last_login"),
        })
        .collect())
}

pub async fn count_users(pool: &PgPool) -> anyhow::Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM engagement_index.users")
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}

/// All metadata entries for one user. Course progress, enrollment blobs and
/// the test-user flags all live here.
pub async fn fetch_user_meta(
    pool: &PgPool,
    user_id: i64,
) -> anyhow::Result<HashMap<String, String>> {
    let rows = sqlx::query(
        "SELECT meta_key, meta_value FROM engagement_index.user_meta WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| (row.get("meta_key"), row.get("meta_value")))
        .collect())
}

/// Record a login timestamp in the directory. Called by the login event
/// handler before re-aggregation so the summary picks it up.
pub async fn touch_last_login(pool: &PgPool, user_id: i64) -> anyhow::Result<()> {
    sqlx::query("UPDATE engagement_index.users SET last_login = NOW() WHERE id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}
