use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::models::SummaryRow;

/// Idempotent upsert keyed on `user_id`. `indexed_at` is set once on insert
/// and never touched again; `updated_at` moves on every write.
pub async fn upsert_summary(pool: &PgPool, row: &SummaryRow) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO engagement_index.user_summary
        (user_id, activity_count, comment_count, enrolled_courses, completed_courses,
         in_progress_courses, avg_progress, last_activity, last_login, user_type, is_test_user)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (user_id) DO UPDATE SET
            activity_count = EXCLUDED.activity_count,
            comment_count = EXCLUDED.comment_count,
            enrolled_courses = EXCLUDED.enrolled_courses,
            completed_courses = EXCLUDED.completed_courses,
            in_progress_courses = EXCLUDED.in_progress_courses,
            avg_progress = EXCLUDED.avg_progress,
            last_activity = EXCLUDED.last_activity,
            last_login = EXCLUDED.last_login,
            user_type = EXCLUDED.user_type,
            is_test_user = EXCLUDED.is_test_user,
            updated_at = NOW()
        "#,
    )
    .bind(row.user_id)
    .bind(row.activity_count)
    .bind(row.comment_count)
    .bind(row.enrolled_courses)
    .bind(row.completed_courses)
    .bind(row.in_progress_courses)
    .bind(row.avg_progress)
    .bind(row.last_activity)
    .bind(row.last_login)
    .bind(&row.user_type)
    .bind(row.is_test_user)
    .execute(pool)
    .await?;

    Ok(())
}

/// Hard-delete summary rows whose user no longer resolves in the directory.
pub async fn delete_orphans(pool: &PgPool) -> anyhow::Result<u64> {
    let result = sqlx::query(
        "DELETE FROM engagement_index.user_summary s \
         WHERE NOT EXISTS (SELECT 1 FROM engagement_index.users u WHERE u.id = s.user_id)",
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn count_indexed(pool: &PgPool) -> anyhow::Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM engagement_index.user_summary")
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}

/// Newest `updated_at` across all summary rows; `None` when the store is
/// empty.
pub async fn last_update(pool: &PgPool) -> anyhow::Result<Option<DateTime<Utc>>> {
    let row = sqlx::query("SELECT MAX(updated_at) AS last_update FROM engagement_index.user_summary")
        .fetch_one(pool)
        .await?;
    Ok(row.get("last_update"))
}
