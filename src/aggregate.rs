use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::cache::QueryCache;
use crate::models::{DirectoryUser, SummaryRow};
use crate::progress::{self, CourseMetrics};
use crate::{sources, store};

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("user {0} not found in the directory")]
    UserNotFound(i64),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Meta keys mirrored into the summary row as filter dimensions.
const META_IS_TEST_USER: &str = "is_test_user";
const META_USER_TYPE: &str = "user_type";
const DEFAULT_USER_TYPE: &str = "regular";

/// Assemble a summary row from the already-fetched pieces. Pure so the flag
/// handling is testable without a database.
pub fn build_summary(
    user: &DirectoryUser,
    activity_count: i64,
    comment_count: i64,
    last_activity: Option<DateTime<Utc>>,
    metrics: &CourseMetrics,
    meta: &HashMap<String, String>,
) -> SummaryRow {
    let is_test_user = meta
        .get(META_IS_TEST_USER)
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);
    let user_type = meta
        .get(META_USER_TYPE)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_USER_TYPE.to_string());

    SummaryRow {
        user_id: user.id,
        activity_count,
        comment_count,
        enrolled_courses: metrics.enrolled_courses,
        completed_courses: metrics.completed_courses,
        in_progress_courses: metrics.in_progress_courses,
        avg_progress: metrics.avg_progress,
        last_activity,
        last_login: user.last_login,
        user_type,
        is_test_user,
    }
}

/// Recompute one user's summary from the source systems and upsert it.
///
/// Social reads degrade to zero when that layer's storage is absent; only a
/// vanished user is an error. Flushes the cache namespace after the write,
/// which is coarse on purpose.
pub async fn aggregate_user(
    pool: &PgPool,
    cache: &QueryCache,
    user_id: i64,
) -> Result<SummaryRow, AggregateError> {
    let user = sources::fetch_user(pool, user_id)
        .await?
        .ok_or(AggregateError::UserNotFound(user_id))?;

    let activity_count =
        sources::count_activities(pool, user_id, sources::ACTIVITY_TYPE_POST).await?;
    let comment_count =
        sources::count_activities(pool, user_id, sources::ACTIVITY_TYPE_COMMENT).await?;
    let last_activity = sources::last_activity(pool, user_id).await?;

    let meta = sources::fetch_user_meta(pool, user_id).await?;
    let courses = progress::merge_course_progress(&meta);
    let metrics = progress::course_metrics(&courses);

    let row = build_summary(
        &user,
        activity_count,
        comment_count,
        last_activity,
        &metrics,
        &meta,
    );
    store::upsert_summary(pool, &row).await.map_err(AggregateError::Other)?;
    cache.flush_all();

    tracing::debug!(user_id, activity_count, enrolled = row.enrolled_courses, "user re-indexed");
    Ok(row)
}

/// Boolean wrapper used by event handlers and the batch loop: failure is
/// logged and swallowed, never propagated to the triggering operation.
pub async fn index_user(pool: &PgPool, cache: &QueryCache, user_id: i64) -> bool {
    match aggregate_user(pool, cache, user_id).await {
        Ok(_) => true,
        Err(err) => {
            tracing::warn!(user_id, %err, "aggregation failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn user() -> DirectoryUser {
        DirectoryUser {
            id: 7,
            user_login: "avery".to_string(),
            email: "avery@example.com".to_string(),
            display_name: "Avery Lee".to_string(),
            registered_at: Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap(),
            last_login: Some(Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()),
        }
    }

    fn meta(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_user_flag_mirrored_from_meta() {
        for raw in ["1", "true", "yes"] {
            let row = build_summary(
                &user(),
                0,
                0,
                None,
                &CourseMetrics::empty(),
                &meta(&[("is_test_user", raw)]),
            );
            assert!(row.is_test_user, "{raw} should mark a test user");
        }

        let row = build_summary(
            &user(),
            0,
            0,
            None,
            &CourseMetrics::empty(),
            &meta(&[("is_test_user", "0")]),
        );
        assert!(!row.is_test_user);
    }

    #[test]
    fn user_type_defaults_to_regular() {
        let row = build_summary(&user(), 0, 0, None, &CourseMetrics::empty(), &meta(&[]));
        assert_eq!(row.user_type, "regular");

        let row = build_summary(
            &user(),
            0,
            0,
            None,
            &CourseMetrics::empty(),
            &meta(&[("user_type", "synthetic")]),
        );
        assert_eq!(row.user_type, "synthetic");
    }

    #[test]
    fn last_login_comes_from_the_directory() {
        let u = user();
        let row = build_summary(&u, 3, 1, None, &CourseMetrics::empty(), &meta(&[]));
        assert_eq!(row.last_login, u.last_login);
        assert_eq!(row.activity_count, 3);
        assert_eq!(row.comment_count, 1);
    }

    #[test]
    fn summary_carries_course_metrics_unchanged() {
        let metrics = CourseMetrics {
            enrolled_courses: 2,
            completed_courses: 1,
            in_progress_courses: 1,
            avg_progress: 80.0,
        };
        let row = build_summary(&user(), 0, 0, None, &metrics, &meta(&[]));
        assert_eq!(row.enrolled_courses, 2);
        assert_eq!(row.completed_courses, 1);
        assert_eq!(row.in_progress_courses, 1);
        assert_eq!(row.avg_progress, 80.0);
    }
}
