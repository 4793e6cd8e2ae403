use serde::Deserialize;
use sqlx::PgPool;

use crate::cache::QueryCache;
use crate::{aggregate, sources};

/// A user reference as it appears in event payloads from the learning layer,
/// which sends either a raw id or a full user object. Normalized once here,
/// at the event boundary.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    Id(i64),
    Object { id: i64 },
}

impl UserRef {
    pub fn user_id(&self) -> i64 {
        match self {
            Self::Id(id) => *id,
            Self::Object { id } => *id,
        }
    }
}

/// Domain events the updater subscribes to.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ActivityCreated { user_id: i64 },
    ActivityDeleted { user_id: i64 },
    CourseCompleted { user: UserRef },
    LessonCompleted { user: UserRef },
    UserRegistered { user_id: i64 },
    UserLogin { user_id: i64 },
}

impl Event {
    /// The user whose summary the event invalidates.
    pub fn user_id(&self) -> i64 {
        match self {
            Self::ActivityCreated { user_id }
            | Self::ActivityDeleted { user_id }
            | Self::UserRegistered { user_id }
            | Self::UserLogin { user_id } => *user_id,
            Self::CourseCompleted { user } | Self::LessonCompleted { user } => user.user_id(),
        }
    }
}

/// Re-aggregate the affected user. Fire-and-forget from the caller's side:
/// a failed aggregation (user deleted mid-flight, source gone) is logged by
/// `index_user` and reported as `false`, never as an error.
pub async fn handle_event(pool: &PgPool, cache: &QueryCache, event: Event) -> bool {
    let user_id = event.user_id();
    tracing::debug!(user_id, ?event, "handling event");

    if let Event::UserLogin { .. } = event {
        // Record the login before re-aggregating so the summary sees it.
        if let Err(err) = sources::touch_last_login(pool, user_id).await {
            tracing::warn!(user_id, %err, "failed to record login timestamp");
        }
    }

    aggregate::index_user(pool, cache, user_id).await
}
