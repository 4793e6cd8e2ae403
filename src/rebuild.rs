use sqlx::PgPool;

use crate::cache::QueryCache;
use crate::{aggregate, sources, store};

pub const REBUILD_BATCH_SIZE: i64 = 100;

/// Walk the whole directory in id-ordered batches, re-aggregating every user,
/// then purge orphaned summary rows and flush the cache.
///
/// The cursor is a deterministic keyset over `users.id`, so the loop always
/// terminates; users created mid-rebuild may or may not be captured and are
/// picked up by the next run. Per-user failures are logged and skipped so one
/// bad user cannot abort the pass. Returns the count of users indexed.
pub async fn rebuild_user_index(pool: &PgPool, cache: &QueryCache) -> anyhow::Result<i64> {
    let mut last_id = 0i64;
    let mut indexed = 0i64;

    loop {
        let batch = sources::list_users_after(pool, last_id, REBUILD_BATCH_SIZE).await?;

        for user in &batch {
            match aggregate::aggregate_user(pool, cache, user.id).await {
                Ok(_) => indexed += 1,
                Err(err) => {
                    tracing::warn!(user_id = user.id, %err, "skipping user during rebuild");
                }
            }
        }

        let Some(last) = batch.last() else {
            break;
        };
        last_id = last.id;
        tracing::debug!(last_id, indexed, "rebuild batch complete");

        if (batch.len() as i64) < REBUILD_BATCH_SIZE {
            break;
        }
    }

    let removed = store::delete_orphans(pool).await?;
    if removed > 0 {
        tracing::info!(removed, "orphaned summary rows deleted");
    }

    cache.flush_all();
    tracing::info!(indexed, "rebuild finished");
    Ok(indexed)
}
