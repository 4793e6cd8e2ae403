use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::cache::QueryCache;
use crate::models::IndexStats;
use crate::{sources, store};

/// Below this coverage ratio the index is considered stale.
pub const MIN_COVERAGE_PERCENT: f64 = 95.0;
/// Summaries older than this make the index stale even at full coverage.
pub const MAX_INDEX_AGE_HOURS: i64 = 24;

pub fn coverage_percentage(total_indexed: i64, total_users: i64) -> f64 {
    if total_users <= 0 {
        return 100.0;
    }
    let ratio = total_indexed as f64 / total_users as f64 * 100.0;
    (ratio * 10.0).round() / 10.0
}

/// Advisory staleness signal: low coverage or an old newest-write both count.
/// Never triggers a rebuild on its own.
pub fn is_stale(stats: &IndexStats, now: DateTime<Utc>) -> bool {
    if stats.total_users == 0 {
        return false;
    }
    if stats.coverage_percentage < MIN_COVERAGE_PERCENT {
        return true;
    }
    match stats.last_update {
        Some(updated) => now - updated > Duration::hours(MAX_INDEX_AGE_HOURS),
        None => true,
    }
}

/// Coverage snapshot, served from the cache's five-minute stats slot since
/// these counts move slowly.
pub async fn get_index_stats(pool: &PgPool, cache: &QueryCache) -> anyhow::Result<IndexStats> {
    if let Some(stats) = cache.get_stats() {
        return Ok(stats);
    }

    let total_indexed = store::count_indexed(pool).await?;
    let total_users = sources::count_users(pool).await?;
    let stats = IndexStats {
        total_indexed,
        total_users,
        coverage_percentage: coverage_percentage(total_indexed, total_users),
        last_update: store::last_update(pool).await?,
    };

    cache.put_stats(stats.clone());
    Ok(stats)
}

pub async fn needs_rebuilding(pool: &PgPool, cache: &QueryCache) -> anyhow::Result<bool> {
    let stats = get_index_stats(pool, cache).await?;
    Ok(is_stale(&stats, Utc::now()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(indexed: i64, total: i64, last_update: Option<DateTime<Utc>>) -> IndexStats {
        IndexStats {
            total_indexed: indexed,
            total_users: total,
            coverage_percentage: coverage_percentage(indexed, total),
            last_update,
        }
    }

    #[test]
    fn coverage_math() {
        assert_eq!(coverage_percentage(80, 100), 80.0);
        assert_eq!(coverage_percentage(100, 100), 100.0);
        assert_eq!(coverage_percentage(1, 3), 33.3);
        assert_eq!(coverage_percentage(0, 0), 100.0);
    }

    #[test]
    fn low_coverage_is_stale() {
        let now = Utc::now();
        let s = stats(80, 100, Some(now));
        assert_eq!(s.coverage_percentage, 80.0);
        assert!(is_stale(&s, now));
    }

    #[test]
    fn full_and_fresh_is_not_stale() {
        let now = Utc::now();
        let s = stats(100, 100, Some(now - Duration::hours(1)));
        assert!(!is_stale(&s, now));
    }

    #[test]
    fn old_index_is_stale_even_at_full_coverage() {
        let now = Utc::now();
        let s = stats(100, 100, Some(now - Duration::hours(25)));
        assert!(is_stale(&s, now));
    }

    #[test]
    fn coverage_at_threshold_is_fresh() {
        let now = Utc::now();
        let s = stats(95, 100, Some(now));
        assert!(!is_stale(&s, now));
    }

    #[test]
    fn empty_directory_never_needs_rebuild() {
        let s = stats(0, 0, None);
        assert!(!is_stale(&s, Utc::now()));
    }

    #[test]
    fn users_but_no_index_is_stale() {
        let s = stats(0, 10, None);
        assert!(is_stale(&s, Utc::now()));
    }
}
