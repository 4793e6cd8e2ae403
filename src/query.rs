use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::NaiveDate;
use sqlx::{PgPool, Row};

use crate::cache::QueryCache;
use crate::models::{IndexedUser, PagedUsers, SummaryRow, UserQuery};

pub const DEFAULT_PER_PAGE: i64 = 20;
/// Login recency window for the `active` filter.
const ACTIVE_WINDOW_DAYS: i64 = 30;

/// Mutually exclusive filter dimension. Unrecognized values degrade to `All`
/// rather than failing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserFilter {
    All,
    TestUsers,
    RealUsers,
    Active,
}

impl UserFilter {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
            Some("test_users") => Self::TestUsers,
            Some("real_users") => Self::RealUsers,
            Some("active") => Self::Active,
            _ => Self::All,
        }
    }
}

/// Whitelisted sort fields, mapped to physical columns. Anything outside the
/// whitelist falls back to `ActivityCount` so caller input never reaches the
/// ORDER BY clause verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortField {
    ActivityCount,
    EnrolledCourses,
    CompletedCourses,
    LastActivity,
    LastLogin,
    DisplayName,
    UserLogin,
    RegistrationDate,
}

impl SortField {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
            Some("activity_count") => Self::ActivityCount,
            Some("enrolled_courses") => Self::EnrolledCourses,
            Some("completed_courses") => Self::CompletedCourses,
            Some("last_activity") => Self::LastActivity,
            Some("last_login") => Self::LastLogin,
            Some("display_name") => Self::DisplayName,
            Some("user_login") => Self::UserLogin,
            Some("registration_date") => Self::RegistrationDate,
            _ => Self::ActivityCount,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Self::ActivityCount => "s.activity_count",
            Self::EnrolledCourses => "s.enrolled_courses",
            Self::CompletedCourses => "s.completed_courses",
            Self::LastActivity => "s.last_activity",
            Self::LastLogin => "s.last_login",
            Self::DisplayName => "u.display_name",
            Self::UserLogin => "u.user_login",
            Self::RegistrationDate => "u.registered_at",
        }
    }

    /// Nullable timestamp columns need explicit NULLS LAST so users who never
    /// logged in (or were never active) sort after everyone else in either
    /// direction, keeping pagination stable.
    fn nullable(self) -> bool {
        matches!(self, Self::LastActivity | Self::LastLogin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
            Some("asc") => Self::Asc,
            Some("desc") => Self::Desc,
            _ => Self::Desc,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Query arguments with all defaults applied. Two semantically identical
/// requests normalize to equal values, so their cache keys collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedQuery {
    pub page: i64,
    /// 0 means no limit; callers opt into that deliberately.
    pub per_page: i64,
    pub search: String,
    pub filter: UserFilter,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub fields: Vec<String>,
}

pub fn normalize(query: &UserQuery) -> NormalizedQuery {
    let date_range = match (query.date_from, query.date_to) {
        (Some(from), Some(to)) => Some((from, to)),
        _ => None,
    };

    NormalizedQuery {
        page: query.page.unwrap_or(1).max(1),
        per_page: query.per_page.unwrap_or(DEFAULT_PER_PAGE).max(0),
        search: query
            .search
            .as_deref()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase(),
        filter: UserFilter::parse(query.filter.as_deref()),
        sort_by: SortField::parse(query.sort_by.as_deref()),
        sort_order: SortOrder::parse(query.sort_order.as_deref()),
        date_range,
        fields: query
            .fields
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|f| f.trim().to_ascii_lowercase())
            .collect(),
    }
}

pub fn cache_key(query: &NormalizedQuery) -> u64 {
    let mut hasher = DefaultHasher::new();
    query.hash(&mut hasher);
    hasher.finish()
}

/// Positional bind values, applied in order of appearance.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryBind {
    Text(String),
    Date(NaiveDate),
}

/// Shared predicate for the count and page queries.
pub fn where_clause(query: &NormalizedQuery) -> (String, Vec<QueryBind>) {
    let mut conditions = Vec::new();
    let mut binds = Vec::new();

    if !query.search.is_empty() {
        let param = binds.len() + 1;
        conditions.push(format!(
            "(u.user_login ILIKE ${param} OR u.display_name ILIKE ${param} OR u.email ILIKE ${param})"
        ));
        binds.push(QueryBind::Text(format!("%{}%", query.search)));
    }

    match query.filter {
        UserFilter::All => {}
        UserFilter::TestUsers => conditions.push("s.is_test_user".to_string()),
        UserFilter::RealUsers => conditions.push("NOT s.is_test_user".to_string()),
        UserFilter::Active => conditions.push(format!(
            "s.last_login >= NOW() - INTERVAL '{ACTIVE_WINDOW_DAYS} days'"
        )),
    }

    if let Some((from, to)) = query.date_range {
        let first = binds.len() + 1;
        conditions.push(format!(
            "u.registered_at::date BETWEEN ${first} AND ${}",
            first + 1
        ));
        binds.push(QueryBind::Date(from));
        binds.push(QueryBind::Date(to));
    }

    if conditions.is_empty() {
        (String::new(), binds)
    } else {
        (format!("WHERE {}", conditions.join(" AND ")), binds)
    }
}

pub fn order_clause(query: &NormalizedQuery) -> String {
    let direction = query.sort_order.sql();
    let nulls = if query.sort_by.nullable() {
        " NULLS LAST"
    } else {
        ""
    };
    // Tiebreak on user_id so equal sort keys paginate deterministically.
    format!(
        "ORDER BY {} {direction}{nulls}, s.user_id ASC",
        query.sort_by.column()
    )
}

const FROM_CLAUSE: &str = "FROM engagement_index.user_summary s \
     JOIN engagement_index.users u ON u.id = s.user_id";

pub fn build_count(query: &NormalizedQuery) -> (String, Vec<QueryBind>) {
    let (where_sql, binds) = where_clause(query);
    (
        format!("SELECT COUNT(*) AS n {FROM_CLAUSE} {where_sql}")
            .trim_end()
            .to_string(),
        binds,
    )
}

pub fn build_select(query: &NormalizedQuery) -> (String, Vec<QueryBind>) {
    let (where_sql, binds) = where_clause(query);
    let mut sql = format!(
        "SELECT s.user_id, s.activity_count, s.comment_count, s.enrolled_courses, \
         s.completed_courses, s.in_progress_courses, s.avg_progress, s.last_activity, \
         s.last_login, s.user_type, s.is_test_user, \
         u.user_login, u.email, u.display_name, u.registered_at \
         {FROM_CLAUSE} {where_sql} {}",
        order_clause(query)
    );

    if query.per_page > 0 {
        let offset = (query.page - 1) * query.per_page;
        sql.push_str(&format!(" LIMIT {} OFFSET {offset}", query.per_page));
    }

    (sql, binds)
}

fn bind_all<'q>(
    mut q: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    binds: &'q [QueryBind],
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    for bind in binds {
        q = match bind {
            QueryBind::Text(text) => q.bind(text.as_str()),
            QueryBind::Date(date) => q.bind(*date),
        };
    }
    q
}

/// Read-through page fetch: check the cache under the normalized-argument
/// key, and on a miss run the count and page queries over one shared
/// predicate, caching the assembled result.
pub async fn get_indexed_users(
    pool: &PgPool,
    cache: &QueryCache,
    query: &UserQuery,
) -> anyhow::Result<PagedUsers> {
    let normalized = normalize(query);
    let key = cache_key(&normalized);

    if let Some(page) = cache.get_query(key) {
        tracing::debug!(key, "indexed-user query served from cache");
        return Ok(page);
    }

    let (count_sql, count_binds) = build_count(&normalized);
    let total_count: i64 = bind_all(sqlx::query(&count_sql), &count_binds)
        .fetch_one(pool)
        .await?
        .get("n");

    let (select_sql, select_binds) = build_select(&normalized);
    let rows = bind_all(sqlx::query(&select_sql), &select_binds)
        .fetch_all(pool)
        .await?;

    let users = rows
        .into_iter()
        .map(|row| IndexedUser {
            summary: SummaryRow {
                user_id: row.get("user_id"),
                activity_count: row.get("activity_count"),
                comment_count: row.get("comment_count"),
                enrolled_courses: row.get("enrolled_courses"),
                completed_courses: row.get("completed_courses"),
                in_progress_courses: row.get("in_progress_courses"),
                avg_progress: row.get("avg_progress"),
                last_activity: row.get("last_activity"),
                last_login: row.get("last_login"),
                user_type: row.get("user_type"),
                is_test_user: row.get("is_test_user"),
            },
            user_login: row.get("user_login"),
            email: row.get("email"),
            display_name: row.get("display_name"),
            registered_at: row.get("registered_at"),
        })
        .collect();

    let total_pages = if normalized.per_page <= 0 {
        1
    } else {
        (total_count + normalized.per_page - 1) / normalized.per_page
    };

    let page = PagedUsers {
        users,
        total_count,
        page: normalized.page,
        per_page: normalized.per_page,
        total_pages,
    };

    cache.put_query(key, page.clone());
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> UserQuery {
        UserQuery::default()
    }

    #[test]
    fn defaults_collide_with_explicit_defaults() {
        let implicit = normalize(&query());
        let explicit = normalize(&UserQuery {
            page: Some(1),
            per_page: Some(DEFAULT_PER_PAGE),
            search: Some(String::new()),
            filter: Some("all".to_string()),
            sort_by: Some("activity_count".to_string()),
            sort_order: Some("DESC".to_string()),
            ..query()
        });

        assert_eq!(implicit, explicit);
        assert_eq!(cache_key(&implicit), cache_key(&explicit));
    }

    #[test]
    fn unrecognized_filter_degrades_to_all() {
        let bogus = normalize(&UserQuery {
            filter: Some("bogus".to_string()),
            ..query()
        });
        let all = normalize(&UserQuery {
            filter: Some("all".to_string()),
            ..query()
        });

        assert_eq!(bogus.filter, UserFilter::All);
        assert_eq!(where_clause(&bogus), where_clause(&all));
    }

    #[test]
    fn hostile_sort_field_falls_back_to_default() {
        let normalized = normalize(&UserQuery {
            sort_by: Some("'; DROP TABLE x".to_string()),
            ..query()
        });

        assert_eq!(normalized.sort_by, SortField::ActivityCount);
        let (sql, _) = build_select(&normalized);
        assert!(sql.contains("ORDER BY s.activity_count DESC"));
        assert!(!sql.contains("DROP TABLE"));
    }

    #[test]
    fn bad_sort_order_defaults_to_desc() {
        let normalized = normalize(&UserQuery {
            sort_order: Some("sideways".to_string()),
            ..query()
        });
        assert_eq!(normalized.sort_order, SortOrder::Desc);
    }

    #[test]
    fn nullable_timestamp_sorts_nulls_last_both_directions() {
        for order in ["asc", "desc"] {
            let normalized = normalize(&UserQuery {
                sort_by: Some("last_login".to_string()),
                sort_order: Some(order.to_string()),
                ..query()
            });
            let clause = order_clause(&normalized);
            assert!(
                clause.contains("s.last_login") && clause.contains("NULLS LAST"),
                "missing NULLS LAST in {clause:?}"
            );
        }
    }

    #[test]
    fn non_nullable_sort_has_no_nulls_clause() {
        let normalized = normalize(&UserQuery {
            sort_by: Some("display_name".to_string()),
            sort_order: Some("asc".to_string()),
            ..query()
        });
        assert_eq!(
            order_clause(&normalized),
            "ORDER BY u.display_name ASC, s.user_id ASC"
        );
    }

    #[test]
    fn search_binds_one_pattern_across_three_columns() {
        let normalized = normalize(&UserQuery {
            search: Some("  Avery ".to_string()),
            ..query()
        });
        let (sql, binds) = where_clause(&normalized);

        assert_eq!(binds, vec![QueryBind::Text("%avery%".to_string())]);
        assert!(sql.contains("u.user_login ILIKE $1"));
        assert!(sql.contains("u.display_name ILIKE $1"));
        assert!(sql.contains("u.email ILIKE $1"));
    }

    #[test]
    fn filter_predicates_render() {
        let cases = [
            ("test_users", "s.is_test_user"),
            ("real_users", "NOT s.is_test_user"),
            ("active", "s.last_login >= NOW() - INTERVAL '30 days'"),
        ];
        for (raw, expected) in cases {
            let normalized = normalize(&UserQuery {
                filter: Some(raw.to_string()),
                ..query()
            });
            let (sql, _) = where_clause(&normalized);
            assert!(sql.contains(expected), "{raw}: {sql:?}");
        }
    }

    #[test]
    fn date_range_requires_both_bounds() {
        let from = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2026, 6, 30).unwrap();

        let only_from = normalize(&UserQuery {
            date_from: Some(from),
            ..query()
        });
        assert!(only_from.date_range.is_none());
        assert!(where_clause(&only_from).0.is_empty());

        let both = normalize(&UserQuery {
            date_from: Some(from),
            date_to: Some(to),
            ..query()
        });
        let (sql, binds) = where_clause(&both);
        assert!(sql.contains("u.registered_at::date BETWEEN $1 AND $2"));
        assert_eq!(binds, vec![QueryBind::Date(from), QueryBind::Date(to)]);
    }

    #[test]
    fn search_plus_date_range_numbers_binds_in_order() {
        let from = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        let normalized = normalize(&UserQuery {
            search: Some("lee".to_string()),
            date_from: Some(from),
            date_to: Some(to),
            ..query()
        });

        let (sql, binds) = where_clause(&normalized);
        assert!(sql.contains("ILIKE $1"));
        assert!(sql.contains("BETWEEN $2 AND $3"));
        assert_eq!(binds.len(), 3);
    }

    #[test]
    fn zero_per_page_means_no_limit() {
        let unlimited = normalize(&UserQuery {
            per_page: Some(0),
            ..query()
        });
        let (sql, _) = build_select(&unlimited);
        assert!(!sql.contains("LIMIT"));

        let negative = normalize(&UserQuery {
            per_page: Some(-5),
            ..query()
        });
        assert_eq!(negative.per_page, 0);
    }

    #[test]
    fn pagination_renders_limit_and_offset() {
        let normalized = normalize(&UserQuery {
            page: Some(3),
            per_page: Some(25),
            ..query()
        });
        let (sql, _) = build_select(&normalized);
        assert!(sql.ends_with("LIMIT 25 OFFSET 50"));
    }

    #[test]
    fn count_and_select_share_the_predicate() {
        let normalized = normalize(&UserQuery {
            search: Some("lee".to_string()),
            filter: Some("real_users".to_string()),
            ..query()
        });

        let (count_sql, count_binds) = build_count(&normalized);
        let (select_sql, select_binds) = build_select(&normalized);
        let (where_sql, _) = where_clause(&normalized);

        assert!(count_sql.contains(&where_sql));
        assert!(select_sql.contains(&where_sql));
        assert_eq!(count_binds, select_binds);
    }

    #[test]
    fn distinct_queries_get_distinct_keys() {
        let page_one = normalize(&UserQuery {
            page: Some(1),
            ..query()
        });
        let page_two = normalize(&UserQuery {
            page: Some(2),
            ..query()
        });
        assert_ne!(cache_key(&page_one), cache_key(&page_two));
    }
}
