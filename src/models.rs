use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// One denormalized summary row per user, as stored in
/// `engagement_index.user_summary`.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    pub user_id: i64,
    pub activity_count: i64,
    pub comment_count: i64,
    pub enrolled_courses: i64,
    pub completed_courses: i64,
    pub in_progress_courses: i64,
    pub avg_progress: f64,
    pub last_activity: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub user_type: String,
    pub is_test_user: bool,
}

/// A user as the directory knows them, before aggregation.
#[derive(Debug, Clone)]
pub struct DirectoryUser {
    pub id: i64,
    pub user_login: String,
    pub email: String,
    pub display_name: String,
    pub registered_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// A summary row joined with the directory fields the dashboard displays
/// and searches on.
#[derive(Debug, Clone, Serialize)]
pub struct IndexedUser {
    #[serde(flatten)]
    pub summary: SummaryRow,
    pub user_login: String,
    pub email: String,
    pub display_name: String,
    pub registered_at: DateTime<Utc>,
}

/// One page of indexed users plus the pagination bookkeeping callers need.
#[derive(Debug, Clone, Serialize)]
pub struct PagedUsers {
    pub users: Vec<IndexedUser>,
    pub total_count: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

/// Index coverage snapshot, derived rather than persisted.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub total_indexed: i64,
    pub total_users: i64,
    pub coverage_percentage: f64,
    pub last_update: Option<DateTime<Utc>>,
}

/// Caller-supplied query arguments, before normalization. All fields are
/// optional; `query::normalize` applies the documented defaults.
#[derive(Debug, Clone, Default)]
pub struct UserQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub filter: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub fields: Option<Vec<String>>,
}
