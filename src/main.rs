use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod aggregate;
mod cache;
mod db;
mod events;
mod models;
mod progress;
mod query;
mod rebuild;
mod sources;
mod stats;
mod store;

use cache::QueryCache;
use models::{IndexedUser, UserQuery};

#[derive(Parser)]
#[command(name = "engagement-index")]
#[command(about = "Denormalized per-user engagement index and dashboard query layer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data, including the social-activity store
    Seed,
    /// Import users from a CSV file and index them
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Re-aggregate a single user
    Index {
        #[arg(long)]
        user_id: i64,
    },
    /// Dispatch a domain event payload to the updater
    Event {
        /// JSON payload, e.g. '{"type": "course_completed", "user": 42}'
        #[arg(long)]
        json: String,
    },
    /// Rebuild the whole index and purge orphaned rows
    Rebuild,
    /// List indexed users with filtering, sorting and pagination
    List {
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = query::DEFAULT_PER_PAGE)]
        per_page: i64,
        #[arg(long)]
        search: Option<String>,
        /// all, test_users, real_users or active
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        sort_by: Option<String>,
        #[arg(long)]
        sort_order: Option<String>,
        #[arg(long)]
        date_from: Option<NaiveDate>,
        #[arg(long)]
        date_to: Option<NaiveDate>,
        /// Restrict the columns printed, comma-separated
        #[arg(long, value_delimiter = ',')]
        fields: Option<Vec<String>>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show index coverage statistics
    Stats {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Report whether the index needs rebuilding
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let cache = QueryCache::new();

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let imported = db::import_users_csv(&pool, &csv).await?;
            let mut indexed = 0;
            for user_id in &imported {
                if aggregate::index_user(&pool, &cache, *user_id).await {
                    indexed += 1;
                }
            }
            println!(
                "Imported {} users from {}, indexed {indexed}.",
                imported.len(),
                csv.display()
            );
        }
        Commands::Index { user_id } => {
            if aggregate::index_user(&pool, &cache, user_id).await {
                println!("User {user_id} indexed.");
            } else {
                println!("User {user_id} could not be indexed.");
            }
        }
        Commands::Event { json } => {
            let event: events::Event =
                serde_json::from_str(&json).context("unrecognized event payload")?;
            if events::handle_event(&pool, &cache, event).await {
                println!("Event handled.");
            } else {
                println!("Event handled; affected user could not be indexed.");
            }
        }
        Commands::Rebuild => {
            let indexed = rebuild::rebuild_user_index(&pool, &cache).await?;
            println!("Rebuilt index for {indexed} users.");
        }
        Commands::List {
            page,
            per_page,
            search,
            filter,
            sort_by,
            sort_order,
            date_from,
            date_to,
            fields,
            json,
        } => {
            let user_query = UserQuery {
                page: Some(page),
                per_page: Some(per_page),
                search,
                filter,
                sort_by,
                sort_order,
                date_from,
                date_to,
                fields,
            };
            let result = query::get_indexed_users(&pool, &cache, &user_query).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }

            println!(
                "Page {}/{} ({} users total):",
                result.page,
                result.total_pages.max(1),
                result.total_count
            );
            let fields = query::normalize(&user_query).fields;
            for user in &result.users {
                println!("- {}", format_user(user, &fields));
            }
        }
        Commands::Stats { json } => {
            let stats = stats::get_index_stats(&pool, &cache).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }
            println!(
                "Indexed {}/{} users ({:.1}% coverage), last update: {}",
                stats.total_indexed,
                stats.total_users,
                stats.coverage_percentage,
                stats
                    .last_update
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            );
        }
        Commands::Check => {
            if stats::needs_rebuilding(&pool, &cache).await? {
                println!("Index is stale; a rebuild is recommended.");
            } else {
                println!("Index is fresh.");
            }
        }
    }

    Ok(())
}

/// Render one user line, restricted to the requested fields when given.
fn format_user(user: &IndexedUser, fields: &[String]) -> String {
    let all = [
        "display_name",
        "user_login",
        "email",
        "activity_count",
        "comment_count",
        "enrolled_courses",
        "completed_courses",
        "avg_progress",
        "last_login",
    ];
    let selected: Vec<&str> = if fields.is_empty() {
        all.to_vec()
    } else {
        all.iter().copied().filter(|f| fields.iter().any(|s| s == f)).collect()
    };

    let s = &user.summary;
    selected
        .iter()
        .map(|field| match *field {
            "display_name" => user.display_name.clone(),
            "user_login" => format!("({})", user.user_login),
            "email" => user.email.clone(),
            "activity_count" => format!("posts {}", s.activity_count),
            "comment_count" => format!("comments {}", s.comment_count),
            "enrolled_courses" => format!("enrolled {}", s.enrolled_courses),
            "completed_courses" => format!("completed {}", s.completed_courses),
            "avg_progress" => format!("progress {:.2}%", s.avg_progress),
            "last_login" => format!(
                "last login {}",
                s.last_login
                    .map(|t| t.date_naive().to_string())
                    .unwrap_or_else(|| "never".to_string())
            ),
            _ => String::new(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
