use anyhow::Context;
use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Load realistic demo data: a handful of users with metadata, plus the
/// social-activity table and a few activities. The activity table is created
/// here rather than in the migrations because it belongs to the social layer;
/// the indexer must keep working when it is absent.
pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS engagement_index.activities (
            id UUID PRIMARY KEY,
            user_id BIGINT NOT NULL,
            activity_type TEXT NOT NULL,
            recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS activities_user_type_idx \
         ON engagement_index.activities (user_id, activity_type)",
    )
    .execute(pool)
    .await?;

    let users = vec![
        ("avery.lee", "avery.lee@example.com", "Avery Lee", "2026-01-15"),
        ("jules.moreno", "jules.moreno@example.com", "Jules Moreno", "2025-11-02"),
        ("kiara.patel", "kiara.patel@example.com", "Kiara Patel", "2026-02-20"),
        ("qa.bot", "qa.bot@example.com", "QA Bot", "2026-03-01"),
    ];

    let mut user_ids = Vec::new();
    for (login, email, display_name, registered) in users {
        let registered: NaiveDate = registered.parse().context("invalid seed date")?;
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO engagement_index.users (user_login, email, display_name, registered_at)
            VALUES ($1, $2, $3, $4::date)
            ON CONFLICT (email) DO UPDATE
            SET user_login = EXCLUDED.user_login, display_name = EXCLUDED.display_name
            RETURNING id
            "#,
        )
        .bind(login)
        .bind(email)
        .bind(display_name)
        .bind(registered)
        .fetch_one(pool)
        .await?
        .get("id");
        user_ids.push(id);
    }

    let meta = vec![
        (user_ids[0], "course_progress_5", r#"{"completion_rate": 60}"#),
        (
            user_ids[0],
            "course_enrollments",
            r#"{"5": {"completed": 3, "total": 5}, "9": {"completed": 5, "total": 5}}"#,
        ),
        (user_ids[1], "course_enrollments", r#"{"12": {"completed": 1, "total": 8}}"#),
        (user_ids[2], "course_progress_5", r#"{"completion_rate": 100}"#),
        (user_ids[3], "is_test_user", "1"),
        (user_ids[3], "user_type", "synthetic"),
    ];

    for (user_id, key, value) in meta {
        sqlx::query(
            r#"
            INSERT INTO engagement_index.user_meta (user_id, meta_key, meta_value)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, meta_key) DO UPDATE SET meta_value = EXCLUDED.meta_value
            "#,
        )
        .bind(user_id)
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    }

    let activities = vec![
        ("5d0b2a74-9c1e-4f33-8c0a-111111111111", user_ids[0], "post"),
        ("5d0b2a74-9c1e-4f33-8c0a-222222222222", user_ids[0], "comment"),
        ("5d0b2a74-9c1e-4f33-8c0a-333333333333", user_ids[0], "post"),
        ("5d0b2a74-9c1e-4f33-8c0a-444444444444", user_ids[1], "post"),
        ("5d0b2a74-9c1e-4f33-8c0a-555555555555", user_ids[2], "comment"),
    ];

    for (id, user_id, activity_type) in activities {
        sqlx::query(
            r#"
            INSERT INTO engagement_index.activities (id, user_id, activity_type)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(Uuid::parse_str(id)?)
        .bind(user_id)
        .bind(activity_type)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Import users into the directory from a CSV file, returning the ids of the
/// upserted users so the caller can index them.
pub async fn import_users_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<Vec<i64>> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        user_login: String,
        email: String,
        display_name: String,
        registered_at: NaiveDate,
        is_test_user: Option<bool>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut imported = Vec::new();

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let user_id: i64 = sqlx::query(
            r#"
            INSERT INTO engagement_index.users (user_login, email, display_name, registered_at)
            VALUES ($1, $2, $3, $4::date)
            ON CONFLICT (email) DO UPDATE
            SET user_login = EXCLUDED.user_login, display_name = EXCLUDED.display_name
            RETURNING id
            "#,
        )
        .bind(&row.user_login)
        .bind(&row.email)
        .bind(&row.display_name)
        .bind(row.registered_at)
        .fetch_one(pool)
        .await?
        .get("id");

        if let Some(is_test) = row.is_test_user {
            sqlx::query(
                r#"
                INSERT INTO engagement_index.user_meta (user_id, meta_key, meta_value)
                VALUES ($1, 'is_test_user', $2)
                ON CONFLICT (user_id, meta_key) DO UPDATE SET meta_value = EXCLUDED.meta_value
                "#,
            )
            .bind(user_id)
            .bind(if is_test { "1" } else { "0" })
            .execute(pool)
            .await?;
        }

        imported.push(user_id);
    }

    Ok(imported)
}
