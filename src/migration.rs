//! Schema migrations
//!
//! SQL files under `migration/postgresql` are embedded at compile time and
//! applied in name order inside one transaction. Applied names are recorded
//! in a `migration` table so each file runs once.

use chrono::Utc;
use tracing::info;

use crate::{dao::PoolType, error::Error};

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_subscription.sql",
        include_str!("../migration/postgresql/001_subscription.sql"),
    ),
    (
        "002_document.sql",
        include_str!("../migration/postgresql/002_document.sql"),
    ),
];

pub async fn run_migrations(pool: &PoolType) -> Result<(), Error> {
    let mut transaction = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS "migration" (
            "name" TEXT NOT NULL,
            "applied_at" TIMESTAMPTZ NOT NULL,
            PRIMARY KEY ("name")
        )
        "#,
    )
    .execute(&mut *transaction)
    .await?;

    let mut applied = 0;

    for (name, sql) in MIGRATIONS {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM "migration" WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_one(&mut *transaction)
        .await?;

        if count > 0 {
            info!(file = name, "migration already applied");
            continue;
        }

        info!(file = name, "applying migration");
        sqlx::raw_sql(sql).execute(&mut *transaction).await?;

        sqlx::query(
            r#"
            INSERT INTO "migration" (name, applied_at) VALUES($1, $2)
            "#,
        )
        .bind(name)
        .bind(Utc::now())
        .execute(&mut *transaction)
        .await?;

        applied += 1;
    }

    transaction.commit().await?;
    info!("Successfully applied {} migration(s)", applied);

    Ok(())
}
