//! Database module for SQLite persistence.
//!
//! Every collection lives in a single `documents` table as JSON; the `DocumentStore`
//! trait on top of it is the only way repositories reach the data.

mod document;
mod fallback;
mod listen;
mod store;

pub use document::*;
pub use fallback::*;
pub use listen::*;
pub use store::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Collection names.
pub mod collections {
    pub const DONATIONS: &str = "donations";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const COMMUNITY_POSTS: &str = "topluluk_gonderileri";
    pub const HIGHLIGHTS: &str = "beraberde_bu_ay";
    pub const TEAM_MEMBERS: &str = "team_members";
    pub const USERS: &str = "users";
    pub const USER_STATS: &str = "userStats";
    pub const TODOS: &str = "todos";
    pub const AUTH_CLAIMS: &str = "auth_claims";
}

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            data TEXT NOT NULL CHECK (json_valid(data)),
            PRIMARY KEY (collection, id)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_documents_created_at
            ON documents(collection, json_extract(data, '$."createdAt"'));
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use serde_json::Value;
    use tempfile::TempDir;

    use super::*;

    /// Turn a `json!` object literal into a field map.
    pub fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            other => panic!("expected a JSON object, got {}", other),
        }
    }

    pub async fn open_store_with(policy: IndexPolicy) -> (TempDir, Arc<SqliteStore>) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let pool = init_database(&dir.path().join("test.sqlite"))
            .await
            .expect("Failed to init database");
        (dir, Arc::new(SqliteStore::new(pool, policy)))
    }

    pub async fn open_store() -> (TempDir, Arc<SqliteStore>) {
        open_store_with(IndexPolicy::permissive()).await
    }

    /// A store that rejects every composite query, like a fresh project with no indexes.
    pub async fn open_strict_store() -> (TempDir, Arc<SqliteStore>) {
        open_store_with(IndexPolicy::new(true, [])).await
    }
}
