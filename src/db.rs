//! SQLite pool setup and schema migration.

use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr, time::Duration};

const INIT_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Open (creating if needed) the SQLite database at `database_url`.
///
/// WAL mode lets readers proceed while a writer holds the lock; the busy
/// timeout makes concurrent writers queue instead of failing.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database url `{}`", database_url))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {}", database_url))?;
    Ok(pool)
}

/// Apply the embedded schema. Every statement is idempotent.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements = split_statements(INIT_SQL);

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(&stmt)
            .execute(db)
            .await
            .with_context(|| format!("migration statement failed: {}", stmt))?;
    }

    Ok(())
}

/// Strip `--` comment lines and split the script on `;`.
fn split_statements(sql: &str) -> Vec<String> {
    let without_comments = sql
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");
    without_comments
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_skips_comments_and_blank_chunks() {
        let stmts = split_statements("-- header\nCREATE TABLE a (x INT);\n\n-- tail\n");
        assert_eq!(stmts, vec!["CREATE TABLE a (x INT)".to_string()]);
    }

    #[test]
    fn embedded_schema_defines_all_tables() {
        let stmts = split_statements(INIT_SQL);
        for table in ["users", "nodes", "shares"] {
            assert!(
                stmts
                    .iter()
                    .any(|s| s.starts_with(&format!("CREATE TABLE IF NOT EXISTS {table}"))),
                "missing table {table}"
            );
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("meta/test.db").display());
        let pool = connect(&url, 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('users', 'nodes', 'shares')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 3);
    }
}
