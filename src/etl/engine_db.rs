//! Engine database.
//!
//! Tracks the indexed head, free-form statistics and per-extractor cursors so
//! a restarted indexer resumes after the last committed batch.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

const SQLITE_SCHEMA_SQL: &str = include_str!("../../sql/engine_schema.sql");

/// Engine database configuration
#[derive(Debug, Clone)]
pub struct EngineDbConfig {
    /// File path, `sqlite:` URL, or `:memory:`
    pub path: String,
}

/// Engine database for tracking state
pub struct EngineDb {
    pool: SqlitePool,
}

impl EngineDb {
    pub async fn new(config: EngineDbConfig) -> Result<Self> {
        let is_memory = config.path == ":memory:" || config.path == "sqlite::memory:";
        let is_url = config.path.starts_with("sqlite:");

        if !is_memory && !is_url {
            if let Some(parent) = Path::new(&config.path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .context(format!("Failed to create directory: {}", parent.display()))?;
                }
            }
        }

        let database_url = if is_memory {
            "sqlite::memory:".to_string()
        } else if is_url {
            config.path.clone()
        } else {
            format!("sqlite://{}", config.path)
        };

        tracing::debug!(
            target: "coven::etl::engine_db",
            "Connecting to database: {}",
            database_url
        );

        let options = SqliteConnectOptions::from_str(&database_url)?.create_if_missing(true);

        // Every in-memory connection is its own database.
        let max_connections = if is_memory { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to engine database")?;

        let db = Self { pool };
        db.init_schema(!is_memory).await?;

        Ok(db)
    }

    async fn init_schema(&self, on_disk: bool) -> Result<()> {
        if on_disk {
            sqlx::query("PRAGMA journal_mode=WAL")
                .execute(&self.pool)
                .await?;
            sqlx::query("PRAGMA synchronous=NORMAL")
                .execute(&self.pool)
                .await?;
        }

        for statement in SQLITE_SCHEMA_SQL.split(';') {
            let sql_lines: Vec<&str> = statement
                .lines()
                .filter(|line| {
                    let trimmed = line.trim();
                    !trimmed.is_empty() && !trimmed.starts_with("--")
                })
                .collect();

            if sql_lines.is_empty() {
                continue;
            }

            let clean_sql = sql_lines.join("\n");
            sqlx::query(&clean_sql)
                .execute(&self.pool)
                .await
                .context(format!(
                    "Failed to execute SQL: {}",
                    clean_sql.lines().next().unwrap_or("")
                ))?;
        }

        tracing::info!(target: "coven::etl::engine_db", "Engine database schema initialized");
        Ok(())
    }

    /// Current head as (block number, processed event count)
    pub async fn get_head(&self) -> Result<(u64, u64)> {
        let row = sqlx::query("SELECT block_number, event_count FROM head WHERE id = 'main'")
            .fetch_one(&self.pool)
            .await?;

        let block_number: i64 = row.get(0);
        let event_count: i64 = row.get(1);

        Ok((block_number as u64, event_count as u64))
    }

    /// Move the head to `block_number` and add `events_processed` to the event count
    pub async fn update_head(&self, block_number: u64, events_processed: u64) -> Result<()> {
        sqlx::query(
            "UPDATE head SET block_number = MAX(block_number, ?), event_count = event_count + ? WHERE id = 'main'",
        )
        .bind(block_number as i64)
        .bind(events_processed as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_stat(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM stats WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get(0)))
    }

    pub async fn set_stat(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO stats (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn get_stats(&self) -> Result<EngineStats> {
        let (block_number, event_count) = self.get_head().await?;
        let start_time = self.get_stat("start_time").await?.unwrap_or_default();

        Ok(EngineStats {
            current_block: block_number,
            total_events: event_count,
            start_time,
        })
    }

    /// Get extractor state value (e.g. `("log_file", "cursor")`)
    pub async fn get_extractor_state(
        &self,
        extractor_type: &str,
        state_key: &str,
    ) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT state_value FROM extractor_state WHERE extractor_type = ? AND state_key = ?",
        )
        .bind(extractor_type)
        .bind(state_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get(0)))
    }

    pub async fn set_extractor_state(
        &self,
        extractor_type: &str,
        state_key: &str,
        state_value: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO extractor_state (extractor_type, state_key, state_value, updated_at) \
             VALUES (?, ?, ?, strftime('%s', 'now')) \
             ON CONFLICT(extractor_type, state_key) \
             DO UPDATE SET state_value = excluded.state_value, updated_at = strftime('%s', 'now')",
        )
        .bind(extractor_type)
        .bind(state_key)
        .bind(state_value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_extractor_state(&self, extractor_type: &str, state_key: &str) -> Result<()> {
        sqlx::query("DELETE FROM extractor_state WHERE extractor_type = ? AND state_key = ?")
            .bind(extractor_type)
            .bind(state_key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Engine statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStats {
    pub current_block: u64,
    pub total_events: u64,
    pub start_time: String,
}
