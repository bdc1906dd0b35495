use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::sequence::SequenceStep;

/// Named snapshots of user-built sequences.
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Stores `steps` under `name`, replacing whatever was saved there before.
    async fn save_sequence(&self, name: &str, steps: &[SequenceStep]) -> Result<()>;
    async fn load_sequence(&self, name: &str) -> Result<Option<Vec<SequenceStep>>>;
    async fn list_sequences(&self) -> Result<Vec<SavedSequenceSummary>>;
    async fn delete_sequence(&self, name: &str) -> Result<bool>;
    /// Fails when the backing store cannot serve queries.
    async fn health_check(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedSequenceSummary {
    pub name: String,
    pub step_count: usize,
    pub saved_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to `sqlite::memory:` opens its own empty database.
        let pool_options = if is_in_memory(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(connect_options).await?;
        let storage = Self { pool };
        storage.ensure_saved_sequences_table().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn ensure_saved_sequences_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS saved_sequences (
                name       TEXT PRIMARY KEY NOT NULL,
                steps_json TEXT NOT NULL,
                saved_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure saved_sequences table exists")?;
        Ok(())
    }
}

#[async_trait]
impl SequenceStore for Storage {
    async fn save_sequence(&self, name: &str, steps: &[SequenceStep]) -> Result<()> {
        let steps_json =
            serde_json::to_string(steps).context("failed to encode sequence steps")?;
        sqlx::query(
            "INSERT INTO saved_sequences (name, steps_json, saved_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                steps_json = excluded.steps_json,
                saved_at = excluded.saved_at",
        )
        .bind(name)
        .bind(steps_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save sequence '{name}'"))?;
        Ok(())
    }

    async fn load_sequence(&self, name: &str) -> Result<Option<Vec<SequenceStep>>> {
        let row = sqlx::query("SELECT steps_json FROM saved_sequences WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to load sequence '{name}'"))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let steps_json: String = row.try_get("steps_json")?;
        let steps = serde_json::from_str(&steps_json)
            .with_context(|| format!("saved sequence '{name}' is corrupt"))?;
        Ok(Some(steps))
    }

    async fn list_sequences(&self) -> Result<Vec<SavedSequenceSummary>> {
        let rows = sqlx::query("SELECT name, steps_json, saved_at FROM saved_sequences ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .context("failed to list saved sequences")?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            let steps_json: String = row.try_get("steps_json")?;
            let saved_at: String = row.try_get("saved_at")?;
            let steps: Vec<SequenceStep> = serde_json::from_str(&steps_json)
                .with_context(|| format!("saved sequence '{name}' is corrupt"))?;
            let saved_at = DateTime::parse_from_rfc3339(&saved_at)
                .with_context(|| format!("saved sequence '{name}' has invalid timestamp"))?
                .with_timezone(&Utc);
            summaries.push(SavedSequenceSummary {
                name,
                step_count: steps.len(),
                saved_at,
            });
        }
        Ok(summaries)
    }

    async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn delete_sequence(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM saved_sequences WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete sequence '{name}'"))?;
        Ok(result.rows_affected() > 0)
    }
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_in_memory(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
