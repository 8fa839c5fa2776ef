// SQLite-backed filter store.
//
// Each guild's config is kept as one JSON document, so the row shape never
// changes when the config grows a field.
//
// Tables:
// - filter_configs: guild_id -> { communityId, words, regex, autoRegexEnabled }

use crate::core::moderation::{FilterConfigStore, FilterError, GuildFilterConfig};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

pub struct SqliteFilterStore {
    pool: Pool<Sqlite>,
}

impl SqliteFilterStore {
    pub async fn new(database_url: &str) -> Result<Self, FilterError> {
        let in_memory = database_url.contains(":memory:");

        // Ensure the file exists if it's a file path
        let path_str = database_url.trim_start_matches("sqlite://");
        if !in_memory && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| FilterError::StorageError(e.to_string()))?;
            }
            std::fs::File::create(path_str).map_err(|e| FilterError::StorageError(e.to_string()))?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        // Every connection to `:memory:` is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect(&conn_str)
            .await
            .map_err(|e| FilterError::StorageError(e.to_string()))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), FilterError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS filter_configs (
                guild_id INTEGER PRIMARY KEY,
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| FilterError::StorageError(e.to_string()))?;

        Ok(())
    }

    fn encode(config: &GuildFilterConfig) -> Result<String, FilterError> {
        serde_json::to_string(config).map_err(|e| FilterError::StorageError(e.to_string()))
    }
}

#[async_trait]
impl FilterConfigStore for SqliteFilterStore {
    async fn load(&self, guild_id: u64) -> Result<GuildFilterConfig, FilterError> {
        // Insert-or-ignore keeps concurrent first loads from clobbering each other.
        let default_doc = Self::encode(&GuildFilterConfig::new(guild_id))?;
        sqlx::query(
            r#"
            INSERT INTO filter_configs (guild_id, document, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(guild_id) DO NOTHING
            "#,
        )
        .bind(guild_id as i64)
        .bind(&default_doc)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| FilterError::StorageError(e.to_string()))?;

        let row = sqlx::query("SELECT document FROM filter_configs WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| FilterError::StorageError(e.to_string()))?;

        let document: String = row.get("document");
        let mut config: GuildFilterConfig = serde_json::from_str(&document)
            .map_err(|e| FilterError::StorageError(e.to_string()))?;
        // The row key is authoritative.
        config.guild_id = guild_id;
        Ok(config)
    }

    async fn save(&self, config: &GuildFilterConfig) -> Result<(), FilterError> {
        sqlx::query(
            r#"
            INSERT INTO filter_configs (guild_id, document, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(guild_id) DO UPDATE SET
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(config.guild_id as i64)
        .bind(Self::encode(config)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| FilterError::StorageError(e.to_string()))?;
        Ok(())
    }
}
