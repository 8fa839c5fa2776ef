use super::moderation_models::GuildFilterConfig;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid regex: {0}")]
    InvalidPattern(String),

    #[error("Word limit reached ({0} words)")]
    WordLimitReached(usize),

    #[error("Import is {size} bytes; the limit is {limit} bytes")]
    ImportTooLarge { size: usize, limit: usize },
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Durable home of each guild's `GuildFilterConfig`.
///
/// Implemented by the SQLite document store and the JSON flat-file store;
/// which one runs is decided once in `main`.
#[async_trait]
pub trait FilterConfigStore: Send + Sync {
    /// Load a guild's config, creating the default record on first access.
    ///
    /// Must be safe when several tasks hit the same new guild at once.
    async fn load(&self, guild_id: u64) -> Result<GuildFilterConfig, FilterError>;

    /// Upsert the record keyed by `config.guild_id`.
    async fn save(&self, config: &GuildFilterConfig) -> Result<(), FilterError>;
}

#[async_trait]
impl<T: FilterConfigStore + ?Sized> FilterConfigStore for Box<T> {
    async fn load(&self, guild_id: u64) -> Result<GuildFilterConfig, FilterError> {
        (**self).load(guild_id).await
    }

    async fn save(&self, config: &GuildFilterConfig) -> Result<(), FilterError> {
        (**self).save(config).await
    }
}

#[async_trait]
impl<T: FilterConfigStore + ?Sized> FilterConfigStore for Arc<T> {
    async fn load(&self, guild_id: u64) -> Result<GuildFilterConfig, FilterError> {
        (**self).load(guild_id).await
    }

    async fn save(&self, config: &GuildFilterConfig) -> Result<(), FilterError> {
        (**self).save(config).await
    }
}
