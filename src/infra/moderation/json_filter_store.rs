use crate::core::moderation::{FilterConfigStore, FilterError, GuildFilterConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;

/// Flat-file filter store. All guilds live in one JSON file:
/// { "guilds": { guild_id: { communityId, words, regex, autoRegexEnabled } } }
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct JsonStoreData {
    #[serde(default)]
    guilds: HashMap<u64, GuildFilterConfig>,
}

pub struct JsonFilterStore {
    path: PathBuf,
    cache: RwLock<JsonStoreData>,
}

/// `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

impl JsonFilterStore {
    /// Open the file at `path`. A missing or unreadable file starts empty; the
    /// failure is logged and the next save rewrites it. A file that does not
    /// parse is first moved aside to `<path>.corrupt` so it is never overwritten.
    pub async fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let cache = match fs::read_to_string(&path).await {
            Ok(text) if !text.trim().is_empty() => {
                match serde_json::from_str::<JsonStoreData>(&text) {
                    Ok(data) => data,
                    Err(e) => {
                        Self::quarantine(&path, &e).await;
                        JsonStoreData::default()
                    }
                }
            }
            Ok(_) => JsonStoreData::default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => JsonStoreData::default(),
            Err(e) => {
                tracing::warn!("Failed to read filter store {}: {}", path.display(), e);
                JsonStoreData::default()
            }
        };

        Self {
            path,
            cache: RwLock::new(cache),
        }
    }

    async fn quarantine(path: &Path, error: &serde_json::Error) {
        let aside = sibling(path, ".corrupt");
        match fs::rename(path, &aside).await {
            Ok(()) => tracing::warn!(
                "Failed to parse filter store {}: {}. Moved it to {}",
                path.display(),
                error,
                aside.display()
            ),
            Err(e) => tracing::error!(
                "Failed to parse filter store {} ({}) and could not move it aside: {}",
                path.display(),
                error,
                e
            ),
        }
    }

    /// Write the whole file via a temp file and rename, so a crash mid-write
    /// leaves the previous file intact.
    async fn persist(&self, data: &JsonStoreData) -> Result<(), FilterError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| FilterError::StorageError(e.to_string()))?;
        }

        let text = serde_json::to_string_pretty(data)
            .map_err(|e| FilterError::StorageError(e.to_string()))?;
        let tmp = sibling(&self.path, ".tmp");
        fs::write(&tmp, text)
            .await
            .map_err(|e| FilterError::StorageError(e.to_string()))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| FilterError::StorageError(e.to_string()))
    }
}

#[async_trait]
impl FilterConfigStore for JsonFilterStore {
    async fn load(&self, guild_id: u64) -> Result<GuildFilterConfig, FilterError> {
        if let Some(config) = self.cache.read().await.guilds.get(&guild_id) {
            return Ok(config.clone());
        }

        // Re-check under the write lock so two first loads create one record.
        let mut cache = self.cache.write().await;
        let config = cache
            .guilds
            .entry(guild_id)
            .or_insert_with(|| GuildFilterConfig::new(guild_id))
            .clone();
        Ok(config)
    }

    async fn save(&self, config: &GuildFilterConfig) -> Result<(), FilterError> {
        // Hold the write lock through the file write so saves land in order.
        // Memory only changes once the file does.
        let mut cache = self.cache.write().await;
        let mut next = cache.clone();
        next.guilds.insert(config.guild_id, config.clone());
        self.persist(&next).await?;
        *cache = next;
        Ok(())
    }
}
