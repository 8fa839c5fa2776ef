// Filter configuration service.
//
// This service handles:
// - Fail-open config loading for the message path
// - The compiled-filter cache (30s memo, backfill of synthesized patterns)
// - Every admin mutation: words, raw patterns, auto-regex, imports, baseline, clear-all
//
// Every write goes through `save_config`, which persists and then invalidates
// the guild's cached matcher set.

use super::confusable::{compile_filter, confusable_pattern};
use super::filter_cache::{compile_filter_set, CompiledFilterCache};
use super::filter_store::{FilterConfigStore, FilterError};
use super::moderation_models::{
    CompiledFilterSet, GuildFilterConfig, ModerationConfig, BASELINE_WORDS,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// How an import's lines should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    Words,
    Regex,
}

/// Result of a bulk import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Entries that were new and got stored
    pub added: usize,
    /// Duplicates, invalid patterns and lines past the word cap
    pub skipped: usize,
    /// More than the line limit of non-empty lines were supplied
    pub truncated: bool,
}

/// Trim and lowercase a word the way it is stored.
pub fn normalize_word(text: &str) -> String {
    text.trim().to_lowercase()
}

/// One async mutex per guild, created on first use.
#[derive(Default)]
struct GuildLocks {
    locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl GuildLocks {
    fn get(&self, guild_id: u64) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(guild_id).or_default().value())
    }

    /// Forget locks nobody holds or waits on. Returns how many were dropped.
    fn evict_unused(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - self.locks.len()
    }
}

pub struct FilterService<S: FilterConfigStore> {
    store: S,
    cache: CompiledFilterCache,
    config: ModerationConfig,
    // Serializes load-modify-save cycles on one guild's persisted config.
    write_locks: GuildLocks,
    // At most one matcher rebuild per guild; concurrent misses wait for it.
    rebuild_locks: GuildLocks,
}

impl<S: FilterConfigStore> FilterService<S> {
    pub fn new(store: S, config: ModerationConfig) -> Self {
        Self {
            store,
            cache: CompiledFilterCache::new(config.filter_cache_ttl, config.idle_eviction),
            config,
            write_locks: GuildLocks::default(),
            rebuild_locks: GuildLocks::default(),
        }
    }

    /// Load a guild's config; on storage failure log it and hand back an empty, permissive one.
    #[allow(dead_code)]
    pub async fn load_config(&self, guild_id: u64) -> GuildFilterConfig {
        match self.store.load(guild_id).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(guild_id, "Failed to load filter config, failing open: {}", e);
                GuildFilterConfig::new(guild_id)
            }
        }
    }

    /// Persist `config` and drop its cached matcher set.
    pub async fn save_config(&self, config: &GuildFilterConfig) -> Result<(), FilterError> {
        let result = self.store.save(config).await;
        self.cache.invalidate(config.guild_id);
        result
    }

    /// Matcher set for a guild, rebuilt when missing or older than the TTL.
    pub async fn compiled_filters(&self, guild_id: u64) -> Arc<CompiledFilterSet> {
        self.compiled_filters_at(guild_id, Instant::now()).await
    }

    pub async fn compiled_filters_at(&self, guild_id: u64, now: Instant) -> Arc<CompiledFilterSet> {
        if let Some(set) = self.cache.get_fresh_at(guild_id, now) {
            return set;
        }

        let rebuild_lock = self.rebuild_locks.get(guild_id);
        let _rebuilding = rebuild_lock.lock().await;
        // Whoever held the lock before us may have just rebuilt it.
        if let Some(set) = self.cache.get_fresh_at(guild_id, now) {
            return set;
        }

        let mut generation = self.cache.generation(guild_id);
        let mut config = match self.store.load(guild_id).await {
            Ok(config) => config,
            Err(e) => {
                // Not cached: the next message retries storage.
                tracing::warn!(guild_id, "Failed to load filter config, failing open: {}", e);
                return Arc::new(CompiledFilterSet::empty(now));
            }
        };

        if config.auto_regex_enabled && config.needs_backfill() {
            match self.backfill(guild_id).await {
                Ok((updated, saved_generation)) => {
                    config = updated;
                    generation = saved_generation;
                }
                Err(e) => {
                    // The failed save still bumped the generation, so this set
                    // is served once and not cached.
                    tracing::warn!(guild_id, "Failed to persist backfilled patterns: {}", e);
                    config.backfill_patterns();
                }
            }
        }

        let Some(set) = self.build_set(guild_id, config, now).await else {
            return Arc::new(CompiledFilterSet::empty(now));
        };
        tracing::debug!(
            guild_id,
            matchers = set.matchers.len(),
            compiled = set.compiled,
            "Rebuilt compiled filter set"
        );
        self.cache.insert_if_current(guild_id, generation, set)
    }

    /// Compile `config` on the blocking pool, reusing the guild's previous regexes.
    async fn build_set(
        &self,
        guild_id: u64,
        config: GuildFilterConfig,
        now: Instant,
    ) -> Option<CompiledFilterSet> {
        let previous = self.cache.previous(guild_id);
        let built = tokio::task::spawn_blocking(move || {
            compile_filter_set(&config, previous.as_deref(), now)
        })
        .await;

        match built {
            Ok(set) => Some(set),
            Err(e) => {
                tracing::error!(guild_id, "Filter compile task failed, failing open: {}", e);
                None
            }
        }
    }

    /// Generate missing synthesized patterns and save them in one write.
    ///
    /// Returns the config together with the cache generation it corresponds
    /// to, read while the guild's write lock is still held.
    async fn backfill(&self, guild_id: u64) -> Result<(GuildFilterConfig, u64), FilterError> {
        let lock = self.write_locks.get(guild_id);
        let _guard = lock.lock().await;
        let mut config = self.store.load(guild_id).await?;
        let added = config.backfill_patterns();
        if added > 0 {
            tracing::info!(guild_id, added, "Backfilled synthesized filter patterns");
            self.save_config(&config).await?;
        }
        Ok((config, self.cache.generation(guild_id)))
    }

    /// Load, apply `change`, save. Holds the guild's write lock for the whole cycle.
    async fn mutate<T>(
        &self,
        guild_id: u64,
        change: impl FnOnce(&mut GuildFilterConfig) -> Result<T, FilterError>,
    ) -> Result<T, FilterError> {
        let lock = self.write_locks.get(guild_id);
        let _guard = lock.lock().await;
        let mut config = self.store.load(guild_id).await?;
        let result = change(&mut config)?;
        self.save_config(&config).await?;
        Ok(result)
    }

    /// Current words and patterns, straight from storage.
    pub async fn list(&self, guild_id: u64) -> Result<GuildFilterConfig, FilterError> {
        self.store.load(guild_id).await
    }

    /// Block a word or phrase. Returns `false` if it was already blocked.
    pub async fn add_word(&self, guild_id: u64, value: &str) -> Result<bool, FilterError> {
        let word = normalize_word(value);
        if word.is_empty() {
            return Err(FilterError::InvalidInput("word must not be empty".to_string()));
        }
        let max_words = self.config.max_words_per_guild;

        self.mutate(guild_id, |config| insert_word(config, &word, max_words))
            .await
    }

    /// Unblock a word and drop its synthesized pattern. Returns whether anything changed.
    pub async fn remove_word(&self, guild_id: u64, value: &str) -> Result<bool, FilterError> {
        let word = normalize_word(value);
        self.mutate(guild_id, |config| Ok(remove_word(config, &word)))
            .await
    }

    /// Block a raw regex. Rejected if it does not compile.
    pub async fn add_pattern(&self, guild_id: u64, pattern: &str) -> Result<bool, FilterError> {
        let pattern = pattern.trim().to_string();
        if pattern.is_empty() {
            return Err(FilterError::InvalidInput("pattern must not be empty".to_string()));
        }
        compile_filter(&pattern).map_err(|e| FilterError::InvalidPattern(e.to_string()))?;

        self.mutate(guild_id, |config| {
            if config.has_pattern(&pattern) {
                return Ok(false);
            }
            config.regex_patterns.push(pattern.clone());
            Ok(true)
        })
        .await
    }

    pub async fn remove_pattern(&self, guild_id: u64, pattern: &str) -> Result<bool, FilterError> {
        let pattern = pattern.trim();
        self.mutate(guild_id, |config| {
            let before = config.regex_patterns.len();
            config.regex_patterns.retain(|p| p != pattern);
            Ok(config.regex_patterns.len() != before)
        })
        .await
    }

    /// Toggle auto-regex. With `backfill`, enabling also synthesizes patterns for
    /// every word lacking one; returns how many were added.
    ///
    /// Disabling leaves existing synthesized patterns in place.
    pub async fn set_auto_regex(
        &self,
        guild_id: u64,
        enabled: bool,
        backfill: bool,
    ) -> Result<usize, FilterError> {
        self.mutate(guild_id, |config| {
            config.auto_regex_enabled = enabled;
            if enabled && backfill {
                Ok(config.backfill_patterns())
            } else {
                Ok(0)
            }
        })
        .await
    }

    /// Bulk import newline-separated entries.
    pub async fn import(
        &self,
        guild_id: u64,
        text: &str,
        mode: ImportMode,
    ) -> Result<ImportReport, FilterError> {
        if text.len() > self.config.max_import_bytes {
            return Err(FilterError::ImportTooLarge {
                size: text.len(),
                limit: self.config.max_import_bytes,
            });
        }

        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let truncated = lines.len() > self.config.max_import_lines;
        let lines = &lines[..lines.len().min(self.config.max_import_lines)];
        let max_words = self.config.max_words_per_guild;

        let report = self
            .mutate(guild_id, |config| {
                let mut report = ImportReport {
                    truncated,
                    ..Default::default()
                };

                for line in lines {
                    let added = match mode {
                        ImportMode::Regex => {
                            if compile_filter(line).is_err() || config.has_pattern(line) {
                                false
                            } else {
                                config.regex_patterns.push(line.to_string());
                                true
                            }
                        }
                        ImportMode::Words => {
                            insert_word(config, &normalize_word(line), max_words).unwrap_or(false)
                        }
                    };

                    if added {
                        report.added += 1;
                    } else {
                        report.skipped += 1;
                    }
                }
                Ok(report)
            })
            .await?;

        tracing::info!(
            guild_id,
            added = report.added,
            skipped = report.skipped,
            truncated = report.truncated,
            "Imported filter entries"
        );
        Ok(report)
    }

    /// Load (`true`) or unload (`false`) the baseline word list.
    /// Returns how many words were added or removed.
    pub async fn set_baseline(&self, guild_id: u64, enabled: bool) -> Result<usize, FilterError> {
        let max_words = self.config.max_words_per_guild;

        self.mutate(guild_id, |config| {
            let mut changed = 0;
            for word in BASELINE_WORDS {
                let hit = if enabled {
                    match insert_word(config, word, max_words) {
                        Ok(added) => added,
                        Err(FilterError::WordLimitReached(_)) => break,
                        Err(e) => return Err(e),
                    }
                } else {
                    remove_word(config, word)
                };
                if hit {
                    changed += 1;
                }
            }
            Ok(changed)
        })
        .await
    }

    /// Wipe a guild back to an empty config with auto-regex on.
    pub async fn clear_all(&self, guild_id: u64) -> Result<(), FilterError> {
        self.mutate(guild_id, |config| {
            *config = GuildFilterConfig::new(guild_id);
            Ok(())
        })
        .await
    }

    /// Drop compiled sets past their TTL along with idle per-guild locks.
    pub fn evict_stale_filters_at(&self, now: Instant) -> usize {
        let locks = self.write_locks.evict_unused() + self.rebuild_locks.evict_unused();
        tracing::debug!(locks, "Dropped idle filter locks");
        self.cache.evict_stale_at(now)
    }
}

/// Add a normalized word (and, with auto-regex on, its synthesized pattern).
fn insert_word(
    config: &mut GuildFilterConfig,
    word: &str,
    max_words: usize,
) -> Result<bool, FilterError> {
    if word.is_empty() || config.has_word(word) {
        return Ok(false);
    }
    if config.words.len() >= max_words {
        return Err(FilterError::WordLimitReached(max_words));
    }

    config.words.push(word.to_string());
    if config.auto_regex_enabled {
        let pattern = confusable_pattern(word);
        if !config.has_pattern(&pattern) {
            config.regex_patterns.push(pattern);
        }
    }
    Ok(true)
}

fn remove_word(config: &mut GuildFilterConfig, word: &str) -> bool {
    let pattern = confusable_pattern(word);
    let before = config.words.len() + config.regex_patterns.len();
    config.words.retain(|w| w != word);
    config.regex_patterns.retain(|p| *p != pattern);
    config.words.len() + config.regex_patterns.len() != before
}

// ============================================================================
// TESTS
// ============================================================================
