// Compiled-filter cache: per-guild memo of the matcher list built from config.
//
// Entries are immutable `Arc<CompiledFilterSet>`s. Writers never patch a set in
// place; they invalidate it and the next reader rebuilds.

use super::confusable::{compile_filter, literal_word_pattern};
use super::moderation_models::{CompiledFilterSet, CompiledMatcher, GuildFilterConfig};
use dashmap::DashMap;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Compile every usable matcher in `config`.
///
/// Stored patterns come first, in stored order. Patterns that fail to compile
/// are logged and skipped. With auto-regex off, each word also gets a literal
/// whole-word matcher. Sources already compiled in `previous` are reused.
///
/// Compiling thousands of patterns is CPU-bound; async callers run this on
/// the blocking pool.
pub fn compile_filter_set(
    config: &GuildFilterConfig,
    previous: Option<&CompiledFilterSet>,
    now: Instant,
) -> CompiledFilterSet {
    let reusable: HashMap<&str, &Regex> = previous
        .map(|set| {
            set.matchers
                .iter()
                .map(|m| (m.source.as_str(), &m.regex))
                .collect()
        })
        .unwrap_or_default();

    let mut compiled = 0;
    let mut matcher_for = |source: String| -> Result<CompiledMatcher, regex::Error> {
        if let Some(regex) = reusable.get(source.as_str()) {
            return Ok(CompiledMatcher {
                regex: (*regex).clone(),
                source,
            });
        }
        let regex = compile_filter(&source)?;
        compiled += 1;
        Ok(CompiledMatcher { source, regex })
    };

    let mut matchers = Vec::with_capacity(config.regex_patterns.len());

    for source in &config.regex_patterns {
        match matcher_for(source.clone()) {
            Ok(matcher) => matchers.push(matcher),
            Err(e) => {
                tracing::warn!(
                    guild_id = config.guild_id,
                    pattern = %source,
                    "Skipping filter pattern that failed to compile: {}",
                    e
                );
            }
        }
    }

    if !config.auto_regex_enabled {
        for word in config.words.iter().filter(|w| !w.is_empty()) {
            match matcher_for(literal_word_pattern(word)) {
                Ok(matcher) => matchers.push(matcher),
                Err(e) => {
                    tracing::warn!(
                        guild_id = config.guild_id,
                        word = %word,
                        "Skipping literal word matcher: {}",
                        e
                    );
                }
            }
        }
    }

    CompiledFilterSet {
        words: config.words.clone(),
        regex_patterns: config.regex_patterns.clone(),
        matchers,
        auto_regex_enabled: config.auto_regex_enabled,
        cached_at: now,
        compiled,
    }
}

pub struct CompiledFilterCache {
    sets: DashMap<u64, Arc<CompiledFilterSet>>,
    // Last set built per guild, fresh or not. Rebuilds borrow its regexes.
    previous: DashMap<u64, Arc<CompiledFilterSet>>,
    // Bumped on every invalidation so a rebuild that raced a write is not stored.
    generations: DashMap<u64, u64>,
    ttl: Duration,
    previous_ttl: Duration,
}

impl CompiledFilterCache {
    /// `previous_ttl` bounds how long an idle guild's regexes are kept for reuse.
    pub fn new(ttl: Duration, previous_ttl: Duration) -> Self {
        Self {
            sets: DashMap::new(),
            previous: DashMap::new(),
            generations: DashMap::new(),
            ttl,
            previous_ttl,
        }
    }

    /// Cached set for `guild_id` if it is younger than the TTL.
    pub fn get_fresh_at(&self, guild_id: u64, now: Instant) -> Option<Arc<CompiledFilterSet>> {
        self.sets
            .get(&guild_id)
            .filter(|set| set.is_fresh(now, self.ttl))
            .map(|set| Arc::clone(set.value()))
    }

    /// Most recent set built for `guild_id`, even if stale or invalidated.
    pub fn previous(&self, guild_id: u64) -> Option<Arc<CompiledFilterSet>> {
        self.previous.get(&guild_id).map(|set| Arc::clone(set.value()))
    }

    /// Current write generation for `guild_id`; read this before loading config.
    pub fn generation(&self, guild_id: u64) -> u64 {
        self.generations.get(&guild_id).map(|g| *g).unwrap_or(0)
    }

    /// Store `set` unless the guild was invalidated after `generation` was read.
    /// The set is handed back either way so the caller can use it for this message.
    pub fn insert_if_current(
        &self,
        guild_id: u64,
        generation: u64,
        set: CompiledFilterSet,
    ) -> Arc<CompiledFilterSet> {
        let set = Arc::new(set);
        // Regexes are keyed by source, so even a superseded set is worth reusing.
        self.previous.insert(guild_id, Arc::clone(&set));
        if self.generation(guild_id) == generation {
            self.sets.insert(guild_id, Arc::clone(&set));
        }
        set
    }

    /// Drop the cached set so the next reader rebuilds from storage.
    pub fn invalidate(&self, guild_id: u64) {
        *self.generations.entry(guild_id).or_insert(0) += 1;
        self.sets.remove(&guild_id);
    }

    /// Remove sets past their TTL and forget regexes of long-idle guilds.
    /// Returns how many sets were dropped.
    pub fn evict_stale_at(&self, now: Instant) -> usize {
        let before = self.sets.len();
        self.sets.retain(|_, set| set.is_fresh(now, self.ttl));
        self.previous
            .retain(|_, set| set.is_fresh(now, self.previous_ttl));
        before - self.sets.len()
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.sets.len()
    }
}
