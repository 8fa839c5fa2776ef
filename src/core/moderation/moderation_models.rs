// Word-filter domain models - persisted config, compiled matchers, pipeline outcomes.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer converts messages into `InboundMessage` and applies
// whatever `ModerationOutcome` the core hands back.

use super::confusable::confusable_pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Feature flag polled on every message; when off the whole pipeline is skipped.
pub const MODERATION_FILTERS_FLAG: &str = "moderationFilters";

/// Fixed starter list an admin can load or unload in one go.
pub const BASELINE_WORDS: &[&str] = &[
    "asshole",
    "bastard",
    "bitch",
    "cunt",
    "dick",
    "douche",
    "fag",
    "fuck",
    "motherfucker",
    "nazi",
    "nigga",
    "nigger",
    "prick",
    "slut",
    "whore",
];

fn default_true() -> bool {
    true
}

/// Durable per-guild filter settings.
///
/// Serialized as `{ communityId, words, regex, autoRegexEnabled }` so both
/// storage backends share one record shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildFilterConfig {
    #[serde(rename = "communityId")]
    pub guild_id: u64,
    /// Normalized (trimmed, lowercase) blocked words and phrases.
    #[serde(default)]
    pub words: Vec<String>,
    /// Raw and synthesized regex sources.
    #[serde(rename = "regex", default)]
    pub regex_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub auto_regex_enabled: bool,
}

impl GuildFilterConfig {
    /// Fresh, permissive config: no words, no patterns, auto-regex on.
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            words: Vec::new(),
            regex_patterns: Vec::new(),
            auto_regex_enabled: true,
        }
    }

    pub fn has_word(&self, word: &str) -> bool {
        self.words.iter().any(|w| w == word)
    }

    pub fn has_pattern(&self, pattern: &str) -> bool {
        self.regex_patterns.iter().any(|p| p == pattern)
    }

    /// Whether any word is still missing its synthesized pattern.
    pub fn needs_backfill(&self) -> bool {
        self.words
            .iter()
            .filter(|w| !w.is_empty())
            .any(|w| !self.has_pattern(&confusable_pattern(w)))
    }

    /// Append a synthesized pattern for every word lacking one.
    /// Returns how many patterns were added.
    pub fn backfill_patterns(&mut self) -> usize {
        let missing: Vec<String> = self
            .words
            .iter()
            .filter(|w| !w.is_empty())
            .map(|w| confusable_pattern(w))
            .filter(|p| !self.has_pattern(p))
            .collect();

        let mut added = 0;
        for pattern in missing {
            // Two words can synthesize the same pattern (e.g. duplicates from a hand-edited file)
            if !self.has_pattern(&pattern) {
                self.regex_patterns.push(pattern);
                added += 1;
            }
        }
        added
    }
}

/// Tunables for the moderation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// How long a compiled filter set is served before it is rebuilt
    pub filter_cache_ttl: Duration,
    /// Maximum stored words per guild
    pub max_words_per_guild: usize,
    /// Maximum non-empty lines taken from one import
    pub max_import_lines: usize,
    /// Maximum size of an import source in bytes
    pub max_import_bytes: usize,
    /// Deletions allowed per guild in one window
    pub deletions_per_window: u32,
    /// Deletion budget window
    pub deletion_window: Duration,
    /// Sliding window for counting a member's blocked messages
    pub spam_window: Duration,
    /// Blocked messages within the window that trigger an escalation
    pub spam_threshold: usize,
    /// Timeout per escalation level; the last tier repeats
    pub escalation_tiers: Vec<Duration>,
    /// Minimum gap between staff notifications about the same member
    pub notification_cooldown: Duration,
    /// How long a guild's moderator list is trusted
    pub moderator_cache_ttl: Duration,
    /// How often idle entries are swept from memory
    pub reaper_interval: Duration,
    /// Age after which rate-limit and throttle entries are dropped
    pub idle_eviction: Duration,
    /// Characters of the offending message included in notifications
    pub preview_chars: usize,
    /// Characters of the matched pattern included in notifications
    pub pattern_preview_chars: usize,
    /// Member fetch size when no moderators are cached
    pub moderator_fetch_limit: u64,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            filter_cache_ttl: Duration::from_secs(30),
            max_words_per_guild: 2000,
            max_import_lines: 500,
            max_import_bytes: 512 * 1024,
            deletions_per_window: 20,                 // 20 deletions...
            deletion_window: Duration::from_secs(60), // ...per minute
            spam_window: Duration::from_millis(3000), // 5 blocked messages...
            spam_threshold: 5,                        // ...within 3 seconds
            escalation_tiers: vec![
                Duration::from_secs(30),
                Duration::from_secs(5 * 60),
                Duration::from_secs(60 * 60),
            ],
            notification_cooldown: Duration::from_secs(60),
            moderator_cache_ttl: Duration::from_secs(5 * 60),
            reaper_interval: Duration::from_secs(60 * 60),
            idle_eviction: Duration::from_secs(60 * 60),
            preview_chars: 200,
            pattern_preview_chars: 100,
            moderator_fetch_limit: 50,
        }
    }
}

/// One compiled matcher plus the source it came from.
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    pub source: String,
    pub regex: Regex,
}

/// Immutable matcher bundle derived from a `GuildFilterConfig`.
#[derive(Debug)]
pub struct CompiledFilterSet {
    pub words: Vec<String>,
    pub regex_patterns: Vec<String>,
    /// Tested in order; the first hit wins.
    pub matchers: Vec<CompiledMatcher>,
    pub auto_regex_enabled: bool,
    pub cached_at: Instant,
    /// Regexes compiled for this set; the rest were reused from the previous one.
    pub compiled: usize,
}

impl CompiledFilterSet {
    /// Set with nothing to match, used when the config cannot be loaded.
    pub fn empty(now: Instant) -> Self {
        Self {
            words: Vec::new(),
            regex_patterns: Vec::new(),
            matchers: Vec::new(),
            auto_regex_enabled: true,
            cached_at: now,
            compiled: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.cached_at) < ttl
    }

    /// First matcher that hits `content`, if any.
    pub fn first_match(&self, content: &str) -> Option<&CompiledMatcher> {
        self.matchers.iter().find(|m| m.regex.is_match(content))
    }
}

/// Platform-neutral view of an incoming chat message.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// `None` for direct messages
    pub guild_id: Option<u64>,
    pub channel_id: u64,
    pub channel_name: Option<String>,
    pub message_id: u64,
    pub author_id: u64,
    /// Display tag used in staff notifications
    pub author_tag: String,
    pub author_is_bot: bool,
    pub content: String,
}

/// Instruction produced when a member crosses the spam threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationAction {
    pub guild_id: u64,
    pub user_id: u64,
    /// 1 for the first escalation, 2 for the second, ...
    pub violation_level: u32,
    pub timeout: Duration,
    /// Pattern that matched the message which crossed the threshold
    pub pattern: String,
}

/// What the pipeline decided before touching the platform.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Not judged, or judged clean
    Pass,
    /// Matched, but the guild's deletion budget is spent
    Throttled { guild_id: u64, pattern: String },
    /// Matched and a deletion was budgeted
    Delete { guild_id: u64, pattern: String },
}

/// Side effects of enforcing an escalation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EscalationReport {
    pub timeout_applied: bool,
    pub notifications_sent: usize,
}

/// Final result of running one message through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ModerationOutcome {
    NoAction,
    /// Message left in place because the deletion budget is exhausted
    RateLimited { pattern: String },
    /// The platform refused the deletion; nothing else happened
    DeleteFailed { pattern: String },
    Deleted { pattern: String },
    DeletedAndEscalated {
        action: EscalationAction,
        report: EscalationReport,
    },
}

/// How many entries each in-memory cache dropped during a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapStats {
    pub rate_limits: usize,
    pub spam_trackers: usize,
    pub notification_throttles: usize,
    pub moderator_directories: usize,
    pub filter_sets: usize,
}

impl ReapStats {
    pub fn total(&self) -> usize {
        self.rate_limits
            + self.spam_trackers
            + self.notification_throttles
            + self.moderator_directories
            + self.filter_sets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backfill_adds_missing_patterns_once() {
        let mut config = GuildFilterConfig::new(1);
        config.words = vec!["badword".to_string(), "other".to_string()];
        config.regex_patterns = vec![confusable_pattern("badword")];

        assert!(config.needs_backfill());
        assert_eq!(config.backfill_patterns(), 1);
        assert!(!config.needs_backfill());
        assert_eq!(config.backfill_patterns(), 0);
        assert_eq!(config.regex_patterns.len(), 2);
    }

    #[test]
    fn test_record_shape() {
        let mut config = GuildFilterConfig::new(42);
        config.words.push("badword".to_string());

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["communityId"], 42);
        assert_eq!(json["words"][0], "badword");
        assert!(json["regex"].as_array().unwrap().is_empty());
        assert_eq!(json["autoRegexEnabled"], true);
    }

    #[test]
    fn test_missing_fields_default_to_permissive() {
        let config: GuildFilterConfig = serde_json::from_str(r#"{"communityId": 9}"#).unwrap();
        assert_eq!(config, GuildFilterConfig::new(9));
    }
}
