// Staff notification support: cached moderator lists, a per-offender DM
// throttle and the summary text sent to staff.

use super::moderation_models::{EscalationAction, InboundMessage};
use super::platform::{Capability, ModerationPlatform};
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct ModeratorEntry {
    members: HashSet<u64>,
    fetched_at: Instant,
}

/// Per-guild cache of who counts as staff.
pub struct ModeratorDirectory {
    entries: DashMap<u64, ModeratorEntry>,
    ttl: Duration,
}

impl ModeratorDirectory {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cached staff set if it was fetched less than one TTL ago.
    pub fn cached_at(&self, guild_id: u64, now: Instant) -> Option<HashSet<u64>> {
        self.entries
            .get(&guild_id)
            .filter(|e| now.saturating_duration_since(e.fetched_at) < self.ttl)
            .map(|e| e.members.clone())
    }

    pub fn store_at(&self, guild_id: u64, members: HashSet<u64>, now: Instant) {
        self.entries.insert(
            guild_id,
            ModeratorEntry {
                members,
                fetched_at: now,
            },
        );
    }

    /// Staff for `guild_id`, refreshing from the platform when stale.
    ///
    /// A failed refresh falls back to whatever was cached before, or nobody.
    pub async fn moderators<P: ModerationPlatform + ?Sized>(
        &self,
        platform: &P,
        guild_id: u64,
    ) -> HashSet<u64> {
        self.moderators_at(platform, guild_id, Instant::now()).await
    }

    pub async fn moderators_at<P: ModerationPlatform + ?Sized>(
        &self,
        platform: &P,
        guild_id: u64,
        now: Instant,
    ) -> HashSet<u64> {
        if let Some(members) = self.cached_at(guild_id, now) {
            return members;
        }

        match platform
            .list_members_with_capability(guild_id, Capability::ManageGuild)
            .await
        {
            Ok(members) => {
                self.store_at(guild_id, members.clone(), now);
                members
            }
            Err(e) => {
                tracing::warn!(guild_id, "Failed to refresh moderator list: {}", e);
                self.entries
                    .get(&guild_id)
                    .map(|entry| entry.members.clone())
                    .unwrap_or_default()
            }
        }
    }

    /// Drop directories older than twice the TTL.
    pub fn evict_stale_at(&self, now: Instant) -> usize {
        let max_age = self.ttl * 2;
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.fetched_at) <= max_age);
        before - self.entries.len()
    }
}

/// At most one staff DM per (guild, offender) per cooldown.
pub struct NotificationThrottle {
    last_sent: DashMap<(u64, u64), Instant>,
    cooldown: Duration,
}

impl NotificationThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last_sent: DashMap::new(),
            cooldown,
        }
    }

    /// Claim the notification slot. Returns `false` if one went out within the cooldown.
    pub fn try_acquire_at(&self, guild_id: u64, user_id: u64, now: Instant) -> bool {
        let mut last = match self.last_sent.entry((guild_id, user_id)) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(now);
                return true;
            }
            dashmap::mapref::entry::Entry::Occupied(slot) => slot.into_ref(),
        };

        if now.saturating_duration_since(*last) < self.cooldown {
            return false;
        }
        *last = now;
        true
    }

    pub fn evict_stale_at(&self, now: Instant, max_age: Duration) -> usize {
        let before = self.last_sent.len();
        self.last_sent
            .retain(|_, sent| now.saturating_duration_since(*sent) <= max_age);
        before - self.last_sent.len()
    }
}

/// Cut `text` to `max` characters, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}

/// Human-readable escalation summary for staff DMs.
pub fn build_summary(
    message: &InboundMessage,
    action: &EscalationAction,
    preview_chars: usize,
    pattern_chars: usize,
) -> String {
    let channel = message
        .channel_name
        .as_ref()
        .map(|name| format!("#{}", name))
        .unwrap_or_else(|| format!("<#{}>", message.channel_id));

    format!(
        "🔇 User {} ({}) timed out for {}s after repeated blocked messages in {}.\n\
         • Violation level: {}\n\
         • Message: {}\n\
         • Matched pattern: `{}`",
        message.author_tag,
        message.author_id,
        action.timeout.as_secs(),
        channel,
        action.violation_level,
        truncate_chars(&message.content, preview_chars),
        truncate_chars(&action.pattern, pattern_chars),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::platform::PlatformError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Serves a fixed staff list until told to fail.
    #[derive(Default)]
    struct StaffPlatform {
        offline: AtomicBool,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl ModerationPlatform for StaffPlatform {
        async fn has_capability(&self, _guild_id: u64, _capability: Capability) -> bool {
            true
        }

        async fn delete_message(&self, _message: &InboundMessage) -> Result<(), PlatformError> {
            Ok(())
        }

        async fn timeout_member(
            &self,
            _guild_id: u64,
            _user_id: u64,
            _duration: Duration,
            _reason: &str,
        ) -> Result<(), PlatformError> {
            Ok(())
        }

        async fn send_direct_message(
            &self,
            _user_id: u64,
            _text: &str,
        ) -> Result<(), PlatformError> {
            Ok(())
        }

        async fn list_members_with_capability(
            &self,
            _guild_id: u64,
            _capability: Capability,
        ) -> Result<HashSet<u64>, PlatformError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(PlatformError::Request("gateway down".to_string()));
            }
            Ok(HashSet::from([10, 11]))
        }

        fn current_user_id(&self) -> u64 {
            99
        }

        async fn fetch_owner(&self, _guild_id: u64) -> Result<u64, PlatformError> {
            Ok(10)
        }
    }

    #[tokio::test]
    async fn test_directory_serves_cache_within_ttl() {
        let directory = ModeratorDirectory::new(Duration::from_secs(300));
        let platform = StaffPlatform::default();
        let now = Instant::now();

        assert_eq!(directory.moderators_at(&platform, 1, now).await.len(), 2);
        directory
            .moderators_at(&platform, 1, now + Duration::from_secs(100))
            .await;
        assert_eq!(platform.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_falls_back_to_stale_list() {
        let directory = ModeratorDirectory::new(Duration::from_secs(300));
        let platform = StaffPlatform::default();
        let now = Instant::now();
        directory.moderators_at(&platform, 1, now).await;

        platform.offline.store(true, Ordering::SeqCst);
        let later = now + Duration::from_secs(301);
        let members = directory.moderators_at(&platform, 1, later).await;
        assert_eq!(members, HashSet::from([10, 11]));
        assert_eq!(platform.lookups.load(Ordering::SeqCst), 2);

        // Recovery replaces the stale entry.
        platform.offline.store(false, Ordering::SeqCst);
        directory.moderators_at(&platform, 1, later).await;
        assert!(directory.cached_at(1, later).is_some());
    }

    #[tokio::test]
    async fn test_failed_first_lookup_yields_nobody() {
        let directory = ModeratorDirectory::new(Duration::from_secs(300));
        let platform = StaffPlatform {
            offline: AtomicBool::new(true),
            ..Default::default()
        };

        let members = directory.moderators_at(&platform, 1, Instant::now()).await;
        assert!(members.is_empty());
        assert!(directory.cached_at(1, Instant::now()).is_none());
    }

    #[test]
    fn test_throttle_cooldown() {
        let throttle = NotificationThrottle::new(Duration::from_secs(60));
        let now = Instant::now();

        assert!(throttle.try_acquire_at(1, 2, now));
        assert!(!throttle.try_acquire_at(1, 2, now + Duration::from_secs(59)));
        assert!(throttle.try_acquire_at(1, 3, now));
        assert!(throttle.try_acquire_at(1, 2, now + Duration::from_secs(61)));
    }

    #[test]
    fn test_throttle_eviction() {
        let throttle = NotificationThrottle::new(Duration::from_secs(60));
        let now = Instant::now();
        throttle.try_acquire_at(1, 2, now);
        throttle.try_acquire_at(1, 3, now + Duration::from_secs(3000));

        let removed =
            throttle.evict_stale_at(now + Duration::from_secs(3700), Duration::from_secs(3600));
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_directory_ttl_and_eviction() {
        let directory = ModeratorDirectory::new(Duration::from_secs(300));
        let now = Instant::now();
        directory.store_at(1, HashSet::from([10, 11]), now);

        assert_eq!(directory.cached_at(1, now).unwrap().len(), 2);
        assert!(directory.cached_at(1, now + Duration::from_secs(301)).is_none());

        assert_eq!(directory.evict_stale_at(now + Duration::from_secs(500)), 0);
        assert_eq!(directory.evict_stale_at(now + Duration::from_secs(601)), 1);
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("ééééé", 3), "ééé…");
    }

    #[test]
    fn test_summary_contents() {
        let message = InboundMessage {
            guild_id: Some(1),
            channel_id: 5,
            channel_name: Some("general".to_string()),
            message_id: 9,
            author_id: 2,
            author_tag: "spammer#0001".to_string(),
            author_is_bot: false,
            content: "x".repeat(500),
        };
        let action = EscalationAction {
            guild_id: 1,
            user_id: 2,
            violation_level: 2,
            timeout: Duration::from_secs(300),
            pattern: "p".repeat(300),
        };

        let summary = build_summary(&message, &action, 200, 100);
        assert!(summary.contains("spammer#0001 (2)"));
        assert!(summary.contains("300s"));
        assert!(summary.contains("#general"));
        assert!(summary.contains("Violation level: 2"));
        assert!(summary.contains(&format!("{}…", "x".repeat(200))));
        assert!(!summary.contains(&"x".repeat(201)));
        assert!(summary.contains(&format!("{}…", "p".repeat(100))));
    }
}
