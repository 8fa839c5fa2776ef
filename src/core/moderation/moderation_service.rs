// Word-filter moderation pipeline - core business logic run on every message.
//
// This service handles:
// - Gating (feature flag, guild context, bots, bot permissions)
// - Matching content against the guild's compiled filters
// - The per-guild deletion budget
// - Escalating repeat offenders to timeouts
// - Notifying staff, throttled per offender
// - Sweeping idle in-memory state
//
// NO Discord dependencies here - the platform is reached through `ModerationPlatform`.

use super::escalation::SpamTracker;
use super::filter_service::FilterService;
use super::filter_store::FilterConfigStore;
use super::moderation_models::{
    EscalationAction, EscalationReport, InboundMessage, ModerationConfig, ModerationOutcome,
    ReapStats, Verdict, MODERATION_FILTERS_FLAG,
};
use super::notifications::{build_summary, ModeratorDirectory, NotificationThrottle};
use super::platform::{Capability, FeatureFlags, ModerationPlatform};
use super::rate_limiter::DeletionRateLimiter;
use std::sync::Arc;
use std::time::Instant;

const TIMEOUT_REASON: &str = "Repeated blocked messages";

/// Moderation engine: one per process, shared by every message task.
pub struct ModerationService<S: FilterConfigStore> {
    filters: Arc<FilterService<S>>,
    flags: Arc<dyn FeatureFlags>,
    deletions: DeletionRateLimiter,
    spam: SpamTracker,
    moderators: ModeratorDirectory,
    throttle: NotificationThrottle,
    config: ModerationConfig,
}

impl<S: FilterConfigStore> ModerationService<S> {
    pub fn new(
        filters: Arc<FilterService<S>>,
        flags: Arc<dyn FeatureFlags>,
        config: ModerationConfig,
    ) -> Self {
        Self {
            filters,
            flags,
            deletions: DeletionRateLimiter::new(
                config.deletions_per_window,
                config.deletion_window,
            ),
            spam: SpamTracker::new(
                config.spam_window,
                config.spam_threshold,
                config.escalation_tiers.clone(),
            ),
            moderators: ModeratorDirectory::new(config.moderator_cache_ttl),
            throttle: NotificationThrottle::new(config.notification_cooldown),
            config,
        }
    }

    pub fn config(&self) -> &ModerationConfig {
        &self.config
    }

    /// Decide what to do with a message without side effects on the platform.
    ///
    /// A `Delete` verdict has already taken one unit of the guild's deletion budget.
    pub async fn judge<P: ModerationPlatform + ?Sized>(
        &self,
        platform: &P,
        message: &InboundMessage,
    ) -> Verdict {
        if !self.flags.is_enabled(MODERATION_FILTERS_FLAG) {
            return Verdict::Pass;
        }

        let guild_id = match message.guild_id {
            Some(id) => id,
            None => return Verdict::Pass,
        };

        if message.author_is_bot || message.content.is_empty() {
            return Verdict::Pass;
        }

        if !platform
            .has_capability(guild_id, Capability::ManageMessages)
            .await
        {
            return Verdict::Pass;
        }

        let filters = self.filters.compiled_filters(guild_id).await;
        if filters.is_empty() {
            return Verdict::Pass;
        }

        let pattern = match filters.first_match(&message.content) {
            Some(matcher) => matcher.source.clone(),
            None => return Verdict::Pass,
        };

        if !self.deletions.try_consume(guild_id) {
            return Verdict::Throttled { guild_id, pattern };
        }

        Verdict::Delete { guild_id, pattern }
    }

    /// Run one message through the whole pipeline and apply the result.
    pub async fn handle_message<P: ModerationPlatform + ?Sized>(
        &self,
        platform: &P,
        message: &InboundMessage,
    ) -> ModerationOutcome {
        let (guild_id, pattern) = match self.judge(platform, message).await {
            Verdict::Pass => return ModerationOutcome::NoAction,
            Verdict::Throttled { pattern, .. } => {
                return ModerationOutcome::RateLimited { pattern };
            }
            Verdict::Delete { guild_id, pattern } => (guild_id, pattern),
        };

        if let Err(e) = platform.delete_message(message).await {
            // Permission race or the message is already gone; don't count it.
            tracing::warn!(
                guild_id,
                user_id = message.author_id,
                message_id = message.message_id,
                "Failed to delete filtered message: {}",
                e
            );
            return ModerationOutcome::DeleteFailed { pattern };
        }

        tracing::debug!(
            guild_id,
            user_id = message.author_id,
            pattern = %pattern,
            "Deleted filtered message"
        );

        match self.spam.record(guild_id, message.author_id, &pattern) {
            None => ModerationOutcome::Deleted { pattern },
            Some(action) => {
                let report = self.enforce_escalation(platform, message, &action).await;
                ModerationOutcome::DeletedAndEscalated { action, report }
            }
        }
    }

    /// Apply an escalation: time the member out, then tell staff. Failures are logged only.
    pub async fn enforce_escalation<P: ModerationPlatform + ?Sized>(
        &self,
        platform: &P,
        message: &InboundMessage,
        action: &EscalationAction,
    ) -> EscalationReport {
        tracing::info!(
            guild_id = action.guild_id,
            user_id = action.user_id,
            violation_level = action.violation_level,
            timeout_secs = action.timeout.as_secs(),
            "Escalating repeat filter offender"
        );

        let timeout_applied = match platform
            .timeout_member(action.guild_id, action.user_id, action.timeout, TIMEOUT_REASON)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    guild_id = action.guild_id,
                    user_id = action.user_id,
                    "Failed to timeout member: {}",
                    e
                );
                false
            }
        };

        let notifications_sent = self.notify_staff(platform, message, action).await;

        EscalationReport {
            timeout_applied,
            notifications_sent,
        }
    }

    /// DM the owner and every cached moderator. Returns how many DMs went out.
    async fn notify_staff<P: ModerationPlatform + ?Sized>(
        &self,
        platform: &P,
        message: &InboundMessage,
        action: &EscalationAction,
    ) -> usize {
        if !self
            .throttle
            .try_acquire_at(action.guild_id, action.user_id, Instant::now())
        {
            tracing::debug!(
                guild_id = action.guild_id,
                user_id = action.user_id,
                "Staff notification throttled"
            );
            return 0;
        }

        let summary = build_summary(
            message,
            action,
            self.config.preview_chars,
            self.config.pattern_preview_chars,
        );

        let mut recipients = Vec::new();
        match platform.fetch_owner(action.guild_id).await {
            Ok(owner_id) => recipients.push(owner_id),
            Err(e) => tracing::warn!(
                guild_id = action.guild_id,
                "Failed to fetch guild owner: {}",
                e
            ),
        }

        let mut moderators: Vec<u64> = self
            .moderators
            .moderators(platform, action.guild_id)
            .await
            .into_iter()
            .collect();
        moderators.sort_unstable();
        for id in moderators {
            if !recipients.contains(&id) {
                recipients.push(id);
            }
        }
        // The offender may be staff, and the bot usually holds the capability itself.
        let bot_id = platform.current_user_id();
        recipients.retain(|id| *id != action.user_id && *id != bot_id);

        let mut sent = 0;
        for recipient in recipients {
            match platform.send_direct_message(recipient, &summary).await {
                Ok(()) => sent += 1,
                Err(e) => tracing::warn!(
                    guild_id = action.guild_id,
                    recipient,
                    "Failed to DM moderation summary: {}",
                    e
                ),
            }
        }
        sent
    }

    /// Sweep idle entries from every in-memory cache.
    pub fn reap(&self) -> ReapStats {
        self.reap_at(Instant::now())
    }

    pub fn reap_at(&self, now: Instant) -> ReapStats {
        let idle = self.config.idle_eviction;
        let stats = ReapStats {
            rate_limits: self.deletions.evict_idle_at(now, idle),
            spam_trackers: self.spam.evict_idle_at(now),
            notification_throttles: self.throttle.evict_stale_at(now, idle),
            moderator_directories: self.moderators.evict_stale_at(now),
            filter_sets: self.filters.evict_stale_filters_at(now),
        };
        tracing::debug!(
            rate_limits = stats.rate_limits,
            spam_trackers = stats.spam_trackers,
            notification_throttles = stats.notification_throttles,
            moderator_directories = stats.moderator_directories,
            filter_sets = stats.filter_sets,
            "Moderation reaper sweep finished"
        );
        stats
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::filter_store::FilterError;
    use crate::core::moderation::moderation_models::GuildFilterConfig;
    use crate::core::moderation::platform::PlatformError;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const GUILD: u64 = 100;
    const OWNER: u64 = 1;
    const MOD: u64 = 2;
    const SPAMMER: u64 = 50;
    const BOT: u64 = 99;

    #[derive(Default)]
    struct MockFilterStore {
        configs: DashMap<u64, GuildFilterConfig>,
    }

    #[async_trait]
    impl FilterConfigStore for MockFilterStore {
        async fn load(&self, guild_id: u64) -> Result<GuildFilterConfig, FilterError> {
            Ok(self
                .configs
                .entry(guild_id)
                .or_insert_with(|| GuildFilterConfig::new(guild_id))
                .clone())
        }

        async fn save(&self, config: &GuildFilterConfig) -> Result<(), FilterError> {
            self.configs.insert(config.guild_id, config.clone());
            Ok(())
        }
    }

    struct MockFlags(AtomicBool);

    impl FeatureFlags for MockFlags {
        fn is_enabled(&self, _flag: &str) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Records every platform call; individual actions can be made to fail.
    #[derive(Default)]
    struct MockPlatform {
        lacks_manage_messages: bool,
        fail_delete: bool,
        fail_timeout: bool,
        fail_owner: bool,
        fail_dm_to: Option<u64>,
        deleted: Mutex<Vec<u64>>,
        timeouts: Mutex<Vec<(u64, Duration)>>,
        dms: Mutex<Vec<(u64, String)>>,
    }

    #[async_trait]
    impl ModerationPlatform for MockPlatform {
        async fn has_capability(&self, _guild_id: u64, capability: Capability) -> bool {
            !(capability == Capability::ManageMessages && self.lacks_manage_messages)
        }

        async fn delete_message(&self, message: &InboundMessage) -> Result<(), PlatformError> {
            if self.fail_delete {
                return Err(PlatformError::NotFound("message".to_string()));
            }
            self.deleted.lock().unwrap().push(message.message_id);
            Ok(())
        }

        async fn timeout_member(
            &self,
            _guild_id: u64,
            user_id: u64,
            duration: Duration,
            _reason: &str,
        ) -> Result<(), PlatformError> {
            if self.fail_timeout {
                return Err(PlatformError::MissingPermissions("hierarchy".to_string()));
            }
            self.timeouts.lock().unwrap().push((user_id, duration));
            Ok(())
        }

        async fn send_direct_message(&self, user_id: u64, text: &str) -> Result<(), PlatformError> {
            if self.fail_dm_to == Some(user_id) {
                return Err(PlatformError::Request("dms closed".to_string()));
            }
            self.dms.lock().unwrap().push((user_id, text.to_string()));
            Ok(())
        }

        async fn list_members_with_capability(
            &self,
            _guild_id: u64,
            _capability: Capability,
        ) -> Result<HashSet<u64>, PlatformError> {
            Ok(HashSet::from([OWNER, MOD, SPAMMER, BOT]))
        }

        fn current_user_id(&self) -> u64 {
            BOT
        }

        async fn fetch_owner(&self, _guild_id: u64) -> Result<u64, PlatformError> {
            if self.fail_owner {
                return Err(PlatformError::Request("guild unavailable".to_string()));
            }
            Ok(OWNER)
        }
    }

    async fn engine(words: &[&str]) -> (ModerationService<MockFilterStore>, Arc<MockFlags>) {
        let config = ModerationConfig::default();
        let filters = Arc::new(FilterService::new(MockFilterStore::default(), config.clone()));
        for word in words {
            filters.add_word(GUILD, word).await.unwrap();
        }
        let flags = Arc::new(MockFlags(AtomicBool::new(true)));
        let service = ModerationService::new(filters, flags.clone(), config);
        (service, flags)
    }

    fn message(id: u64, author: u64, content: &str) -> InboundMessage {
        InboundMessage {
            guild_id: Some(GUILD),
            channel_id: 7,
            channel_name: Some("general".to_string()),
            message_id: id,
            author_id: author,
            author_tag: format!("user{}", author),
            author_is_bot: false,
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_clean_message_passes() {
        let (service, _) = engine(&["badword"]).await;
        let platform = MockPlatform::default();

        let outcome = service
            .handle_message(&platform, &message(1, SPAMMER, "hello there"))
            .await;
        assert_eq!(outcome, ModerationOutcome::NoAction);
        assert!(platform.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_matching_message_is_deleted() {
        let (service, _) = engine(&["badword"]).await;
        let platform = MockPlatform::default();

        let outcome = service
            .handle_message(&platform, &message(1, SPAMMER, "you b-a-d-w-o-r-d"))
            .await;
        assert!(matches!(outcome, ModerationOutcome::Deleted { .. }));
        assert_eq!(*platform.deleted.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_gates_skip_processing() {
        let (service, flags) = engine(&["badword"]).await;
        let platform = MockPlatform::default();

        let mut bot = message(1, SPAMMER, "badword");
        bot.author_is_bot = true;
        assert_eq!(service.judge(&platform, &bot).await, Verdict::Pass);

        let mut dm = message(2, SPAMMER, "badword");
        dm.guild_id = None;
        assert_eq!(service.judge(&platform, &dm).await, Verdict::Pass);

        let powerless = MockPlatform {
            lacks_manage_messages: true,
            ..Default::default()
        };
        let msg = message(3, SPAMMER, "badword");
        assert_eq!(service.judge(&powerless, &msg).await, Verdict::Pass);

        flags.0.store(false, Ordering::SeqCst);
        assert_eq!(service.judge(&platform, &msg).await, Verdict::Pass);
    }

    #[tokio::test]
    async fn test_budget_exhausted_leaves_message_and_skips_tracker() {
        let (service, _) = engine(&["badword"]).await;
        let platform = MockPlatform::default();

        // 20 different authors so nobody escalates.
        for i in 0..20 {
            let outcome = service
                .handle_message(&platform, &message(i, 1000 + i, "badword"))
                .await;
            assert!(matches!(outcome, ModerationOutcome::Deleted { .. }));
        }

        let outcome = service
            .handle_message(&platform, &message(21, SPAMMER, "badword"))
            .await;
        assert!(matches!(outcome, ModerationOutcome::RateLimited { .. }));
        assert_eq!(platform.deleted.lock().unwrap().len(), 20);
        assert_eq!(service.spam.violation_level(GUILD, SPAMMER), 0);
        assert_eq!(service.spam.len(), 20);
    }

    #[tokio::test]
    async fn test_failed_delete_does_not_feed_tracker() {
        let (service, _) = engine(&["badword"]).await;
        let platform = MockPlatform {
            fail_delete: true,
            ..Default::default()
        };

        for i in 0..6 {
            let outcome = service
                .handle_message(&platform, &message(i, SPAMMER, "badword"))
                .await;
            assert!(matches!(outcome, ModerationOutcome::DeleteFailed { .. }));
        }
        assert_eq!(service.spam.len(), 0);
        assert!(platform.timeouts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fifth_deletion_escalates_and_notifies_staff() {
        let (service, _) = engine(&["badword"]).await;
        let platform = MockPlatform::default();

        let mut outcomes = Vec::new();
        for i in 0..5 {
            outcomes.push(
                service
                    .handle_message(&platform, &message(i, SPAMMER, "badword"))
                    .await,
            );
        }

        assert!(outcomes[..4]
            .iter()
            .all(|o| matches!(o, ModerationOutcome::Deleted { .. })));
        match &outcomes[4] {
            ModerationOutcome::DeletedAndEscalated { action, report } => {
                assert_eq!(action.violation_level, 1);
                assert_eq!(action.timeout, Duration::from_secs(30));
                assert!(report.timeout_applied);
                assert_eq!(report.notifications_sent, 2);
            }
            other => panic!("expected escalation, got {:?}", other),
        }

        assert_eq!(
            *platform.timeouts.lock().unwrap(),
            vec![(SPAMMER, Duration::from_secs(30))]
        );
        let dms = platform.dms.lock().unwrap();
        let recipients: Vec<u64> = dms.iter().map(|(id, _)| *id).collect();
        assert_eq!(recipients, vec![OWNER, MOD]);
        assert!(dms[0].1.contains("user50 (50)"));
        assert!(dms[0].1.contains("30s"));
    }

    #[tokio::test]
    async fn test_second_escalation_is_throttled_but_still_times_out() {
        let (service, _) = engine(&["badword"]).await;
        let platform = MockPlatform::default();

        for i in 0..10 {
            service
                .handle_message(&platform, &message(i, SPAMMER, "badword"))
                .await;
        }

        let timeouts = platform.timeouts.lock().unwrap();
        assert_eq!(
            *timeouts,
            vec![
                (SPAMMER, Duration::from_secs(30)),
                (SPAMMER, Duration::from_secs(300))
            ]
        );
        // Second escalation landed inside the 60s DM cooldown.
        assert_eq!(platform.dms.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_downstream_failures_are_contained() {
        let (service, _) = engine(&["badword"]).await;
        let platform = MockPlatform {
            fail_timeout: true,
            fail_dm_to: Some(OWNER),
            ..Default::default()
        };

        let mut last = ModerationOutcome::NoAction;
        for i in 0..5 {
            last = service
                .handle_message(&platform, &message(i, SPAMMER, "badword"))
                .await;
        }

        match last {
            ModerationOutcome::DeletedAndEscalated { report, .. } => {
                assert!(!report.timeout_applied);
                assert_eq!(report.notifications_sent, 1);
            }
            other => panic!("expected escalation, got {:?}", other),
        }
    }

    async fn escalate(
        service: &ModerationService<MockFilterStore>,
        platform: &MockPlatform,
    ) -> EscalationReport {
        let mut last = ModerationOutcome::NoAction;
        for i in 0..5 {
            last = service
                .handle_message(platform, &message(i, SPAMMER, "badword"))
                .await;
        }
        match last {
            ModerationOutcome::DeletedAndEscalated { report, .. } => report,
            other => panic!("expected escalation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bot_never_messages_itself() {
        let (service, _) = engine(&["badword"]).await;
        let platform = MockPlatform::default();

        let report = escalate(&service, &platform).await;
        assert_eq!(report.notifications_sent, 2);
        let dms = platform.dms.lock().unwrap();
        assert!(dms.iter().all(|(id, _)| *id != BOT && *id != SPAMMER));
    }

    #[tokio::test]
    async fn test_owner_lookup_failure_still_notifies_moderators() {
        let (service, _) = engine(&["badword"]).await;
        let platform = MockPlatform {
            fail_owner: true,
            ..Default::default()
        };

        // The owner is still reached through the moderator list.
        let report = escalate(&service, &platform).await;
        assert_eq!(report.notifications_sent, 2);
        let recipients: Vec<u64> = platform
            .dms
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(recipients, vec![OWNER, MOD]);
    }

    #[tokio::test]
    async fn test_reap_preserves_offender_history() {
        let (service, _) = engine(&["badword"]).await;
        let platform = MockPlatform::default();

        for i in 0..5 {
            service
                .handle_message(&platform, &message(i, SPAMMER, "badword"))
                .await;
        }
        service
            .handle_message(&platform, &message(9, 77, "badword"))
            .await;

        let stats = service.reap_at(Instant::now() + Duration::from_secs(2 * 60 * 60));
        assert_eq!(stats.rate_limits, 1);
        assert_eq!(stats.spam_trackers, 1);
        assert_eq!(stats.notification_throttles, 1);
        assert_eq!(stats.moderator_directories, 1);
        assert_eq!(stats.filter_sets, 1);
        assert_eq!(service.spam.violation_level(GUILD, SPAMMER), 1);
    }
}
