// Spam/escalation tracker.
//
// Every confirmed deletion is recorded against the author. Hitting the
// threshold inside the sliding window raises the member's violation level and
// yields an `EscalationAction` with the timeout for that level.

use super::moderation_models::EscalationAction;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct ViolationTracker {
    recent: VecDeque<Instant>,
    /// Only ever goes up; the tracker is dropped entirely instead of resetting it.
    violation_level: u32,
}

impl ViolationTracker {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.recent.front() {
            if now.saturating_duration_since(oldest) > window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }
}

pub struct SpamTracker {
    // (guild_id, user_id) -> tracker
    trackers: DashMap<(u64, u64), ViolationTracker>,
    window: Duration,
    threshold: usize,
    tiers: Vec<Duration>,
}

impl SpamTracker {
    pub fn new(window: Duration, threshold: usize, tiers: Vec<Duration>) -> Self {
        Self {
            trackers: DashMap::new(),
            window,
            threshold: threshold.max(1),
            tiers,
        }
    }

    /// Record a deleted message. Returns an escalation when this one crosses the threshold.
    pub fn record(&self, guild_id: u64, user_id: u64, pattern: &str) -> Option<EscalationAction> {
        self.record_at(guild_id, user_id, pattern, Instant::now())
    }

    pub fn record_at(
        &self,
        guild_id: u64,
        user_id: u64,
        pattern: &str,
        now: Instant,
    ) -> Option<EscalationAction> {
        let mut tracker = self.trackers.entry((guild_id, user_id)).or_default();

        tracker.recent.push_back(now);
        tracker.prune(now, self.window);

        if tracker.recent.len() < self.threshold {
            return None;
        }

        tracker.recent.clear();
        tracker.violation_level += 1;
        let level = tracker.violation_level;

        Some(EscalationAction {
            guild_id,
            user_id,
            violation_level: level,
            timeout: self.timeout_for_level(level),
            pattern: pattern.to_string(),
        })
    }

    /// Timeout for a 1-based violation level; levels past the table reuse the last tier.
    pub fn timeout_for_level(&self, level: u32) -> Duration {
        let index = (level.max(1) - 1) as usize;
        self.tiers
            .get(index)
            .or_else(|| self.tiers.last())
            .copied()
            .unwrap_or_default()
    }

    #[allow(dead_code)]
    pub fn violation_level(&self, guild_id: u64, user_id: u64) -> u32 {
        self.trackers
            .get(&(guild_id, user_id))
            .map(|t| t.violation_level)
            .unwrap_or(0)
    }

    /// Drop members with no recent activity and no violation history.
    pub fn evict_idle_at(&self, now: Instant) -> usize {
        let before = self.trackers.len();
        self.trackers.retain(|_, tracker| {
            tracker.prune(now, self.window);
            !(tracker.recent.is_empty() && tracker.violation_level == 0)
        });
        before - self.trackers.len()
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.trackers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SpamTracker {
        SpamTracker::new(
            Duration::from_millis(3000),
            5,
            vec![
                Duration::from_secs(30),
                Duration::from_secs(300),
                Duration::from_secs(3600),
            ],
        )
    }

    fn burst(tracker: &SpamTracker, start: Instant, count: u64) -> Vec<Option<EscalationAction>> {
        (0..count)
            .map(|i| tracker.record_at(1, 2, "pat", start + Duration::from_millis(i * 100)))
            .collect()
    }

    #[test]
    fn test_fifth_violation_escalates() {
        let tracker = tracker();
        let now = Instant::now();

        let results = burst(&tracker, now, 5);
        assert!(results[..4].iter().all(Option::is_none));

        let action = results[4].clone().unwrap();
        assert_eq!(action.violation_level, 1);
        assert_eq!(action.timeout, Duration::from_secs(30));
        assert_eq!(action.pattern, "pat");
    }

    #[test]
    fn test_window_clears_after_escalation() {
        let tracker = tracker();
        let now = Instant::now();

        burst(&tracker, now, 5);
        assert!(tracker
            .record_at(1, 2, "pat", now + Duration::from_millis(600))
            .is_none());
    }

    #[test]
    fn test_second_burst_uses_second_tier() {
        let tracker = tracker();
        let now = Instant::now();

        burst(&tracker, now, 5);
        let second = burst(&tracker, now + Duration::from_secs(1), 5);
        let action = second[4].clone().unwrap();

        assert_eq!(action.violation_level, 2);
        assert_eq!(action.timeout, Duration::from_secs(300));
        assert_eq!(tracker.violation_level(1, 2), 2);
    }

    #[test]
    fn test_tiers_saturate_at_last() {
        let tracker = tracker();
        assert_eq!(tracker.timeout_for_level(3), Duration::from_secs(3600));
        assert_eq!(tracker.timeout_for_level(9), Duration::from_secs(3600));
    }

    #[test]
    fn test_slow_violations_never_escalate() {
        let tracker = tracker();
        let now = Instant::now();

        for i in 0..10 {
            let at = now + Duration::from_millis(i * 1000);
            assert!(tracker.record_at(1, 2, "pat", at).is_none());
        }
    }

    #[test]
    fn test_reaper_keeps_repeat_offenders() {
        let tracker = tracker();
        let now = Instant::now();

        burst(&tracker, now, 5); // user 2 now has level 1
        tracker.record_at(1, 3, "pat", now); // user 3 has history but no level

        let later = now + Duration::from_secs(10);
        assert_eq!(tracker.evict_idle_at(later), 1);
        assert_eq!(tracker.violation_level(1, 2), 1);
        assert_eq!(tracker.len(), 1);
    }
}
