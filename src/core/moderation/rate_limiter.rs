// Per-guild deletion budget so a coordinated flood can't push us past the
// platform's own rate limits.

use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct DeletionBudget {
    window_start: Instant,
    count: u32,
}

pub struct DeletionRateLimiter {
    budgets: DashMap<u64, DeletionBudget>,
    limit: u32,
    window: Duration,
}

impl DeletionRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            budgets: DashMap::new(),
            limit,
            window,
        }
    }

    /// Take one deletion from the guild's budget. Returns `false` when the budget is spent.
    pub fn try_consume(&self, guild_id: u64) -> bool {
        self.try_consume_at(guild_id, Instant::now())
    }

    pub fn try_consume_at(&self, guild_id: u64, now: Instant) -> bool {
        // The entry guard is held for the whole check-then-increment.
        let mut budget = self.budgets.entry(guild_id).or_insert(DeletionBudget {
            window_start: now,
            count: 0,
        });

        if now.saturating_duration_since(budget.window_start) > self.window {
            *budget = DeletionBudget {
                window_start: now,
                count: 0,
            };
        }

        if budget.count >= self.limit {
            tracing::info!(
                guild_id,
                limit = self.limit,
                "Deletion budget exhausted, leaving matched message in place"
            );
            return false;
        }

        budget.count += 1;
        true
    }

    /// Drop budgets whose window opened more than `max_age` ago.
    pub fn evict_idle_at(&self, now: Instant, max_age: Duration) -> usize {
        let before = self.budgets.len();
        self.budgets
            .retain(|_, budget| now.saturating_duration_since(budget.window_start) <= max_age);
        before - self.budgets.len()
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.budgets.len()
    }
}
