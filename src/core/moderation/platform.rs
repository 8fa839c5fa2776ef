// Ports to the outside world: the chat platform and the feature-flag service.
//
// The core only ever talks to these traits; `discord/moderation/platform.rs`
// implements `ModerationPlatform` with serenity.

use super::moderation_models::InboundMessage;
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    /// Usually a role-hierarchy conflict or a missing permission
    #[error("Missing permissions: {0}")]
    MissingPermissions(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Platform request failed: {0}")]
    Request(String),
}

/// Permission bundles the engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Delete other members' messages
    ManageMessages,
    /// Staff: manage-guild or administrator
    ManageGuild,
}

#[async_trait]
pub trait ModerationPlatform: Send + Sync {
    /// Whether the bot itself holds `capability` in the guild.
    async fn has_capability(&self, guild_id: u64, capability: Capability) -> bool;

    async fn delete_message(&self, message: &InboundMessage) -> Result<(), PlatformError>;

    async fn timeout_member(
        &self,
        guild_id: u64,
        user_id: u64,
        duration: Duration,
        reason: &str,
    ) -> Result<(), PlatformError>;

    async fn send_direct_message(&self, user_id: u64, text: &str) -> Result<(), PlatformError>;

    /// Members holding `capability`. Implementations may answer from a cache
    /// and fall back to a small member fetch.
    async fn list_members_with_capability(
        &self,
        guild_id: u64,
        capability: Capability,
    ) -> Result<HashSet<u64>, PlatformError>;

    /// The bot's own user id. Never a staff-notification recipient.
    fn current_user_id(&self) -> u64;

    async fn fetch_owner(&self, guild_id: u64) -> Result<u64, PlatformError>;
}

/// Global on/off switches, polled per message.
pub trait FeatureFlags: Send + Sync {
    fn is_enabled(&self, flag: &str) -> bool;
}
