// Serenity-backed implementation of the moderation platform port.
//
// Built per event from the serenity context. Permission checks read the
// gateway cache first and only hit HTTP when the guild is not cached.

use crate::core::moderation::{Capability, InboundMessage, ModerationPlatform, PlatformError};
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

pub struct SerenityPlatform {
    http: Arc<serenity::Http>,
    cache: Arc<serenity::Cache>,
    member_fetch_limit: u64,
}

impl SerenityPlatform {
    pub fn new(ctx: &serenity::Context, member_fetch_limit: u64) -> Self {
        Self {
            http: Arc::clone(&ctx.http),
            cache: Arc::clone(&ctx.cache),
            member_fetch_limit,
        }
    }

    /// Bot permissions from the cache, if the guild and our member are cached.
    fn cached_bot_permissions(&self, guild_id: serenity::GuildId) -> Option<serenity::Permissions> {
        let bot_id = self.cache.current_user().id;
        let guild = self.cache.guild(guild_id)?;
        let member = guild.members.get(&bot_id)?;
        Some(member_permissions(
            guild_id,
            guild.owner_id,
            &guild.roles,
            bot_id,
            &member.roles,
        ))
    }

    async fn fetched_bot_permissions(
        &self,
        guild_id: serenity::GuildId,
    ) -> Result<serenity::Permissions, PlatformError> {
        let bot_id = self.cache.current_user().id;
        let guild = self
            .http
            .get_guild(guild_id)
            .await
            .map_err(platform_error)?;
        let member = self
            .http
            .get_member(guild_id, bot_id)
            .await
            .map_err(platform_error)?;

        Ok(member_permissions(
            guild_id,
            guild.owner_id,
            &guild.roles,
            bot_id,
            &member.roles,
        ))
    }
}

#[async_trait]
impl ModerationPlatform for SerenityPlatform {
    async fn has_capability(&self, guild_id: u64, capability: Capability) -> bool {
        let guild_id = serenity::GuildId::new(guild_id);

        let permissions = match self.cached_bot_permissions(guild_id) {
            Some(permissions) => permissions,
            None => match self.fetched_bot_permissions(guild_id).await {
                Ok(permissions) => permissions,
                Err(e) => {
                    tracing::warn!(
                        guild_id = guild_id.get(),
                        "Could not resolve bot permissions: {}",
                        e
                    );
                    return false;
                }
            },
        };

        grants(permissions, capability)
    }

    async fn delete_message(&self, message: &InboundMessage) -> Result<(), PlatformError> {
        serenity::ChannelId::new(message.channel_id)
            .delete_message(&self.http, serenity::MessageId::new(message.message_id))
            .await
            .map_err(platform_error)
    }

    async fn timeout_member(
        &self,
        guild_id: u64,
        user_id: u64,
        duration: Duration,
        reason: &str,
    ) -> Result<(), PlatformError> {
        let until = serenity::Timestamp::from_unix_timestamp(
            chrono::Utc::now().timestamp() + duration.as_secs() as i64,
        )
        .map_err(|e| PlatformError::Request(format!("Invalid timeout timestamp: {}", e)))?;

        serenity::GuildId::new(guild_id)
            .edit_member(
                &self.http,
                serenity::UserId::new(user_id),
                serenity::EditMember::new()
                    .disable_communication_until_datetime(until)
                    .audit_log_reason(reason),
            )
            .await
            .map(|_| ())
            .map_err(platform_error)
    }

    async fn send_direct_message(&self, user_id: u64, text: &str) -> Result<(), PlatformError> {
        let channel = serenity::UserId::new(user_id)
            .create_dm_channel(&self.http)
            .await
            .map_err(platform_error)?;

        channel
            .id
            .say(&self.http, text)
            .await
            .map(|_| ())
            .map_err(platform_error)
    }

    async fn list_members_with_capability(
        &self,
        guild_id: u64,
        capability: Capability,
    ) -> Result<HashSet<u64>, PlatformError> {
        let guild_id = serenity::GuildId::new(guild_id);

        // Cache scan; the guild ref must be gone before the first await.
        let cached: Option<HashSet<u64>> = {
            match self.cache.guild(guild_id) {
                Some(guild) => Some(
                    guild
                        .members
                        .values()
                        .filter(|member| {
                            let permissions = member_permissions(
                                guild_id,
                                guild.owner_id,
                                &guild.roles,
                                member.user.id,
                                &member.roles,
                            );
                            grants(permissions, capability)
                        })
                        .map(|member| member.user.id.get())
                        .collect(),
                ),
                None => None,
            }
        };

        if let Some(members) = cached.filter(|members| !members.is_empty()) {
            return Ok(members);
        }

        let guild = self
            .http
            .get_guild(guild_id)
            .await
            .map_err(platform_error)?;
        let members = guild_id
            .members(
                &self.http,
                Some(self.member_fetch_limit),
                None::<serenity::UserId>,
            )
            .await
            .map_err(platform_error)?;

        Ok(members
            .iter()
            .filter(|member| {
                let permissions = member_permissions(
                    guild_id,
                    guild.owner_id,
                    &guild.roles,
                    member.user.id,
                    &member.roles,
                );
                grants(permissions, capability)
            })
            .map(|member| member.user.id.get())
            .collect())
    }

    fn current_user_id(&self) -> u64 {
        self.cache.current_user().id.get()
    }

    async fn fetch_owner(&self, guild_id: u64) -> Result<u64, PlatformError> {
        let guild_id = serenity::GuildId::new(guild_id);

        let cached = self.cache.guild(guild_id).map(|guild| guild.owner_id.get());
        if let Some(owner_id) = cached {
            return Ok(owner_id);
        }

        let guild = self
            .http
            .get_guild(guild_id)
            .await
            .map_err(platform_error)?;
        Ok(guild.owner_id.get())
    }
}

/// Sort serenity failures into the port's error kinds by HTTP status.
fn platform_error(error: serenity::Error) -> PlatformError {
    let status = match &error {
        serenity::Error::Http(http_error) => http_error.status_code().map(|s| s.as_u16()),
        _ => None,
    };

    match status {
        Some(403) => PlatformError::MissingPermissions(error.to_string()),
        Some(404) => PlatformError::NotFound(error.to_string()),
        _ => PlatformError::Request(error.to_string()),
    }
}

/// Guild-level permissions of one member: @everyone plus their roles.
fn member_permissions(
    guild_id: serenity::GuildId,
    owner_id: serenity::UserId,
    roles: &HashMap<serenity::RoleId, serenity::Role>,
    user_id: serenity::UserId,
    member_roles: &[serenity::RoleId],
) -> serenity::Permissions {
    // The @everyone role shares the guild's id.
    let everyone = roles
        .get(&serenity::RoleId::new(guild_id.get()))
        .map(|role| role.permissions)
        .unwrap_or_else(serenity::Permissions::empty);

    combine_permissions(
        user_id == owner_id,
        everyone,
        member_roles
            .iter()
            .filter_map(|id| roles.get(id))
            .map(|role| role.permissions),
    )
}

fn combine_permissions(
    is_owner: bool,
    everyone: serenity::Permissions,
    role_permissions: impl IntoIterator<Item = serenity::Permissions>,
) -> serenity::Permissions {
    if is_owner {
        return serenity::Permissions::all();
    }

    let combined = role_permissions
        .into_iter()
        .fold(everyone, |acc, permissions| acc | permissions);

    if combined.contains(serenity::Permissions::ADMINISTRATOR) {
        serenity::Permissions::all()
    } else {
        combined
    }
}

fn grants(permissions: serenity::Permissions, capability: Capability) -> bool {
    match capability {
        Capability::ManageMessages => permissions.contains(serenity::Permissions::MANAGE_MESSAGES),
        Capability::ManageGuild => permissions.contains(serenity::Permissions::MANAGE_GUILD),
    }
}
