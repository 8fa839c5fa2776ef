// Discord-specific word filter hook - translates gateway messages into the
// core's `InboundMessage` and runs them through the moderation pipeline.

use super::platform::SerenityPlatform;
use crate::core::moderation::{InboundMessage, ModerationOutcome};
use crate::discord::Data;
use poise::serenity_prelude as serenity;

/// Run a freshly created message through the word filter.
///
/// Never fails; everything that goes wrong downstream is logged and folded
/// into the returned outcome.
pub async fn handle_message_for_filters(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    data: &Data,
) -> ModerationOutcome {
    let inbound = to_inbound(ctx, msg);
    let platform = SerenityPlatform::new(ctx, data.moderation.config().moderator_fetch_limit);

    data.moderation.handle_message(&platform, &inbound).await
}

fn to_inbound(ctx: &serenity::Context, msg: &serenity::Message) -> InboundMessage {
    // Only used for the staff summary, so a cache miss is fine. The guild
    // ref is a cache lock guard; keep it inside this block.
    let channel_name = {
        msg.guild(&ctx.cache)
            .and_then(|guild| lookup_channel_name(&guild, msg.channel_id))
    };

    InboundMessage {
        guild_id: msg.guild_id.map(|id| id.get()),
        channel_id: msg.channel_id.get(),
        channel_name,
        message_id: msg.id.get(),
        author_id: msg.author.id.get(),
        author_tag: msg.author.tag(),
        author_is_bot: msg.author.bot,
        content: msg.content.clone(),
    }
}

/// Name of a channel or active thread in `guild`.
fn lookup_channel_name(
    guild: &serenity::Guild,
    channel_id: serenity::ChannelId,
) -> Option<String> {
    guild
        .channels
        .get(&channel_id)
        .or_else(|| guild.threads.iter().find(|thread| thread.id == channel_id))
        .map(|channel| channel.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named_channel(id: u64, name: &str) -> serenity::GuildChannel {
        let mut channel = serenity::GuildChannel::default();
        channel.id = serenity::ChannelId::new(id);
        channel.name = name.to_string();
        channel
    }

    #[test]
    fn test_channel_name_from_guild_cache() {
        let mut guild = serenity::Guild::default();
        guild
            .channels
            .insert(serenity::ChannelId::new(5), named_channel(5, "general"));
        guild.threads.push(named_channel(6, "help-thread"));

        assert_eq!(
            lookup_channel_name(&guild, serenity::ChannelId::new(5)).as_deref(),
            Some("general")
        );
        assert_eq!(
            lookup_channel_name(&guild, serenity::ChannelId::new(6)).as_deref(),
            Some("help-thread")
        );
        assert_eq!(lookup_channel_name(&guild, serenity::ChannelId::new(7)), None);
    }
}
