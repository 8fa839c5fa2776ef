// This is the entry point of the word filter bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (databases, feature flags)
// - `discord/` = Discord-specific adapters (commands, events)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands, the message hook and the background reaper

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::moderation::{
    FilterService, ModerationConfig, ModerationOutcome, ModerationService,
};
use crate::discord::moderation::handle_message_for_filters;
use crate::discord::{Data, Error, FilterStore};
use crate::infra::moderation::{EnvFeatureFlags, JsonFilterStore, SqliteFilterStore};
use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Event handler for non-command Discord events.
/// Every new message goes through the word filter.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let serenity::FullEvent::Message { new_message } = event {
        let outcome = handle_message_for_filters(ctx, new_message, data).await;
        if outcome != ModerationOutcome::NoAction {
            tracing::debug!(
                message_id = new_message.id.get(),
                ?outcome,
                "Word filter acted on message"
            );
        }
    }

    Ok(())
}

/// Pick the filter store from `FILTER_STORE_BACKEND` / `FILTER_STORE_PATH`.
async fn filter_store_from_env(data_dir: &str) -> anyhow::Result<FilterStore> {
    let backend = std::env::var("FILTER_STORE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());
    let path = std::env::var("FILTER_STORE_PATH").ok();

    match backend.trim().to_lowercase().as_str() {
        "json" => {
            let path = path.unwrap_or_else(|| format!("{}/moderation_filters.json", data_dir));
            tracing::info!(%path, "Using JSON filter store");
            Ok(Box::new(JsonFilterStore::new(&path).await))
        }
        "sqlite" => {
            let path = path.unwrap_or_else(|| format!("{}/moderation_filters.db", data_dir));
            tracing::info!(%path, "Using SQLite filter store");
            let store = SqliteFilterStore::new(&path)
                .await
                .context("Failed to open the SQLite filter store")?;
            Ok(Box::new(store))
        }
        other => anyhow::bail!(
            "Unknown FILTER_STORE_BACKEND '{}' (expected sqlite or json)",
            other
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let token = std::env::var("DISCORD_TOKEN").context(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    )?;

    // Keep runtime data in a dedicated folder so the repo root stays tidy.
    let data_dir = "data";
    std::fs::create_dir_all(data_dir).context("Failed to create data directory")?;

    // ========================================================================
    // SERVICES
    // ========================================================================

    let config = ModerationConfig::default();
    let store = filter_store_from_env(data_dir).await?;
    let flags = Arc::new(EnvFeatureFlags::from_env());

    let filters = Arc::new(FilterService::new(store, config.clone()));
    let moderation = Arc::new(ModerationService::new(
        Arc::clone(&filters),
        flags,
        config,
    ));

    let data = Data {
        filters,
        moderation,
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS; // Moderator lookups from the cache

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![discord::moderation::commands::filters()],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                tracing::info!("Bot is starting up...");

                // Register slash commands globally (can take up to an hour to propagate)
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                tracing::info!("Commands registered");

                // Hourly sweep of idle limiter, tracker, throttle and cache entries.
                let moderation = Arc::clone(&data.moderation);
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(moderation.config().reaper_interval);
                    // The first tick completes immediately.
                    ticker.tick().await;

                    loop {
                        ticker.tick().await;
                        let stats = moderation.reap();
                        tracing::info!(
                            rate_limits = stats.rate_limits,
                            spam_trackers = stats.spam_trackers,
                            notification_throttles = stats.notification_throttles,
                            moderator_directories = stats.moderator_directories,
                            filter_sets = stats.filter_sets,
                            "Reaper sweep removed {} idle entries",
                            stats.total()
                        );
                    }
                });

                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .context("Error creating client")?;

    client.start().await.context("Error running bot")?;
    Ok(())
}
