// Word filter slash commands for server staff.
//
// Every reply is ephemeral: filter contents are only ever shown to the
// administrator who asked.

use crate::core::moderation::{normalize_word, FilterError, ImportMode, ImportReport};
use crate::discord::{Data, Error};
use poise::serenity_prelude as serenity;

type Context<'a> = poise::Context<'a, Data, Error>;

/// Budget for one embed field; Discord's hard cap is 1024.
const FIELD_BUDGET: usize = 1000;
const FIELD_CUT: usize = 980;

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum ImportModeChoice {
    #[name = "words"]
    Words,
    #[name = "regex"]
    Regex,
}

impl From<ImportModeChoice> for ImportMode {
    fn from(value: ImportModeChoice) -> Self {
        match value {
            ImportModeChoice::Words => ImportMode::Words,
            ImportModeChoice::Regex => ImportMode::Regex,
        }
    }
}

/// Word filter configuration commands.
///
/// Manage the blocked words and regex patterns for this server.
#[poise::command(
    slash_command,
    subcommands(
        "add_word",
        "remove_word",
        "add_regex",
        "remove_regex",
        "list",
        "auto_regex",
        "import",
        "baseline",
        "clear_all"
    ),
    required_permissions = "MANAGE_GUILD",
    guild_only
)]
pub async fn filters(_ctx: Context<'_>) -> Result<(), Error> {
    // Parent command - only the subcommands do anything
    Ok(())
}

/// Block a word or phrase.
#[poise::command(
    slash_command,
    guild_only,
    rename = "add-word",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn add_word(
    ctx: Context<'_>,
    #[description = "Word or phrase to block"] value: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    let result = ctx.data().filters.add_word(guild_id.get(), &value).await;
    let word = normalize_word(&value);
    respond(ctx, result, |added| {
        if added {
            format!("✅ Added blocked word: `{}`", word)
        } else {
            format!("`{}` is already blocked.", word)
        }
    })
    .await
}

/// Unblock a word or phrase.
#[poise::command(
    slash_command,
    guild_only,
    rename = "remove-word",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn remove_word(
    ctx: Context<'_>,
    #[description = "Word or phrase to unblock"] value: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    let result = ctx.data().filters.remove_word(guild_id.get(), &value).await;
    let word = normalize_word(&value);
    respond(ctx, result, |removed| {
        if removed {
            format!("✅ Removed blocked word: `{}`", word)
        } else {
            format!("`{}` was not blocked.", word)
        }
    })
    .await
}

/// Block a raw regex pattern.
#[poise::command(
    slash_command,
    guild_only,
    rename = "add-regex",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn add_regex(
    ctx: Context<'_>,
    #[description = "Regex pattern (matched case-insensitively)"] pattern: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    let result = ctx.data().filters.add_pattern(guild_id.get(), &pattern).await;
    respond(ctx, result, |added| {
        if added {
            format!("✅ Added blocked regex: `{}`", pattern.trim())
        } else {
            format!("`{}` is already blocked.", pattern.trim())
        }
    })
    .await
}

/// Remove a regex pattern.
#[poise::command(
    slash_command,
    guild_only,
    rename = "remove-regex",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn remove_regex(
    ctx: Context<'_>,
    #[description = "Exact pattern to remove"] pattern: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    let result = ctx
        .data()
        .filters
        .remove_pattern(guild_id.get(), &pattern)
        .await;
    respond(ctx, result, |removed| {
        if removed {
            format!("✅ Removed blocked regex: `{}`", pattern.trim())
        } else {
            format!("`{}` was not in the list.", pattern.trim())
        }
    })
    .await
}

/// Show the current words and patterns.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    let config = match ctx.data().filters.list(guild_id.get()).await {
        Ok(config) => config,
        Err(e) => return reply(ctx, failure_message(guild_id.get(), &e)).await,
    };

    let embed = serenity::CreateEmbed::new()
        .title("Current Filters")
        .color(0xFF0000)
        .field(
            format!("Words/Phrases ({})", config.words.len()),
            format_list(&config.words, "words"),
            true,
        )
        .field(
            format!("Regex ({})", config.regex_patterns.len()),
            format_list(&config.regex_patterns, "regex patterns"),
            true,
        )
        .footer(serenity::CreateEmbedFooter::new(format!(
            "Auto-regex: {}",
            if config.auto_regex_enabled { "on" } else { "off" }
        )));

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Turn look-alike pattern generation for new words on or off.
#[poise::command(
    slash_command,
    guild_only,
    rename = "auto-regex",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn auto_regex(
    ctx: Context<'_>,
    #[description = "Generate patterns for new words"] enabled: bool,
    #[description = "Also generate patterns for existing words (default: false)"] backfill: Option<
        bool,
    >,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let backfill = backfill.unwrap_or(false);

    let result = ctx
        .data()
        .filters
        .set_auto_regex(guild_id.get(), enabled, backfill)
        .await;
    respond(ctx, result, |added| {
        let state = if enabled { "enabled" } else { "disabled" };
        if enabled && backfill {
            format!("✅ Auto-regex {}. Backfilled {} pattern(s).", state, added)
        } else {
            format!("✅ Auto-regex {}.", state)
        }
    })
    .await
}

/// Import words or patterns from a text file, one per line.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn import(
    ctx: Context<'_>,
    #[description = "Text file, one entry per line (max 512KB)"] file: serenity::Attachment,
    #[description = "How to read each line (default: words)"] mode: Option<ImportModeChoice>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let max_bytes = ctx.data().moderation.config().max_import_bytes;

    if file.size as usize > max_bytes {
        return reply(ctx, "❌ Provide a text file ≤ 512KB.").await;
    }

    // Downloading can take a moment
    ctx.defer_ephemeral().await?;

    let bytes = file.download().await?;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(_) => return reply(ctx, "❌ The file must be UTF-8 text.").await,
    };

    let mode: ImportMode = mode.unwrap_or(ImportModeChoice::Words).into();
    let result = ctx.data().filters.import(guild_id.get(), &text, mode).await;
    respond(ctx, result, |report| import_summary(&report, mode)).await
}

/// Load or remove the built-in baseline word list.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn baseline(
    ctx: Context<'_>,
    #[description = "true to load the list, false to remove it"] enabled: bool,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    let result = ctx
        .data()
        .filters
        .set_baseline(guild_id.get(), enabled)
        .await;
    respond(ctx, result, |changed| {
        if enabled {
            format!("✅ Baseline loaded: {} word(s) added (up to the 2k cap).", changed)
        } else {
            format!("✅ Baseline removed: {} word(s) dropped.", changed)
        }
    })
    .await
}

/// Remove every word and pattern for this server.
#[poise::command(
    slash_command,
    guild_only,
    rename = "clear-all",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn clear_all(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    let result = ctx.data().filters.clear_all(guild_id.get()).await;
    respond(ctx, result, |_| {
        "🧹 Cleared all filters for this server.".to_string()
    })
    .await
}

// ============================================================================
// HELPERS
// ============================================================================

async fn reply(ctx: Context<'_>, content: impl Into<String>) -> Result<(), Error> {
    ctx.send(
        poise::CreateReply::default()
            .content(content)
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Reply with `on_ok`'s text, or with the error if the mutation was rejected.
async fn respond<T>(
    ctx: Context<'_>,
    result: Result<T, FilterError>,
    on_ok: impl FnOnce(T) -> String,
) -> Result<(), Error> {
    let content = match result {
        Ok(value) => on_ok(value),
        Err(e) => {
            let guild_id = ctx.guild_id().map(|id| id.get()).unwrap_or_default();
            failure_message(guild_id, &e)
        }
    };
    reply(ctx, content).await
}

fn failure_message(guild_id: u64, error: &FilterError) -> String {
    match error {
        FilterError::StorageError(_) => {
            tracing::error!(guild_id, "Filter command failed: {}", error);
            "❌ Could not save the filter settings. Try again later.".to_string()
        }
        _ => format!("❌ {}", error),
    }
}

/// Render a list for an embed field, cut to fit the field budget.
fn format_list(items: &[String], label: &str) -> String {
    if items.is_empty() {
        return "None set".to_string();
    }

    let body = items.join("\n");
    if body.chars().count() <= FIELD_BUDGET {
        return body;
    }

    let cut: String = body.chars().take(FIELD_CUT).collect();
    format!("{}...\n(+{} total {})", cut, items.len(), label)
}

fn import_summary(report: &ImportReport, mode: ImportMode) -> String {
    let kind = match mode {
        ImportMode::Words => "word",
        ImportMode::Regex => "regex",
    };

    let mut summary = format!("✅ Imported {} {} entries", report.added, kind);
    if report.skipped > 0 {
        summary.push_str(&format!(", skipped {}", report.skipped));
    }
    if report.truncated {
        summary.push_str(" (truncated to 500)");
    }
    summary.push('.');
    summary
}
