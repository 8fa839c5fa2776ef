// Discord layer - commands and event handlers.

#[path = "moderation/mod.rs"]
pub mod moderation;

use crate::core::moderation::{FilterConfigStore, FilterService, ModerationService};
use std::sync::Arc;

/// Store backend chosen at startup (SQLite or JSON).
pub type FilterStore = Box<dyn FilterConfigStore>;

/// Shared state handed to every command and event.
pub struct Data {
    pub filters: Arc<FilterService<FilterStore>>,
    pub moderation: Arc<ModerationService<FilterStore>>,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
