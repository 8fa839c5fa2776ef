// Core moderation module - word filters, escalation and staff notification.
// Following the same pattern as the other core modules: models + ports + services.

pub mod confusable;
pub mod escalation;
pub mod filter_cache;
pub mod filter_service;
pub mod filter_store;
pub mod moderation_models;
pub mod moderation_service;
pub mod notifications;
pub mod platform;
pub mod rate_limiter;

pub use filter_service::*;
pub use filter_store::*;
pub use moderation_models::*;
pub use moderation_service::*;
pub use platform::*;
