// Implementations of the moderation ports: two interchangeable filter stores
// and the environment-backed feature flags.

pub mod feature_flags;
pub mod json_filter_store;
pub mod sqlite_filter_store;

pub use feature_flags::EnvFeatureFlags;
pub use json_filter_store::JsonFilterStore;
pub use sqlite_filter_store::SqliteFilterStore;
