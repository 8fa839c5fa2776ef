use crate::core::moderation::FeatureFlags;
use dashmap::DashSet;

/// Feature flags backed by the environment.
///
/// Every flag is on unless named in `DISABLED_FEATURES` (comma-separated).
/// Flags can also be flipped at runtime.
pub struct EnvFeatureFlags {
    disabled: DashSet<String>,
}

impl EnvFeatureFlags {
    pub fn from_env() -> Self {
        Self::from_list(&std::env::var("DISABLED_FEATURES").unwrap_or_default())
    }

    pub fn from_list(list: &str) -> Self {
        let disabled = DashSet::new();
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            disabled.insert(name.to_string());
        }
        Self { disabled }
    }

    #[allow(dead_code)]
    pub fn set_enabled(&self, flag: &str, enabled: bool) {
        if enabled {
            self.disabled.remove(flag);
        } else {
            self.disabled.insert(flag.to_string());
        }
    }
}

impl FeatureFlags for EnvFeatureFlags {
    fn is_enabled(&self, flag: &str) -> bool {
        !self.disabled.contains(flag)
    }
}
