//! Engine configuration.
//!
//! Defaults cover everything; environment variables or a JSON document can
//! override individual values.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use concierge_auth::Collections;
use concierge_session::GateRoutes;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub collections: Collections,
    pub routes: GateRoutes,
}

impl EngineConfig {
    /// Load configuration from `CONCIERGE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        let overrides: [(&str, &mut String); 6] = [
            ("CONCIERGE_ALLOWLIST_COLLECTION", &mut config.collections.allowlist),
            ("CONCIERGE_PROFILES_COLLECTION", &mut config.collections.profiles),
            ("CONCIERGE_TENANTS_COLLECTION", &mut config.collections.tenants),
            ("CONCIERGE_SIGN_IN_PATH", &mut config.routes.sign_in),
            ("CONCIERGE_TENANT_SELECTION_PATH", &mut config.routes.tenant_selection),
            ("CONCIERGE_ROLE_FALLBACK_PATH", &mut config.routes.role_fallback),
        ];

        for (key, slot) in overrides {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                debug!(key, value = %value, "config override");
                *slot = value;
            }
        }

        config
    }

    /// Parse a JSON document; missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid engine configuration")
    }
}
