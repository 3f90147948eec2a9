//! User-Agent selection.
//!
//! Every request carries the tool's own User-Agent unless the target host
//! has an override (some trailer hosts only serve media players).

use std::collections::HashMap;

const PROJECT_UA_URL: &str = "https://github.com/fierce/automate";

/// Overrides every installation starts with.
pub const BUILTIN_USER_AGENT_OVERRIDES: &[(&str, &str)] = &[("trailers.apple.com", "QuickTime")];

/// Default User-Agent identifying the tool.
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("automate/{version} (+{PROJECT_UA_URL})")
}

/// Per-host User-Agent overrides, matched on the exact host name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAgentOverrides {
    by_host: HashMap<String, String>,
}

impl UserAgentOverrides {
    /// Overrides seeded with [`BUILTIN_USER_AGENT_OVERRIDES`].
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut overrides = Self::default();
        for (host, value) in BUILTIN_USER_AGENT_OVERRIDES {
            overrides.insert(host, value);
        }
        overrides
    }

    /// Adds or replaces the override for `host`.
    pub fn insert(&mut self, host: &str, value: &str) {
        self.by_host
            .insert(host.trim().to_ascii_lowercase(), value.to_string());
    }

    #[must_use]
    pub fn for_host(&self, host: &str) -> Option<&str> {
        self.by_host
            .get(&host.to_ascii_lowercase())
            .map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_host.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty()
    }
}
