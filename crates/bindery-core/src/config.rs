//! Build configuration

use serde::{Deserialize, Serialize};

/// Limits and switches for one graph build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Maximum resolution path and construction stack depth
    pub max_depth: usize,
    /// Maximum number of explicit bindings
    pub max_bindings: usize,
    /// Disable just-in-time synthesis
    pub require_explicit_bindings: bool,
    /// Let deferred edges close cycles
    pub allow_deferred_cycles: bool,
    /// Override the stage's choice of eager singleton creation
    pub eager_singletons: Option<bool>,
}

impl BuildConfig {
    /// Default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML; unknown fields are rejected
    pub fn from_toml_str(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// With maximum depth
    #[inline]
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// With maximum binding count
    #[inline]
    #[must_use]
    pub fn with_max_bindings(mut self, max: usize) -> Self {
        self.max_bindings = max;
        self
    }

    /// With just-in-time synthesis disabled or enabled
    #[inline]
    #[must_use]
    pub fn with_require_explicit_bindings(mut self, required: bool) -> Self {
        self.require_explicit_bindings = required;
        self
    }

    /// With deferred cycle breaking allowed or not
    #[inline]
    #[must_use]
    pub fn with_allow_deferred_cycles(mut self, allowed: bool) -> Self {
        self.allow_deferred_cycles = allowed;
        self
    }

    /// With eager singleton creation forced on or off
    #[inline]
    #[must_use]
    pub fn with_eager_singletons(mut self, eager: bool) -> Self {
        self.eager_singletons = Some(eager);
        self
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_depth: 128,
            max_bindings: 100_000,
            require_explicit_bindings: false,
            allow_deferred_cycles: true,
            eager_singletons: None,
        }
    }
}
