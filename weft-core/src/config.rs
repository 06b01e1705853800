//! Runtime configuration.

use serde::Deserialize;

/// Default bound on how many times one instance may render in a single tick.
pub const DEFAULT_MAX_NESTED_UPDATES: usize = 25;

/// Tunables for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How many renders of the same instance one `flush` tolerates before
    /// aborting with `TooManyUpdates`.
    pub max_nested_updates: usize,

    /// Emit a `trace` event for every render pass.
    pub trace_renders: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_nested_updates: DEFAULT_MAX_NESTED_UPDATES,
            trace_renders: false,
        }
    }
}

impl RuntimeConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_max_nested_updates(mut self, limit: usize) -> Self {
        self.max_nested_updates = limit;
        self
    }

    pub fn with_trace_renders(mut self, enabled: bool) -> Self {
        self.trace_renders = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_nested_updates, 25);
        assert!(!config.trace_renders);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = RuntimeConfig::from_json(r#"{ "trace_renders": true }"#).unwrap();
        assert_eq!(config.max_nested_updates, DEFAULT_MAX_NESTED_UPDATES);
        assert!(config.trace_renders);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(RuntimeConfig::from_json("{ max_nested_updates: ").is_err());
    }
}
