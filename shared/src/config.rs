use serde::Deserialize;

fn default_per_page() -> u64 {
    25
}

fn default_max_per_page() -> u64 {
    500
}

fn default_max_expand_depth() -> usize {
    5
}

fn default_eager_graph_validation() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_per_page")]
    pub default_per_page: u64,
    #[serde(default = "default_max_per_page")]
    pub max_per_page: u64,
    /// Maximum number of relationship hops in a single expand path.
    #[serde(default = "default_max_expand_depth")]
    pub max_expand_depth: usize,
    #[serde(default = "default_eager_graph_validation")]
    pub eager_graph_validation: bool,
    /// Record input/output snapshots for every state in the packet history.
    #[serde(default)]
    pub debug_trace: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_per_page: default_per_page(),
            max_per_page: default_max_per_page(),
            max_expand_depth: default_max_expand_depth(),
            eager_graph_validation: default_eager_graph_validation(),
            debug_trace: false,
        }
    }
}

impl Settings {
    /// Loads settings from `ENGINE_*` environment variables.
    pub fn new() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("ENGINE").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[serial]
    #[test]
    fn defaults_without_environment() {
        std::env::remove_var("ENGINE_DEFAULT_PER_PAGE");
        std::env::remove_var("ENGINE_DEBUG_TRACE");
        let settings = Settings::new().unwrap();
        assert_eq!(settings.default_per_page, 25);
        assert_eq!(settings.max_expand_depth, 5);
        assert!(settings.eager_graph_validation);
        assert!(!settings.debug_trace);
    }

    #[serial]
    #[test]
    fn environment_overrides() {
        std::env::set_var("ENGINE_DEFAULT_PER_PAGE", "10");
        std::env::set_var("ENGINE_DEBUG_TRACE", "true");
        let settings = Settings::new().unwrap();
        std::env::remove_var("ENGINE_DEFAULT_PER_PAGE");
        std::env::remove_var("ENGINE_DEBUG_TRACE");
        assert_eq!(settings.default_per_page, 10);
        assert!(settings.debug_trace);
    }
}
