use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub resolution: ResolutionConfig,
    pub rebuild: RebuildConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Definition id searched when a machine has no machine-specific
    /// qualities of its own.
    pub generic_definition_id: String,
    /// Quality type preferred when the active one becomes unavailable.
    pub preferred_quality_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildConfig {
    /// Quiet period after the last catalog change before the lookup tree is
    /// rebuilt.
    pub debounce_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            resolution: ResolutionConfig::default(),
            rebuild: RebuildConfig::default(),
        }
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            generic_definition_id: "fdmprinter".to_string(),
            preferred_quality_type: Some("normal".to_string()),
        }
    }
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self { debounce_ms: 300 }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and config file
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        // Add default configuration
        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        // Add config file if it exists
        config = config.add_source(config::File::with_name("config").required(false));

        // Add environment variables with prefix "PRESET_"
        config = config.add_source(
            config::Environment::with_prefix("PRESET")
                .separator("_")
                .prefix_separator("_"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.rebuild.debounce_ms)
    }
}
