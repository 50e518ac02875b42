//! Configuration for settlement

use serde::{Deserialize, Serialize};

/// Settlement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Offset of the business timezone from UTC, in minutes (Lima is -300)
    pub utc_offset_minutes: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "settlement".to_string(),
            utc_offset_minutes: -300,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(offset) = std::env::var("SETTLEMENT_UTC_OFFSET_MINUTES") {
            config.utc_offset_minutes = offset.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid SETTLEMENT_UTC_OFFSET_MINUTES: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(crate::Error::Config(format!(
                "UTC offset {} minutes out of range",
                self.utc_offset_minutes
            )));
        }
        Ok(())
    }
}
