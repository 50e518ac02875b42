//! Configuration for daily reconciliation

use ledger_core::Cents;
use serde::{Deserialize, Serialize};

/// Reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Largest |declared cash - expected cash| that is not flagged
    pub tolerance_cents: Cents,

    /// Offset of the business timezone from UTC, in minutes (Lima is -300)
    pub utc_offset_minutes: i32,

    /// Seconds between auto-open sweeps
    pub auto_open_interval_secs: u64,

    /// Allow approving a report whose cash is outside tolerance
    pub approve_with_discrepancy: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "reconciliation".to_string(),
            tolerance_cents: 50,
            utc_offset_minutes: -300,
            auto_open_interval_secs: 300,
            approve_with_discrepancy: false,
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

        if let Some(v) = env_parse("RECON_TOLERANCE_CENTS")? {
            config.tolerance_cents = v;
        }
        if let Some(v) = env_parse("RECON_UTC_OFFSET_MINUTES")? {
            config.utc_offset_minutes = v;
        }
        if let Some(v) = env_parse("RECON_AUTO_OPEN_INTERVAL_SECS")? {
            config.auto_open_interval_secs = v;
        }
        if let Some(v) = env_parse("RECON_APPROVE_WITH_DISCREPANCY")? {
            config.approve_with_discrepancy = v;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.tolerance_cents < 0 {
            return Err(crate::Error::Config("tolerance_cents must not be negative".to_string()));
        }
        if self.auto_open_interval_secs == 0 {
            return Err(crate::Error::Config(
                "auto_open_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T>(name: &str) -> crate::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| crate::Error::Config(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}
