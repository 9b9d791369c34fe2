//! File-backed network settings.
//!
//! A settings table names a preset and optionally overrides individual
//! fields, for example:
//!
//! ```toml
//! network = "goerli"
//! token = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
//! poll_interval_ms = 5000
//! ```

use crate::network::{NetworkConfig, NetworkConfigBuilder, NetworkType};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// Settings file could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Settings file is not valid TOML for [`NetworkSettings`]
    #[error("invalid network settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// Settings parsed but describe an unusable network
    #[error("invalid network settings: {0}")]
    Invalid(String),
}

/// Preset plus per-field overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Preset to start from
    pub network: NetworkType,
    /// Required chain id override
    #[serde(default)]
    pub chain_id: Option<u64>,
    /// Token address override
    #[serde(default)]
    pub token: Option<Address>,
    /// Poll interval override in milliseconds
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    /// Display decimals override
    #[serde(default)]
    pub display_decimals: Option<u8>,
    /// Network name override
    #[serde(default)]
    pub name: Option<String>,
}

impl NetworkSettings {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Apply the overrides on top of the preset and validate the result.
    pub fn resolve(&self) -> Result<NetworkConfig, ConfigError> {
        let mut builder = NetworkConfigBuilder::new(self.network);
        if let Some(chain_id) = self.chain_id {
            builder = builder.chain_id(chain_id);
        }
        if let Some(token) = self.token {
            builder = builder.token(token);
        }
        if let Some(interval) = self.poll_interval_ms {
            builder = builder.poll_interval_ms(interval);
        }
        if let Some(decimals) = self.display_decimals {
            builder = builder.display_decimals(decimals);
        }
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }

        let config = builder.build();
        if config.token == Address::ZERO {
            return Err(ConfigError::Invalid(format!(
                "no token address configured for {}",
                config.name
            )));
        }
        if config.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn test_overrides_apply_on_top_of_preset() {
        let settings: NetworkSettings = toml::from_str(
            r#"
            network = "goerli"
            poll_interval_ms = 5000
            token = "0x2222222222222222222222222222222222222222"
            "#,
        )
        .unwrap();

        let config = settings.resolve().unwrap();
        assert_eq!(config.chain_id, 5);
        assert_eq!(config.poll_interval_ms, 5000);
        assert_eq!(
            config.token,
            address!("2222222222222222222222222222222222222222")
        );
    }

    #[test]
    fn test_missing_token_is_rejected() {
        let settings: NetworkSettings = toml::from_str(r#"network = "mainnet""#).unwrap();
        assert!(matches!(settings.resolve(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_from_file_reads_settings() {
        let path = std::env::temp_dir().join(format!("network-settings-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
            network = "sepolia"
            token = "0x3333333333333333333333333333333333333333"
            display_decimals = 2
            "#,
        )
        .unwrap();

        let settings = NetworkSettings::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(settings.network, NetworkType::Sepolia);
        assert_eq!(settings.resolve().unwrap().display_decimals, 2);
    }

    #[test]
    fn test_from_file_reports_missing_file() {
        let path = std::env::temp_dir().join("network-settings-does-not-exist.toml");
        let error = NetworkSettings::from_file(&path).unwrap_err();
        assert!(matches!(error, ConfigError::Read { .. }));
        assert!(error.to_string().contains("network-settings-does-not-exist.toml"));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let settings: NetworkSettings = toml::from_str(
            r#"
            network = "local"
            poll_interval_ms = 0
            "#,
        )
        .unwrap();
        assert!(settings.resolve().is_err());
    }
}
