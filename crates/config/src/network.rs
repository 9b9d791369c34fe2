//! Network configuration for the token session.
//!
//! A session only talks to the token once the wallet reports the required
//! chain. The presets below pair that chain with the deployed token address.

use alloy_primitives::{address, Address};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Balance refresh period used by the presets.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 20_000;

/// Decimals used when rendering transfer values.
pub const DEFAULT_DISPLAY_DECIMALS: u8 = 6;

/// Network the session is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Mainnet,
    Goerli,
    Sepolia,
    Local,
}

/// Complete network configuration for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network type
    pub network_type: NetworkType,
    /// Human readable network name, used in mismatch messages
    pub name: String,
    /// Chain id the wallet must report before any contract call
    pub chain_id: u64,
    /// Token contract address
    pub token: Address,
    /// Balance poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Decimals used to format transfer values
    pub display_decimals: u8,
}

impl NetworkConfig {
    /// Ethereum mainnet configuration.
    pub fn mainnet() -> Self {
        Self {
            network_type: NetworkType::Mainnet,
            name: "Ethereum Mainnet".to_string(),
            chain_id: 1,
            token: Address::ZERO,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            display_decimals: DEFAULT_DISPLAY_DECIMALS,
        }
    }

    /// Goerli testnet configuration, where the token is deployed.
    pub fn goerli() -> Self {
        Self {
            network_type: NetworkType::Goerli,
            name: "Goerli TestNet".to_string(),
            chain_id: 5,
            token: address!("0x5FbDB2315678afecb367f032d93F642f64180aa3"),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            display_decimals: DEFAULT_DISPLAY_DECIMALS,
        }
    }

    /// Ethereum Sepolia testnet configuration.
    pub fn sepolia() -> Self {
        Self {
            network_type: NetworkType::Sepolia,
            name: "Sepolia TestNet".to_string(),
            chain_id: 11155111,
            token: Address::ZERO,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            display_decimals: DEFAULT_DISPLAY_DECIMALS,
        }
    }

    /// Local development node (hardhat/anvil).
    pub fn local() -> Self {
        Self {
            network_type: NetworkType::Local,
            name: "Localhost:8545".to_string(),
            chain_id: 31337,
            token: address!("0x5FbDB2315678afecb367f032d93F642f64180aa3"),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            display_decimals: DEFAULT_DISPLAY_DECIMALS,
        }
    }

    /// Create configuration from network type.
    pub fn from_network_type(network_type: NetworkType) -> Self {
        match network_type {
            NetworkType::Mainnet => Self::mainnet(),
            NetworkType::Goerli => Self::goerli(),
            NetworkType::Sepolia => Self::sepolia(),
            NetworkType::Local => Self::local(),
        }
    }

    /// Balance poll interval.
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Message shown when the wallet is on another chain.
    pub fn mismatch_message(&self) -> String {
        format!("Please connect your wallet to {}", self.name)
    }
}

/// Builder for custom network configurations.
#[derive(Debug, Clone)]
pub struct NetworkConfigBuilder {
    config: NetworkConfig,
}

impl NetworkConfigBuilder {
    /// Start from the defaults of a preset.
    pub fn new(network_type: NetworkType) -> Self {
        Self {
            config: NetworkConfig::from_network_type(network_type),
        }
    }

    /// Start with Goerli defaults.
    pub fn goerli() -> Self {
        Self::new(NetworkType::Goerli)
    }

    /// Override the required chain id.
    pub const fn chain_id(mut self, chain_id: u64) -> Self {
        self.config.chain_id = chain_id;
        self
    }

    /// Override the token address.
    pub const fn token(mut self, token: Address) -> Self {
        self.config.token = token;
        self
    }

    /// Override the balance poll interval.
    pub const fn poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.config.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Override the display decimals.
    pub const fn display_decimals(mut self, decimals: u8) -> Self {
        self.config.display_decimals = decimals;
        self
    }

    /// Override the network name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Build the network configuration.
    pub fn build(self) -> NetworkConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goerli_config() {
        let config = NetworkConfig::goerli();
        assert_eq!(config.chain_id, 5);
        assert_eq!(config.network_type, NetworkType::Goerli);
        assert_eq!(config.poll_interval(), Duration::from_secs(20));
        assert_eq!(config.display_decimals, 6);
    }

    #[test]
    fn test_mismatch_message_names_network() {
        let config = NetworkConfig::goerli();
        assert_eq!(
            config.mismatch_message(),
            "Please connect your wallet to Goerli TestNet"
        );
    }

    #[test]
    fn test_custom_config_builder() {
        let token = address!("1111111111111111111111111111111111111111");

        let config = NetworkConfigBuilder::goerli()
            .token(token)
            .poll_interval_ms(1_000)
            .build();

        assert_eq!(config.token, token);
        assert_eq!(config.chain_id, 5);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }
}
