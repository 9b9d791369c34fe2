use alloy_primitives::Address;
use config::{NetworkConfig, NetworkSettings};
use serde::{Deserialize, Serialize};
use session::SessionConfig;
use std::path::Path;

/// Top-level dapp configuration.
///
/// ```toml
/// rpc_url = "http://localhost:8545"
/// metrics_port = 9000
///
/// [network]
/// network = "goerli"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// RPC endpoint url
    pub rpc_url: String,

    /// Required network and token
    pub network: NetworkSettings,

    /// Index of the signer used for writes
    #[serde(default)]
    pub signer_index: usize,

    /// Account to show instead of the wallet's first account
    #[serde(default)]
    pub selected_address: Option<Address>,

    /// Port for the Prometheus exporter, disabled when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;

        Ok(config)
    }

    /// Replace the `[network]` table with settings read from `path`.
    pub fn with_network_file(mut self, path: impl AsRef<Path>) -> eyre::Result<Self> {
        self.network = NetworkSettings::from_file(path)?;
        Ok(self)
    }

    /// Resolved required network.
    pub fn network_config(&self) -> eyre::Result<NetworkConfig> {
        Ok(self.network.resolve()?)
    }

    pub fn session_config(&self, network: NetworkConfig) -> SessionConfig {
        let mut config = SessionConfig::new(network).with_signer_index(self.signer_index);
        if let Some(address) = self.selected_address {
            config = config.with_selected_address(address);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use config::NetworkType;

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str(
            r#"
            rpc_url = "http://localhost:8545"

            [network]
            network = "goerli"
            "#,
        )
        .unwrap();

        assert_eq!(config.network.network, NetworkType::Goerli);
        assert_eq!(config.signer_index, 0);
        assert!(config.metrics_port.is_none());

        let network = config.network_config().unwrap();
        assert_eq!(network.chain_id, 5);
        let session = config.session_config(network);
        assert!(session.selected_address.is_none());
    }

    #[test]
    fn test_network_file_replaces_network_table() {
        let config: Config = toml::from_str(
            r#"
            rpc_url = "http://localhost:8545"

            [network]
            network = "goerli"
            "#,
        )
        .unwrap();

        let path = std::env::temp_dir().join(format!("dapp-network-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
            network = "local"
            token = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
            "#,
        )
        .unwrap();
        let config = config.with_network_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.network.network, NetworkType::Local);
        assert_eq!(config.network_config().unwrap().chain_id, 31337);

        let missing = std::env::temp_dir().join("dapp-network-missing.toml");
        assert!(config.with_network_file(missing).is_err());
    }

    #[test]
    fn test_selected_address_is_forwarded() {
        let config: Config = toml::from_str(
            r#"
            rpc_url = "http://localhost:8545"
            signer_index = 1
            selected_address = "0x00000000000000000000000000000000000000aa"

            [network]
            network = "local"
            token = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
            "#,
        )
        .unwrap();

        let session = config.session_config(config.network_config().unwrap());
        assert_eq!(session.signer_index, 1);
        assert_eq!(
            session.selected_address,
            Some(address!("00000000000000000000000000000000000000aa"))
        );
        assert_eq!(session.network.chain_id, 31337);
    }
}
