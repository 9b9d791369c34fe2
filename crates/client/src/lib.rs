//! Wallet provider adapter.
//!
//! - [`wallet`]: the interfaces the session consumes
//! - [`rpc`]: an alloy-backed implementation for JSON-RPC nodes
//! - `testing` (feature `test-utils`): an in-memory wallet for tests

mod error;
pub mod rpc;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod wallet;

use alloy_network::EthereumWallet;
use alloy_provider::{Provider, ProviderBuilder};
use alloy_signer_local::PrivateKeySigner;
pub use error::{ProviderError, USER_REJECTED_CODE};
pub use rpc::{AlloySubmitted, AlloyToken, AlloyWallet};
use thiserror::Error;
pub use wallet::{
    Operation, ProviderEvent, Receipt, SubmittedTransaction, TokenContract, TransferFilter,
    TransferRecord, TransferSubscription, WalletProvider,
};

#[derive(Error, Debug)]
pub enum ClientError {
    /// Error parsing or validating URLs
    #[error("Invalid RPC URL: {0}")]
    InvalidUrl(String),

    /// Error with private key
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),
}

/// Create a wallet provider that signs with a local private key.
///
/// The key's address is the only account the wallet exposes.
pub fn create_wallet_provider(
    rpc_url: &str,
    private_key: &str,
) -> Result<AlloyWallet<impl Provider + Clone + 'static>, ClientError> {
    let url = rpc_url
        .parse()
        .map_err(|e| ClientError::InvalidUrl(format!("{}", e)))?;

    let signer: PrivateKeySigner = private_key
        .parse()
        .map_err(|e| ClientError::InvalidPrivateKey(format!("{}", e)))?;
    let address = signer.address();

    let wallet = EthereumWallet::from(signer);
    let provider = ProviderBuilder::new().wallet(wallet).connect_http(url);

    Ok(AlloyWallet::new(provider, vec![address]))
}
