//! Wallet provider and token contract interfaces.
//!
//! The session never talks to a node directly. It goes through a
//! [`WalletProvider`] (network id, accounts, change notifications, signers)
//! and the [`TokenContract`] handle the provider binds to a signer.

use crate::ProviderError;
use alloy_primitives::{Address, TxHash, U256};
use alloy_rpc_types_eth::Log;
use std::{fmt, future::Future};
use tokio::sync::{broadcast, mpsc};

/// Notification pushed by the wallet when the user changes its context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The active account list changed
    AccountsChanged(Vec<Address>),
    /// The active chain changed
    ChainChanged(u64),
}

/// A write operation against the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Move `amount` from the signer to `to`
    Transfer { to: Address, amount: U256 },
    /// Move `amount` from `from` to `to` using the signer's allowance
    TransferFrom {
        from: Address,
        to: Address,
        amount: U256,
    },
    /// Let `spender` move up to `amount` of the signer's tokens
    Approve { spender: Address, amount: U256 },
}

impl Operation {
    /// Short name used in logs and failure messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Transfer { .. } => "transfer",
            Self::TransferFrom { .. } => "transferFrom",
            Self::Approve { .. } => "approve",
        }
    }

    /// `(owner, spender)` of the allowance a confirmed operation changes.
    pub const fn allowance_touched(&self, signer: Address) -> Option<(Address, Address)> {
        match *self {
            Self::Transfer { .. } => None,
            Self::TransferFrom { from, .. } => Some((from, signer)),
            Self::Approve { spender, .. } => Some((signer, spender)),
        }
    }

    /// Transfer notification a confirmed operation emits, when it emits one.
    pub const fn transfer_filter(&self, signer: Address) -> Option<TransferFilter> {
        match *self {
            Self::Transfer { to, .. } => Some(TransferFilter {
                from: Some(signer),
                to: Some(to),
            }),
            Self::TransferFrom { from, to, .. } => Some(TransferFilter {
                from: Some(from),
                to: Some(to),
            }),
            Self::Approve { .. } => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transfer { to, amount } => write!(f, "transfer {amount} to {to}"),
            Self::TransferFrom { from, to, amount } => {
                write!(f, "transferFrom {amount} from {from} to {to}")
            }
            Self::Approve { spender, amount } => write!(f, "approve {spender} for {amount}"),
        }
    }
}

/// A decoded `Transfer` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    /// Log the record was decoded from, when it came from a node
    pub raw: Option<Log>,
}

/// Topic filter for `Transfer` notifications. `None` matches any address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferFilter {
    pub from: Option<Address>,
    pub to: Option<Address>,
}

impl TransferFilter {
    pub fn matches(&self, record: &TransferRecord) -> bool {
        self.from.is_none_or(|from| from == record.from) && self.to.is_none_or(|to| to == record.to)
    }
}

/// Mined transaction as seen by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub hash: TxHash,
    /// `false` when the transaction reverted
    pub status: bool,
    pub block_number: Option<u64>,
    /// `Transfer` notifications emitted by the token in this transaction
    pub transfers: Vec<TransferRecord>,
}

/// Live stream of `Transfer` notifications.
///
/// Dropping the subscription releases the underlying filter.
#[derive(Debug)]
pub struct TransferSubscription {
    receiver: mpsc::Receiver<TransferRecord>,
}

impl TransferSubscription {
    pub const fn new(receiver: mpsc::Receiver<TransferRecord>) -> Self {
        Self { receiver }
    }

    /// Next notification, or `None` once the source has gone away.
    pub async fn recv(&mut self) -> Option<TransferRecord> {
        self.receiver.recv().await
    }
}

/// External wallet holding the user's keys.
pub trait WalletProvider: Send + Sync + 'static {
    type Token: TokenContract;

    /// Chain id the wallet is currently on.
    fn network_id(&self) -> impl Future<Output = Result<u64, ProviderError>> + Send;

    /// Accounts the wallet exposes, active account first.
    fn accounts(&self) -> impl Future<Output = Result<Vec<Address>, ProviderError>> + Send;

    /// Account and chain change notifications.
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;

    /// Request the signer at `signer_index` and bind the token at `token` to it.
    fn token(
        &self,
        token: Address,
        signer_index: usize,
    ) -> impl Future<Output = Result<Self::Token, ProviderError>> + Send;
}

/// Token contract handle bound to one signer.
pub trait TokenContract: Clone + Send + Sync + 'static {
    type Submitted: SubmittedTransaction;

    /// Contract address.
    fn address(&self) -> Address;

    /// Account writes are signed by.
    fn signer(&self) -> Address;

    fn name(&self) -> impl Future<Output = Result<String, ProviderError>> + Send;

    fn symbol(&self) -> impl Future<Output = Result<String, ProviderError>> + Send;

    fn balance_of(&self, owner: Address)
        -> impl Future<Output = Result<U256, ProviderError>> + Send;

    fn allowance(
        &self,
        owner: Address,
        spender: Address,
    ) -> impl Future<Output = Result<U256, ProviderError>> + Send;

    /// Sign and broadcast a write. Resolves once the wallet returned a hash.
    fn send(
        &self,
        operation: &Operation,
    ) -> impl Future<Output = Result<Self::Submitted, ProviderError>> + Send;

    /// Subscribe to `Transfer` notifications matching `filter`.
    fn subscribe_transfers(
        &self,
        filter: TransferFilter,
    ) -> impl Future<Output = Result<TransferSubscription, ProviderError>> + Send;
}

/// Handle to a broadcast transaction.
pub trait SubmittedTransaction: Send + 'static {
    fn hash(&self) -> TxHash;

    /// Wait until the transaction is mined.
    fn wait(self) -> impl Future<Output = Result<Receipt, ProviderError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const SIGNER: Address = address!("1000000000000000000000000000000000000001");
    const OTHER: Address = address!("2000000000000000000000000000000000000002");
    const THIRD: Address = address!("3000000000000000000000000000000000000003");

    fn record(from: Address, to: Address) -> TransferRecord {
        TransferRecord {
            from,
            to,
            value: U256::from(1),
            raw: None,
        }
    }

    #[test]
    fn test_transfer_filter_uses_signer_as_sender() {
        let op = Operation::Transfer {
            to: OTHER,
            amount: U256::from(50),
        };
        let filter = op.transfer_filter(SIGNER).unwrap();

        assert!(filter.matches(&record(SIGNER, OTHER)));
        assert!(!filter.matches(&record(THIRD, OTHER)));
        assert!(op.allowance_touched(SIGNER).is_none());
    }

    #[test]
    fn test_transfer_from_filter_uses_giver() {
        let op = Operation::TransferFrom {
            from: THIRD,
            to: OTHER,
            amount: U256::from(5),
        };
        let filter = op.transfer_filter(SIGNER).unwrap();

        assert!(filter.matches(&record(THIRD, OTHER)));
        assert!(!filter.matches(&record(SIGNER, OTHER)));
        assert_eq!(op.allowance_touched(SIGNER), Some((THIRD, SIGNER)));
    }

    #[test]
    fn test_approve_has_no_transfer() {
        let op = Operation::Approve {
            spender: OTHER,
            amount: U256::from(5),
        };
        assert!(op.transfer_filter(SIGNER).is_none());
        assert_eq!(op.allowance_touched(SIGNER), Some((SIGNER, OTHER)));
        assert_eq!(op.name(), "approve");
    }

    #[test]
    fn test_default_filter_matches_everything() {
        assert!(TransferFilter::default().matches(&record(THIRD, SIGNER)));
    }
}
