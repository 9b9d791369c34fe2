//! Balance and allowance reads for the session token.
//!
//! [`monitor::BalanceMonitor`] performs single reads against a bound token
//! handle; [`poller::BalancePoller`] keeps the active account's balance fresh.

pub mod monitor;
pub mod poller;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Token balance of one holder at the time of the last successful read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// The address holding the balance
    pub holder: Address,
    /// The token contract address
    pub asset: Address,
    /// The balance amount
    pub amount: U256,
}

/// Amount `spender` may move on behalf of `owner`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowance {
    pub owner: Address,
    pub spender: Address,
    pub amount: U256,
}

/// Type of read to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceQuery {
    /// `balanceOf(holder)`
    Balance {
        /// Holder address
        holder: Address,
    },
    /// `allowance(owner, spender)`
    Allowance {
        owner: Address,
        spender: Address,
    },
}

/// Result of a [`BalanceQuery`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryResult {
    Balance(Balance),
    Allowance(Allowance),
}

/// Trait for reading token balances.
pub trait Monitor: Clone + Send + Sync + 'static {
    /// Perform a single read.
    fn query(&self, query: BalanceQuery) -> impl Future<Output = eyre::Result<QueryResult>> + Send;

    /// `balanceOf(holder)`.
    fn query_balance(&self, holder: Address) -> impl Future<Output = eyre::Result<Balance>> + Send {
        async move {
            match self.query(BalanceQuery::Balance { holder }).await? {
                QueryResult::Balance(balance) => Ok(balance),
                QueryResult::Allowance(_) => eyre::bail!("balance query answered with an allowance"),
            }
        }
    }

    /// `allowance(owner, spender)`.
    fn query_allowance(
        &self,
        owner: Address,
        spender: Address,
    ) -> impl Future<Output = eyre::Result<Allowance>> + Send {
        async move {
            match self.query(BalanceQuery::Allowance { owner, spender }).await? {
                QueryResult::Allowance(allowance) => Ok(allowance),
                QueryResult::Balance(_) => eyre::bail!("allowance query answered with a balance"),
            }
        }
    }
}
