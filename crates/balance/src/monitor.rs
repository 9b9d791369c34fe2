use crate::{Allowance, Balance, BalanceQuery, Monitor, QueryResult};
use alloy_primitives::Address;
use client::TokenContract;
use eyre::Result;
use tracing::debug;

// Balance monitor over a signer-bound token handle.
#[derive(Debug, Clone)]
pub struct BalanceMonitor<T> {
    token: T,
}

impl<T> BalanceMonitor<T>
where
    T: TokenContract,
{
    pub const fn new(token: T) -> Self {
        Self { token }
    }

    async fn query_erc20(&self, holder: Address) -> Result<Balance> {
        debug!("Querying token {} balance: address={}", self.token.address(), holder);

        let amount = self.token.balance_of(holder).await?;

        Ok(Balance {
            holder,
            asset: self.token.address(),
            amount,
        })
    }

    async fn query_token_allowance(&self, owner: Address, spender: Address) -> Result<Allowance> {
        debug!(
            "Querying token {} allowance: owner={}, spender={}",
            self.token.address(),
            owner,
            spender
        );

        let amount = self.token.allowance(owner, spender).await?;

        Ok(Allowance {
            owner,
            spender,
            amount,
        })
    }
}

impl<T> Monitor for BalanceMonitor<T>
where
    T: TokenContract,
{
    async fn query(&self, query: BalanceQuery) -> Result<QueryResult> {
        match query {
            BalanceQuery::Balance { holder } => self.query_erc20(holder).await.map(QueryResult::Balance),
            BalanceQuery::Allowance { owner, spender } => self
                .query_token_allowance(owner, spender)
                .await
                .map(QueryResult::Allowance),
        }
    }
}
