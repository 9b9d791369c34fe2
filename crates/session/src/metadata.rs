//! Token name and symbol, read once per connection.
//!
//! `invalidate()` bumps a generation under the cache lock. A read that
//! started before the bump completes without storing anything.

use action::{ErrorKind, TransactionError};
use alloy_primitives::Address;
use client::TokenContract;
use parking_lot::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    cached: Option<(Address, TokenMetadata)>,
}

/// Caches [`TokenMetadata`] for the bound token until invalidated.
#[derive(Debug, Default)]
pub struct TokenDataCache {
    slot: Mutex<Slot>,
}

impl TokenDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached metadata, or `name()` and `symbol()` read from `token`.
    pub async fn fetch<T: TokenContract>(&self, token: &T) -> Result<TokenMetadata, TransactionError> {
        let address = token.address();
        let generation = {
            let slot = self.slot.lock();
            if let Some((cached, metadata)) = &slot.cached {
                if *cached == address {
                    return Ok(metadata.clone());
                }
            }
            slot.generation
        };

        let unreadable = |e: client::ProviderError| {
            warn!(token = %address, error = %e, "Failed to read token metadata");
            TransactionError::new(ErrorKind::Unknown, format!("Could not read token at {address}: {e}"))
                .with_raw(e)
        };

        let name = token.name().await.map_err(unreadable)?;
        let symbol = token.symbol().await.map_err(unreadable)?;

        let metadata = TokenMetadata { name, symbol };
        debug!(token = %address, name = %metadata.name, symbol = %metadata.symbol, "Token metadata loaded");

        let mut slot = self.slot.lock();
        if slot.generation == generation {
            slot.cached = Some((address, metadata.clone()));
        } else {
            debug!(token = %address, "Cache invalidated during read, not storing metadata");
        }
        Ok(metadata)
    }

    /// Cached metadata for `token`, without reading.
    pub fn get(&self, token: Address) -> Option<TokenMetadata> {
        self.slot
            .lock()
            .cached
            .as_ref()
            .filter(|(address, _)| *address == token)
            .map(|(_, metadata)| metadata.clone())
    }

    pub fn invalidate(&self) {
        let mut slot = self.slot.lock();
        slot.generation = slot.generation.wrapping_add(1);
        slot.cached = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use client::{testing::FakeWallet, WalletProvider};
    use std::sync::Arc;

    const ALICE: Address = address!("a000000000000000000000000000000000000001");
    const TOKEN: Address = address!("c000000000000000000000000000000000000003");

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_fetch_reads_once_then_caches() {
        let wallet = FakeWallet::new(5, vec![ALICE]).with_token("Session Token", "SES");
        let token = wallet.token(TOKEN, 0).await.unwrap();
        let cache = TokenDataCache::new();

        let metadata = cache.fetch(&token).await.unwrap();
        assert_eq!(metadata.name, "Session Token");
        assert_eq!(metadata.symbol, "SES");

        // Served from the cache even though the token is gone
        wallet.undeploy();
        assert_eq!(cache.fetch(&token).await.unwrap(), metadata);

        cache.invalidate();
        assert!(cache.get(TOKEN).is_none());
        let error = cache.fetch(&token).await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::Unknown);
    }

    #[tokio::test]
    async fn test_failed_read_is_not_cached() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        let token = wallet.token(TOKEN, 0).await.unwrap();
        let cache = TokenDataCache::new();

        wallet.fail_next_reads(1);
        let error = cache.fetch(&token).await.unwrap_err();
        assert!(error.raw.is_some());
        assert!(cache.get(TOKEN).is_none());

        assert_eq!(cache.fetch(&token).await.unwrap().symbol, "TST");
    }

    #[tokio::test]
    async fn test_read_finishing_after_invalidate_is_not_cached() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        let token = wallet.token(TOKEN, 0).await.unwrap();
        let cache = Arc::new(TokenDataCache::new());

        wallet.hold_reads();
        let read = tokio::spawn({
            let cache = cache.clone();
            let token = token.clone();
            async move { cache.fetch(&token).await }
        });
        settle().await;

        cache.invalidate();
        wallet.release_reads();
        assert_eq!(read.await.unwrap().unwrap().symbol, "TST");
        assert!(cache.get(TOKEN).is_none());

        // Nothing cached, so the next fetch reads again and sees the failure
        wallet.undeploy();
        assert!(cache.fetch(&token).await.is_err());
    }
}
