//! Live `Transfer` notifications for the last confirmed write.
//!
//! One subscription at a time. Attaching again replaces the previous
//! subscription, and records that arrive for a replaced or detached
//! subscription are dropped.

use client::{ProviderError, TokenContract, TransferFilter, TransferRecord};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info};

#[derive(Debug)]
struct Latest {
    record: watch::Sender<Option<TransferRecord>>,
    generation: AtomicU64,
}

impl Latest {
    fn store(&self, generation: u64, record: TransferRecord) -> bool {
        self.record.send_if_modified(|slot| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            *slot = Some(record);
            true
        })
    }

    fn bump(&self) -> u64 {
        let mut next = 0;
        self.record.send_if_modified(|_| {
            next = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            false
        });
        next
    }

    fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Follows `Transfer` notifications of one token.
#[derive(Debug)]
pub struct EventWatcher<T> {
    token: T,
    latest: Arc<Latest>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T> EventWatcher<T>
where
    T: TokenContract,
{
    pub fn new(token: T) -> Self {
        let (record, _) = watch::channel(None);
        Self {
            token,
            latest: Arc::new(Latest {
                record,
                generation: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Subscribe to notifications matching `filter`, replacing any earlier
    /// subscription.
    pub async fn attach(&self, filter: TransferFilter) -> Result<(), ProviderError> {
        self.release();
        let generation = self.latest.bump();

        let mut subscription = self.token.subscribe_transfers(filter).await?;

        let mut task = self.task.lock();
        if self.latest.current() != generation {
            // Detached or re-attached while subscribing
            debug!("Dropping superseded transfer subscription");
            return Ok(());
        }

        let latest = self.latest.clone();
        *task = Some(tokio::spawn(async move {
            while let Some(record) = subscription.recv().await {
                if !filter.matches(&record) {
                    continue;
                }
                let (from, to, value) = (record.from, record.to, record.value);
                if !latest.store(generation, record) {
                    break;
                }
                info!(from = %from, to = %to, value = %value, "Transfer observed");
            }
        }));

        info!(
            token = %self.token.address(),
            from = ?filter.from,
            to = ?filter.to,
            "Watching Transfer notifications"
        );
        Ok(())
    }

    /// Store a transfer taken from a confirmed receipt.
    pub fn record(&self, transfer: TransferRecord) {
        self.latest.record.send_replace(Some(transfer));
    }

    /// Release the subscription. Later notifications are ignored.
    pub fn detach(&self) {
        self.latest.bump();
        if self.release() {
            debug!(token = %self.token.address(), "Stopped watching Transfer notifications");
        }
    }

    /// Detach and forget the latest record.
    pub fn clear(&self) {
        self.detach();
        self.latest.record.send_replace(None);
    }

    pub fn is_attached(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn latest(&self) -> Option<TransferRecord> {
        self.latest.record.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<TransferRecord>> {
        self.latest.record.subscribe()
    }

    fn release(&self) -> bool {
        let Some(task) = self.task.lock().take() else {
            return false;
        };
        task.abort();
        true
    }
}

impl<T> Drop for EventWatcher<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, Address, U256};
    use client::{
        testing::{FakeToken, FakeWallet},
        Operation, SubmittedTransaction, WalletProvider,
    };

    const ALICE: Address = address!("a000000000000000000000000000000000000001");
    const BOB: Address = address!("b000000000000000000000000000000000000002");
    const CAROL: Address = address!("d000000000000000000000000000000000000004");
    const TOKEN: Address = address!("c000000000000000000000000000000000000003");

    async fn watcher(wallet: &FakeWallet) -> EventWatcher<FakeToken> {
        EventWatcher::new(wallet.token(TOKEN, 0).await.unwrap())
    }

    fn transfer(from: Address, to: Address, value: u64) -> TransferRecord {
        TransferRecord {
            from,
            to,
            value: U256::from(value),
            raw: None,
        }
    }

    fn alice_to_bob() -> TransferFilter {
        TransferFilter {
            from: Some(ALICE),
            to: Some(BOB),
        }
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_matching_notifications_are_stored() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        let watcher = watcher(&wallet).await;
        let mut updates = watcher.subscribe();

        watcher.attach(alice_to_bob()).await.unwrap();
        assert!(watcher.is_attached());

        wallet.emit_transfer(transfer(CAROL, BOB, 1));
        wallet.emit_transfer(transfer(ALICE, BOB, 50));

        updates.changed().await.unwrap();
        assert_eq!(watcher.latest().map(|r| r.value), Some(U256::from(50)));
    }

    #[tokio::test]
    async fn test_mined_transfer_reaches_watcher() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        wallet.mint(ALICE, U256::from(100));
        let token = wallet.token(TOKEN, 0).await.unwrap();
        let watcher = EventWatcher::new(token.clone());
        let mut updates = watcher.subscribe();

        watcher.attach(alice_to_bob()).await.unwrap();
        let receipt = token
            .send(&Operation::Transfer {
                to: BOB,
                amount: U256::from(25),
            })
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert!(receipt.status);

        updates.changed().await.unwrap();
        let latest = watcher.latest().unwrap();
        assert_eq!((latest.from, latest.to), (ALICE, BOB));
        assert_eq!(latest.value, U256::from(25));
    }

    #[tokio::test]
    async fn test_detach_releases_subscription() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        let watcher = watcher(&wallet).await;

        watcher.attach(alice_to_bob()).await.unwrap();
        assert_eq!(wallet.transfer_subscribers(), 1);

        watcher.detach();
        watcher.detach();
        settle().await;

        assert!(!watcher.is_attached());
        assert_eq!(wallet.transfer_subscribers(), 0);

        wallet.emit_transfer(transfer(ALICE, BOB, 9));
        settle().await;
        assert!(watcher.latest().is_none());
    }

    #[tokio::test]
    async fn test_reattach_replaces_subscription() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        let watcher = watcher(&wallet).await;

        watcher.attach(alice_to_bob()).await.unwrap();
        watcher
            .attach(TransferFilter {
                from: Some(ALICE),
                to: Some(CAROL),
            })
            .await
            .unwrap();
        settle().await;
        assert_eq!(wallet.transfer_subscribers(), 1);

        wallet.emit_transfer(transfer(ALICE, BOB, 3));
        settle().await;
        assert!(watcher.latest().is_none());
    }

    #[tokio::test]
    async fn test_subscription_completing_after_detach_is_dropped() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        let watcher = Arc::new(watcher(&wallet).await);

        wallet.hold_reads();
        let attach = tokio::spawn({
            let watcher = watcher.clone();
            async move { watcher.attach(alice_to_bob()).await }
        });
        settle().await;

        watcher.detach();
        wallet.release_reads();
        attach.await.unwrap().unwrap();
        settle().await;

        assert!(!watcher.is_attached());
        assert_eq!(wallet.transfer_subscribers(), 0);

        wallet.emit_transfer(transfer(ALICE, BOB, 4));
        settle().await;
        assert!(watcher.latest().is_none());
    }

    #[tokio::test]
    async fn test_stale_generation_is_discarded() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        let watcher = watcher(&wallet).await;

        let stale = watcher.latest.bump();
        watcher.detach();

        assert!(!watcher.latest.store(stale, transfer(ALICE, BOB, 1)));
        assert!(watcher.latest().is_none());
    }

    #[tokio::test]
    async fn test_record_seeds_latest_and_clear_forgets_it() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        let watcher = watcher(&wallet).await;

        watcher.record(transfer(ALICE, BOB, 50));
        assert_eq!(watcher.latest().map(|r| r.value), Some(U256::from(50)));

        watcher.clear();
        assert!(watcher.latest().is_none());
    }
}
