//! In-memory wallet for tests.
//!
//! [`FakeWallet`] keeps balances and allowances for a single token, mines
//! writes when their receipt is awaited, and can be scripted to reject,
//! revert or fail. Mining can be paused to keep a transaction pending, and
//! token reads can be held to keep a read in flight.

use crate::{
    wallet::{
        Operation, ProviderEvent, Receipt, SubmittedTransaction, TokenContract, TransferFilter,
        TransferRecord, TransferSubscription, WalletProvider,
    },
    ProviderError,
};
use alloy_primitives::{Address, TxHash, B256, U256};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::{broadcast, mpsc, watch};

/// What the next `send()` does.
#[derive(Debug, Clone)]
enum SendScript {
    Reject,
    Fail(ProviderError),
    Revert,
    FailWait(ProviderError),
}

#[derive(Debug)]
struct FakeChain {
    network_id: u64,
    accounts: Vec<Address>,
    name: String,
    symbol: String,
    deployed: bool,
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    scripts: VecDeque<SendScript>,
    failing_reads: usize,
    sent: u64,
    block: u64,
    subscribers: Vec<(TransferFilter, mpsc::Sender<TransferRecord>)>,
}

impl FakeChain {
    fn read(&mut self) -> Result<(), ProviderError> {
        if self.failing_reads > 0 {
            self.failing_reads -= 1;
            return Err(ProviderError::Transport("connection reset by peer".to_string()));
        }
        Ok(())
    }

    fn balance(&self, owner: Address) -> U256 {
        self.balances.get(&owner).copied().unwrap_or_default()
    }

    fn allowance(&self, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default()
    }

    fn move_tokens(&mut self, from: Address, to: Address, amount: U256) -> bool {
        let from_balance = self.balance(from);
        if from_balance < amount {
            return false;
        }
        self.balances.insert(from, from_balance - amount);
        let to_balance = self.balance(to);
        self.balances.insert(to, to_balance + amount);
        true
    }

    /// Apply `operation` signed by `signer`. Returns the emitted transfer,
    /// or `Err(())` when the token would revert.
    fn apply(
        &mut self,
        signer: Address,
        operation: Operation,
    ) -> Result<Option<TransferRecord>, ()> {
        match operation {
            Operation::Transfer { to, amount } => {
                if !self.move_tokens(signer, to, amount) {
                    return Err(());
                }
                Ok(Some(TransferRecord {
                    from: signer,
                    to,
                    value: amount,
                    raw: None,
                }))
            }
            Operation::TransferFrom { from, to, amount } => {
                let allowed = self.allowance(from, signer);
                if allowed < amount || self.balance(from) < amount {
                    return Err(());
                }
                self.allowances.insert((from, signer), allowed - amount);
                self.move_tokens(from, to, amount);
                Ok(Some(TransferRecord {
                    from,
                    to,
                    value: amount,
                    raw: None,
                }))
            }
            Operation::Approve { spender, amount } => {
                self.allowances.insert((signer, spender), amount);
                Ok(None)
            }
        }
    }

    fn notify(&mut self, record: &TransferRecord) {
        self.subscribers.retain(|(_, sender)| !sender.is_closed());
        for (filter, sender) in &self.subscribers {
            if filter.matches(record) {
                let _ = sender.try_send(record.clone());
            }
        }
    }
}

/// In-memory wallet and token.
#[derive(Debug, Clone)]
pub struct FakeWallet {
    chain: Arc<Mutex<FakeChain>>,
    events: broadcast::Sender<ProviderEvent>,
    mining: Arc<watch::Sender<bool>>,
    reads_open: Arc<watch::Sender<bool>>,
    reads: Arc<AtomicUsize>,
}

impl FakeWallet {
    /// Wallet on `network_id` exposing `accounts`, with a deployed token
    /// named "Test Token" (`TST`) and no balances.
    pub fn new(network_id: u64, accounts: Vec<Address>) -> Self {
        let (events, _) = broadcast::channel(16);
        let (mining, _) = watch::channel(true);
        let (reads_open, _) = watch::channel(true);
        Self {
            chain: Arc::new(Mutex::new(FakeChain {
                network_id,
                accounts,
                name: "Test Token".to_string(),
                symbol: "TST".to_string(),
                deployed: true,
                balances: HashMap::new(),
                allowances: HashMap::new(),
                scripts: VecDeque::new(),
                failing_reads: 0,
                sent: 0,
                block: 0,
                subscribers: Vec::new(),
            })),
            events,
            mining: Arc::new(mining),
            reads_open: Arc::new(reads_open),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_token(self, name: &str, symbol: &str) -> Self {
        {
            let mut chain = self.chain.lock();
            chain.name = name.to_string();
            chain.symbol = symbol.to_string();
        }
        self
    }

    pub fn mint(&self, owner: Address, amount: U256) {
        let mut chain = self.chain.lock();
        let balance = chain.balance(owner);
        chain.balances.insert(owner, balance + amount);
    }

    pub fn set_allowance(&self, owner: Address, spender: Address, amount: U256) {
        self.chain.lock().allowances.insert((owner, spender), amount);
    }

    pub fn balance(&self, owner: Address) -> U256 {
        self.chain.lock().balance(owner)
    }

    pub fn allowance(&self, owner: Address, spender: Address) -> U256 {
        self.chain.lock().allowance(owner, spender)
    }

    /// Switch chains and notify subscribers.
    pub fn switch_network(&self, network_id: u64) {
        self.chain.lock().network_id = network_id;
        let _ = self.events.send(ProviderEvent::ChainChanged(network_id));
    }

    /// Switch accounts and notify subscribers.
    pub fn switch_accounts(&self, accounts: Vec<Address>) {
        self.chain.lock().accounts = accounts.clone();
        let _ = self.events.send(ProviderEvent::AccountsChanged(accounts));
    }

    /// Make the token unreadable, as if nothing was deployed at its address.
    pub fn undeploy(&self) {
        self.chain.lock().deployed = false;
    }

    /// The user declines the next signature request.
    pub fn reject_next_send(&self) {
        self.chain.lock().scripts.push_back(SendScript::Reject);
    }

    /// The next `send()` fails before a hash is returned.
    pub fn fail_next_send(&self, error: ProviderError) {
        self.chain.lock().scripts.push_back(SendScript::Fail(error));
    }

    /// The next transaction is mined with a failure status.
    pub fn revert_next_send(&self) {
        self.chain.lock().scripts.push_back(SendScript::Revert);
    }

    /// The next transaction gets a hash but waiting for it fails.
    pub fn fail_next_wait(&self, error: ProviderError) {
        self.chain
            .lock()
            .scripts
            .push_back(SendScript::FailWait(error));
    }

    /// The next `count` reads fail with a transport error.
    pub fn fail_next_reads(&self, count: usize) {
        self.chain.lock().failing_reads = count;
    }

    /// Hold every transaction in the pending state.
    pub fn pause_mining(&self) {
        self.mining.send_replace(false);
    }

    pub fn resume_mining(&self) {
        self.mining.send_replace(true);
    }

    /// Park token reads and transfer subscriptions until
    /// [`release_reads`](Self::release_reads).
    pub fn hold_reads(&self) {
        self.reads_open.send_replace(false);
    }

    pub fn release_reads(&self) {
        self.reads_open.send_replace(true);
    }

    async fn read_gate(&self) -> Result<(), ProviderError> {
        let mut open = self.reads_open.subscribe();
        if open.wait_for(|open| *open).await.is_err() {
            return Err(ProviderError::Transport("fake chain shut down".to_string()));
        }
        Ok(())
    }

    /// Number of `balanceOf`/`allowance` reads served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of open transfer subscriptions.
    pub fn transfer_subscribers(&self) -> usize {
        let mut chain = self.chain.lock();
        chain.subscribers.retain(|(_, sender)| !sender.is_closed());
        chain.subscribers.len()
    }

    /// Emit a transfer notification that no transaction of ours produced.
    pub fn emit_transfer(&self, record: TransferRecord) {
        self.chain.lock().notify(&record);
    }
}

impl WalletProvider for FakeWallet {
    type Token = FakeToken;

    async fn network_id(&self) -> Result<u64, ProviderError> {
        Ok(self.chain.lock().network_id)
    }

    async fn accounts(&self) -> Result<Vec<Address>, ProviderError> {
        Ok(self.chain.lock().accounts.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    async fn token(&self, token: Address, signer_index: usize) -> Result<FakeToken, ProviderError> {
        let signer = self
            .chain
            .lock()
            .accounts
            .get(signer_index)
            .copied()
            .ok_or(ProviderError::SignerUnavailable(signer_index))?;

        Ok(FakeToken {
            wallet: self.clone(),
            address: token,
            signer,
        })
    }
}

/// Token handle handed out by [`FakeWallet`].
#[derive(Debug, Clone)]
pub struct FakeToken {
    wallet: FakeWallet,
    address: Address,
    signer: Address,
}

impl FakeToken {
    async fn metadata(
        &self,
        field: impl FnOnce(&FakeChain) -> String,
    ) -> Result<String, ProviderError> {
        self.wallet.read_gate().await?;
        let mut chain = self.wallet.chain.lock();
        chain.read()?;
        if !chain.deployed {
            return Err(ProviderError::Other(format!(
                "contract call to {} returned no data",
                self.address
            )));
        }
        Ok(field(&chain))
    }
}

impl TokenContract for FakeToken {
    type Submitted = FakeSubmitted;

    fn address(&self) -> Address {
        self.address
    }

    fn signer(&self) -> Address {
        self.signer
    }

    async fn name(&self) -> Result<String, ProviderError> {
        self.metadata(|chain| chain.name.clone()).await
    }

    async fn symbol(&self) -> Result<String, ProviderError> {
        self.metadata(|chain| chain.symbol.clone()).await
    }

    async fn balance_of(&self, owner: Address) -> Result<U256, ProviderError> {
        self.wallet.reads.fetch_add(1, Ordering::SeqCst);
        self.wallet.read_gate().await?;
        let mut chain = self.wallet.chain.lock();
        chain.read()?;
        Ok(chain.balance(owner))
    }

    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256, ProviderError> {
        self.wallet.reads.fetch_add(1, Ordering::SeqCst);
        self.wallet.read_gate().await?;
        let mut chain = self.wallet.chain.lock();
        chain.read()?;
        Ok(chain.allowance(owner, spender))
    }

    async fn send(&self, operation: &Operation) -> Result<FakeSubmitted, ProviderError> {
        let mut chain = self.wallet.chain.lock();

        let mut revert = false;
        let mut wait_error = None;
        match chain.scripts.pop_front() {
            Some(SendScript::Reject) => return Err(ProviderError::user_rejected()),
            Some(SendScript::Fail(error)) => return Err(error),
            Some(SendScript::Revert) => revert = true,
            Some(SendScript::FailWait(error)) => wait_error = Some(error),
            None => {}
        }

        chain.sent += 1;
        let hash = B256::left_padding_from(&chain.sent.to_be_bytes());

        Ok(FakeSubmitted {
            wallet: self.wallet.clone(),
            signer: self.signer,
            operation: *operation,
            hash,
            revert,
            wait_error,
        })
    }

    async fn subscribe_transfers(
        &self,
        filter: TransferFilter,
    ) -> Result<TransferSubscription, ProviderError> {
        self.wallet.read_gate().await?;
        let (sender, receiver) = mpsc::channel(16);
        self.wallet.chain.lock().subscribers.push((filter, sender));
        Ok(TransferSubscription::new(receiver))
    }
}

/// Transaction sent through a [`FakeToken`]; mined when awaited.
#[derive(Debug)]
pub struct FakeSubmitted {
    wallet: FakeWallet,
    signer: Address,
    operation: Operation,
    hash: TxHash,
    revert: bool,
    wait_error: Option<ProviderError>,
}

impl SubmittedTransaction for FakeSubmitted {
    fn hash(&self) -> TxHash {
        self.hash
    }

    async fn wait(self) -> Result<Receipt, ProviderError> {
        let mut mining = self.wallet.mining.subscribe();
        if mining.wait_for(|enabled| *enabled).await.is_err() {
            return Err(ProviderError::Transport("fake chain shut down".to_string()));
        }

        if let Some(error) = self.wait_error {
            return Err(error);
        }

        let mut chain = self.wallet.chain.lock();
        chain.block += 1;
        let block_number = Some(chain.block);

        let applied = if self.revert {
            Err(())
        } else {
            chain.apply(self.signer, self.operation)
        };

        let Ok(transfer) = applied else {
            return Ok(Receipt {
                hash: self.hash,
                status: false,
                block_number,
                transfers: vec![],
            });
        };

        if let Some(record) = &transfer {
            chain.notify(record);
        }

        Ok(Receipt {
            hash: self.hash,
            status: true,
            block_number,
            transfers: transfer.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const ALICE: Address = address!("a000000000000000000000000000000000000001");
    const BOB: Address = address!("b000000000000000000000000000000000000002");
    const TOKEN: Address = address!("c000000000000000000000000000000000000003");

    #[tokio::test]
    async fn test_transfer_moves_balance_when_mined() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        wallet.mint(ALICE, U256::from(100));
        let token = wallet.token(TOKEN, 0).await.unwrap();

        let submitted = token
            .send(&Operation::Transfer {
                to: BOB,
                amount: U256::from(40),
            })
            .await
            .unwrap();
        assert_eq!(wallet.balance(ALICE), U256::from(100));

        let receipt = submitted.wait().await.unwrap();
        assert!(receipt.status);
        assert_eq!(receipt.transfers.len(), 1);
        assert_eq!(wallet.balance(ALICE), U256::from(60));
        assert_eq!(wallet.balance(BOB), U256::from(40));
    }

    #[tokio::test]
    async fn test_transfer_from_consumes_allowance() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        wallet.mint(BOB, U256::from(10));
        wallet.set_allowance(BOB, ALICE, U256::from(7));
        let token = wallet.token(TOKEN, 0).await.unwrap();

        let receipt = token
            .send(&Operation::TransferFrom {
                from: BOB,
                to: ALICE,
                amount: U256::from(5),
            })
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert!(receipt.status);
        assert_eq!(wallet.allowance(BOB, ALICE), U256::from(2));
        assert_eq!(wallet.balance(ALICE), U256::from(5));
    }

    #[tokio::test]
    async fn test_insufficient_balance_reverts() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        let token = wallet.token(TOKEN, 0).await.unwrap();

        let receipt = token
            .send(&Operation::Transfer {
                to: BOB,
                amount: U256::from(1),
            })
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert!(!receipt.status);
        assert!(receipt.transfers.is_empty());
    }

    #[tokio::test]
    async fn test_held_reads_wait_for_release() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        wallet.mint(ALICE, U256::from(3));
        let token = wallet.token(TOKEN, 0).await.unwrap();

        wallet.hold_reads();
        let read = tokio::spawn(async move { token.balance_of(ALICE).await });
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert!(!read.is_finished());
        assert_eq!(wallet.read_count(), 1);

        wallet.release_reads();
        assert_eq!(read.await.unwrap().unwrap(), U256::from(3));
    }

    #[tokio::test]
    async fn test_missing_signer_is_reported() {
        let wallet = FakeWallet::new(5, vec![]);
        let result = wallet.token(TOKEN, 0).await;
        assert!(matches!(result, Err(ProviderError::SignerUnavailable(0))));
    }
}
