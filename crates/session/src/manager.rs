//! Session state machine.
//!
//! `Disconnected -> Connecting -> Connected`, with `NetworkMismatch` and
//! `Error` as the failure exits. Every reset bumps the session epoch under
//! the session lock; work started under an older epoch (a suspended connect,
//! transaction follow-ups) checks it before writing and gives up when it
//! changed.

use crate::{
    metadata::TokenDataCache,
    telemetry::{NoopTelemetry, Telemetry},
    types::{Session, SessionSnapshot, SessionStatus},
};
use action::{
    classify, ErrorKind, ExecutorError, ExecutorState, Submission, TransactionError,
    TransactionExecutor, TransactionOutcome,
};
use alloy_primitives::Address;
use balance::{monitor::BalanceMonitor, poller::BalancePoller, Allowance, Balance};
use client::{
    Operation, ProviderError, ProviderEvent, TokenContract, TransferRecord, WalletProvider,
};
use config::NetworkConfig;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};
use thiserror::Error;
use tokio::{
    sync::{broadcast::error::RecvError, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use watcher::EventWatcher;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("wallet session is not connected")]
    NotConnected,

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("balance read failed: {0}")]
    Read(String),
}

/// Required network plus the account selection for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub network: NetworkConfig,
    /// Index of the wallet signer writes are signed by
    pub signer_index: usize,
    /// Account chosen by the host before connecting. Falls back to the
    /// wallet's first account.
    pub selected_address: Option<Address>,
}

impl SessionConfig {
    pub const fn new(network: NetworkConfig) -> Self {
        Self {
            network,
            signer_index: 0,
            selected_address: None,
        }
    }

    pub const fn with_signer_index(mut self, signer_index: usize) -> Self {
        self.signer_index = signer_index;
        self
    }

    pub const fn with_selected_address(mut self, address: Address) -> Self {
        self.selected_address = Some(address);
        self
    }
}

/// Per-connection pieces, torn down together on reset.
struct Connection<T: TokenContract> {
    address: Address,
    token: T,
    executor: TransactionExecutor<T>,
    poller: BalancePoller<BalanceMonitor<T>>,
    watcher: EventWatcher<T>,
    forwarder: JoinHandle<()>,
}

impl<T: TokenContract> Connection<T> {
    fn shutdown(&self) {
        self.poller.clear();
        self.watcher.clear();
        self.forwarder.abort();
    }
}

impl<T: TokenContract> Drop for Connection<T> {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

struct Inner<W: WalletProvider> {
    wallet: W,
    network: NetworkConfig,
    signer_index: usize,
    selected_address: Mutex<Option<Address>>,
    session: watch::Sender<Session>,
    snapshot: watch::Sender<SessionSnapshot>,
    epoch: AtomicU64,
    metadata: TokenDataCache,
    connection: Mutex<Option<Arc<Connection<W::Token>>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    telemetry: Arc<dyn Telemetry>,
}

impl<W: WalletProvider> Inner<W> {
    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Apply `update` if no reset happened since `epoch` was read.
    fn update_session(&self, epoch: u64, update: impl FnOnce(&mut Session)) -> bool {
        let Some(status) = self.apply_session(epoch, update) else {
            return false;
        };
        self.telemetry.session_status(status);
        true
    }

    /// [`update_session`](Self::update_session) without the telemetry call,
    /// for callers holding a lock. Returns the new status when applied.
    fn apply_session(&self, epoch: u64, update: impl FnOnce(&mut Session)) -> Option<SessionStatus> {
        let mut status = None;
        self.session.send_if_modified(|session| {
            if self.epoch() != epoch {
                return false;
            }
            update(session);
            status = Some(session.status);
            true
        });
        status
    }

    fn connection(&self) -> Option<Arc<Connection<W::Token>>> {
        self.connection.lock().clone()
    }

    fn reset(&self) {
        let connection = {
            let mut slot = self.connection.lock();
            let connection = slot.take();
            self.session.send_modify(|session| {
                self.epoch.fetch_add(1, Ordering::SeqCst);
                *session = Session::default();
            });
            connection
        };

        if let Some(connection) = connection {
            connection.shutdown();
            info!(address = %connection.address, "Session reset");
        }
        self.metadata.invalidate();
        self.telemetry.session_status(SessionStatus::Disconnected);
        self.publish();
    }

    fn handle_provider_event(&self, event: ProviderEvent) {
        match event {
            ProviderEvent::AccountsChanged(accounts) => {
                info!(accounts = accounts.len(), "Wallet accounts changed, resetting session");
                // A host-selected account no longer applies
                self.selected_address.lock().take();
                self.reset();
            }
            ProviderEvent::ChainChanged(network_id) => {
                info!(network_id, "Wallet network changed, resetting session");
                if let Some(connection) = self.connection() {
                    connection.poller.stop();
                }
                self.reset();
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let connection = self.connection();
        let session = self.session.borrow().clone();

        let Some(connection) = connection else {
            return SessionSnapshot {
                session,
                ..Default::default()
            };
        };

        SessionSnapshot {
            session,
            metadata: self.metadata.get(connection.token.address()),
            balance: connection.poller.balance(),
            allowance: connection.poller.allowance(),
            transaction: connection.executor.state(),
            latest_transfer: connection.watcher.latest(),
        }
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}

impl<W: WalletProvider> Drop for Inner<W> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
        if let Some(connection) = self.connection.get_mut().take() {
            connection.shutdown();
        }
    }
}

/// Handle to a wallet session. Clones share the same session.
pub struct SessionManager<W: WalletProvider> {
    inner: Arc<Inner<W>>,
}

impl<W: WalletProvider> Clone for SessionManager<W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<W> SessionManager<W>
where
    W: WalletProvider,
{
    pub fn new(wallet: W, config: SessionConfig) -> Self {
        Self::with_telemetry(wallet, config, Arc::new(NoopTelemetry))
    }

    pub fn with_telemetry(wallet: W, config: SessionConfig, telemetry: Arc<dyn Telemetry>) -> Self {
        let (session, _) = watch::channel(Session::default());
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                wallet,
                network: config.network,
                signer_index: config.signer_index,
                selected_address: Mutex::new(config.selected_address),
                session,
                snapshot,
                epoch: AtomicU64::new(0),
                metadata: TokenDataCache::new(),
                connection: Mutex::new(None),
                listener: Mutex::new(None),
                telemetry,
            }),
        }
    }

    /// Validate the wallet's network and bind the token to the active signer.
    ///
    /// Failures are reported through the returned [`Session`]: a wrong
    /// network ends in `NetworkMismatch`, anything else in `Error`.
    pub async fn connect(&self) -> Session {
        let inner = &self.inner;
        self.listen();

        if inner.connection().is_some() {
            inner.reset();
        }
        let epoch = inner.epoch();

        let network_id = match inner.wallet.network_id().await {
            Ok(network_id) => network_id,
            Err(e) => {
                self.fail(epoch, classify(&e));
                return self.session();
            }
        };

        if network_id != inner.network.chain_id {
            let message = inner.network.mismatch_message();
            warn!(
                network_id,
                required = inner.network.chain_id,
                "Wallet is on the wrong network"
            );
            inner.update_session(epoch, |session| {
                session.status = SessionStatus::NetworkMismatch;
                session.network_id = Some(network_id);
                session.address = None;
                session.network_error = Some(message);
            });
            inner.publish();
            return self.session();
        }

        inner.update_session(epoch, |session| {
            session.status = SessionStatus::Connecting;
            session.network_id = Some(network_id);
            session.error = None;
            session.network_error = None;
        });
        inner.publish();

        let selected = *inner.selected_address.lock();
        let address = match selected {
            Some(address) => Some(address),
            None => match inner.wallet.accounts().await {
                Ok(accounts) => accounts.first().copied(),
                Err(e) => {
                    self.fail(epoch, classify(&e));
                    return self.session();
                }
            },
        };
        let Some(address) = address else {
            self.fail(
                epoch,
                TransactionError::new(ErrorKind::ConfigurationFault, "No wallet account available"),
            );
            return self.session();
        };

        let token = match inner
            .wallet
            .token(inner.network.token, inner.signer_index)
            .await
        {
            Ok(token) => token,
            Err(e @ ProviderError::SignerUnavailable(_)) => {
                let error = TransactionError::new(ErrorKind::ConfigurationFault, e.to_string());
                self.fail(epoch, error.with_raw(e));
                return self.session();
            }
            Err(e) => {
                self.fail(epoch, classify(&e));
                return self.session();
            }
        };

        if let Err(error) = inner.metadata.fetch(&token).await {
            self.fail(epoch, error);
            return self.session();
        }

        let connection = self.open(address, token);

        let installed = {
            let mut slot = inner.connection.lock();
            let status = inner.apply_session(epoch, |session| {
                session.status = SessionStatus::Connected;
                session.address = Some(address);
            });
            if status.is_some() {
                *slot = Some(connection.clone());
            }
            status
        };
        let Some(status) = installed else {
            debug!(address = %address, "Session was reset while connecting");
            return self.session();
        };
        inner.telemetry.session_status(status);

        connection.poller.start(address);
        info!(
            address = %address,
            network_id,
            token = %inner.network.token,
            "Wallet session connected"
        );

        inner.publish();
        self.session()
    }

    /// Route a wallet notification. Both kinds reset the session.
    pub fn handle_provider_event(&self, event: ProviderEvent) {
        self.inner.handle_provider_event(event);
    }

    /// Stop polling and watching, drop the token handle and return to
    /// `Disconnected`. Safe to call repeatedly.
    pub fn reset(&self) {
        self.inner.reset();
    }

    pub fn dismiss_network_error(&self) {
        if self
            .inner
            .session
            .send_if_modified(|session| session.network_error.take().is_some())
        {
            self.inner.publish();
        }
    }

    /// Clear the session error and the last transaction error.
    pub fn dismiss_error(&self) {
        self.inner
            .session
            .send_if_modified(|session| session.error.take().is_some());
        if let Some(connection) = self.inner.connection() {
            connection.executor.dismiss_error();
        }
        self.inner.publish();
    }

    /// Submit `operation`, wait for it to settle and run the follow-ups of a
    /// confirmed write.
    pub async fn execute(&self, operation: Operation) -> Result<TransactionOutcome, SessionError> {
        match self.submit(operation).await? {
            Submission::Pending(_) => self.await_settlement().await,
            Submission::Settled(outcome) => Ok(outcome),
        }
    }

    /// Sign and broadcast `operation` without waiting for it to be mined.
    pub async fn submit(&self, operation: Operation) -> Result<Submission, SessionError> {
        let connection = self.require_connection()?;

        let submission = connection.executor.submit(operation).await?;
        if let Submission::Settled(outcome) = &submission {
            self.inner.telemetry.transaction_settled(&operation, outcome);
        }

        self.inner.publish();
        Ok(submission)
    }

    /// Wait for the pending transaction. On confirmation the balance is
    /// refreshed, the allowance re-read when the write touched one, and the
    /// emitted transfer recorded and watched.
    pub async fn await_settlement(&self) -> Result<TransactionOutcome, SessionError> {
        let connection = self.require_connection()?;
        let epoch = self.inner.epoch();

        let operation = connection
            .executor
            .state()
            .operation
            .ok_or(SessionError::Executor(ExecutorError::NothingPending))?;
        let outcome = connection.executor.await_settlement().await?;

        self.inner.telemetry.transaction_settled(&operation, &outcome);
        if let TransactionOutcome::Confirmed(confirmation) = &outcome {
            self.follow_up(&connection, epoch, operation, &confirmation.transfers)
                .await;
        }

        self.inner.publish();
        Ok(outcome)
    }

    /// Read the balance now, outside the polling schedule.
    pub async fn refresh_balance(&self) -> Result<Option<Balance>, SessionError> {
        let connection = self.require_connection()?;
        let balance = connection
            .poller
            .refresh_now()
            .await
            .map_err(|e| SessionError::Read(e.to_string()))?;

        self.inner.publish();
        Ok(balance)
    }

    /// Read how much `spender` may move on behalf of the session account.
    pub async fn fetch_allowance(&self, spender: Address) -> Result<Allowance, SessionError> {
        let connection = self.require_connection()?;
        let allowance = connection
            .poller
            .fetch_allowance(connection.address, spender)
            .await
            .map_err(|e| SessionError::Read(e.to_string()))?;

        self.inner.publish();
        Ok(allowance)
    }

    pub fn session(&self) -> Session {
        self.inner.session.borrow().clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot()
    }

    /// Snapshots, republished whenever any part changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    fn require_connection(&self) -> Result<Arc<Connection<W::Token>>, SessionError> {
        self.inner.connection().ok_or(SessionError::NotConnected)
    }

    fn fail(&self, epoch: u64, error: TransactionError) {
        warn!(kind = ?error.kind, error = %error, "Wallet session failed");
        self.inner.update_session(epoch, |session| {
            session.status = SessionStatus::Error;
            session.address = None;
            session.error = Some(error.message);
        });
        self.inner.publish();
    }

    /// Subscribe to wallet notifications once per session handle.
    fn listen(&self) {
        let mut listener = self.inner.listener.lock();
        if listener.is_some() {
            return;
        }

        let mut events = self.inner.wallet.subscribe();
        let weak = Arc::downgrade(&self.inner);
        *listener = Some(tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed wallet notifications");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.handle_provider_event(event);
            }
            debug!("Wallet notification listener stopped");
        }));
    }

    fn open(&self, address: Address, token: W::Token) -> Arc<Connection<W::Token>> {
        let executor = TransactionExecutor::new(token.clone());
        let poller = BalancePoller::new(
            BalanceMonitor::new(token.clone()),
            self.inner.network.poll_interval(),
        );
        let watcher = EventWatcher::new(token.clone());

        let forwarder = spawn_forwarder(
            Arc::downgrade(&self.inner),
            poller.subscribe_balance(),
            poller.subscribe_allowance(),
            executor.subscribe(),
            watcher.subscribe(),
        );

        Arc::new(Connection {
            address,
            token,
            executor,
            poller,
            watcher,
            forwarder,
        })
    }

    async fn follow_up(
        &self,
        connection: &Connection<W::Token>,
        epoch: u64,
        operation: Operation,
        transfers: &[TransferRecord],
    ) {
        let inner = &self.inner;

        if let Err(e) = connection.poller.refresh_now().await {
            warn!(error = %e, "Balance refresh after confirmation failed");
        }
        if inner.epoch() != epoch {
            return;
        }

        let signer = connection.token.signer();
        if let Some((owner, spender)) = operation.allowance_touched(signer) {
            if let Err(e) = connection.poller.fetch_allowance(owner, spender).await {
                warn!(owner = %owner, spender = %spender, error = %e, "Allowance refresh after confirmation failed");
            }
            if inner.epoch() != epoch {
                return;
            }
        }

        let Some(filter) = operation.transfer_filter(signer) else {
            return;
        };
        if let Err(e) = connection.watcher.attach(filter).await {
            warn!(error = %e, "Failed to watch Transfer notifications");
        }
        if inner.epoch() != epoch {
            connection.watcher.detach();
            return;
        }
        if let Some(transfer) = transfers.iter().rev().find(|t| filter.matches(t)) {
            connection.watcher.record(transfer.clone());
        }
    }
}

/// Republish the snapshot whenever a connection piece changes.
fn spawn_forwarder<W: WalletProvider>(
    inner: Weak<Inner<W>>,
    mut balance: watch::Receiver<Option<Balance>>,
    mut allowance: watch::Receiver<Option<Allowance>>,
    mut transaction: watch::Receiver<ExecutorState>,
    mut transfer: watch::Receiver<Option<TransferRecord>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let (changed, polled) = tokio::select! {
                changed = balance.changed() => (changed, true),
                changed = allowance.changed() => (changed, false),
                changed = transaction.changed() => (changed, false),
                changed = transfer.changed() => (changed, false),
            };
            if changed.is_err() {
                break;
            }

            let Some(inner) = inner.upgrade() else {
                break;
            };
            if polled {
                let latest = balance.borrow_and_update().clone();
                if let Some(latest) = latest {
                    inner.telemetry.balance_updated(&latest);
                }
            }
            inner.publish();
        }
    })
}
