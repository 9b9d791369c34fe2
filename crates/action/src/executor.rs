//! Transaction lifecycle: `Idle -> Submitted -> Pending -> Idle`.
//!
//! The terminal result of every write is kept as the last
//! [`TransactionOutcome`]. At most one write is in flight per executor; a
//! second `submit()` before the first settles is refused with
//! [`ExecutorError::Busy`].

use crate::error::{classify, ErrorKind, TransactionError};
use alloy_primitives::TxHash;
use client::{Operation, SubmittedTransaction, TokenContract, TransferRecord};
use parking_lot::Mutex;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    /// Waiting for the wallet to sign and broadcast
    Submitted,
    /// Broadcast, waiting to be mined
    Pending,
}

/// A broadcast write that has not settled yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub hash: TxHash,
    pub submitted_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub hash: TxHash,
    pub block_number: Option<u64>,
    /// Transfer notifications found in the receipt
    pub transfers: Vec<TransferRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome {
    Confirmed(Confirmation),
    /// Mined with a failure status. The cause is not recoverable from the receipt.
    Reverted { hash: TxHash, reason: String },
    /// The user declined to sign
    Rejected,
    Failed(TransactionError),
}

/// Read-only view of the executor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutorState {
    pub phase: Phase,
    /// Operation currently in flight
    pub operation: Option<Operation>,
    pub pending: Option<PendingTransaction>,
    /// Result of the last settled write
    pub outcome: Option<TransactionOutcome>,
    /// Dismissible error from the last settled write
    pub error: Option<TransactionError>,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("a transaction is already in flight")]
    Busy,

    #[error("no transaction is pending")]
    NothingPending,
}

/// What `submit()` ended with.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Broadcast; call `await_settlement()` next
    Pending(TxHash),
    /// Settled before a hash was returned (rejected or failed)
    Settled(TransactionOutcome),
}

/// Resets the executor to idle unless disarmed, so a dropped future never
/// leaves a stale in-flight marker behind.
struct InFlight<'a> {
    state: &'a watch::Sender<ExecutorState>,
    armed: bool,
}

impl<'a> InFlight<'a> {
    const fn new(state: &'a watch::Sender<ExecutorState>) -> Self {
        Self { state, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!("Transaction future dropped before settlement, clearing in-flight state");
        self.state.send_modify(|state| {
            state.phase = Phase::Idle;
            state.operation = None;
            state.pending = None;
        });
    }
}

/// Drives writes against one signer-bound token handle.
pub struct TransactionExecutor<T: TokenContract> {
    token: T,
    state: watch::Sender<ExecutorState>,
    submitted: Mutex<Option<(Operation, T::Submitted)>>,
}

impl<T> TransactionExecutor<T>
where
    T: TokenContract,
{
    pub fn new(token: T) -> Self {
        let (state, _) = watch::channel(ExecutorState::default());
        Self {
            token,
            state,
            submitted: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ExecutorState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecutorState> {
        self.state.subscribe()
    }

    pub fn is_idle(&self) -> bool {
        self.state.borrow().phase == Phase::Idle
    }

    /// Sign and broadcast `operation`.
    ///
    /// A user rejection settles as [`TransactionOutcome::Rejected`] without
    /// recording an error; any other send failure settles as
    /// [`TransactionOutcome::Failed`] with the classified error stored.
    pub async fn submit(&self, operation: Operation) -> Result<Submission, ExecutorError> {
        let claimed = self.state.send_if_modified(|state| {
            if state.phase != Phase::Idle {
                return false;
            }
            state.phase = Phase::Submitted;
            state.operation = Some(operation);
            state.error = None;
            true
        });
        if !claimed {
            warn!(operation = %operation, "Refusing to submit while a transaction is in flight");
            return Err(ExecutorError::Busy);
        }

        let guard = InFlight::new(&self.state);
        info!(operation = %operation, signer = %self.token.signer(), "Submitting transaction");

        match self.token.send(&operation).await {
            Ok(submitted) => {
                let hash = submitted.hash();
                *self.submitted.lock() = Some((operation, submitted));
                self.state.send_modify(|state| {
                    state.phase = Phase::Pending;
                    state.pending = Some(PendingTransaction {
                        hash,
                        submitted_at: SystemTime::now(),
                    });
                });
                guard.disarm();

                info!(tx_hash = %hash, operation = operation.name(), "Transaction pending");
                Ok(Submission::Pending(hash))
            }
            Err(raw) => {
                let error = classify(&raw);
                let outcome = if error.is_user_rejection() {
                    debug!(operation = operation.name(), "Transaction rejected by user");
                    TransactionOutcome::Rejected
                } else {
                    warn!(
                        operation = operation.name(),
                        kind = ?error.kind,
                        error = %error,
                        "Transaction submission failed"
                    );
                    TransactionOutcome::Failed(error)
                };

                self.settle(outcome.clone());
                guard.disarm();
                Ok(Submission::Settled(outcome))
            }
        }
    }

    /// Wait for the pending transaction to be mined and record the outcome.
    pub async fn await_settlement(&self) -> Result<TransactionOutcome, ExecutorError> {
        let taken = self.submitted.lock().take();
        let Some((operation, submitted)) = taken else {
            return Err(ExecutorError::NothingPending);
        };

        let hash = submitted.hash();
        let guard = InFlight::new(&self.state);

        let outcome = match submitted.wait().await {
            Ok(receipt) if receipt.status => {
                info!(
                    tx_hash = %receipt.hash,
                    block_number = receipt.block_number,
                    transfers = receipt.transfers.len(),
                    "Transaction confirmed"
                );
                TransactionOutcome::Confirmed(Confirmation {
                    hash: receipt.hash,
                    block_number: receipt.block_number,
                    transfers: receipt.transfers,
                })
            }
            Ok(receipt) => {
                let reason = format!("{} transaction failed", operation.name());
                warn!(tx_hash = %receipt.hash, block_number = receipt.block_number, "Transaction reverted");
                TransactionOutcome::Reverted {
                    hash: receipt.hash,
                    reason,
                }
            }
            Err(raw) => {
                let error = classify(&raw);
                if error.is_user_rejection() {
                    TransactionOutcome::Rejected
                } else {
                    warn!(tx_hash = %hash, kind = ?error.kind, error = %error, "Waiting for transaction failed");
                    TransactionOutcome::Failed(error)
                }
            }
        };

        self.settle(outcome.clone());
        guard.disarm();
        Ok(outcome)
    }

    /// `submit()` followed by `await_settlement()`.
    pub async fn execute(&self, operation: Operation) -> Result<TransactionOutcome, ExecutorError> {
        match self.submit(operation).await? {
            Submission::Pending(_) => self.await_settlement().await,
            Submission::Settled(outcome) => Ok(outcome),
        }
    }

    /// Clear the stored error. The last outcome and phase are left alone.
    pub fn dismiss_error(&self) {
        self.state.send_if_modified(|state| state.error.take().is_some());
    }

    fn settle(&self, outcome: TransactionOutcome) {
        let error = match &outcome {
            TransactionOutcome::Reverted { reason, .. } => {
                Some(TransactionError::new(ErrorKind::Reverted, reason.clone()))
            }
            TransactionOutcome::Failed(error) => Some(error.clone()),
            TransactionOutcome::Confirmed(_) | TransactionOutcome::Rejected => None,
        };

        self.state.send_modify(|state| {
            state.phase = Phase::Idle;
            state.operation = None;
            state.pending = None;
            state.error = error;
            state.outcome = Some(outcome);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, Address, U256};
    use client::{testing::FakeToken, testing::FakeWallet, ProviderError, WalletProvider};
    use futures::FutureExt;
    use serde_json::json;

    const ALICE: Address = address!("a000000000000000000000000000000000000001");
    const BOB: Address = address!("b000000000000000000000000000000000000002");
    const TOKEN: Address = address!("c000000000000000000000000000000000000003");

    async fn executor(wallet: &FakeWallet) -> TransactionExecutor<FakeToken> {
        TransactionExecutor::new(wallet.token(TOKEN, 0).await.unwrap())
    }

    fn transfer(amount: u64) -> Operation {
        Operation::Transfer {
            to: BOB,
            amount: U256::from(amount),
        }
    }

    #[tokio::test]
    async fn test_confirmed_transfer_clears_pending() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        wallet.mint(ALICE, U256::from(100));
        let executor = executor(&wallet).await;

        let Submission::Pending(hash) = executor.submit(transfer(50)).await.unwrap() else {
            panic!("expected a pending submission");
        };
        let state = executor.state();
        assert_eq!(state.phase, Phase::Pending);
        assert_eq!(state.pending.as_ref().map(|p| p.hash), Some(hash));

        let outcome = executor.await_settlement().await.unwrap();
        let TransactionOutcome::Confirmed(confirmation) = outcome else {
            panic!("expected confirmation, got {outcome:?}");
        };
        assert_eq!(confirmation.hash, hash);
        assert_eq!(confirmation.transfers[0].value, U256::from(50));

        let state = executor.state();
        assert_eq!(state.phase, Phase::Idle);
        assert!(state.pending.is_none());
        assert!(state.error.is_none());
        assert_eq!(wallet.balance(BOB), U256::from(50));
    }

    #[tokio::test]
    async fn test_failed_receipt_is_reverted_with_generic_reason() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        wallet.mint(ALICE, U256::from(100));
        wallet.revert_next_send();
        let executor = executor(&wallet).await;

        let outcome = executor.execute(transfer(50)).await.unwrap();
        assert!(matches!(
            &outcome,
            TransactionOutcome::Reverted { reason, .. } if reason == "transfer transaction failed"
        ));

        let state = executor.state();
        assert!(state.pending.is_none());
        assert_eq!(state.error.map(|e| e.kind), Some(ErrorKind::Reverted));
        assert_eq!(wallet.balance(ALICE), U256::from(100));
    }

    #[tokio::test]
    async fn test_user_rejection_leaves_no_error() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        wallet.mint(ALICE, U256::from(100));
        wallet.reject_next_send();
        let executor = executor(&wallet).await;

        let submission = executor.submit(transfer(1)).await.unwrap();
        assert_eq!(submission, Submission::Settled(TransactionOutcome::Rejected));

        let state = executor.state();
        assert!(state.error.is_none());
        assert!(state.pending.is_none());
        assert_eq!(state.phase, Phase::Idle);
    }

    #[tokio::test]
    async fn test_send_failure_is_classified_and_dismissible() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        wallet.fail_next_send(ProviderError::Rpc {
            code: -32603,
            message: "Internal JSON-RPC error.".into(),
            data: Some(json!({ "message": "execution reverted: ERC20: transfer amount exceeds balance" })),
        });
        let executor = executor(&wallet).await;

        let outcome = executor.execute(transfer(1)).await.unwrap();
        let TransactionOutcome::Failed(error) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(error.kind, ErrorKind::Reverted);
        assert_eq!(
            error.message,
            "execution reverted: ERC20: transfer amount exceeds balance"
        );

        assert!(executor.state().error.is_some());
        executor.dismiss_error();
        let state = executor.state();
        assert!(state.error.is_none());
        assert!(matches!(state.outcome, Some(TransactionOutcome::Failed(_))));
    }

    #[tokio::test]
    async fn test_wait_failure_is_failed_outcome() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        wallet.mint(ALICE, U256::from(10));
        wallet.fail_next_wait(ProviderError::Transport("connection closed".into()));
        let executor = executor(&wallet).await;

        let outcome = executor.execute(transfer(1)).await.unwrap();
        assert!(matches!(
            outcome,
            TransactionOutcome::Failed(TransactionError { kind: ErrorKind::NetworkFault, .. })
        ));
        assert!(executor.state().pending.is_none());
    }

    #[tokio::test]
    async fn test_second_submit_while_pending_is_refused() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        wallet.mint(ALICE, U256::from(100));
        wallet.pause_mining();
        let executor = executor(&wallet).await;

        let Submission::Pending(first) = executor.submit(transfer(10)).await.unwrap() else {
            panic!("expected a pending submission");
        };
        assert_eq!(executor.submit(transfer(20)).await, Err(ExecutorError::Busy));
        assert_eq!(executor.state().pending.map(|p| p.hash), Some(first));

        wallet.resume_mining();
        let outcome = executor.await_settlement().await.unwrap();
        assert!(matches!(outcome, TransactionOutcome::Confirmed(c) if c.hash == first));
        assert_eq!(wallet.balance(BOB), U256::from(10));
    }

    #[tokio::test]
    async fn test_dropped_settlement_clears_pending() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        wallet.mint(ALICE, U256::from(100));
        wallet.pause_mining();
        let executor = executor(&wallet).await;

        executor.submit(transfer(10)).await.unwrap();
        assert!(executor.await_settlement().now_or_never().is_none());

        let state = executor.state();
        assert!(state.pending.is_none());
        assert_eq!(state.phase, Phase::Idle);
        assert!(executor.is_idle());
    }

    #[tokio::test]
    async fn test_settlement_without_submission() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        let executor = executor(&wallet).await;
        assert_eq!(
            executor.await_settlement().await,
            Err(ExecutorError::NothingPending)
        );
    }
}
