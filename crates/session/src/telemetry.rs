//! Hooks for exporting session activity.

use crate::types::SessionStatus;
use action::TransactionOutcome;
use balance::Balance;
use client::Operation;

/// Receives session events. Every method defaults to doing nothing.
pub trait Telemetry: Send + Sync + 'static {
    fn session_status(&self, _status: SessionStatus) {}

    fn transaction_settled(&self, _operation: &Operation, _outcome: &TransactionOutcome) {}

    fn balance_updated(&self, _balance: &Balance) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {}
