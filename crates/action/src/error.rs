//! Classification of raw provider errors.
//!
//! Downstream code only ever sees [`TransactionError`]; the raw provider
//! error is kept alongside for diagnostics.

use client::{ProviderError, USER_REJECTED_CODE};
use thiserror::Error;

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The user declined to sign. Never shown as an error.
    UserRejected,
    /// The transaction failed on chain.
    Reverted,
    /// RPC or transport failure.
    NetworkFault,
    /// Wrong network or unreadable token metadata.
    ConfigurationFault,
    /// Anything unrecognized.
    Unknown,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct TransactionError {
    pub kind: ErrorKind,
    pub message: String,
    pub raw: Option<ProviderError>,
}

impl TransactionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raw: None,
        }
    }

    pub fn with_raw(mut self, raw: ProviderError) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn is_user_rejection(&self) -> bool {
        self.kind == ErrorKind::UserRejected
    }
}

/// Map a raw provider error onto [`ErrorKind`]. Never fails.
///
/// Rules, first match wins:
/// 1. the user-rejection sentinel code
/// 2. a nested `data.message`: reverted when it mentions a revert, otherwise a network fault
/// 3. a transport failure with no JSON-RPC response is a network fault
/// 4. anything else is unknown, with the top-level message
///
/// Rule 3 is an addition to the usual three-rule order, where every error
/// without a nested message is unknown. A dropped connection never reached
/// the node, so it is reported as a network fault instead.
pub fn classify(raw: &ProviderError) -> TransactionError {
    if raw.code() == Some(USER_REJECTED_CODE) {
        return TransactionError::new(ErrorKind::UserRejected, raw.to_string()).with_raw(raw.clone());
    }

    if let Some(nested) = raw.data_message() {
        let kind = if nested.to_ascii_lowercase().contains("revert") {
            ErrorKind::Reverted
        } else {
            ErrorKind::NetworkFault
        };
        return TransactionError::new(kind, nested).with_raw(raw.clone());
    }

    let (kind, message) = match raw {
        ProviderError::Transport(message) => (ErrorKind::NetworkFault, message.clone()),
        ProviderError::Rpc { message, .. } => (ErrorKind::Unknown, message.clone()),
        other => (ErrorKind::Unknown, other.to_string()),
    };

    TransactionError::new(kind, message).with_raw(raw.clone())
}
