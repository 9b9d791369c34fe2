//! Errors surfaced by the wallet provider adapter.
//!
//! Alloy errors are flattened into [`ProviderError`] so that nothing above
//! this crate has to inspect transport or JSON-RPC shapes.

use alloy_provider::PendingTransactionError;
use alloy_transport::TransportError;
use serde_json::Value;
use thiserror::Error;

/// EIP-1193 code returned when the user declines a signature request.
pub const USER_REJECTED_CODE: i64 = 4001;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The node or wallet answered with a JSON-RPC error object
    #[error("JSON-RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        /// Optional `data` member of the error object
        data: Option<Value>,
    },

    /// No response was received (connection refused, timeout, ...)
    #[error("transport error: {0}")]
    Transport(String),

    /// The wallet has no signer at the requested index
    #[error("no signer available at index {0}")]
    SignerUnavailable(usize),

    /// Anything else (decoding failures, missing contract code, ...)
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// The error a wallet returns when the user declines to sign.
    pub fn user_rejected() -> Self {
        Self::Rpc {
            code: USER_REJECTED_CODE,
            message: "User denied transaction signature.".to_string(),
            data: None,
        }
    }

    /// JSON-RPC error code, if any.
    pub const fn code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Message nested under the error's `data` member, if present.
    pub fn data_message(&self) -> Option<&str> {
        match self {
            Self::Rpc {
                data: Some(data), ..
            } => data.get("message").and_then(Value::as_str),
            _ => None,
        }
    }
}

impl From<TransportError> for ProviderError {
    fn from(err: TransportError) -> Self {
        if let Some(payload) = err.as_error_resp() {
            return Self::Rpc {
                code: payload.code,
                message: payload.message.to_string(),
                data: payload
                    .data
                    .as_deref()
                    .and_then(|raw| serde_json::from_str(raw.get()).ok()),
            };
        }

        if err.is_transport_error() {
            return Self::Transport(err.to_string());
        }

        Self::Other(err.to_string())
    }
}

impl From<PendingTransactionError> for ProviderError {
    fn from(err: PendingTransactionError) -> Self {
        match err {
            PendingTransactionError::TransportError(err) => err.into(),
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<alloy_contract::Error> for ProviderError {
    fn from(err: alloy_contract::Error) -> Self {
        match err {
            alloy_contract::Error::TransportError(err) => err.into(),
            alloy_contract::Error::PendingTransactionError(err) => err.into(),
            other => Self::Other(other.to_string()),
        }
    }
}
