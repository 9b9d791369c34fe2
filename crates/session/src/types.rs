use crate::metadata::TokenMetadata;
use action::ExecutorState;
use alloy_primitives::Address;
use balance::{Allowance, Balance};
use client::TransferRecord;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The wallet is on another network than the one required
    NetworkMismatch,
    Error,
}

impl SessionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::NetworkMismatch => "network_mismatch",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wallet connection as seen by the user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    /// Active account, set once connected
    pub address: Option<Address>,
    /// Network the wallet reported during the last connect
    pub network_id: Option<u64>,
    pub status: SessionStatus,
    /// Dismissible error message
    pub error: Option<String>,
    /// Dismissible "switch network" message
    pub network_error: Option<String>,
}

impl Session {
    pub const fn is_connected(&self) -> bool {
        matches!(self.status, SessionStatus::Connected)
    }
}

/// Everything a presentation layer renders, read in one go.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub session: Session,
    pub metadata: Option<TokenMetadata>,
    pub balance: Option<Balance>,
    pub allowance: Option<Allowance>,
    pub transaction: ExecutorState,
    pub latest_transfer: Option<TransferRecord>,
}
