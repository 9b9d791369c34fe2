//! Wallet session for the configured token.
//!
//! [`SessionManager`] validates the wallet's network, binds the token to the
//! active signer and owns the per-connection pieces: the
//! [`action::TransactionExecutor`], the [`balance::poller::BalancePoller`]
//! and the [`watcher::EventWatcher`]. Everything a presentation layer needs
//! is exposed as one [`SessionSnapshot`].

pub mod manager;
pub mod metadata;
pub mod telemetry;
pub mod types;

pub use manager::{SessionConfig, SessionError, SessionManager};
pub use metadata::{TokenDataCache, TokenMetadata};
pub use telemetry::{NoopTelemetry, Telemetry};
pub use types::{Session, SessionSnapshot, SessionStatus};
