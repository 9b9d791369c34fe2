//! Write operations against the session token.
//!
//! [`executor::TransactionExecutor`] drives one write at a time from
//! submission to settlement; [`error::classify`] turns raw provider failures
//! into the [`error::ErrorKind`] taxonomy.

pub mod error;
pub mod executor;

pub use error::{classify, ErrorKind, TransactionError};
pub use executor::{
    Confirmation, ExecutorError, ExecutorState, PendingTransaction, Phase, Submission,
    TransactionExecutor, TransactionOutcome,
};
