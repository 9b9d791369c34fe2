//! Contract bindings for the token the session talks to.
//!
//! All bindings are generated using alloy's `sol!` macro.

pub mod token;
