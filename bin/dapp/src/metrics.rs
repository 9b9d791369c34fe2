//! Prometheus metrics for the dapp.
//!
//! [`Metrics`] implements the session [`Telemetry`] hook, so everything is
//! recorded from inside the session.

use action::TransactionOutcome;
use alloy_primitives::U256;
use balance::Balance;
use client::Operation;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use session::{SessionStatus, Telemetry};

/// Aggregated metrics for the dapp.
///
/// Metrics are registered with the global metrics registry on creation.
#[derive(Debug, Clone)]
pub struct Metrics {
    _private: (),
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance and register all metric descriptions.
    pub fn new() -> Self {
        Self::register_descriptions();
        Self { _private: () }
    }

    fn register_descriptions() {
        // Session metrics
        describe_counter!(
            "dapp_session_transitions_total",
            "Session status transitions by target status"
        );
        describe_gauge!(
            "dapp_session_connected",
            "1 while the wallet session is connected"
        );

        // Transaction metrics
        describe_counter!(
            "dapp_transactions_total",
            "Settled transactions by operation and outcome"
        );

        // Balance metrics
        describe_gauge!(
            "dapp_token_balance",
            "Last polled token balance of the session account in base units"
        );
    }
}

/// Label for a settled transaction.
pub const fn outcome_label(outcome: &TransactionOutcome) -> &'static str {
    match outcome {
        TransactionOutcome::Confirmed(_) => "confirmed",
        TransactionOutcome::Reverted { .. } => "reverted",
        TransactionOutcome::Rejected => "rejected",
        TransactionOutcome::Failed(_) => "failed",
    }
}

fn lossy(amount: U256) -> f64 {
    u128::try_from(amount).unwrap_or(u128::MAX) as f64
}

impl Telemetry for Metrics {
    fn session_status(&self, status: SessionStatus) {
        counter!("dapp_session_transitions_total", "status" => status.as_str()).increment(1);
        let connected = if status == SessionStatus::Connected { 1.0 } else { 0.0 };
        gauge!("dapp_session_connected").set(connected);
    }

    fn transaction_settled(&self, operation: &Operation, outcome: &TransactionOutcome) {
        counter!(
            "dapp_transactions_total",
            "operation" => operation.name(),
            "outcome" => outcome_label(outcome)
        )
        .increment(1);
    }

    fn balance_updated(&self, balance: &Balance) {
        gauge!("dapp_token_balance").set(lossy(balance.amount));
    }
}

/// Install the Prometheus metrics exporter and start the HTTP server.
///
/// Returns an error if the server fails to bind to the specified port.
pub fn install_prometheus_exporter(port: u16) -> eyre::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::net::SocketAddr;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| eyre::eyre!("Failed to install Prometheus exporter: {}", e))?;

    Ok(())
}
