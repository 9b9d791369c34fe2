pub mod config;
pub mod metrics;

use action::{ExecutorState, TransactionOutcome};
use alloy_primitives::{utils::format_units, U256};
use client::{ProviderEvent, WalletProvider};
use session::SessionSnapshot;
use std::time::Duration;
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{info, warn};

/// Format base units with `decimals` places, falling back to the raw value.
pub fn format_amount(amount: U256, decimals: u8) -> String {
    format_units(amount, decimals).unwrap_or_else(|_| amount.to_string())
}

/// Poll the wallet's chain id and publish a `ChainChanged` event when it
/// moves. JSON-RPC nodes never push this themselves.
pub fn spawn_chain_watch<W>(
    wallet: W,
    events: broadcast::Sender<ProviderEvent>,
    period: Duration,
) -> JoinHandle<()>
where
    W: WalletProvider + Clone,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last = None;
        loop {
            ticker.tick().await;

            match wallet.network_id().await {
                Ok(network_id) => {
                    if last.is_some_and(|previous| previous != network_id) {
                        info!(network_id, "Wallet network changed");
                        if events.send(ProviderEvent::ChainChanged(network_id)).is_err() {
                            break;
                        }
                    }
                    last = Some(network_id);
                }
                Err(e) => warn!(error = %e, "Failed to read wallet network"),
            }
        }
    })
}

/// Human readable view of a session snapshot.
pub fn render(snapshot: &SessionSnapshot, display_decimals: u8) -> String {
    let session = &snapshot.session;
    let mut lines = vec![format!("status: {}", session.status)];

    if let Some(address) = session.address {
        lines.push(format!("account: {address}"));
    }
    if let Some(network_id) = session.network_id {
        lines.push(format!("network: {network_id}"));
    }
    if let Some(message) = &session.network_error {
        lines.push(format!("network error: {message}"));
    }
    if let Some(message) = &session.error {
        lines.push(format!("error: {message}"));
    }

    if let Some(metadata) = &snapshot.metadata {
        lines.push(format!("token: {} ({})", metadata.name, metadata.symbol));
    }
    if let Some(balance) = &snapshot.balance {
        lines.push(format!("balance: {}", balance.amount));
        if balance.amount.is_zero() {
            lines.push(format!(
                "You don't have tokens to transfer. Ask someone to send some to {}",
                balance.holder
            ));
        }
    }
    if let Some(allowance) = &snapshot.allowance {
        lines.push(format!(
            "allowance: {} may move {} of {}",
            allowance.spender, allowance.amount, allowance.owner
        ));
    }

    lines.extend(render_transaction(&snapshot.transaction));

    if let Some(transfer) = &snapshot.latest_transfer {
        lines.push(format!(
            "transfer: {} -> {} value {}",
            transfer.from,
            transfer.to,
            format_amount(transfer.value, display_decimals)
        ));
    }

    lines.join("\n")
}

fn render_transaction(state: &ExecutorState) -> Vec<String> {
    let mut lines = Vec::new();

    if let Some(pending) = &state.pending {
        lines.push(format!("waiting for transaction {}", pending.hash));
    }
    match &state.outcome {
        Some(TransactionOutcome::Confirmed(confirmation)) => {
            lines.push(format!("transaction {} confirmed", confirmation.hash));
        }
        Some(TransactionOutcome::Reverted { hash, .. }) => {
            lines.push(format!("transaction {hash} reverted"));
        }
        Some(TransactionOutcome::Rejected) | Some(TransactionOutcome::Failed(_)) | None => {}
    }
    if let Some(error) = &state.error {
        lines.push(format!("transaction error: {error}"));
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, Address};
    use balance::Balance;
    use client::{testing::FakeWallet, TransferRecord};
    use session::{Session, SessionStatus, TokenMetadata};

    const ALICE: Address = address!("a000000000000000000000000000000000000001");
    const BOB: Address = address!("b000000000000000000000000000000000000002");
    const TOKEN: Address = address!("c000000000000000000000000000000000000003");

    fn connected() -> SessionSnapshot {
        SessionSnapshot {
            session: Session {
                address: Some(ALICE),
                network_id: Some(5),
                status: SessionStatus::Connected,
                error: None,
                network_error: None,
            },
            metadata: Some(TokenMetadata {
                name: "Test Token".to_string(),
                symbol: "TST".to_string(),
            }),
            balance: Some(Balance {
                holder: ALICE,
                asset: TOKEN,
                amount: U256::ZERO,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_format_amount_uses_display_decimals() {
        assert_eq!(format_amount(U256::from(1_500_000), 6), "1.500000");
        assert_eq!(format_amount(U256::ZERO, 6), "0.000000");
    }

    #[test]
    fn test_zero_balance_shows_hint() {
        let rendered = render(&connected(), 6);
        assert!(rendered.contains("status: connected"));
        assert!(rendered.contains("token: Test Token (TST)"));
        assert!(rendered.contains("You don't have tokens to transfer"));
    }

    #[test]
    fn test_transfer_value_is_formatted() {
        let mut snapshot = connected();
        snapshot.latest_transfer = Some(TransferRecord {
            from: ALICE,
            to: BOB,
            value: U256::from(50_000_000),
            raw: None,
        });

        let rendered = render(&snapshot, 6);
        assert!(rendered.contains("value 50.000000"));
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_watch_reports_changes_only() {
        let wallet = FakeWallet::new(5, vec![ALICE]);
        let (events, mut received) = broadcast::channel(4);
        let period = Duration::from_secs(1);

        let task = spawn_chain_watch(wallet.clone(), events, period);
        settle().await;

        time::advance(period).await;
        settle().await;
        assert!(received.try_recv().is_err());

        wallet.switch_network(1);
        time::advance(period).await;
        settle().await;
        assert_eq!(received.try_recv().unwrap(), ProviderEvent::ChainChanged(1));

        task.abort();
    }
}
