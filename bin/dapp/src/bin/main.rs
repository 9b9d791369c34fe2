//! Command-line host for the token wallet session.
//!
//! - `status`: connect and print the session once
//! - `watch`: connect and print the session whenever it changes
//! - `transfer`, `transfer-from`, `approve`: run one write and print the result
//! - `allowance`: read how much a spender may move for the session account

use action::TransactionOutcome;
use alloy_primitives::{Address, U256};
use clap::{Parser, Subcommand};
use client::{Operation, WalletProvider};
use dapp::{
    config::Config,
    metrics::{install_prometheus_exporter, Metrics},
    render, spawn_chain_watch,
};
use session::{SessionManager, SessionStatus};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "dapp")]
#[command(about = "Wallet session client for the configured ERC20 token")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// TOML file with network settings, replacing the config's `[network]` table
    #[arg(long)]
    network_file: Option<String>,

    /// Private key for signing transactions (hex string, with or without 0x prefix)
    #[arg(short = 'k', long, env = "PRIVATE_KEY")]
    private_key: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the session once
    Status,

    /// Print the session whenever it changes, until Ctrl-C
    Watch,

    /// Transfer tokens from the session signer
    Transfer {
        to: Address,
        /// Amount in base units
        #[arg(value_parser = parse_amount)]
        amount: U256,
    },

    /// Transfer tokens out of an account that approved the session signer
    TransferFrom {
        from: Address,
        to: Address,
        /// Amount in base units
        #[arg(value_parser = parse_amount)]
        amount: U256,
    },

    /// Let a spender move tokens of the session signer
    Approve {
        spender: Address,
        /// Amount in base units
        #[arg(value_parser = parse_amount)]
        amount: U256,
    },

    /// Read how much a spender may move for the session account
    Allowance { spender: Address },
}

fn parse_amount(value: &str) -> Result<U256, String> {
    value
        .parse::<U256>()
        .map_err(|e| format!("invalid amount {value:?}: {e}"))
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_file(&cli.config)?;
    if let Some(path) = &cli.network_file {
        config = config.with_network_file(path)?;
    }
    init_tracing(config.json_logs);

    let network = config.network_config()?;
    info!(
        network = %network.name,
        chain_id = network.chain_id,
        token = %network.token,
        "Loaded config"
    );

    if let Some(port) = config.metrics_port {
        install_prometheus_exporter(port)?;
        info!(port, "Prometheus exporter listening");
    }

    let wallet = client::create_wallet_provider(&config.rpc_url, &cli.private_key)?;
    let chain_watch = spawn_chain_watch(wallet.clone(), wallet.events(), network.poll_interval());

    let decimals = network.display_decimals;
    let manager = SessionManager::with_telemetry(
        wallet,
        config.session_config(network),
        Arc::new(Metrics::new()),
    );

    let session = manager.connect().await;
    let result = if session.is_connected() {
        run(&manager, cli.command, decimals).await
    } else {
        println!("{}", render(&manager.snapshot(), decimals));
        Err(eyre::eyre!("wallet session is {}", session.status))
    };

    chain_watch.abort();
    manager.reset();
    result
}

async fn run<W: WalletProvider>(
    manager: &SessionManager<W>,
    command: Command,
    decimals: u8,
) -> eyre::Result<()> {
    match command {
        Command::Status => {
            manager.refresh_balance().await?;
            println!("{}", render(&manager.snapshot(), decimals));
        }
        Command::Watch => watch(manager, decimals).await?,
        Command::Transfer { to, amount } => {
            execute(manager, Operation::Transfer { to, amount }, decimals).await?;
        }
        Command::TransferFrom { from, to, amount } => {
            execute(manager, Operation::TransferFrom { from, to, amount }, decimals).await?;
        }
        Command::Approve { spender, amount } => {
            execute(manager, Operation::Approve { spender, amount }, decimals).await?;
        }
        Command::Allowance { spender } => {
            let allowance = manager.fetch_allowance(spender).await?;
            println!(
                "{} may move {} of {}",
                allowance.spender, allowance.amount, allowance.owner
            );
        }
    }

    Ok(())
}

async fn execute<W: WalletProvider>(
    manager: &SessionManager<W>,
    operation: Operation,
    decimals: u8,
) -> eyre::Result<()> {
    info!(operation = %operation, "Sending transaction");
    let outcome = manager.execute(operation).await?;
    println!("{}", render(&manager.snapshot(), decimals));

    match outcome {
        TransactionOutcome::Confirmed(_) => Ok(()),
        TransactionOutcome::Rejected => {
            info!("Transaction rejected");
            Ok(())
        }
        TransactionOutcome::Reverted { reason, .. } => Err(eyre::eyre!(reason)),
        TransactionOutcome::Failed(error) => Err(error.into()),
    }
}

async fn watch<W: WalletProvider>(manager: &SessionManager<W>, decimals: u8) -> eyre::Result<()> {
    let mut snapshots = manager.subscribe();
    println!("{}\n", render(&snapshots.borrow_and_update(), decimals));

    loop {
        let changed = tokio::select! {
            changed = snapshots.changed() => changed,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        };
        changed?;

        let snapshot = snapshots.borrow_and_update().clone();
        println!("{}\n", render(&snapshot, decimals));

        // A network switch resets the session; validate the new network
        if snapshot.session.status == SessionStatus::Disconnected {
            info!("Session reset, reconnecting");
            manager.connect().await;
        }
    }

    Ok(())
}
