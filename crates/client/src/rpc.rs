//! Alloy-backed wallet provider.
//!
//! Reads go through `eth_call`, writes are signed by the provider's wallet
//! filler and tracked with `get_receipt()`. Account and chain changes are not
//! observable over plain JSON-RPC, so the host feeds them through
//! [`AlloyWallet::events`].

use crate::{
    wallet::{
        Operation, ProviderEvent, Receipt, SubmittedTransaction, TokenContract, TransferFilter,
        TransferRecord, TransferSubscription, WalletProvider,
    },
    ProviderError,
};
use alloy_network::Ethereum;
use alloy_primitives::{Address, TxHash, U256};
use alloy_provider::{PendingTransactionBuilder, Provider};
use alloy_rpc_types_eth::Log;
use alloy_sol_types::SolEvent;
use binding::token::IERC20;
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio_retry::{strategy::ExponentialBackoff, Retry};
use tracing::{debug, warn};

const EVENT_CHANNEL_CAPACITY: usize = 16;
const TRANSFER_CHANNEL_CAPACITY: usize = 64;

/// Wallet provider over an alloy [`Provider`].
#[derive(Debug, Clone)]
pub struct AlloyWallet<P> {
    provider: P,
    signers: Vec<Address>,
    events: broadcast::Sender<ProviderEvent>,
}

impl<P> AlloyWallet<P>
where
    P: Provider + Clone + 'static,
{
    /// Wrap `provider`. `signers` are the accounts its wallet can sign for;
    /// when empty the node's `eth_accounts` is used instead.
    pub fn new(provider: P, signers: Vec<Address>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            provider,
            signers,
            events,
        }
    }

    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Sender used to publish account/chain changes to subscribers.
    pub fn events(&self) -> broadcast::Sender<ProviderEvent> {
        self.events.clone()
    }
}

impl<P> WalletProvider for AlloyWallet<P>
where
    P: Provider + Clone + 'static,
{
    type Token = AlloyToken<P>;

    async fn network_id(&self) -> Result<u64, ProviderError> {
        Ok(self.provider.get_chain_id().await?)
    }

    async fn accounts(&self) -> Result<Vec<Address>, ProviderError> {
        if !self.signers.is_empty() {
            return Ok(self.signers.clone());
        }
        Ok(self.provider.get_accounts().await?)
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    async fn token(
        &self,
        token: Address,
        signer_index: usize,
    ) -> Result<AlloyToken<P>, ProviderError> {
        let accounts = self.accounts().await?;
        let signer = accounts
            .get(signer_index)
            .copied()
            .ok_or(ProviderError::SignerUnavailable(signer_index))?;

        debug!(token = %token, signer = %signer, "Bound token contract to signer");

        Ok(AlloyToken {
            provider: self.provider.clone(),
            address: token,
            signer,
        })
    }
}

/// ERC20 handle bound to one signer.
#[derive(Debug, Clone)]
pub struct AlloyToken<P> {
    provider: P,
    address: Address,
    signer: Address,
}

impl<P> TokenContract for AlloyToken<P>
where
    P: Provider + Clone + 'static,
{
    type Submitted = AlloySubmitted;

    fn address(&self) -> Address {
        self.address
    }

    fn signer(&self) -> Address {
        self.signer
    }

    async fn name(&self) -> Result<String, ProviderError> {
        let contract = IERC20::new(self.address, &self.provider);
        Ok(contract.name().call().await?)
    }

    async fn symbol(&self) -> Result<String, ProviderError> {
        let contract = IERC20::new(self.address, &self.provider);
        Ok(contract.symbol().call().await?)
    }

    async fn balance_of(&self, owner: Address) -> Result<U256, ProviderError> {
        let contract = IERC20::new(self.address, &self.provider);
        Ok(contract.balanceOf(owner).call().await?)
    }

    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256, ProviderError> {
        let contract = IERC20::new(self.address, &self.provider);
        Ok(contract.allowance(owner, spender).call().await?)
    }

    async fn send(&self, operation: &Operation) -> Result<AlloySubmitted, ProviderError> {
        let contract = IERC20::new(self.address, &self.provider);

        let pending = match *operation {
            Operation::Transfer { to, amount } => {
                contract.transfer(to, amount).from(self.signer).send().await?
            }
            Operation::TransferFrom { from, to, amount } => {
                contract
                    .transferFrom(from, to, amount)
                    .from(self.signer)
                    .send()
                    .await?
            }
            Operation::Approve { spender, amount } => {
                contract
                    .approve(spender, amount)
                    .from(self.signer)
                    .send()
                    .await?
            }
        };

        debug!(tx_hash = %pending.tx_hash(), operation = %operation, "Transaction broadcast");

        Ok(AlloySubmitted {
            token: self.address,
            pending,
        })
    }

    async fn subscribe_transfers(
        &self,
        filter: TransferFilter,
    ) -> Result<TransferSubscription, ProviderError> {
        let contract = IERC20::new(self.address, self.provider.clone());

        let mut event = contract.Transfer_filter();
        if let Some(from) = filter.from {
            event = event.topic1(from.into_word());
        }
        if let Some(to) = filter.to {
            event = event.topic2(to.into_word());
        }

        // eth_newFilter is flaky on some public endpoints
        let retry_strategy = ExponentialBackoff::from_millis(100).take(3);
        let poller = Retry::spawn(retry_strategy, || async {
            event.watch().await.map_err(|e| {
                warn!(error = %e, "Transfer filter install failed, will retry");
                e
            })
        })
        .await?;

        let (sender, receiver) = mpsc::channel(TRANSFER_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut stream = Box::pin(poller.into_stream());
            while let Some(item) = stream.next().await {
                match item {
                    Ok((transfer, log)) => {
                        let record = TransferRecord {
                            from: transfer.from,
                            to: transfer.to,
                            value: transfer.value,
                            raw: Some(log),
                        };
                        if sender.send(record).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to decode Transfer notification"),
                }
            }
            debug!("Transfer subscription closed");
        });

        Ok(TransferSubscription::new(receiver))
    }
}

/// Broadcast transaction awaiting its receipt.
pub struct AlloySubmitted {
    token: Address,
    pending: PendingTransactionBuilder<Ethereum>,
}

impl SubmittedTransaction for AlloySubmitted {
    fn hash(&self) -> TxHash {
        *self.pending.tx_hash()
    }

    async fn wait(self) -> Result<Receipt, ProviderError> {
        let token = self.token;
        let receipt = self.pending.get_receipt().await?;

        let transfers = receipt
            .logs()
            .iter()
            .filter(|log| log.address() == token)
            .filter_map(decode_transfer)
            .collect();

        Ok(Receipt {
            hash: receipt.transaction_hash,
            status: receipt.status(),
            block_number: receipt.block_number,
            transfers,
        })
    }
}

fn decode_transfer(log: &Log) -> Option<TransferRecord> {
    let event = IERC20::Transfer::decode_log(&log.inner).ok()?;
    Some(TransferRecord {
        from: event.from,
        to: event.to,
        value: event.value,
        raw: Some(log.clone()),
    })
}
