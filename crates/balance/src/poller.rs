//! Periodic balance refresh for the active account.
//!
//! Every write to the cached balance happens inside the watch channel's
//! write lock and checks the poller generation first. `stop()` bumps the
//! generation under that same lock, so a read that resolves after `stop()`
//! never lands.

use crate::{Allowance, Balance, Monitor};
use alloy_primitives::Address;
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

/// Poll state shared with the timer task.
#[derive(Debug)]
struct Shared {
    balance: watch::Sender<Option<Balance>>,
    generation: AtomicU64,
}

impl Shared {
    /// Store `balance` if `generation` is still current.
    fn store(&self, generation: u64, balance: Balance) -> bool {
        self.balance.send_if_modified(|slot| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            if slot.as_ref() == Some(&balance) {
                return false;
            }
            *slot = Some(balance);
            true
        })
    }

    /// Invalidate every in-flight read. Returns the new generation.
    fn bump(&self) -> u64 {
        let mut next = 0;
        self.balance.send_if_modified(|_| {
            next = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            false
        });
        next
    }
}

#[derive(Debug)]
struct Running {
    holder: Address,
    generation: u64,
    task: JoinHandle<()>,
}

/// Shortest period the timer accepts; `interval(0)` panics.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Keeps one holder's balance fresh until stopped.
#[derive(Debug)]
pub struct BalancePoller<M> {
    monitor: M,
    interval: Duration,
    shared: Arc<Shared>,
    allowance: watch::Sender<Option<Allowance>>,
    running: Mutex<Option<Running>>,
}

impl<M> BalancePoller<M>
where
    M: Monitor,
{
    /// Poll every `interval`, clamped to at least one millisecond.
    pub fn new(monitor: M, interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            warn!(interval_ms = interval.as_millis() as u64, "Poll interval too short, using 1ms");
        }
        let interval = interval.max(MIN_INTERVAL);
        let (balance, _) = watch::channel(None);
        let (allowance, _) = watch::channel(None);
        Self {
            monitor,
            interval,
            shared: Arc::new(Shared {
                balance,
                generation: AtomicU64::new(0),
            }),
            allowance,
            running: Mutex::new(None),
        }
    }

    /// Read `holder` now and then once per interval until [`stop`](Self::stop).
    ///
    /// Restarting for another holder stops the previous timer first.
    pub fn start(&self, holder: Address) {
        let mut running = self.running.lock();
        if let Some(previous) = running.take() {
            previous.task.abort();
        }

        let generation = self.shared.bump();
        let monitor = self.monitor.clone();
        let shared = self.shared.clone();
        let period = self.interval;

        info!(holder = %holder, interval_ms = period.as_millis() as u64, "Starting balance polling");

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                // First tick completes immediately
                ticker.tick().await;

                if shared.generation.load(Ordering::SeqCst) != generation {
                    break;
                }

                match monitor.query_balance(holder).await {
                    Ok(balance) => {
                        if shared.store(generation, balance) {
                            debug!(holder = %holder, "Balance updated");
                        }
                    }
                    Err(e) => {
                        warn!(holder = %holder, error = %e, "Balance poll failed, retrying next tick");
                    }
                }
            }
        });

        *running = Some(Running {
            holder,
            generation,
            task,
        });
    }

    /// Stop polling. Calling it on a stopped poller does nothing.
    pub fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        self.shared.bump();
        running.task.abort();
        info!(holder = %running.holder, "Stopped balance polling");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Read the balance now without disturbing the timer.
    ///
    /// Returns `Ok(None)` when the poller is stopped.
    pub async fn refresh_now(&self) -> eyre::Result<Option<Balance>> {
        let current = self
            .running
            .lock()
            .as_ref()
            .map(|running| (running.holder, running.generation));
        let Some((holder, generation)) = current else {
            return Ok(None);
        };

        let balance = self.monitor.query_balance(holder).await?;
        self.shared.store(generation, balance.clone());
        Ok(Some(balance))
    }

    /// One-shot allowance read; the result is kept as the latest allowance.
    pub async fn fetch_allowance(&self, owner: Address, spender: Address) -> eyre::Result<Allowance> {
        let allowance = self.monitor.query_allowance(owner, spender).await?;
        self.allowance.send_replace(Some(allowance.clone()));
        Ok(allowance)
    }

    /// Last successfully read balance.
    pub fn balance(&self) -> Option<Balance> {
        self.shared.balance.borrow().clone()
    }

    /// Last fetched allowance.
    pub fn allowance(&self) -> Option<Allowance> {
        self.allowance.borrow().clone()
    }

    pub fn subscribe_balance(&self) -> watch::Receiver<Option<Balance>> {
        self.shared.balance.subscribe()
    }

    pub fn subscribe_allowance(&self) -> watch::Receiver<Option<Allowance>> {
        self.allowance.subscribe()
    }

    /// Stop polling and forget the cached balance and allowance.
    pub fn clear(&self) {
        self.stop();
        self.shared.balance.send_replace(None);
        self.allowance.send_replace(None);
    }
}

impl<M> Drop for BalancePoller<M> {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.task.abort();
        }
    }
}
