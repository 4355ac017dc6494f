//! Runtime that folds intents and balance events into view states.
//!
//! ```text
//! intents ──► reducer task ──► WalletStates (one state per change)
//!                 ▲
//!                 └── change channel ◄── one forwarder per AddAddress
//! ```
//!
//! Intents are applied in the order they arrive. Balance events from
//! different addresses are applied as they come in and may interleave.

// Rust guideline compliant 2026-02

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use super::intent::WalletIntent;
use super::state::{AddressViewState, StateChange, WalletViewState};
use crate::electrum::{Balance, BalanceSource, BalanceStream};

/// Stream of wallet view states.
///
/// Starts with the empty state. Ends once the intents have ended and every
/// balance subscription has ended. Dropping it cancels every balance
/// subscription it started.
#[derive(Debug)]
pub struct WalletStates {
    rx: mpsc::UnboundedReceiver<WalletViewState>,
    task: JoinHandle<()>,
}

impl Stream for WalletStates {
    type Item = WalletViewState;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for WalletStates {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start folding `intents` into wallet states, watching balances through
/// `source`.
///
/// `AddAddress(a)` shows `a` with an unused placeholder at once, then
/// upserts every balance `source` reports for it. `RemoveAddress` and
/// `New` do not stop those balance updates, so a later balance brings a
/// removed address back.
///
/// Must be called from within a Tokio runtime.
pub fn wallet_states<I>(intents: I, source: Arc<dyn BalanceSource>) -> WalletStates
where
    I: Stream<Item = WalletIntent> + Send + 'static,
{
    let (state_tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(reduce(intents, source, state_tx));
    WalletStates { rx, task }
}

async fn reduce<I>(
    intents: I,
    source: Arc<dyn BalanceSource>,
    state_tx: mpsc::UnboundedSender<WalletViewState>,
) where
    I: Stream<Item = WalletIntent> + Send + 'static,
{
    let mut intents = Box::pin(intents);
    let mut state = WalletViewState::default();
    if state_tx.send(state.clone()).is_err() {
        return;
    }

    let (change_tx, mut change_rx) = mpsc::unbounded_channel::<StateChange>();
    // Dropped when the intents end, so the change channel can close.
    let mut change_tx = Some(change_tx);
    let mut forwarders = JoinSet::new();

    loop {
        let change = tokio::select! {
            intent = intents.next(), if change_tx.is_some() => {
                let Some(intent) = intent else {
                    log::debug!("[Wallet] Intents ended");
                    change_tx = None;
                    continue;
                };
                log::debug!("[Wallet] Intent {:?}", intent);
                match intent {
                    WalletIntent::New => StateChange::Reset,
                    WalletIntent::NewBlockHeight(height) => StateChange::BlockHeight(height),
                    WalletIntent::RemoveAddress(address) => StateChange::Remove(address),
                    WalletIntent::AddAddress(address) => {
                        if let Some(tx) = &change_tx {
                            let balances = source.balance_of(&address);
                            forwarders.spawn(forward_balances(address.clone(), balances, tx.clone()));
                        }
                        StateChange::Upsert(AddressViewState::new(address.clone(), Balance::unused(address)))
                    }
                }
            }
            Some(change) = change_rx.recv() => change,
            Some(joined) = forwarders.join_next(), if !forwarders.is_empty() => {
                if let Err(e) = joined {
                    log::warn!("[Wallet] Balance forwarder ended abnormally: {}", e);
                }
                continue;
            }
            else => break,
        };

        state = state.apply(&change);
        log::trace!("[Wallet] {:?} -> {:?}", change, state);
        if state_tx.send(state.clone()).is_err() {
            log::debug!("[Wallet] State consumer went away");
            break;
        }
    }
}

/// Turn every balance of one address into an upsert.
async fn forward_balances(
    address: String,
    mut balances: BalanceStream,
    changes: mpsc::UnboundedSender<StateChange>,
) {
    while let Some(item) = balances.next().await {
        match item {
            Ok(balance) => {
                let change = StateChange::Upsert(AddressViewState::new(address.clone(), balance));
                if changes.send(change).is_err() {
                    return;
                }
            }
            Err(e) if e.is_fatal() => {
                log::error!(
                    "[Wallet] Balance updates for {} lost with the connection: {}",
                    address,
                    e
                );
                return;
            }
            Err(e) => {
                log::warn!("[Wallet] Balance updates for {} stopped: {}", address, e);
                return;
            }
        }
    }
    log::debug!("[Wallet] Balance updates for {} ended", address);
}
