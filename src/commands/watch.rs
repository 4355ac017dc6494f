//! Interactive wallet watcher.
//!
//! Reads commands from stdin, one per line:
//!
//! ```text
//! +ADDR   start watching ADDR
//! -ADDR   stop showing ADDR
//! new     start over with an empty wallet
//! exit    quit
//! ```
//!
//! The chain-tip height is fed in automatically. Every wallet state change
//! prints one line.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{stream, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::electrum::Electrum;
use crate::wallet::{wallet_states, WalletIntent, WalletViewState};

/// Satoshis per coin.
const SATS_PER_COIN: i64 = 100_000_000;

/// One parsed stdin command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchCommand {
    /// Pass an intent to the wallet.
    Intent(WalletIntent),
    /// Leave the watcher.
    Exit,
}

/// Parse one stdin line. `None` for blank or unrecognised input.
pub fn parse_line(line: &str) -> Option<WatchCommand> {
    let line = line.trim();
    if let Some(address) = line.strip_prefix('+') {
        let address = address.trim();
        return (!address.is_empty())
            .then(|| WatchCommand::Intent(WalletIntent::AddAddress(address.to_string())));
    }
    if let Some(address) = line.strip_prefix('-') {
        let address = address.trim();
        return (!address.is_empty())
            .then(|| WatchCommand::Intent(WalletIntent::RemoveAddress(address.to_string())));
    }
    match line.to_ascii_lowercase().as_str() {
        "new" => Some(WatchCommand::Intent(WalletIntent::New)),
        "exit" | "quit" => Some(WatchCommand::Exit),
        _ => None,
    }
}

/// Render satoshis as whole coins with 8 decimals.
pub fn format_coins(sats: i64) -> String {
    let sign = if sats < 0 { "-" } else { "" };
    let abs = sats.unsigned_abs();
    let per_coin = SATS_PER_COIN.unsigned_abs();
    format!("{sign}{}.{:08}", abs / per_coin, abs % per_coin)
}

/// One status line for a wallet state.
pub fn format_state(state: &WalletViewState) -> String {
    format!(
        "height {} | {} address(es) | {} confirmed | {} unconfirmed",
        state.block_height,
        state.addresses.len(),
        format_coins(state.balance_confirmed()),
        format_coins(state.balance_unconfirmed()),
    )
}

/// Run the watcher until `exit` or end of stdin.
pub async fn run(electrum: Electrum) -> Result<()> {
    let (intent_tx, intent_rx) = mpsc::unbounded_channel::<WalletIntent>();
    let intents = stream::unfold(intent_rx, |mut rx| async move {
        rx.recv().await.map(|intent| (intent, rx))
    });
    let mut states = wallet_states(intents, Arc::new(electrum.clone()));

    let heights = tokio::spawn({
        let electrum = electrum.clone();
        let intent_tx = intent_tx.clone();
        async move {
            let mut heights = electrum.block_height();
            while let Some(height) = heights.next().await {
                match height {
                    Ok(height) => {
                        if intent_tx.send(WalletIntent::NewBlockHeight(height)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        log::error!("[Electrum] Block height updates stopped: {}", e);
                        return;
                    }
                }
            }
        }
    });

    println!("Commands: +ADDR, -ADDR, new, exit");
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match parse_line(&line) {
                    Some(WatchCommand::Intent(intent)) => {
                        if intent_tx.send(intent).is_err() {
                            break;
                        }
                    }
                    Some(WatchCommand::Exit) => break,
                    None if line.trim().is_empty() => {}
                    None => println!("Unknown command: {}", line.trim()),
                }
            }
            state = states.next() => {
                let Some(state) = state else { break };
                println!("{}", format_state(&state));
                for entry in &state.addresses {
                    println!("  {}", entry.balance);
                }
            }
        }
    }

    heights.abort();
    drop(states);
    electrum.client().close().await.context("Connection ended with an error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::electrum::Balance;
    use crate::wallet::{AddressViewState, StateChange};

    #[test]
    fn test_parse_line() {
        assert_eq!(
            parse_line("+1abc"),
            Some(WatchCommand::Intent(WalletIntent::AddAddress("1abc".into())))
        );
        assert_eq!(
            parse_line("  - 1abc "),
            Some(WatchCommand::Intent(WalletIntent::RemoveAddress("1abc".into())))
        );
        assert_eq!(parse_line("NEW"), Some(WatchCommand::Intent(WalletIntent::New)));
        assert_eq!(parse_line("exit"), Some(WatchCommand::Exit));
        assert_eq!(parse_line("+"), None);
        assert_eq!(parse_line("balance"), None);
        assert_eq!(parse_line(""), None);
    }

    #[test]
    fn test_format_coins() {
        assert_eq!(format_coins(0), "0.00000000");
        assert_eq!(format_coins(100), "0.00000100");
        assert_eq!(format_coins(150_000_000), "1.50000000");
        assert_eq!(format_coins(-2_500), "-0.00002500");
    }

    #[test]
    fn test_format_state() {
        let state = WalletViewState::default()
            .apply(&StateChange::BlockHeight(577_001))
            .apply(&StateChange::Upsert(AddressViewState::new(
                "1abc",
                Balance::new("1abc", 500_000, 1_000),
            )));
        assert_eq!(
            format_state(&state),
            "height 577001 | 1 address(es) | 0.00500000 confirmed | 0.00001000 unconfirmed"
        );
    }
}
