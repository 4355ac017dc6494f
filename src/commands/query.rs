//! One-shot queries against the server.

use anyhow::{Context, Result};
use futures_util::StreamExt;

use crate::electrum::Electrum;

/// Print the current balance of `address`.
pub async fn balance(electrum: &Electrum, address: &str) -> Result<()> {
    let balance = electrum
        .balance_now(address)
        .await
        .with_context(|| format!("Failed to fetch balance of {address}"))?;
    println!("{balance}");
    Ok(())
}

/// Print the current chain-tip height.
pub async fn height(electrum: &Electrum) -> Result<()> {
    let height = electrum
        .block_height()
        .next()
        .await
        .context("Height subscription ended before the first height")?
        .context("Failed to fetch block height")?;
    println!("{height}");
    Ok(())
}

/// Print the server's answer to the `server.version` handshake.
pub async fn version(electrum: &Electrum, client_name: &str, protocol_version: &str) -> Result<()> {
    let answer = electrum
        .server_version(client_name, protocol_version)
        .await
        .context("server.version failed")?;
    match answer.as_array().map(Vec::as_slice) {
        Some([software, protocol]) => println!(
            "{} (protocol {})",
            software.as_str().unwrap_or_default(),
            protocol.as_str().unwrap_or_default()
        ),
        _ => println!("{answer}"),
    }
    Ok(())
}
