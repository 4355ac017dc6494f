//! electrum-watch - watch-only Electrum client.
//!
//! Talks the Electrum stratum protocol (newline-delimited JSON over TCP) to
//! one server, and folds address balances and the chain-tip height into a
//! wallet view.
//!
//! # Architecture
//!
//! - **Stratum client** - one connection; calls correlated by id, server
//!   pushes routed to subscribers, periodic keepalive
//! - **Electrum** - typed balance and block-height streams
//! - **Wallet** - pure reducer plus the runtime feeding it
//!
//! # Modules
//!
//! - [`stratum`] - protocol client
//! - [`electrum`] - typed Electrum operations
//! - [`wallet`] - wallet aggregator
//! - [`config`] - configuration loading/saving
//! - [`commands`] - CLI subcommands
//!
//! # Example
//!
//! ```no_run
//! use electrum_watch::{ClientConfig, Electrum, StratumClient};
//! use futures_util::StreamExt;
//!
//! # async fn demo() -> electrum_watch::Result<()> {
//! let client = StratumClient::connect("testnetnode.arihanc.com", 51001, ClientConfig::default()).await?;
//! let electrum = Electrum::new(client);
//!
//! let mut heights = electrum.block_height();
//! while let Some(height) = heights.next().await {
//!     println!("height {}", height?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod config;
pub mod electrum;
pub mod error;
pub mod stratum;
pub mod wallet;

// Re-export commonly used types
pub use config::Config;
pub use electrum::{Balance, BalanceSource, BalanceStream, Electrum, HeightStream};
pub use error::{Result, StratumError};
pub use stratum::{ClientConfig, StratumClient, Subscription};
pub use wallet::{wallet_states, WalletIntent, WalletStates, WalletViewState};
