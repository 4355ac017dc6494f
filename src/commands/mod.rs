//! CLI subcommand implementations for electrum-watch.
//!
//! - [`query`] - one-shot queries (balance, height, server version)
//! - [`watch`] - interactive wallet watcher driven from stdin
//!
//! # Usage
//!
//! ```ignore
//! use electrum_watch::{commands, Electrum};
//!
//! commands::query::balance(&electrum, "1abc").await?;
//! commands::watch::run(electrum).await?;
//! ```

pub mod query;
pub mod watch;

#[doc(inline)]
pub use query::{balance, height, version};
