//! Typed Electrum operations on top of a [`StratumClient`].
//!
//! Turns raw calls and subscriptions into [`Balance`] values and chain
//! heights. Streams returned here never complete on their own; drop them to
//! unsubscribe.

// Rust guideline compliant 2026-02

use std::fmt;
use std::pin::Pin;

use futures_util::{stream, Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, StratumError};
use crate::stratum::{methods, StratumClient, Subscription};

/// Balance of one address, in satoshis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    /// Address the balance belongs to.
    pub address: String,
    /// Confirmed amount.
    pub confirmed: i64,
    /// Unconfirmed amount (can be negative while a spend is in the mempool).
    pub unconfirmed: i64,
    /// The address has no history at all. Distinct from a zero balance.
    pub unused: bool,
}

impl Balance {
    /// Balance of an address that has been used.
    pub fn new(address: impl Into<String>, confirmed: i64, unconfirmed: i64) -> Self {
        Self {
            address: address.into(),
            confirmed,
            unconfirmed,
            unused: false,
        }
    }

    /// Placeholder for an address with no history.
    pub fn unused(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            confirmed: 0,
            unconfirmed: 0,
            unused: true,
        }
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unused {
            write!(f, "Balance of {} 0 (Unused)", self.address)
        } else if self.unconfirmed == 0 {
            write!(f, "Balance of {} {} confirmed", self.address, self.confirmed)
        } else {
            write!(
                f,
                "Balance of {} {} confirmed + {} unconfirmed",
                self.address, self.confirmed, self.unconfirmed
            )
        }
    }
}

/// Result shape of `blockchain.address.get_balance`.
#[derive(Debug, Deserialize)]
struct BalanceDto {
    #[serde(default)]
    confirmed: i64,
    #[serde(default)]
    unconfirmed: i64,
}

/// Endless stream of balances for one address.
pub type BalanceStream = Pin<Box<dyn Stream<Item = Result<Balance>> + Send>>;

/// Endless stream of chain-tip heights.
pub type HeightStream = Pin<Box<dyn Stream<Item = Result<u64>> + Send>>;

/// Anything that can watch the balance of an address.
///
/// The wallet aggregator only needs this, so it can run against a live
/// [`Electrum`] or a closure producing canned balances.
pub trait BalanceSource: Send + Sync {
    /// Start watching `address`.
    fn balance_of(&self, address: &str) -> BalanceStream;
}

impl<F> BalanceSource for F
where
    F: Fn(&str) -> BalanceStream + Send + Sync,
{
    fn balance_of(&self, address: &str) -> BalanceStream {
        self(address)
    }
}

/// Progress of a subscription-backed stream.
enum Watch {
    /// Nothing sent yet.
    Start,
    /// Initial value emitted; following pushes.
    Watching(Subscription),
    /// Failed; the stream is over.
    Done,
}

/// Electrum operations over one connection.
#[derive(Debug, Clone)]
pub struct Electrum {
    client: StratumClient,
}

impl Electrum {
    /// Wrap a connected client.
    pub fn new(client: StratumClient) -> Self {
        Self { client }
    }

    /// The underlying connection.
    pub fn client(&self) -> &StratumClient {
        &self.client
    }

    /// `server.version` handshake. Returns the server's answer untouched.
    pub async fn server_version(&self, client_name: &str, protocol_version: &str) -> Result<Value> {
        self.client
            .call_and_await(
                methods::SERVER_VERSION,
                vec![Value::from(client_name), Value::from(protocol_version)],
            )
            .await
    }

    /// Query the current balance of `address` once.
    pub async fn balance_now(&self, address: &str) -> Result<Balance> {
        balance_now(&self.client, address).await
    }

    /// Watch the balance of `address`.
    ///
    /// The first item is either [`Balance::unused`] (the server reports no
    /// history, and no balance query is made) or the current balance. Every
    /// later status push for the address triggers a fresh balance query.
    /// An error ends the stream.
    pub fn balance_of(&self, address: &str) -> BalanceStream {
        let client = self.client.clone();
        let address = address.to_string();

        stream::unfold(Watch::Start, move |watch| {
            let client = client.clone();
            let address = address.clone();
            async move {
                match watch {
                    Watch::Start => {
                        // Listen before subscribing so no push is missed.
                        let changes = client.address_changes_for(&address);
                        let status = match client
                            .call_and_await(methods::ADDRESS_SUBSCRIBE, vec![Value::from(address.as_str())])
                            .await
                        {
                            Ok(status) => status,
                            Err(e) => return Some((Err(e), Watch::Done)),
                        };

                        if is_unused_status(&status) {
                            log::debug!("[Electrum] {} has no history", address);
                            return Some((Ok(Balance::unused(address)), Watch::Watching(changes)));
                        }
                        match balance_now(&client, &address).await {
                            Ok(balance) => Some((Ok(balance), Watch::Watching(changes))),
                            Err(e) => Some((Err(e), Watch::Done)),
                        }
                    }
                    Watch::Watching(mut changes) => match changes.next().await? {
                        Ok(_) => {
                            log::debug!("[Electrum] Status of {} changed", address);
                            match balance_now(&client, &address).await {
                                Ok(balance) => Some((Ok(balance), Watch::Watching(changes))),
                                Err(e) => Some((Err(e), Watch::Done)),
                            }
                        }
                        Err(e) => Some((Err(e), Watch::Done)),
                    },
                    Watch::Done => None,
                }
            }
        })
        .boxed()
    }

    /// Watch the chain-tip height.
    ///
    /// Emits the height returned by the subscribe call, then the first
    /// param of every pushed notification. Pushes that carry no integer
    /// height are skipped.
    pub fn block_height(&self) -> HeightStream {
        let client = self.client.clone();

        stream::unfold(Watch::Start, move |watch| {
            let client = client.clone();
            async move {
                match watch {
                    Watch::Start => {
                        let heights = client.notifications_for(methods::NUMBLOCKS_SUBSCRIBE);
                        let item = client
                            .call_and_await(methods::NUMBLOCKS_SUBSCRIBE, Vec::new())
                            .await
                            .and_then(|result| {
                                parse_height(&result).ok_or_else(|| StratumError::UnexpectedResult {
                                    method: methods::NUMBLOCKS_SUBSCRIBE.to_string(),
                                    reason: format!("expected an integer height, got {result}"),
                                })
                            });
                        match item {
                            Ok(height) => Some((Ok(height), Watch::Watching(heights))),
                            Err(e) => Some((Err(e), Watch::Done)),
                        }
                    }
                    Watch::Watching(mut heights) => loop {
                        match heights.next().await? {
                            Ok(push) => match push.params.get(0).and_then(parse_height) {
                                Some(height) => break Some((Ok(height), Watch::Watching(heights))),
                                None => log::warn!(
                                    "[Electrum] Ignoring {} push {}",
                                    heights.method(),
                                    push.params
                                ),
                            },
                            Err(e) => break Some((Err(e), Watch::Done)),
                        }
                    },
                    Watch::Done => None,
                }
            }
        })
        .boxed()
    }
}

impl BalanceSource for Electrum {
    fn balance_of(&self, address: &str) -> BalanceStream {
        Electrum::balance_of(self, address)
    }
}

async fn balance_now(client: &StratumClient, address: &str) -> Result<Balance> {
    let dto: BalanceDto = client
        .call_as(methods::ADDRESS_GET_BALANCE, vec![Value::from(address)])
        .await?;
    Ok(Balance::new(address, dto.confirmed, dto.unconfirmed))
}

/// The server reports "no history" as JSON null or the string `"null"`.
fn is_unused_status(status: &Value) -> bool {
    match status {
        Value::Null => true,
        Value::String(s) => s == "null",
        _ => false,
    }
}

fn parse_height(value: &Value) -> Option<u64> {
    value.as_u64()
}
