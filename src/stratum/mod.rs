//! Electrum stratum protocol client.
//!
//! One TCP connection carries newline-delimited JSON in both directions:
//! our calls, the server's responses, and server pushes for subscriptions.
//!
//! - [`transport`]: socket ownership, reader and writer tasks
//! - [`frame`]: decoding incoming lines and encoding requests
//! - [`bus`]: routing frames to pending calls and subscribers
//! - [`client`]: the public handle, call correlation and subscriptions
//! - [`keepalive`]: periodic `server.version` ping

pub mod bus;
pub mod client;
pub mod frame;
mod keepalive;
pub mod transport;

pub use bus::{Subscription, TopicFilter};
pub use client::{ClientConfig, IdSequence, StratumClient};
pub use frame::{Frame, Notification, Request};

/// Protocol method names.
pub mod methods {
    /// Handshake, also used as the keepalive.
    pub const SERVER_VERSION: &str = "server.version";
    /// Current balance of an address.
    pub const ADDRESS_GET_BALANCE: &str = "blockchain.address.get_balance";
    /// Address status subscription.
    pub const ADDRESS_SUBSCRIBE: &str = "blockchain.address.subscribe";
    /// Chain-tip height subscription.
    pub const NUMBLOCKS_SUBSCRIBE: &str = "blockchain.numblocks.subscribe";
}
