//! User intents accepted by the wallet aggregator.

/// Something the user (or a height feed) asks the wallet view to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletIntent {
    /// Start over with an empty wallet.
    New,
    /// The chain tip moved.
    NewBlockHeight(u64),
    /// Start watching an address.
    AddAddress(String),
    /// Stop showing an address.
    RemoveAddress(String),
}
