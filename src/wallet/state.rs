//! Wallet view state and its pure reducer.

use crate::electrum::Balance;

/// One watched address and its latest balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressViewState {
    /// The address.
    pub address: String,
    /// Latest known balance; [`Balance::unused`] until the first answer.
    pub balance: Balance,
}

impl AddressViewState {
    /// Pair an address with a balance.
    pub fn new(address: impl Into<String>, balance: Balance) -> Self {
        Self {
            address: address.into(),
            balance,
        }
    }
}

/// Everything the wallet view shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletViewState {
    /// Latest chain-tip height, 0 until known.
    pub block_height: u64,
    /// Watched addresses in the order they were added.
    pub addresses: Vec<AddressViewState>,
}

/// One reduction step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    /// Back to the empty state.
    Reset,
    /// Replace the block height.
    BlockHeight(u64),
    /// Replace the entry for the same address in place, or append it.
    Upsert(AddressViewState),
    /// Drop the entry for this address, if any.
    Remove(String),
}

impl WalletViewState {
    /// Sum of confirmed balances over all addresses.
    pub fn balance_confirmed(&self) -> i64 {
        self.addresses
            .iter()
            .fold(0i64, |total, a| total.saturating_add(a.balance.confirmed))
    }

    /// Sum of unconfirmed balances over all addresses.
    pub fn balance_unconfirmed(&self) -> i64 {
        self.addresses
            .iter()
            .fold(0i64, |total, a| total.saturating_add(a.balance.unconfirmed))
    }

    /// Position of the first entry for `address`.
    pub fn position_of(&self, address: &str) -> Option<usize> {
        self.addresses.iter().position(|a| a.address == address)
    }

    /// Apply `change`, returning the next state. `self` is left untouched.
    #[must_use]
    pub fn apply(&self, change: &StateChange) -> Self {
        match change {
            StateChange::Reset => Self::default(),
            StateChange::BlockHeight(height) => Self {
                block_height: *height,
                addresses: self.addresses.clone(),
            },
            StateChange::Upsert(entry) => {
                let mut addresses = self.addresses.clone();
                match self.position_of(&entry.address) {
                    Some(idx) => addresses[idx] = entry.clone(),
                    None => addresses.push(entry.clone()),
                }
                Self {
                    block_height: self.block_height,
                    addresses,
                }
            }
            StateChange::Remove(address) => {
                let mut addresses = self.addresses.clone();
                if let Some(idx) = self.position_of(address) {
                    addresses.remove(idx);
                }
                Self {
                    block_height: self.block_height,
                    addresses,
                }
            }
        }
    }
}
