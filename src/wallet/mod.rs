//! Wallet aggregator: folds user intents and balance updates into a single
//! view state.
//!
//! The reducer ([`WalletViewState::apply`]) is pure; [`wallet_states`] runs
//! it over an intent stream and the balance streams those intents start.

pub mod intent;
mod model;
pub mod state;

pub use intent::WalletIntent;
pub use model::{wallet_states, WalletStates};
pub use state::{AddressViewState, StateChange, WalletViewState};
