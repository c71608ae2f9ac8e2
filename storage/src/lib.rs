extern crate rondo_chain as chain;
extern crate rondo_crypto as crypto;
extern crate rondo_primitives as primitives;

mod miner;
mod store;
mod user;

pub use primitives::{bytes, hash};

pub use miner::{Miner, TopMiners};
pub use store::{
    BlockProvider, MinerProvider, SideStore, StateProvider, Store, StoreWriter, TransactionProvider,
    UserProvider,
};
pub use user::User;

use std::sync::Arc;

/// Reference to the store shared between the control loop, sessions and
/// packet handlers.
pub type SharedStore = Arc<dyn Store>;

/// Tokens charged per pricing unit; the chain state exposes the current
/// value through `StateProvider::pricing`.
pub const DEFAULT_PRICING: u64 = 1_000_000;
