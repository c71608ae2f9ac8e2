#[macro_use]
extern crate log;
extern crate parking_lot;

extern crate rondo_chain as chain;
extern crate rondo_crypto as crypto;
extern crate rondo_message as message;
extern crate rondo_miner as miner;
extern crate rondo_network as network;
extern crate rondo_p2p as p2p;
extern crate rondo_primitives as primitives;
extern crate rondo_serialization as ser;
extern crate rondo_storage as storage;

#[cfg(test)]
extern crate rondo_db as db;
#[cfg(test)]
extern crate rondo_test_data as test_data;

mod block_tree;
mod blockchain;
mod crypto_verifier;
mod events;
mod local_node;
mod miners_queue;
mod post_transaction;
mod session;
mod shared_transaction_ids;
mod transactions;
mod types;

pub use primitives::{bytes, hash};

pub use block_tree::{BlockTree, BlockTreeNode, TREE_DEPTH};
pub use blockchain::{Blockchain, BlockchainOptions};
pub use crypto_verifier::CryptoVerifier;
pub use events::{Events, EventsListener, EventsListenerCallbacks};
pub use local_node::{LocalNode, Sessions};
pub use miners_queue::next_miners;
pub use post_transaction::{PostTransactionCallback, PostTransactionResult, PostTransactionStatus};
pub use session::Session;
pub use shared_transaction_ids::SharedTransactionIds;
pub use transactions::{execute_transaction, validate_transaction};
pub use types::{BlockTreeRef, BlockchainRef, EventsRef, MemoryPoolRef, StorageRef, VerifierRef};

use std::fmt;

/// Sync errors.
#[derive(Debug, PartialEq)]
pub enum Error {
    /// Blockchain cannot start because the store holds no usable chain.
    NotInitialized,
    /// The first block of the store does not carry a valid init
    /// transaction.
    InvalidInitTransaction,
    /// The init transaction declares a different block interval.
    BlockIntervalMismatch { declared: u32, configured: u32 },
    /// A provided first block was rejected.
    InvalidFirstBlock(u32),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::NotInitialized => "blockchain is not initialized".fmt(f),
            Error::InvalidInitTransaction => "invalid init transaction".fmt(f),
            Error::BlockIntervalMismatch {
                declared,
                configured,
            } => write!(
                f,
                "block interval mismatch: first block declares {}, configured {}",
                declared, configured
            ),
            Error::InvalidFirstBlock(id) => write!(f, "first block {} is invalid", id),
        }
    }
}

/// Creates the sync node serving sessions to the p2p layer.
pub fn create_local_sync_node(
    blockchain: BlockchainRef,
    store: StorageRef,
) -> ::std::sync::Arc<LocalNode> {
    LocalNode::new(blockchain, store)
}
