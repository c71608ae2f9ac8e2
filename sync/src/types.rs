use block_tree::BlockTree;
use blockchain::Blockchain;
use crypto_verifier::CryptoVerifier;
use events::Events;
use miner::MemoryPool;
use std::sync::Arc;
use storage::SharedStore;

/// Reference to the store.
pub type StorageRef = SharedStore;

/// Reference to the mempool.
pub type MemoryPoolRef = Arc<MemoryPool>;

/// Reference to the block tree.
pub type BlockTreeRef = Arc<BlockTree>;

/// Reference to the signature verifier pool.
pub type VerifierRef = Arc<CryptoVerifier>;

/// Reference to the events fan-out.
pub type EventsRef = Arc<Events>;

/// Reference to the blockchain control loop.
pub type BlockchainRef = Arc<Blockchain>;
