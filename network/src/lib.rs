mod consensus;
mod network;

pub use consensus::{ConsensusParams, PeerConnectionLimits};
pub use network::Network;

/// Version of the wire protocol preamble.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Number of blocks the database can remove while switching branches.
pub const DATABASE_ROLLBACKABLE_BLOCKS: usize = 32;

/// Number of scheduled miners kept in the mining queue.
pub const MINERS_QUEUE_SIZE: usize = 240;

/// Maximum number of transactions in a single block.
pub const BLOCK_MAX_TRANSACTIONS: usize = 32768;

/// Maximum total size of transactions in a single block.
pub const BLOCK_MAX_TRANSACTIONS_SIZE: usize = 32 * 1024 * 1024;

/// Number of transaction ids kept in one block chunk.
pub const BLOCK_TRANSACTIONS_PER_CHUNK: usize = 1024;

/// Maximum size of a single serialized transaction.
pub const TRANSACTION_MAX_SIZE: usize = 65535;

/// How far a transaction's declared block id may lag behind the chain tip.
pub const TRANSACTION_MAX_BLOCK_ID_DIFFERENCE: u32 = 240;

/// Maximum size of a single network frame.
pub const NETWORK_MAX_PACKET_SIZE: usize = 4 * 1024 * 1024;
