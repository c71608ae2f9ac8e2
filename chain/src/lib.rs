extern crate parking_lot;

extern crate rondo_crypto as crypto;
extern crate rondo_network as network;
extern crate rondo_primitives as primitives;
extern crate rondo_serialization as ser;

mod block;
mod block_body;
mod block_header;
mod pending_block;
mod transaction;
mod transaction_id;
mod transaction_id_chunk;

pub use primitives::{bytes, hash};

pub use block::{Block, BlockRef};
pub use block_body::BlockBody;
pub use block_header::{BlockHeader, BLOCK_SIGNATURE_PREFIX};
pub use pending_block::{AddResult, PendingBlock, PendingBlockRef, Status};
pub use transaction::{
    Detail, Transaction, TransactionRef, ValidationError, TRANSACTION_SIGNATURE_PREFIX,
};
pub use transaction_id::TransactionId;
pub use transaction_id_chunk::{ChunkRef, TransactionIdChunk};

use crypto::MinerId;
use std::collections::VecDeque;

/// Queue of miners scheduled to mine next blocks.
pub type MinersQueue = VecDeque<MinerId>;
