mod first;
mod get_block;
mod get_block_header;
mod get_new_transactions;
mod new_blocks;
mod new_transactions;

pub use self::first::First;
pub use self::get_block::{BlockPart, BlockPartPayload, GetBlock, GetBlockResponse};
pub use self::get_block_header::GetBlockHeader;
pub use self::get_new_transactions::GetNewTransactions;
pub use self::new_blocks::NewBlocks;
pub use self::new_transactions::NewTransactions;
