use chain::{BlockBody, ChunkRef, Transaction, TransactionId, TransactionIdChunk, TransactionRef};
use error::{Error, MessageResult};
use network::{NETWORK_MAX_PACKET_SIZE, TRANSACTION_MAX_SIZE};
use primitives::hash::H256;
use ser::{Reader, Stream};
use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;

/// One round of the three-level block download: depending on what the
/// pending block is missing, the request names the body, a set of chunk
/// hashes, or a set of transaction ids.
#[derive(Debug, Clone, PartialEq)]
pub struct GetBlock {
    pub block_id: u32,
    pub header_hash: H256,
    pub part: BlockPart,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockPart {
    /// The block body, identified by its hash from the header.
    Body { hash: H256 },
    /// Transaction-id chunks, identified by (index, hash) pairs from the
    /// body.
    ChunkHashes { hashes: Vec<(u32, H256)> },
    /// Transaction bodies.
    TransactionIds { ids: Vec<TransactionId> },
}

impl BlockPart {
    const BODY: u8 = 0x00;
    const CHUNK_HASHES: u8 = 0x01;
    const TRANSACTION_IDS: u8 = 0x02;

    fn tag(&self) -> u8 {
        match *self {
            BlockPart::Body { .. } => BlockPart::BODY,
            BlockPart::ChunkHashes { .. } => BlockPart::CHUNK_HASHES,
            BlockPart::TransactionIds { .. } => BlockPart::TRANSACTION_IDS,
        }
    }
}

/// Reply payload; `expired` signals that the peer no longer holds the
/// requested data.
#[derive(Debug, Clone, PartialEq)]
pub struct GetBlockResponse {
    pub expired: bool,
    pub payload: BlockPartPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockPartPayload {
    Body(Option<BlockBody>),
    Chunks(Vec<ChunkRef>),
    Transactions(Vec<TransactionRef>),
}

impl GetBlockResponse {
    pub fn expired(part: &BlockPart) -> GetBlockResponse {
        let payload = match *part {
            BlockPart::Body { .. } => BlockPartPayload::Body(None),
            BlockPart::ChunkHashes { .. } => BlockPartPayload::Chunks(Vec::new()),
            BlockPart::TransactionIds { .. } => BlockPartPayload::Transactions(Vec::new()),
        };
        GetBlockResponse {
            expired: true,
            payload: payload,
        }
    }
}

impl GetBlock {
    pub const TYPE: u8 = 0x08;

    /// Chunk hashes per request round.
    pub const MAX_CHUNK_HASHES: usize = 128;

    /// Transaction ids per request round.
    pub const MAX_TRANSACTIONS: usize = 2048;

    /// Total size of transactions requested per round.
    pub const MAX_TRANSACTIONS_SIZE: usize = NETWORK_MAX_PACKET_SIZE - 64 * 1024;

    pub fn serialize_request(&self, stream: &mut Stream) {
        stream
            .append(&self.block_id)
            .append(&self.header_hash)
            .append(&self.part.tag());
        match self.part {
            BlockPart::Body { ref hash } => {
                stream.append(hash);
            }
            BlockPart::ChunkHashes { ref hashes } => {
                stream.append_list::<(u32, H256), (u32, H256)>(hashes);
            }
            BlockPart::TransactionIds { ref ids } => {
                stream.append_list::<TransactionId, TransactionId>(ids);
            }
        }
    }

    pub fn deserialize_request<T>(reader: &mut Reader<T>) -> MessageResult<GetBlock>
    where
        T: io::Read,
    {
        let block_id = reader.read()?;
        let header_hash = reader.read()?;
        let tag: u8 = reader.read()?;
        let part = match tag {
            BlockPart::BODY => BlockPart::Body {
                hash: reader.read()?,
            },
            BlockPart::CHUNK_HASHES => BlockPart::ChunkHashes {
                hashes: reader.read_list(GetBlock::MAX_CHUNK_HASHES)?,
            },
            BlockPart::TRANSACTION_IDS => BlockPart::TransactionIds {
                ids: reader.read_list(GetBlock::MAX_TRANSACTIONS)?,
            },
            _ => return Err(Error::Deserialize),
        };

        let packet = GetBlock {
            block_id: block_id,
            header_hash: header_hash,
            part: part,
        };
        if !packet.validate_request() {
            return Err(Error::InvalidRequest);
        }
        Ok(packet)
    }

    fn validate_request(&self) -> bool {
        match self.part {
            BlockPart::Body { ref hash } => !hash.is_zero(),
            BlockPart::ChunkHashes { ref hashes } => {
                if hashes.is_empty() {
                    return false;
                }
                let unique_indexes: BTreeSet<u32> =
                    hashes.iter().map(|&(index, _)| index).collect();
                let unique_hashes: BTreeSet<H256> =
                    hashes.iter().map(|&(_, ref hash)| hash.clone()).collect();
                unique_indexes.len() == hashes.len() && unique_hashes.len() == hashes.len()
            }
            BlockPart::TransactionIds { ref ids } => {
                if ids.is_empty() {
                    return false;
                }
                let mut size = 0usize;
                for id in ids {
                    if id.transaction_size() == 0 || id.transaction_size() > TRANSACTION_MAX_SIZE {
                        return false;
                    }
                    size += id.transaction_size();
                }
                size <= GetBlock::MAX_TRANSACTIONS_SIZE
            }
        }
    }

    pub fn serialize_response(&self, response: &GetBlockResponse, stream: &mut Stream) {
        stream.append(&response.expired);
        match response.payload {
            BlockPartPayload::Body(ref body) => match *body {
                Some(ref body) => {
                    stream.append(&true).append(body);
                }
                None => {
                    stream.append(&false);
                }
            },
            BlockPartPayload::Chunks(ref chunks) => {
                let chunks: Vec<&TransactionIdChunk> =
                    chunks.iter().map(|chunk| &**chunk).collect();
                stream.append_list::<TransactionIdChunk, &TransactionIdChunk>(&chunks);
            }
            BlockPartPayload::Transactions(ref transactions) => {
                let transactions: Vec<&Transaction> =
                    transactions.iter().map(|transaction| &**transaction).collect();
                stream.append_list::<Transaction, &Transaction>(&transactions);
            }
        }
    }

    pub fn deserialize_response<T>(&self, reader: &mut Reader<T>) -> MessageResult<GetBlockResponse>
    where
        T: io::Read,
    {
        let expired: bool = reader.read()?;
        let payload = match self.part {
            BlockPart::Body { .. } => {
                let present: bool = reader.read()?;
                let body = if present {
                    Some(reader.read::<BlockBody>()?)
                } else {
                    None
                };
                BlockPartPayload::Body(body)
            }
            BlockPart::ChunkHashes { .. } => {
                let chunks: Vec<TransactionIdChunk> =
                    reader.read_list(GetBlock::MAX_CHUNK_HASHES)?;
                BlockPartPayload::Chunks(chunks.into_iter().map(Arc::new).collect())
            }
            BlockPart::TransactionIds { .. } => {
                let transactions: Vec<Transaction> =
                    reader.read_list(GetBlock::MAX_TRANSACTIONS)?;
                BlockPartPayload::Transactions(transactions.into_iter().map(Arc::new).collect())
            }
        };

        let response = GetBlockResponse {
            expired: expired,
            payload: payload,
        };
        if !self.validate_response(&response) {
            return Err(Error::InvalidResponse);
        }
        Ok(response)
    }

    /// An expired reply must be empty; otherwise every returned part must
    /// have been requested, exactly once.
    fn validate_response(&self, response: &GetBlockResponse) -> bool {
        if response.expired {
            return match response.payload {
                BlockPartPayload::Body(ref body) => body.is_none(),
                BlockPartPayload::Chunks(ref chunks) => chunks.is_empty(),
                BlockPartPayload::Transactions(ref transactions) => transactions.is_empty(),
            };
        }

        match (&self.part, &response.payload) {
            (&BlockPart::Body { ref hash }, &BlockPartPayload::Body(ref body)) => match *body {
                Some(ref body) => body.hash() == hash,
                None => false,
            },
            (
                &BlockPart::ChunkHashes { ref hashes },
                &BlockPartPayload::Chunks(ref chunks),
            ) => {
                let mut requested: BTreeSet<H256> =
                    hashes.iter().map(|&(_, ref hash)| hash.clone()).collect();
                chunks.iter().all(|chunk| requested.remove(chunk.hash()))
            }
            (
                &BlockPart::TransactionIds { ref ids },
                &BlockPartPayload::Transactions(ref transactions),
            ) => {
                if transactions.len() != ids.len() {
                    return false;
                }
                let requested: BTreeSet<TransactionId> = ids.iter().cloned().collect();
                let mut unique = BTreeSet::new();
                transactions.iter().all(|transaction| {
                    requested.contains(&transaction.id()) && unique.insert(transaction.id())
                })
            }
            _ => false,
        }
    }
}
