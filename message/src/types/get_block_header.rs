use chain::BlockHeader;
use error::{Error, MessageResult};
use primitives::hash::H256;
use ser::{Reader, Stream};
use std::collections::BTreeSet;
use std::io;

/// Asks the peer for the next block header on top of one of the listed
/// (block id, header hash) pairs, deepest first. The reply carries the
/// header, or nothing when the peer has no continuation.
#[derive(Debug, Clone, PartialEq)]
pub struct GetBlockHeader {
    pub block_ids_and_hashes: Vec<(u32, H256)>,
}

impl GetBlockHeader {
    pub const TYPE: u8 = 0x07;

    /// Locator pairs per request.
    pub const MAX_BLOCKS: usize = 100;

    pub fn serialize_request(&self, stream: &mut Stream) {
        stream.append_list::<(u32, H256), (u32, H256)>(&self.block_ids_and_hashes);
    }

    pub fn deserialize_request<T>(reader: &mut Reader<T>) -> MessageResult<GetBlockHeader>
    where
        T: io::Read,
    {
        let packet = GetBlockHeader {
            block_ids_and_hashes: reader.read_list(GetBlockHeader::MAX_BLOCKS)?,
        };
        if !packet.validate_request() {
            return Err(Error::InvalidRequest);
        }
        Ok(packet)
    }

    fn validate_request(&self) -> bool {
        if self.block_ids_and_hashes.is_empty() {
            return false;
        }
        let mut unique_hashes = BTreeSet::new();
        for &(block_id, ref hash) in &self.block_ids_and_hashes {
            if block_id == 0 {
                return false;
            }
            unique_hashes.insert(hash.clone());
        }
        unique_hashes.len() == self.block_ids_and_hashes.len()
    }

    pub fn serialize_response(&self, response: &Option<BlockHeader>, stream: &mut Stream) {
        match *response {
            Some(ref header) => {
                stream.append(&true).append(header);
            }
            None => {
                stream.append(&false);
            }
        }
    }

    pub fn deserialize_response<T>(
        &self,
        reader: &mut Reader<T>,
    ) -> MessageResult<Option<BlockHeader>>
    where
        T: io::Read,
    {
        let present: bool = reader.read()?;
        let response = if present {
            Some(reader.read::<BlockHeader>()?)
        } else {
            None
        };
        if !self.validate_response(&response) {
            return Err(Error::InvalidResponse);
        }
        Ok(response)
    }

    /// The returned header must be new to us and extend one of the
    /// locators.
    fn validate_response(&self, response: &Option<BlockHeader>) -> bool {
        let header = match *response {
            Some(ref header) => header,
            None => return true,
        };

        if self
            .block_ids_and_hashes
            .iter()
            .any(|&(_, ref hash)| hash == header.hash())
        {
            return false;
        }
        self.block_ids_and_hashes
            .iter()
            .any(|&(_, ref hash)| hash == header.prev_header_hash())
    }
}
