use crypto::{sha256, MinerId, PublicKey, SecretKey, Signature};
use network::MINERS_QUEUE_SIZE;
use primitives::hash::H256;
use ser::{serialize, Deserializable, Error as SerError, Reader, Serializable, Stream};
use std::{fmt, io};
use MinersQueue;

/// Domain prefix covered by the block header signature.
pub const BLOCK_SIGNATURE_PREFIX: &'static [u8] = b"RONDO SIGNED BLOCK:\n";

/// Immutable block header. The signature covers the header bytes without the
/// signature field; the header hash covers the full serialized header.
#[derive(Clone)]
pub struct BlockHeader {
    version: u8,
    id: u32,
    depth: u32,
    prev_header_hash: H256,
    body_hash: H256,
    miner_key: PublicKey,
    next_miners: Vec<MinerId>,
    signature: Signature,
    hash: H256,
}

impl BlockHeader {
    /// Creates and signs a new header.
    pub fn new(
        id: u32,
        depth: u32,
        prev_header_hash: H256,
        body_hash: H256,
        next_miners: Vec<MinerId>,
        key: &SecretKey,
    ) -> BlockHeader {
        assert!(!next_miners.is_empty() && next_miners.len() <= MINERS_QUEUE_SIZE);
        assert!(depth <= id);

        let mut header = BlockHeader {
            version: 1,
            id: id,
            depth: depth,
            prev_header_hash: prev_header_hash,
            body_hash: body_hash,
            miner_key: key.public(),
            next_miners: next_miners,
            signature: Signature::default(),
            hash: H256::default(),
        };
        header.signature = key.sign(BLOCK_SIGNATURE_PREFIX, &header.unsigned_bytes());
        header.hash = sha256(&serialize(&header));
        header
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Empty slots between the parent block and this one, encoded implicitly
    /// as the size of the next-miners list.
    pub fn skipped_blocks(&self) -> u8 {
        debug_assert!(!self.next_miners.is_empty());
        (self.next_miners.len() - 1) as u8
    }

    pub fn miner_id(&self) -> MinerId {
        MinerId::from(&self.miner_key)
    }

    pub fn miner_key(&self) -> &PublicKey {
        &self.miner_key
    }

    pub fn next_miners(&self) -> &[MinerId] {
        &self.next_miners
    }

    pub fn next_miners_queue(&self) -> MinersQueue {
        self.next_miners.iter().cloned().collect()
    }

    pub fn prev_header_hash(&self) -> &H256 {
        &self.prev_header_hash
    }

    pub fn body_hash(&self) -> &H256 {
        &self.body_hash
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn hash(&self) -> &H256 {
        &self.hash
    }

    /// Validates the miner identity and the header signature.
    pub fn validate(&self, expected_miner: &MinerId) -> bool {
        if !expected_miner.is_valid() || self.miner_id() != *expected_miner {
            return false;
        }
        self.miner_key.verify(
            BLOCK_SIGNATURE_PREFIX,
            &self.unsigned_bytes(),
            &self.signature,
        )
    }

    fn unsigned_bytes(&self) -> Vec<u8> {
        let mut stream = Stream::default();
        self.serialize_without_signature(&mut stream);
        stream.out().take()
    }

    fn serialize_without_signature(&self, stream: &mut Stream) {
        stream
            .append(&self.version)
            .append(&self.id)
            .append(&self.depth)
            .append(&self.prev_header_hash)
            .append(&self.body_hash)
            .append(&self.miner_key);
        stream.append_list_u8::<MinerId, MinerId>(&self.next_miners);
    }
}

impl PartialEq for BlockHeader {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for BlockHeader {}

impl fmt::Debug for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}-{:?}", self.id, self.depth, self.hash)
    }
}

impl Serializable for BlockHeader {
    fn serialize(&self, stream: &mut Stream) {
        self.serialize_without_signature(stream);
        stream.append(&self.signature);
    }
}

impl Deserializable for BlockHeader {
    fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, SerError>
    where
        T: io::Read,
    {
        let version: u8 = reader.read()?;
        if version != 1 {
            return Err(SerError::MalformedData);
        }

        let id: u32 = reader.read()?;
        let depth: u32 = reader.read()?;
        if depth > id {
            return Err(SerError::MalformedData);
        }

        let prev_header_hash = reader.read()?;
        let body_hash = reader.read()?;
        let miner_key = reader.read()?;
        let next_miners: Vec<MinerId> = reader.read_list_u8(MINERS_QUEUE_SIZE)?;
        if next_miners.is_empty() {
            return Err(SerError::MalformedData);
        }
        let signature = reader.read()?;

        let mut header = BlockHeader {
            version: version,
            id: id,
            depth: depth,
            prev_header_hash: prev_header_hash,
            body_hash: body_hash,
            miner_key: miner_key,
            next_miners: next_miners,
            signature: signature,
            hash: H256::default(),
        };
        header.hash = sha256(&serialize(&header));
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::BlockHeader;
    use crypto::{sha256, MinerId, SecretKey};
    use ser::{deserialize, serialize, Error as SerError};

    fn header(key: &SecretKey) -> BlockHeader {
        BlockHeader::new(
            5,
            3,
            sha256(b"prev"),
            sha256(b"body"),
            vec![MinerId::from(&key.public()); 3],
            key,
        )
    }

    #[test]
    fn test_header_round_trip() {
        let key = SecretKey::from_seed(b"miner");
        let header = header(&key);
        let parsed: BlockHeader = deserialize(serialize(&header).as_ref()).unwrap();
        assert_eq!(parsed.hash(), header.hash());
        assert_eq!(parsed.skipped_blocks(), 2);
        assert!(parsed.validate(&MinerId::from(&key.public())));
    }

    #[test]
    fn test_header_validate_rejects_wrong_miner() {
        let key = SecretKey::from_seed(b"miner");
        let other = SecretKey::from_seed(b"other");
        let header = header(&key);
        assert!(!header.validate(&MinerId::from(&other.public())));
    }

    #[test]
    fn test_header_rejects_invalid_depth() {
        let key = SecretKey::from_seed(b"miner");
        let header = BlockHeader::new(
            5,
            5,
            sha256(b"prev"),
            sha256(b"body"),
            vec![MinerId::from(&key.public())],
            &key,
        );
        let mut raw = serialize(&header).take();
        // depth > id
        raw[5] = 9;
        assert_eq!(
            deserialize::<_, BlockHeader>(&raw[..]).unwrap_err(),
            SerError::MalformedData
        );
    }
}
