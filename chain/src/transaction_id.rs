use primitives::hash::H256;
use ser::{Deserializable, Error as SerError, Reader, Serializable, Stream};
use std::cmp::Ordering;
use std::{fmt, io};

/// Globally unique transaction identifier: type tag, declared block id,
/// serialized size and the content hash. Ordering is (type, block id, size,
/// hash), which keeps ids of one kind clustered and old transactions first.
#[derive(Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId {
    pub kind: u8,
    pub block_id: u32,
    pub size: u16,
    pub hash: H256,
}

impl TransactionId {
    /// Serialized size of the id itself.
    pub const SIZE: usize = 4 + 1 + 2 + 32;

    pub fn new(kind: u8, block_id: u32, size: u16, hash: H256) -> Self {
        TransactionId {
            kind: kind,
            block_id: block_id,
            size: size,
            hash: hash,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.hash.is_zero()
    }

    /// Serialized size of the transaction this id addresses.
    pub fn transaction_size(&self) -> usize {
        self.size as usize
    }
}

impl PartialOrd for TransactionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TransactionId {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.kind, self.block_id, self.size, &self.hash).cmp(&(
            other.kind,
            other.block_id,
            other.size,
            &other.hash,
        ))
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{:?}",
            self.kind, self.block_id, self.size, self.hash
        )
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Serializable for TransactionId {
    fn serialize(&self, stream: &mut Stream) {
        stream
            .append(&self.block_id)
            .append(&self.kind)
            .append(&self.size)
            .append(&self.hash);
    }
}

impl Deserializable for TransactionId {
    fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, SerError>
    where
        T: io::Read,
    {
        let block_id = reader.read()?;
        let kind = reader.read()?;
        let size = reader.read()?;
        let hash = reader.read()?;
        Ok(TransactionId {
            kind: kind,
            block_id: block_id,
            size: size,
            hash: hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::TransactionId;
    use crypto::sha256;
    use ser::{deserialize, serialize};

    #[test]
    fn test_transaction_id_round_trip() {
        let id = TransactionId::new(17, 34144246, 10936, sha256(b"test"));
        let raw = serialize(&id);
        assert_eq!(raw.len(), TransactionId::SIZE);

        let parsed: TransactionId = deserialize(raw.as_ref()).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.kind, 17);
        assert_eq!(parsed.block_id, 34144246);
        assert_eq!(parsed.size, 10936);
    }

    #[test]
    fn test_transaction_id_ordering() {
        let hash = sha256(b"test");
        assert!(TransactionId::new(1, 1, 1, hash) < TransactionId::new(1, 2, 1, hash));
        assert!(TransactionId::new(1, 1, 1, hash) < TransactionId::new(2, 1, 1, hash));
        assert!(TransactionId::new(1, 1, 1, hash) < TransactionId::new(1, 1, 2, hash));
        assert!(TransactionId::new(1, 10, 1, hash) < TransactionId::new(1, 256, 1, hash));
        assert!(TransactionId::new(1, 255, 1, hash) < TransactionId::new(1, 65531, 1, hash));
        // type takes precedence over the block id
        assert!(TransactionId::new(1, 100, 1, hash) < TransactionId::new(2, 1, 1, hash));
    }
}
