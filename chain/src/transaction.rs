use bytes::Bytes;
use crypto::{sha256, MinerId, PublicKey, SecretKey, Signature, UserId};
use network::TRANSACTION_MAX_SIZE;
use ser::{serialize, Deserializable, Error as SerError, Reader, Serializable, Stream};
use std::sync::Arc;
use std::{fmt, io};
use transaction_id::TransactionId;

/// Domain prefix covered by every transaction signature.
pub const TRANSACTION_SIGNATURE_PREFIX: &'static [u8] = b"RONDO SIGNED TRANSACTION:\n";

/// Base fee charged for every user-posted transaction.
pub const TRANSACTION_FEE: u64 = 20_000_000;

pub type TransactionRef = Arc<Transaction>;

/// Typed transaction payload. Dispatch is keyed on the 1-byte tag, there is
/// no virtual hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub enum Detail {
    /// First transaction of block 1.
    Init {
        initialization_time: u64,
        block_interval: u32,
    },
    /// Plain value transfer.
    Transfer { to: UserId, amount: u64 },
    /// Arbitrary keyed payload pinned to the chain.
    StorageEntry { key: Bytes, value: Bytes },
    /// Registers a miner owned by the signing user and stakes tokens on it.
    CreateMiner { miner: MinerId, stake: u64 },
    /// Miner reward and chain statistics, appended by the block producer.
    Commit {
        miner: MinerId,
        pricing: u64,
        transactions: u32,
        users: u64,
        tokens: u64,
        staked_tokens: u64,
    },
}

impl Detail {
    pub const INIT: u8 = 0x01;
    pub const TRANSFER: u8 = 0x02;
    pub const STORAGE_ENTRY: u8 = 0x03;
    pub const CREATE_MINER: u8 = 0x04;
    pub const COMMIT: u8 = 0x05;

    pub fn kind(&self) -> u8 {
        match *self {
            Detail::Init { .. } => Detail::INIT,
            Detail::Transfer { .. } => Detail::TRANSFER,
            Detail::StorageEntry { .. } => Detail::STORAGE_ENTRY,
            Detail::CreateMiner { .. } => Detail::CREATE_MINER,
            Detail::Commit { .. } => Detail::COMMIT,
        }
    }

    /// Management transactions are created by the chain itself and cannot be
    /// posted through the mempool.
    pub fn is_management(&self) -> bool {
        match *self {
            Detail::Init { .. } | Detail::Commit { .. } => true,
            _ => false,
        }
    }

    fn serialize_body(&self, stream: &mut Stream) {
        match *self {
            Detail::Init {
                initialization_time,
                block_interval,
            } => {
                stream.append(&initialization_time).append(&block_interval);
            }
            Detail::Transfer { ref to, amount } => {
                stream.append(to).append(&amount);
            }
            Detail::StorageEntry { ref key, ref value } => {
                stream.append(key).append(value);
            }
            Detail::CreateMiner { ref miner, stake } => {
                stream.append(miner).append(&stake);
            }
            Detail::Commit {
                ref miner,
                pricing,
                transactions,
                users,
                tokens,
                staked_tokens,
            } => {
                stream
                    .append(miner)
                    .append(&pricing)
                    .append(&transactions)
                    .append(&users)
                    .append(&tokens)
                    .append(&staked_tokens);
            }
        }
    }

    fn deserialize_body<T>(kind: u8, reader: &mut Reader<T>) -> Result<Detail, SerError>
    where
        T: io::Read,
    {
        let detail = match kind {
            Detail::INIT => Detail::Init {
                initialization_time: reader.read()?,
                block_interval: reader.read()?,
            },
            Detail::TRANSFER => Detail::Transfer {
                to: reader.read()?,
                amount: reader.read()?,
            },
            Detail::STORAGE_ENTRY => Detail::StorageEntry {
                key: reader.read()?,
                value: reader.read()?,
            },
            Detail::CREATE_MINER => Detail::CreateMiner {
                miner: reader.read()?,
                stake: reader.read()?,
            },
            Detail::COMMIT => Detail::Commit {
                miner: reader.read()?,
                pricing: reader.read()?,
                transactions: reader.read()?,
                users: reader.read()?,
                tokens: reader.read()?,
                staked_tokens: reader.read()?,
            },
            _ => return Err(SerError::MalformedData),
        };
        Ok(detail)
    }
}

/// A signed transaction. Immutable once built, identified by its
/// [`TransactionId`] which is cached at construction time.
#[derive(Clone)]
pub struct Transaction {
    block_id: u32,
    user_id: UserId,
    public_key: PublicKey,
    detail: Detail,
    signature: Signature,
    id: TransactionId,
}

impl Transaction {
    /// Builds and signs a transaction with the given key. The signing user's
    /// id is derived from the key.
    pub fn signed(block_id: u32, detail: Detail, key: &SecretKey) -> TransactionRef {
        let mut transaction = Transaction {
            block_id: block_id,
            user_id: UserId::from(&key.public()),
            public_key: key.public(),
            detail: detail,
            signature: Signature::default(),
            id: TransactionId::default(),
        };
        transaction.signature =
            key.sign(TRANSACTION_SIGNATURE_PREFIX, &transaction.unsigned_bytes());
        transaction.id = transaction.compute_id();
        Arc::new(transaction)
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn kind(&self) -> u8 {
        self.detail.kind()
    }

    pub fn block_id(&self) -> u32 {
        self.block_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn detail(&self) -> &Detail {
        &self.detail
    }

    pub fn is_management(&self) -> bool {
        self.detail.is_management()
    }

    pub fn fee(&self) -> u64 {
        if self.is_management() {
            0
        } else {
            TRANSACTION_FEE
        }
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        self.id.transaction_size()
    }

    /// Checks that the declared user owns the signing key and that the
    /// signature covers the transaction content. Pure, no store access.
    pub fn validate_signatures(&self) -> bool {
        if self.user_id != UserId::from(&self.public_key) {
            return false;
        }
        self.public_key.verify(
            TRANSACTION_SIGNATURE_PREFIX,
            &self.unsigned_bytes(),
            &self.signature,
        )
    }

    fn unsigned_bytes(&self) -> Vec<u8> {
        let mut stream = Stream::default();
        stream
            .append(&self.detail.kind())
            .append(&self.block_id)
            .append(&self.user_id)
            .append(&self.public_key);
        self.detail.serialize_body(&mut stream);
        stream.out().take()
    }

    fn compute_id(&self) -> TransactionId {
        let raw = serialize(self);
        debug_assert!(raw.len() <= TRANSACTION_MAX_SIZE);
        TransactionId::new(
            self.detail.kind(),
            self.block_id,
            raw.len() as u16,
            sha256(&raw),
        )
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Transaction {}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("user", &self.user_id)
            .field("detail", &self.detail)
            .finish()
    }
}

impl Serializable for Transaction {
    fn serialize(&self, stream: &mut Stream) {
        stream
            .append(&self.detail.kind())
            .append(&self.block_id)
            .append(&self.user_id)
            .append(&self.public_key);
        self.detail.serialize_body(stream);
        stream.append(&self.signature);
    }
}

impl Deserializable for Transaction {
    fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, SerError>
    where
        T: io::Read,
    {
        let kind: u8 = reader.read()?;
        let block_id = reader.read()?;
        let user_id = reader.read()?;
        let public_key = reader.read()?;
        let detail = Detail::deserialize_body(kind, reader)?;
        let signature = reader.read()?;

        let mut transaction = Transaction {
            block_id: block_id,
            user_id: user_id,
            public_key: public_key,
            detail: detail,
            signature: signature,
            id: TransactionId::default(),
        };
        transaction.id = transaction.compute_id();
        if transaction.id.transaction_size() > TRANSACTION_MAX_SIZE {
            return Err(SerError::MalformedData);
        }
        Ok(transaction)
    }
}

/// Reasons a transaction is refused by store validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Signing user does not exist in the store.
    UnknownUser,
    /// User balance does not cover amount plus fee.
    InsufficientFunds,
    /// Miner already exists or the stake is zero.
    InvalidMiner,
    /// Storage entry key already taken or value too large.
    InvalidStorageEntry,
    /// Management transactions cannot appear outside their slots.
    UnexpectedManagement,
    /// Recorded statistics do not match the store.
    InvalidStatistics,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ValidationError::UnknownUser => "unknown user".fmt(f),
            ValidationError::InsufficientFunds => "insufficient funds".fmt(f),
            ValidationError::InvalidMiner => "invalid miner".fmt(f),
            ValidationError::InvalidStorageEntry => "invalid storage entry".fmt(f),
            ValidationError::UnexpectedManagement => "unexpected management transaction".fmt(f),
            ValidationError::InvalidStatistics => "invalid statistics".fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Detail, Transaction};
    use crypto::{SecretKey, UserId};
    use ser::{deserialize, serialize};

    #[test]
    fn test_transaction_round_trip() {
        let key = SecretKey::from_seed(b"sender");
        let transaction = Transaction::signed(
            7,
            Detail::Transfer {
                to: UserId::from(&SecretKey::from_seed(b"receiver").public()),
                amount: 1000,
            },
            &key,
        );

        let raw = serialize(&*transaction);
        assert_eq!(raw.len(), transaction.size());

        let parsed: Transaction = deserialize(raw.as_ref()).unwrap();
        assert_eq!(parsed.id(), transaction.id());
        assert!(parsed.validate_signatures());
    }

    #[test]
    fn test_signature_covers_content() {
        let key = SecretKey::from_seed(b"sender");
        let transaction = Transaction::signed(
            7,
            Detail::Transfer {
                to: UserId::from(&key.public()),
                amount: 1000,
            },
            &key,
        );

        let mut raw = serialize(&*transaction).take();
        // clobber the amount
        let len = raw.len();
        raw[len - 70] ^= 0xff;
        if let Ok(parsed) = deserialize::<_, Transaction>(&raw[..]) {
            assert!(!parsed.validate_signatures());
        }
    }

    #[test]
    fn test_management_flags() {
        let key = SecretKey::from_seed(b"miner");
        let init = Transaction::signed(
            1,
            Detail::Init {
                initialization_time: 1_700_000_000,
                block_interval: 15,
            },
            &key,
        );
        assert!(init.is_management());
        assert_eq!(init.fee(), 0);

        let transfer = Transaction::signed(
            1,
            Detail::Transfer {
                to: UserId::from(&key.public()),
                amount: 1,
            },
            &key,
        );
        assert!(!transfer.is_management());
        assert!(transfer.fee() > 0);
    }
}
