//! Short identifiers derived from public keys. Both miners and users are
//! addressed by the first 20 bytes of the SHA-256 of their public key.

use hash::sha256;
use keys::PublicKey;
use primitives::hash::H160;
use ser::{Deserializable, Error as SerError, Reader, Serializable, Stream};
use std::{fmt, io};

macro_rules! impl_key_id {
    ($name: ident) => {
        #[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub H160);

        impl $name {
            pub fn is_valid(&self) -> bool {
                !self.0.is_zero()
            }
        }

        impl<'a> From<&'a PublicKey> for $name {
            fn from(key: &'a PublicKey) -> Self {
                let mut id = H160::default();
                id.copy_from_slice(&sha256(&key.to_bytes())[0..20]);
                $name(id)
            }
        }

        impl From<H160> for $name {
            fn from(h: H160) -> Self {
                $name(h)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl Serializable for $name {
            fn serialize(&self, stream: &mut Stream) {
                stream.append(&self.0);
            }
        }

        impl Deserializable for $name {
            fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, SerError>
            where
                T: io::Read,
            {
                Ok($name(reader.read()?))
            }
        }
    };
}

impl_key_id!(MinerId);
impl_key_id!(UserId);

impl From<MinerId> for UserId {
    fn from(id: MinerId) -> Self {
        UserId(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{MinerId, UserId};
    use keys::SecretKey;

    #[test]
    fn test_id_derivation_is_stable() {
        let key = SecretKey::from_seed(b"miner");
        let id1 = MinerId::from(&key.public());
        let id2 = MinerId::from(&key.public());
        assert_eq!(id1, id2);
        assert!(id1.is_valid());
        assert!(!MinerId::default().is_valid());
    }

    #[test]
    fn test_miner_and_user_ids_match_for_same_key() {
        let key = SecretKey::from_seed(b"owner");
        let miner = MinerId::from(&key.public());
        let user = UserId::from(&key.public());
        assert_eq!(miner.0, user.0);
    }
}
