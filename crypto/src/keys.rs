//! ed25519 key and signature wrappers. Signing always covers a domain
//! prefix followed by the message bytes.

use ed25519_dalek::{ExpandedSecretKey, Verifier};
use hash::sha256;
use primitives::hash::{H256, H512};
use rand::rngs::OsRng;
use rand::RngCore;
use ser::{Deserializable, Error as SerError, Reader, Serializable, Stream};
use std::convert::TryFrom;
use std::{fmt, io};

/// ed25519 public key.
#[derive(Clone, Copy)]
pub struct PublicKey {
    key: ed25519_dalek::PublicKey,
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Option<PublicKey> {
        ed25519_dalek::PublicKey::from_bytes(bytes)
            .ok()
            .map(|key| PublicKey { key: key })
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.key.to_bytes()
    }

    /// Verifies a signature over `prefix || message`.
    pub fn verify(&self, prefix: &[u8], message: &[u8], signature: &Signature) -> bool {
        let raw = match ed25519_dalek::Signature::try_from(&signature.0[..]) {
            Ok(raw) => raw,
            Err(_) => return false,
        };

        let mut data = Vec::with_capacity(prefix.len() + message.len());
        data.extend_from_slice(prefix);
        data.extend_from_slice(message);
        self.key.verify(&data, &raw).is_ok()
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.key.as_bytes() == other.key.as_bytes()
    }
}

impl Eq for PublicKey {}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        H256::from(&self.to_bytes()[..]).fmt(f)
    }
}

impl Serializable for PublicKey {
    fn serialize(&self, stream: &mut Stream) {
        stream.append_slice(&self.to_bytes());
    }
}

impl Deserializable for PublicKey {
    fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, SerError>
    where
        T: io::Read,
    {
        let raw: H256 = reader.read()?;
        PublicKey::from_bytes(&*raw).ok_or(SerError::MalformedData)
    }
}

/// ed25519 signature.
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub H512);

impl Signature {
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serializable for Signature {
    fn serialize(&self, stream: &mut Stream) {
        stream.append(&self.0);
    }
}

impl Deserializable for Signature {
    fn deserialize<T>(reader: &mut Reader<T>) -> Result<Self, SerError>
    where
        T: io::Read,
    {
        Ok(Signature(reader.read()?))
    }
}

/// ed25519 secret key, stored as the 32-byte seed.
#[derive(Clone)]
pub struct SecretKey {
    seed: [u8; 32],
    public: PublicKey,
}

impl SecretKey {
    /// Generates a new random key.
    pub fn generate() -> SecretKey {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        SecretKey::from_seed_bytes(seed)
    }

    /// Derives a key from arbitrary seed material. Deterministic, used by
    /// tests and key files.
    pub fn from_seed(material: &[u8]) -> SecretKey {
        SecretKey::from_seed_bytes(sha256(material).take())
    }

    fn from_seed_bytes(seed: [u8; 32]) -> SecretKey {
        let secret =
            ed25519_dalek::SecretKey::from_bytes(&seed).expect("seed is 32 bytes; qed");
        let public = ed25519_dalek::PublicKey::from(&secret);
        SecretKey {
            seed: seed,
            public: PublicKey { key: public },
        }
    }

    pub fn public(&self) -> PublicKey {
        self.public
    }

    /// Signs `prefix || message`.
    pub fn sign(&self, prefix: &[u8], message: &[u8]) -> Signature {
        let secret =
            ed25519_dalek::SecretKey::from_bytes(&self.seed).expect("seed is 32 bytes; qed");
        let expanded: ExpandedSecretKey = (&secret).into();

        let mut data = Vec::with_capacity(prefix.len() + message.len());
        data.extend_from_slice(prefix);
        data.extend_from_slice(message);

        let raw = expanded.sign(&data, &self.public.key);
        Signature(H512::from(&raw.to_bytes()[..]))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SecretKey({:?})", self.public)
    }
}

#[cfg(test)]
mod tests {
    use super::{PublicKey, SecretKey};

    #[test]
    fn test_sign_and_verify() {
        let key = SecretKey::from_seed(b"alpha");
        let signature = key.sign(b"PREFIX:", b"message");
        assert!(key.public().verify(b"PREFIX:", b"message", &signature));
        assert!(!key.public().verify(b"PREFIX:", b"other message", &signature));
        assert!(!key.public().verify(b"OTHER:", b"message", &signature));
    }

    #[test]
    fn test_verify_rejects_other_key() {
        let key = SecretKey::from_seed(b"alpha");
        let other = SecretKey::from_seed(b"beta");
        let signature = key.sign(b"PREFIX:", b"message");
        assert!(!other.public().verify(b"PREFIX:", b"message", &signature));
    }

    #[test]
    fn test_public_key_round_trip() {
        let key = SecretKey::generate();
        let restored = PublicKey::from_bytes(&key.public().to_bytes()).unwrap();
        assert_eq!(restored, key.public());
    }
}
