extern crate ed25519_dalek;
extern crate rand;
extern crate sha2;

extern crate rondo_primitives as primitives;
extern crate rondo_serialization as ser;

mod hash;
mod ids;
mod keys;

pub use primitives::bytes;

pub use hash::{checksum, sha256};
pub use ids::{MinerId, UserId};
pub use keys::{PublicKey, SecretKey, Signature};
