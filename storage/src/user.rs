use crypto::{PublicKey, UserId};

/// A chain user: a key and a balance.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub key: PublicKey,
    pub balance: u64,
}

impl User {
    pub fn new(id: UserId, key: PublicKey, balance: u64) -> User {
        User {
            id: id,
            key: key,
            balance: balance,
        }
    }

    pub fn has_key(&self, key: &PublicKey) -> bool {
        self.key == *key
    }
}
