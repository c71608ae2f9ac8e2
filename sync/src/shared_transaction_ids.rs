use chain::TransactionId;
use std::collections::{BTreeSet, VecDeque};

/// Bounded rotating record of transaction ids already shared with a peer.
/// Old chunks fall off the back, so long-lived sessions keep a sliding
/// window of recently gossiped ids.
pub struct SharedTransactionIds {
    max_chunks: usize,
    chunk_capacity: usize,
    chunks: VecDeque<BTreeSet<TransactionId>>,
}

impl Default for SharedTransactionIds {
    fn default() -> Self {
        SharedTransactionIds::new(64, 2048)
    }
}

impl SharedTransactionIds {
    pub fn new(max_chunks: usize, chunk_capacity: usize) -> SharedTransactionIds {
        let mut chunks = VecDeque::new();
        chunks.push_front(BTreeSet::new());
        SharedTransactionIds {
            max_chunks: max_chunks,
            chunk_capacity: chunk_capacity,
            chunks: chunks,
        }
    }

    /// Returns true when the id has not been shared before.
    pub fn insert(&mut self, transaction_id: TransactionId) -> bool {
        if self.contains(&transaction_id) {
            return false;
        }

        let rotate = {
            let chunk = self.chunks.front_mut().expect("at least one chunk; qed");
            chunk.insert(transaction_id);
            chunk.len() == self.chunk_capacity
        };

        if rotate {
            self.chunks.push_front(BTreeSet::new());
            if self.chunks.len() > self.max_chunks {
                self.chunks.pop_back();
            }
        }
        true
    }

    pub fn contains(&self, transaction_id: &TransactionId) -> bool {
        self.chunks.iter().any(|chunk| chunk.contains(transaction_id))
    }
}

#[cfg(test)]
mod tests {
    use super::SharedTransactionIds;
    use chain::TransactionId;
    use crypto::sha256;

    fn id(index: u32) -> TransactionId {
        TransactionId::new(2, index, 100, sha256(&index.to_le_bytes()))
    }

    #[test]
    fn test_deduplication() {
        let mut shared = SharedTransactionIds::new(4, 8);
        assert!(shared.insert(id(1)));
        assert!(!shared.insert(id(1)));
        assert!(shared.insert(id(2)));
    }

    #[test]
    fn test_rotation_forgets_old_ids() {
        let mut shared = SharedTransactionIds::new(2, 2);
        for index in 0..8 {
            assert!(shared.insert(id(index)));
        }
        // the most recent ids are still known
        assert!(shared.contains(&id(6)));
        assert!(shared.contains(&id(7)));
        // the oldest ids rotated out and can be shared again
        assert!(!shared.contains(&id(0)));
        assert!(!shared.contains(&id(1)));
    }
}
