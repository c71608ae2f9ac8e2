use crypto::MinerId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Peers blocked for a fixed period after a protocol violation.
pub struct BlockedPeers {
    duration: Duration,
    blocked: Mutex<HashMap<MinerId, Instant>>,
}

impl Default for BlockedPeers {
    fn default() -> Self {
        BlockedPeers::new(Duration::from_secs(60))
    }
}

impl BlockedPeers {
    pub fn new(duration: Duration) -> BlockedPeers {
        BlockedPeers {
            duration: duration,
            blocked: Mutex::new(HashMap::new()),
        }
    }

    pub fn block(&self, id: MinerId) {
        self.blocked.lock().insert(id, Instant::now() + self.duration);
    }

    pub fn is_blocked(&self, id: &MinerId) -> bool {
        let mut blocked = self.blocked.lock();
        let now = Instant::now();
        blocked.retain(|_, until| *until > now);
        blocked.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::BlockedPeers;
    use crypto::{MinerId, SecretKey};
    use std::time::Duration;

    #[test]
    fn test_block_expires() {
        let id = MinerId::from(&SecretKey::from_seed(b"peer").public());
        let blocked = BlockedPeers::new(Duration::from_secs(0));
        blocked.block(id);
        assert!(!blocked.is_blocked(&id));

        let blocked = BlockedPeers::new(Duration::from_secs(60));
        blocked.block(id);
        assert!(blocked.is_blocked(&id));
    }
}
