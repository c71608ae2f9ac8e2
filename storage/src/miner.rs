use crypto::{MinerId, UserId};

/// A registered miner and its stake.
#[derive(Debug, Clone, PartialEq)]
pub struct Miner {
    pub id: MinerId,
    pub owner: UserId,
    /// Tokens staked on this miner.
    pub stake: u64,
    /// Where the miner can be reached, if it published an endpoint.
    pub endpoint: Option<String>,
}

impl Miner {
    pub fn new(id: MinerId, owner: UserId, stake: u64) -> Miner {
        Miner {
            id: id,
            owner: owner,
            stake: stake,
            endpoint: None,
        }
    }

    /// Stake that counts for the given block. Stake history is flattened,
    /// the full stake is active immediately.
    pub fn active_stake(&self, _block_id: u32) -> u64 {
        self.stake
    }
}

/// Miners ordered by descending stake, ties broken by id. The round-robin
/// queue calculation iterates this from the richest miner down.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopMiners {
    miners: Vec<Miner>,
}

impl TopMiners {
    pub fn new(mut miners: Vec<Miner>) -> TopMiners {
        miners.sort_by(|a, b| b.stake.cmp(&a.stake).then_with(|| a.id.cmp(&b.id)));
        TopMiners { miners: miners }
    }

    pub fn iter<'a>(&'a self) -> impl Iterator<Item = &'a Miner> {
        self.miners.iter()
    }

    pub fn len(&self) -> usize {
        self.miners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.miners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Miner, TopMiners};
    use crypto::{MinerId, SecretKey, UserId};

    fn miner(seed: &[u8], stake: u64) -> Miner {
        let key = SecretKey::from_seed(seed);
        Miner::new(
            MinerId::from(&key.public()),
            UserId::from(&key.public()),
            stake,
        )
    }

    #[test]
    fn test_top_miners_are_sorted_by_stake() {
        let top = TopMiners::new(vec![miner(b"a", 10), miner(b"b", 30), miner(b"c", 20)]);
        let stakes: Vec<_> = top.iter().map(|m| m.stake).collect();
        assert_eq!(stakes, vec![30, 20, 10]);
    }
}
