//! Deterministic stake-weighted round-robin over the top miners.

use chain::MinersQueue;
use crypto::MinerId;
use network::MINERS_QUEUE_SIZE;
use std::collections::HashMap;
use storage::TopMiners;

/// Produces the next `new_miners` scheduled miner slots.
///
/// A miner qualifies while the running stake sum divided by its stake fits
/// into one queue; each qualified miner is then emitted every
/// `ceil(stakes_sum / stake)` slots, phased by its distance from its last
/// appearance in the current queue.
pub fn next_miners(
    current_queue: &MinersQueue,
    top_miners: &TopMiners,
    new_miners: u32,
    block_id: u32,
) -> MinersQueue {
    assert!(new_miners as usize <= MINERS_QUEUE_SIZE);
    assert!(current_queue.is_empty() || current_queue.len() == MINERS_QUEUE_SIZE);

    // qualify miners from the richest down
    let mut stakes_sum = 0u64;
    let mut potential = Vec::new();
    for miner in top_miners.iter() {
        let stake = miner.active_stake(block_id).max(1);
        stakes_sum += stake;
        let period = (stakes_sum + stake - 1) / stake;
        if period > MINERS_QUEUE_SIZE as u64 {
            stakes_sum -= stake;
            break;
        }
        potential.push(miner);
    }

    let mut result = MinersQueue::new();
    if potential.is_empty() {
        return result;
    }

    // distance to the last appearance in the current queue
    let mut last_mining: HashMap<MinerId, i64> = HashMap::new();
    for (position, miner) in current_queue.iter().enumerate() {
        last_mining.insert(*miner, (current_queue.len() - position) as i64);
    }

    struct SelectedMiner {
        id: MinerId,
        period: i64,
        distance: i64,
    }

    let mut selected: Vec<SelectedMiner> = potential
        .into_iter()
        .map(|miner| {
            let stake = miner.active_stake(block_id).max(1);
            let period = ((stakes_sum + stake - 1) / stake) as i64;
            let distance = last_mining
                .get(&miner.id)
                .cloned()
                .unwrap_or(MINERS_QUEUE_SIZE as i64);
            SelectedMiner {
                id: miner.id,
                period: period,
                distance: distance,
            }
        })
        .collect();

    while result.len() < new_miners as usize {
        for miner in selected.iter_mut() {
            if miner.distance >= miner.period {
                result.push_back(miner.id);
                if result.len() == new_miners as usize {
                    break;
                }
                miner.distance = 0;
            }
            miner.distance += 1;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::next_miners;
    use chain::MinersQueue;
    use crypto::{MinerId, SecretKey, UserId};
    use std::collections::HashMap;
    use storage::{Miner, TopMiners};

    fn miners(stakes: &[u64]) -> (Vec<MinerId>, TopMiners) {
        let miners: Vec<Miner> = stakes
            .iter()
            .enumerate()
            .map(|(index, stake)| {
                let key = SecretKey::from_seed(format!("miner-{}", index).as_bytes());
                Miner::new(
                    MinerId::from(&key.public()),
                    UserId::from(&key.public()),
                    *stake,
                )
            })
            .collect();
        let ids = miners.iter().map(|miner| miner.id).collect();
        (ids, TopMiners::new(miners))
    }

    fn occurrences(queue: &MinersQueue) -> HashMap<MinerId, usize> {
        let mut result = HashMap::new();
        for miner in queue {
            *result.entry(*miner).or_insert(0) += 1;
        }
        result
    }

    #[test]
    fn test_two_miners_split_by_stake() {
        let (ids, top) = miners(&[2000, 10000]);
        let queue = next_miners(&MinersQueue::new(), &top, 240, 1);
        assert_eq!(queue.len(), 240);

        let counts = occurrences(&queue);
        assert_eq!(counts[&ids[0]], 60);
        assert_eq!(counts[&ids[1]], 180);
    }

    #[test]
    fn test_dust_stake_is_excluded() {
        let (ids, top) = miners(&[2000, 1]);
        let queue = next_miners(&MinersQueue::new(), &top, 240, 1);
        let counts = occurrences(&queue);
        assert_eq!(counts[&ids[0]], 240);
        assert!(!counts.contains_key(&ids[1]));
    }

    #[test]
    fn test_equal_stakes_split_evenly() {
        let (ids, top) = miners(&[10000, 10000]);
        let queue = next_miners(&MinersQueue::new(), &top, 240, 1);
        let counts = occurrences(&queue);
        assert_eq!(counts[&ids[0]], 120);
        assert_eq!(counts[&ids[1]], 120);
    }

    #[test]
    fn test_eight_miners_get_stake_proportional_slots() {
        let stakes = [10u64, 10, 20, 20, 20, 40, 40, 80];
        let (ids, top) = miners(&stakes);
        let queue = next_miners(&MinersQueue::new(), &top, 240, 1);
        assert_eq!(queue.len(), 240);

        let counts = occurrences(&queue);
        for (id, stake) in ids.iter().zip(stakes.iter()) {
            assert_eq!(counts[id], *stake as usize);
        }
    }

    #[test]
    fn test_continuation_stays_proportional() {
        let (ids, top) = miners(&[5, 10, 15]);
        let queue = next_miners(&MinersQueue::new(), &top, 240, 1);
        let counts = occurrences(&queue);
        for (id, stake) in ids.iter().zip([5u64, 10, 15].iter()) {
            assert_eq!(counts[id], (240 / 30) * *stake as usize);
        }

        // extending an existing queue keeps the same shares
        let continuation = next_miners(&queue, &top, 30, 1);
        let counts = occurrences(&continuation);
        for (id, stake) in ids.iter().zip([5u64, 10, 15].iter()) {
            assert_eq!(counts[id], *stake as usize);
        }
    }
}
