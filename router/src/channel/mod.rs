pub mod state;

pub use state::{JournalEntry, RoutingState};

use std::collections::BTreeMap;
use tdm_common::db::core::ChannelKey;
use tdm_common::db::indices::SignalId;

// One physical link between two adjacent FPGAs. Index 0 of every per-direction
// array is the min->max direction, index 1 is max->min.
#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    pub key: ChannelKey,
    pub capacity: i32,
    pub split: [i32; 2],
    pub demand: [i32; 2],
    pub passed: [BTreeMap<SignalId, u32>; 2],
    pub history_used: [f64; 2],
    // Reported per round only. Path costs read `history_used`.
    pub history_cost: [f64; 2],
    // Fixed at 1.0; nothing escalates it.
    pub history_penalty: [f64; 2],
    pub rr_times: u32,
}

impl Channel {
    pub fn new(key: ChannelKey, capacity: i32) -> Self {
        let mut ch = Self {
            key,
            capacity,
            split: [0; 2],
            demand: [0; 2],
            passed: [BTreeMap::new(), BTreeMap::new()],
            history_used: [0.0; 2],
            history_cost: [0.0; 2],
            history_penalty: [1.0; 2],
            rr_times: 0,
        };
        ch.rebalance();
        ch
    }

    pub fn rebalance(&mut self) {
        self.split = split_capacity(self.capacity, self.demand);
    }

    #[inline]
    pub fn effective_capacity(&self, dir: usize) -> i32 {
        self.split[dir].max(1)
    }

    #[inline]
    pub fn tdm(&self, dir: usize) -> u32 {
        let d = self.demand[dir].max(0);
        let cap = self.effective_capacity(dir);
        ((d + cap - 1) / cap) as u32
    }

    #[inline]
    pub fn approx_ratio(&self, dir: usize) -> f64 {
        let r = (self.demand[dir].max(0) + 1) as f64 / self.effective_capacity(dir) as f64;
        r.max(1.0)
    }

    pub fn passed_weight(&self, dir: usize) -> u64 {
        self.passed[dir].values().map(|&w| w as u64).sum()
    }

    pub fn is_oversubscribed(&self, dir: usize) -> bool {
        self.tdm(dir) > 1
    }
}

pub fn split_capacity(capacity: i32, demand: [i32; 2]) -> [i32; 2] {
    let d0 = demand[0].max(0) as i64;
    let d1 = demand[1].max(0) as i64;
    let c = capacity as i64;
    let total = d0 + d1;
    if total == 0 {
        return [(c - c / 2) as i32, (c / 2) as i32];
    }

    let mut cap0 = c * d0 / total;
    let mut cap1 = c - cap0;
    if c > 0 {
        if cap0 == 0 && d0 != 0 {
            cap0 += 1;
            cap1 -= 1;
        } else if cap1 == 0 && d1 != 0 {
            cap1 += 1;
            cap0 -= 1;
        }
    }
    [cap0 as i32, cap1 as i32]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdm_common::db::indices::FpgaId;

    fn key() -> ChannelKey {
        ChannelKey::new(FpgaId(0), FpgaId(1))
    }

    #[test]
    fn idle_channel_splits_evenly() {
        assert_eq!(split_capacity(10, [0, 0]), [5, 5]);
        assert_eq!(split_capacity(7, [0, 0]), [4, 3]);
    }

    #[test]
    fn split_follows_demand_ratio() {
        assert_eq!(split_capacity(10, [3, 1]), [7, 3]);
        assert_eq!(split_capacity(10, [0, 4]), [0, 10]);
    }

    #[test]
    fn minority_direction_keeps_one_unit() {
        assert_eq!(split_capacity(10, [1, 99]), [1, 9]);
        assert_eq!(split_capacity(10, [99, 1]), [9, 1]);
        assert_eq!(split_capacity(1, [5, 5]), [1, 0]);
    }

    #[test]
    fn split_always_sums_to_capacity() {
        for c in 0..12 {
            for d0 in 0..8 {
                for d1 in 0..8 {
                    let s = split_capacity(c, [d0, d1]);
                    assert_eq!(s[0] + s[1], c);
                    if c >= 2 {
                        assert!(d0 == 0 || s[0] >= 1);
                        assert!(d1 == 0 || s[1] >= 1);
                    }
                }
            }
        }
    }

    #[test]
    fn tdm_is_ceiling_of_demand_over_capacity() {
        let mut ch = Channel::new(key(), 4);
        ch.demand = [3, 0];
        ch.rebalance();
        assert_eq!(ch.split, [4, 0]);
        assert_eq!(ch.tdm(0), 1);
        ch.demand = [9, 0];
        ch.rebalance();
        assert_eq!(ch.tdm(0), 3);
        assert_eq!(ch.tdm(1), 0);
    }

    #[test]
    fn zero_capacity_is_treated_as_one() {
        let mut ch = Channel::new(key(), 0);
        ch.demand = [2, 0];
        ch.rebalance();
        assert_eq!(ch.split, [0, 0]);
        assert_eq!(ch.tdm(0), 2);
        assert_eq!(ch.approx_ratio(0), 3.0);
    }
}
