use super::Channel;
use std::collections::HashMap;
use tdm_common::db::core::{ChannelKey, SignalData, Topology};
use tdm_common::db::indices::{FpgaId, SignalId};

#[derive(Clone, Debug, PartialEq)]
pub enum JournalEntry {
    Demand {
        from: FpgaId,
        to: FpgaId,
        delta: i32,
    },
    Passed {
        key: ChannelKey,
        dir: usize,
        signal: SignalId,
        prev: Option<u32>,
    },
}

#[derive(Clone, Debug)]
pub struct RoutingState {
    channels: HashMap<ChannelKey, Channel>,
    keys: Vec<ChannelKey>,
    capacity: i32,
    total_demand: i64,
    pub round: u32,
    journal: Option<Vec<JournalEntry>>,
}

impl RoutingState {
    pub fn new(topology: &Topology, capacity: u32) -> Self {
        let keys = topology.channels();
        let channels = keys
            .iter()
            .map(|&k| (k, Channel::new(k, capacity as i32)))
            .collect();
        Self {
            channels,
            keys,
            capacity: capacity as i32,
            total_demand: 0,
            round: 1,
            journal: None,
        }
    }

    pub fn global_capacity(&self) -> i32 {
        self.capacity
    }

    pub fn total_demand(&self) -> i64 {
        self.total_demand
    }

    pub fn num_channels(&self) -> usize {
        self.keys.len()
    }

    pub fn keys(&self) -> &[ChannelKey] {
        &self.keys
    }

    pub fn channel(&self, key: ChannelKey) -> Option<&Channel> {
        self.channels.get(&key)
    }

    pub fn channel_mut(&mut self, key: ChannelKey) -> Option<&mut Channel> {
        self.channels.get_mut(&key)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.keys.iter().filter_map(|k| self.channels.get(k))
    }

    fn entry(&mut self, key: ChannelKey) -> &mut Channel {
        if !self.channels.contains_key(&key) {
            log::warn!(
                "Demand on unknown channel ({}, {}); creating it with zero capacity",
                key.lo,
                key.hi
            );
            self.keys.push(key);
        }
        self.channels
            .entry(key)
            .or_insert_with(|| Channel::new(key, 0))
    }

    fn apply_demand(&mut self, from: FpgaId, to: FpgaId, delta: i32) {
        let dir = ChannelKey::direction(from, to);
        let ch = self.entry(ChannelKey::new(from, to));
        ch.demand[dir] += delta;
        ch.rebalance();
        self.total_demand += delta as i64;
    }

    pub fn add_demand(&mut self, from: FpgaId, to: FpgaId) {
        self.apply_demand(from, to, 1);
        if let Some(j) = self.journal.as_mut() {
            j.push(JournalEntry::Demand { from, to, delta: 1 });
        }
    }

    pub fn sub_demand(&mut self, from: FpgaId, to: FpgaId) {
        self.apply_demand(from, to, -1);
        if let Some(j) = self.journal.as_mut() {
            j.push(JournalEntry::Demand {
                from,
                to,
                delta: -1,
            });
        }
    }

    pub fn demand(&self, from: FpgaId, to: FpgaId) -> i32 {
        self.channel(ChannelKey::new(from, to))
            .map(|ch| ch.demand[ChannelKey::direction(from, to)])
            .unwrap_or(0)
    }

    pub fn capacity(&self, from: FpgaId, to: FpgaId) -> i32 {
        self.channel(ChannelKey::new(from, to))
            .map(|ch| ch.split[ChannelKey::direction(from, to)])
            .unwrap_or(0)
    }

    pub fn tdm(&self, from: FpgaId, to: FpgaId) -> u32 {
        match self.channel(ChannelKey::new(from, to)) {
            Some(ch) => ch.tdm(ChannelKey::direction(from, to)),
            None => self.demand(from, to).max(0) as u32,
        }
    }

    pub fn approx_ratio(&self, from: FpgaId, to: FpgaId) -> f64 {
        match self.channel(ChannelKey::new(from, to)) {
            Some(ch) => ch.approx_ratio(ChannelKey::direction(from, to)),
            None => 1.0,
        }
    }

    pub fn history_used(&self, from: FpgaId, to: FpgaId) -> f64 {
        self.channel(ChannelKey::new(from, to))
            .map(|ch| ch.history_used[ChannelKey::direction(from, to)])
            .unwrap_or(0.0)
    }

    fn set_passed(&mut self, from: FpgaId, to: FpgaId, signal: SignalId, weight: Option<u32>) {
        let key = ChannelKey::new(from, to);
        let dir = ChannelKey::direction(from, to);
        let ch = self.entry(key);
        let prev = match weight {
            Some(w) => ch.passed[dir].insert(signal, w),
            None => ch.passed[dir].remove(&signal),
        };
        if prev != weight
            && let Some(j) = self.journal.as_mut()
        {
            j.push(JournalEntry::Passed {
                key,
                dir,
                signal,
                prev,
            });
        }
    }

    pub fn record_passed(&mut self, signal: &SignalData) {
        for i in signal.tree.bfs() {
            let node = signal.tree.node(i);
            if let Some(p) = node.parent {
                let from = signal.tree.node(p).fpga;
                self.set_passed(from, node.fpga, signal.id, Some(node.edge_weight));
            }
        }
    }

    pub fn clear_passed(&mut self, signal: &SignalData) {
        for (from, to) in signal.tree.edges() {
            self.set_passed(from, to, signal.id, None);
        }
    }

    pub fn passed(&self, from: FpgaId, to: FpgaId) -> Vec<SignalId> {
        self.channel(ChannelKey::new(from, to))
            .map(|ch| {
                ch.passed[ChannelKey::direction(from, to)]
                    .keys()
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn passed_weight(&self, from: FpgaId, to: FpgaId) -> u64 {
        self.channel(ChannelKey::new(from, to))
            .map(|ch| ch.passed_weight(ChannelKey::direction(from, to)))
            .unwrap_or(0)
    }

    pub fn is_journaling(&self) -> bool {
        self.journal.is_some()
    }

    pub fn begin_journal(&mut self) {
        debug_assert!(self.journal.is_none(), "nested journal");
        self.journal = Some(Vec::new());
    }

    pub fn journal(&self) -> &[JournalEntry] {
        self.journal.as_deref().unwrap_or(&[])
    }

    pub fn take_journal(&mut self) -> Vec<JournalEntry> {
        self.journal.take().unwrap_or_default()
    }

    // Reverts `entries` newest first. Journaling must be off.
    pub fn undo(&mut self, entries: &[JournalEntry]) {
        for e in entries.iter().rev() {
            match *e {
                JournalEntry::Demand { from, to, delta } => self.apply_demand(from, to, -delta),
                JournalEntry::Passed {
                    key,
                    dir,
                    signal,
                    prev,
                } => {
                    if let Some(ch) = self.channels.get_mut(&key) {
                        match prev {
                            Some(w) => ch.passed[dir].insert(signal, w),
                            None => ch.passed[dir].remove(&signal),
                        };
                    }
                }
            }
        }
    }

    pub fn update_history_used(&mut self, signals: &[SignalData]) {
        let (min_w, max_w) = signals.iter().fold((f64::MAX, f64::MIN), |(lo, hi), s| {
            (lo.min(s.stats.signal_weight), hi.max(s.stats.signal_weight))
        });
        let range = max_w - min_w;
        let norm = |id: SignalId| -> f64 {
            if range > 0.0 {
                (signals[id.index()].stats.signal_weight - min_w) / range
            } else {
                0.0
            }
        };

        for ch in self.channels.values_mut() {
            for dir in 0..2 {
                ch.history_used[dir] = if ch.is_oversubscribed(dir) {
                    let sum: f64 = ch.passed[dir].keys().map(|&s| norm(s) + 1.0).sum();
                    sum / ch.effective_capacity(dir) as f64
                } else {
                    0.0
                };
            }
        }
    }

    // history_cost = tdm x history_penalty on oversubscribed directions. The
    // result is logged between rounds and never enters a path cost.
    pub fn update_history_cost(&mut self) {
        for ch in self.channels.values_mut() {
            for dir in 0..2 {
                ch.history_cost[dir] = if ch.is_oversubscribed(dir) {
                    ch.tdm(dir) as f64 * ch.history_penalty[dir]
                } else {
                    0.0
                };
            }
        }
    }

    pub fn total_history_cost(&self) -> f64 {
        self.channels().map(|ch| ch.history_cost[0] + ch.history_cost[1]).sum()
    }
}
