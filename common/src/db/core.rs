use crate::db::indices::*;
use crate::db::tree::RoutingTree;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("line {line}: {msg}")]
    Parse { line: usize, msg: String },
    #[error("signal '{signal}' references FPGA {fpga} outside the topology ({count} FPGAs)")]
    UnknownFpga {
        signal: String,
        fpga: u32,
        count: usize,
    },
    #[error("signal '{0}' has no sinks")]
    NoSinks(String),
    #[error("signal '{0}' is defined twice")]
    DuplicateSignal(String),
    #[error("signal '{name}' lists {sinks} sinks but {weights} weights")]
    WeightMismatch {
        name: String,
        sinks: usize,
        weights: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    pub lo: FpgaId,
    pub hi: FpgaId,
}

impl ChannelKey {
    #[inline]
    pub fn new(a: FpgaId, b: FpgaId) -> Self {
        if a <= b {
            Self { lo: a, hi: b }
        } else {
            Self { lo: b, hi: a }
        }
    }

    #[inline]
    pub fn direction(from: FpgaId, to: FpgaId) -> usize {
        if from < to { 0 } else { 1 }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FpgaData {
    pub id: FpgaId,
    pub neighbors: Vec<(FpgaId, u32)>,
    nbr_index: HashMap<FpgaId, usize>,
}

impl FpgaData {
    pub fn new(id: FpgaId) -> Self {
        Self {
            id,
            neighbors: Vec::new(),
            nbr_index: HashMap::new(),
        }
    }

    pub fn is_neighbor(&self, other: FpgaId) -> bool {
        self.nbr_index.contains_key(&other)
    }

}

#[derive(Clone, Debug, Default)]
pub struct Topology {
    pub fpgas: Vec<FpgaData>,
    pub capacity: u32,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_fpgas(&self) -> usize {
        self.fpgas.len()
    }

    fn ensure_fpga(&mut self, id: FpgaId) {
        while self.fpgas.len() <= id.index() {
            let next = FpgaId::new(self.fpgas.len());
            self.fpgas.push(FpgaData::new(next));
        }
    }

    pub fn add_link(&mut self, a: FpgaId, b: FpgaId, pairs: u32) {
        self.ensure_fpga(a);
        self.ensure_fpga(b);
        let fpga = &mut self.fpgas[a.index()];
        match fpga.nbr_index.get(&b) {
            Some(&i) => fpga.neighbors[i].1 += pairs,
            None => {
                fpga.nbr_index.insert(b, fpga.neighbors.len());
                fpga.neighbors.push((b, pairs));
            }
        }
    }

    pub fn connect(&mut self, a: FpgaId, b: FpgaId, pairs: u32) {
        self.add_link(a, b, pairs);
        self.add_link(b, a, pairs);
    }

    pub fn neighbors(&self, id: FpgaId) -> &[(FpgaId, u32)] {
        self.fpgas
            .get(id.index())
            .map(|f| f.neighbors.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_adjacent(&self, a: FpgaId, b: FpgaId) -> bool {
        self.fpgas
            .get(a.index())
            .is_some_and(|f| f.is_neighbor(b))
    }

    pub fn interconnect_count(&self) -> usize {
        self.fpgas.iter().map(|f| f.neighbors.len()).sum::<usize>() / 2
    }

    pub fn channels(&self) -> Vec<ChannelKey> {
        let mut keys = Vec::new();
        for f in &self.fpgas {
            for &(nbr, _) in &f.neighbors {
                if f.id < nbr {
                    keys.push(ChannelKey::new(f.id, nbr));
                }
            }
        }
        keys
    }

    pub fn derive_capacity(&self) -> u32 {
        if self.fpgas.is_empty() {
            return 0;
        }
        let interconnect = self.interconnect_count();
        ((interconnect % 100) * 1000 / self.fpgas.len() % 10 * 10) as u32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sink {
    pub fpga: FpgaId,
    pub weight: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubNet {
    pub signal: SignalId,
    pub source: FpgaId,
    pub sink: FpgaId,
    pub weight: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoutedPath {
    pub path: Vec<FpgaId>,
    pub subnet: SubNet,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TdmStats {
    pub max_tdm: f64,
    pub min_tdm: f64,
    pub total_tdm: f64,
    pub total_edge_weight: f64,
    pub tree_edges: usize,
    pub cost: f64,
    pub signal_weight: f64,
}

#[derive(Clone, Debug)]
pub struct SignalData {
    pub id: SignalId,
    pub name: String,
    pub source: FpgaId,
    pub sinks: Vec<Sink>,
    pub sink_weights: HashMap<FpgaId, u32>,
    pub total_sink_weight: u64,

    pub tree: RoutingTree,
    pub routes: Vec<RoutedPath>,
    pub channels: Vec<ChannelKey>,

    pub stats: TdmStats,
    pub criticality: f64,
    pub channel_penalty: HashMap<ChannelKey, f64>,
}

impl SignalData {
    pub fn subnets(&self) -> Vec<SubNet> {
        self.sinks
            .iter()
            .map(|s| SubNet {
                signal: self.id,
                source: self.source,
                sink: s.fpga,
                weight: s.weight,
            })
            .collect()
    }

    pub fn subnets_by_weight(&self) -> Vec<SubNet> {
        let mut subnets = self.subnets();
        subnets.sort_by(|a, b| b.weight.cmp(&a.weight));
        subnets
    }

    #[inline]
    pub fn sink_weight(&self, fpga: FpgaId) -> Option<u32> {
        self.sink_weights.get(&fpga).copied()
    }

    pub fn avg_sink_weight(&self) -> f64 {
        if self.sinks.is_empty() {
            return 0.0;
        }
        self.total_sink_weight as f64 / self.sinks.len() as f64
    }

    // avg sink weight x total TDM exposure + (avg edge weight - avg sink weight)
    pub fn compute_criticality(&mut self) -> f64 {
        let avg_sink = self.avg_sink_weight();
        let edge_penalty = if self.stats.tree_edges > 0 {
            self.stats.total_edge_weight / self.stats.tree_edges as f64 - avg_sink
        } else {
            0.0
        };
        self.criticality = avg_sink * self.stats.total_tdm + edge_penalty;
        self.criticality
    }

    pub fn penalty(&self, key: ChannelKey) -> f64 {
        self.channel_penalty.get(&key).copied().unwrap_or(1.0)
    }

    pub fn reset_tree(&mut self) {
        self.tree = RoutingTree::new(self.source);
        self.routes.clear();
        self.channels.clear();
    }

    pub fn rebuild_routes(&mut self) {
        self.routes = self
            .tree
            .sink_paths()
            .into_iter()
            .map(|path| {
                let sink = path[0];
                RoutedPath {
                    subnet: SubNet {
                        signal: self.id,
                        source: self.source,
                        sink,
                        weight: self.sink_weight(sink).unwrap_or(0),
                    },
                    path,
                }
            })
            .collect();
    }

    pub fn refresh_tree(&mut self) {
        self.tree.update_weights(&self.sink_weights);
        self.channels = self
            .tree
            .edges()
            .into_iter()
            .map(|(p, c)| ChannelKey::new(p, c))
            .collect();
    }
}

#[derive(Clone, Debug, Default)]
pub struct SystemDB {
    pub topology: Topology,
    pub signals: Vec<SignalData>,
    pub signal_name_map: HashMap<String, SignalId>,
}

impl SystemDB {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_fpgas(&self) -> usize {
        self.topology.num_fpgas()
    }

    pub fn num_signals(&self) -> usize {
        self.signals.len()
    }

    pub fn num_sinks(&self) -> usize {
        self.signals.iter().map(|s| s.sinks.len()).sum()
    }

    pub fn add_signal(
        &mut self,
        name: String,
        source: FpgaId,
        sinks: Vec<Sink>,
    ) -> Result<SignalId, DbError> {
        let count = self.topology.num_fpgas();
        if sinks.is_empty() {
            return Err(DbError::NoSinks(name));
        }
        if self.signal_name_map.contains_key(&name) {
            return Err(DbError::DuplicateSignal(name));
        }
        for fpga in std::iter::once(source).chain(sinks.iter().map(|s| s.fpga)) {
            if fpga.index() >= count {
                return Err(DbError::UnknownFpga {
                    signal: name,
                    fpga: fpga.0,
                    count,
                });
            }
        }

        let id = SignalId::new(self.signals.len());
        let mut sink_weights = HashMap::with_capacity(sinks.len());
        for s in &sinks {
            let w = sink_weights.entry(s.fpga).or_insert(0);
            *w = (*w).max(s.weight);
        }
        let total_sink_weight = sinks.iter().map(|s| s.weight as u64).sum();

        self.signal_name_map.insert(name.clone(), id);
        self.signals.push(SignalData {
            id,
            name,
            source,
            sinks,
            sink_weights,
            total_sink_weight,
            tree: RoutingTree::new(source),
            routes: Vec::new(),
            channels: Vec::new(),
            stats: TdmStats::default(),
            criticality: 0.0,
            channel_penalty: HashMap::new(),
        });
        Ok(id)
    }

    pub fn avg_sink_weight(&self) -> f64 {
        let sinks = self.num_sinks();
        if sinks == 0 {
            return 0.0;
        }
        let total: u64 = self.signals.iter().map(|s| s.total_sink_weight).sum();
        total as f64 / sinks as f64
    }
}
