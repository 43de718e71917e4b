use crate::channel::RoutingState;
use tdm_common::db::core::{ChannelKey, SignalData, TdmStats};
use tdm_common::db::indices::FpgaId;

const APPROX_FACTOR: f64 = 6.5;

pub trait PathCost {
    fn path_cost(
        &self,
        signal: &SignalData,
        path: &[FpgaId],
        weight: u32,
        state: &RoutingState,
    ) -> f64;
}

pub struct TdmCost;

pub struct CongestionCost;

// Walks edges `path[i+1] -> path[i]` accumulating a running prefix cost.
// Returns the summed prefixes and the number of sinks on the path.
fn walk<F>(signal: &SignalData, path: &[FpgaId], weight: u32, mut term: F) -> (f64, usize)
where
    F: FnMut(FpgaId, FpgaId, f64) -> f64,
{
    let mut weight = weight as f64;
    let mut sinks = 1;
    let mut prefix = 0.0;
    let mut total = 0.0;

    for i in 0..path.len().saturating_sub(1) {
        let (from, to) = (path[i + 1], path[i]);
        if i > 0
            && let Some(w) = signal.sink_weight(to)
        {
            sinks += 1;
            weight = weight.max(w as f64);
        }
        prefix += term(from, to, weight);
        total += prefix;
    }

    if let Some(&end) = path.last()
        && path.len() > 1
        && signal.sink_weight(end).is_some()
    {
        sinks += 1;
    }
    (total, sinks)
}

impl PathCost for TdmCost {
    fn path_cost(
        &self,
        signal: &SignalData,
        path: &[FpgaId],
        weight: u32,
        state: &RoutingState,
    ) -> f64 {
        let round = state.round.max(1) as f64;
        walk(signal, path, weight, |from, to, w| {
            let alpha = state.history_used(from, to) / round;
            (1.0 + alpha) * (w + APPROX_FACTOR * state.approx_ratio(from, to))
        })
        .0
    }
}

impl PathCost for CongestionCost {
    fn path_cost(
        &self,
        signal: &SignalData,
        path: &[FpgaId],
        weight: u32,
        state: &RoutingState,
    ) -> f64 {
        let (total, sinks) = walk(signal, path, weight, |from, to, w| {
            signal.penalty(ChannelKey::new(from, to)) * w * state.approx_ratio(from, to)
        });
        total / sinks as f64
    }
}

pub fn tree_tdm_cost(signal: &SignalData, state: &RoutingState) -> f64 {
    let tree = &signal.tree;
    tree.bfs()
        .into_iter()
        .filter_map(|i| {
            let node = tree.node(i);
            node.parent.map(|p| {
                state.tdm(tree.node(p).fpga, node.fpga) as f64 * node.edge_weight as f64
            })
        })
        .sum()
}

pub fn signal_stats(signal: &SignalData, state: &RoutingState) -> TdmStats {
    let tree = &signal.tree;
    let mut stats = TdmStats {
        min_tdm: f64::MAX,
        ..Default::default()
    };
    for i in tree.bfs() {
        let node = tree.node(i);
        let Some(p) = node.parent else { continue };
        let tdm = state.tdm(tree.node(p).fpga, node.fpga) as f64;
        stats.max_tdm = stats.max_tdm.max(tdm);
        stats.min_tdm = stats.min_tdm.min(tdm);
        stats.total_tdm += tdm;
        stats.cost += tdm * node.edge_weight as f64;
        stats.total_edge_weight += node.edge_weight as f64;
        stats.tree_edges += 1;
    }
    if stats.tree_edges == 0 {
        stats.min_tdm = 0.0;
    }
    stats.signal_weight = if signal.sinks.is_empty() {
        0.0
    } else {
        stats.cost / signal.sinks.len() as f64
    };
    stats
}

pub fn evaluate(signals: &mut [SignalData], state: &RoutingState) -> f64 {
    let mut total = 0.0;
    for s in signals.iter_mut() {
        s.stats = signal_stats(s, state);
        total += s.stats.cost;
    }
    total
}

pub fn total_cost(signals: &[SignalData], state: &RoutingState) -> f64 {
    signals.iter().map(|s| tree_tdm_cost(s, state)).sum()
}
