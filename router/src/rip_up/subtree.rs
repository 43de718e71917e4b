use super::{EPS, affected_delta, criticality_order, top_count};
use crate::RouteError;
use crate::channel::RoutingState;
use crate::cost::{self, PathCost, TdmCost};
use crate::global_router::{SourcePolicy, SubnetRouter, finish_signal};
use crate::mutation::MutationRecord;
use crate::path_table::PathTable;
use tdm_common::db::core::{SignalData, SubNet};
use tdm_common::db::indices::TreeIdx;
use tdm_common::db::tree::RoutingTree;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubtreeVariant {
    /// Rip the most expensive recorded path.
    MaxSubpath,
    /// Rip the level-1/2 subtree whose edges are heaviest relative to its sinks.
    SubtreeSink,
}

impl SubtreeVariant {
    fn policy(self) -> SourcePolicy {
        match self {
            SubtreeVariant::MaxSubpath => SourcePolicy::WithinSlack,
            SubtreeVariant::SubtreeSink => SourcePolicy::Nearest,
        }
    }
}

/// Node where the most expensive recorded path of `signal` is cut.
pub fn max_subpath_node(signal: &SignalData, state: &RoutingState) -> Option<TreeIdx> {
    let mut best: Option<(f64, usize)> = None;
    for (k, r) in signal.routes.iter().enumerate() {
        let c = TdmCost.path_cost(signal, &r.path, r.subnet.weight, state);
        if best.is_none_or(|(b, _)| c > b) {
            best = Some((c, k));
        }
    }
    let (_, k) = best?;
    let path = &signal.routes[k].path;

    let sinks_on_path = path
        .iter()
        .skip(1)
        .filter(|&&n| n != signal.source && signal.sink_weight(n).is_some())
        .count()
        + 1;
    let rip = if sinks_on_path > 1 {
        path.iter()
            .rev()
            .copied()
            .find(|&n| n != signal.source && signal.sink_weight(n).is_some())?
    } else {
        path[0]
    };
    signal.tree.find(rip).filter(|&i| i != signal.tree.root())
}

/// Average max value over the non-root nodes of the subtree at `idx` minus
/// the average weight of its sinks. NaN for a leaf.
pub fn weight_gap(tree: &RoutingTree, idx: TreeIdx) -> f64 {
    let (mut edges, mut edge_total) = (0usize, 0.0);
    let (mut sinks, mut sink_total) = (0usize, 0.0);
    for i in tree.subtree(idx) {
        let node = tree.node(i);
        if node.sink_weight != 0 {
            sinks += 1;
            sink_total += node.sink_weight as f64;
        }
        if i != idx {
            edges += 1;
            edge_total += node.max_value as f64;
        }
    }
    edge_total / edges as f64 - sink_total / sinks as f64
}

/// Level-1/2 node with the largest weight gap, first on ties.
pub fn subtree_sink_node(tree: &RoutingTree) -> Option<TreeIdx> {
    let mut best: Option<(f64, TreeIdx)> = None;
    for (i, depth) in tree.levels() {
        if depth == 0 {
            continue;
        }
        if depth > 2 {
            break;
        }
        let gap = weight_gap(tree, i);
        if gap.is_nan() {
            continue;
        }
        if best.is_none_or(|(b, _)| gap > b) {
            best = Some((gap, i));
        }
    }
    best.map(|(_, i)| i)
}

/// Climbs from `idx` while the parent has no other child and is not the root.
pub fn coalesce(tree: &RoutingTree, mut idx: TreeIdx) -> TreeIdx {
    while let Some(p) = tree.node(idx).parent {
        if p == tree.root() || tree.node(p).children.len() != 1 {
            break;
        }
        idx = p;
    }
    idx
}

/// Criticality-ordered subtree rip-up and reroute over the top
/// `critical_fraction` of signals. A reroute is kept when the signal's own
/// TDM cost drops and the forest total does not rise. Returns the number of
/// accepted reroutes.
pub fn run(
    signals: &mut [SignalData],
    state: &mut RoutingState,
    table: &PathTable,
    hop_slack: usize,
    critical_fraction: f64,
    variant: SubtreeVariant,
) -> Result<usize, RouteError> {
    let order = criticality_order(signals, state);
    let take = top_count(order.len(), critical_fraction);
    let router = SubnetRouter {
        table,
        hop_slack,
        policy: variant.policy(),
    };

    let mut accepted = 0;
    for &i in order.iter().take(take) {
        if reroute_subtree(signals, i, state, &router, variant)? {
            accepted += 1;
        }
    }
    log::info!(
        "{:?} RR: {}/{} signals improved, cost = {:.0}",
        variant,
        accepted,
        take,
        cost::evaluate(signals, state)
    );
    Ok(accepted)
}

fn reroute_subtree(
    signals: &mut [SignalData],
    i: usize,
    state: &mut RoutingState,
    router: &SubnetRouter,
    variant: SubtreeVariant,
) -> Result<bool, RouteError> {
    let signal = &mut signals[i];
    let picked = match variant {
        SubtreeVariant::MaxSubpath => max_subpath_node(signal, state),
        SubtreeVariant::SubtreeSink => subtree_sink_node(&signal.tree),
    };
    let Some(idx) = picked else {
        return Ok(false);
    };
    let idx = coalesce(&signal.tree, idx);
    let old = cost::tree_tdm_cost(signal, state);

    let mut record = MutationRecord::begin(state);
    record.snapshot(signal);
    let outcome = rip_and_reroute(signal, state, router, idx)
        .map(|()| cost::tree_tdm_cost(signal, state) < old - EPS);

    // Own tree cheaper, forest total not higher.
    let outcome = outcome.map(|own_better| {
        if !own_better {
            return None;
        }
        let (delta, costs) = affected_delta(&record, signals, state);
        (delta <= EPS).then_some(costs)
    });

    match outcome {
        Ok(Some(costs)) => {
            for (id, _) in costs {
                let stats = cost::signal_stats(&signals[id.index()], state);
                signals[id.index()].stats = stats;
            }
            record.commit(state);
            Ok(true)
        }
        Ok(None) => {
            record.rollback(state, signals);
            Ok(false)
        }
        Err(e) => {
            record.rollback(state, signals);
            Err(e)
        }
    }
}

fn rip_and_reroute(
    signal: &mut SignalData,
    state: &mut RoutingState,
    router: &SubnetRouter,
    idx: TreeIdx,
) -> Result<(), RouteError> {
    state.clear_passed(signal);
    let cut = signal.tree.detach(idx);
    for &(p, c) in &cut.edges {
        state.sub_demand(p, c);
    }
    signal.refresh_tree();

    let mut subnets: Vec<SubNet> = cut
        .nodes
        .iter()
        .filter_map(|&n| {
            signal.sink_weight(n).map(|weight| SubNet {
                signal: signal.id,
                source: signal.source,
                sink: n,
                weight,
            })
        })
        .collect();
    subnets.sort_by(|a, b| b.weight.cmp(&a.weight));

    for sb in subnets {
        router.route(signal, sb, state, &TdmCost)?;
    }
    finish_signal(signal, state);
    signal.rebuild_routes();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tdm_common::db::core::{Sink, SystemDB};
    use tdm_common::db::indices::FpgaId;

    fn f(i: usize) -> FpgaId {
        FpgaId::new(i)
    }

    fn build(db: &mut SystemDB, state: &mut RoutingState, sig: usize, paths: &[&[usize]]) {
        let s = &mut db.signals[sig];
        for p in paths {
            let path: Vec<FpgaId> = p.iter().map(|&i| f(i)).collect();
            for (a, b) in s.tree.attach_path(&path) {
                state.add_demand(a, b);
            }
        }
        finish_signal(s, state);
        s.rebuild_routes();
    }

    #[test]
    fn coalesce_stops_below_branching_parent() {
        // 0 -> 1 -> 2 -> 3, 1 -> 4
        let mut t = RoutingTree::new(f(0));
        t.attach_path(&[f(3), f(2), f(1), f(0)]);
        t.attach_path(&[f(4), f(1)]);
        let leaf = t.find(f(3)).unwrap();
        assert_eq!(t.node(coalesce(&t, leaf)).fpga, f(2));
        let single = {
            let mut t = RoutingTree::new(f(0));
            t.attach_path(&[f(2), f(1), f(0)]);
            t
        };
        let leaf = single.find(f(2)).unwrap();
        assert_eq!(single.node(coalesce(&single, leaf)).fpga, f(1));
    }

    #[test]
    fn subtree_sink_prefers_heavy_edges_over_light_sinks() {
        // 0 -> 1 -> 2 -> 3 with sinks 1 (w 1), 3 (w 8); 0 -> 4 sink (w 2)
        let mut t = RoutingTree::new(f(0));
        t.attach_path(&[f(3), f(2), f(1), f(0)]);
        t.attach_path(&[f(4), f(0)]);
        t.update_weights(&HashMap::from([(f(1), 1), (f(3), 8), (f(4), 2)]));
        // node 1: edges (8 + 8) / 2 - sinks (1 + 8) / 2 = 3.5
        // node 2: edges 8 / 1 - sinks 8 / 1 = 0
        assert!((weight_gap(&t, t.find(f(1)).unwrap()) - 3.5).abs() < 1e-9);
        assert!(weight_gap(&t, t.find(f(4)).unwrap()).is_nan());
        assert_eq!(subtree_sink_node(&t), t.find(f(1)));
    }

    #[test]
    fn max_subpath_cuts_at_upper_sink_of_shared_path() {
        let mut db = SystemDB::new();
        for i in 0..3 {
            db.topology.connect(f(i), f(i + 1), 1);
        }
        db.add_signal(
            "net_0".into(),
            f(0),
            vec![Sink { fpga: f(1), weight: 1 }, Sink { fpga: f(3), weight: 6 }],
        )
        .unwrap();
        let mut state = RoutingState::new(&db.topology, 4);
        build(&mut db, &mut state, 0, &[&[3, 2, 1, 0]]);
        let sig = &db.signals[0];
        // Recorded paths: [1, 0] and [3, 2, 1]; the latter ends at sink 1.
        let idx = max_subpath_node(sig, &state).unwrap();
        assert_eq!(sig.tree.node(idx).fpga, f(1));
    }

    // 0 - 1 - 2
    // |       |
    // 3 - 4 - 5
    // Signal 0 reached sink 2 the long way round; ripping and rerouting
    // shortens it.
    #[test]
    fn detour_is_replaced_by_shorter_route() {
        let mut db = SystemDB::new();
        for (a, b) in [(0, 1), (1, 2), (0, 3), (3, 4), (4, 5), (5, 2)] {
            db.topology.connect(f(a), f(b), 1);
        }
        db.add_signal("net_0".into(), f(0), vec![Sink { fpga: f(2), weight: 3 }])
            .unwrap();
        let mut state = RoutingState::new(&db.topology, 4);
        build(&mut db, &mut state, 0, &[&[2, 5, 4, 3, 0]]);
        let table = PathTable::build(&db.topology, 1, 6, 512);
        let before = cost::tree_tdm_cost(&db.signals[0], &state);

        for variant in [SubtreeVariant::MaxSubpath, SubtreeVariant::SubtreeSink] {
            run(&mut db.signals, &mut state, &table, 1, 0.5, variant).unwrap();
        }

        let sig = &db.signals[0];
        assert!(cost::tree_tdm_cost(sig, &state) < before);
        assert_eq!(sig.tree.len(), 3);
        assert_eq!(state.total_demand(), 2);
        assert_eq!(state.demand(f(0), f(3)), 0);
    }

    #[test]
    fn no_gain_rolls_back() {
        let mut db = SystemDB::new();
        for i in 0..2 {
            db.topology.connect(f(i), f(i + 1), 1);
        }
        db.add_signal("net_0".into(), f(0), vec![Sink { fpga: f(2), weight: 3 }])
            .unwrap();
        let mut state = RoutingState::new(&db.topology, 4);
        build(&mut db, &mut state, 0, &[&[2, 1, 0]]);
        let table = PathTable::build(&db.topology, 1, 6, 512);
        let edges = db.signals[0].tree.edges();

        let variant = SubtreeVariant::MaxSubpath;
        let n = run(&mut db.signals, &mut state, &table, 1, 1.0, variant).unwrap();
        assert_eq!(n, 0);
        assert_eq!(db.signals[0].tree.edges(), edges);
        assert_eq!(state.total_demand(), 2);
        assert!(!state.is_journaling());
    }
}
