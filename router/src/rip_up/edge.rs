use super::{EPS, affected_delta};
use crate::algo::maze::MazeRouter;
use crate::channel::RoutingState;
use crate::cost;
use crate::mutation::MutationRecord;
use std::collections::HashSet;
use tdm_common::db::core::{SignalData, Topology};
use tdm_common::db::indices::{FpgaId, TreeIdx};
use tdm_common::db::tree::RoutingTree;

pub fn find_rip_up_edge(tree: &RoutingTree) -> Option<TreeIdx> {
    tree.bfs().into_iter().skip(1).find_map(|i| {
        let node = tree.node(i);
        if node.sink_weight == 0 || node.max_value <= node.sink_weight {
            return None;
        }
        node.children
            .iter()
            .copied()
            .find(|&c| tree.node(c).edge_weight == node.max_value)
    })
}

pub fn run(
    signals: &mut [SignalData],
    state: &mut RoutingState,
    topology: &Topology,
    max_sweeps: usize,
) -> usize {
    let mut accepted = 0;
    for sweep in 0..max_sweeps {
        let before = cost::evaluate(signals, state);
        let mut improved = 0;
        for i in 0..signals.len() {
            if reroute_heavy_branch(signals, i, state, topology) {
                improved += 1;
            }
        }
        accepted += improved;
        let after = cost::total_cost(signals, state);
        log::debug!(
            "Edge RR sweep {}: {} reconnections, cost {:.0} -> {:.0}",
            sweep,
            improved,
            before,
            after
        );
        if improved == 0 {
            break;
        }
    }
    accepted
}

// Detaches the heavy branch of signal `i` and looks for a cheaper place to
// graft it back. Statistics of every signal must be current on entry and
// are kept current on accept.
fn reroute_heavy_branch(
    signals: &mut [SignalData],
    i: usize,
    state: &mut RoutingState,
    topology: &Topology,
) -> bool {
    let Some(idx) = find_rip_up_edge(&signals[i].tree) else {
        return false;
    };

    let mut record = MutationRecord::begin(state);
    record.snapshot(&signals[i]);

    let sig = &mut signals[i];
    state.clear_passed(sig);
    let cut = sig.tree.detach(idx);
    for &(p, c) in &cut.edges {
        state.sub_demand(p, c);
    }
    sig.refresh_tree();
    state.record_passed(sig);

    let (freed, _) = affected_delta(&record, signals, state);
    let budget = -freed;
    let Some(&start) = cut.nodes.first() else {
        record.rollback(state, signals);
        return false;
    };
    if budget <= EPS {
        record.rollback(state, signals);
        return false;
    }

    let found = {
        let tree = &signals[i].tree;
        let root = tree.root();
        let mut targets = HashSet::new();
        let mut blocked: HashSet<FpgaId> = cut.nodes.iter().copied().collect();
        for n in tree.bfs() {
            let node = tree.node(n);
            if n == root || node.max_value >= cut.max_value {
                targets.insert(node.fpga);
            } else {
                blocked.insert(node.fpga);
            }
        }
        let mut maze = MazeRouter::new(topology, state);
        maze.find_path(
            start,
            |f| targets.contains(&f),
            |f| blocked.contains(&f),
            cut.max_value,
            budget,
        )
    };
    let Some((path, estimate)) = found else {
        record.rollback(state, signals);
        return false;
    };

    let sig = &mut signals[i];
    state.clear_passed(sig);
    let mut added = sig.tree.attach_path(&path);
    added.extend(sig.tree.attach_edges(&cut.edges[1..]));
    for &(p, c) in &added {
        state.add_demand(p, c);
    }
    sig.refresh_tree();
    state.record_passed(sig);
    sig.rebuild_routes();

    let (delta, costs) = affected_delta(&record, signals, state);
    if delta < -EPS {
        log::debug!(
            "Edge RR {}: regrafted {} nodes at {:?} (estimate {:.1}, delta {:.1})",
            signals[i].name,
            cut.nodes.len(),
            path.last(),
            estimate,
            delta
        );
        for (id, _) in costs {
            let s = &signals[id.index()];
            let stats = cost::signal_stats(s, state);
            signals[id.index()].stats = stats;
        }
        record.commit(state);
        true
    } else {
        record.rollback(state, signals);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::global_router::finish_signal;
    use tdm_common::db::core::{Sink, SystemDB};

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
    fn rip_edge_is_below_light_sink() {
        let mut t = RoutingTree::new(f(0));
        t.attach_path(&[f(3), f(2), f(1), f(0)]);
        t.attach_path(&[f(4), f(1)]);
        let w = std::collections::HashMap::from([(f(1), 1), (f(3), 5), (f(4), 2)]);
        t.update_weights(&w);
        let idx = find_rip_up_edge(&t).unwrap();
        assert_eq!(t.node(idx).fpga, f(2));
    }

    #[test]
    fn no_rip_edge_when_weights_descend() {
        let mut t = RoutingTree::new(f(0));
        t.attach_path(&[f(2), f(1), f(0)]);
        let w = std::collections::HashMap::from([(f(1), 5), (f(2), 2)]);
        t.update_weights(&w);
        assert!(find_rip_up_edge(&t).is_none());
    }

    // 0 - 1
    // |   |
    // 3 - 2
    // Signal 0 (source 0) reaches its heavy sink 2 through its light sink 1.
    // The shared 0 -> 1 direction is crowded by other signals, so the heavy
    // branch moves to 0 -> 3 -> 2.
    #[test]
    fn heavy_branch_moves_off_crowded_channel() {
        let mut db = SystemDB::new();
        for (a, b) in [(0, 1), (1, 2), (0, 3), (3, 2)] {
            db.topology.connect(f(a), f(b), 1);
        }
        db.add_signal(
            "net_0".into(),
            f(0),
            vec![Sink { fpga: f(1), weight: 1 }, Sink { fpga: f(2), weight: 10 }],
        )
        .unwrap();
        for k in 1..=3 {
            db.add_signal(format!("other_{k}"), f(0), vec![Sink { fpga: f(1), weight: 1 }])
                .unwrap();
        }

        let mut state = RoutingState::new(&db.topology, 2);
        build(&mut db, &mut state, 0, &[&[2, 1, 0]]);
        for k in 1..=3 {
            build(&mut db, &mut state, k, &[&[1, 0]]);
        }
        let before = cost::evaluate(&mut db.signals, &state);

        let moves = run(&mut db.signals, &mut state, &db.topology, 10);
        let after = cost::total_cost(&db.signals, &state);

        assert!(moves >= 1);
        assert!(after < before);
        let sig = &db.signals[0];
        assert!(sig.tree.contains(f(3)));
        assert!(sig.tree.contains(f(2)));
        assert!(sig.tree.contains(f(1)));
        assert_eq!(state.demand(f(1), f(2)), 0);
        assert_eq!(state.total_demand(), 6);
    }

    #[test]
    fn no_move_when_nothing_improves() {
        let mut db = SystemDB::new();
        for i in 0..3 {
            db.topology.connect(f(i), f(i + 1), 1);
        }
        db.add_signal(
            "net_0".into(),
            f(0),
            vec![Sink { fpga: f(1), weight: 1 }, Sink { fpga: f(3), weight: 4 }],
        )
        .unwrap();
        let mut state = RoutingState::new(&db.topology, 4);
        build(&mut db, &mut state, 0, &[&[3, 2, 1, 0]]);
        let edges = db.signals[0].tree.edges();
        let snapshot = state.clone();

        assert_eq!(run(&mut db.signals, &mut state, &db.topology, 5), 0);
        assert_eq!(db.signals[0].tree.edges(), edges);
        for &k in snapshot.keys() {
            assert_eq!(state.channel(k), snapshot.channel(k));
        }
    }
}
