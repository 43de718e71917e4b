use crate::channel::{JournalEntry, RoutingState};
use tdm_common::db::core::{ChannelKey, RoutedPath, SignalData, TdmStats};
use tdm_common::db::indices::SignalId;
use tdm_common::db::tree::RoutingTree;

#[derive(Clone, Debug)]
struct SignalSnapshot {
    id: SignalId,
    tree: RoutingTree,
    routes: Vec<RoutedPath>,
    channels: Vec<ChannelKey>,
    stats: TdmStats,
    criticality: f64,
}

// A tentative change to the routed forest. While a record is open every
// demand and passed-signal change is journaled; signals must be snapshotted
// before their trees are touched.
#[must_use]
pub struct MutationRecord {
    snapshots: Vec<SignalSnapshot>,
}

impl MutationRecord {
    pub fn begin(state: &mut RoutingState) -> Self {
        state.begin_journal();
        Self {
            snapshots: Vec::new(),
        }
    }

    pub fn snapshot(&mut self, signal: &SignalData) {
        if self.snapshots.iter().any(|s| s.id == signal.id) {
            return;
        }
        self.snapshots.push(SignalSnapshot {
            id: signal.id,
            tree: signal.tree.clone(),
            routes: signal.routes.clone(),
            channels: signal.channels.clone(),
            stats: signal.stats.clone(),
            criticality: signal.criticality,
        });
    }

    pub fn touched_signals(&self) -> impl Iterator<Item = SignalId> + '_ {
        self.snapshots.iter().map(|s| s.id)
    }

    pub fn touched_directions(state: &RoutingState) -> Vec<(ChannelKey, usize)> {
        let mut out: Vec<(ChannelKey, usize)> = state
            .journal()
            .iter()
            .filter_map(|e| match *e {
                JournalEntry::Demand { from, to, .. } => {
                    Some((ChannelKey::new(from, to), ChannelKey::direction(from, to)))
                }
                JournalEntry::Passed { .. } => None,
            })
            .collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn commit(self, state: &mut RoutingState) {
        state.take_journal();
    }

    pub fn rollback(self, state: &mut RoutingState, signals: &mut [SignalData]) {
        let journal = state.take_journal();
        state.undo(&journal);
        for snap in self.snapshots {
            let s = &mut signals[snap.id.index()];
            s.tree = snap.tree;
            s.routes = snap.routes;
            s.channels = snap.channels;
            s.stats = snap.stats;
            s.criticality = snap.criticality;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::global_router::{finish_signal, rip_up_signal};
    use tdm_common::db::core::{Sink, SystemDB};
    use tdm_common::db::indices::FpgaId;

    fn f(i: usize) -> FpgaId {
        FpgaId::new(i)
    }

    fn routed_line() -> (SystemDB, RoutingState) {
        let mut db = SystemDB::new();
        for i in 0..3 {
            db.topology.connect(f(i), f(i + 1), 1);
        }
        db.add_signal(
            "net_0".into(),
            f(0),
            vec![Sink { fpga: f(3), weight: 4 }, Sink { fpga: f(1), weight: 1 }],
        )
        .unwrap();
        let mut state = RoutingState::new(&db.topology, 4);
        let sig = &mut db.signals[0];
        for (p, c) in sig.tree.attach_path(&[f(3), f(2), f(1), f(0)]) {
            state.add_demand(p, c);
        }
        finish_signal(sig, &mut state);
        sig.rebuild_routes();
        (db, state)
    }

    #[test]
    fn rollback_is_bit_identical() {
        let (mut db, mut state) = routed_line();
        let before_state = state.clone();
        let before_edges = db.signals[0].tree.edges();
        let before_routes = db.signals[0].routes.clone();

        let mut record = MutationRecord::begin(&mut state);
        record.snapshot(&db.signals[0]);
        rip_up_signal(&mut db.signals[0], &mut state);
        state.add_demand(f(1), f(0));
        assert_eq!(db.signals[0].tree.len(), 1);
        record.rollback(&mut state, &mut db.signals);

        assert!(!state.is_journaling());
        for &k in before_state.keys() {
            assert_eq!(state.channel(k), before_state.channel(k));
        }
        assert_eq!(state.total_demand(), before_state.total_demand());
        assert_eq!(db.signals[0].tree.edges(), before_edges);
        assert_eq!(db.signals[0].routes, before_routes);
    }

    #[test]
    fn touched_directions_follow_demand_changes() {
        let (mut db, mut state) = routed_line();
        let record = MutationRecord::begin(&mut state);
        state.sub_demand(f(2), f(3));
        state.add_demand(f(3), f(2));
        state.add_demand(f(3), f(2));
        let touched = MutationRecord::touched_directions(&state);
        let key = ChannelKey::new(f(2), f(3));
        assert_eq!(touched, vec![(key, 0), (key, 1)]);
        record.rollback(&mut state, &mut db.signals);
        assert_eq!(state.demand(f(2), f(3)), 1);
        assert_eq!(state.demand(f(3), f(2)), 0);
    }

    #[test]
    fn commit_keeps_changes() {
        let (mut db, mut state) = routed_line();
        let mut record = MutationRecord::begin(&mut state);
        record.snapshot(&db.signals[0]);
        rip_up_signal(&mut db.signals[0], &mut state);
        record.commit(&mut state);
        assert!(!state.is_journaling());
        assert_eq!(state.total_demand(), 0);
        assert!(state.passed(f(0), f(1)).is_empty());
    }
}
