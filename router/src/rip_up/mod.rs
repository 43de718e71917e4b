pub mod congestion;
pub mod edge;
pub mod subtree;

use crate::channel::RoutingState;
use crate::cost;
use crate::mutation::MutationRecord;
use std::collections::BTreeSet;
use tdm_common::db::core::SignalData;
use tdm_common::db::indices::SignalId;

/// Minimum cost drop that counts as an improvement.
pub(crate) const EPS: f64 = 1e-9;

/// Signals whose TDM cost may have changed under the open mutation: the
/// snapshotted signals plus everyone crossing either direction of a channel
/// whose demand moved. Returns Σ(new - recorded) and the new costs.
pub(crate) fn affected_delta(
    record: &MutationRecord,
    signals: &[SignalData],
    state: &RoutingState,
) -> (f64, Vec<(SignalId, f64)>) {
    let mut affected: BTreeSet<SignalId> = record.touched_signals().collect();
    for (key, _) in MutationRecord::touched_directions(state) {
        if let Some(ch) = state.channel(key) {
            affected.extend(ch.passed[0].keys().copied());
            affected.extend(ch.passed[1].keys().copied());
        }
    }

    let mut delta = 0.0;
    let mut costs = Vec::with_capacity(affected.len());
    for id in affected {
        let s = &signals[id.index()];
        let c = cost::tree_tdm_cost(s, state);
        delta += c - s.stats.cost;
        costs.push((id, c));
    }
    (delta, costs)
}

/// Signal indices by descending criticality, ties in input order. Refreshes
/// statistics and criticality first.
pub fn criticality_order(signals: &mut [SignalData], state: &RoutingState) -> Vec<usize> {
    cost::evaluate(signals, state);
    for s in signals.iter_mut() {
        s.compute_criticality();
    }
    let mut order: Vec<usize> = (0..signals.len()).collect();
    order.sort_by(|&a, &b| signals[b].criticality.total_cmp(&signals[a].criticality));
    order
}

/// ceil(n * fraction), at least one when n > 0.
pub fn top_count(n: usize, fraction: f64) -> usize {
    if n == 0 {
        return 0;
    }
    ((n as f64 * fraction).ceil() as usize).clamp(1, n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_count_rounds_up_and_clamps() {
        assert_eq!(top_count(10, 0.5), 5);
        assert_eq!(top_count(7, 0.5), 4);
        assert_eq!(top_count(3, 0.1), 1);
        assert_eq!(top_count(4, 2.0), 4);
        assert_eq!(top_count(0, 0.5), 0);
    }
}
