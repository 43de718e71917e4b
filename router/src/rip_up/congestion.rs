use super::{EPS, top_count};
use crate::RouteError;
use crate::channel::RoutingState;
use crate::cost::{self, CongestionCost};
use crate::global_router::{SourcePolicy, SubnetRouter, rip_up_signal};
use crate::mutation::MutationRecord;
use crate::path_table::PathTable;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tdm_common::db::core::{ChannelKey, SignalData};
use tdm_common::db::indices::SignalId;
use tdm_common::util::config::OptimizationConfig;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoundReport {
    pub round: u32,
    pub channels: usize,
    pub ripped: usize,
    pub repeated: usize,
    pub cost_before: f64,
    pub cost_after: f64,
    pub accepted: bool,
}

pub fn congestion_map(
    signals: &[SignalData],
    state: &RoutingState,
    repeat_discount: f64,
) -> Vec<(ChannelKey, f64)> {
    let mut scores: HashMap<ChannelKey, f64> = HashMap::new();
    for s in signals {
        let tree = &s.tree;
        for i in tree.bfs() {
            let node = tree.node(i);
            let Some(p) = node.parent else { continue };
            let from = tree.node(p).fpga;
            let key = ChannelKey::new(from, node.fpga);
            let rr = state.channel(key).map_or(0, |ch| ch.rr_times);
            let discount = 1.0 - repeat_discount * rr as f64;
            *scores.entry(key).or_insert(0.0) +=
                state.tdm(from, node.fpga) as f64 * discount * node.edge_weight as f64;
        }
    }
    let mut out: Vec<(ChannelKey, f64)> = scores.into_iter().collect();
    out.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    out
}

pub struct CongestionRouter {
    fraction: f64,
    penalty_step: f64,
    repeat_discount: f64,
    depth: usize,
    history: VecDeque<HashSet<SignalId>>,
    previous: HashSet<SignalId>,
}

impl CongestionRouter {
    pub fn new(config: &OptimizationConfig) -> Self {
        Self {
            fraction: config.congestion_fraction,
            penalty_step: config.penalty_step,
            repeat_discount: config.repeat_discount,
            depth: config.repeat_exemption_depth,
            history: VecDeque::new(),
            previous: HashSet::new(),
        }
    }

    fn is_exempt(&self, id: SignalId) -> bool {
        self.history.iter().any(|set| set.contains(&id))
    }

    pub fn round(
        &mut self,
        signals: &mut [SignalData],
        state: &mut RoutingState,
        table: &PathTable,
        hop_slack: usize,
    ) -> Result<RoundReport, RouteError> {
        let cost_before = cost::evaluate(signals, state);
        for s in signals.iter_mut() {
            s.compute_criticality();
        }

        let scores = congestion_map(signals, state, self.repeat_discount);
        let take = top_count(scores.len(), self.fraction);
        let mut rip: BTreeSet<SignalId> = BTreeSet::new();
        for &(key, _) in scores.iter().take(take) {
            let Some(ch) = state.channel_mut(key) else {
                continue;
            };
            ch.rr_times += 1;
            let passing: Vec<SignalId> = ch.passed[0]
                .keys()
                .chain(ch.passed[1].keys())
                .copied()
                .collect();
            for id in passing {
                *signals[id.index()].channel_penalty.entry(key).or_insert(1.0) += self.penalty_step;
                if !self.is_exempt(id) {
                    rip.insert(id);
                }
            }
        }

        let repeated = rip.iter().filter(|id| self.previous.contains(*id)).count();
        let ripped: HashSet<SignalId> = rip.iter().copied().collect();
        self.previous = ripped.clone();
        if self.depth > 0 {
            self.history.push_back(ripped);
            while self.history.len() > self.depth {
                self.history.pop_front();
            }
        }

        let mut order: Vec<usize> = rip.iter().map(|id| id.index()).collect();
        order.sort_by(|&a, &b| signals[b].criticality.total_cmp(&signals[a].criticality));

        let mut report = RoundReport {
            round: state.round,
            channels: take,
            ripped: order.len(),
            repeated,
            cost_before,
            cost_after: cost_before,
            accepted: false,
        };

        if !order.is_empty() {
            let outcome = self.reroute(signals, state, table, hop_slack, &order);
            match outcome {
                Ok((record, after)) if after < cost_before - EPS => {
                    record.commit(state);
                    report.cost_after = cost::evaluate(signals, state);
                    report.accepted = true;
                }
                Ok((record, _)) => record.rollback(state, signals),
                Err((record, e)) => {
                    record.rollback(state, signals);
                    state.round += 1;
                    return Err(e);
                }
            }
        }

        log::info!(
            "CRR round {}: {} channels, {} ripped ({:.1}%), {} repeats, cost {:.0} -> {:.0}{}",
            report.round,
            report.channels,
            report.ripped,
            100.0 * report.ripped as f64 / signals.len().max(1) as f64,
            report.repeated,
            report.cost_before,
            report.cost_after,
            if report.accepted { "" } else { " (rolled back)" }
        );
        state.round += 1;
        Ok(report)
    }

    fn reroute(
        &self,
        signals: &mut [SignalData],
        state: &mut RoutingState,
        table: &PathTable,
        hop_slack: usize,
        order: &[usize],
    ) -> Result<(MutationRecord, f64), (MutationRecord, RouteError)> {
        let mut record = MutationRecord::begin(state);
        for &i in order {
            record.snapshot(&signals[i]);
            rip_up_signal(&mut signals[i], state);
        }

        let router = SubnetRouter {
            table,
            hop_slack,
            policy: SourcePolicy::Nearest,
        };
        for &i in order {
            if let Err(e) = router.route_signal(&mut signals[i], state, &CongestionCost) {
                return Err((record, e));
            }
            signals[i].rebuild_routes();
        }
        let after = cost::total_cost(signals, state);
        Ok((record, after))
    }
}
