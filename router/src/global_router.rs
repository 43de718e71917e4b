use crate::RouteError;
use crate::channel::RoutingState;
use crate::cost::{self, PathCost, TdmCost};
use crate::path_table::PathTable;
use tdm_common::db::core::{RoutedPath, SignalData, SubNet};
use tdm_common::db::indices::FpgaId;
use tdm_common::util::config::{RouterOrder, RoutingConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourcePolicy {
    Nearest,
    WithinSlack,
}

pub struct SubnetRouter<'a> {
    pub table: &'a PathTable,
    pub hop_slack: usize,
    pub policy: SourcePolicy,
}

impl SubnetRouter<'_> {
    pub fn route(
        &self,
        signal: &mut SignalData,
        subnet: SubNet,
        state: &mut RoutingState,
        cost: &dyn PathCost,
    ) -> Result<bool, RouteError> {
        let sink = subnet.sink;
        if signal.tree.contains(sink) {
            return Ok(false);
        }
        let unreachable = || RouteError::Unreachable {
            signal: signal.name.clone(),
            from: signal.source,
            to: sink,
        };

        let sources: Vec<(FpgaId, usize)> = signal
            .tree
            .fpgas()
            .into_iter()
            .filter_map(|t| self.table.min_hops(t, sink).map(|h| (t, h)))
            .collect();
        let Some(min_hops) = sources.iter().map(|&(_, h)| h).min() else {
            return Err(unreachable());
        };
        let limit = min_hops + self.hop_slack;

        let mut best: Option<(f64, Vec<FpgaId>)> = None;
        for &(src, hops) in &sources {
            let eligible = match self.policy {
                SourcePolicy::Nearest => hops == min_hops,
                SourcePolicy::WithinSlack => hops <= limit,
            };
            if !eligible {
                continue;
            }
            for mut path in self.table.paths(src, sink, limit) {
                if let Some(i) = path.iter().skip(1).position(|p| signal.tree.contains(*p)) {
                    path.truncate(i + 2);
                }
                let c = cost.path_cost(signal, &path, subnet.weight, state);
                if best.as_ref().is_none_or(|(b, _)| c < *b) {
                    best = Some((c, path));
                }
            }
        }

        let Some((_, path)) = best else {
            return Err(unreachable());
        };
        for (from, to) in signal.tree.attach_path(&path) {
            state.add_demand(from, to);
        }
        signal.routes.push(RoutedPath { path, subnet });
        Ok(true)
    }

    pub fn route_signal(
        &self,
        signal: &mut SignalData,
        state: &mut RoutingState,
        cost: &dyn PathCost,
    ) -> Result<(), RouteError> {
        for subnet in signal.subnets_by_weight() {
            self.route(signal, subnet, state, cost)?;
        }
        finish_signal(signal, state);
        Ok(())
    }
}

pub fn finish_signal(signal: &mut SignalData, state: &mut RoutingState) {
    signal.refresh_tree();
    state.record_passed(signal);
}

pub fn rip_up_signal(signal: &mut SignalData, state: &mut RoutingState) {
    state.clear_passed(signal);
    for (from, to) in signal.tree.edges() {
        state.sub_demand(from, to);
    }
    signal.reset_tree();
}

fn route_all(
    signals: &mut [SignalData],
    state: &mut RoutingState,
    router: &SubnetRouter,
    order: RouterOrder,
) -> Result<(), RouteError> {
    match order {
        RouterOrder::PerSignal => {
            for s in signals.iter_mut() {
                router.route_signal(s, state, &TdmCost)?;
            }
        }
        RouterOrder::Global => {
            let mut subnets: Vec<SubNet> = signals.iter().flat_map(|s| s.subnets()).collect();
            subnets.sort_by(|a, b| b.weight.cmp(&a.weight));
            for sb in subnets {
                router.route(&mut signals[sb.signal.index()], sb, state, &TdmCost)?;
            }
            for s in signals.iter_mut() {
                finish_signal(s, state);
            }
        }
    }
    Ok(())
}

pub fn run(
    signals: &mut [SignalData],
    state: &mut RoutingState,
    table: &PathTable,
    config: &RoutingConfig,
) -> Result<f64, RouteError> {
    log::info!(
        "Starting Global Routing ({} signals, order {:?})...",
        signals.len(),
        config.router_order
    );
    let router = SubnetRouter {
        table,
        hop_slack: config.hop_slack,
        policy: SourcePolicy::Nearest,
    };

    let passes = config.negotiation_rounds.max(1);
    let mut total = 0.0;
    for pass in 0..passes {
        route_all(signals, state, &router, config.router_order)?;
        total = cost::evaluate(signals, state);
        log::info!(
            "GR Pass {}: TDM cost = {:.0}, total demand = {}",
            pass,
            total,
            state.total_demand()
        );

        if pass + 1 < passes {
            state.update_history_used(signals);
            for s in signals.iter_mut() {
                rip_up_signal(s, state);
            }
        }
    }
    Ok(total)
}
