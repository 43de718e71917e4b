pub mod algo;
pub mod channel;
pub mod cost;
pub mod global_router;
pub mod mutation;
pub mod path_table;
pub mod rip_up;
pub mod verify;

use channel::RoutingState;
use path_table::PathTable;
use rip_up::congestion::{CongestionRouter, RoundReport};
use rip_up::subtree::SubtreeVariant;
use tdm_common::db::core::SystemDB;
use tdm_common::db::indices::FpgaId;
use tdm_common::util::config::Config;
use tdm_common::util::profiler::ScopedTimer;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("signal '{signal}': no candidate path from {from} to {to} (topology is disconnected)")]
    Unreachable {
        signal: String,
        from: FpgaId,
        to: FpgaId,
    },
}

#[derive(Debug)]
pub struct RouteOutcome {
    pub capacity: u32,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub state: RoutingState,
    pub rounds: Vec<RoundReport>,
}

pub fn route(db: &mut SystemDB, config: &Config) -> Result<RouteOutcome, RouteError> {
    let capacity = config
        .routing
        .channel_capacity
        .unwrap_or_else(|| db.topology.derive_capacity());
    db.topology.capacity = capacity;
    if capacity == 0 {
        log::warn!("Channel capacity is 0; every direction is treated as capacity 1");
    }
    log::info!(
        "Routing {} signals ({} sinks) over {} FPGAs, channel capacity {}",
        db.num_signals(),
        db.num_sinks(),
        db.num_fpgas(),
        capacity
    );

    let table = {
        let _t = ScopedTimer::new("Path Table");
        PathTable::build(
            &db.topology,
            config.routing.hop_slack,
            config.routing.max_solutions,
            config.routing.max_candidates,
        )
    };
    let mut state = RoutingState::new(&db.topology, capacity);

    let initial_cost = {
        let _t = ScopedTimer::new("Global Routing");
        global_router::run(&mut db.signals, &mut state, &table, &config.routing)?
    };

    let opt = &config.optimization;
    if opt.edge_rr {
        let _t = ScopedTimer::new("Edge RR");
        let moves = rip_up::edge::run(
            &mut db.signals,
            &mut state,
            &db.topology,
            opt.max_edge_sweeps,
        );
        log::info!(
            "Edge RR: {} reconnections, cost = {:.0}",
            moves,
            cost::total_cost(&db.signals, &state)
        );
    }

    let mut crr = CongestionRouter::new(opt);
    let mut rounds = Vec::with_capacity(opt.rounds);
    for r in 0..opt.rounds {
        let _t = ScopedTimer::new("RR Round");
        for variant in [SubtreeVariant::MaxSubpath, SubtreeVariant::SubtreeSink] {
            rip_up::subtree::run(
                &mut db.signals,
                &mut state,
                &table,
                config.routing.hop_slack,
                opt.critical_fraction,
                variant,
            )?;
        }
        rounds.push(crr.round(&mut db.signals, &mut state, &table, config.routing.hop_slack)?);
        state.update_history_cost();
        log::info!(
            "Round {}: cost = {:.0}, history cost = {:.1}",
            r,
            cost::total_cost(&db.signals, &state),
            state.total_history_cost()
        );
    }

    let final_cost = cost::evaluate(&mut db.signals, &state);
    log::info!(
        "Final TDM cost = {:.0} (after global routing {:.0})",
        final_cost,
        initial_cost
    );
    Ok(RouteOutcome {
        capacity,
        initial_cost,
        final_cost,
        state,
        rounds,
    })
}
