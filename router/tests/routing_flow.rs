use rand::SeedableRng;
use rand::rngs::StdRng;
use tdm_common::db::core::{Sink, SystemDB};
use tdm_common::db::indices::FpgaId;
use tdm_common::db::parser::{nets, system};
use tdm_common::util::config::{Config, OptimizationConfig, RouterOrder, RoutingConfig};
use tdm_common::util::generator::{random_nets, random_system};
use tdm_router::global_router::finish_signal;
use tdm_router::{cost, route, verify};

fn f(i: usize) -> FpgaId {
    FpgaId::new(i)
}

fn generated(seed: u64, fpgas: usize, signals: usize, max_sinks: usize) -> SystemDB {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut db = SystemDB::new();
    system::parse_str(&mut db.topology, &random_system(&mut rng, fpgas)).unwrap();
    nets::parse_str(&mut db, &random_nets(&mut rng, fpgas, signals, max_sinks)).unwrap();
    db
}

fn config_with_capacity(capacity: u32) -> Config {
    Config {
        routing: RoutingConfig {
            channel_capacity: Some(capacity),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn sorted_edges(db: &SystemDB) -> Vec<Vec<(FpgaId, FpgaId)>> {
    db.signals
        .iter()
        .map(|s| {
            let mut e = s.tree.edges();
            e.sort();
            e
        })
        .collect()
}

#[test]
fn full_flow_yields_valid_forest_and_never_raises_cost() {
    let mut db = generated(11, 16, 40, 4);
    let outcome = route(&mut db, &config_with_capacity(4)).unwrap();

    let report = verify::run(&db.signals, &db.topology, &outcome.state);
    assert!(report.is_valid(), "{:?}", report.violations);
    assert!(outcome.final_cost <= outcome.initial_cost + 1e-6);
    assert_eq!(outcome.final_cost, cost::total_cost(&db.signals, &outcome.state));
    assert_eq!(outcome.rounds.len(), 3);
    assert_eq!(outcome.state.round, 4);
    for s in &db.signals {
        for sink in &s.sinks {
            assert!(s.tree.contains(sink.fpga));
        }
    }
}

#[test]
fn per_signal_order_without_optimization_is_valid() {
    let mut db = generated(5, 25, 60, 6);
    let config = Config {
        routing: RoutingConfig {
            channel_capacity: Some(2),
            router_order: RouterOrder::PerSignal,
            negotiation_rounds: 1,
            ..Default::default()
        },
        optimization: OptimizationConfig {
            rounds: 0,
            edge_rr: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let outcome = route(&mut db, &config).unwrap();
    assert!(verify::run(&db.signals, &db.topology, &outcome.state).is_valid());
    assert_eq!(outcome.final_cost, outcome.initial_cost);
}

#[test]
fn routing_is_deterministic() {
    let mut a = generated(23, 12, 30, 3);
    let mut b = generated(23, 12, 30, 3);
    let ra = route(&mut a, &config_with_capacity(3)).unwrap();
    let rb = route(&mut b, &config_with_capacity(3)).unwrap();
    assert_eq!(ra.final_cost, rb.final_cost);
    assert_eq!(sorted_edges(&a), sorted_edges(&b));
}

#[test]
fn derived_capacity_is_used_without_override() {
    let mut db = generated(2, 12, 10, 2);
    let expected = db.topology.derive_capacity();
    let outcome = route(&mut db, &Config::default()).unwrap();
    assert_eq!(outcome.capacity, expected);
    assert_eq!(db.topology.capacity, expected);
}

#[test]
fn ring_scenario_keeps_first_shortest_path() {
    let mut db = SystemDB::new();
    for i in 0..4 {
        db.topology.connect(f(i), f((i + 1) % 4), 1);
    }
    db.add_signal("net_0".into(), f(0), vec![Sink { fpga: f(2), weight: 5 }])
        .unwrap();
    let outcome = route(&mut db, &config_with_capacity(4)).unwrap();

    assert_eq!(outcome.final_cost, 10.0);
    assert_eq!(outcome.state.demand(f(0), f(1)), 1);
    assert_eq!(outcome.state.demand(f(1), f(2)), 1);
    assert_eq!(outcome.state.total_demand(), 2);
}

#[test]
fn shared_channel_scenario() {
    let mut db = SystemDB::new();
    db.topology.connect(f(0), f(1), 1);
    for (k, w) in [1, 2, 3].into_iter().enumerate() {
        db.add_signal(format!("net_{k}"), f(0), vec![Sink { fpga: f(1), weight: w }])
            .unwrap();
    }
    let outcome = route(&mut db, &config_with_capacity(2)).unwrap();

    assert_eq!(outcome.state.tdm(f(0), f(1)), 2);
    assert_eq!(outcome.final_cost, 12.0);
}

#[test]
fn detach_and_reattach_round_trip() {
    let mut db = generated(31, 16, 30, 4);
    let mut outcome = route(&mut db, &config_with_capacity(4)).unwrap();
    let state = &mut outcome.state;
    let before_cost = cost::total_cost(&db.signals, state);
    let before_edges = sorted_edges(&db);
    let before_state = state.clone();

    let i = db
        .signals
        .iter()
        .position(|s| s.tree.len() > 2)
        .unwrap();
    let sig = &mut db.signals[i];
    let leaf = *sig.tree.bfs().last().unwrap();

    state.clear_passed(sig);
    let cut = sig.tree.detach(leaf);
    for &(p, c) in &cut.edges {
        state.sub_demand(p, c);
    }
    sig.refresh_tree();
    state.record_passed(sig);

    state.clear_passed(sig);
    for (p, c) in sig.tree.attach_edges(&cut.edges) {
        state.add_demand(p, c);
    }
    finish_signal(sig, state);

    assert_eq!(sorted_edges(&db), before_edges);
    assert_eq!(cost::total_cost(&db.signals, state), before_cost);
    for &k in before_state.keys() {
        assert_eq!(state.channel(k), before_state.channel(k));
    }
}
