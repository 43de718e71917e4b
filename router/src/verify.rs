use crate::channel::RoutingState;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tdm_common::db::core::{SignalData, Topology};
use tdm_common::db::indices::{FpgaId, SignalId};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum Violation {
    #[error("signal '{signal}': tree rooted at {root} instead of source {expected_source}")]
    RootMismatch {
        signal: String,
        root: FpgaId,
        expected_source: FpgaId,
    },
    #[error("signal '{signal}': edge {from} -> {to} is not a topology link")]
    NonAdjacentEdge {
        signal: String,
        from: FpgaId,
        to: FpgaId,
    },
    #[error("signal '{signal}': node {fpga} has max value {found}, expected {expected}")]
    EdgeWeightMismatch {
        signal: String,
        fpga: FpgaId,
        expected: u32,
        found: u32,
    },
    #[error("signal '{signal}': child {child} is heavier than the edge into {parent}")]
    ChildHeavierThanEdge {
        signal: String,
        parent: FpgaId,
        child: FpgaId,
    },
    #[error("signal '{signal}': sink {sink} is not in the tree")]
    UnreachedTerminal { signal: String, sink: FpgaId },
    #[error("signal '{signal}': leaf {fpga} is not a sink")]
    OrphanLeaf { signal: String, fpga: FpgaId },
    #[error("channel ({lo}, {hi}): split {split:?} does not sum to capacity {capacity}")]
    CapacitySplit {
        lo: FpgaId,
        hi: FpgaId,
        split: [i32; 2],
        capacity: i32,
    },
    #[error("demand {from} -> {to} is {actual}, trees use it {expected} times")]
    DemandOutOfSync {
        from: FpgaId,
        to: FpgaId,
        expected: i32,
        actual: i32,
    },
    #[error("passed {from} -> {to}: signal {signal} listed as {recorded:?}, tree has {expected:?}")]
    PassedMismatch {
        from: FpgaId,
        to: FpgaId,
        signal: SignalId,
        expected: Option<u32>,
        recorded: Option<u32>,
    },
}

#[derive(Clone, Debug, Default)]
pub struct ValidityReport {
    pub violations: Vec<Violation>,
}

impl ValidityReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

fn check_tree(signal: &SignalData, topology: &Topology) -> Vec<Violation> {
    let mut out = Vec::new();
    let tree = &signal.tree;
    let name = || signal.name.clone();

    if tree.source() != signal.source {
        out.push(Violation::RootMismatch {
            signal: name(),
            root: tree.source(),
            expected_source: signal.source,
        });
    }

    for i in tree.bfs() {
        let node = tree.node(i);
        let own = if i == tree.root() {
            0
        } else {
            signal.sink_weight(node.fpga).unwrap_or(0)
        };
        let child_max = node
            .children
            .iter()
            .map(|&c| tree.node(c).max_value)
            .max()
            .unwrap_or(0);
        let expected = own.max(child_max);
        if node.max_value != expected || node.edge_weight != node.max_value {
            out.push(Violation::EdgeWeightMismatch {
                signal: name(),
                fpga: node.fpga,
                expected,
                found: node.max_value,
            });
        }

        if let Some(p) = node.parent {
            let parent = tree.node(p);
            if !topology.is_adjacent(parent.fpga, node.fpga) {
                out.push(Violation::NonAdjacentEdge {
                    signal: name(),
                    from: parent.fpga,
                    to: node.fpga,
                });
            }
            if p != tree.root() && node.edge_weight > parent.edge_weight {
                out.push(Violation::ChildHeavierThanEdge {
                    signal: name(),
                    parent: parent.fpga,
                    child: node.fpga,
                });
            }
            if node.children.is_empty() && signal.sink_weight(node.fpga).is_none() {
                out.push(Violation::OrphanLeaf {
                    signal: name(),
                    fpga: node.fpga,
                });
            }
        }
    }

    for s in &signal.sinks {
        if !tree.contains(s.fpga) {
            out.push(Violation::UnreachedTerminal {
                signal: name(),
                sink: s.fpga,
            });
        }
    }
    out
}

fn check_channels(signals: &[SignalData], state: &RoutingState) -> Vec<Violation> {
    let mut out = Vec::new();
    for ch in state.channels() {
        if ch.split[0] + ch.split[1] != ch.capacity {
            out.push(Violation::CapacitySplit {
                lo: ch.key.lo,
                hi: ch.key.hi,
                split: ch.split,
                capacity: ch.capacity,
            });
        }
    }

    // (from, to) -> signals whose tree uses that edge, with its weight
    let mut crossing: HashMap<(FpgaId, FpgaId), BTreeMap<SignalId, u32>> = HashMap::new();
    for s in signals {
        let tree = &s.tree;
        for i in tree.bfs() {
            let node = tree.node(i);
            if let Some(p) = node.parent {
                crossing
                    .entry((tree.node(p).fpga, node.fpga))
                    .or_default()
                    .insert(s.id, node.edge_weight);
            }
        }
    }

    for ch in state.channels() {
        for (dir, (from, to)) in [(ch.key.lo, ch.key.hi), (ch.key.hi, ch.key.lo)]
            .into_iter()
            .enumerate()
        {
            let users = crossing.remove(&(from, to)).unwrap_or_default();
            let expected = users.len() as i32;
            let actual = state.demand(from, to);
            if expected != actual {
                out.push(Violation::DemandOutOfSync {
                    from,
                    to,
                    expected,
                    actual,
                });
            }

            let passed = &ch.passed[dir];
            let ids: BTreeSet<SignalId> = users.keys().chain(passed.keys()).copied().collect();
            for signal in ids {
                let expected = users.get(&signal).copied();
                let recorded = passed.get(&signal).copied();
                if expected != recorded {
                    out.push(Violation::PassedMismatch {
                        from,
                        to,
                        signal,
                        expected,
                        recorded,
                    });
                }
            }
        }
    }

    let mut leftover: Vec<_> = crossing
        .into_iter()
        .map(|(edge, users)| (edge, users.len() as i32))
        .collect();
    leftover.sort();
    for ((from, to), expected) in leftover {
        out.push(Violation::DemandOutOfSync {
            from,
            to,
            expected,
            actual: 0,
        });
    }
    out
}

pub fn run(signals: &[SignalData], topology: &Topology, state: &RoutingState) -> ValidityReport {
    log::info!("Starting Routing Verification...");

    let (tree_violations, channel_violations) = rayon::join(
        || {
            signals
                .par_iter()
                .flat_map_iter(|s| check_tree(s, topology))
                .collect::<Vec<_>>()
        },
        || check_channels(signals, state),
    );

    if tree_violations.is_empty() {
        log::info!("\x1b[32mPASS\x1b[0m: All routing trees are connected and consistent.");
    } else {
        log::error!(
            "\x1b[31mFAIL\x1b[0m: {} routing tree violations",
            tree_violations.len()
        );
    }
    if channel_violations.is_empty() {
        log::info!("\x1b[32mPASS\x1b[0m: Channel demand and passed lists match the routed trees.");
    } else {
        log::error!(
            "\x1b[31mFAIL\x1b[0m: {} channel violations",
            channel_violations.len()
        );
    }

    let mut violations = tree_violations;
    violations.extend(channel_violations);
    for v in &violations {
        log::error!("{}", v);
    }

    if violations.is_empty() {
        log::info!("\x1b[32mSUCCESS\x1b[0m: VALID ROUTING");
    } else {
        log::error!(
            "\x1b[31mFAILURE\x1b[0m: INVALID ROUTING ({} Errors)",
            violations.len()
        );
    }
    ValidityReport { violations }
}
