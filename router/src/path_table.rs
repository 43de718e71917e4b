use rayon::prelude::*;
use std::collections::VecDeque;
use tdm_common::db::core::Topology;
use tdm_common::db::indices::FpgaId;

/// All predecessors of a destination reachable at exactly `hops` hops.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub hops: usize,
    pub parents: Vec<FpgaId>,
}

/// For every ordered pair (src, dst), the hop levels at which dst can be
/// reached from src within `min_hops + hop_slack`, each with its predecessor
/// set. Entries form a predecessor DAG per source.
pub struct PathTable {
    num_fpgas: usize,
    entries: Vec<Vec<Vec<Candidate>>>,
    max_candidates: usize,
}

impl PathTable {
    pub fn build(
        topology: &Topology,
        hop_slack: usize,
        max_solutions: usize,
        max_candidates: usize,
    ) -> Self {
        let n = topology.num_fpgas();
        let entries: Vec<Vec<Vec<Candidate>>> = (0..n)
            .into_par_iter()
            .map(|src| expand_source(topology, FpgaId::new(src), hop_slack, max_solutions))
            .collect();

        let stored: usize = entries
            .iter()
            .flat_map(|row| row.iter())
            .map(|cands| cands.iter().map(|c| c.parents.len()).sum::<usize>())
            .sum();
        log::info!(
            "Path table: {} FPGAs, hop slack {}, {} predecessor entries",
            n,
            hop_slack,
            stored
        );

        Self {
            num_fpgas: n,
            entries,
            max_candidates,
        }
    }

    pub fn num_fpgas(&self) -> usize {
        self.num_fpgas
    }

    /// Candidates for (src, dst) sorted by hop count.
    pub fn candidates(&self, src: FpgaId, dst: FpgaId) -> &[Candidate] {
        self.entries
            .get(src.index())
            .and_then(|row| row.get(dst.index()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn min_hops(&self, src: FpgaId, dst: FpgaId) -> Option<usize> {
        if src == dst {
            return Some(0);
        }
        self.candidates(src, dst).first().map(|c| c.hops)
    }

    /// Reconstructs paths `dst -> ... -> src` (destination first) of at most
    /// `max_hops` hops. Paths that revisit a node or run into a level with no
    /// stored predecessors are dropped.
    pub fn paths(&self, src: FpgaId, dst: FpgaId, max_hops: usize) -> Vec<Vec<FpgaId>> {
        let mut out = Vec::new();
        if src == dst {
            return out;
        }

        // (partial path, level of its last node)
        let mut stack: Vec<(Vec<FpgaId>, usize)> = Vec::new();
        for cand in self.candidates(src, dst).iter().rev() {
            if cand.hops > max_hops {
                continue;
            }
            for &p in cand.parents.iter().rev() {
                stack.push((vec![dst, p], cand.hops - 1));
            }
        }

        while let Some((path, level)) = stack.pop() {
            if out.len() >= self.max_candidates {
                break;
            }
            let Some(&last) = path.last() else {
                continue;
            };
            if level == 0 {
                if last == src {
                    out.push(path);
                }
                continue;
            }
            if last == src {
                continue;
            }
            let Some(cand) = self.candidates(src, last).iter().find(|c| c.hops == level) else {
                continue;
            };
            for &p in cand.parents.iter().rev() {
                if path.contains(&p) {
                    continue;
                }
                let mut next = path.clone();
                next.push(p);
                stack.push((next, level - 1));
            }
        }
        out
    }
}

fn bfs_distances(topology: &Topology, src: FpgaId) -> Vec<Option<usize>> {
    let mut dist = vec![None; topology.num_fpgas()];
    dist[src.index()] = Some(0);
    let mut queue = VecDeque::from([src]);
    while let Some(u) = queue.pop_front() {
        let du = dist[u.index()].unwrap_or(0);
        for &(v, _) in topology.neighbors(u) {
            if dist[v.index()].is_none() {
                dist[v.index()] = Some(du + 1);
                queue.push_back(v);
            }
        }
    }
    dist
}

/// Level-by-level walk expansion from `src`. A node is admitted at level h
/// when dist(node) <= h <= dist(node) + slack; the source is never re-entered.
fn expand_source(
    topology: &Topology,
    src: FpgaId,
    hop_slack: usize,
    max_solutions: usize,
) -> Vec<Vec<Candidate>> {
    let n = topology.num_fpgas();
    let dist = bfs_distances(topology, src);
    let max_level = dist.iter().flatten().max().copied().unwrap_or(0) + hop_slack;

    let mut row: Vec<Vec<Candidate>> = vec![Vec::new(); n];
    let mut reached_prev = vec![false; n];
    reached_prev[src.index()] = true;

    for h in 1..=max_level {
        let mut reached = vec![false; n];
        for j in 0..n {
            let Some(dj) = dist[j] else { continue };
            if j == src.index() || h < dj || h > dj + hop_slack {
                continue;
            }
            let dst = FpgaId::new(j);
            let parents: Vec<FpgaId> = topology
                .neighbors(dst)
                .iter()
                .map(|&(p, _)| p)
                .filter(|p| reached_prev[p.index()])
                .collect();
            if parents.is_empty() {
                continue;
            }
            reached[j] = true;

            // The cap applies per hop level so slack levels keep their own parents.
            let kept: Vec<FpgaId> = parents.into_iter().take(max_solutions).collect();
            if !kept.is_empty() {
                row[j].push(Candidate { hops: h, parents: kept });
            }
        }
        reached_prev = reached;
    }
    row
}
