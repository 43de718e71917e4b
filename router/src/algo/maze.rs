use crate::channel::RoutingState;
use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use tdm_common::db::core::Topology;
use tdm_common::db::indices::FpgaId;

const SCALE: f64 = 100.0;

pub struct MazeRouter<'a> {
    topology: &'a Topology,
    state: &'a RoutingState,
    g_score: Vec<i64>,
    parents: Vec<Option<FpgaId>>,
    closed: Vec<bool>,
}

impl<'a> MazeRouter<'a> {
    pub fn new(topology: &'a Topology, state: &'a RoutingState) -> Self {
        let n = topology.num_fpgas();
        Self {
            topology,
            state,
            g_score: vec![i64::MAX; n],
            parents: vec![None; n],
            closed: vec![false; n],
        }
    }

    pub fn step_cost(&self, from: FpgaId, to: FpgaId, max_weight: u32) -> f64 {
        let d = self.state.demand(from, to).max(0) as i64;
        let cap = self.state.capacity(from, to).max(1) as i64;
        let old_tdm = (d + cap - 1) / cap;
        let new_tdm = (d + cap) / cap;
        (new_tdm - old_tdm) as f64 * self.state.passed_weight(from, to) as f64
            + max_weight as f64 * new_tdm as f64
    }

    pub fn find_path(
        &mut self,
        start: FpgaId,
        is_target: impl Fn(FpgaId) -> bool,
        is_blocked: impl Fn(FpgaId) -> bool,
        max_weight: u32,
        budget: f64,
    ) -> Option<(Vec<FpgaId>, f64)> {
        self.g_score.fill(i64::MAX);
        self.parents.fill(None);
        self.closed.fill(false);

        let limit = (budget * SCALE).floor() as i64;
        let mut open: PriorityQueue<FpgaId, Reverse<i64>> = PriorityQueue::new();
        self.g_score[start.index()] = 0;
        open.push(start, Reverse(0));

        while let Some((cur, Reverse(g))) = open.pop() {
            if g >= limit {
                return None;
            }
            if cur != start && is_target(cur) {
                return Some((self.reconstruct(cur), g as f64 / SCALE));
            }
            self.closed[cur.index()] = true;

            for &(next, _) in self.topology.neighbors(cur) {
                if next == start || self.closed[next.index()] || is_blocked(next) {
                    continue;
                }
                let step = (self.step_cost(next, cur, max_weight) * SCALE).round() as i64;
                let tentative = g + step;
                if tentative < self.g_score[next.index()] {
                    self.g_score[next.index()] = tentative;
                    self.parents[next.index()] = Some(cur);
                    open.push_increase(next, Reverse(tentative));
                }
            }
        }
        None
    }

    fn reconstruct(&self, end: FpgaId) -> Vec<FpgaId> {
        let mut path = vec![end];
        let mut cur = end;
        while let Some(p) = self.parents[cur.index()] {
            path.push(p);
            cur = p;
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(i: usize) -> FpgaId {
        FpgaId::new(i)
    }

    // 0 - 1 - 2
    // |       |
    // 3 - 4 - 5
    fn grid() -> Topology {
        let mut topo = Topology::new();
        for (a, b) in [(0, 1), (1, 2), (0, 3), (3, 4), (4, 5), (2, 5)] {
            topo.connect(f(a), f(b), 1);
        }
        topo
    }

    #[test]
    fn finds_cheapest_target() {
        let topo = grid();
        let state = RoutingState::new(&topo, 4);
        let mut maze = MazeRouter::new(&topo, &state);
        let (path, cost) = maze
            .find_path(f(2), |n| n == f(0), |_| false, 3, f64::INFINITY)
            .unwrap();
        assert_eq!(path, vec![f(2), f(1), f(0)]);
        assert_eq!(cost, 6.0);
    }

    #[test]
    fn congestion_diverts_search() {
        let topo = grid();
        let mut state = RoutingState::new(&topo, 2);
        for _ in 0..6 {
            state.add_demand(f(1), f(2));
        }
        let mut maze = MazeRouter::new(&topo, &state);
        let (path, _) = maze
            .find_path(f(2), |n| n == f(0), |_| false, 3, f64::INFINITY)
            .unwrap();
        assert_eq!(path, vec![f(2), f(5), f(4), f(3), f(0)]);
    }

    #[test]
    fn blocked_nodes_and_budget_are_respected() {
        let topo = grid();
        let state = RoutingState::new(&topo, 4);
        let mut maze = MazeRouter::new(&topo, &state);
        assert!(
            maze.find_path(f(2), |n| n == f(0), |n| n == f(1) || n == f(4), 1, f64::INFINITY)
                .is_none()
        );
        assert!(maze.find_path(f(2), |n| n == f(0), |_| false, 3, 6.0).is_none());
    }

    #[test]
    fn step_cost_charges_passing_signals_on_tdm_growth() {
        let topo = grid();
        let mut state = RoutingState::new(&topo, 2);
        state.add_demand(f(0), f(1));
        state.add_demand(f(0), f(1));
        let maze = MazeRouter::new(&topo, &state);
        // d = 2, cap = 2: tdm 1 -> 2, nobody recorded as passing yet.
        assert_eq!(maze.step_cost(f(0), f(1), 5), 10.0);
        assert_eq!(maze.step_cost(f(1), f(0), 5), 5.0);
    }
}
