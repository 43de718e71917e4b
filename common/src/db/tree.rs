use crate::db::indices::*;
use std::collections::{HashMap, VecDeque};

#[derive(Clone, Debug)]
pub struct TreeNode {
    pub fpga: FpgaId,
    pub parent: Option<TreeIdx>,
    pub children: Vec<TreeIdx>,
    pub sink_weight: u32,
    pub max_value: u32,
    pub edge_weight: u32,
}

impl TreeNode {
    fn new(fpga: FpgaId, parent: Option<TreeIdx>) -> Self {
        Self {
            fpga,
            parent,
            children: Vec::new(),
            sink_weight: 0,
            max_value: 0,
            edge_weight: 0,
        }
    }

    #[inline]
    pub fn is_sink(&self) -> bool {
        self.sink_weight > 0
    }
}

#[derive(Clone, Debug, Default)]
pub struct Detached {
    pub parent: Option<FpgaId>,
    pub edges: Vec<(FpgaId, FpgaId)>,
    pub nodes: Vec<FpgaId>,
    pub max_value: u32,
}

// Arena-backed routing tree. Detaching compacts the arena, so any `TreeIdx`
// taken before a `detach` is stale afterwards.
#[derive(Clone, Debug)]
pub struct RoutingTree {
    nodes: Vec<TreeNode>,
    index: HashMap<FpgaId, TreeIdx>,
    root: TreeIdx,
}

impl RoutingTree {
    pub fn new(source: FpgaId) -> Self {
        let mut index = HashMap::new();
        index.insert(source, TreeIdx::new(0));
        Self {
            nodes: vec![TreeNode::new(source, None)],
            index,
            root: TreeIdx::new(0),
        }
    }

    #[inline]
    pub fn root(&self) -> TreeIdx {
        self.root
    }

    #[inline]
    pub fn source(&self) -> FpgaId {
        self.nodes[self.root.index()].fpga
    }

    #[inline]
    pub fn node(&self, idx: TreeIdx) -> &TreeNode {
        &self.nodes[idx.index()]
    }

    #[inline]
    pub fn find(&self, fpga: FpgaId) -> Option<TreeIdx> {
        self.index.get(&fpga).copied()
    }

    #[inline]
    pub fn contains(&self, fpga: FpgaId) -> bool {
        self.index.contains_key(&fpga)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn fpgas(&self) -> Vec<FpgaId> {
        self.bfs().into_iter().map(|i| self.node(i).fpga).collect()
    }

    pub fn add_child(&mut self, parent: TreeIdx, fpga: FpgaId) -> TreeIdx {
        debug_assert!(!self.contains(fpga), "{fpga:?} already in tree");
        let idx = TreeIdx::new(self.nodes.len());
        self.nodes.push(TreeNode::new(fpga, Some(parent)));
        self.nodes[parent.index()].children.push(idx);
        self.index.insert(fpga, idx);
        idx
    }

    pub fn attach_path(&mut self, path: &[FpgaId]) -> Vec<(FpgaId, FpgaId)> {
        let mut edges = Vec::new();
        let Some((&anchor, rest)) = path.split_last() else {
            return edges;
        };
        let Some(mut cur) = self.find(anchor) else {
            return edges;
        };
        for &fpga in rest.iter().rev() {
            let parent_fpga = self.node(cur).fpga;
            cur = self.add_child(cur, fpga);
            edges.push((parent_fpga, fpga));
        }
        edges
    }

    pub fn attach_edges(&mut self, edges: &[(FpgaId, FpgaId)]) -> Vec<(FpgaId, FpgaId)> {
        let mut added = Vec::with_capacity(edges.len());
        for &(parent, child) in edges {
            if self.contains(child) {
                continue;
            }
            if let Some(p) = self.find(parent) {
                self.add_child(p, child);
                added.push((parent, child));
            }
        }
        added
    }

    pub fn subtree(&self, idx: TreeIdx) -> Vec<TreeIdx> {
        let mut out = Vec::new();
        let mut stack = vec![idx];
        while let Some(i) = stack.pop() {
            out.push(i);
            for &c in self.node(i).children.iter().rev() {
                stack.push(c);
            }
        }
        out
    }

    pub fn detach(&mut self, idx: TreeIdx) -> Detached {
        let mut out = Detached {
            max_value: self.node(idx).max_value,
            ..Default::default()
        };
        let Some(parent) = self.node(idx).parent else {
            return out;
        };
        out.parent = Some(self.node(parent).fpga);

        for i in self.subtree(idx) {
            let node = &self.nodes[i.index()];
            if let Some(p) = node.parent {
                out.edges.push((self.nodes[p.index()].fpga, node.fpga));
            }
            out.nodes.push(node.fpga);
            self.index.remove(&node.fpga);
        }
        self.nodes[parent.index()].children.retain(|&c| c != idx);
        self.compact();
        out
    }

    // Rebuilds the arena from the nodes still reachable from the root, in
    // breadth-first order. Child order is kept, so traversals are unchanged.
    fn compact(&mut self) {
        let order = self.bfs();
        let mut remap = vec![None; self.nodes.len()];
        for (new, old) in order.iter().enumerate() {
            remap[old.index()] = Some(TreeIdx::new(new));
        }

        let mut nodes = Vec::with_capacity(order.len());
        for old in order {
            let mut node = self.nodes[old.index()].clone();
            node.parent = node.parent.and_then(|p| remap[p.index()]);
            node.children = node
                .children
                .iter()
                .filter_map(|c| remap[c.index()])
                .collect();
            nodes.push(node);
        }
        self.index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.fpga, TreeIdx::new(i)))
            .collect();
        self.nodes = nodes;
        self.root = TreeIdx::new(0);
    }

    pub fn bfs(&self) -> Vec<TreeIdx> {
        self.levels().into_iter().map(|(i, _)| i).collect()
    }

    pub fn levels(&self) -> Vec<(TreeIdx, usize)> {
        let mut out = Vec::with_capacity(self.len());
        let mut queue = VecDeque::from([(self.root, 0usize)]);
        while let Some((i, d)) = queue.pop_front() {
            out.push((i, d));
            for &c in &self.nodes[i.index()].children {
                queue.push_back((c, d + 1));
            }
        }
        out
    }

    pub fn edges(&self) -> Vec<(FpgaId, FpgaId)> {
        self.bfs()
            .into_iter()
            .filter_map(|i| {
                let n = self.node(i);
                n.parent.map(|p| (self.node(p).fpga, n.fpga))
            })
            .collect()
    }

    pub fn update_weights(&mut self, sink_weights: &HashMap<FpgaId, u32>) {
        let order = self.bfs();
        for &i in order.iter().rev() {
            let fpga = self.nodes[i.index()].fpga;
            let own = if i == self.root {
                0
            } else {
                sink_weights.get(&fpga).copied().unwrap_or(0)
            };
            let child_max = self.nodes[i.index()]
                .children
                .iter()
                .map(|c| self.nodes[c.index()].max_value)
                .max()
                .unwrap_or(0);
            let node = &mut self.nodes[i.index()];
            node.sink_weight = own;
            node.max_value = own.max(child_max);
            node.edge_weight = node.max_value;
        }
    }

    pub fn sink_paths(&self) -> Vec<Vec<FpgaId>> {
        let mut out = Vec::new();
        for i in self.bfs() {
            if i == self.root || !self.node(i).is_sink() {
                continue;
            }
            let mut path = vec![self.node(i).fpga];
            let mut cur = i;
            while let Some(p) = self.node(cur).parent {
                path.push(self.node(p).fpga);
                if p == self.root || self.node(p).is_sink() {
                    break;
                }
                cur = p;
            }
            out.push(path);
        }
        out
    }
}
