//! Mutable working graph shared by the layered phases. Nodes and edges live in
//! arenas and refer to each other by index; the id map is only used at the
//! boundaries.

use std::collections::HashMap;

use crate::geometry::Point;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DummyOrigin {
    /// Index of the long edge this dummy materialises.
    pub edge: usize,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone)]
pub struct LayoutNode {
    pub id: String,
    pub width: f32,
    pub height: f32,
    pub rank: i32,
    pub order: usize,
    /// Center, in the final orientation once coordinates are assigned.
    pub x: f32,
    pub y: f32,
    pub dummy: Option<DummyOrigin>,
    /// Enclosing subgraphs, outermost first, as indices into the flattened
    /// subgraph list.
    pub cluster: Vec<usize>,
}

impl LayoutNode {
    pub fn is_dummy(&self) -> bool {
        self.dummy.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct LayoutEdge {
    pub from: usize,
    pub to: usize,
    pub weight: f32,
    pub minlen: i32,
    pub reversed: bool,
    /// Inactive edges were replaced by a dummy chain and carry no adjacency.
    pub active: bool,
    /// Index of the caller's edge this one stands for.
    pub origin: usize,
}

#[derive(Debug, Clone)]
pub struct DummyChain {
    pub edge: usize,
    /// Dummies in rank order of the edge as it was when split.
    pub nodes: Vec<usize>,
    pub reversed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LayoutGraph {
    pub nodes: Vec<LayoutNode>,
    pub edges: Vec<LayoutEdge>,
    pub out_edges: Vec<Vec<usize>>,
    pub in_edges: Vec<Vec<usize>>,
    /// Rank -> node indices sorted by `order`. Rebuilt by [`LayoutGraph::rebuild_ranks`].
    pub ranks: Vec<Vec<usize>>,
    pub chains: Vec<DummyChain>,
    index: HashMap<String, usize>,
}

impl LayoutGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &str, width: f32, height: f32, cluster: Vec<usize>) -> usize {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.push_node(LayoutNode {
            id: id.to_string(),
            width,
            height,
            rank: 0,
            order: 0,
            x: 0.0,
            y: 0.0,
            dummy: None,
            cluster,
        });
        self.index.insert(id.to_string(), idx);
        idx
    }

    fn push_node(&mut self, node: LayoutNode) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(node);
        self.out_edges.push(Vec::new());
        self.in_edges.push(Vec::new());
        idx
    }

    pub fn add_edge(&mut self, from: usize, to: usize, weight: f32, origin: usize) -> usize {
        let idx = self.edges.len();
        self.edges.push(LayoutEdge {
            from,
            to,
            weight,
            minlen: 1,
            reversed: false,
            active: true,
            origin,
        });
        self.out_edges[from].push(idx);
        self.in_edges[to].push(idx);
        idx
    }

    /// Adds an edge by endpoint ids; unknown ids drop the edge.
    pub fn add_edge_by_id(&mut self, from: &str, to: &str, origin: usize) -> Option<usize> {
        let from = self.node_index(from)?;
        let to = self.node_index(to)?;
        Some(self.add_edge(from, to, 1.0, origin))
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn node(&self, id: &str) -> Option<&LayoutNode> {
        self.node_index(id).map(|idx| &self.nodes[idx])
    }

    pub fn predecessors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.in_edges[node].iter().map(|&e| self.edges[e].from)
    }

    pub fn successors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.out_edges[node].iter().map(|&e| self.edges[e].to)
    }

    /// Flips an active edge and moves its adjacency entries accordingly.
    pub fn reverse_edge(&mut self, edge: usize) {
        let (from, to) = (self.edges[edge].from, self.edges[edge].to);
        if self.edges[edge].active {
            self.out_edges[from].retain(|&e| e != edge);
            self.in_edges[to].retain(|&e| e != edge);
            self.out_edges[to].push(edge);
            self.in_edges[from].push(edge);
        }
        let e = &mut self.edges[edge];
        e.from = to;
        e.to = from;
        e.reversed = !e.reversed;
    }

    /// Replaces `edge` by a chain through fresh dummy nodes, one per
    /// intermediate rank. Returns the number of dummies created.
    pub fn split_edge(&mut self, edge: usize) -> usize {
        let LayoutEdge {
            from,
            to,
            weight,
            reversed,
            origin,
            ..
        } = self.edges[edge].clone();
        let (from_rank, to_rank) = (self.nodes[from].rank, self.nodes[to].rank);
        if to_rank - from_rank <= 1 {
            return 0;
        }

        self.out_edges[from].retain(|&e| e != edge);
        self.in_edges[to].retain(|&e| e != edge);
        self.edges[edge].active = false;

        let cluster = common_prefix(&self.nodes[from].cluster, &self.nodes[to].cluster);
        let (from_id, to_id) = (self.nodes[from].id.clone(), self.nodes[to].id.clone());
        let mut dummies = Vec::new();
        let mut prev = from;
        for rank in from_rank + 1..to_rank {
            let dummy = self.push_node(LayoutNode {
                id: format!("_dummy_{}_{}", edge, rank - from_rank),
                width: 0.0,
                height: 0.0,
                rank,
                order: 0,
                x: 0.0,
                y: 0.0,
                dummy: Some(DummyOrigin {
                    edge,
                    from: from_id.clone(),
                    to: to_id.clone(),
                }),
                cluster: cluster.clone(),
            });
            let seg = self.add_edge(prev, dummy, weight, origin);
            self.edges[seg].reversed = reversed;
            dummies.push(dummy);
            prev = dummy;
        }
        let seg = self.add_edge(prev, to, weight, origin);
        self.edges[seg].reversed = reversed;

        let count = dummies.len();
        self.chains.push(DummyChain {
            edge,
            nodes: dummies,
            reversed,
        });
        count
    }

    pub fn max_rank(&self) -> i32 {
        self.nodes.iter().map(|node| node.rank).max().unwrap_or(0)
    }

    /// Rebuilds the rank index from node ranks and orders.
    pub fn rebuild_ranks(&mut self) {
        let rank_count = if self.nodes.is_empty() {
            0
        } else {
            self.max_rank().max(0) as usize + 1
        };
        let mut ranks: Vec<Vec<usize>> = vec![Vec::new(); rank_count];
        for (idx, node) in self.nodes.iter().enumerate() {
            ranks[node.rank.max(0) as usize].push(idx);
        }
        for rank in &mut ranks {
            rank.sort_by_key(|&idx| self.nodes[idx].order);
        }
        self.ranks = ranks;
    }

    /// Writes each node's position within its rank back into `order`.
    pub fn sync_orders(&mut self) {
        for rank in &self.ranks {
            for (pos, &idx) in rank.iter().enumerate() {
                self.nodes[idx].order = pos;
            }
        }
    }

    /// Dummy positions for `edge` in the caller's original orientation.
    pub fn waypoints(&self, edge: usize) -> Vec<Point> {
        let Some(chain) = self.chains.iter().find(|chain| chain.edge == edge) else {
            return Vec::new();
        };
        let mut points: Vec<Point> = chain
            .nodes
            .iter()
            .map(|&idx| (self.nodes[idx].x, self.nodes[idx].y))
            .collect();
        if chain.reversed {
            points.reverse();
        }
        points
    }
}

fn common_prefix(a: &[usize], b: &[usize]) -> Vec<usize> {
    a.iter()
        .zip(b)
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| *x)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_graph() -> LayoutGraph {
        let mut g = LayoutGraph::new();
        for id in ["A", "B", "C"] {
            g.add_node(id, 10.0, 10.0, Vec::new());
        }
        g.add_edge_by_id("A", "B", 0);
        g.add_edge_by_id("B", "C", 1);
        g.add_edge_by_id("A", "C", 2);
        g
    }

    #[test]
    fn unknown_endpoints_are_dropped() {
        let mut g = chain_graph();
        assert!(g.add_edge_by_id("A", "Z", 3).is_none());
        assert_eq!(g.edges.len(), 3);
    }

    #[test]
    fn reversing_moves_adjacency() {
        let mut g = chain_graph();
        g.reverse_edge(2);
        let a = g.node_index("A").unwrap();
        let c = g.node_index("C").unwrap();
        assert!(g.out_edges[c].contains(&2));
        assert!(g.in_edges[a].contains(&2));
        assert!(!g.out_edges[a].contains(&2));
        g.reverse_edge(2);
        assert!(!g.edges[2].reversed);
        assert!(g.out_edges[a].contains(&2));
    }

    #[test]
    fn split_edge_builds_a_chain() {
        let mut g = chain_graph();
        g.nodes[1].rank = 1;
        g.nodes[2].rank = 2;
        assert_eq!(g.split_edge(2), 1);
        assert!(!g.edges[2].active);
        let dummy = g.nodes.len() - 1;
        assert_eq!(g.nodes[dummy].rank, 1);
        assert_eq!(
            g.nodes[dummy].dummy.as_ref().map(|d| (d.from.as_str(), d.to.as_str())),
            Some(("A", "C"))
        );
        let a = g.node_index("A").unwrap();
        assert!(g.successors(a).any(|n| n == dummy));
        assert_eq!(g.nodes.iter().filter(|n| !n.is_dummy()).count(), 3);
    }
}
