use std::collections::HashMap;

use tracing::debug;

use super::graph::LayoutGraph;
use crate::config::RankStrategy;

/// Assigns integer ranks to every node of an acyclic graph and normalises the
/// minimum rank to 0.
pub fn assign_ranks(graph: &mut LayoutGraph, strategy: RankStrategy, max_iterations: usize) {
    longest_path(graph);
    match strategy {
        RankStrategy::LongestPath => {}
        RankStrategy::TightTree => tight_tree(graph),
        RankStrategy::NetworkSimplex => network_simplex(graph, max_iterations),
    }
    normalize_ranks(graph);
}

/// rank = max(pred rank + minlen), finalised in post-order over predecessors
/// with an explicit stack.
pub fn longest_path(graph: &mut LayoutGraph) {
    let n = graph.nodes.len();
    let mut done = vec![false; n];
    let mut visiting = vec![false; n];
    let mut ranks = vec![0i32; n];
    for root in 0..n {
        if done[root] {
            continue;
        }
        visiting[root] = true;
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        while let Some(frame) = stack.last_mut() {
            let (node, cursor) = *frame;
            if let Some(&edge) = graph.in_edges[node].get(cursor) {
                frame.1 += 1;
                let pred = graph.edges[edge].from;
                // A pred already being visited would close a cycle; ignore it.
                if !done[pred] && !visiting[pred] {
                    visiting[pred] = true;
                    stack.push((pred, 0));
                }
                continue;
            }
            ranks[node] = graph.in_edges[node]
                .iter()
                .map(|&e| ranks[graph.edges[e].from] + graph.edges[e].minlen)
                .max()
                .unwrap_or(0);
            done[node] = true;
            stack.pop();
        }
    }
    for (node, rank) in graph.nodes.iter_mut().zip(ranks) {
        node.rank = rank;
    }
}

/// Pulls nodes toward their successors while respecting the lower bound set
/// by their predecessors. Sources drop down next to what they feed.
pub fn tight_tree(graph: &mut LayoutGraph) {
    let order = topological_order(graph);
    for _ in 0..graph.nodes.len().max(1) {
        let mut changed = false;
        for &node in order.iter().rev() {
            let Some(upper) = graph.out_edges[node]
                .iter()
                .map(|&e| graph.nodes[graph.edges[e].to].rank - graph.edges[e].minlen)
                .min()
            else {
                continue;
            };
            let lower = graph.in_edges[node]
                .iter()
                .map(|&e| graph.nodes[graph.edges[e].from].rank + graph.edges[e].minlen)
                .max()
                .unwrap_or(i32::MIN);
            let target = upper.max(lower);
            if target != graph.nodes[node].rank {
                graph.nodes[node].rank = target;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

pub fn normalize_ranks(graph: &mut LayoutGraph) {
    let Some(min) = graph.nodes.iter().map(|node| node.rank).min() else {
        return;
    };
    for node in &mut graph.nodes {
        node.rank -= min;
    }
}

/// Splits every edge spanning more than one rank into a dummy chain.
pub fn insert_dummy_nodes(graph: &mut LayoutGraph) -> usize {
    let long_edges: Vec<usize> = graph
        .edges
        .iter()
        .enumerate()
        .filter(|(_, edge)| {
            edge.active && graph.nodes[edge.to].rank - graph.nodes[edge.from].rank > 1
        })
        .map(|(idx, _)| idx)
        .collect();
    let count = long_edges
        .into_iter()
        .map(|edge| graph.split_edge(edge))
        .sum();
    debug!(dummies = count, "inserted dummy nodes");
    count
}

fn topological_order(graph: &LayoutGraph) -> Vec<usize> {
    let mut indegree: Vec<usize> = graph.in_edges.iter().map(Vec::len).collect();
    let mut queue: Vec<usize> = (0..graph.nodes.len())
        .filter(|&n| indegree[n] == 0)
        .rev()
        .collect();
    let mut order = Vec::with_capacity(graph.nodes.len());
    while let Some(node) = queue.pop() {
        order.push(node);
        for &edge in &graph.out_edges[node] {
            let next = graph.edges[edge].to;
            indegree[next] -= 1;
            if indegree[next] == 0 {
                queue.push(next);
            }
        }
    }
    order
}

#[derive(Debug, Clone)]
struct SimplexEdge {
    tail: usize,
    head: usize,
    weight: f32,
    minlen: i32,
}

/// Network simplex over one weakly connected component, in local indices.
struct Simplex {
    edges: Vec<SimplexEdge>,
    incident: Vec<Vec<usize>>,
    rank: Vec<i32>,
    tree_edge: Vec<bool>,
    parent: Vec<Option<usize>>,
    parent_edge: Vec<Option<usize>>,
    low: Vec<usize>,
    lim: Vec<usize>,
    cut: Vec<f32>,
    postorder: Vec<usize>,
    preorder: Vec<usize>,
}

impl Simplex {
    fn new(edges: Vec<SimplexEdge>, rank: Vec<i32>) -> Self {
        let n = rank.len();
        let mut incident = vec![Vec::new(); n];
        for (idx, edge) in edges.iter().enumerate() {
            incident[edge.tail].push(idx);
            incident[edge.head].push(idx);
        }
        let edge_count = edges.len();
        Self {
            edges,
            incident,
            rank,
            tree_edge: vec![false; edge_count],
            parent: vec![None; n],
            parent_edge: vec![None; n],
            low: vec![0; n],
            lim: vec![0; n],
            cut: vec![0.0; n],
            postorder: Vec::new(),
            preorder: Vec::new(),
        }
    }

    fn slack(&self, edge: usize) -> i32 {
        let e = &self.edges[edge];
        self.rank[e.head] - self.rank[e.tail] - e.minlen
    }

    fn other(&self, edge: usize, node: usize) -> usize {
        let e = &self.edges[edge];
        if e.tail == node { e.head } else { e.tail }
    }

    /// Grows a spanning tree of tight edges, shifting the tree's ranks to
    /// tighten the cheapest incident edge whenever growth stalls.
    fn feasible_tree(&mut self) {
        let n = self.rank.len();
        let mut in_tree = vec![false; n];
        in_tree[0] = true;
        let mut size = 1;
        loop {
            let mut stack: Vec<usize> = (0..n).filter(|&v| in_tree[v]).collect();
            while let Some(node) = stack.pop() {
                for i in 0..self.incident[node].len() {
                    let edge = self.incident[node][i];
                    let other = self.other(edge, node);
                    if !in_tree[other] && self.slack(edge) == 0 {
                        in_tree[other] = true;
                        self.tree_edge[edge] = true;
                        size += 1;
                        stack.push(other);
                    }
                }
            }
            if size >= n {
                break;
            }
            let candidate = (0..self.edges.len())
                .filter(|&e| in_tree[self.edges[e].tail] != in_tree[self.edges[e].head])
                .min_by_key(|&e| self.slack(e));
            let Some(edge) = candidate else {
                break;
            };
            let delta = if in_tree[self.edges[edge].tail] {
                self.slack(edge)
            } else {
                -self.slack(edge)
            };
            for v in 0..n {
                if in_tree[v] {
                    self.rank[v] += delta;
                }
            }
        }
    }

    fn init_low_lim(&mut self) {
        let n = self.rank.len();
        self.parent = vec![None; n];
        self.parent_edge = vec![None; n];
        self.postorder.clear();
        self.preorder.clear();
        let mut next_lim = 1;
        let mut visited = vec![false; n];
        visited[0] = true;
        self.low[0] = next_lim;
        self.preorder.push(0);
        let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
        while let Some(frame) = stack.last_mut() {
            let (node, cursor) = *frame;
            if cursor < self.incident[node].len() {
                frame.1 += 1;
                let edge = self.incident[node][cursor];
                if !self.tree_edge[edge] {
                    continue;
                }
                let child = self.other(edge, node);
                if visited[child] {
                    continue;
                }
                visited[child] = true;
                self.parent[child] = Some(node);
                self.parent_edge[child] = Some(edge);
                self.low[child] = next_lim;
                self.preorder.push(child);
                stack.push((child, 0));
            } else {
                self.lim[node] = next_lim;
                next_lim += 1;
                self.postorder.push(node);
                stack.pop();
            }
        }
    }

    fn init_cut_values(&mut self) {
        for i in 0..self.postorder.len() {
            let child = self.postorder[i];
            let (Some(parent), Some(parent_edge)) = (self.parent[child], self.parent_edge[child])
            else {
                continue;
            };
            let child_is_tail = self.edges[parent_edge].tail == child;
            let mut value = self.edges[parent_edge].weight;
            for &edge in &self.incident[child] {
                let is_out = self.edges[edge].tail == child;
                let other = if is_out {
                    self.edges[edge].head
                } else {
                    self.edges[edge].tail
                };
                if other == parent {
                    continue;
                }
                let points_to_head = is_out == child_is_tail;
                let weight = self.edges[edge].weight;
                value += if points_to_head { weight } else { -weight };
                if self.tree_edge[edge] {
                    let other_cut = self.cut[other];
                    value += if points_to_head { -other_cut } else { other_cut };
                }
            }
            self.cut[child] = value;
        }
    }

    fn leave_edge(&self) -> Option<usize> {
        self.preorder
            .iter()
            .copied()
            .find(|&v| self.parent_edge[v].is_some() && self.cut[v] < 0.0)
            .and_then(|v| self.parent_edge[v])
    }

    fn is_descendant(&self, node: usize, root: usize) -> bool {
        self.low[root] <= self.lim[node] && self.lim[node] <= self.lim[root]
    }

    fn enter_edge(&self, leaving: usize) -> Option<usize> {
        let SimplexEdge { tail, head, .. } = self.edges[leaving];
        let (subtree_root, flip) = if self.lim[tail] > self.lim[head] {
            (head, true)
        } else {
            (tail, false)
        };
        (0..self.edges.len())
            .filter(|&e| !self.tree_edge[e])
            .filter(|&e| {
                flip == self.is_descendant(self.edges[e].tail, subtree_root)
                    && flip != self.is_descendant(self.edges[e].head, subtree_root)
            })
            .min_by_key(|&e| self.slack(e))
    }

    fn update_ranks(&mut self) {
        for i in 1..self.preorder.len() {
            let node = self.preorder[i];
            let (Some(parent), Some(edge)) = (self.parent[node], self.parent_edge[node]) else {
                continue;
            };
            let minlen = self.edges[edge].minlen;
            self.rank[node] = if self.edges[edge].tail == node {
                self.rank[parent] - minlen
            } else {
                self.rank[parent] + minlen
            };
        }
    }

    fn run(&mut self, max_iterations: usize) -> usize {
        self.feasible_tree();
        self.init_low_lim();
        self.init_cut_values();
        let mut iterations = 0;
        while iterations < max_iterations {
            let Some(leaving) = self.leave_edge() else {
                break;
            };
            let Some(entering) = self.enter_edge(leaving) else {
                break;
            };
            self.tree_edge[leaving] = false;
            self.tree_edge[entering] = true;
            self.init_low_lim();
            self.update_ranks();
            self.init_cut_values();
            iterations += 1;
        }
        iterations
    }
}

/// Optimal layering by network simplex (feasible tight tree, cut values,
/// leave/enter exchanges), run per weakly connected component.
pub fn network_simplex(graph: &mut LayoutGraph, max_iterations: usize) {
    let mut iterations = 0;
    for component in weak_components(graph) {
        if component.len() < 2 {
            continue;
        }
        let local: HashMap<usize, usize> = component
            .iter()
            .enumerate()
            .map(|(local, &global)| (global, local))
            .collect();

        let mut merged: HashMap<(usize, usize), usize> = HashMap::new();
        let mut edges: Vec<SimplexEdge> = Vec::new();
        for edge in graph.edges.iter().filter(|e| e.active) {
            let (Some(&tail), Some(&head)) = (local.get(&edge.from), local.get(&edge.to)) else {
                continue;
            };
            match merged.get(&(tail, head)) {
                Some(&idx) => {
                    edges[idx].weight += edge.weight;
                    edges[idx].minlen = edges[idx].minlen.max(edge.minlen);
                }
                None => {
                    merged.insert((tail, head), edges.len());
                    edges.push(SimplexEdge {
                        tail,
                        head,
                        weight: edge.weight,
                        minlen: edge.minlen,
                    });
                }
            }
        }

        let ranks = component.iter().map(|&v| graph.nodes[v].rank).collect();
        let mut simplex = Simplex::new(edges, ranks);
        iterations += simplex.run(max_iterations);
        let min = simplex.rank.iter().copied().min().unwrap_or(0);
        for (&global, rank) in component.iter().zip(&simplex.rank) {
            graph.nodes[global].rank = rank - min;
        }
    }
    debug!(iterations, "network simplex");
}

fn weak_components(graph: &LayoutGraph) -> Vec<Vec<usize>> {
    let n = graph.nodes.len();
    let mut component = vec![usize::MAX; n];
    let mut out = Vec::new();
    for root in 0..n {
        if component[root] != usize::MAX {
            continue;
        }
        let id = out.len();
        let mut members = vec![root];
        component[root] = id;
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            let neighbors = graph.successors(node).chain(graph.predecessors(node));
            for next in neighbors.collect::<Vec<_>>() {
                if component[next] == usize::MAX {
                    component[next] = id;
                    members.push(next);
                    stack.push(next);
                }
            }
        }
        members.sort_unstable();
        out.push(members);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::acyclic::make_acyclic;

    fn graph_from(ids: &[&str], edges: &[(&str, &str)]) -> LayoutGraph {
        let mut g = LayoutGraph::new();
        for id in ids {
            g.add_node(id, 10.0, 10.0, Vec::new());
        }
        for (i, (a, b)) in edges.iter().enumerate() {
            g.add_edge_by_id(a, b, i);
        }
        g
    }

    fn rank_of(g: &LayoutGraph, id: &str) -> i32 {
        g.node(id).map(|n| n.rank).unwrap_or(-1)
    }

    fn assert_monotone(g: &LayoutGraph) {
        for edge in g.edges.iter().filter(|e| e.active) {
            assert!(
                g.nodes[edge.to].rank >= g.nodes[edge.from].rank + edge.minlen,
                "{} -> {}",
                g.nodes[edge.from].id,
                g.nodes[edge.to].id
            );
        }
    }

    fn total_length(g: &LayoutGraph) -> i32 {
        g.edges
            .iter()
            .filter(|e| e.active)
            .map(|e| g.nodes[e.to].rank - g.nodes[e.from].rank)
            .sum()
    }

    #[test]
    fn longest_path_layers_a_chain() {
        let mut g = graph_from(&["A", "B", "C"], &[("A", "B"), ("B", "C"), ("A", "C")]);
        assign_ranks(&mut g, RankStrategy::LongestPath, 0);
        assert_eq!(
            (rank_of(&g, "A"), rank_of(&g, "B"), rank_of(&g, "C")),
            (0, 1, 2)
        );
    }

    #[test]
    fn tight_tree_pulls_sources_down() {
        // X only feeds D, which sits at rank 3.
        let mut g = graph_from(
            &["A", "B", "C", "D", "X"],
            &[("A", "B"), ("B", "C"), ("C", "D"), ("X", "D")],
        );
        assign_ranks(&mut g, RankStrategy::LongestPath, 0);
        assert_eq!(rank_of(&g, "X"), 0);
        assign_ranks(&mut g, RankStrategy::TightTree, 0);
        assert_eq!(rank_of(&g, "X"), 2);
        assert_monotone(&g);
    }

    #[test]
    fn network_simplex_is_feasible_and_no_longer_than_longest_path() {
        let edges = [
            ("a", "b"),
            ("b", "c"),
            ("c", "d"),
            ("d", "h"),
            ("a", "e"),
            ("e", "g"),
            ("a", "f"),
            ("f", "g"),
            ("g", "h"),
        ];
        let ids = ["a", "b", "c", "d", "e", "f", "g", "h"];
        let mut lp = graph_from(&ids, &edges);
        assign_ranks(&mut lp, RankStrategy::LongestPath, 0);
        let mut ns = graph_from(&ids, &edges);
        assign_ranks(&mut ns, RankStrategy::NetworkSimplex, 100);
        assert_monotone(&ns);
        assert!(total_length(&ns) <= total_length(&lp));
        assert_eq!(ns.nodes.iter().map(|n| n.rank).min(), Some(0));
    }

    #[test]
    fn network_simplex_tightens_a_dangling_source() {
        let mut g = graph_from(
            &["A", "B", "C", "D", "X"],
            &[("A", "B"), ("B", "C"), ("C", "D"), ("X", "D")],
        );
        assign_ranks(&mut g, RankStrategy::NetworkSimplex, 100);
        assert_eq!(rank_of(&g, "X"), 2);
        assert_eq!(total_length(&g), 4);
    }

    #[test]
    fn disconnected_components_each_start_at_zero() {
        let mut g = graph_from(&["A", "B", "C", "D"], &[("A", "B"), ("C", "D")]);
        assign_ranks(&mut g, RankStrategy::NetworkSimplex, 100);
        assert_eq!(rank_of(&g, "A"), 0);
        assert_eq!(rank_of(&g, "C"), 0);
        assert_eq!(rank_of(&g, "D"), 1);
    }

    #[test]
    fn cyclic_input_ranks_after_reversal() {
        let mut g = graph_from(&["A", "B", "C"], &[("A", "B"), ("B", "C"), ("C", "A")]);
        make_acyclic(&mut g);
        assign_ranks(&mut g, RankStrategy::NetworkSimplex, 100);
        assert_monotone(&g);
        assert_eq!(insert_dummy_nodes(&mut g), 1);
        assert_monotone(&g);
    }
}
