//! Property-based invariants of the layered pipeline:
//!
//! 1. Cycle breaking yields a DAG and undoing it restores every edge.
//! 2. Ranking respects `minlen` on every edge, for every rank strategy.
//! 3. Ordering never ends with more crossings than its seed.
//! 4. Same-rank neighbours keep their separation after coordinate sweeps.
//! 5. Subgraph boxes contain their member nodes, sibling boxes stay apart
//!    and no plain node sits inside a box after the full layout.

use mermaid_layout_engine::config::{LayoutConfig, RankStrategy};
use mermaid_layout_engine::ir::Direction;
use mermaid_layout_engine::layout::graph::LayoutGraph;
use mermaid_layout_engine::layout::position::{self, Spacing};
use mermaid_layout_engine::layout::{acyclic, order, rank};
use mermaid_layout_engine::{compute_layout, parse_mermaid, HeuristicMeasurer, Theme};
use proptest::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────────

const SPACING: Spacing = Spacing {
    node_sep: 20.0,
    rank_sep: 30.0,
    edge_sep: 8.0,
    sweeps: 4,
};

fn build(n: usize, edges: &[(usize, usize)], widths: &[f32]) -> LayoutGraph {
    let mut g = LayoutGraph::new();
    for i in 0..n {
        let width = widths.get(i).copied().unwrap_or(40.0);
        g.add_node(&format!("N{i}"), width, 24.0, Vec::new());
    }
    for (idx, &(a, b)) in edges.iter().enumerate() {
        g.add_edge(a, b, 1.0, idx);
    }
    g
}

fn is_acyclic(g: &LayoutGraph) -> bool {
    let mut indegree: Vec<usize> = g.in_edges.iter().map(Vec::len).collect();
    let mut ready: Vec<usize> = (0..g.nodes.len()).filter(|&v| indegree[v] == 0).collect();
    let mut seen = 0;
    while let Some(v) = ready.pop() {
        seen += 1;
        for next in g.successors(v).collect::<Vec<_>>() {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push(next);
            }
        }
    }
    seen == g.nodes.len()
}

fn strategy_of(idx: u8) -> RankStrategy {
    match idx % 3 {
        0 => RankStrategy::LongestPath,
        1 => RankStrategy::TightTree,
        _ => RankStrategy::NetworkSimplex,
    }
}

fn graph_strategy(
    max_nodes: usize,
    max_edges: usize,
) -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (2..=max_nodes).prop_flat_map(move |n| {
        (
            Just(n),
            proptest::collection::vec((0..n, 0..n), 1..=max_edges).prop_map(|edges| {
                edges
                    .into_iter()
                    .filter(|(a, b)| a != b)
                    .collect::<Vec<_>>()
            }),
        )
    })
}

/// Runs cycle breaking, ranking, dummies and ordering.
fn ordered(n: usize, edges: &[(usize, usize)], widths: &[f32]) -> (LayoutGraph, order::OrderStats) {
    let mut g = build(n, edges, widths);
    acyclic::make_acyclic(&mut g);
    rank::assign_ranks(&mut g, RankStrategy::NetworkSimplex, 200);
    rank::insert_dummy_nodes(&mut g);
    let stats = order::order_within_ranks(&mut g, 24);
    (g, stats)
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Cycle breaking round-trip
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn cycle_breaking_round_trips((n, edges) in graph_strategy(12, 24)) {
        let mut g = build(n, &edges, &[]);
        let reversed = acyclic::make_acyclic(&mut g);
        prop_assert!(is_acyclic(&g), "cycles remain after reversing {} edges", reversed);
        prop_assert_eq!(
            g.edges.iter().filter(|e| e.reversed).count(),
            reversed
        );

        acyclic::undo_acyclic(&mut g);
        for (idx, &(a, b)) in edges.iter().enumerate() {
            let edge = &g.edges[idx];
            prop_assert!(!edge.reversed, "edge {} still reversed", idx);
            prop_assert_eq!((edge.from, edge.to), (a, b), "edge {} not restored", idx);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Rank monotonicity
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn ranks_respect_minlen(
        (n, edges) in graph_strategy(14, 28),
        strategy in 0u8..3,
    ) {
        let mut g = build(n, &edges, &[]);
        acyclic::make_acyclic(&mut g);
        rank::assign_ranks(&mut g, strategy_of(strategy), 200);

        prop_assert_eq!(g.nodes.iter().map(|node| node.rank).min(), Some(0));
        for edge in g.edges.iter().filter(|e| e.active) {
            let span = g.nodes[edge.to].rank - g.nodes[edge.from].rank;
            prop_assert!(
                span >= edge.minlen,
                "{} -> {} spans {} ranks ({:?})",
                g.nodes[edge.from].id, g.nodes[edge.to].id, span, strategy_of(strategy)
            );
        }
    }

    #[test]
    fn dummies_leave_only_unit_spans((n, edges) in graph_strategy(10, 20)) {
        let mut g = build(n, &edges, &[]);
        acyclic::make_acyclic(&mut g);
        rank::assign_ranks(&mut g, RankStrategy::NetworkSimplex, 200);
        rank::insert_dummy_nodes(&mut g);
        for edge in g.edges.iter().filter(|e| e.active) {
            prop_assert_eq!(g.nodes[edge.to].rank - g.nodes[edge.from].rank, 1);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Crossing reduction never regresses
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn ordering_does_not_add_crossings((n, edges) in graph_strategy(12, 24)) {
        let (g, stats) = ordered(n, &edges, &[]);
        prop_assert!(
            stats.crossings <= stats.initial_crossings,
            "{} crossings after ordering, {} before",
            stats.crossings, stats.initial_crossings
        );
        prop_assert_eq!(order::count_crossings(&g), stats.crossings);
        for members in &g.ranks {
            for (pos, &node) in members.iter().enumerate() {
                prop_assert_eq!(g.nodes[node].order, pos);
            }
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Same-rank separation
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn same_rank_neighbours_stay_apart(
        (n, edges) in graph_strategy(12, 20),
        widths in proptest::collection::vec(20.0f32..120.0, 12),
    ) {
        let (mut g, _) = ordered(n, &edges, &widths);
        position::assign_coordinates(&mut g, SPACING, Direction::TopDown);
        for members in &g.ranks {
            for pair in members.windows(2) {
                let (a, b) = (&g.nodes[pair[0]], &g.nodes[pair[1]]);
                let sep = if a.is_dummy() || b.is_dummy() {
                    SPACING.edge_sep
                } else {
                    SPACING.node_sep
                };
                let required = (a.width + b.width) / 2.0 + sep;
                prop_assert!(
                    b.x - a.x + 0.01 >= required,
                    "{} at {} and {} at {} closer than {}",
                    a.id, a.x, b.id, b.x, required
                );
            }
        }
    }

    #[test]
    fn ranks_advance_along_the_flow((n, edges) in graph_strategy(10, 16)) {
        let (mut g, _) = ordered(n, &edges, &[]);
        position::assign_coordinates(&mut g, SPACING, Direction::LeftRight);
        for edge in g.edges.iter().filter(|e| e.active) {
            let (from, to) = (&g.nodes[edge.from], &g.nodes[edge.to]);
            prop_assert!(to.x > from.x, "{} is not right of {}", to.id, from.id);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Subgraph containment
// ═════════════════════════════════════════════════════════════════════════

fn flowchart_with_groups(n: usize, edges: &[(usize, usize)], groups: &[usize]) -> String {
    let mut out = String::from("flowchart TD\n");
    for group in 0..2 {
        out.push_str(&format!("subgraph G{group}\n"));
        for (node, _) in groups.iter().enumerate().filter(|(node, g)| *node < n && **g == group) {
            out.push_str(&format!("  N{node}\n"));
        }
        out.push_str("end\n");
    }
    for node in 0..n {
        out.push_str(&format!("N{node}\n"));
    }
    for (a, b) in edges {
        out.push_str(&format!("N{a} --> N{b}\n"));
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn subgraph_boxes_contain_members(
        (n, edges) in graph_strategy(10, 14),
        groups in proptest::collection::vec(0usize..3, 10),
    ) {
        let source = flowchart_with_groups(n, &edges, &groups);
        let parsed = parse_mermaid(&source).unwrap();
        let layout = compute_layout(
            &parsed.graph,
            &Theme::modern(),
            &LayoutConfig::default(),
            &HeuristicMeasurer,
        )
        .unwrap();

        prop_assert_eq!(layout.nodes.len(), n);
        for sub in &layout.subgraphs {
            let rect = sub.rect();
            for id in &sub.nodes {
                let node = layout.nodes[id].rect();
                prop_assert!(
                    rect.x - 0.01 <= node.x
                        && rect.y - 0.01 <= node.y
                        && rect.right() + 0.01 >= node.right()
                        && rect.bottom() + 0.01 >= node.bottom(),
                    "{} {:?} escapes {} {:?}",
                    id, node, sub.id, rect
                );
            }
        }

        let boxed: Vec<_> = layout.subgraphs.iter().filter(|s| s.width > 0.0 && s.height > 0.0).collect();
        for (i, a) in boxed.iter().enumerate() {
            for b in boxed.iter().skip(i + 1).filter(|b| b.parent == a.parent) {
                prop_assert!(
                    !a.rect().inflate(-0.01).intersects(&b.rect()),
                    "{} {:?} overlaps {} {:?}",
                    a.id, a.rect(), b.id, b.rect()
                );
            }
        }
        for node in layout.nodes.values().filter(|n| n.parent.is_none()) {
            for sub in &boxed {
                prop_assert!(
                    !sub.rect().inflate(-0.01).intersects(&node.rect()),
                    "plain {} {:?} inside {} {:?}",
                    node.id, node.rect(), sub.id, sub.rect()
                );
            }
        }
    }
}
