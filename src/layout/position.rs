use super::graph::LayoutGraph;
use crate::ir::Direction;

const SEPARATION_EPS: f32 = 1e-3;

#[derive(Debug, Clone, Copy)]
pub struct Spacing {
    pub node_sep: f32,
    pub rank_sep: f32,
    pub edge_sep: f32,
    pub sweeps: usize,
}

/// Turns rank/order into centers. Works in a top-down frame (rank along y,
/// order along x) and transposes/mirrors for the requested direction last.
pub fn assign_coordinates(graph: &mut LayoutGraph, spacing: Spacing, direction: Direction) {
    let horizontal = direction.is_horizontal();
    let cross_size = |graph: &LayoutGraph, node: usize| {
        let n = &graph.nodes[node];
        if horizontal { n.height } else { n.width }
    };
    let main_size = |graph: &LayoutGraph, node: usize| {
        let n = &graph.nodes[node];
        if horizontal { n.width } else { n.height }
    };

    // Rank axis: cumulative thickness.
    let mut cursor = 0.0f32;
    for r in 0..graph.ranks.len() {
        let thickness = graph.ranks[r]
            .iter()
            .map(|&node| main_size(graph, node))
            .fold(0.0, f32::max);
        for i in 0..graph.ranks[r].len() {
            let node = graph.ranks[r][i];
            graph.nodes[node].y = cursor + thickness / 2.0;
        }
        cursor += thickness + spacing.rank_sep;
    }

    // Cross axis: left-aligned seed.
    let sizes: Vec<f32> = (0..graph.nodes.len()).map(|n| cross_size(graph, n)).collect();
    for rank in &graph.ranks {
        let mut x = 0.0f32;
        let mut prev: Option<usize> = None;
        for &node in rank {
            if let Some(p) = prev {
                x += sizes[p] / 2.0 + separation(graph, p, node, spacing) + sizes[node] / 2.0;
            }
            graph.nodes[node].x = x;
            prev = Some(node);
        }
    }

    for sweep in 0..spacing.sweeps {
        median_sweep(graph, &sizes, spacing, sweep % 2 == 0);
    }

    normalize(graph, &sizes);
    apply_direction(graph, direction);
}

fn separation(graph: &LayoutGraph, a: usize, b: usize, spacing: Spacing) -> f32 {
    if graph.nodes[a].is_dummy() || graph.nodes[b].is_dummy() {
        spacing.edge_sep
    } else {
        spacing.node_sep
    }
}

/// Moves each node toward the median cross position of its neighbors in the
/// previous (down) or next (up) rank. A move that would break separation
/// with any rank-mate, or jump over one, is rejected outright.
fn median_sweep(graph: &mut LayoutGraph, sizes: &[f32], spacing: Spacing, downward: bool) {
    let rank_count = graph.ranks.len();
    let ranks: Vec<usize> = if downward {
        (1..rank_count).collect()
    } else {
        (0..rank_count.saturating_sub(1)).rev().collect()
    };
    for r in ranks {
        for i in 0..graph.ranks[r].len() {
            let node = graph.ranks[r][i];
            let mut neighbors: Vec<f32> = if downward {
                graph.predecessors(node).map(|p| graph.nodes[p].x).collect()
            } else {
                graph.successors(node).map(|s| graph.nodes[s].x).collect()
            };
            if neighbors.is_empty() {
                continue;
            }
            neighbors.sort_by(f32::total_cmp);
            let mid = neighbors.len() / 2;
            let target = if neighbors.len() % 2 == 1 {
                neighbors[mid]
            } else {
                (neighbors[mid - 1] + neighbors[mid]) / 2.0
            };
            if move_is_legal(graph, sizes, spacing, r, i, target) {
                graph.nodes[node].x = target;
            }
        }
    }
}

fn move_is_legal(
    graph: &LayoutGraph,
    sizes: &[f32],
    spacing: Spacing,
    rank: usize,
    pos: usize,
    target: f32,
) -> bool {
    let members = &graph.ranks[rank];
    let node = members[pos];
    members.iter().enumerate().all(|(other_pos, &other)| {
        if other == node {
            return true;
        }
        let required = (sizes[node] + sizes[other]) / 2.0 + separation(graph, node, other, spacing);
        let other_x = graph.nodes[other].x;
        let keeps_side = if other_pos < pos {
            target > other_x
        } else {
            target < other_x
        };
        keeps_side && (target - other_x).abs() + SEPARATION_EPS >= required
    })
}

fn normalize(graph: &mut LayoutGraph, sizes: &[f32]) {
    let min_x = graph
        .nodes
        .iter()
        .enumerate()
        .map(|(i, node)| node.x - sizes[i] / 2.0)
        .fold(f32::INFINITY, f32::min);
    if min_x.is_finite() {
        for node in &mut graph.nodes {
            node.x -= min_x;
        }
    }
}

/// Transposes the top-down frame for LR/RL and mirrors for BT/RL.
pub fn apply_direction(graph: &mut LayoutGraph, direction: Direction) {
    if direction.is_horizontal() {
        for node in &mut graph.nodes {
            std::mem::swap(&mut node.x, &mut node.y);
        }
    }
    if !direction.is_mirrored() {
        return;
    }
    let extent = |node: &super::graph::LayoutNode| match direction {
        Direction::BottomTop => (node.y, node.height),
        _ => (node.x, node.width),
    };
    let max = graph
        .nodes
        .iter()
        .map(|node| {
            let (center, size) = extent(node);
            center + size / 2.0
        })
        .fold(0.0, f32::max);
    for node in &mut graph.nodes {
        match direction {
            Direction::BottomTop => node.y = max - node.y,
            _ => node.x = max - node.x,
        }
    }
}
