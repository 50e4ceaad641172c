use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use super::types::{NodeLayout, Rect, SubgraphLayout};
use crate::ir::Direction;

const MAX_OVERLAP_ITERATIONS: usize = 10;
const MAX_REPEL_ROUNDS: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct BoxPadding {
    pub padding: f32,
    pub title: f32,
    /// Clearance kept between boxes that were pushed apart.
    pub gap: f32,
}

/// Recomputes every box bottom-up: members and nested boxes, expanded by the
/// padding, with extra room on top for the title. Subgraphs with neither
/// members nor children keep whatever box they had.
pub fn compute_bounds(
    subgraphs: &mut [SubgraphLayout],
    nodes: &BTreeMap<String, NodeLayout>,
    padding: BoxPadding,
) {
    // Pre-order puts children after their parent; walking backwards visits
    // the deepest boxes first.
    for i in (0..subgraphs.len()).rev() {
        let mut bounds: Option<Rect> = subgraphs[i]
            .nodes
            .iter()
            .filter_map(|id| nodes.get(id))
            .map(NodeLayout::rect)
            .reduce(|a, b| a.union(&b));
        for child in (i + 1)..subgraphs.len() {
            if subgraphs[child].parent == Some(i) && has_box(&subgraphs[child]) {
                let rect = subgraphs[child].rect();
                bounds = Some(bounds.map_or(rect, |b| b.union(&rect)));
            }
        }
        let Some(bounds) = bounds else {
            continue;
        };
        let sub = &mut subgraphs[i];
        let title = title_room(sub, padding);
        sub.x = bounds.x - padding.padding;
        sub.y = bounds.y - padding.padding - title;
        sub.width = bounds.width + padding.padding * 2.0;
        sub.height = bounds.height + padding.padding * 2.0 + title;
    }
}

fn title_room(sub: &SubgraphLayout, padding: BoxPadding) -> f32 {
    if sub.label.trim().is_empty() {
        0.0
    } else {
        padding.title.max(sub.label_block.height + padding.padding * 0.5)
    }
}

pub(crate) fn has_box(sub: &SubgraphLayout) -> bool {
    sub.width > 0.0 && sub.height > 0.0
}

/// Pushes intersecting sibling boxes apart by moving the members of the one
/// further along the chosen axis. Returns the number of passes used.
pub fn resolve_overlaps(
    subgraphs: &mut [SubgraphLayout],
    nodes: &mut BTreeMap<String, NodeLayout>,
    direction: Direction,
    padding: BoxPadding,
) -> usize {
    compute_bounds(subgraphs, nodes, padding);
    for iteration in 0..MAX_OVERLAP_ITERATIONS {
        let mut moved = false;
        for i in 0..subgraphs.len() {
            for j in (i + 1)..subgraphs.len() {
                if subgraphs[i].parent != subgraphs[j].parent
                    || !has_box(&subgraphs[i])
                    || !has_box(&subgraphs[j])
                {
                    continue;
                }
                let (a, b) = (subgraphs[i].rect(), subgraphs[j].rect());
                if !a.intersects(&b) {
                    continue;
                }
                let (loser, dx, dy) = push_vector(i, &a, j, &b, direction, padding.gap);
                let members: Vec<String> = subgraphs[loser].nodes.clone();
                shift_nodes(nodes, &members, dx, dy);
                compute_bounds(subgraphs, nodes, padding);
                moved = true;
            }
        }
        if !moved {
            debug!(iterations = iteration, "subgraph overlaps resolved");
            return iteration;
        }
    }
    debug!(
        iterations = MAX_OVERLAP_ITERATIONS,
        "subgraph overlap resolution hit the iteration cap"
    );
    MAX_OVERLAP_ITERATIONS
}

/// Picks the axis needing the smaller displacement (the flow axis on a tie)
/// and the box with the larger center on that axis as the one to move.
fn push_vector(
    i: usize,
    a: &Rect,
    j: usize,
    b: &Rect,
    direction: Direction,
    gap: f32,
) -> (usize, f32, f32) {
    let (ac, bc) = (a.center(), b.center());
    let (x_loser, x_winner, x_loser_rect) = if bc.0 >= ac.0 { (j, a, b) } else { (i, b, a) };
    let (y_loser, y_winner, y_loser_rect) = if bc.1 >= ac.1 { (j, a, b) } else { (i, b, a) };
    let need_x = x_winner.right() + gap - x_loser_rect.x;
    let need_y = y_winner.bottom() + gap - y_loser_rect.y;
    let prefer_x = direction.is_horizontal();
    let use_x = if (need_x - need_y).abs() < 1e-3 {
        prefer_x
    } else {
        need_x < need_y
    };
    if use_x {
        (x_loser, need_x, 0.0)
    } else {
        (y_loser, 0.0, need_y)
    }
}

pub(crate) fn shift_nodes(nodes: &mut BTreeMap<String, NodeLayout>, ids: &[String], dx: f32, dy: f32) {
    for id in ids {
        if let Some(node) = nodes.get_mut(id) {
            node.x += dx;
            node.y += dy;
        }
    }
}

/// Nodes sitting inside box `s` although they belong directly to the box's
/// parent level (top-level nodes for top-level boxes). Members of sibling
/// boxes are left to [`resolve_overlaps`].
fn intruders(subgraphs: &[SubgraphLayout], nodes: &BTreeMap<String, NodeLayout>, s: usize) -> Vec<String> {
    let rect = subgraphs[s].rect();
    let level = subgraphs[s].parent.map(|p| subgraphs[p].id.as_str());
    let members: HashSet<&str> = subgraphs[s].nodes.iter().map(String::as_str).collect();
    nodes
        .values()
        .filter(|node| node.parent.as_deref() == level)
        .filter(|node| !members.contains(node.id.as_str()))
        .filter(|node| node.rect().intersects(&rect))
        .map(|node| node.id.clone())
        .collect()
}

/// Places `node` just past `rect` along the axis with the larger
/// center-to-center offset.
fn push_outside(node: &mut NodeLayout, rect: &Rect, gap: f32) {
    let (nc, sc) = (node.center(), rect.center());
    let (dx, dy) = (nc.0 - sc.0, nc.1 - sc.1);
    if dx.abs() >= dy.abs() {
        node.x = if dx >= 0.0 {
            rect.right() + gap
        } else {
            rect.x - gap - node.width
        };
    } else {
        node.y = if dy >= 0.0 {
            rect.bottom() + gap
        } else {
            rect.y - gap - node.height
        };
    }
}

/// Moves plain nodes out of subgraph boxes they do not belong to.
pub fn repel_foreign_nodes(
    subgraphs: &mut [SubgraphLayout],
    nodes: &mut BTreeMap<String, NodeLayout>,
    padding: BoxPadding,
) -> usize {
    let mut moves = 0;
    for _ in 0..MAX_REPEL_ROUNDS {
        let mut moved = false;
        for s in 0..subgraphs.len() {
            if !has_box(&subgraphs[s]) {
                continue;
            }
            let rect = subgraphs[s].rect();
            let evicted = intruders(subgraphs, nodes, s);
            for id in &evicted {
                if let Some(node) = nodes.get_mut(id) {
                    push_outside(node, &rect, padding.gap);
                    moves += 1;
                }
            }
            if !evicted.is_empty() {
                moved = true;
                compute_bounds(subgraphs, nodes, padding);
            }
        }
        if !moved {
            break;
        }
    }
    moves
}

/// Last resort when repelling keeps bouncing a node between boxes: push it
/// past the union of every box on its level.
fn evict_past_siblings(
    subgraphs: &mut [SubgraphLayout],
    nodes: &mut BTreeMap<String, NodeLayout>,
    padding: BoxPadding,
) -> usize {
    let mut moves = 0;
    for s in 0..subgraphs.len() {
        if !has_box(&subgraphs[s]) {
            continue;
        }
        let parent = subgraphs[s].parent;
        let Some(level) = subgraphs
            .iter()
            .filter(|sub| sub.parent == parent && has_box(sub))
            .map(SubgraphLayout::rect)
            .reduce(|a, b| a.union(&b))
        else {
            continue;
        };
        let evicted = intruders(subgraphs, nodes, s);
        for id in &evicted {
            if let Some(node) = nodes.get_mut(id) {
                push_outside(node, &level, padding.gap);
                moves += 1;
            }
        }
        if !evicted.is_empty() {
            compute_bounds(subgraphs, nodes, padding);
        }
    }
    moves
}

/// Full post-processing: alternate sibling separation and eviction until a
/// round evicts nothing, so the last change made is always checked against
/// plain nodes. Returns the overlap passes used.
pub fn settle(
    subgraphs: &mut [SubgraphLayout],
    nodes: &mut BTreeMap<String, NodeLayout>,
    direction: Direction,
    padding: BoxPadding,
) -> usize {
    let mut iterations = 0;
    for _ in 0..MAX_OVERLAP_ITERATIONS {
        iterations += resolve_overlaps(subgraphs, nodes, direction, padding);
        if repel_foreign_nodes(subgraphs, nodes, padding) == 0 {
            compute_bounds(subgraphs, nodes, padding);
            return iterations;
        }
    }
    let evicted = evict_past_siblings(subgraphs, nodes, padding);
    debug!(evicted, "subgraph settling hit the round cap");
    compute_bounds(subgraphs, nodes, padding);
    iterations
}
