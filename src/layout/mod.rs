pub mod acyclic;
pub mod engine;
pub mod graph;
pub mod order;
pub mod position;
pub mod rank;
pub mod routing;
pub mod subgraph;
mod types;

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, warn};

use crate::config::LayoutConfig;
use crate::error::LayoutError;
use crate::geometry::Point;
use crate::ir::{Direction, Edge, Graph, NodeShape, SubgraphRef};
use crate::text_metrics::{self, TextMeasurer};
use crate::theme::Theme;

pub use engine::{compute_layout, engine_by_name, engine_names, LayoutEngine};
pub use types::*;

use graph::LayoutGraph;
use position::Spacing;
use routing::RoutingContext;
use subgraph::BoxPadding;

/// Minimum box given to a subgraph that has neither members nor children.
const EMPTY_SUBGRAPH_MIN_WIDTH: f32 = 80.0;
const WAYPOINT_SHIFT_EPS: f32 = 0.5;

/// One sized node handed to the layered core.
struct CoreNode {
    id: String,
    width: f32,
    height: f32,
    cluster: Vec<usize>,
}

/// Result of one run of the layered phases.
struct Placement {
    /// Center, rank and order per node id.
    nodes: HashMap<String, (Point, usize, usize)>,
    /// Dummy waypoints per caller edge index.
    waypoints: HashMap<usize, Vec<Point>>,
    stats: LayoutStats,
}

/// Runs cycle removal, ranking, dummy insertion, ordering and coordinate
/// assignment over `nodes`/`edges` and reads the result back by id.
fn place(
    nodes: &[CoreNode],
    edges: &[(usize, &str, &str)],
    direction: Direction,
    config: &LayoutConfig,
) -> Placement {
    let mut lg = LayoutGraph::new();
    for node in nodes {
        lg.add_node(&node.id, node.width, node.height, node.cluster.clone());
    }
    for &(idx, from, to) in edges {
        if from != to {
            lg.add_edge_by_id(from, to, idx);
        }
    }

    let reversed = acyclic::make_acyclic(&mut lg);
    rank::assign_ranks(
        &mut lg,
        config.rank_strategy,
        config.network_simplex_max_iterations,
    );
    let dummies = rank::insert_dummy_nodes(&mut lg);
    let order_stats = order::order_within_ranks(&mut lg, config.order_passes);
    position::assign_coordinates(
        &mut lg,
        Spacing {
            node_sep: config.node_spacing,
            rank_sep: config.rank_spacing,
            edge_sep: config.edge_spacing,
            sweeps: config.coordinate_sweeps,
        },
        direction,
    );

    let waypoints = lg
        .chains
        .iter()
        .map(|chain| (lg.edges[chain.edge].origin, lg.waypoints(chain.edge)))
        .collect();
    acyclic::undo_acyclic(&mut lg);

    let placed = lg
        .nodes
        .iter()
        .filter(|node| !node.is_dummy())
        .map(|node| {
            (
                node.id.clone(),
                ((node.x, node.y), node.rank.max(0) as usize, node.order),
            )
        })
        .collect();

    Placement {
        nodes: placed,
        waypoints,
        stats: LayoutStats {
            ranks: lg.ranks.len(),
            dummy_nodes: dummies,
            reversed_edges: reversed,
            initial_crossings: order_stats.initial_crossings,
            crossings: order_stats.crossings,
            order_passes: order_stats.passes,
            overlap_iterations: 0,
        },
    }
}

pub(crate) fn measure_label(
    text: &str,
    font_size: f32,
    config: &LayoutConfig,
    measurer: &dyn TextMeasurer,
) -> TextBlock {
    let max_width =
        config.max_label_width_chars as f32 * text_metrics::average_char_width(font_size);
    let lines: Vec<String> = text_metrics::split_lines(text)
        .iter()
        .flat_map(|line| text_metrics::wrap_line(line, max_width, font_size, measurer))
        .collect();
    let lines = if lines.is_empty() { vec![String::new()] } else { lines };
    let width = lines
        .iter()
        .map(|line| measurer.line_width(line, font_size))
        .fold(0.0, f32::max);
    let height = lines.len() as f32 * font_size * config.label_line_height;
    TextBlock {
        lines,
        width,
        height,
    }
}

fn shape_padding_factors(shape: NodeShape) -> (f32, f32) {
    match shape {
        NodeShape::Stadium => (0.43, 0.5),
        NodeShape::Subroutine => (0.54, 0.5),
        NodeShape::Parallelogram => (0.894, 0.5),
        NodeShape::ParallelogramAlt => (0.904, 0.5),
        _ => (1.0, 1.0),
    }
}

fn shape_size(shape: NodeShape, label: &TextBlock, config: &LayoutConfig) -> (f32, f32) {
    let (pad_x_factor, pad_y_factor) = shape_padding_factors(shape);
    let mut width = label.width + config.node_padding_x * pad_x_factor * 2.0;
    let mut height = label.height + config.node_padding_y * pad_y_factor * 2.0;

    match shape {
        NodeShape::Diamond => {
            // Diamonds are squares sized off the larger dimension.
            let size = width.max(height) * 0.95;
            width = size;
            height = size;
        }
        NodeShape::Circle | NodeShape::DoubleCircle => {
            let size = if label.is_empty() {
                (config.node_padding_y * 1.4).max(14.0)
            } else {
                width.max(height)
            };
            width = size;
            height = size;
        }
        NodeShape::RoundRect => {
            width *= 1.1;
            height *= 1.05;
        }
        NodeShape::Cylinder => {
            width *= 1.1;
            height *= 1.1;
        }
        NodeShape::Hexagon => {
            width *= 1.2;
            height *= 1.1;
        }
        NodeShape::Trapezoid | NodeShape::TrapezoidAlt | NodeShape::Asymmetric => {
            width *= 1.2;
        }
        _ => {}
    }
    (width, height)
}

/// Cluster path (outermost first) of every node, as indices into the
/// flattened subgraph list. A node listed by several blocks takes the
/// deepest one.
fn cluster_paths(graph: &Graph) -> HashMap<String, Vec<usize>> {
    let flat = graph.flatten_subgraphs();
    let mut deepest: HashMap<&str, usize> = HashMap::new();
    for (idx, entry) in flat.iter().enumerate() {
        for member in &entry.subgraph.nodes {
            let slot = deepest.entry(member.as_str()).or_insert(idx);
            if flat[*slot].depth < entry.depth {
                *slot = idx;
            }
        }
    }
    deepest
        .into_iter()
        .map(|(id, innermost)| {
            let mut path = vec![innermost];
            let mut cursor = flat[innermost].parent;
            while let Some(parent) = cursor {
                path.push(parent);
                cursor = flat[parent].parent;
            }
            path.reverse();
            (id.to_string(), path)
        })
        .collect()
}

fn guard_size(graph: &Graph, config: &LayoutConfig) -> Result<(), LayoutError> {
    let (nodes, edges) = (graph.nodes.len(), graph.edges.len());
    if nodes > config.max_nodes || edges > config.max_edges {
        return Err(LayoutError::TooComplex {
            nodes,
            edges,
            max_nodes: config.max_nodes,
            max_edges: config.max_edges,
        });
    }
    Ok(())
}

/// The layered pipeline end to end: size guard, node sizing, the Sugiyama
/// phases, subgraph boxes, routing and label placement. Coordinates in the
/// result start at zero on both axes.
pub fn layered_layout(
    graph: &Graph,
    theme: &Theme,
    config: &LayoutConfig,
    measurer: &dyn TextMeasurer,
) -> Result<Layout, LayoutError> {
    guard_size(graph, config)?;
    let direction = config.direction_override.unwrap_or(graph.direction);

    let mut kept: Vec<(usize, Edge)> = Vec::with_capacity(graph.edges.len());
    for (idx, edge) in graph.edges.iter().enumerate() {
        if graph.nodes.contains_key(&edge.from) && graph.nodes.contains_key(&edge.to) {
            kept.push((idx, edge.clone()));
        } else {
            warn!(from = %edge.from, to = %edge.to, "dropping edge with unknown endpoint");
        }
    }

    let clusters = cluster_paths(graph);
    let mut nodes: BTreeMap<String, NodeLayout> = BTreeMap::new();
    let mut core_nodes: Vec<CoreNode> = Vec::with_capacity(graph.nodes.len());
    for id in graph.ordered_node_ids() {
        let Some(node) = graph.nodes.get(&id) else {
            continue;
        };
        let style = graph.resolved_node_style(&id);
        let font_size = style.font_size.unwrap_or(theme.font_size);
        let label = measure_label(node.display_label(), font_size, config, measurer);
        let (width, height) = shape_size(node.shape, &label, config);
        core_nodes.push(CoreNode {
            id: id.clone(),
            width,
            height,
            cluster: clusters.get(&id).cloned().unwrap_or_default(),
        });
        nodes.insert(
            id.clone(),
            NodeLayout {
                id,
                x: 0.0,
                y: 0.0,
                width,
                height,
                label,
                shape: node.shape,
                style,
                rank: 0,
                order: 0,
                parent: node.parent.clone(),
            },
        );
    }

    let core_edges: Vec<(usize, &str, &str)> = kept
        .iter()
        .enumerate()
        .map(|(pos, (_, edge))| (pos, edge.from.as_str(), edge.to.as_str()))
        .collect();
    let placement = place(&core_nodes, &core_edges, direction, config);
    apply_placement(&mut nodes, &placement);
    let mut waypoints: Vec<Vec<Point>> = (0..kept.len())
        .map(|pos| placement.waypoints.get(&pos).cloned().unwrap_or_default())
        .collect();
    let mut directions = vec![direction; kept.len()];
    let mut stats = placement.stats;

    let flat = graph.flatten_subgraphs();
    relayout_directed_subgraphs(
        &flat,
        &kept,
        &core_nodes,
        direction,
        config,
        &mut nodes,
        &mut waypoints,
        &mut directions,
    );

    let mut subgraphs: Vec<SubgraphLayout> = flat
        .iter()
        .map(|entry| {
            let sub = entry.subgraph;
            SubgraphLayout {
                id: sub.id.clone(),
                label: sub.label().to_string(),
                label_block: measure_label(sub.label(), theme.font_size, config, measurer),
                nodes: sub
                    .nodes
                    .iter()
                    .filter(|id| nodes.contains_key(*id))
                    .cloned()
                    .collect(),
                x: 0.0,
                y: 0.0,
                width: 0.0,
                height: 0.0,
                depth: entry.depth,
                parent: entry.parent,
                direction: sub.direction,
            }
        })
        .collect();

    let before: HashMap<String, Point> = nodes
        .iter()
        .map(|(id, node)| (id.clone(), node.center()))
        .collect();
    let padding = BoxPadding {
        padding: config.subgraph_padding,
        title: config.subgraph_title_padding,
        gap: config.node_spacing * 0.5,
    };
    stats.overlap_iterations = subgraph::settle(&mut subgraphs, &mut nodes, direction, padding);
    place_empty_subgraphs(&mut subgraphs, &nodes, config);
    follow_moved_endpoints(&kept, &before, &nodes, &mut waypoints);

    let edges_only: Vec<Edge> = kept.iter().map(|(_, edge)| edge.clone()).collect();
    let routes = routing::route_edges(
        &edges_only,
        &waypoints,
        &directions,
        &RoutingContext {
            nodes: &nodes,
            subgraphs: &subgraphs,
            config,
        },
    );

    let mut edges: Vec<EdgeLayout> = kept
        .iter()
        .zip(routes)
        .map(|((idx, edge), points)| EdgeLayout {
            from: edge.from.clone(),
            to: edge.to.clone(),
            label: edge
                .label
                .as_deref()
                .filter(|text| !text.trim().is_empty())
                .map(|text| measure_label(text, theme.font_size, config, measurer)),
            label_anchor: None,
            points,
            curved: config.curved_edges,
            edge_type: edge.edge_type,
            style: edge.style,
            arrow_start: edge.arrow_start,
            arrow_end: edge.arrow_end,
            start_marker: edge.edge_type.start_marker().filter(|_| edge.arrow_start),
            end_marker: edge.edge_type.end_marker().filter(|_| edge.arrow_end),
            override_style: graph.resolved_edge_style(*idx),
        })
        .collect();
    routing::place_edge_labels(&mut edges, &nodes);

    let mut layout = Layout {
        direction,
        nodes,
        edges,
        subgraphs,
        width: 0.0,
        height: 0.0,
        stats,
    };
    normalize(&mut layout);
    debug!(
        nodes = layout.nodes.len(),
        edges = layout.edges.len(),
        subgraphs = layout.subgraphs.len(),
        ranks = layout.stats.ranks,
        dummies = layout.stats.dummy_nodes,
        reversed = layout.stats.reversed_edges,
        crossings = layout.stats.crossings,
        width = layout.width,
        height = layout.height,
        "layout complete"
    );
    Ok(layout)
}

fn apply_placement(nodes: &mut BTreeMap<String, NodeLayout>, placement: &Placement) {
    for (id, &(center, rank, order)) in &placement.nodes {
        if let Some(node) = nodes.get_mut(id) {
            node.x = center.0 - node.width / 2.0;
            node.y = center.1 - node.height / 2.0;
            node.rank = rank;
            node.order = order;
        }
    }
}

/// Leaf subgraphs declaring their own `direction` get their members laid out
/// again in that direction, re-centered on where the members were.
#[allow(clippy::too_many_arguments)]
fn relayout_directed_subgraphs(
    flat: &[SubgraphRef<'_>],
    kept: &[(usize, Edge)],
    core_nodes: &[CoreNode],
    direction: Direction,
    config: &LayoutConfig,
    nodes: &mut BTreeMap<String, NodeLayout>,
    waypoints: &mut [Vec<Point>],
    directions: &mut [Direction],
) {
    for (idx, entry) in flat.iter().enumerate() {
        let sub = entry.subgraph;
        let Some(sub_direction) = sub.direction else {
            continue;
        };
        let is_leaf = !flat.iter().any(|other| other.parent == Some(idx));
        if sub_direction == direction || !is_leaf {
            continue;
        }
        let members: HashSet<&str> = sub
            .nodes
            .iter()
            .map(String::as_str)
            .filter(|id| nodes.contains_key(*id))
            .collect();
        if members.is_empty() {
            continue;
        }

        let sub_nodes: Vec<CoreNode> = core_nodes
            .iter()
            .filter(|node| members.contains(node.id.as_str()))
            .map(|node| CoreNode {
                id: node.id.clone(),
                width: node.width,
                height: node.height,
                cluster: Vec::new(),
            })
            .collect();
        let sub_edges: Vec<(usize, &str, &str)> = kept
            .iter()
            .enumerate()
            .filter(|(_, (_, edge))| {
                members.contains(edge.from.as_str()) && members.contains(edge.to.as_str())
            })
            .map(|(pos, (_, edge))| (pos, edge.from.as_str(), edge.to.as_str()))
            .collect();
        let placement = place(&sub_nodes, &sub_edges, sub_direction, config);

        let Some(old) = members_bounds(nodes, &members) else {
            continue;
        };
        let mut scratch = nodes.clone();
        apply_placement(&mut scratch, &placement);
        let Some(new) = members_bounds(&scratch, &members) else {
            continue;
        };
        let (oc, nc) = (old.center(), new.center());
        let (dx, dy) = (oc.0 - nc.0, oc.1 - nc.1);
        for id in &members {
            if let (Some(target), Some(source)) = (nodes.get_mut(*id), scratch.get(*id)) {
                target.x = source.x + dx;
                target.y = source.y + dy;
            }
        }
        for &(pos, _, _) in &sub_edges {
            waypoints[pos] = placement
                .waypoints
                .get(&pos)
                .map(|points| points.iter().map(|p| (p.0 + dx, p.1 + dy)).collect())
                .unwrap_or_default();
            directions[pos] = sub_direction;
        }
        debug!(
            subgraph = %sub.id,
            direction = sub_direction.as_token(),
            members = members.len(),
            "re-laid out subgraph in its own direction"
        );
    }
}

fn members_bounds(nodes: &BTreeMap<String, NodeLayout>, members: &HashSet<&str>) -> Option<Rect> {
    members
        .iter()
        .filter_map(|id| nodes.get(*id))
        .map(NodeLayout::rect)
        .reduce(|a, b| a.union(&b))
}

/// Top-level subgraphs with nothing inside get a title-sized box in a column
/// to the right of the drawing. Nested empty ones stay boxless.
fn place_empty_subgraphs(
    subgraphs: &mut [SubgraphLayout],
    nodes: &BTreeMap<String, NodeLayout>,
    config: &LayoutConfig,
) {
    let content = nodes
        .values()
        .map(NodeLayout::rect)
        .chain(
            subgraphs
                .iter()
                .filter(|sub| subgraph::has_box(sub))
                .map(SubgraphLayout::rect),
        )
        .reduce(|a, b| a.union(&b));
    let (x, mut y) = match content {
        Some(rect) => (rect.right() + config.node_spacing, rect.y),
        None => (0.0, 0.0),
    };
    for sub in subgraphs.iter_mut() {
        if sub.parent.is_some() || subgraph::has_box(sub) {
            continue;
        }
        sub.width = (sub.label_block.width + config.subgraph_padding * 2.0)
            .max(EMPTY_SUBGRAPH_MIN_WIDTH);
        sub.height = sub.label_block.height.max(config.subgraph_title_padding)
            + config.subgraph_padding * 2.0;
        sub.x = x;
        sub.y = y;
        y += sub.height + config.node_spacing * 0.5;
    }
}

/// Waypoints ride along when both endpoints moved by the same amount during
/// subgraph settling; otherwise they are dropped and the edge is routed
/// fresh between its endpoints.
fn follow_moved_endpoints(
    kept: &[(usize, Edge)],
    before: &HashMap<String, Point>,
    nodes: &BTreeMap<String, NodeLayout>,
    waypoints: &mut [Vec<Point>],
) {
    let shift = |id: &str| -> Option<Point> {
        let old = before.get(id)?;
        let new = nodes.get(id)?.center();
        Some((new.0 - old.0, new.1 - old.1))
    };
    for (pos, (_, edge)) in kept.iter().enumerate() {
        if waypoints[pos].is_empty() {
            continue;
        }
        let (Some(a), Some(b)) = (shift(&edge.from), shift(&edge.to)) else {
            continue;
        };
        if (a.0 - b.0).abs() > WAYPOINT_SHIFT_EPS || (a.1 - b.1).abs() > WAYPOINT_SHIFT_EPS {
            waypoints[pos].clear();
        } else if a.0.abs() > f32::EPSILON || a.1.abs() > f32::EPSILON {
            for point in &mut waypoints[pos] {
                point.0 += a.0;
                point.1 += a.1;
            }
        }
    }
}

/// Shifts everything so the drawing's top-left sits at the origin and records
/// the canvas size.
fn normalize(layout: &mut Layout) {
    let mut bounds: Option<Rect> = None;
    let mut grow = |rect: Rect| {
        bounds = Some(bounds.map_or(rect, |b| b.union(&rect)));
    };
    for node in layout.nodes.values() {
        grow(node.rect());
    }
    for sub in layout.subgraphs.iter().filter(|sub| subgraph::has_box(sub)) {
        grow(sub.rect());
    }
    for edge in &layout.edges {
        for &(x, y) in &edge.points {
            grow(Rect::new(x, y, 0.0, 0.0));
        }
        if let (Some(anchor), Some(label)) = (edge.label_anchor, edge.label.as_ref()) {
            grow(Rect::new(
                anchor.0 - label.width / 2.0,
                anchor.1 - label.height / 2.0,
                label.width,
                label.height,
            ));
        }
    }
    let Some(bounds) = bounds else {
        return;
    };
    let (dx, dy) = (-bounds.x, -bounds.y);
    for node in layout.nodes.values_mut() {
        node.x += dx;
        node.y += dy;
    }
    for sub in layout.subgraphs.iter_mut().filter(|sub| subgraph::has_box(sub)) {
        sub.x += dx;
        sub.y += dy;
    }
    for edge in &mut layout.edges {
        for point in &mut edge.points {
            point.0 += dx;
            point.1 += dy;
        }
        if let Some(anchor) = edge.label_anchor.as_mut() {
            anchor.0 += dx;
            anchor.1 += dy;
        }
    }
    layout.width = bounds.width;
    layout.height = bounds.height;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_mermaid;
    use crate::text_metrics::HeuristicMeasurer;

    fn layout_of(text: &str) -> Layout {
        let parsed = parse_mermaid(text).unwrap();
        layered_layout(
            &parsed.graph,
            &Theme::default(),
            &LayoutConfig::default(),
            &HeuristicMeasurer,
        )
        .unwrap()
    }

    #[test]
    fn diamonds_are_square() {
        let label = TextBlock {
            lines: vec!["Decide".into()],
            width: 60.0,
            height: 20.0,
        };
        let (w, h) = shape_size(NodeShape::Diamond, &label, &LayoutConfig::default());
        assert_eq!(w, h);
        assert!((w - 114.0).abs() < 1e-3);
    }

    #[test]
    fn long_labels_wrap() {
        let config = LayoutConfig::default();
        let block = measure_label(
            "a fairly long label that should wrap onto more than one line",
            16.0,
            &config,
            &HeuristicMeasurer,
        );
        assert!(block.lines.len() > 1);
        let limit = config.max_label_width_chars as f32 * text_metrics::average_char_width(16.0);
        assert!(block.width <= limit + 1.0);
    }

    #[test]
    fn chain_flows_downward_from_origin() {
        let layout = layout_of("flowchart TD\nA-->B\nB-->C");
        let (a, b, c) = (&layout.nodes["A"], &layout.nodes["B"], &layout.nodes["C"]);
        assert!(a.y < b.y && b.y < c.y);
        assert_eq!((a.rank, b.rank, c.rank), (0, 1, 2));
        let min_x = layout.nodes.values().map(|n| n.x).fold(f32::INFINITY, f32::min);
        let min_y = layout.nodes.values().map(|n| n.y).fold(f32::INFINITY, f32::min);
        assert!(min_x >= -1e-3 && min_y >= -1e-3);
        assert!(layout.width > 0.0 && layout.height > 0.0);
    }

    #[test]
    fn size_guard_rejects_large_graphs() {
        let parsed = parse_mermaid("flowchart LR\nA-->B\nB-->C").unwrap();
        let config = LayoutConfig {
            max_nodes: 2,
            ..LayoutConfig::default()
        };
        let err = layered_layout(&parsed.graph, &Theme::default(), &config, &HeuristicMeasurer)
            .unwrap_err();
        assert_eq!(
            err,
            LayoutError::TooComplex {
                nodes: 3,
                edges: 2,
                max_nodes: 2,
                max_edges: config.max_edges,
            }
        );
    }

    #[test]
    fn self_loops_are_routed_on_the_node() {
        let layout = layout_of("flowchart TD\nA-->A\nA-->B");
        let self_loop = &layout.edges[0];
        assert!(self_loop.points.len() >= 4);
        assert_eq!(layout.stats.reversed_edges, 0);
    }

    #[test]
    fn directed_subgraph_runs_its_own_flow() {
        let layout = layout_of(
            "flowchart TD\nsubgraph S\ndirection LR\nA-->B\nend\nB-->C",
        );
        let (a, b) = (&layout.nodes["A"], &layout.nodes["B"]);
        assert!(b.x > a.x + a.width - 1e-3);
        assert!((a.center().1 - b.center().1).abs() < 1e-3);
    }

    #[test]
    fn empty_subgraph_gets_a_box() {
        let layout = layout_of("flowchart TD\nA-->B\nsubgraph Empty\nend");
        let empty = layout.subgraphs.iter().find(|s| s.id == "Empty").unwrap();
        assert!(empty.width > 0.0 && empty.height > 0.0);
        for node in layout.nodes.values() {
            assert!(!node.rect().intersects(&empty.rect()));
        }
    }

    #[test]
    fn edge_labels_get_anchors() {
        let layout = layout_of("flowchart LR\nA-->|go|B");
        let edge = &layout.edges[0];
        assert!(edge.label.is_some());
        assert!(edge.label_anchor.is_some());
    }
}
