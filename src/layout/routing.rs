use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::config::LayoutConfig;
use crate::geometry::{self, ArcLengthTable, PathSegment, Point};
use crate::ir::{Direction, Edge, NodeShape};

use super::types::{EdgeLayout, NodeLayout, Rect, SubgraphLayout};

// ── Port stub sizing ────────────────────────────────────────────────
/// Ratio of node_spacing used as base port stub length.
const PORT_STUB_RATIO: f32 = 0.35;
/// Ratio of smallest node dimension used to cap stub length.
const PORT_STUB_SIZE_CAP_RATIO: f32 = 0.35;
const PORT_STUB_MIN: f32 = 6.0;
const PORT_STUB_MAX: f32 = 22.0;

// ── Obstacles ───────────────────────────────────────────────────────
/// Ratio of node_spacing used for obstacle padding around nodes/subgraphs.
const OBSTACLE_PAD_RATIO: f32 = 0.35;
const OBSTACLE_PAD_MIN: f32 = 6.0;
/// Upper bound on detours inserted into a single route.
const MAX_DETOURS_PER_EDGE: usize = 32;

// ── Self loops ──────────────────────────────────────────────────────
const ROUTING_PAD_RATIO: f32 = 0.6;
const ROUTING_PAD_MIN_SPACING: f32 = 20.0;

// ── Labels ──────────────────────────────────────────────────────────
const LABEL_PAD: f32 = 4.0;
const LABEL_CANDIDATE_RINGS: usize = 3;

const ALIGN_EPS: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Port {
    North,
    East,
    South,
    West,
}

impl Port {
    pub fn normal(self) -> Point {
        match self {
            Port::North => (0.0, -1.0),
            Port::East => (1.0, 0.0),
            Port::South => (0.0, 1.0),
            Port::West => (-1.0, 0.0),
        }
    }

    /// True when edges leave this port moving along y.
    pub fn is_vertical(self) -> bool {
        matches!(self, Port::North | Port::South)
    }

    pub fn opposite(self) -> Port {
        match self {
            Port::North => Port::South,
            Port::East => Port::West,
            Port::South => Port::North,
            Port::West => Port::East,
        }
    }

    pub fn exit_for(direction: Direction) -> Port {
        match direction {
            Direction::TopDown => Port::South,
            Direction::BottomTop => Port::North,
            Direction::LeftRight => Port::East,
            Direction::RightLeft => Port::West,
        }
    }

    pub fn entry_for(direction: Direction) -> Port {
        Port::exit_for(direction).opposite()
    }

    /// The port with axes swapped (x <-> y), used to reuse the vertical router.
    fn transposed(self) -> Port {
        match self {
            Port::North => Port::West,
            Port::West => Port::North,
            Port::South => Port::East,
            Port::East => Port::South,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgePorts {
    pub start: Port,
    pub end: Port,
    pub start_offset: f32,
    pub end_offset: f32,
    /// Stagger applied to the mid-channel bend of same-axis routes.
    pub channel: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Forward,
    Backward,
    Beside,
}

pub struct RoutingContext<'a> {
    pub nodes: &'a BTreeMap<String, NodeLayout>,
    pub subgraphs: &'a [SubgraphLayout],
    pub config: &'a LayoutConfig,
}

#[derive(Debug, Clone)]
struct Obstacle {
    id: String,
    rect: Rect,
    members: Option<HashSet<String>>,
}

fn main_axis(point: Point, direction: Direction) -> f32 {
    match direction {
        Direction::TopDown => point.1,
        Direction::BottomTop => -point.1,
        Direction::LeftRight => point.0,
        Direction::RightLeft => -point.0,
    }
}

fn main_half(node: &NodeLayout, direction: Direction) -> f32 {
    if direction.is_horizontal() {
        node.width / 2.0
    } else {
        node.height / 2.0
    }
}

fn relation(from: &NodeLayout, to: &NodeLayout, direction: Direction) -> Relation {
    let delta = main_axis(to.center(), direction) - main_axis(from.center(), direction);
    let reach = (main_half(from, direction) + main_half(to, direction)) * 0.5;
    if delta > reach {
        Relation::Forward
    } else if delta < -reach {
        Relation::Backward
    } else {
        Relation::Beside
    }
}

fn lateral_ports(from: &NodeLayout, to: &NodeLayout, direction: Direction) -> (Port, Port) {
    let (fc, tc) = (from.center(), to.center());
    if direction.is_horizontal() {
        if tc.1 >= fc.1 {
            (Port::South, Port::North)
        } else {
            (Port::North, Port::South)
        }
    } else if tc.0 >= fc.0 {
        (Port::East, Port::West)
    } else {
        (Port::West, Port::East)
    }
}

/// Picks a compass port at each end of every edge and spreads siblings that
/// share a port along that side. Self-loops and edges with unknown endpoints
/// get `None`.
pub fn assign_ports(
    edges: &[Edge],
    waypoints: &[Vec<Point>],
    directions: &[Direction],
    ctx: &RoutingContext,
) -> Vec<Option<EdgePorts>> {
    let mut ports: Vec<Option<EdgePorts>> = edges
        .iter()
        .enumerate()
        .map(|(idx, edge)| {
            if edge.is_self_loop() {
                return None;
            }
            let from = ctx.nodes.get(&edge.from)?;
            let to = ctx.nodes.get(&edge.to)?;
            let direction = directions[idx];
            let (start, end) = match relation(from, to, direction) {
                Relation::Forward => (Port::exit_for(direction), Port::entry_for(direction)),
                Relation::Backward if !waypoints[idx].is_empty() => {
                    (Port::entry_for(direction), Port::exit_for(direction))
                }
                Relation::Backward => (Port::exit_for(direction), Port::entry_for(direction)),
                Relation::Beside => lateral_ports(from, to, direction),
            };
            Some(EdgePorts {
                start,
                end,
                start_offset: 0.0,
                end_offset: 0.0,
                channel: 0.0,
            })
        })
        .collect();

    split_decision_branches(edges, directions, ctx, &mut ports);
    spread_offsets(edges, waypoints, ctx, &mut ports);
    ports
}

/// A diamond with exactly two outgoing edges sends them out of opposite
/// side vertices, perpendicular to the flow.
fn split_decision_branches(
    edges: &[Edge],
    directions: &[Direction],
    ctx: &RoutingContext,
    ports: &mut [Option<EdgePorts>],
) {
    let mut outgoing: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, edge) in edges.iter().enumerate() {
        if ports[idx].is_some() {
            outgoing.entry(edge.from.as_str()).or_default().push(idx);
        }
    }
    for (node_id, branch) in outgoing {
        let Some(node) = ctx.nodes.get(node_id) else {
            continue;
        };
        if node.shape != NodeShape::Diamond || branch.len() != 2 {
            continue;
        }
        let direction = directions[branch[0]];
        let (low, high) = if direction.is_horizontal() {
            (Port::North, Port::South)
        } else {
            (Port::West, Port::East)
        };
        let cross = |idx: usize| {
            ctx.nodes
                .get(&edges[idx].to)
                .map(|target| {
                    let c = target.center();
                    if direction.is_horizontal() { c.1 } else { c.0 }
                })
                .unwrap_or(0.0)
        };
        let (first, second) = if cross(branch[1]) < cross(branch[0]) {
            (branch[1], branch[0])
        } else {
            (branch[0], branch[1])
        };
        for (idx, port) in [(first, low), (second, high)] {
            if let Some(p) = ports[idx].as_mut() {
                p.start = port;
            }
        }
    }
}

fn spread_offsets(
    edges: &[Edge],
    waypoints: &[Vec<Point>],
    ctx: &RoutingContext,
    ports: &mut [Option<EdgePorts>],
) {
    // (node, port) -> [(edge, is_start, coordinate of the far end along the side)]
    let mut groups: HashMap<(&str, Port), Vec<(usize, bool, f32)>> = HashMap::new();
    for (idx, edge) in edges.iter().enumerate() {
        let Some(p) = ports[idx] else {
            continue;
        };
        let (Some(from), Some(to)) = (ctx.nodes.get(&edge.from), ctx.nodes.get(&edge.to)) else {
            continue;
        };
        let toward_end = waypoints[idx].first().copied().unwrap_or_else(|| to.center());
        let toward_start = waypoints[idx].last().copied().unwrap_or_else(|| from.center());
        let along = |port: Port, point: Point| if port.is_vertical() { point.0 } else { point.1 };
        groups
            .entry((edge.from.as_str(), p.start))
            .or_default()
            .push((idx, true, along(p.start, toward_end)));
        groups
            .entry((edge.to.as_str(), p.end))
            .or_default()
            .push((idx, false, along(p.end, toward_start)));
    }

    let config = ctx.config;
    for ((node_id, port), mut members) in groups {
        if members.len() < 2 {
            continue;
        }
        let Some(node) = ctx.nodes.get(node_id) else {
            continue;
        };
        members.sort_by(|a, b| a.2.total_cmp(&b.2).then(a.0.cmp(&b.0)));
        let side = if port.is_vertical() { node.width } else { node.height };
        let pad = (side * config.port_pad_ratio).clamp(config.port_pad_min, config.port_pad_max);
        let usable = (side - pad * 2.0).max(0.0);
        let n = members.len();
        let step = (usable / (n - 1) as f32).min(config.edge_spacing * 2.0);
        let starts = members.iter().filter(|m| m.1).count();
        let mut start_rank = 0usize;
        for (i, (idx, is_start, _)) in members.into_iter().enumerate() {
            let offset = (i as f32 - (n - 1) as f32 / 2.0) * step;
            let Some(p) = ports[idx].as_mut() else {
                continue;
            };
            if is_start {
                p.start_offset = offset;
                p.channel = (start_rank as f32 - (starts.saturating_sub(1)) as f32 / 2.0)
                    * config.edge_spacing;
                start_rank += 1;
            } else {
                p.end_offset = offset;
            }
        }
    }
}

/// Where an edge leaving `port` (shifted by `offset` along that side) meets
/// the node's outline.
pub fn anchor_point(node: &NodeLayout, port: Port, offset: f32) -> Point {
    let outline = node.outline();
    let (cx, cy) = geometry::centroid(&outline);
    let max_offset = if port.is_vertical() {
        node.width / 2.0 - 1.0
    } else {
        node.height / 2.0 - 1.0
    };
    let offset = if max_offset > 0.0 {
        offset.clamp(-max_offset, max_offset)
    } else {
        0.0
    };
    let origin = if port.is_vertical() {
        (cx + offset, cy)
    } else {
        (cx, cy + offset)
    };
    if let Some(point) = geometry::ray_intersection(&outline, origin, port.normal()) {
        return point;
    }
    match port {
        Port::North => (origin.0, node.y),
        Port::South => (origin.0, node.y + node.height),
        Port::West => (node.x, origin.1),
        Port::East => (node.x + node.width, origin.1),
    }
}

pub fn port_stub_length(config: &LayoutConfig, from: &NodeLayout, to: &NodeLayout) -> f32 {
    let base = config.node_spacing * PORT_STUB_RATIO;
    let size_cap =
        from.width.min(from.height).min(to.width.min(to.height)) * PORT_STUB_SIZE_CAP_RATIO;
    let max_len = if size_cap.is_finite() && size_cap > 0.0 {
        size_cap
    } else {
        PORT_STUB_MAX
    };
    base.min(max_len).clamp(PORT_STUB_MIN, PORT_STUB_MAX)
}

fn step(point: Point, port: Port, length: f32) -> Point {
    let n = port.normal();
    (point.0 + n.0 * length, point.1 + n.1 * length)
}

fn transpose(point: Point) -> Point {
    (point.1, point.0)
}

fn transpose_rect(rect: Rect) -> Rect {
    Rect::new(rect.y, rect.x, rect.height, rect.width)
}

#[derive(Debug, Clone, Copy)]
struct Leg {
    start: Point,
    start_port: Port,
    end: Point,
    end_port: Port,
    from: Rect,
    to: Rect,
}

/// Orthogonal route between two anchored ports.
fn manhattan(leg: Leg, stub: f32, channel: f32, pad: f32) -> Vec<Point> {
    match (leg.start_port.is_vertical(), leg.end_port.is_vertical()) {
        (true, true) => route_same_axis(leg, stub, channel, pad),
        (false, false) => {
            let swapped = Leg {
                start: transpose(leg.start),
                start_port: leg.start_port.transposed(),
                end: transpose(leg.end),
                end_port: leg.end_port.transposed(),
                from: transpose_rect(leg.from),
                to: transpose_rect(leg.to),
            };
            route_same_axis(swapped, stub, channel, pad)
                .into_iter()
                .map(transpose)
                .collect()
        }
        _ => route_cross_axis(leg, stub),
    }
}

/// Both ports face along y. Forward pairs get one mid-channel bend,
/// same-facing pairs a U-turn, and back-edges a detour around both boxes.
fn route_same_axis(leg: Leg, stub: f32, channel: f32, pad: f32) -> Vec<Point> {
    let Leg { start, end, .. } = leg;
    let s_sign = leg.start_port.normal().1;
    let e_sign = leg.end_port.normal().1;
    let travel = (end.1 - start.1) * s_sign;

    if s_sign != e_sign && travel >= stub * 2.0 {
        if (start.0 - end.0).abs() < ALIGN_EPS {
            return vec![start, (start.0, end.1)];
        }
        let lo = start.1.min(end.1) + stub * 0.5;
        let hi = start.1.max(end.1) - stub * 0.5;
        let mid = ((start.1 + end.1) / 2.0 + channel).clamp(lo.min(hi), hi.max(lo));
        return vec![start, (start.0, mid), (end.0, mid), end];
    }

    if s_sign == e_sign {
        let turn = if s_sign > 0.0 {
            start.1.max(end.1) + stub
        } else {
            start.1.min(end.1) - stub
        };
        return vec![start, (start.0, turn), (end.0, turn), end];
    }

    let s1 = step(start, leg.start_port, stub);
    let e1 = step(end, leg.end_port, stub);
    let left = leg.from.x.min(leg.to.x) - pad;
    let right = leg.from.right().max(leg.to.right()) + pad;
    let cost = |x: f32| (start.0 - x).abs() + (end.0 - x).abs();
    let side = if cost(right) <= cost(left) { right } else { left };
    vec![start, s1, (side, s1.1), (side, e1.1), e1, end]
}

/// One port faces along y, the other along x: an L when the corner lies
/// ahead of both ports, otherwise a five-point bend through both stubs.
fn route_cross_axis(leg: Leg, stub: f32) -> Vec<Point> {
    let Leg { start, end, .. } = leg;
    let corner = if leg.start_port.is_vertical() {
        (start.0, end.1)
    } else {
        (end.0, start.1)
    };
    let sn = leg.start_port.normal();
    let en = leg.end_port.normal();
    let leaves_forward = (corner.0 - start.0) * sn.0 + (corner.1 - start.1) * sn.1 > ALIGN_EPS;
    let enters_forward = (corner.0 - end.0) * en.0 + (corner.1 - end.1) * en.1 > ALIGN_EPS;
    if leaves_forward && enters_forward {
        return vec![start, corner, end];
    }
    let s1 = step(start, leg.start_port, stub);
    let e1 = step(end, leg.end_port, stub);
    let mid = if leg.start_port.is_vertical() {
        (e1.0, s1.1)
    } else {
        (s1.0, e1.1)
    };
    vec![start, s1, mid, e1, end]
}

/// Polyline through dummy waypoints with an elbow between each pair.
fn through_waypoints(start: Point, waypoints: &[Point], end: Point, vertical_flow: bool) -> Vec<Point> {
    let mut stops = Vec::with_capacity(waypoints.len() + 2);
    stops.push(start);
    stops.extend_from_slice(waypoints);
    stops.push(end);
    let mut out = vec![start];
    for pair in stops.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if (a.0 - b.0).abs() >= ALIGN_EPS && (a.1 - b.1).abs() >= ALIGN_EPS {
            if vertical_flow {
                let my = (a.1 + b.1) / 2.0;
                out.push((a.0, my));
                out.push((b.0, my));
            } else {
                let mx = (a.0 + b.0) / 2.0;
                out.push((mx, a.1));
                out.push((mx, b.1));
            }
        }
        out.push(b);
    }
    out
}

pub fn route_self_loop(node: &NodeLayout, direction: Direction, config: &LayoutConfig) -> Vec<Point> {
    let pad = config.node_spacing.max(ROUTING_PAD_MIN_SPACING) * ROUTING_PAD_RATIO;
    let (x, y, w, h) = (node.x, node.y, node.width, node.height);
    match direction {
        Direction::LeftRight | Direction::RightLeft => vec![
            (x + w, y + h / 2.0),
            (x + w + pad, y + h / 2.0),
            (x + w + pad, y - pad),
            (x + w / 2.0, y - pad),
            (x + w / 2.0, y),
        ],
        Direction::BottomTop => vec![
            (x + w / 2.0, y),
            (x + w / 2.0, y - pad),
            (x + w + pad, y - pad),
            (x + w + pad, y + h / 2.0),
            (x + w, y + h / 2.0),
        ],
        Direction::TopDown => vec![
            (x + w / 2.0, y + h),
            (x + w / 2.0, y + h + pad),
            (x + w + pad, y + h + pad),
            (x + w + pad, y + h / 2.0),
            (x + w, y + h / 2.0),
        ],
    }
}

fn obstacle_pad(config: &LayoutConfig) -> f32 {
    (config.node_spacing * OBSTACLE_PAD_RATIO).max(OBSTACLE_PAD_MIN)
}

fn build_obstacles(ctx: &RoutingContext) -> Vec<Obstacle> {
    let pad = obstacle_pad(ctx.config) * 0.5;
    let mut obstacles: Vec<Obstacle> = ctx
        .nodes
        .values()
        .map(|node| Obstacle {
            id: node.id.clone(),
            rect: node.rect().inflate(pad),
            members: None,
        })
        .collect();
    obstacles.extend(ctx.subgraphs.iter().filter(|s| s.width > 0.0).map(|sub| Obstacle {
        id: sub.id.clone(),
        rect: sub.rect(),
        members: Some(sub.nodes.iter().cloned().collect()),
    }));
    obstacles
}

fn blocks(obstacle: &Obstacle, edge: &Edge) -> bool {
    match &obstacle.members {
        None => obstacle.id != edge.from && obstacle.id != edge.to,
        Some(members) => !members.contains(&edge.from) && !members.contains(&edge.to),
    }
}

/// Replaces an axis-aligned segment that runs clean through `rect` by a
/// rectangular detour around the nearer side. `None` when the segment does
/// not pass through.
fn detour_segment(a: Point, b: Point, rect: &Rect) -> Option<[Point; 4]> {
    if rect.contains_point(a) || rect.contains_point(b) {
        return None;
    }
    if (a.1 - b.1).abs() < ALIGN_EPS {
        let y = a.1;
        let (min_x, max_x) = (a.0.min(b.0), a.0.max(b.0));
        if y <= rect.y || y >= rect.bottom() || min_x >= rect.x || max_x <= rect.right() {
            return None;
        }
        let around = if y - rect.y <= rect.bottom() - y {
            rect.y
        } else {
            rect.bottom()
        };
        let (enter, exit) = if a.0 < b.0 {
            (rect.x, rect.right())
        } else {
            (rect.right(), rect.x)
        };
        return Some([(enter, y), (enter, around), (exit, around), (exit, y)]);
    }
    if (a.0 - b.0).abs() < ALIGN_EPS {
        let x = a.0;
        let (min_y, max_y) = (a.1.min(b.1), a.1.max(b.1));
        if x <= rect.x || x >= rect.right() || min_y >= rect.y || max_y <= rect.bottom() {
            return None;
        }
        let around = if x - rect.x <= rect.right() - x {
            rect.x
        } else {
            rect.right()
        };
        let (enter, exit) = if a.1 < b.1 {
            (rect.y, rect.bottom())
        } else {
            (rect.bottom(), rect.y)
        };
        return Some([(x, enter), (around, enter), (around, exit), (x, exit)]);
    }
    None
}

fn avoid_obstacles(points: Vec<Point>, edge: &Edge, obstacles: &[Obstacle]) -> Vec<Point> {
    let mut points = points;
    for _ in 0..MAX_DETOURS_PER_EDGE {
        let hit = points.windows(2).enumerate().find_map(|(i, pair)| {
            obstacles
                .iter()
                .filter(|o| blocks(o, edge))
                .find_map(|o| detour_segment(pair[0], pair[1], &o.rect))
                .map(|detour| (i, detour))
        });
        let Some((i, detour)) = hit else {
            break;
        };
        points.splice(i + 1..i + 1, detour);
    }
    points
}

/// Drops repeated and collinear interior points.
pub fn simplify(points: &[Point]) -> Vec<Point> {
    simplify_keeping(points, &[])
}

/// Like [`simplify`], but never drops a point listed in `pinned`.
pub fn simplify_keeping(points: &[Point], pinned: &[Point]) -> Vec<Point> {
    let is_pinned = |p: Point| pinned.iter().any(|&q| geometry::distance(p, q) < 1e-3);
    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    for &p in points {
        if let Some(&last) = out.last()
            && geometry::distance(last, p) < 1e-3
        {
            continue;
        }
        if out.len() >= 2 {
            let a = out[out.len() - 2];
            let b = out[out.len() - 1];
            let cross = (b.0 - a.0) * (p.1 - b.1) - (b.1 - a.1) * (p.0 - b.0);
            let dot = (b.0 - a.0) * (p.0 - b.0) + (b.1 - a.1) * (p.1 - b.1);
            if cross.abs() < 1e-3 && dot >= 0.0 && !is_pinned(b) {
                out.pop();
            }
        }
        out.push(p);
    }
    out
}

/// Shortens the ends carrying a marker so the arrowhead is not swallowed by
/// the node outline.
pub fn pull_back(points: &mut [Point], arrow_start: bool, arrow_end: bool, offset: f32) {
    let n = points.len();
    if n < 2 || offset <= 0.0 {
        return;
    }
    let mut shorten = |tip: usize, toward: usize| {
        let (t, o) = (points[tip], points[toward]);
        let len = geometry::distance(t, o);
        if len > offset * 2.0 {
            points[tip] = (
                t.0 + (o.0 - t.0) / len * offset,
                t.1 + (o.1 - t.1) / len * offset,
            );
        }
    };
    if arrow_end {
        shorten(n - 1, n - 2);
    }
    if arrow_start {
        shorten(0, 1);
    }
}

/// Routes every edge. `waypoints[i]` holds the dummy positions of edge `i`
/// (empty for short edges); `directions[i]` is the flow the edge lives in.
pub fn route_edges(
    edges: &[Edge],
    waypoints: &[Vec<Point>],
    directions: &[Direction],
    ctx: &RoutingContext,
) -> Vec<Vec<Point>> {
    let ports = assign_ports(edges, waypoints, directions, ctx);
    let obstacles = build_obstacles(ctx);
    let pad = obstacle_pad(ctx.config);

    edges
        .iter()
        .enumerate()
        .map(|(idx, edge)| {
            let (Some(from), Some(to)) = (ctx.nodes.get(&edge.from), ctx.nodes.get(&edge.to)) else {
                return Vec::new();
            };
            let mut points = match ports[idx] {
                None => route_self_loop(from, directions[idx], ctx.config),
                Some(p) => {
                    let start = anchor_point(from, p.start, p.start_offset);
                    let end = anchor_point(to, p.end, p.end_offset);
                    let stub = port_stub_length(ctx.config, from, to);
                    let raw = if waypoints[idx].is_empty() {
                        let leg = Leg {
                            start,
                            start_port: p.start,
                            end,
                            end_port: p.end,
                            from: from.rect(),
                            to: to.rect(),
                        };
                        manhattan(leg, stub, p.channel, pad)
                    } else {
                        let vertical = !directions[idx].is_horizontal();
                        through_waypoints(start, &waypoints[idx], end, vertical)
                    };
                    let pinned = &waypoints[idx];
                    let raw = simplify_keeping(&raw, pinned);
                    simplify_keeping(&avoid_obstacles(raw, edge, &obstacles), pinned)
                }
            };
            pull_back(&mut points, edge.arrow_start, edge.arrow_end, ctx.config.arrow_offset);
            points
        })
        .collect()
}

/// Anchors each label at the arc-length midpoint of its route, nudging it
/// along the route normal when it would cover a node or an earlier label.
pub fn place_edge_labels(edges: &mut [EdgeLayout], nodes: &BTreeMap<String, NodeLayout>) {
    let node_rects: Vec<Rect> = nodes.values().map(NodeLayout::rect).collect();
    let mut placed: Vec<Rect> = Vec::new();
    for edge in edges.iter_mut() {
        let Some(label) = edge.label.as_ref() else {
            continue;
        };
        if edge.points.len() < 2 {
            continue;
        }
        let segments: Vec<PathSegment> = edge.segments();
        let table = ArcLengthTable::new(segments);
        let Some(mid) = table.point_at_fraction(0.5) else {
            continue;
        };
        let half = table.total_length() / 2.0;
        let ahead = table.point_at_length((half + 1.0).min(table.total_length())).unwrap_or(mid);
        let behind = table.point_at_length((half - 1.0).max(0.0)).unwrap_or(mid);
        let tangent = (ahead.0 - behind.0, ahead.1 - behind.1);
        let len = (tangent.0 * tangent.0 + tangent.1 * tangent.1).sqrt();
        let normal = if len > 1e-6 {
            (-tangent.1 / len, tangent.0 / len)
        } else {
            (0.0, -1.0)
        };

        let (w, h) = (label.width + LABEL_PAD * 2.0, label.height + LABEL_PAD * 2.0);
        let rect_at = |c: Point| Rect::new(c.0 - w / 2.0, c.1 - h / 2.0, w, h);
        let free = |r: &Rect| {
            node_rects.iter().all(|n| !n.intersects(r)) && placed.iter().all(|p| !p.intersects(r))
        };
        let reach = if normal.0.abs() > normal.1.abs() { w } else { h };
        let mut chosen = mid;
        let candidates = std::iter::once(mid).chain((1..=LABEL_CANDIDATE_RINGS).flat_map(|ring| {
            let d = reach * 0.6 * ring as f32;
            [
                (mid.0 + normal.0 * d, mid.1 + normal.1 * d),
                (mid.0 - normal.0 * d, mid.1 - normal.1 * d),
            ]
        }));
        for candidate in candidates {
            if free(&rect_at(candidate)) {
                chosen = candidate;
                break;
            }
        }
        placed.push(rect_at(chosen));
        edge.label_anchor = Some(chosen);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{EdgeStyle, EdgeType, NodeStyle};
    use crate::layout::types::TextBlock;

    fn node(id: &str, shape: NodeShape, x: f32, y: f32, w: f32, h: f32) -> NodeLayout {
        NodeLayout {
            id: id.into(),
            x,
            y,
            width: w,
            height: h,
            label: TextBlock {
                lines: vec![id.into()],
                width: 10.0,
                height: 10.0,
            },
            shape,
            style: NodeStyle::default(),
            rank: 0,
            order: 0,
            parent: None,
        }
    }

    fn edge(from: &str, to: &str) -> Edge {
        Edge::new(from, to, EdgeType::Arrow, EdgeStyle::Solid, None)
    }

    fn nodes(list: Vec<NodeLayout>) -> BTreeMap<String, NodeLayout> {
        list.into_iter().map(|n| (n.id.clone(), n)).collect()
    }

    fn is_orthogonal(points: &[Point]) -> bool {
        points
            .windows(2)
            .all(|w| (w[0].0 - w[1].0).abs() < 1e-3 || (w[0].1 - w[1].1).abs() < 1e-3)
    }

    #[test]
    fn diamond_branches_leave_opposite_sides() {
        let config = LayoutConfig::default();
        let map = nodes(vec![
            node("A", NodeShape::Diamond, 0.0, 40.0, 60.0, 60.0),
            node("B", NodeShape::Rectangle, 150.0, 0.0, 60.0, 30.0),
            node("C", NodeShape::Rectangle, 150.0, 110.0, 60.0, 30.0),
        ]);
        let ctx = RoutingContext {
            nodes: &map,
            subgraphs: &[],
            config: &config,
        };
        let edges = vec![edge("A", "B"), edge("A", "C")];
        let ports = assign_ports(
            &edges,
            &[Vec::new(), Vec::new()],
            &[Direction::LeftRight; 2],
            &ctx,
        );
        assert_eq!(ports[0].map(|p| p.start), Some(Port::North));
        assert_eq!(ports[1].map(|p| p.start), Some(Port::South));
    }

    #[test]
    fn siblings_fan_out_along_the_side() {
        let config = LayoutConfig::default();
        let map = nodes(vec![
            node("A", NodeShape::Rectangle, 100.0, 0.0, 120.0, 40.0),
            node("B", NodeShape::Rectangle, 0.0, 120.0, 60.0, 30.0),
            node("C", NodeShape::Rectangle, 260.0, 120.0, 60.0, 30.0),
        ]);
        let ctx = RoutingContext {
            nodes: &map,
            subgraphs: &[],
            config: &config,
        };
        let edges = vec![edge("A", "C"), edge("A", "B")];
        let ports = assign_ports(&edges, &[Vec::new(), Vec::new()], &[Direction::TopDown; 2], &ctx);
        let (to_c, to_b) = (ports[0].unwrap(), ports[1].unwrap());
        assert_eq!(to_c.start, Port::South);
        assert!(to_b.start_offset < 0.0 && to_c.start_offset > 0.0);
        assert!((to_b.start_offset + to_c.start_offset).abs() < 1e-3);
    }

    #[test]
    fn anchors_land_on_the_outline() {
        let diamond = node("D", NodeShape::Diamond, 0.0, 0.0, 100.0, 100.0);
        let p = anchor_point(&diamond, Port::East, 0.0);
        assert!((p.0 - 100.0).abs() < 1e-3 && (p.1 - 50.0).abs() < 1e-3);
        let shifted = anchor_point(&diamond, Port::South, 20.0);
        assert!((shifted.0 - 70.0).abs() < 1e-3);
        assert!((shifted.1 - 80.0).abs() < 1e-3);
        let circle = node("C", NodeShape::Circle, 0.0, 0.0, 40.0, 40.0);
        let top = anchor_point(&circle, Port::North, 0.0);
        assert!((top.1 - 0.0).abs() < 0.05);
    }

    #[test]
    fn anchors_start_from_the_centroid() {
        let flag = node("F", NodeShape::Asymmetric, 0.0, 0.0, 100.0, 40.0);
        let (cx, _) = geometry::centroid(&flag.outline());
        assert!(cx < 49.0, "centroid {cx} should sit left of the box center");
        let top = anchor_point(&flag, Port::North, 0.0);
        assert!((top.0 - cx).abs() < 1e-3, "{top:?}");
        assert!(top.1.abs() < 1e-3);
        let bottom = anchor_point(&flag, Port::South, 0.0);
        assert!((bottom.0 - cx).abs() < 1e-3 && (bottom.1 - 40.0).abs() < 1e-3);
    }

    #[test]
    fn forward_route_bends_once_in_the_channel() {
        let leg = Leg {
            start: (50.0, 40.0),
            start_port: Port::South,
            end: (150.0, 140.0),
            end_port: Port::North,
            from: Rect::new(0.0, 0.0, 100.0, 40.0),
            to: Rect::new(100.0, 140.0, 100.0, 40.0),
        };
        let route = manhattan(leg, 10.0, 0.0, 8.0);
        assert_eq!(route, vec![(50.0, 40.0), (50.0, 90.0), (150.0, 90.0), (150.0, 140.0)]);
    }

    #[test]
    fn waypoint_routes_pass_through_the_dummy() {
        let config = LayoutConfig::default();
        let map = nodes(vec![
            node("A", NodeShape::Rectangle, 40.0, 0.0, 60.0, 30.0),
            node("B", NodeShape::Rectangle, -120.0, 80.0, 60.0, 30.0),
            node("C", NodeShape::Rectangle, 40.0, 160.0, 60.0, 30.0),
        ]);
        let ctx = RoutingContext {
            nodes: &map,
            subgraphs: &[],
            config: &config,
        };
        let dummy = (120.0, 95.0);
        let routes = route_edges(&[edge("A", "C")], &[vec![dummy]], &[Direction::TopDown], &ctx);
        let route = &routes[0];
        assert!(route.len() > 2);
        assert!(is_orthogonal(route));
        let on_route = route.windows(2).any(|w| {
            let (a, b) = (w[0], w[1]);
            let within = |v: f32, lo: f32, hi: f32| v >= lo.min(hi) - 1e-3 && v <= lo.max(hi) + 1e-3;
            within(dummy.0, a.0, b.0)
                && within(dummy.1, a.1, b.1)
                && ((a.0 - b.0).abs() < 1e-3 || (a.1 - b.1).abs() < 1e-3)
        });
        assert!(on_route, "{route:?}");
    }

    #[test]
    fn collinear_waypoints_stay_in_the_route() {
        let config = LayoutConfig::default();
        let map = nodes(vec![
            node("A", NodeShape::Rectangle, 40.0, 0.0, 60.0, 30.0),
            node("C", NodeShape::Rectangle, 40.0, 160.0, 60.0, 30.0),
        ]);
        let ctx = RoutingContext {
            nodes: &map,
            subgraphs: &[],
            config: &config,
        };
        let dummy = (70.0, 95.0);
        let routes = route_edges(&[edge("A", "C")], &[vec![dummy]], &[Direction::TopDown], &ctx);
        assert!(
            routes[0].iter().any(|&p| geometry::distance(p, dummy) < 1e-3),
            "{:?}",
            routes[0]
        );
    }

    #[test]
    fn back_edge_detours_around_both_boxes() {
        let leg = Leg {
            start: (50.0, 140.0),
            start_port: Port::South,
            end: (50.0, 0.0),
            end_port: Port::North,
            from: Rect::new(0.0, 100.0, 100.0, 40.0),
            to: Rect::new(0.0, 0.0, 100.0, 40.0),
        };
        let route = manhattan(leg, 10.0, 0.0, 8.0);
        assert_eq!(route.len(), 6);
        assert!(is_orthogonal(&route));
        let side = route[2].0;
        assert!(side >= 108.0 || side <= -8.0);
        assert_eq!(route.last(), Some(&(50.0, 0.0)));
    }

    #[test]
    fn cross_axis_route_is_an_l_when_possible() {
        let leg = Leg {
            start: (30.0, 0.0),
            start_port: Port::North,
            end: (100.0, -60.0),
            end_port: Port::West,
            from: Rect::new(0.0, 0.0, 60.0, 60.0),
            to: Rect::new(100.0, -75.0, 60.0, 30.0),
        };
        assert_eq!(manhattan(leg, 10.0, 0.0, 8.0), vec![(30.0, 0.0), (30.0, -60.0), (100.0, -60.0)]);
        let blocked = Leg {
            end: (10.0, -60.0),
            ..leg
        };
        let route = manhattan(blocked, 10.0, 0.0, 8.0);
        assert_eq!(route.len(), 5);
        assert!(is_orthogonal(&route));
    }

    #[test]
    fn horizontal_segments_detour_around_obstacles() {
        let rect = Rect::new(40.0, -10.0, 20.0, 30.0);
        let detour = detour_segment((0.0, 0.0), (100.0, 0.0), &rect).unwrap();
        assert_eq!(detour, [(40.0, 0.0), (40.0, -10.0), (60.0, -10.0), (60.0, 0.0)]);
        assert!(detour_segment((0.0, 50.0), (100.0, 50.0), &rect).is_none());
    }

    #[test]
    fn routes_avoid_unrelated_nodes() {
        let config = LayoutConfig::default();
        let map = nodes(vec![
            node("A", NodeShape::Rectangle, 0.0, 0.0, 60.0, 30.0),
            node("X", NodeShape::Rectangle, 0.0, 80.0, 60.0, 30.0),
            node("B", NodeShape::Rectangle, 0.0, 160.0, 60.0, 30.0),
        ]);
        let ctx = RoutingContext {
            nodes: &map,
            subgraphs: &[],
            config: &config,
        };
        let edges = vec![edge("A", "B")];
        let routes = route_edges(&edges, &[Vec::new()], &[Direction::TopDown], &ctx);
        let route = &routes[0];
        assert!(route.len() > 2);
        let x_rect = map["X"].rect();
        for pair in route.windows(2) {
            let mid = ((pair[0].0 + pair[1].0) / 2.0, (pair[0].1 + pair[1].1) / 2.0);
            assert!(!x_rect.contains_point(mid));
        }
    }

    #[test]
    fn pull_back_shortens_marked_ends() {
        let mut points = vec![(0.0, 0.0), (0.0, 100.0)];
        pull_back(&mut points, true, true, 4.0);
        assert_eq!(points, vec![(0.0, 4.0), (0.0, 96.0)]);
    }

    #[test]
    fn simplify_merges_collinear_runs() {
        let points = [(0.0, 0.0), (0.0, 5.0), (0.0, 10.0), (0.0, 10.0), (5.0, 10.0)];
        assert_eq!(simplify(&points), vec![(0.0, 0.0), (0.0, 10.0), (5.0, 10.0)]);
        assert_eq!(
            simplify_keeping(&points, &[(0.0, 5.0)]),
            vec![(0.0, 0.0), (0.0, 5.0), (0.0, 10.0), (5.0, 10.0)]
        );
    }

    #[test]
    fn self_loop_starts_and_ends_on_the_node() {
        let n = node("A", NodeShape::Rectangle, 0.0, 0.0, 60.0, 30.0);
        let route = route_self_loop(&n, Direction::TopDown, &LayoutConfig::default());
        assert_eq!(route.first(), Some(&(30.0, 30.0)));
        assert_eq!(route.last(), Some(&(60.0, 15.0)));
        assert!(is_orthogonal(&route));
    }
}
