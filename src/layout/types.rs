use std::collections::BTreeMap;

use serde::Serialize;

use crate::geometry::{self, PathSegment, Point};
use crate::ir::{Direction, EdgeMarker, EdgeStyle, EdgeStyleOverride, EdgeType, NodeShape, NodeStyle};

#[derive(Debug, Clone, Serialize)]
pub struct TextBlock {
    pub lines: Vec<String>,
    pub width: f32,
    pub height: f32,
}

impl TextBlock {
    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|line| line.trim().is_empty())
    }
}

/// A positioned node. `x`/`y` is the top-left corner of the box.
#[derive(Debug, Clone, Serialize)]
pub struct NodeLayout {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub label: TextBlock,
    pub shape: NodeShape,
    pub style: NodeStyle,
    pub rank: usize,
    pub order: usize,
    pub parent: Option<String>,
}

impl NodeLayout {
    pub fn center(&self) -> Point {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub fn outline(&self) -> Vec<PathSegment> {
        geometry::shape_outline(self.shape, self.x, self.y, self.width, self.height)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeLayout {
    pub from: String,
    pub to: String,
    pub label: Option<TextBlock>,
    pub label_anchor: Option<Point>,
    pub points: Vec<Point>,
    pub curved: bool,
    pub edge_type: EdgeType,
    pub style: EdgeStyle,
    pub arrow_start: bool,
    pub arrow_end: bool,
    pub start_marker: Option<EdgeMarker>,
    pub end_marker: Option<EdgeMarker>,
    pub override_style: EdgeStyleOverride,
}

impl EdgeLayout {
    /// Drawable segments: straight runs for orthogonal routes, a Catmull-Rom
    /// spline through the waypoints in curved mode.
    pub fn segments(&self) -> Vec<PathSegment> {
        if self.curved && self.points.len() > 2 {
            return geometry::catmull_rom(&self.points);
        }
        self.points
            .windows(2)
            .map(|pair| PathSegment::Line(pair[0], pair[1]))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubgraphLayout {
    pub id: String,
    pub label: String,
    pub label_block: TextBlock,
    /// Member ids, descendants included.
    pub nodes: Vec<String>,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub depth: usize,
    pub parent: Option<usize>,
    pub direction: Option<Direction>,
}

impl SubgraphLayout {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LayoutStats {
    pub ranks: usize,
    pub dummy_nodes: usize,
    pub reversed_edges: usize,
    pub initial_crossings: usize,
    pub crossings: usize,
    pub order_passes: usize,
    pub overlap_iterations: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Layout {
    pub direction: Direction,
    pub nodes: BTreeMap<String, NodeLayout>,
    pub edges: Vec<EdgeLayout>,
    pub subgraphs: Vec<SubgraphLayout>,
    pub width: f32,
    pub height: f32,
    pub stats: LayoutStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_bounds(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn inflate(&self, pad: f32) -> Self {
        Self::new(
            self.x - pad,
            self.y - pad,
            self.width + pad * 2.0,
            self.height + pad * 2.0,
        )
    }

    pub fn union(&self, other: &Rect) -> Self {
        Self::from_bounds(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    /// Strict overlap; touching edges do not count.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn contains_point(&self, point: Point) -> bool {
        point.0 > self.x && point.0 < self.right() && point.1 > self.y && point.1 < self.bottom()
    }

    pub fn translate(&mut self, dx: f32, dy: f32) {
        self.x += dx;
        self.y += dy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touching_rects_do_not_intersect() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(10.0, 0.0, 10.0, 10.0);
        assert!(!a.intersects(&b));
        assert!(a.inflate(1.0).intersects(&b));
        assert_eq!(a.union(&b), Rect::new(0.0, 0.0, 20.0, 10.0));
    }

    #[test]
    fn curved_edges_expand_to_cubics() {
        let edge = EdgeLayout {
            from: "A".into(),
            to: "B".into(),
            label: None,
            label_anchor: None,
            points: vec![(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 20.0)],
            curved: true,
            edge_type: EdgeType::Arrow,
            style: EdgeStyle::Solid,
            arrow_start: false,
            arrow_end: true,
            start_marker: None,
            end_marker: Some(EdgeMarker::Arrow),
            override_style: EdgeStyleOverride::default(),
        };
        let segments = edge.segments();
        assert_eq!(segments.len(), 3);
        assert!(matches!(segments[0], PathSegment::Cubic(..)));
        let straight = EdgeLayout {
            curved: false,
            ..edge
        };
        assert!(matches!(straight.segments()[1], PathSegment::Line(..)));
    }
}
