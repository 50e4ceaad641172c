use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Direction {
    #[default]
    TopDown,
    BottomTop,
    LeftRight,
    RightLeft,
}

impl Direction {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "TD" | "TB" => Some(Self::TopDown),
            "BT" => Some(Self::BottomTop),
            "LR" => Some(Self::LeftRight),
            "RL" => Some(Self::RightLeft),
            _ => None,
        }
    }

    pub fn as_token(self) -> &'static str {
        match self {
            Self::TopDown => "TB",
            Self::BottomTop => "BT",
            Self::LeftRight => "LR",
            Self::RightLeft => "RL",
        }
    }

    /// Ranks advance along the x axis.
    pub fn is_horizontal(self) -> bool {
        matches!(self, Self::LeftRight | Self::RightLeft)
    }

    /// Direction is laid out as its forward counterpart and mirrored afterwards.
    pub fn is_mirrored(self) -> bool {
        matches!(self, Self::BottomTop | Self::RightLeft)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeShape {
    Rectangle,
    RoundRect,
    Stadium,
    Subroutine,
    Cylinder,
    Circle,
    DoubleCircle,
    Diamond,
    Hexagon,
    Parallelogram,
    ParallelogramAlt,
    Trapezoid,
    TrapezoidAlt,
    Asymmetric,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStyle {
    pub fill: Option<String>,
    pub stroke: Option<String>,
    pub stroke_width: Option<f32>,
    pub stroke_dasharray: Option<String>,
    pub text_color: Option<String>,
    pub font_family: Option<String>,
    pub font_size: Option<f32>,
    pub font_weight: Option<String>,
}

impl NodeStyle {
    /// Non-null fields of `other` overwrite fields of `self`.
    pub fn merge(&mut self, other: &NodeStyle) {
        if other.fill.is_some() {
            self.fill = other.fill.clone();
        }
        if other.stroke.is_some() {
            self.stroke = other.stroke.clone();
        }
        if other.stroke_width.is_some() {
            self.stroke_width = other.stroke_width;
        }
        if other.stroke_dasharray.is_some() {
            self.stroke_dasharray = other.stroke_dasharray.clone();
        }
        if other.text_color.is_some() {
            self.text_color = other.text_color.clone();
        }
        if other.font_family.is_some() {
            self.font_family = other.font_family.clone();
        }
        if other.font_size.is_some() {
            self.font_size = other.font_size;
        }
        if other.font_weight.is_some() {
            self.font_weight = other.font_weight.clone();
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == NodeStyle::default()
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub label: Option<String>,
    pub shape: NodeShape,
    pub classes: Vec<String>,
    pub style: NodeStyle,
    /// Innermost enclosing subgraph id.
    pub parent: Option<String>,
}

impl Node {
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    Arrow,
    Open,
    Bidirectional,
    CircleEnd,
    CrossEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeStyle {
    Solid,
    Dotted,
    Thick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeMarker {
    Arrow,
    Circle,
    Cross,
}

impl EdgeType {
    pub fn end_marker(self) -> Option<EdgeMarker> {
        match self {
            EdgeType::Arrow | EdgeType::Bidirectional => Some(EdgeMarker::Arrow),
            EdgeType::CircleEnd => Some(EdgeMarker::Circle),
            EdgeType::CrossEnd => Some(EdgeMarker::Cross),
            EdgeType::Open => None,
        }
    }

    pub fn start_marker(self) -> Option<EdgeMarker> {
        match self {
            EdgeType::Bidirectional => Some(EdgeMarker::Arrow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeStyleOverride {
    pub stroke: Option<String>,
    pub stroke_width: Option<f32>,
    pub dasharray: Option<String>,
    pub label_color: Option<String>,
}

impl EdgeStyleOverride {
    pub fn merge(&mut self, other: &EdgeStyleOverride) {
        if other.stroke.is_some() {
            self.stroke = other.stroke.clone();
        }
        if other.stroke_width.is_some() {
            self.stroke_width = other.stroke_width;
        }
        if other.dasharray.is_some() {
            self.dasharray = other.dasharray.clone();
        }
        if other.label_color.is_some() {
            self.label_color = other.label_color.clone();
        }
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub label: Option<String>,
    pub edge_type: EdgeType,
    pub style: EdgeStyle,
    pub arrow_start: bool,
    pub arrow_end: bool,
}

impl Edge {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        edge_type: EdgeType,
        style: EdgeStyle,
        label: Option<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            label,
            edge_type,
            style,
            arrow_start: edge_type.start_marker().is_some(),
            arrow_end: edge_type.end_marker().is_some(),
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }
}

#[derive(Debug, Clone, Default)]
pub struct Subgraph {
    pub id: String,
    pub title: Option<String>,
    pub direction: Option<Direction>,
    /// Every node referenced inside the block, nested blocks included.
    pub nodes: Vec<String>,
    pub subgraphs: Vec<Subgraph>,
}

impl Subgraph {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.iter().any(|id| id == node_id)
    }
}

/// A subgraph seen through [`Graph::flatten_subgraphs`].
#[derive(Debug, Clone, Copy)]
pub struct SubgraphRef<'a> {
    pub subgraph: &'a Subgraph,
    pub depth: usize,
    /// Index of the parent within the flattened list.
    pub parent: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Graph {
    pub direction: Direction,
    pub nodes: BTreeMap<String, Node>,
    pub node_order: HashMap<String, usize>,
    pub edges: Vec<Edge>,
    pub subgraphs: Vec<Subgraph>,
    pub class_defs: HashMap<String, NodeStyle>,
    pub edge_styles: HashMap<usize, EdgeStyleOverride>,
    pub edge_style_default: Option<EdgeStyleOverride>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            direction: Direction::TopDown,
            nodes: BTreeMap::new(),
            node_order: HashMap::new(),
            edges: Vec::new(),
            subgraphs: Vec::new(),
            class_defs: HashMap::new(),
            edge_styles: HashMap::new(),
            edge_style_default: None,
        }
    }

    /// Creates the node on first reference. Later references only fill in a
    /// label that is still missing; the shape travels with that label.
    pub fn ensure_node(&mut self, id: &str, label: Option<String>, shape: Option<NodeShape>) {
        let next_order = self.node_order.len();
        self.node_order.entry(id.to_string()).or_insert(next_order);
        match self.nodes.get_mut(id) {
            Some(existing) => {
                if existing.label.is_none() && label.is_some() {
                    existing.label = label;
                    if let Some(shape) = shape {
                        existing.shape = shape;
                    }
                }
            }
            None => {
                self.nodes.insert(
                    id.to_string(),
                    Node {
                        id: id.to_string(),
                        label,
                        shape: shape.unwrap_or(NodeShape::Rectangle),
                        classes: Vec::new(),
                        style: NodeStyle::default(),
                        parent: None,
                    },
                );
            }
        }
    }

    /// Node ids in declaration order.
    pub fn ordered_node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.nodes.keys().cloned().collect();
        ids.sort_by_key(|id| self.node_order.get(id).copied().unwrap_or(usize::MAX));
        ids
    }

    /// Pre-order walk over the subgraph tree using an explicit stack.
    pub fn flatten_subgraphs(&self) -> Vec<SubgraphRef<'_>> {
        let mut out: Vec<SubgraphRef<'_>> = Vec::new();
        let mut stack: Vec<(&Subgraph, usize, Option<usize>)> = self
            .subgraphs
            .iter()
            .rev()
            .map(|sub| (sub, 0usize, None))
            .collect();
        while let Some((sub, depth, parent)) = stack.pop() {
            let idx = out.len();
            out.push(SubgraphRef {
                subgraph: sub,
                depth,
                parent,
            });
            for child in sub.subgraphs.iter().rev() {
                stack.push((child, depth + 1, Some(idx)));
            }
        }
        out
    }

    pub fn find_subgraph(&self, id: &str) -> Option<&Subgraph> {
        self.flatten_subgraphs()
            .into_iter()
            .find(|entry| entry.subgraph.id == id)
            .map(|entry| entry.subgraph)
    }

    /// Style after applying `classDef` classes in order, then the node's own
    /// `style` directive fields.
    pub fn resolved_node_style(&self, node_id: &str) -> NodeStyle {
        let mut style = NodeStyle::default();
        let Some(node) = self.nodes.get(node_id) else {
            return style;
        };
        for class_name in &node.classes {
            if let Some(class_style) = self.class_defs.get(class_name) {
                style.merge(class_style);
            }
        }
        style.merge(&node.style);
        style
    }

    pub fn resolved_edge_style(&self, idx: usize) -> EdgeStyleOverride {
        let mut style = self.edge_style_default.clone().unwrap_or_default();
        if let Some(over) = self.edge_styles.get(&idx) {
            style.merge(over);
        }
        style
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_reference_fills_missing_label_only() {
        let mut graph = Graph::new();
        graph.ensure_node("A", None, None);
        graph.ensure_node("A", Some("Decide".to_string()), Some(NodeShape::Diamond));
        graph.ensure_node("A", Some("Other".to_string()), Some(NodeShape::Circle));
        let node = graph.nodes.get("A").unwrap();
        assert_eq!(node.label.as_deref(), Some("Decide"));
        assert_eq!(node.shape, NodeShape::Diamond);
    }

    #[test]
    fn flatten_walks_nested_subgraphs_in_pre_order() {
        let mut graph = Graph::new();
        let mut outer = Subgraph::new("outer");
        let mut inner = Subgraph::new("inner");
        inner.subgraphs.push(Subgraph::new("deep"));
        outer.subgraphs.push(inner);
        graph.subgraphs.push(outer);
        graph.subgraphs.push(Subgraph::new("other"));

        let flat = graph.flatten_subgraphs();
        let ids: Vec<&str> = flat.iter().map(|s| s.subgraph.id.as_str()).collect();
        assert_eq!(ids, vec!["outer", "inner", "deep", "other"]);
        assert_eq!(flat[2].depth, 2);
        assert_eq!(flat[2].parent, Some(1));
        assert_eq!(flat[3].parent, None);
    }

    #[test]
    fn edge_flags_follow_type() {
        let edge = Edge::new("A", "B", EdgeType::Bidirectional, EdgeStyle::Solid, None);
        assert!(edge.arrow_start && edge.arrow_end);
        let open = Edge::new("A", "B", EdgeType::Open, EdgeStyle::Thick, None);
        assert!(!open.arrow_start && !open.arrow_end);
    }
}
