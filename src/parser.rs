use crate::error::{Diagnostic, ParseError};
use crate::ir::{
    Direction, Edge, EdgeStyle, EdgeStyleOverride, EdgeType, Graph, NodeShape, NodeStyle, Subgraph,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use tracing::{debug, warn};

static HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(flowchart|graph)(?:\s+(.*))?$").unwrap());
static SUBGRAPH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^subgraph(?:\s+(.*))?$").unwrap());
static INIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^%%\{\s*init\s*:\s*(\{.*\})\s*\}%%").unwrap());
static IGNORED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(click|accTitle|accDescr|title)\b").unwrap());
// Alternation is leftmost-first, so longer tokens are listed before their prefixes.
// Bare `--`, `==` and `-.` open an inline-text label closed by the next arrow.
static ARROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"<-{2,}>|<={2,}>|<-\.+->|-\.+-[>ox]|-\.+-|\.-+[>ox]|\.-+|={2,}[>ox]|={3,}|-{2,}[>ox]|-{3,}|={2}|-{2}|-\.",
    )
    .unwrap()
});

const SHAPE_DELIMITERS: &[(&str, &str, NodeShape)] = &[
    ("(((", ")))", NodeShape::DoubleCircle),
    ("((", "))", NodeShape::Circle),
    ("([", "])", NodeShape::Stadium),
    ("[(", ")]", NodeShape::Cylinder),
    ("[[", "]]", NodeShape::Subroutine),
    ("[/", "/]", NodeShape::Parallelogram),
    ("[\\", "\\]", NodeShape::ParallelogramAlt),
    ("[/", "\\]", NodeShape::Trapezoid),
    ("[\\", "/]", NodeShape::TrapezoidAlt),
    ("{{", "}}", NodeShape::Hexagon),
    ("(", ")", NodeShape::RoundRect),
    ("[", "]", NodeShape::Rectangle),
    ("{", "}", NodeShape::Diamond),
    (">", "]", NodeShape::Asymmetric),
];

#[derive(Debug, Default)]
pub struct ParseOutput {
    pub graph: Graph,
    pub init_config: Option<serde_json::Value>,
    /// Statements that were skipped.
    pub warnings: Vec<Diagnostic>,
}

pub fn parse_mermaid(input: &str) -> Result<ParseOutput, ParseError> {
    let (lines, init_config) = preprocess_input(input);

    let mut statements: Vec<(usize, String)> = Vec::new();
    for (line_no, line) in &lines {
        for stmt in split_statements(line) {
            statements.push((*line_no, stmt));
        }
    }

    let Some((header_line, header)) = statements.first().cloned() else {
        return Err(ParseError::EmptyInput);
    };
    let Some(caps) = HEADER_RE.captures(&header) else {
        return Err(ParseError::MissingHeader { line: header_line });
    };

    let mut parser = FlowchartParser::new();
    let rest = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
    if !rest.is_empty() {
        let (token, remainder) = rest
            .split_once(char::is_whitespace)
            .map(|(token, remainder)| (token, remainder.trim()))
            .unwrap_or((rest, ""));
        let Some(direction) = Direction::from_token(token) else {
            let keyword = caps.get(1).map(|m| m.as_str()).unwrap_or("graph");
            return Err(ParseError::InvalidDirection {
                line: header_line,
                column: token_column(input, header_line, keyword, token),
                token: token.to_string(),
            });
        };
        parser.graph.direction = direction;
        if !remainder.is_empty() {
            parser.statement(header_line, remainder);
        }
    }

    for (line_no, stmt) in statements.iter().skip(1) {
        parser.statement(*line_no, stmt);
    }

    Ok(parser.finish(init_config))
}

fn token_column(input: &str, line: usize, keyword: &str, token: &str) -> usize {
    let Some(raw) = input.lines().nth(line.saturating_sub(1)) else {
        return 1;
    };
    let after_keyword = raw.find(keyword).map(|idx| idx + keyword.len()).unwrap_or(0);
    match raw[after_keyword..].find(token) {
        Some(offset) => raw[..after_keyword + offset].chars().count() + 1,
        None => 1,
    }
}

fn preprocess_input(input: &str) -> (Vec<(usize, String)>, Option<serde_json::Value>) {
    let mut init_config: Option<serde_json::Value> = None;
    let mut lines = Vec::new();

    for (idx, raw_line) in input.lines().enumerate() {
        let trimmed_line = raw_line.trim();
        if trimmed_line.is_empty() {
            continue;
        }
        if let Some(caps) = INIT_RE.captures(trimmed_line) {
            if let Some(json_str) = caps.get(1).map(|m| m.as_str()) {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(json_str) {
                    init_config = Some(value);
                } else if let Ok(value) = json5::from_str::<serde_json::Value>(json_str) {
                    init_config = Some(value);
                } else {
                    warn!(line = idx + 1, "ignoring unparseable init directive");
                }
            }
            continue;
        }
        if trimmed_line.starts_with("%%") {
            continue;
        }
        let without_comment = strip_trailing_comment(trimmed_line);
        if without_comment.is_empty() {
            continue;
        }
        lines.push((idx + 1, without_comment));
    }

    (lines, init_config)
}

#[derive(Debug)]
struct SubgraphDraft {
    id: String,
    title: Option<String>,
    direction: Option<Direction>,
    nodes: Vec<String>,
    parent: Option<usize>,
    children: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
struct NodeRef {
    id: String,
    label: Option<String>,
    shape: Option<NodeShape>,
    classes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct Link {
    edge_type: EdgeType,
    style: EdgeStyle,
    label: Option<String>,
}

/// One statement: node groups joined by links. `groups.len() == links.len() + 1`.
#[derive(Debug)]
struct Chain {
    groups: Vec<Vec<NodeRef>>,
    links: Vec<Link>,
}

struct FlowchartParser {
    graph: Graph,
    drafts: Vec<SubgraphDraft>,
    stack: Vec<usize>,
    /// Innermost subgraph that owns each node.
    owners: HashMap<String, usize>,
    auto_subgraph_seq: usize,
    pending_classes: Vec<(String, String)>,
    pending_styles: Vec<(String, NodeStyle)>,
    warnings: Vec<Diagnostic>,
}

impl FlowchartParser {
    fn new() -> Self {
        Self {
            graph: Graph::new(),
            drafts: Vec::new(),
            stack: Vec::new(),
            owners: HashMap::new(),
            auto_subgraph_seq: 0,
            pending_classes: Vec::new(),
            pending_styles: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn skip(&mut self, line: usize, message: impl Into<String>) {
        let message = message.into();
        warn!(line, reason = %message, "skipping statement");
        self.warnings.push(Diagnostic { line, message });
    }

    fn statement(&mut self, line: usize, stmt: &str) {
        if stmt == "end" {
            if self.stack.pop().is_none() {
                self.skip(line, "`end` without an open subgraph");
            }
            return;
        }

        if let Some(caps) = SUBGRAPH_RE.captures(stmt) {
            let rest = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            self.open_subgraph(rest);
            return;
        }

        if let Some(direction) = parse_direction_line(stmt) {
            match self.stack.last().copied() {
                Some(idx) => self.drafts[idx].direction = Some(direction),
                None => self.graph.direction = direction,
            }
            return;
        }

        if stmt.starts_with("classDef ") {
            parse_class_def(stmt, &mut self.graph);
            return;
        }
        if stmt.starts_with("class ") {
            self.parse_class_line(stmt);
            return;
        }
        if stmt.starts_with("style ") {
            self.parse_style_line(stmt);
            return;
        }
        if stmt.starts_with("linkStyle ") {
            parse_link_style_line(stmt, &mut self.graph);
            return;
        }
        if IGNORED_RE.is_match(stmt) {
            return;
        }

        match parse_chain(stmt) {
            Ok(chain) => self.add_chain(chain),
            Err(reason) => self.skip(line, reason),
        }
    }

    fn open_subgraph(&mut self, header: &str) {
        let (id, title) = parse_subgraph_header(header);
        let id = match id {
            Some(id) => id,
            None => self.next_auto_subgraph_id(),
        };
        let parent = self.stack.last().copied();
        let idx = self.drafts.len();
        self.drafts.push(SubgraphDraft {
            id,
            title,
            direction: None,
            nodes: Vec::new(),
            parent,
            children: Vec::new(),
        });
        if let Some(parent) = parent {
            self.drafts[parent].children.push(idx);
        }
        self.stack.push(idx);
    }

    fn next_auto_subgraph_id(&mut self) -> String {
        loop {
            let candidate = format!("subgraph_{}", self.auto_subgraph_seq);
            self.auto_subgraph_seq += 1;
            let taken = self.drafts.iter().any(|d| d.id == candidate)
                || self.graph.nodes.contains_key(&candidate);
            if !taken {
                return candidate;
            }
        }
    }

    fn add_chain(&mut self, chain: Chain) {
        for node in chain.groups.iter().flatten() {
            self.graph
                .ensure_node(&node.id, node.label.clone(), node.shape);
            for class_name in &node.classes {
                self.pending_classes
                    .push((node.id.clone(), class_name.clone()));
            }
            self.register_membership(&node.id);
        }

        for (idx, link) in chain.links.iter().enumerate() {
            for from in &chain.groups[idx] {
                for to in &chain.groups[idx + 1] {
                    self.graph.edges.push(Edge::new(
                        from.id.clone(),
                        to.id.clone(),
                        link.edge_type,
                        link.style,
                        link.label.clone(),
                    ));
                }
            }
        }
    }

    fn register_membership(&mut self, node_id: &str) {
        let Some(innermost) = self.stack.last().copied() else {
            return;
        };
        for &idx in &self.stack {
            let draft = &mut self.drafts[idx];
            if !draft.nodes.iter().any(|n| n == node_id) {
                draft.nodes.push(node_id.to_string());
            }
        }
        match self.owners.get(node_id).copied() {
            None => {
                self.owners.insert(node_id.to_string(), innermost);
            }
            Some(owner) if is_descendant(&self.drafts, innermost, owner) => {
                self.owners.insert(node_id.to_string(), innermost);
            }
            Some(_) => {}
        }
    }

    fn parse_class_line(&mut self, line: &str) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            return;
        }
        let class_names: Vec<&str> = parts[parts.len() - 1]
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();
        let nodes_raw = parts[1..parts.len() - 1].join(" ");
        for id in nodes_raw.split(',').map(str::trim).filter(|id| !id.is_empty()) {
            for class_name in &class_names {
                self.pending_classes
                    .push((id.to_string(), class_name.to_string()));
            }
        }
    }

    fn parse_style_line(&mut self, line: &str) {
        let mut parts = line.splitn(3, char::is_whitespace);
        let _ = parts.next();
        let node_ids = parts.next().unwrap_or("").trim();
        let rest = parts.next().unwrap_or("").trim();
        if node_ids.is_empty() || rest.is_empty() {
            return;
        }
        let style = parse_node_style(rest);
        for id in node_ids.split(',').map(str::trim).filter(|id| !id.is_empty()) {
            self.pending_styles.push((id.to_string(), style.clone()));
        }
    }

    fn finish(mut self, init_config: Option<serde_json::Value>) -> ParseOutput {
        if !self.stack.is_empty() {
            debug!(open = self.stack.len(), "closing unterminated subgraphs at end of input");
        }

        for (id, class_name) in std::mem::take(&mut self.pending_classes) {
            if let Some(node) = self.graph.nodes.get_mut(&id)
                && !node.classes.contains(&class_name)
            {
                node.classes.push(class_name);
            }
        }
        for (id, style) in std::mem::take(&mut self.pending_styles) {
            if let Some(node) = self.graph.nodes.get_mut(&id) {
                node.style.merge(&style);
            }
        }

        self.resolve_subgraph_endpoints();
        self.assign_parents();
        self.graph.subgraphs = build_subgraph_tree(std::mem::take(&mut self.drafts));

        debug!(
            nodes = self.graph.nodes.len(),
            edges = self.graph.edges.len(),
            subgraphs = self.graph.subgraphs.len(),
            skipped = self.warnings.len(),
            "parsed flowchart"
        );

        ParseOutput {
            graph: self.graph,
            init_config,
            warnings: self.warnings,
        }
    }

    /// Edges written against a subgraph id connect to its first member; the
    /// placeholder nodes those references created are removed.
    fn resolve_subgraph_endpoints(&mut self) {
        let subgraph_ids: HashSet<String> = self.drafts.iter().map(|d| d.id.clone()).collect();
        let placeholders: HashSet<String> = self
            .graph
            .nodes
            .values()
            .filter(|node| node.label.is_none() && subgraph_ids.contains(&node.id))
            .map(|node| node.id.clone())
            .collect();

        let first_member: HashMap<String, Option<String>> = self
            .drafts
            .iter()
            .map(|draft| {
                let member = draft
                    .nodes
                    .iter()
                    .find(|id| !placeholders.contains(*id))
                    .cloned();
                (draft.id.clone(), member)
            })
            .collect();

        let resolve = |id: &str, graph: &Graph| -> Option<String> {
            if placeholders.contains(id) {
                first_member.get(id).cloned().flatten()
            } else if graph.nodes.contains_key(id) {
                Some(id.to_string())
            } else {
                None
            }
        };

        let edges = std::mem::take(&mut self.graph.edges);
        let mut index_map: HashMap<usize, usize> = HashMap::new();
        let mut kept = Vec::with_capacity(edges.len());
        for (old_idx, mut edge) in edges.into_iter().enumerate() {
            match (resolve(&edge.from, &self.graph), resolve(&edge.to, &self.graph)) {
                (Some(from), Some(to)) => {
                    edge.from = from;
                    edge.to = to;
                    index_map.insert(old_idx, kept.len());
                    kept.push(edge);
                }
                _ => {
                    warn!(from = %edge.from, to = %edge.to, "dropping edge with unresolved endpoint");
                }
            }
        }
        self.graph.edges = kept;
        self.graph.edge_styles = std::mem::take(&mut self.graph.edge_styles)
            .into_iter()
            .filter_map(|(idx, style)| index_map.get(&idx).map(|new_idx| (*new_idx, style)))
            .collect();

        for id in &placeholders {
            self.graph.nodes.remove(id);
            self.graph.node_order.remove(id);
            self.owners.remove(id);
        }
        for draft in &mut self.drafts {
            draft.nodes.retain(|id| !placeholders.contains(id));
        }
    }

    /// Each node keeps one owning block; blocks list only nodes owned by
    /// themselves or their descendants, so siblings never share members.
    fn assign_parents(&mut self) {
        for (node_id, owner) in &self.owners {
            if let Some(node) = self.graph.nodes.get_mut(node_id) {
                node.parent = Some(self.drafts[*owner].id.clone());
            }
        }
        for idx in 0..self.drafts.len() {
            let owners = &self.owners;
            let drafts = &self.drafts;
            let members: Vec<String> = drafts[idx]
                .nodes
                .iter()
                .filter(|id| {
                    owners
                        .get(*id)
                        .is_some_and(|owner| *owner == idx || is_descendant(drafts, *owner, idx))
                })
                .cloned()
                .collect();
            self.drafts[idx].nodes = members;
        }
    }
}

fn is_descendant(drafts: &[SubgraphDraft], candidate: usize, ancestor: usize) -> bool {
    let mut current = drafts[candidate].parent;
    while let Some(idx) = current {
        if idx == ancestor {
            return true;
        }
        current = drafts[idx].parent;
    }
    false
}

/// Children are always pushed after their parent, so building in reverse
/// index order sees every child before its parent.
fn build_subgraph_tree(drafts: Vec<SubgraphDraft>) -> Vec<Subgraph> {
    let roots: Vec<usize> = drafts
        .iter()
        .enumerate()
        .filter(|(_, d)| d.parent.is_none())
        .map(|(idx, _)| idx)
        .collect();
    let children: Vec<Vec<usize>> = drafts.iter().map(|d| d.children.clone()).collect();
    let mut built: Vec<Option<Subgraph>> = drafts
        .into_iter()
        .map(|draft| {
            Some(Subgraph {
                id: draft.id,
                title: draft.title,
                direction: draft.direction,
                nodes: draft.nodes,
                subgraphs: Vec::new(),
            })
        })
        .collect();

    for idx in (0..built.len()).rev() {
        let nested: Vec<Subgraph> = children[idx]
            .iter()
            .filter_map(|child| built[*child].take())
            .collect();
        if let Some(sub) = built[idx].as_mut() {
            sub.subgraphs = nested;
        }
    }

    roots
        .into_iter()
        .filter_map(|idx| built[idx].take())
        .collect()
}

fn split_statements(line: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_quote = false;
    let mut in_pipe = false;

    for ch in line.chars() {
        if in_quote {
            if ch == '"' {
                in_quote = false;
            }
            current.push(ch);
            continue;
        }
        match ch {
            '"' => {
                in_quote = true;
                current.push(ch);
            }
            '|' if depth == 0 => {
                in_pipe = !in_pipe;
                current.push(ch);
            }
            '[' | '(' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ']' | ')' | '}' => {
                if depth > 0 {
                    depth -= 1;
                }
                current.push(ch);
            }
            ';' if depth == 0 && !in_pipe => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_string());
    }
    parts
}

fn strip_trailing_comment(line: &str) -> String {
    let mut in_quote = false;
    let mut chars = line.chars().peekable();
    let mut out = String::new();
    while let Some(ch) = chars.next() {
        if ch == '"' {
            in_quote = !in_quote;
        }
        if !in_quote
            && ch == '%'
            && let Some('%') = chars.peek().copied()
        {
            break;
        }
        out.push(ch);
    }
    out.trim().to_string()
}

fn push_masked(out: &mut String, ch: char, keep: bool) {
    if keep {
        out.push(ch);
    } else {
        out.extend(std::iter::repeat_n(' ', ch.len_utf8()));
    }
}

/// Blanks out label text (inside shape delimiters, quotes and `|...|`) while
/// keeping byte offsets aligned with the input, so arrow and `&` detection
/// can run on the mask and slice the original.
fn mask_labels(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut in_pipe = false;
    let mut prev = '\0';

    for ch in line.chars() {
        if in_quote {
            if ch == '"' {
                in_quote = false;
            }
            push_masked(&mut out, ch, ch == '"' && depth == 0 && !in_pipe);
        } else if in_pipe {
            if ch == '|' {
                in_pipe = false;
            }
            push_masked(&mut out, ch, ch == '|');
        } else {
            match ch {
                '"' => {
                    in_quote = true;
                    push_masked(&mut out, ch, depth == 0);
                }
                '[' | '(' | '{' => {
                    push_masked(&mut out, ch, depth == 0);
                    depth += 1;
                }
                ']' | ')' | '}' if depth > 0 => {
                    depth -= 1;
                    push_masked(&mut out, ch, depth == 0);
                }
                '>' if depth == 0 && is_id_char(prev) => {
                    push_masked(&mut out, ch, true);
                    depth += 1;
                }
                '|' if depth == 0 => {
                    in_pipe = true;
                    push_masked(&mut out, ch, true);
                }
                _ => push_masked(&mut out, ch, depth == 0),
            }
        }
        prev = ch;
    }
    out
}

fn is_id_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ArrowToken {
    /// `--`, `==` or `-.` starting an inline-text label.
    LabelOpen,
    Link(EdgeType, EdgeStyle),
}

#[derive(Debug)]
struct RawArrow {
    span: Range<usize>,
    kind: ArrowToken,
}

fn classify_arrow(token: &str) -> ArrowToken {
    if matches!(token, "--" | "==" | "-.") {
        return ArrowToken::LabelOpen;
    }
    let style = if token.contains('=') {
        EdgeStyle::Thick
    } else if token.contains('.') {
        EdgeStyle::Dotted
    } else {
        EdgeStyle::Solid
    };
    let edge_type = if token.starts_with('<') {
        EdgeType::Bidirectional
    } else if token.ends_with('>') {
        EdgeType::Arrow
    } else if token.ends_with('o') {
        EdgeType::CircleEnd
    } else if token.ends_with('x') {
        EdgeType::CrossEnd
    } else {
        EdgeType::Open
    };
    ArrowToken::Link(edge_type, style)
}

fn arrow_tokens(masked: &str) -> Vec<RawArrow> {
    ARROW_RE
        .find_iter(masked)
        .map(|m| {
            let mut end = m.end();
            let token = m.as_str();
            // `A---oB` reads as `A --- oB`: a decoration glued to an id belongs to the id.
            if (token.ends_with('o') || token.ends_with('x'))
                && masked[end..].chars().next().is_some_and(is_id_char)
            {
                end -= 1;
            }
            RawArrow {
                span: m.start()..end,
                kind: classify_arrow(&masked[m.start()..end]),
            }
        })
        .collect()
}

#[derive(Debug)]
struct Hop {
    span: Range<usize>,
    edge_type: EdgeType,
    style: EdgeStyle,
    label: Option<String>,
}

fn parse_chain(stmt: &str) -> Result<Chain, String> {
    let masked = mask_labels(stmt);

    let mut hops: Vec<Hop> = Vec::new();
    let mut tokens = arrow_tokens(&masked).into_iter();
    while let Some(token) = tokens.next() {
        match token.kind {
            ArrowToken::Link(edge_type, style) => hops.push(Hop {
                span: token.span,
                edge_type,
                style,
                label: None,
            }),
            ArrowToken::LabelOpen => {
                let Some(close) = tokens.next() else {
                    return Err("edge label is not closed by an arrow".to_string());
                };
                let ArrowToken::Link(edge_type, style) = close.kind else {
                    return Err("edge label is not closed by an arrow".to_string());
                };
                let label = clean_label(&stmt[token.span.end..close.span.start]);
                hops.push(Hop {
                    span: token.span.start..close.span.end,
                    edge_type,
                    style,
                    label,
                });
            }
        }
    }

    let mut segments: Vec<Range<usize>> = Vec::with_capacity(hops.len() + 1);
    let mut cursor = 0usize;
    for hop in &hops {
        segments.push(cursor..hop.span.start);
        cursor = hop.span.end;
    }
    segments.push(cursor..stmt.len());

    let mut groups = Vec::with_capacity(segments.len());
    for (idx, mut range) in segments.into_iter().enumerate() {
        if idx > 0
            && let Some((label, rest_start)) = leading_pipe_label(stmt, range.clone())
        {
            if hops[idx - 1].label.is_none() {
                hops[idx - 1].label = label;
            }
            range.start = rest_start;
        }
        if idx < hops.len()
            && let Some((label, rest_end)) = trailing_pipe_label(stmt, range.clone())
        {
            if hops[idx].label.is_none() {
                hops[idx].label = label;
            }
            range.end = rest_end;
        }
        let group = parse_node_group(&stmt[range.clone()], &masked[range])?;
        if group.is_empty() {
            return Err(if idx == 0 {
                "arrow has no source node".to_string()
            } else {
                "arrow has no target node".to_string()
            });
        }
        groups.push(group);
    }

    let links = hops
        .into_iter()
        .map(|hop| Link {
            edge_type: hop.edge_type,
            style: hop.style,
            label: hop.label,
        })
        .collect();
    Ok(Chain { groups, links })
}

fn leading_pipe_label(stmt: &str, range: Range<usize>) -> Option<(Option<String>, usize)> {
    let text = &stmt[range.clone()];
    let start = range.start + (text.len() - text.trim_start().len());
    let rest = stmt[start..range.end].strip_prefix('|')?;
    let close = rest.find('|')?;
    let label = clean_label(&rest[..close]);
    Some((label, start + 1 + close + 1))
}

fn trailing_pipe_label(stmt: &str, range: Range<usize>) -> Option<(Option<String>, usize)> {
    let text = stmt[range.clone()].trim_end();
    let inner = text.strip_suffix('|')?;
    let open = inner.rfind('|')?;
    let label = clean_label(&inner[open + 1..]);
    Some((label, range.start + open))
}

fn clean_label(raw: &str) -> Option<String> {
    let label = strip_quotes(raw.trim().trim_matches('|'));
    if label.is_empty() { None } else { Some(label) }
}

fn parse_node_group(text: &str, masked: &str) -> Result<Vec<NodeRef>, String> {
    let mut nodes = Vec::new();
    let mut start = 0usize;
    let split_points = masked
        .match_indices('&')
        .map(|(idx, _)| idx)
        .chain(std::iter::once(masked.len()));
    for end in split_points {
        let part = text[start..end].trim();
        start = end + 1;
        if part.is_empty() {
            if masked.trim().is_empty() {
                continue;
            }
            return Err("empty node reference around `&`".to_string());
        }
        nodes.push(parse_node_token(part)?);
    }
    Ok(nodes)
}

fn parse_node_token(token: &str) -> Result<NodeRef, String> {
    let (base, classes) = split_inline_classes(token);
    let base = base.trim();
    let (id, shaped) = match base.find(['[', '(', '{', '>']) {
        Some(pos) => {
            let raw = base[pos..].trim();
            let shaped = parse_shape(raw)
                .ok_or_else(|| format!("unterminated shape `{raw}`"))?;
            (base[..pos].trim(), Some(shaped))
        }
        None => (base, None),
    };
    if !is_valid_id(id) {
        return Err(format!("invalid node reference `{base}`"));
    }
    let (label, shape) = match shaped {
        Some((label, shape)) => (Some(label), Some(shape)),
        None => (None, None),
    };
    Ok(NodeRef {
        id: id.to_string(),
        label,
        shape,
        classes,
    })
}

fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) if is_id_char(first) => {}
        _ => return false,
    }
    chars.all(|c| is_id_char(c) || c == '-' || c == '.')
}

fn parse_shape(raw: &str) -> Option<(String, NodeShape)> {
    SHAPE_DELIMITERS.iter().find_map(|&(open, close, shape)| {
        if raw.len() >= open.len() + close.len() && raw.starts_with(open) && raw.ends_with(close)
        {
            let inner = &raw[open.len()..raw.len() - close.len()];
            Some((strip_quotes(inner), shape))
        } else {
            None
        }
    })
}

fn split_inline_classes(token: &str) -> (String, Vec<String>) {
    let masked = mask_labels(token);
    let Some(pos) = masked.find(":::") else {
        return (token.trim().to_string(), Vec::new());
    };
    let classes = token[pos + 3..]
        .split(":::")
        .flat_map(|part| part.split(','))
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect();
    (token[..pos].trim().to_string(), classes)
}

fn parse_subgraph_header(input: &str) -> (Option<String>, Option<String>) {
    let (base, _classes) = split_inline_classes(input);
    let trimmed = base.trim();
    if trimmed.is_empty() {
        return (None, None);
    }
    if trimmed.starts_with('"') {
        return (None, clean_label(trimmed));
    }

    if let Some(pos) = trimmed.find(['[', '(', '{']) {
        let id = trimmed[..pos].trim();
        if is_valid_id(id)
            && let Some((title, _shape)) = parse_shape(trimmed[pos..].trim())
        {
            return (Some(id.to_string()), clean_label(&title));
        }
    }

    match trimmed.split_once(char::is_whitespace) {
        None => (Some(trimmed.to_string()), None),
        Some((id, rest)) if rest.trim_start().starts_with('"') && is_valid_id(id) => {
            (Some(id.to_string()), clean_label(rest))
        }
        Some(_) => (None, Some(trimmed.to_string())),
    }
}

fn parse_direction_line(line: &str) -> Option<Direction> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() == 2 && parts[0] == "direction" {
        return Direction::from_token(parts[1]);
    }
    None
}

fn parse_class_def(line: &str, graph: &mut Graph) {
    let mut parts = line.trim().splitn(3, char::is_whitespace);
    let _ = parts.next();
    let class_names = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim();
    if class_names.is_empty() || rest.is_empty() {
        return;
    }
    let style = parse_node_style(rest);
    for name in class_names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        graph.class_defs.insert(name.to_string(), style.clone());
    }
}

fn parse_link_style_line(line: &str, graph: &mut Graph) {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 3 {
        return;
    }
    let Some(style_idx) = tokens
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, token)| token.contains(':'))
        .map(|(idx, _)| idx)
    else {
        return;
    };
    let style = parse_edge_style(&tokens[style_idx..].join(" "));
    let index_tokens = &tokens[1..style_idx];
    if index_tokens.len() == 1 && index_tokens[0] == "default" {
        graph.edge_style_default = Some(style);
        return;
    }
    for token in index_tokens.iter().flat_map(|token| token.split(',')) {
        if let Ok(index) = token.trim().parse::<usize>() {
            graph.edge_styles.insert(index, style.clone());
        }
    }
}

fn style_pairs(input: &str) -> impl Iterator<Item = (&str, &str)> {
    input.split(',').filter_map(|part| {
        let (key, value) = part.split_once(':')?;
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            None
        } else {
            Some((key, value))
        }
    })
}

fn parse_px(value: &str) -> Option<f32> {
    value.trim_end_matches("px").trim().parse::<f32>().ok()
}

fn parse_node_style(input: &str) -> NodeStyle {
    let mut style = NodeStyle::default();
    for (key, value) in style_pairs(input) {
        match key {
            "fill" => style.fill = Some(value.to_string()),
            "stroke" => style.stroke = Some(value.to_string()),
            "stroke-width" => style.stroke_width = parse_px(value),
            "stroke-dasharray" => style.stroke_dasharray = Some(value.to_string()),
            "color" => style.text_color = Some(value.to_string()),
            "font-family" => style.font_family = Some(value.to_string()),
            "font-size" => style.font_size = parse_px(value),
            "font-weight" => style.font_weight = Some(value.to_string()),
            _ => {}
        }
    }
    style
}

fn parse_edge_style(input: &str) -> EdgeStyleOverride {
    let mut style = EdgeStyleOverride::default();
    for (key, value) in style_pairs(input) {
        match key {
            "stroke" => style.stroke = Some(value.to_string()),
            "stroke-width" => style.stroke_width = parse_px(value),
            "stroke-dasharray" => style.dasharray = Some(value.to_string()),
            "color" => style.label_color = Some(value.to_string()),
            _ => {}
        }
    }
    style
}

fn strip_quotes(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> ParseOutput {
        parse_mermaid(input).unwrap()
    }

    #[test]
    fn parse_simple_flowchart() {
        let parsed = parse("flowchart lr\nA[Start] -->|go| B(End)");
        assert_eq!(parsed.graph.nodes.len(), 2);
        assert_eq!(parsed.graph.edges.len(), 1);
        assert_eq!(parsed.graph.edges[0].label.as_deref(), Some("go"));
        assert_eq!(parsed.graph.direction, Direction::LeftRight);
        assert_eq!(parsed.graph.nodes["B"].shape, NodeShape::RoundRect);
    }

    #[test]
    fn header_defaults_to_top_down() {
        let parsed = parse("graph\nA --> B");
        assert_eq!(parsed.graph.direction, Direction::TopDown);
    }

    #[test]
    fn missing_header_is_fatal() {
        let err = parse_mermaid("A --> B").unwrap_err();
        assert_eq!(err, ParseError::MissingHeader { line: 1 });
        assert_eq!(parse_mermaid("  \n%% only a comment\n").unwrap_err(), ParseError::EmptyInput);
    }

    #[test]
    fn invalid_direction_reports_span() {
        let err = parse_mermaid("\nflowchart XY\nA-->B").unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidDirection {
                line: 2,
                column: 11,
                token: "XY".to_string()
            }
        );
    }

    #[test]
    fn header_may_share_a_line_with_statements() {
        let parsed = parse("graph LR; A-->B; B-->C");
        assert_eq!(parsed.graph.direction, Direction::LeftRight);
        assert_eq!(parsed.graph.edges.len(), 2);
    }

    #[test]
    fn chained_edges_expand_pairwise() {
        let parsed = parse("flowchart TD\nA --> B --> C");
        let pairs: Vec<(&str, &str)> = parsed
            .graph
            .edges
            .iter()
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();
        assert_eq!(pairs, vec![("A", "B"), ("B", "C")]);
    }

    #[test]
    fn ampersand_fan_out_is_a_cross_product() {
        let parsed = parse("flowchart TD\nA & B --> C & D[\"x & y\"]");
        assert_eq!(parsed.graph.edges.len(), 4);
        assert_eq!(parsed.graph.nodes["D"].label.as_deref(), Some("x & y"));
    }

    #[test]
    fn parse_multi_target_edges() {
        let parsed = parse("flowchart LR\nA --> B & C");
        assert_eq!(parsed.graph.edges.len(), 2);
        assert!(parsed.graph.nodes.contains_key("B"));
        assert!(parsed.graph.nodes.contains_key("C"));
    }

    #[test]
    fn arrow_tokens_map_to_type_and_style() {
        let parsed = parse(
            "flowchart LR\nA -.-> B\nC ==> D\nE <--> F\nG --- H\nI --o J\nK --x L\nM ----> N\nO === P",
        );
        let kinds: Vec<(EdgeType, EdgeStyle)> = parsed
            .graph
            .edges
            .iter()
            .map(|e| (e.edge_type, e.style))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (EdgeType::Arrow, EdgeStyle::Dotted),
                (EdgeType::Arrow, EdgeStyle::Thick),
                (EdgeType::Bidirectional, EdgeStyle::Solid),
                (EdgeType::Open, EdgeStyle::Solid),
                (EdgeType::CircleEnd, EdgeStyle::Solid),
                (EdgeType::CrossEnd, EdgeStyle::Solid),
                (EdgeType::Arrow, EdgeStyle::Solid),
                (EdgeType::Open, EdgeStyle::Thick),
            ]
        );
        assert!(parsed.graph.edges[2].arrow_start);
        assert!(!parsed.graph.edges[3].arrow_end);
    }

    #[test]
    fn decoration_glued_to_id_stays_with_the_id() {
        let parsed = parse("flowchart LR\nA---oak");
        assert_eq!(parsed.graph.edges.len(), 1);
        assert_eq!(parsed.graph.edges[0].to, "oak");
        assert_eq!(parsed.graph.edges[0].edge_type, EdgeType::Open);
    }

    #[test]
    fn parse_edge_label_in_arrow() {
        let parsed = parse(
            "flowchart LR\nA -- needs review --> B\nC --|ship it|--> D\nE -. maybe .-> F\nG == sure ==> H",
        );
        let labels: Vec<Option<&str>> =
            parsed.graph.edges.iter().map(|e| e.label.as_deref()).collect();
        assert_eq!(
            labels,
            vec![Some("needs review"), Some("ship it"), Some("maybe"), Some("sure")]
        );
        assert_eq!(parsed.graph.edges[2].style, EdgeStyle::Dotted);
        assert_eq!(parsed.graph.edges[3].style, EdgeStyle::Thick);
    }

    #[test]
    fn dashes_inside_labels_are_not_arrows() {
        let parsed = parse("flowchart LR\nA[wi-fi --> lan] -->|a-->b| B");
        assert_eq!(parsed.graph.edges.len(), 1);
        assert_eq!(parsed.graph.nodes["A"].label.as_deref(), Some("wi-fi --> lan"));
        assert_eq!(parsed.graph.edges[0].label.as_deref(), Some("a-->b"));
    }

    #[test]
    fn shapes_are_recognised() {
        let parsed = parse(
            "flowchart TD\na[r]\nb(rr)\nc([st])\nd((ci))\ne(((dc)))\nf{di}\ng{{hx}}\nh[(cy)]\ni[[su]]\nj[/pa/]\nk[\\pb\\]\nl[/tr\\]\nm[\\tb/]\nn>as]",
        );
        let shape = |id: &str| parsed.graph.nodes[id].shape;
        assert_eq!(shape("a"), NodeShape::Rectangle);
        assert_eq!(shape("b"), NodeShape::RoundRect);
        assert_eq!(shape("c"), NodeShape::Stadium);
        assert_eq!(shape("d"), NodeShape::Circle);
        assert_eq!(shape("e"), NodeShape::DoubleCircle);
        assert_eq!(shape("f"), NodeShape::Diamond);
        assert_eq!(shape("g"), NodeShape::Hexagon);
        assert_eq!(shape("h"), NodeShape::Cylinder);
        assert_eq!(shape("i"), NodeShape::Subroutine);
        assert_eq!(shape("j"), NodeShape::Parallelogram);
        assert_eq!(shape("k"), NodeShape::ParallelogramAlt);
        assert_eq!(shape("l"), NodeShape::Trapezoid);
        assert_eq!(shape("m"), NodeShape::TrapezoidAlt);
        assert_eq!(shape("n"), NodeShape::Asymmetric);
        assert_eq!(parsed.graph.nodes["n"].label.as_deref(), Some("as"));
    }

    #[test]
    fn quoted_label_may_contain_delimiters() {
        let parsed = parse("flowchart TD\nA[\"close ] early\"] --> B");
        assert_eq!(parsed.graph.nodes["A"].label.as_deref(), Some("close ] early"));
        assert_eq!(parsed.graph.edges.len(), 1);
    }

    #[test]
    fn first_label_wins() {
        let parsed = parse("flowchart TD\nA --> B\nA[First] --> C\nA[Second]");
        let node = &parsed.graph.nodes["A"];
        assert_eq!(node.label.as_deref(), Some("First"));
        assert_eq!(parsed.graph.nodes["B"].label, None);
        assert_eq!(parsed.graph.nodes["B"].shape, NodeShape::Rectangle);
    }

    #[test]
    fn dangling_arrow_is_skipped() {
        let parsed = parse("flowchart TD\nX --> Y\nA --> \nY --> Z");
        assert_eq!(parsed.graph.edges.len(), 2);
        assert!(!parsed.graph.nodes.contains_key("A"));
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.warnings[0].line, 3);
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let parsed = parse("flowchart TD\n%% leading\n\nA --> B %% trailing\n");
        assert_eq!(parsed.graph.edges.len(), 1);
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn parse_subgraph() {
        let parsed = parse("flowchart TD\nsubgraph Group[\"My Group\"]\nA --> B\nend");
        assert_eq!(parsed.graph.subgraphs.len(), 1);
        let sg = &parsed.graph.subgraphs[0];
        assert_eq!(sg.id, "Group");
        assert_eq!(sg.label(), "My Group");
        assert_eq!(sg.nodes, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(parsed.graph.nodes["A"].parent.as_deref(), Some("Group"));
    }

    #[test]
    fn subgraph_header_forms() {
        assert_eq!(parse_subgraph_header("one"), (Some("one".to_string()), None));
        assert_eq!(
            parse_subgraph_header("one [Title]"),
            (Some("one".to_string()), Some("Title".to_string()))
        );
        assert_eq!(
            parse_subgraph_header("one \"Quoted title\""),
            (Some("one".to_string()), Some("Quoted title".to_string()))
        );
        assert_eq!(
            parse_subgraph_header("\"Only title\""),
            (None, Some("Only title".to_string()))
        );
        assert_eq!(
            parse_subgraph_header("Some words"),
            (None, Some("Some words".to_string()))
        );
    }

    #[test]
    fn parse_nested_subgraphs() {
        let input = "flowchart LR\nsubgraph Outer\n  subgraph Inner\n    direction TB\n    A --> B\n  end\n  C\nend";
        let parsed = parse(input);
        assert_eq!(parsed.graph.subgraphs.len(), 1);
        let outer = &parsed.graph.subgraphs[0];
        assert_eq!(outer.subgraphs.len(), 1);
        let inner = &outer.subgraphs[0];
        assert!(outer.contains("A") && outer.contains("B") && outer.contains("C"));
        assert!(inner.contains("A") && !inner.contains("C"));
        assert_eq!(inner.direction, Some(Direction::TopDown));
        assert_eq!(parsed.graph.nodes["A"].parent.as_deref(), Some("Inner"));
        assert_eq!(parsed.graph.nodes["C"].parent.as_deref(), Some("Outer"));
    }

    #[test]
    fn sibling_subgraphs_do_not_share_members() {
        let parsed = parse("flowchart TD\nsubgraph S1\nX-->Y\nend\nsubgraph S2\nZ-->X\nend");
        let s1 = &parsed.graph.subgraphs[0];
        let s2 = &parsed.graph.subgraphs[1];
        assert!(s1.contains("X"));
        assert!(!s2.contains("X"));
        assert!(s2.contains("Z"));
    }

    #[test]
    fn auto_subgraph_ids_are_unique() {
        let parsed = parse("flowchart TD\nsubgraph_0[Node]\nsubgraph\nA\nend\nsubgraph \"Two\"\nB\nend");
        let ids: Vec<&str> = parsed.graph.subgraphs.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["subgraph_1", "subgraph_2"]);
        assert_eq!(parsed.graph.subgraphs[1].label(), "Two");
        assert!(parsed.graph.nodes.contains_key("subgraph_0"));
    }

    #[test]
    fn edges_to_subgraph_ids_are_rerouted() {
        let parsed = parse("flowchart TD\nsubgraph S\nX --> Y\nend\nA --> S\nS --> B\nsubgraph E\nend\nA --> E");
        assert!(!parsed.graph.nodes.contains_key("S"));
        assert!(!parsed.graph.nodes.contains_key("E"));
        let pairs: Vec<(&str, &str)> = parsed
            .graph
            .edges
            .iter()
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();
        assert_eq!(pairs, vec![("X", "Y"), ("A", "X"), ("X", "B")]);
    }

    #[test]
    fn parse_class_and_styles() {
        let input = "flowchart LR\nclassDef hot fill:#f00,stroke:#000,color:#fff,stroke-width:2px,font-size:14px,font-weight:bold,bogus:1\nA[One]\nclass A hot\nstyle A fill:#0f0,stroke-width:3\nA --> B\nlinkStyle 0 stroke:#0ff,stroke-width:4,stroke-dasharray:5 5";
        let parsed = parse(input);
        let hot = &parsed.graph.class_defs["hot"];
        assert_eq!(hot.stroke_width, Some(2.0));
        assert_eq!(hot.font_size, Some(14.0));
        assert_eq!(hot.font_weight.as_deref(), Some("bold"));
        assert_eq!(parsed.graph.nodes["A"].classes, vec!["hot".to_string()]);
        let resolved = parsed.graph.resolved_node_style("A");
        assert_eq!(resolved.fill.as_deref(), Some("#0f0"));
        assert_eq!(resolved.stroke.as_deref(), Some("#000"));
        assert_eq!(resolved.stroke_width, Some(3.0));
        let edge_style = &parsed.graph.edge_styles[&0];
        assert_eq!(edge_style.stroke.as_deref(), Some("#0ff"));
        assert_eq!(edge_style.dasharray.as_deref(), Some("5 5"));
    }

    #[test]
    fn parse_inline_class_and_linkstyle_default() {
        let input = "flowchart LR\nclassDef hot fill:#f00\nA[Alpha]:::hot --> B\nB --> C\nlinkStyle default stroke:#0ff,stroke-width:3\nlinkStyle 1 stroke:#00f";
        let parsed = parse(input);
        assert!(parsed.graph.nodes["A"].classes.iter().any(|c| c == "hot"));
        assert!(parsed.graph.edge_style_default.is_some());
        let resolved = parsed.graph.resolved_edge_style(1);
        assert_eq!(resolved.stroke.as_deref(), Some("#00f"));
        assert_eq!(resolved.stroke_width, Some(3.0));
    }

    #[test]
    fn init_directive_is_captured() {
        let parsed = parse("%%{init: {'theme': 'dark'}}%%\nflowchart TD\nA-->B");
        let init = parsed.init_config.unwrap();
        assert_eq!(init["theme"], "dark");
    }
}
