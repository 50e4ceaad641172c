use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::Serialize;

use crate::error::Error;
use crate::layout::{Layout, LayoutStats};

/// Renderer-independent snapshot of a positioned diagram.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutDump {
    pub direction: String,
    pub width: f32,
    pub height: f32,
    pub nodes: Vec<NodeDump>,
    pub edges: Vec<EdgeDump>,
    pub subgraphs: Vec<SubgraphDump>,
    pub stats: LayoutStats,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDump {
    pub id: String,
    pub shape: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub rank: usize,
    pub order: usize,
    pub label_lines: Vec<String>,
    pub parent: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDump {
    pub from: String,
    pub to: String,
    pub arrow_start: bool,
    pub arrow_end: bool,
    pub label: Option<String>,
    pub label_anchor: Option<[f32; 2]>,
    pub points: Vec<[f32; 2]>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgraphDump {
    pub id: String,
    pub label: String,
    pub parent: Option<String>,
    pub nodes: Vec<String>,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl LayoutDump {
    pub fn from_layout(layout: &Layout) -> Self {
        let nodes = layout
            .nodes
            .values()
            .map(|node| NodeDump {
                id: node.id.clone(),
                shape: format!("{:?}", node.shape),
                x: node.x,
                y: node.y,
                width: node.width,
                height: node.height,
                rank: node.rank,
                order: node.order,
                label_lines: node.label.lines.clone(),
                parent: node.parent.clone(),
            })
            .collect();

        let edges = layout
            .edges
            .iter()
            .map(|edge| EdgeDump {
                from: edge.from.clone(),
                to: edge.to.clone(),
                arrow_start: edge.arrow_start,
                arrow_end: edge.arrow_end,
                label: edge.label.as_ref().map(|block| block.lines.join("\n")),
                label_anchor: edge.label_anchor.map(|(x, y)| [x, y]),
                points: edge.points.iter().map(|(x, y)| [*x, *y]).collect(),
            })
            .collect();

        let subgraphs = layout
            .subgraphs
            .iter()
            .map(|sub| SubgraphDump {
                id: sub.id.clone(),
                label: sub.label.clone(),
                parent: sub
                    .parent
                    .and_then(|idx| layout.subgraphs.get(idx))
                    .map(|parent| parent.id.clone()),
                nodes: sub.nodes.clone(),
                x: sub.x,
                y: sub.y,
                width: sub.width,
                height: sub.height,
            })
            .collect();

        LayoutDump {
            direction: layout.direction.as_token().to_string(),
            width: layout.width,
            height: layout.height,
            nodes,
            edges,
            subgraphs,
            stats: layout.stats,
        }
    }
}

pub fn layout_to_json(layout: &Layout) -> Result<String, Error> {
    Ok(serde_json::to_string_pretty(&LayoutDump::from_layout(layout))?)
}

pub fn write_layout_dump(path: &Path, layout: &Layout) -> Result<(), Error> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &LayoutDump::from_layout(layout))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use crate::layout::compute_layout;
    use crate::parser::parse_mermaid;
    use crate::text_metrics::HeuristicMeasurer;
    use crate::theme::Theme;

    #[test]
    fn dump_names_parents_and_points() {
        let parsed =
            parse_mermaid("flowchart LR\nsubgraph outer\nsubgraph inner\nA-->B\nend\nend").unwrap();
        let layout = compute_layout(
            &parsed.graph,
            &Theme::default(),
            &LayoutConfig::default(),
            &HeuristicMeasurer,
        )
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&layout_to_json(&layout).unwrap()).unwrap();
        assert_eq!(json["direction"], "LR");
        assert_eq!(json["nodes"].as_array().map(Vec::len), Some(2));
        assert_eq!(json["subgraphs"][1]["parent"], "outer");
        assert!(json["edges"][0]["points"].as_array().is_some_and(|p| p.len() >= 2));
        assert_eq!(json["edges"][0]["arrowEnd"], true);
    }

    #[test]
    fn dump_file_matches_the_json_text() {
        let parsed = parse_mermaid("flowchart TD\nA-->B").unwrap();
        let layout = compute_layout(
            &parsed.graph,
            &Theme::default(),
            &LayoutConfig::default(),
            &HeuristicMeasurer,
        )
        .unwrap();
        let path = std::env::temp_dir().join(format!("mmle-dump-{}.json", std::process::id()));
        write_layout_dump(&path, &layout).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let _ = std::fs::remove_file(&path);
        let expected: serde_json::Value = serde_json::from_str(&layout_to_json(&layout).unwrap()).unwrap();
        assert_eq!(written, expected);
    }
}
