//! Mechanical translation of a positioned [`Layout`] into drawable
//! primitives, and of those primitives into SVG (or PNG with the `png`
//! feature).

use std::fmt::Write as _;
use std::path::Path;

use serde::Serialize;

use crate::config::RenderConfig;
use crate::error::Error;
use crate::geometry::{self, PathSegment};
use crate::ir::{EdgeMarker, EdgeStyle, NodeShape};
use crate::layout::{EdgeLayout, Layout, NodeLayout, SubgraphLayout, TextBlock};
use crate::theme::Theme;

const NODE_STROKE_WIDTH: f32 = 1.4;
const THICK_STROKE_WIDTH: f32 = 2.8;
const DOTTED_DASH: &str = "3 3";
const CLUSTER_RADIUS: f32 = 6.0;
const EDGE_LABEL_PAD: f32 = 4.0;
const DOUBLE_CIRCLE_GAP: f32 = 4.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Paint {
    pub fill: Option<String>,
    pub stroke: Option<String>,
    pub stroke_width: f32,
    pub dasharray: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAnchor {
    Start,
    Middle,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Baseline {
    Alphabetic,
    Middle,
    Hanging,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Primitive {
    Rect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        radius: f32,
        paint: Paint,
    },
    Path {
        d: String,
        paint: Paint,
        marker_start: Option<EdgeMarker>,
        marker_end: Option<EdgeMarker>,
    },
    Text {
        x: f32,
        y: f32,
        text: String,
        anchor: TextAnchor,
        baseline: Baseline,
        font_family: String,
        font_size: f32,
        font_weight: Option<String>,
        fill: String,
    },
}

/// Backend-independent drawing: canvas size plus primitives in paint order.
#[derive(Debug, Clone, Serialize)]
pub struct VectorDocument {
    pub width: f32,
    pub height: f32,
    pub background: String,
    pub line_color: String,
    pub elements: Vec<Primitive>,
}

pub fn render_document(layout: &Layout, theme: &Theme, config: &RenderConfig) -> VectorDocument {
    let pad = config.padding;
    let mut elements = Vec::new();

    for sub in layout.subgraphs.iter().filter(|s| s.width > 0.0 && s.height > 0.0) {
        push_subgraph(&mut elements, sub, theme, pad);
    }
    for edge in &layout.edges {
        push_edge(&mut elements, edge, theme, pad);
    }
    for node in layout.nodes.values() {
        push_node(&mut elements, node, theme, pad);
    }
    for edge in &layout.edges {
        push_edge_label(&mut elements, edge, theme, pad);
    }

    VectorDocument {
        width: layout.width + pad * 2.0,
        height: layout.height + pad * 2.0,
        background: config.background.clone(),
        line_color: theme.line_color.clone(),
        elements,
    }
}

fn offset_segments(segments: Vec<PathSegment>, pad: f32) -> Vec<PathSegment> {
    segments
        .iter()
        .map(|s| s.map_points(|p| (p.0 + pad, p.1 + pad)))
        .collect()
}

fn push_subgraph(out: &mut Vec<Primitive>, sub: &SubgraphLayout, theme: &Theme, pad: f32) {
    out.push(Primitive::Rect {
        x: sub.x + pad,
        y: sub.y + pad,
        width: sub.width,
        height: sub.height,
        radius: CLUSTER_RADIUS,
        paint: Paint {
            fill: Some(theme.cluster_background.clone()),
            stroke: Some(theme.cluster_border.clone()),
            stroke_width: 1.0,
            dasharray: None,
        },
    });
    if sub.label.trim().is_empty() {
        return;
    }
    let line_height = line_height(&sub.label_block, theme.font_size);
    let top = sub.y + pad + EDGE_LABEL_PAD;
    for (i, line) in sub.label_block.lines.iter().enumerate() {
        out.push(Primitive::Text {
            x: sub.x + pad + sub.width / 2.0,
            y: top + line_height * (i as f32 + 0.5),
            text: line.clone(),
            anchor: TextAnchor::Middle,
            baseline: Baseline::Middle,
            font_family: theme.font_family.clone(),
            font_size: theme.font_size,
            font_weight: None,
            fill: theme.text_color.clone(),
        });
    }
}

fn edge_paint(edge: &EdgeLayout, theme: &Theme) -> Paint {
    let over = &edge.override_style;
    let default_width = match edge.style {
        EdgeStyle::Thick => THICK_STROKE_WIDTH,
        EdgeStyle::Solid | EdgeStyle::Dotted => NODE_STROKE_WIDTH,
    };
    let default_dash = (edge.style == EdgeStyle::Dotted).then(|| DOTTED_DASH.to_string());
    Paint {
        fill: None,
        stroke: Some(over.stroke.clone().unwrap_or_else(|| theme.line_color.clone())),
        stroke_width: over.stroke_width.unwrap_or(default_width),
        dasharray: over.dasharray.clone().or(default_dash),
    }
}

fn push_edge(out: &mut Vec<Primitive>, edge: &EdgeLayout, theme: &Theme, pad: f32) {
    if edge.points.len() < 2 {
        return;
    }
    let segments = offset_segments(edge.segments(), pad);
    out.push(Primitive::Path {
        d: geometry::to_svg_path(&segments),
        paint: edge_paint(edge, theme),
        marker_start: edge.start_marker,
        marker_end: edge.end_marker,
    });
}

fn push_edge_label(out: &mut Vec<Primitive>, edge: &EdgeLayout, theme: &Theme, pad: f32) {
    let (Some(label), Some(anchor)) = (edge.label.as_ref(), edge.label_anchor) else {
        return;
    };
    let (cx, cy) = (anchor.0 + pad, anchor.1 + pad);
    out.push(Primitive::Rect {
        x: cx - label.width / 2.0 - EDGE_LABEL_PAD,
        y: cy - label.height / 2.0 - EDGE_LABEL_PAD,
        width: label.width + EDGE_LABEL_PAD * 2.0,
        height: label.height + EDGE_LABEL_PAD * 2.0,
        radius: 2.0,
        paint: Paint {
            fill: Some(theme.edge_label_background.clone()),
            ..Paint::default()
        },
    });
    let fill = edge
        .override_style
        .label_color
        .clone()
        .unwrap_or_else(|| theme.text_color.clone());
    push_lines(out, label, (cx, cy), theme.font_size, &theme.font_family, None, &fill);
}

fn push_node(out: &mut Vec<Primitive>, node: &NodeLayout, theme: &Theme, pad: f32) {
    let style = &node.style;
    let paint = Paint {
        fill: Some(style.fill.clone().unwrap_or_else(|| theme.primary_color.clone())),
        stroke: Some(
            style
                .stroke
                .clone()
                .unwrap_or_else(|| theme.primary_border_color.clone()),
        ),
        stroke_width: style.stroke_width.unwrap_or(NODE_STROKE_WIDTH),
        dasharray: style.stroke_dasharray.clone(),
    };
    let (x, y) = (node.x + pad, node.y + pad);

    match node.shape {
        NodeShape::Rectangle => out.push(Primitive::Rect {
            x,
            y,
            width: node.width,
            height: node.height,
            radius: 0.0,
            paint,
        }),
        shape => {
            let outline = geometry::shape_outline(shape, x, y, node.width, node.height);
            out.push(Primitive::Path {
                d: format!("{}Z", geometry::to_svg_path(&outline)),
                paint: paint.clone(),
                marker_start: None,
                marker_end: None,
            });
            push_shape_details(out, shape, (x, y, node.width, node.height), &paint);
        }
    }

    let font_size = style.font_size.unwrap_or(theme.font_size);
    let family = style.font_family.as_deref().unwrap_or(&theme.font_family);
    let fill = style
        .text_color
        .clone()
        .unwrap_or_else(|| theme.primary_text_color.clone());
    push_lines(
        out,
        &node.label,
        (x + node.width / 2.0, y + node.height / 2.0),
        font_size,
        family,
        style.font_weight.clone(),
        &fill,
    );
}

/// Strokes that are part of a shape's look but not of its outline.
fn push_shape_details(
    out: &mut Vec<Primitive>,
    shape: NodeShape,
    (x, y, w, h): (f32, f32, f32, f32),
    paint: &Paint,
) {
    let stroke_only = Paint {
        fill: None,
        ..paint.clone()
    };
    let d = match shape {
        NodeShape::Subroutine => {
            let inset = (w * 0.08).min(8.0);
            format!(
                "M{:.2},{:.2} L{:.2},{:.2} M{:.2},{:.2} L{:.2},{:.2}",
                x + inset,
                y,
                x + inset,
                y + h,
                x + w - inset,
                y,
                x + w - inset,
                y + h
            )
        }
        NodeShape::DoubleCircle => {
            let inner = geometry::ellipse(
                x + w / 2.0,
                y + h / 2.0,
                (w / 2.0 - DOUBLE_CIRCLE_GAP).max(1.0),
                (h / 2.0 - DOUBLE_CIRCLE_GAP).max(1.0),
            );
            geometry::to_svg_path(&inner)
        }
        NodeShape::Cylinder => {
            let ry = (h * 0.1).min(w / 2.0);
            // Front half of the lid.
            let lid = geometry::ellipse(x + w / 2.0, y + ry, w / 2.0, ry);
            let front: Vec<PathSegment> = lid.into_iter().take(2).collect();
            geometry::to_svg_path(&front)
        }
        _ => return,
    };
    out.push(Primitive::Path {
        d,
        paint: stroke_only,
        marker_start: None,
        marker_end: None,
    });
}

fn line_height(block: &TextBlock, font_size: f32) -> f32 {
    if block.lines.is_empty() {
        font_size
    } else {
        block.height / block.lines.len() as f32
    }
}

fn push_lines(
    out: &mut Vec<Primitive>,
    block: &TextBlock,
    (cx, cy): (f32, f32),
    font_size: f32,
    family: &str,
    weight: Option<String>,
    fill: &str,
) {
    let step = line_height(block, font_size);
    let top = cy - block.height / 2.0;
    for (i, line) in block.lines.iter().enumerate() {
        if line.is_empty() {
            continue;
        }
        out.push(Primitive::Text {
            x: cx,
            y: top + step * (i as f32 + 0.5),
            text: line.clone(),
            anchor: TextAnchor::Middle,
            baseline: Baseline::Middle,
            font_family: family.to_string(),
            font_size,
            font_weight: weight.clone(),
            fill: fill.to_string(),
        });
    }
}

fn marker_id(marker: EdgeMarker) -> &'static str {
    match marker {
        EdgeMarker::Arrow => "marker-arrow",
        EdgeMarker::Circle => "marker-circle",
        EdgeMarker::Cross => "marker-cross",
    }
}

fn write_paint(svg: &mut String, paint: &Paint) {
    let _ = write!(
        svg,
        " fill=\"{}\"",
        escape_xml(paint.fill.as_deref().unwrap_or("none"))
    );
    if let Some(stroke) = &paint.stroke {
        let _ = write!(
            svg,
            " stroke=\"{}\" stroke-width=\"{:.2}\"",
            escape_xml(stroke),
            paint.stroke_width
        );
    }
    if let Some(dash) = &paint.dasharray {
        let _ = write!(svg, " stroke-dasharray=\"{}\"", escape_xml(dash));
    }
}

fn write_defs(svg: &mut String, color: &str) {
    let color = escape_xml(color);
    svg.push_str("<defs>");
    let _ = write!(
        svg,
        "<marker id=\"marker-arrow\" viewBox=\"0 0 10 10\" refX=\"9\" refY=\"5\" markerWidth=\"8\" markerHeight=\"8\" orient=\"auto-start-reverse\"><path d=\"M0,0 L10,5 L0,10 z\" fill=\"{color}\"/></marker>"
    );
    let _ = write!(
        svg,
        "<marker id=\"marker-circle\" viewBox=\"0 0 10 10\" refX=\"5\" refY=\"5\" markerWidth=\"8\" markerHeight=\"8\" orient=\"auto\"><circle cx=\"5\" cy=\"5\" r=\"4\" fill=\"{color}\"/></marker>"
    );
    let _ = write!(
        svg,
        "<marker id=\"marker-cross\" viewBox=\"0 0 10 10\" refX=\"5\" refY=\"5\" markerWidth=\"9\" markerHeight=\"9\" orient=\"auto\"><path d=\"M1,1 L9,9 M9,1 L1,9\" stroke=\"{color}\" stroke-width=\"1.5\"/></marker>"
    );
    svg.push_str("</defs>");
}

pub fn document_to_svg(doc: &VectorDocument) -> String {
    let mut svg = String::new();
    let (w, h) = (doc.width, doc.height);
    let _ = write!(
        svg,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w:.2}\" height=\"{h:.2}\" viewBox=\"0 0 {w:.2} {h:.2}\">"
    );
    write_defs(&mut svg, &doc.line_color);
    let _ = write!(
        svg,
        "<rect width=\"100%\" height=\"100%\" fill=\"{}\"/>",
        escape_xml(&doc.background)
    );

    for element in &doc.elements {
        match element {
            Primitive::Rect {
                x,
                y,
                width,
                height,
                radius,
                paint,
            } => {
                let _ = write!(
                    svg,
                    "<rect x=\"{x:.2}\" y=\"{y:.2}\" width=\"{width:.2}\" height=\"{height:.2}\""
                );
                if *radius > 0.0 {
                    let _ = write!(svg, " rx=\"{radius:.2}\" ry=\"{radius:.2}\"");
                }
                write_paint(&mut svg, paint);
                svg.push_str("/>");
            }
            Primitive::Path {
                d,
                paint,
                marker_start,
                marker_end,
            } => {
                let _ = write!(svg, "<path d=\"{}\"", d.trim());
                write_paint(&mut svg, paint);
                if let Some(marker) = marker_start {
                    let _ = write!(svg, " marker-start=\"url(#{})\"", marker_id(*marker));
                }
                if let Some(marker) = marker_end {
                    let _ = write!(svg, " marker-end=\"url(#{})\"", marker_id(*marker));
                }
                svg.push_str("/>");
            }
            Primitive::Text {
                x,
                y,
                text,
                anchor,
                baseline,
                font_family,
                font_size,
                font_weight,
                fill,
            } => {
                let anchor = match anchor {
                    TextAnchor::Start => "start",
                    TextAnchor::Middle => "middle",
                    TextAnchor::End => "end",
                };
                let baseline = match baseline {
                    Baseline::Alphabetic => "alphabetic",
                    Baseline::Middle => "central",
                    Baseline::Hanging => "hanging",
                };
                let _ = write!(
                    svg,
                    "<text x=\"{x:.2}\" y=\"{y:.2}\" text-anchor=\"{anchor}\" dominant-baseline=\"{baseline}\" font-family=\"{}\" font-size=\"{font_size}\" fill=\"{}\"",
                    escape_xml(font_family),
                    escape_xml(fill)
                );
                if let Some(weight) = font_weight {
                    let _ = write!(svg, " font-weight=\"{}\"", escape_xml(weight));
                }
                let _ = write!(svg, ">{}</text>", escape_xml(text));
            }
        }
    }

    svg.push_str("</svg>");
    svg
}

pub fn render_svg(layout: &Layout, theme: &Theme, config: &RenderConfig) -> String {
    document_to_svg(&render_document(layout, theme, config))
}

pub fn write_text_output(contents: &str, output: Option<&Path>) -> Result<(), Error> {
    match output {
        Some(path) => std::fs::write(path, contents)?,
        None => print!("{contents}"),
    }
    Ok(())
}

#[cfg(feature = "png")]
pub fn svg_to_png(svg: &str, theme: &Theme) -> Result<Vec<u8>, Error> {
    let mut opt = usvg::Options {
        font_family: theme
            .font_family
            .split(',')
            .next()
            .map(|f| f.trim().trim_matches('"').to_string())
            .unwrap_or_else(|| "sans-serif".to_string()),
        ..usvg::Options::default()
    };
    opt.fontdb_mut().load_system_fonts();

    let tree = usvg::Tree::from_str(svg, &opt).map_err(|err| Error::Raster(err.to_string()))?;
    let size = tree.size().to_int_size();
    let mut pixmap = resvg::tiny_skia::Pixmap::new(size.width(), size.height())
        .ok_or_else(|| Error::Raster("failed to allocate pixmap".to_string()))?;
    resvg::render(
        &tree,
        resvg::tiny_skia::Transform::default(),
        &mut pixmap.as_mut(),
    );
    pixmap
        .encode_png()
        .map_err(|err| Error::Raster(err.to_string()))
}

#[cfg(feature = "png")]
pub fn write_output_png(svg: &str, output: &Path, theme: &Theme) -> Result<(), Error> {
    let png = svg_to_png(svg, theme)?;
    std::fs::write(output, png)?;
    Ok(())
}

fn escape_xml(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
