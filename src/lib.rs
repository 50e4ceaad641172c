//! Layered layout for Mermaid-style flowcharts: parse the text, position
//! nodes/edges/subgraphs with a Sugiyama pipeline, route edges orthogonally
//! and hand the positioned model to any renderer.

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod geometry;
pub mod ir;
pub mod layout;
pub mod layout_dump;
pub mod parser;
pub mod render;
pub mod text_metrics;
pub mod theme;

#[cfg(feature = "cli")]
pub use cli::run;
pub use config::{Config, LayoutConfig, RenderOptions};
pub use error::{Error, LayoutError, ParseError};
pub use layout::{compute_layout, Layout};
pub use parser::{parse_mermaid, ParseOutput};
pub use render::{render_document, render_svg, VectorDocument};
pub use text_metrics::{HeuristicMeasurer, TextMeasurer};
pub use theme::Theme;

use tracing::warn;

/// Parses `text` and resolves the config: defaults, then the diagram's init
/// directive, then `options`.
fn prepare(text: &str, options: RenderOptions) -> Result<(ParseOutput, Config), Error> {
    let parsed = parse_mermaid(text)?;
    for warning in &parsed.warnings {
        warn!(line = warning.line, "{}", warning.message);
    }
    let mut config = Config::default();
    if let Some(init) = parsed.init_config.as_ref() {
        config = config::merge_init_config(config, init);
    }
    options.apply_to(&mut config);
    Ok((parsed, config))
}

/// One-shot text-to-layout using the heuristic text measurer.
pub fn layout_with_options(text: &str, options: RenderOptions) -> Result<Layout, Error> {
    let (parsed, config) = prepare(text, options)?;
    Ok(compute_layout(
        &parsed.graph,
        &config.theme,
        &config.layout,
        &HeuristicMeasurer,
    )?)
}

/// One-shot text-to-SVG using the heuristic text measurer.
pub fn render_with_options(text: &str, options: RenderOptions) -> Result<String, Error> {
    let (parsed, config) = prepare(text, options)?;
    let layout = compute_layout(
        &parsed.graph,
        &config.theme,
        &config.layout,
        &HeuristicMeasurer,
    )?;
    Ok(render_svg(&layout, &config.theme, &config.render))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_override_the_diagram() {
        let layout = layout_with_options(
            "flowchart TD\nA-->B",
            RenderOptions {
                direction: Some(ir::Direction::LeftRight),
                ..RenderOptions::default()
            },
        )
        .unwrap();
        assert_eq!(layout.direction, ir::Direction::LeftRight);
        assert!(layout.nodes["B"].x > layout.nodes["A"].x);
    }

    #[test]
    fn size_guard_surfaces_as_layout_error() {
        let err = layout_with_options(
            "flowchart TD\nA-->B\nB-->C",
            RenderOptions {
                max_edges: Some(1),
                ..RenderOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Layout(LayoutError::TooComplex { edges: 2, .. })));
    }

    #[test]
    fn render_helper_applies_color_overrides() {
        let svg = render_with_options(
            "flowchart LR\nA-->B",
            RenderOptions {
                colors: theme::ColorOverrides {
                    node_fill: Some("#123456".into()),
                    ..Default::default()
                },
                ..RenderOptions::default()
            },
        )
        .unwrap();
        assert!(svg.contains("#123456"));
    }

    #[test]
    fn missing_header_is_a_parse_error() {
        let err = render_with_options("A-->B", RenderOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Parse(ParseError::MissingHeader { .. })));
    }
}
