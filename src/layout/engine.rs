use tracing::debug;

use crate::config::{LayoutConfig, RankStrategy};
use crate::error::LayoutError;
use crate::ir::Graph;
use crate::text_metrics::TextMeasurer;
use crate::theme::Theme;

use super::types::Layout;

/// A named layout algorithm. Engines are stateless; every call builds its own
/// scratch graph.
pub trait LayoutEngine: Sync {
    fn name(&self) -> &'static str;

    fn layout(
        &self,
        graph: &Graph,
        theme: &Theme,
        config: &LayoutConfig,
        measurer: &dyn TextMeasurer,
    ) -> Result<Layout, LayoutError>;
}

/// The layered pipeline with whatever rank strategy the config names.
struct Layered;

impl LayoutEngine for Layered {
    fn name(&self) -> &'static str {
        "layered"
    }

    fn layout(
        &self,
        graph: &Graph,
        theme: &Theme,
        config: &LayoutConfig,
        measurer: &dyn TextMeasurer,
    ) -> Result<Layout, LayoutError> {
        super::layered_layout(graph, theme, config, measurer)
    }
}

/// Dagre-flavoured preset: the layered pipeline pinned to network simplex.
struct Dagre;

impl LayoutEngine for Dagre {
    fn name(&self) -> &'static str {
        "dagre"
    }

    fn layout(
        &self,
        graph: &Graph,
        theme: &Theme,
        config: &LayoutConfig,
        measurer: &dyn TextMeasurer,
    ) -> Result<Layout, LayoutError> {
        let config = LayoutConfig {
            rank_strategy: RankStrategy::NetworkSimplex,
            ..config.clone()
        };
        super::layered_layout(graph, theme, &config, measurer)
    }
}

static LAYERED: Layered = Layered;
static DAGRE: Dagre = Dagre;

static REGISTRY: &[(&str, &dyn LayoutEngine)] = &[
    ("layered", &LAYERED),
    ("sugiyama", &LAYERED),
    ("dagre", &DAGRE),
];

pub fn engine_by_name(name: &str) -> Option<&'static dyn LayoutEngine> {
    let name = name.trim().to_ascii_lowercase();
    REGISTRY
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, engine)| *engine)
}

pub fn engine_names() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(key, _)| *key)
}

/// Lays out `graph` with the engine named in `config.engine`.
pub fn compute_layout(
    graph: &Graph,
    theme: &Theme,
    config: &LayoutConfig,
    measurer: &dyn TextMeasurer,
) -> Result<Layout, LayoutError> {
    let engine = engine_by_name(&config.engine)
        .ok_or_else(|| LayoutError::UnknownEngine(config.engine.clone()))?;
    debug!(engine = engine.name(), "computing layout");
    engine.layout(graph, theme, config, measurer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_mermaid;
    use crate::text_metrics::HeuristicMeasurer;

    #[test]
    fn registry_resolves_aliases() {
        assert_eq!(engine_by_name("sugiyama").map(|e| e.name()), Some("layered"));
        assert_eq!(engine_by_name(" Dagre ").map(|e| e.name()), Some("dagre"));
        assert!(engine_by_name("elk").is_none());
        assert_eq!(engine_names().count(), 3);
    }

    #[test]
    fn unknown_engine_is_an_error() {
        let parsed = parse_mermaid("flowchart TD\nA-->B").unwrap();
        let config = LayoutConfig {
            engine: "force".into(),
            ..LayoutConfig::default()
        };
        let err = compute_layout(&parsed.graph, &Theme::default(), &config, &HeuristicMeasurer)
            .unwrap_err();
        assert_eq!(err, LayoutError::UnknownEngine("force".into()));
    }

    #[test]
    fn every_engine_lays_out_a_chain() {
        let parsed = parse_mermaid("flowchart TD\nA-->B\nB-->C").unwrap();
        for name in engine_names() {
            let config = LayoutConfig {
                engine: name.into(),
                ..LayoutConfig::default()
            };
            let layout =
                compute_layout(&parsed.graph, &Theme::default(), &config, &HeuristicMeasurer)
                    .unwrap();
            assert_eq!(layout.nodes.len(), 3, "{name}");
        }
    }
}
