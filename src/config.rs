use crate::error::Error;
use crate::ir::Direction;
use crate::theme::{ColorOverrides, Theme};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RankStrategy {
    LongestPath,
    TightTree,
    #[default]
    NetworkSimplex,
}

impl RankStrategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "longest-path" => Some(Self::LongestPath),
            "tight-tree" => Some(Self::TightTree),
            "network-simplex" => Some(Self::NetworkSimplex),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    pub node_spacing: f32,
    pub rank_spacing: f32,
    pub edge_spacing: f32,
    pub node_padding_x: f32,
    pub node_padding_y: f32,
    pub subgraph_padding: f32,
    pub subgraph_title_padding: f32,
    pub label_line_height: f32,
    pub max_label_width_chars: usize,
    pub rank_strategy: RankStrategy,
    pub order_passes: usize,
    pub coordinate_sweeps: usize,
    pub network_simplex_max_iterations: usize,
    pub curved_edges: bool,
    pub arrow_offset: f32,
    pub port_pad_ratio: f32,
    pub port_pad_min: f32,
    pub port_pad_max: f32,
    pub max_nodes: usize,
    pub max_edges: usize,
    pub engine: String,
    pub direction_override: Option<Direction>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            node_spacing: 50.0,
            rank_spacing: 50.0,
            edge_spacing: 10.0,
            node_padding_x: 30.0,
            node_padding_y: 15.0,
            subgraph_padding: 16.0,
            subgraph_title_padding: 24.0,
            label_line_height: 1.5,
            max_label_width_chars: 22,
            rank_strategy: RankStrategy::default(),
            order_passes: 24,
            coordinate_sweeps: 4,
            network_simplex_max_iterations: 500,
            curved_edges: false,
            arrow_offset: 4.0,
            port_pad_ratio: 0.2,
            port_pad_min: 4.0,
            port_pad_max: 12.0,
            max_nodes: 2_000,
            max_edges: 5_000,
            engine: "layered".to_string(),
            direction_override: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    pub padding: f32,
    pub background: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            padding: 8.0,
            background: "#FFFFFF".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub theme: Theme,
    pub layout: LayoutConfig,
    pub render: RenderConfig,
}

impl Default for Config {
    fn default() -> Self {
        let theme = Theme::default();
        let render = RenderConfig {
            background: theme.background.clone(),
            ..Default::default()
        };
        Self {
            theme,
            layout: LayoutConfig::default(),
            render,
        }
    }
}

impl Config {
    fn set_theme(&mut self, theme: Theme) {
        self.render.background = theme.background.clone();
        self.theme = theme;
    }

    fn apply_colors(&mut self, colors: &ColorOverrides) {
        self.theme.apply_overrides(colors);
        if let Some(background) = &colors.background {
            self.render.background = background.clone();
        }
    }
}

/// Caller-facing knobs for the one-shot helpers. Every field is optional and
/// only overrides the defaults it names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderOptions {
    pub direction: Option<Direction>,
    pub node_spacing: Option<f32>,
    pub rank_spacing: Option<f32>,
    pub edge_spacing: Option<f32>,
    pub font_family: Option<String>,
    pub font_size: Option<f32>,
    pub padding: Option<f32>,
    pub curved: bool,
    pub theme: Option<String>,
    pub colors: ColorOverrides,
    pub max_nodes: Option<usize>,
    pub max_edges: Option<usize>,
}

impl RenderOptions {
    pub fn into_config(self) -> Config {
        let mut config = Config::default();
        self.apply_to(&mut config);
        config
    }

    /// Layers these options over an existing config (e.g. one loaded from disk).
    pub fn apply_to(self, config: &mut Config) {
        if let Some(name) = self.theme.as_deref() {
            match Theme::by_name(name) {
                Some(theme) => config.set_theme(theme),
                None => warn!(theme = name, "unknown theme, keeping current"),
            }
        }
        if let Some(family) = self.font_family {
            config.theme.font_family = family;
        }
        if let Some(size) = self.font_size {
            config.theme.font_size = size;
        }
        config.apply_colors(&self.colors);

        let layout = &mut config.layout;
        if let Some(direction) = self.direction {
            layout.direction_override = Some(direction);
        }
        if let Some(v) = self.node_spacing {
            layout.node_spacing = v;
        }
        if let Some(v) = self.rank_spacing {
            layout.rank_spacing = v;
        }
        if let Some(v) = self.edge_spacing {
            layout.edge_spacing = v;
        }
        if self.curved {
            layout.curved_edges = true;
        }
        if let Some(v) = self.max_nodes {
            layout.max_nodes = v;
        }
        if let Some(v) = self.max_edges {
            layout.max_edges = v;
        }
        if let Some(v) = self.padding {
            config.render.padding = v;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThemeVariables {
    font_family: Option<String>,
    font_size: Option<NumberOrString>,
    primary_color: Option<String>,
    primary_text_color: Option<String>,
    primary_border_color: Option<String>,
    line_color: Option<String>,
    secondary_color: Option<String>,
    tertiary_color: Option<String>,
    text_color: Option<String>,
    edge_label_background: Option<String>,
    cluster_bkg: Option<String>,
    cluster_border: Option<String>,
    background: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f32),
    String(String),
}

impl NumberOrString {
    fn as_f32(&self) -> Option<f32> {
        match self {
            NumberOrString::Number(val) => Some(*val),
            NumberOrString::String(val) => val.trim().trim_end_matches("px").parse::<f32>().ok(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlowchartConfig {
    node_spacing: Option<f32>,
    rank_spacing: Option<f32>,
    edge_spacing: Option<f32>,
    padding: Option<f32>,
    curve: Option<String>,
    rank_strategy: Option<String>,
    ranker: Option<String>,
    order_passes: Option<usize>,
    layout_engine: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    theme: Option<String>,
    theme_variables: Option<ThemeVariables>,
    flowchart: Option<FlowchartConfig>,
    colors: Option<ColorOverrides>,
    max_nodes: Option<usize>,
    max_edges: Option<usize>,
}

impl ConfigFile {
    fn apply(self, config: &mut Config) {
        if let Some(name) = self.theme.as_deref() {
            match Theme::by_name(name) {
                Some(theme) => config.set_theme(theme),
                None => warn!(theme = name, "unknown theme in config, ignoring"),
            }
        }

        if let Some(vars) = self.theme_variables {
            let theme = &mut config.theme;
            let slots = [
                (vars.primary_color, &mut theme.primary_color),
                (vars.primary_text_color, &mut theme.primary_text_color),
                (vars.primary_border_color, &mut theme.primary_border_color),
                (vars.line_color, &mut theme.line_color),
                (vars.secondary_color, &mut theme.secondary_color),
                (vars.tertiary_color, &mut theme.tertiary_color),
                (vars.text_color, &mut theme.text_color),
                (vars.edge_label_background, &mut theme.edge_label_background),
                (vars.cluster_bkg, &mut theme.cluster_background),
                (vars.cluster_border, &mut theme.cluster_border),
                (vars.font_family, &mut theme.font_family),
            ];
            for (value, slot) in slots {
                if let Some(value) = value {
                    *slot = value;
                }
            }
            if let Some(size) = vars.font_size.as_ref().and_then(NumberOrString::as_f32) {
                theme.font_size = size;
            }
            if let Some(background) = vars.background {
                theme.background = background.clone();
                config.render.background = background;
            }
        }

        if let Some(flow) = self.flowchart {
            let layout = &mut config.layout;
            if let Some(v) = flow.node_spacing {
                layout.node_spacing = v;
            }
            if let Some(v) = flow.rank_spacing {
                layout.rank_spacing = v;
            }
            if let Some(v) = flow.edge_spacing {
                layout.edge_spacing = v;
            }
            if let Some(v) = flow.order_passes {
                layout.order_passes = v.max(1);
            }
            if let Some(curve) = flow.curve.as_deref() {
                layout.curved_edges = curve_is_smooth(curve);
            }
            if let Some(name) = flow.rank_strategy.as_deref().or(flow.ranker.as_deref()) {
                match RankStrategy::from_name(name) {
                    Some(strategy) => layout.rank_strategy = strategy,
                    None => warn!(ranker = name, "unknown rank strategy, ignoring"),
                }
            }
            if let Some(engine) = flow.layout_engine {
                layout.engine = engine;
            }
            if let Some(v) = flow.padding {
                config.render.padding = v;
            }
        }

        if let Some(colors) = self.colors {
            config.apply_colors(&colors);
        }
        if let Some(v) = self.max_nodes {
            config.layout.max_nodes = v;
        }
        if let Some(v) = self.max_edges {
            config.layout.max_edges = v;
        }
    }
}

fn curve_is_smooth(curve: &str) -> bool {
    !matches!(
        curve.trim().to_ascii_lowercase().as_str(),
        "linear" | "step" | "stepbefore" | "stepafter"
    )
}

pub fn load_config(path: Option<&Path>) -> Result<Config, Error> {
    let mut config = Config::default();
    let Some(path) = path else {
        return Ok(config);
    };

    let contents = std::fs::read_to_string(path)?;
    let parsed: ConfigFile = serde_json::from_str(&contents)?;
    parsed.apply(&mut config);
    Ok(config)
}

/// Merges a `%%{init: ...}%%` payload over `config`. Malformed payloads are
/// logged and ignored.
pub fn merge_init_config(mut config: Config, init: &serde_json::Value) -> Config {
    match ConfigFile::deserialize(init) {
        Ok(parsed) => parsed.apply(&mut config),
        Err(err) => warn!(error = %err, "ignoring malformed init directive"),
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_resolve_into_config() {
        let options = RenderOptions {
            direction: Some(Direction::LeftRight),
            node_spacing: Some(80.0),
            theme: Some("forest".into()),
            colors: ColorOverrides {
                background: Some("#000000".into()),
                ..Default::default()
            },
            max_nodes: Some(10),
            curved: true,
            ..Default::default()
        };
        let config = options.into_config();
        assert_eq!(config.layout.direction_override, Some(Direction::LeftRight));
        assert_eq!(config.layout.node_spacing, 80.0);
        assert_eq!(config.layout.max_nodes, 10);
        assert!(config.layout.curved_edges);
        assert_eq!(config.theme.primary_color, Theme::forest().primary_color);
        assert_eq!(config.render.background, "#000000");
    }

    #[test]
    fn init_directive_merges_flowchart_and_theme() {
        let init = serde_json::json!({
            "theme": "dark",
            "themeVariables": { "primaryColor": "#ff0000", "fontSize": "18px" },
            "flowchart": { "nodeSpacing": 20, "rankSpacing": 30, "curve": "basis" }
        });
        let config = merge_init_config(Config::default(), &init);
        assert_eq!(config.theme.primary_color, "#ff0000");
        assert_eq!(config.theme.font_size, 18.0);
        assert_eq!(config.theme.background, Theme::dark().background);
        assert_eq!(config.layout.node_spacing, 20.0);
        assert_eq!(config.layout.rank_spacing, 30.0);
        assert!(config.layout.curved_edges);
    }

    #[test]
    fn malformed_init_is_ignored() {
        let init = serde_json::json!({ "flowchart": { "nodeSpacing": "wide" } });
        let config = merge_init_config(Config::default(), &init);
        assert_eq!(config.layout.node_spacing, LayoutConfig::default().node_spacing);
    }

    #[test]
    fn load_config_reads_camel_case_file() {
        let path = std::env::temp_dir().join(format!("mmle-config-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"theme":"neutral","flowchart":{"ranker":"longest-path","curve":"linear"},"maxEdges":7}"#,
        )
        .unwrap();
        let config = load_config(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(config.layout.rank_strategy, RankStrategy::LongestPath);
        assert_eq!(config.layout.max_edges, 7);
        assert!(!config.layout.curved_edges);
        assert_eq!(config.theme.primary_color, Theme::neutral().primary_color);
    }

    #[test]
    fn missing_path_yields_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.layout.engine, "layered");
    }
}
