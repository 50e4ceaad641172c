use serde::{Deserialize, Serialize};

pub const THEME_NAMES: [&str; 7] = [
    "default",
    "dark",
    "forest",
    "neutral",
    "base",
    "mermaid",
    "mermaid-dark",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub font_family: String,
    pub font_size: f32,
    pub primary_color: String,
    pub primary_text_color: String,
    pub primary_border_color: String,
    pub line_color: String,
    pub secondary_color: String,
    pub tertiary_color: String,
    pub text_color: String,
    pub edge_label_background: String,
    pub cluster_background: String,
    pub cluster_border: String,
    pub background: String,
}

impl Default for Theme {
    fn default() -> Self {
        Self::modern()
    }
}

impl Theme {
    /// Looks up a preset by name. Unknown names yield `None`; callers fall back
    /// to [`Theme::default`].
    pub fn by_name(name: &str) -> Option<Self> {
        let theme = match name.trim().to_ascii_lowercase().as_str() {
            "default" | "modern" => Self::modern(),
            "dark" => Self::dark(),
            "forest" => Self::forest(),
            "neutral" => Self::neutral(),
            "base" => Self::base(),
            "mermaid" => Self::mermaid_default(),
            "mermaid-dark" => Self::mermaid_dark(),
            _ => return None,
        };
        Some(theme)
    }

    pub fn mermaid_default() -> Self {
        Self {
            font_family: "\"trebuchet ms\", verdana, arial, sans-serif".to_string(),
            font_size: 16.0,
            primary_color: "#ECECFF".to_string(),
            primary_text_color: "#333333".to_string(),
            primary_border_color: "#9370DB".to_string(),
            line_color: "#333333".to_string(),
            secondary_color: "#FFFFDE".to_string(),
            tertiary_color: "#ECECFF".to_string(),
            text_color: "#333333".to_string(),
            edge_label_background: "#E8E8E8".to_string(),
            cluster_background: "#FFFFDE".to_string(),
            cluster_border: "#AAAA33".to_string(),
            background: "#FFFFFF".to_string(),
        }
    }

    pub fn mermaid_dark() -> Self {
        Self {
            primary_color: "#1F2020".to_string(),
            primary_text_color: "#E0DFDF".to_string(),
            primary_border_color: "#CCCCCC".to_string(),
            line_color: "#D3D3D3".to_string(),
            secondary_color: "#3A3A3A".to_string(),
            tertiary_color: "#333333".to_string(),
            text_color: "#CCCCCC".to_string(),
            edge_label_background: "#585858".to_string(),
            cluster_background: "#474949".to_string(),
            cluster_border: "#888888".to_string(),
            background: "#333333".to_string(),
            ..Self::mermaid_default()
        }
    }

    pub fn modern() -> Self {
        Self {
            font_family: "Inter, Segoe UI, system-ui, -apple-system, sans-serif".to_string(),
            font_size: 13.0,
            primary_color: "#F8FAFF".to_string(),
            primary_text_color: "#1C2430".to_string(),
            primary_border_color: "#C7D2E5".to_string(),
            line_color: "#7A8AA6".to_string(),
            secondary_color: "#EEF2F8".to_string(),
            tertiary_color: "#FFFFFF".to_string(),
            text_color: "#1C2430".to_string(),
            edge_label_background: "#FFFFFF".to_string(),
            cluster_background: "#F7FAFF".to_string(),
            cluster_border: "#D7E0F0".to_string(),
            background: "#FFFFFF".to_string(),
        }
    }

    pub fn dark() -> Self {
        Self {
            primary_color: "#1E2533".to_string(),
            primary_text_color: "#E6EAF2".to_string(),
            primary_border_color: "#4A5870".to_string(),
            line_color: "#8FA0BF".to_string(),
            secondary_color: "#262E3D".to_string(),
            tertiary_color: "#151A23".to_string(),
            text_color: "#E6EAF2".to_string(),
            edge_label_background: "#151A23".to_string(),
            cluster_background: "#19202B".to_string(),
            cluster_border: "#3A465A".to_string(),
            background: "#0F131A".to_string(),
            ..Self::modern()
        }
    }

    pub fn forest() -> Self {
        Self {
            primary_color: "#CDE498".to_string(),
            primary_text_color: "#000000".to_string(),
            primary_border_color: "#13540C".to_string(),
            line_color: "#008000".to_string(),
            secondary_color: "#CDFFB2".to_string(),
            tertiary_color: "#F4F4F4".to_string(),
            text_color: "#000000".to_string(),
            edge_label_background: "#E8E8E8".to_string(),
            cluster_background: "#CDFFB2".to_string(),
            cluster_border: "#6EAA49".to_string(),
            ..Self::mermaid_default()
        }
    }

    pub fn neutral() -> Self {
        Self {
            primary_color: "#EEEEEE".to_string(),
            primary_text_color: "#111111".to_string(),
            primary_border_color: "#999999".to_string(),
            line_color: "#666666".to_string(),
            secondary_color: "#F4F4F4".to_string(),
            tertiary_color: "#FFFFFF".to_string(),
            text_color: "#333333".to_string(),
            edge_label_background: "#FFFFFF".to_string(),
            cluster_background: "#F4F4F4".to_string(),
            cluster_border: "#999999".to_string(),
            ..Self::mermaid_default()
        }
    }

    pub fn base() -> Self {
        Self {
            primary_color: "#FFF4DD".to_string(),
            primary_text_color: "#333333".to_string(),
            primary_border_color: "#F4D29B".to_string(),
            line_color: "#333333".to_string(),
            secondary_color: "#FFFFDE".to_string(),
            tertiary_color: "#FFF4DD".to_string(),
            text_color: "#333333".to_string(),
            edge_label_background: "#FFF4DD".to_string(),
            cluster_background: "#FFFDF5".to_string(),
            cluster_border: "#DCC48E".to_string(),
            ..Self::mermaid_default()
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ColorOverrides) {
        let slots: [(&Option<String>, &mut String); 8] = [
            (&overrides.background, &mut self.background),
            (&overrides.text, &mut self.primary_text_color),
            (&overrides.node_fill, &mut self.primary_color),
            (&overrides.node_stroke, &mut self.primary_border_color),
            (&overrides.edge_stroke, &mut self.line_color),
            (&overrides.edge_label_background, &mut self.edge_label_background),
            (&overrides.subgraph_fill, &mut self.cluster_background),
            (&overrides.subgraph_stroke, &mut self.cluster_border),
        ];
        for (value, slot) in slots {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
        if let Some(text) = &overrides.text {
            self.text_color = text.clone();
        }
    }
}

/// Explicit colors that win over whichever preset was selected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColorOverrides {
    pub background: Option<String>,
    pub text: Option<String>,
    pub node_fill: Option<String>,
    pub node_stroke: Option<String>,
    pub edge_stroke: Option<String>,
    pub edge_label_background: Option<String>,
    pub subgraph_fill: Option<String>,
    pub subgraph_stroke: Option<String>,
}

impl ColorOverrides {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_name_resolves() {
        for name in THEME_NAMES {
            assert!(Theme::by_name(name).is_some(), "{name}");
        }
        assert!(Theme::by_name("solarized").is_none());
        assert_eq!(Theme::by_name(" Forest "), Some(Theme::forest()));
    }

    #[test]
    fn dark_presets_have_dark_backgrounds() {
        assert_ne!(Theme::dark().background, Theme::modern().background);
        assert_eq!(Theme::mermaid_dark().background, "#333333");
    }

    #[test]
    fn overrides_take_precedence() {
        let mut theme = Theme::forest();
        let overrides = ColorOverrides {
            node_fill: Some("#123456".into()),
            text: Some("#010101".into()),
            ..Default::default()
        };
        theme.apply_overrides(&overrides);
        assert_eq!(theme.primary_color, "#123456");
        assert_eq!(theme.primary_text_color, "#010101");
        assert_eq!(theme.text_color, "#010101");
        assert_eq!(theme.line_color, Theme::forest().line_color);
    }
}
