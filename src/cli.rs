use crate::config::{load_config, merge_init_config, Config, RenderOptions};
use crate::ir::Direction;
use crate::layout::compute_layout;
use crate::layout_dump::{layout_to_json, write_layout_dump};
use crate::parser::parse_mermaid;
use crate::render::{render_svg, write_text_output};
use crate::text_metrics::{FontMeasurer, HeuristicMeasurer, TextMeasurer};
use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "mmle",
    version,
    about = "Layered layout engine for Mermaid-style flowcharts"
)]
pub struct Args {
    /// Input file (.mmd or .md) or '-' for stdin
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Output file. SVG and JSON go to stdout when omitted.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(short = 'e', long = "outputFormat", value_enum, default_value = "svg")]
    pub output_format: OutputFormat,

    /// Config JSON file (camelCase keys, Mermaid-like themeVariables)
    #[arg(short = 'c', long = "configFile")]
    pub config: Option<PathBuf>,

    /// Theme name (default, dark, forest, neutral, base, mermaid, mermaid-dark)
    #[arg(short = 't', long = "theme")]
    pub theme: Option<String>,

    /// Direction override (TB, TD, BT, LR, RL)
    #[arg(short = 'd', long = "direction", value_parser = parse_direction)]
    pub direction: Option<Direction>,

    /// Draw edges as smooth curves instead of orthogonal polylines
    #[arg(long = "curved")]
    pub curved: bool,

    /// Also write the positioned layout as JSON to this path
    #[arg(long = "dumpLayout")]
    pub dump_layout: Option<PathBuf>,

    /// More logging (-v info, -vv debug, -vvv trace). RUST_LOG wins when set.
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Svg,
    Json,
    Png,
}

impl OutputFormat {
    fn extension(self) -> &'static str {
        match self {
            OutputFormat::Svg => "svg",
            OutputFormat::Json => "json",
            OutputFormat::Png => "png",
        }
    }
}

fn parse_direction(value: &str) -> Result<Direction, String> {
    Direction::from_token(value)
        .ok_or_else(|| format!("invalid direction `{value}` (expected TB, TD, BT, LR or RL)"))
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

pub fn run() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let base_config = load_config(args.config.as_deref())
        .with_context(|| format!("loading config {:?}", args.config))?;
    let overrides = RenderOptions {
        direction: args.direction,
        theme: args.theme.clone(),
        curved: args.curved,
        ..RenderOptions::default()
    };

    let (input, is_markdown) = read_input(args.input.as_deref())?;
    let diagrams = if is_markdown {
        extract_mermaid_blocks(&input)
    } else {
        vec![input]
    };

    if diagrams.is_empty() {
        return Err(anyhow::anyhow!("No Mermaid diagrams found in input"));
    }

    if diagrams.len() == 1 {
        return render_one(
            &diagrams[0],
            &base_config,
            &overrides,
            args.output_format,
            Targets {
                output: args.output.as_deref(),
                dump: args.dump_layout.as_deref(),
            },
        );
    }

    let outputs = resolve_multi_outputs(args.output.as_deref(), args.output_format, diagrams.len())?;
    let dumps = match args.dump_layout.as_deref() {
        Some(path) => Some(resolve_multi_outputs(Some(path), OutputFormat::Json, diagrams.len())?),
        None => None,
    };
    for (idx, diagram) in diagrams.iter().enumerate() {
        let targets = Targets {
            output: Some(&outputs[idx]),
            dump: dumps.as_ref().map(|paths| paths[idx].as_path()),
        };
        render_one(diagram, &base_config, &overrides, args.output_format, targets)
            .with_context(|| format!("diagram {}", idx + 1))?;
    }
    Ok(())
}

fn measurer_for(config: &Config) -> Box<dyn TextMeasurer> {
    match FontMeasurer::from_family(&config.theme.font_family) {
        Some(measurer) => Box::new(measurer),
        None => {
            debug!(family = %config.theme.font_family, "no system font found, using heuristic widths");
            Box::new(HeuristicMeasurer)
        }
    }
}

#[derive(Clone, Copy)]
struct Targets<'a> {
    output: Option<&'a Path>,
    dump: Option<&'a Path>,
}

/// Config file, then the diagram's own init directive, then command-line
/// flags.
fn render_one(
    source: &str,
    base_config: &Config,
    overrides: &RenderOptions,
    format: OutputFormat,
    targets: Targets<'_>,
) -> Result<()> {
    let output = targets.output;
    let parsed = parse_mermaid(source)?;
    for warning in &parsed.warnings {
        warn!(line = warning.line, "{}", warning.message);
    }
    let mut config = base_config.clone();
    if let Some(init) = parsed.init_config.as_ref() {
        config = merge_init_config(config, init);
    }
    overrides.clone().apply_to(&mut config);

    let measurer = measurer_for(&config);
    let layout = compute_layout(&parsed.graph, &config.theme, &config.layout, measurer.as_ref())?;
    if let Some(path) = targets.dump {
        write_layout_dump(path, &layout).with_context(|| format!("writing layout dump {}", path.display()))?;
    }

    match format {
        OutputFormat::Json => {
            let json = layout_to_json(&layout)?;
            write_text_output(&json, output)?;
        }
        OutputFormat::Svg => {
            let svg = render_svg(&layout, &config.theme, &config.render);
            write_text_output(&svg, output)?;
        }
        OutputFormat::Png => {
            let output = output.ok_or_else(|| anyhow::anyhow!("Output path required for png output"))?;
            write_png(&layout, &config, output)?;
        }
    }
    Ok(())
}

#[cfg(feature = "png")]
fn write_png(layout: &crate::layout::Layout, config: &Config, output: &Path) -> Result<()> {
    let svg = render_svg(layout, &config.theme, &config.render);
    crate::render::write_output_png(&svg, output, &config.theme)?;
    Ok(())
}

#[cfg(not(feature = "png"))]
fn write_png(_layout: &crate::layout::Layout, _config: &Config, _output: &Path) -> Result<()> {
    Err(anyhow::anyhow!(
        "PNG output requires the `png` feature; rebuild with --features png"
    ))
}

fn read_input(path: Option<&Path>) -> Result<(String, bool)> {
    if let Some(path) = path {
        if path == Path::new("-") {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            return Ok((buf, false));
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let is_md = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| matches!(ext, "md" | "markdown"))
            .unwrap_or(false);
        return Ok((content, is_md));
    }

    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok((buf, false))
}

fn extract_mermaid_blocks(input: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut in_block = false;
    let mut current = Vec::new();
    let mut fence = String::new();

    for line in input.lines() {
        let trimmed = line.trim();
        if !in_block {
            if let Some(start_fence) = detect_mermaid_fence(trimmed) {
                in_block = true;
                fence = start_fence;
            }
            continue;
        }
        if is_fence_end(trimmed, &fence) {
            in_block = false;
            blocks.push(current.join("\n"));
            current.clear();
            continue;
        }
        current.push(line.to_string());
    }

    blocks
}

fn detect_mermaid_fence(line: &str) -> Option<String> {
    for marker in ['`', '~', ':'] {
        let fence: String = std::iter::repeat_n(marker, 3).collect();
        if line.starts_with(&fence) && line.trim_start_matches(marker).trim().starts_with("mermaid") {
            return Some(fence);
        }
    }
    None
}

fn is_fence_end(line: &str, fence: &str) -> bool {
    line.strip_prefix(fence)
        .is_some_and(|rest| rest.trim().is_empty())
}

fn resolve_multi_outputs(
    output: Option<&Path>,
    format: OutputFormat,
    count: usize,
) -> Result<Vec<PathBuf>> {
    let ext = format.extension();
    let base = output.ok_or_else(|| anyhow::anyhow!("Output path required for markdown input"))?;
    if base.is_dir() {
        return Ok((0..count)
            .map(|idx| base.join(format!("diagram-{}.{}", idx + 1, ext)))
            .collect());
    }
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("diagram");
    let parent = base.parent().unwrap_or_else(|| Path::new("."));
    Ok((0..count)
        .map(|idx| parent.join(format!("{}-{}.{}", stem, idx + 1, ext)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_mermaid_blocks() {
        let input = r#"
text
``` mermaid
flowchart LR
  A --> B
```
more
~~~mermaid
flowchart TD
  X --> Y
~~~
::: mermaid
graph BT
  P --> Q
:::
```rust
fn main() {}
```
"#;
        let blocks = extract_mermaid_blocks(input);
        assert_eq!(blocks.len(), 3);
        assert!(blocks[0].contains("flowchart LR"));
        assert!(blocks[1].contains("X --> Y"));
        assert!(blocks[2].contains("graph BT"));
    }

    #[test]
    fn multi_outputs_number_files() {
        let outputs =
            resolve_multi_outputs(Some(Path::new("out/chart.svg")), OutputFormat::Json, 2).unwrap();
        assert_eq!(
            outputs,
            vec![PathBuf::from("out/chart-1.json"), PathBuf::from("out/chart-2.json")]
        );
        assert!(resolve_multi_outputs(None, OutputFormat::Svg, 2).is_err());
    }

    #[test]
    fn direction_flag_accepts_mermaid_tokens() {
        assert_eq!(parse_direction("td"), Ok(Direction::TopDown));
        assert_eq!(parse_direction("RL"), Ok(Direction::RightLeft));
        assert!(parse_direction("XY").is_err());
    }

    #[test]
    fn args_parse_short_flags() {
        let args = Args::try_parse_from([
            "mmle", "-i", "in.mmd", "-e", "json", "-t", "dark", "-d", "LR", "--curved", "-vv",
        ])
        .unwrap();
        assert_eq!(args.output_format, OutputFormat::Json);
        assert_eq!(args.direction, Some(Direction::LeftRight));
        assert_eq!(args.theme.as_deref(), Some("dark"));
        assert!(args.curved);
        assert_eq!(args.verbose, 2);
        assert!(args.dump_layout.is_none());
    }

    #[test]
    fn dump_layout_paths_are_numbered_for_markdown() {
        let args = Args::try_parse_from(["mmle", "-i", "doc.md", "--dumpLayout", "out/layout.json"]).unwrap();
        assert_eq!(args.dump_layout.as_deref(), Some(Path::new("out/layout.json")));
        let dumps = resolve_multi_outputs(args.dump_layout.as_deref(), OutputFormat::Json, 2).unwrap();
        assert_eq!(
            dumps,
            vec![PathBuf::from("out/layout-1.json"), PathBuf::from("out/layout-2.json")]
        );
    }
}
