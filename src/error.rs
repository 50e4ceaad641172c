/// Terminal parse failures. Malformed individual statements never end up here;
/// they are reported as [`Diagnostic`]s and skipped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("input is empty")]
    EmptyInput,
    #[error("line {line}: expected `flowchart <DIR>` or `graph <DIR>` header")]
    MissingHeader { line: usize },
    #[error("line {line}, column {column}: invalid direction `{token}` (expected TB, TD, BT, LR or RL)")]
    InvalidDirection {
        line: usize,
        column: usize,
        token: String,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error(
        "diagram too complex: {nodes} nodes / {edges} edges exceeds limit of {max_nodes} nodes / {max_edges} edges"
    )]
    TooComplex {
        nodes: usize,
        edges: usize,
        max_nodes: usize,
        max_edges: usize,
    },
    #[error("unknown layout engine: {0}")]
    UnknownEngine(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("invalid path data at byte {offset}: {message}")]
    InvalidPath { offset: usize, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("rasterization failed: {0}")]
    Raster(String),
}

/// A skipped statement, reported with its 1-based source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}
