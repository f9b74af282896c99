use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodeIndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Language not supported: {0}")]
    UnsupportedLanguage(String),

    /// The graph must have exactly one node without a parent.
    #[error("Graph load failed: expected exactly one root node, found {found}")]
    MissingRoot { found: usize },

    #[error("Graph load failed: duplicate node id {node_id}")]
    DuplicateNode { node_id: String },

    #[error("Graph load failed: node {node_id} references missing parent {parent_id}")]
    DanglingParent { node_id: String, parent_id: String },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("BM25 index used before finalize() during {phase}")]
    NotFinalized { phase: &'static str },

    #[error("BM25 index has no documents; cannot search for {query:?}")]
    EmptyCorpus { query: String },

    #[error("BM25 index state error: {0}")]
    IndexState(String),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CodeIndexError>;
