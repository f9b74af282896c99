pub mod config;
pub mod error;
pub mod graph;
pub mod indexer;
pub mod languages;
pub mod lexical;
pub mod llm;
pub mod search;

pub use config::{Settings, SummaryScope};
pub use error::{CodeIndexError, Result};
pub use graph::{
    CalleeRef, CallsiteRecord, Edge, EdgeType, IndexMeta, Node, NodeKind, NodeText, ProgramGraph,
};
pub use indexer::{build_index, BuildOptions, BuildReport, EnrichmentStats, ExtractOptions};
pub use languages::{Extractor, ExtractorRegistry};
pub use lexical::Bm25Index;
pub use llm::{ChatClient, ChatClientConfig, LlmRelevanceOracle, Summarizer};
pub use search::{
    search_guided, search_lexical, RelevanceOracle, SearchMode, TraceDocument, TraceRecorder,
};
