pub mod frontier;
pub mod hierarchical;
pub mod oracle;
pub mod query;
pub mod trace;

pub use frontier::{
    frontier_search, FrontierOptions, FrontierOutcome, FrontierStats, GuidedResult,
    PRIMARY_THRESHOLD, SECONDARY_THRESHOLD,
};
pub use hierarchical::{hierarchical_search, HierarchicalOptions, HierarchicalOutcome, LexicalResult};
pub use oracle::{ChildRanking, NodeRelevance, NodeView, RelevanceOracle};
pub use query::{
    parse_mode, search_guided, search_guided_with_options, search_lexical,
    search_lexical_with_options, GuidedSearchOutput, LexicalSearchOutput, DEFAULT_GUIDED_BUDGET,
    DEFAULT_LEXICAL_BUDGET,
};
pub use trace::{SearchMode, TraceDocument, TraceEvent, TraceRecorder, TraceStep};
