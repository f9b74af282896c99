pub mod builder;
pub mod extractor;
pub mod parser;
pub mod walker;

pub use builder::{build_index, BuildOptions, BuildReport};
pub use extractor::{extract_source, EnrichmentStats, ExtractOptions, ExtractionOutput};
pub use parser::{parse_source, ParsedFile};
pub use walker::FileWalker;
