//! Entry points that load an index directory, run a search, and persist the
//! resulting trace document.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::graph::persist::BM25_FILE;
use crate::graph::ProgramGraph;
use crate::lexical::Bm25Index;

use super::frontier::{frontier_search, FrontierOptions, FrontierStats, GuidedResult};
use super::hierarchical::{hierarchical_search, HierarchicalOptions, LexicalResult};
use super::oracle::RelevanceOracle;
use super::trace::{SearchMode, TraceDocument, TraceStep};

pub const DEFAULT_LEXICAL_BUDGET: usize = 120;
pub const DEFAULT_GUIDED_BUDGET: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct LexicalSearchOutput {
    pub results: Vec<LexicalResult>,
    pub trace: Vec<TraceStep>,
    pub trace_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuidedSearchOutput {
    pub results: Vec<GuidedResult>,
    pub trace: Vec<TraceStep>,
    pub stats: FrontierStats,
    pub trace_path: PathBuf,
}

/// Parses a user supplied mode, falling back to lexical search.
pub fn parse_mode(raw: &str) -> SearchMode {
    match raw.trim().to_ascii_lowercase().as_str() {
        "llm" => SearchMode::Llm,
        "bm25" => SearchMode::Bm25,
        other => {
            warn!("Unknown search mode '{}'; falling back to 'bm25'", other);
            SearchMode::Bm25
        }
    }
}

pub fn search_lexical(
    index_dir: &Path,
    query: &str,
    top: usize,
    budget: usize,
) -> Result<LexicalSearchOutput> {
    let options = HierarchicalOptions {
        top,
        budget,
        ..Default::default()
    };
    search_lexical_with_options(index_dir, query, &options)
}

pub fn search_lexical_with_options(
    index_dir: &Path,
    query: &str,
    options: &HierarchicalOptions,
) -> Result<LexicalSearchOutput> {
    let graph = ProgramGraph::load(index_dir)?;
    let index = Bm25Index::load(&index_dir.join(BM25_FILE))?;
    let outcome = hierarchical_search(&graph, &index, query, options)?;

    let document = TraceDocument {
        query: query.to_string(),
        mode: SearchMode::Bm25,
        results: outcome.results_json(),
        trace: outcome.trace.steps().to_vec(),
        stats: None,
    };
    let trace_path = document.save(index_dir)?;
    info!(
        results = outcome.results.len(),
        steps = outcome.steps,
        "lexical search complete"
    );

    Ok(LexicalSearchOutput {
        results: outcome.results,
        trace: outcome.trace.into_steps(),
        trace_path,
    })
}

pub async fn search_guided(
    index_dir: &Path,
    query: &str,
    top: usize,
    budget: usize,
    oracle: &dyn RelevanceOracle,
) -> Result<GuidedSearchOutput> {
    let options = FrontierOptions {
        top,
        budget,
        ..Default::default()
    };
    search_guided_with_options(index_dir, query, &options, oracle).await
}

pub async fn search_guided_with_options(
    index_dir: &Path,
    query: &str,
    options: &FrontierOptions,
    oracle: &dyn RelevanceOracle,
) -> Result<GuidedSearchOutput> {
    let graph = ProgramGraph::load(index_dir)?;
    let outcome = frontier_search(&graph, oracle, query, options).await;

    let document = TraceDocument {
        query: query.to_string(),
        mode: SearchMode::Llm,
        results: outcome.results_json(),
        trace: outcome.trace.steps().to_vec(),
        stats: serde_json::to_value(outcome.stats).ok(),
    };
    let trace_path = document.save(index_dir)?;

    Ok(GuidedSearchOutput {
        results: outcome.results,
        trace: outcome.trace.into_steps(),
        stats: outcome.stats,
        trace_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode_normalizes() {
        assert_eq!(parse_mode("LLM"), SearchMode::Llm);
        assert_eq!(parse_mode(" bm25 "), SearchMode::Bm25);
        assert_eq!(parse_mode("vector"), SearchMode::Bm25);
    }
}
