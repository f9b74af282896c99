use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::config::{Settings, SummaryScope};
use crate::error::Result;
use crate::indexer::builder::{build_index, BuildOptions};
use crate::llm::{ChatClient, ChatClientConfig, LlmRelevanceOracle};
use crate::search::trace::LAST_TRACE_FILE;
use crate::search::{
    parse_mode, search_guided, search_lexical, SearchMode, TraceDocument, DEFAULT_GUIDED_BUDGET,
    DEFAULT_LEXICAL_BUDGET,
};

#[derive(Parser)]
#[command(name = "codeindex")]
#[command(about = "Hierarchical code graph index with lexical and model-guided search")]
#[command(version)]
#[command(after_long_help = r#"
EXAMPLES:
    # Build an index for a repository
    codeindex build ./my-repo --out ./index

    # Build with enrichment metadata and file summaries
    codeindex build ./my-repo --enrich --summarizer gpt-4o-mini --summary-scope files

    # Keyword search (no API key needed)
    codeindex search --mode bm25 "load config"

    # Model-guided search
    OPENAI_API_KEY=... codeindex search --budget 30 "where are retries configured"

    # Replay the last search trace
    codeindex trace --index ./index
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build an index for a repository
    Build {
        /// Path to the repository
        repo: PathBuf,

        /// Output directory for the index
        #[arg(long, default_value = "./index")]
        out: PathBuf,

        /// Summarizer model, or `off`
        #[arg(long)]
        summarizer: Option<String>,

        /// Minimum lines of code for a node to be summarized
        #[arg(long)]
        min_loc: Option<u32>,

        /// Summary scope: structured, files or none
        #[arg(long)]
        summary_scope: Option<String>,

        /// Emit function doc metadata and callsite records
        #[arg(long)]
        enrich: bool,

        /// Callsite records kept per function
        #[arg(long)]
        callsite_cap: Option<i64>,

        /// Show a progress bar
        #[arg(long)]
        progress: bool,
    },

    /// Search an index
    Search {
        /// Natural-language or keyword query
        query: String,

        /// Index directory
        #[arg(long, default_value = "./index")]
        index: PathBuf,

        /// Maximum number of results
        #[arg(long, default_value = "10")]
        top: usize,

        /// Step budget (default: 120 for bm25, 50 for llm)
        #[arg(long)]
        budget: Option<usize>,

        /// Search mode: llm or bm25
        #[arg(long, default_value = "llm")]
        mode: String,

        /// Model used for guided search
        #[arg(long)]
        llm_model: Option<String>,
    },

    /// Replay the last persisted search trace
    Trace {
        /// Index directory
        #[arg(long, default_value = "./index")]
        index: PathBuf,

        /// Print the raw trace document instead of a replay
        #[arg(long)]
        json: bool,
    },
}

pub struct BuildArgs {
    pub summarizer: Option<String>,
    pub min_loc: Option<u32>,
    pub summary_scope: Option<String>,
    pub enrich: bool,
    pub callsite_cap: Option<i64>,
}

/// Applies command line flags on top of file and environment settings.
pub fn apply_build_args(settings: &mut Settings, args: BuildArgs) {
    if let Some(model) = args.summarizer {
        settings.summary.model = model;
    }
    if let Some(min_loc) = args.min_loc {
        settings.summary.min_loc = min_loc;
    }
    if let Some(scope) = args.summary_scope {
        settings.summary.scope = SummaryScope::parse_or_default(&scope);
    }
    if args.enrich {
        settings.build.enrich = true;
    }
    if let Some(cap) = args.callsite_cap {
        settings.build.callsite_cap = cap;
    }
    settings.normalize();
}

pub async fn build(repo: &Path, out: &Path, args: BuildArgs, progress: bool) -> Result<()> {
    let mut settings = Settings::load()?;
    apply_build_args(&mut settings, args);

    let mut options = BuildOptions::from_settings(&settings);
    options.show_progress = progress;
    let report = build_index(repo, out, &options).await?;

    info!("Index written to: {}", report.index_dir.display());
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Resolves the effective mode; guided search without credentials degrades
/// to lexical search.
pub fn effective_mode(raw: &str, settings: &Settings) -> SearchMode {
    match parse_mode(raw) {
        SearchMode::Llm if settings.llm.api_key.is_none() => {
            warn!("No API key configured for guided search; falling back to 'bm25'");
            SearchMode::Bm25
        }
        mode => mode,
    }
}

pub async fn search(
    index: &Path,
    query: &str,
    top: usize,
    budget: Option<usize>,
    mode: &str,
    llm_model: Option<String>,
) -> Result<()> {
    let settings = Settings::load()?;

    let (results, trace_path) = match effective_mode(mode, &settings) {
        SearchMode::Bm25 => {
            info!("Using BM25 + hierarchical search (keyword mode)");
            let budget = budget.unwrap_or(DEFAULT_LEXICAL_BUDGET);
            let output = search_lexical(index, query, top, budget)?;
            (serde_json::to_value(&output.results)?, output.trace_path)
        }
        SearchMode::Llm => {
            let model = llm_model.unwrap_or_else(|| settings.llm.model.clone());
            info!("Using guided search with {}", model);
            let client = ChatClient::new(ChatClientConfig {
                model,
                endpoint: settings.llm.endpoint.clone(),
                api_key: settings.llm.api_key.clone(),
                timeout: settings.llm.timeout(),
            })?;
            let oracle = LlmRelevanceOracle::new(client);
            let budget = budget.unwrap_or(DEFAULT_GUIDED_BUDGET);
            let output = search_guided(index, query, top, budget, &oracle).await?;
            info!(
                "Guided search: {} steps, {} nodes visited, {} answers",
                output.stats.steps, output.stats.nodes_visited, output.stats.answers_found
            );
            (serde_json::to_value(&output.results)?, output.trace_path)
        }
    };

    println!("{}", serde_json::to_string_pretty(&results)?);
    info!("Trace JSON: {}", trace_path.display());
    Ok(())
}

pub fn trace(index: &Path, json: bool) -> Result<()> {
    if !TraceDocument::trace_dir(index).join(LAST_TRACE_FILE).exists() {
        println!("No trace data found. Run a search first, e.g.:");
        println!("  codeindex search --index {} \"your query\"", index.display());
        return Ok(());
    }
    let document = TraceDocument::load(index)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else {
        for line in document.replay() {
            println!("{}", line);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_build_defaults() {
        match parse(&["codeindex", "build", "./repo"]).command {
            Commands::Build {
                repo,
                out,
                summarizer,
                enrich,
                progress,
                ..
            } => {
                assert_eq!(repo, PathBuf::from("./repo"));
                assert_eq!(out, PathBuf::from("./index"));
                assert!(summarizer.is_none());
                assert!(!enrich);
                assert!(!progress);
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_search_flags() {
        let cli = parse(&[
            "codeindex", "search", "--index", "/tmp/idx", "--top", "3", "--budget", "7", "--mode", "bm25",
            "load config",
        ]);
        match cli.command {
            Commands::Search {
                query,
                index,
                top,
                budget,
                mode,
                llm_model,
            } => {
                assert_eq!(query, "load config");
                assert_eq!(index, PathBuf::from("/tmp/idx"));
                assert_eq!(top, 3);
                assert_eq!(budget, Some(7));
                assert_eq!(mode, "bm25");
                assert!(llm_model.is_none());
            }
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn test_search_requires_query() {
        assert!(Cli::try_parse_from(["codeindex", "search"]).is_err());
    }

    #[test]
    fn test_apply_build_args() {
        let mut settings = Settings::default();
        apply_build_args(
            &mut settings,
            BuildArgs {
                summarizer: Some("gpt-4o".to_string()),
                min_loc: Some(5),
                summary_scope: Some("bogus".to_string()),
                enrich: true,
                callsite_cap: Some(-3),
            },
        );
        assert_eq!(settings.summary.model, "gpt-4o");
        assert_eq!(settings.summary.min_loc, 5);
        assert_eq!(settings.summary.scope, SummaryScope::Structured);
        assert!(settings.build.enrich);
        assert_eq!(settings.build.callsite_cap(), crate::config::DEFAULT_CALLSITE_CAP);
    }

    #[test]
    fn test_effective_mode() {
        let mut settings = Settings::default();
        settings.llm.api_key = None;
        assert_eq!(effective_mode("llm", &settings), SearchMode::Bm25);
        assert_eq!(effective_mode("weird", &settings), SearchMode::Bm25);
        settings.llm.api_key = Some("key".to_string());
        assert_eq!(effective_mode("LLM", &settings), SearchMode::Llm);
        assert_eq!(effective_mode("bm25", &settings), SearchMode::Bm25);
    }

    #[test]
    fn test_trace_without_data() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(trace(dir.path(), false).is_ok());
    }
}
