//! Repository build pipeline: walk, extract, summarize, persist.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::config::{LlmSettings, Settings, SummaryScope, SummarySettings};
use crate::error::{CodeIndexError, Result};
use crate::graph::persist::{
    self, IndexMeta, NodeText, BM25_FILE, EDGES_FILE, META_FILE, NODES_FILE, NODE_TEXTS_FILE,
    XREF_CALLS_FILE,
};
use crate::graph::{Node, NodeKind, ProgramGraph};
use crate::indexer::extractor::{extract_source, EnrichmentStats, ExtractOptions, ExtractionOutput};
use crate::indexer::walker::{relative_path, FileWalker};
use crate::languages::ExtractorRegistry;
use crate::lexical::{Bm25Index, DEFAULT_B, DEFAULT_K1};
use crate::llm::{ChatClient, ChatClientConfig, Summarizer};

/// Characters of a file considered for a file-level summary.
const FILE_SUMMARY_CHARS: usize = 6000;
const PARAMS_RATIO_ALERT: f64 = 0.6;
const CALLSITE_ALERT_MIN_FUNCS: usize = 100;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub extract: ExtractOptions,
    pub summary: SummarySettings,
    pub llm: LlmSettings,
    pub show_progress: bool,
}

impl BuildOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            extract: ExtractOptions {
                enrich: settings.build.enrich,
                callsite_cap: settings.build.callsite_cap(),
            },
            summary: settings.summary.clone(),
            llm: settings.llm.clone(),
            show_progress: false,
        }
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub index_dir: PathBuf,
    pub repo_id: String,
    pub files: usize,
    pub nodes: usize,
    pub edges: usize,
    pub callsites: usize,
    pub langs: Vec<String>,
    pub summaries_written: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentStats>,
    pub alerts: Vec<String>,
}

struct FileOutput {
    rel_path: String,
    text: String,
    output: ExtractionOutput,
}

/// Builds an index for `repo` into `out`.
pub async fn build_index(repo: &Path, out: &Path, options: &BuildOptions) -> Result<BuildReport> {
    let started = Instant::now();
    let repo = repo.canonicalize()?;
    if !repo.is_dir() {
        return Err(CodeIndexError::Config(format!(
            "{} is not a directory",
            repo.display()
        )));
    }
    info!(
        "Building index for {} into {} (enrich={}, summarizer={})",
        repo.display(),
        out.display(),
        options.extract.enrich,
        options.summary.model
    );

    let registry = Arc::new(ExtractorRegistry::new());
    let files = FileWalker::new(&registry).walk(&repo)?;
    info!("Found {} files to index", files.len());

    let repo_node = repo_node(&repo);
    let packages = package_nodes(&repo, &repo_node, &files);
    debug!("Registered {} package nodes", packages.len());

    let mut file_outputs = {
        let registry = Arc::clone(&registry);
        let repo = repo.clone();
        let extract = options.extract;
        let show_progress = options.show_progress;
        tokio::task::spawn_blocking(move || extract_files(&registry, &repo, &files, &extract, show_progress))
            .await
            .map_err(|e| CodeIndexError::IndexState(format!("extraction task failed: {e}")))?
    };

    let package_ids: BTreeMap<&str, &str> = packages
        .iter()
        .map(|p| (p.path.as_str(), p.node_id.as_str()))
        .collect();
    for file in &mut file_outputs {
        let parent = package_ids
            .get(parent_dir(&file.rel_path).as_str())
            .copied()
            .unwrap_or(repo_node.node_id.as_str())
            .to_string();
        if let Some(node) = file.output.nodes.iter_mut().find(|n| n.kind == NodeKind::File) {
            node.parent_id = Some(parent);
        }
    }

    let summaries_written = summarize(&mut file_outputs, options).await?;

    // Consolidate in file order.
    let mut nodes = vec![repo_node];
    nodes.extend(packages);
    let mut edges = Vec::new();
    let mut callsites = Vec::new();
    let mut node_texts = Vec::new();
    let mut stats = EnrichmentStats::default();
    let mut langs = BTreeSet::new();
    for file in &file_outputs {
        for node in &file.output.nodes {
            node_texts.push(NodeText {
                node_id: node.node_id.clone(),
                text: node.search_text(),
            });
            if node.kind == NodeKind::File {
                langs.insert(node.lang.clone());
            }
        }
        stats.merge(&file.output.stats);
    }
    for file in file_outputs {
        nodes.extend(file.output.nodes);
        edges.extend(file.output.edges);
        callsites.extend(file.output.callsites);
    }

    let alerts = if options.extract.enrich {
        enrichment_alerts(&stats)
    } else {
        Vec::new()
    };

    let graph = ProgramGraph::from_parts(nodes.clone(), edges.clone())?;
    let repo_id = graph.root().node_id.clone();
    let file_count = graph.nodes().filter(|n| n.kind == NodeKind::File).count();

    std::fs::create_dir_all(out)?;
    info!(
        "Persisting artifacts: {} nodes, {} edges, {} node text rows",
        nodes.len(),
        edges.len(),
        node_texts.len()
    );
    persist::write_nodes(&out.join(NODES_FILE), &nodes)?;
    persist::write_edges(&out.join(EDGES_FILE), &edges)?;
    persist::write_jsonl(&out.join(NODE_TEXTS_FILE), &node_texts)?;
    if options.extract.enrich {
        persist::write_xref_calls(&out.join(XREF_CALLS_FILE), &callsites)?;
    }

    let mut bm25 = Bm25Index::new(DEFAULT_K1, DEFAULT_B);
    for row in &node_texts {
        bm25.add_document(&row.node_id, &row.text)?;
    }
    bm25.finalize()?;
    bm25.save(&out.join(BM25_FILE))?;
    debug!("BM25 index persisted to {}", out.join(BM25_FILE).display());

    let meta = IndexMeta {
        repo_id: repo_id.clone(),
        created: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
        langs: langs.into_iter().collect(),
        node_count: nodes.len(),
        edge_count: edges.len(),
        enrichment: options.extract.enrich,
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    persist::write_meta(&out.join(META_FILE), &meta)?;

    info!(
        "Build artifacts written to {} in {:.1}s",
        out.display(),
        started.elapsed().as_secs_f64()
    );

    Ok(BuildReport {
        index_dir: out.to_path_buf(),
        repo_id,
        files: file_count,
        nodes: meta.node_count,
        edges: meta.edge_count,
        callsites: callsites.len(),
        langs: meta.langs,
        summaries_written,
        enrichment: options.extract.enrich.then_some(stats),
        alerts,
    })
}

fn repo_node(repo: &Path) -> Node {
    let path = repo.to_string_lossy().into_owned();
    let name = repo
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.clone());
    let mut node = Node::new(NodeKind::Repo, path, None, None, None);
    node.symbol = Some(name);
    node
}

/// Relative directory of a relative file path; `.` for top-level files.
fn parent_dir(rel_path: &str) -> String {
    match rel_path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => ".".to_string(),
    }
}

/// One package per directory holding a supported file, parented to the
/// nearest registered ancestor directory or the repository.
fn package_nodes(repo: &Path, repo_node: &Node, files: &[PathBuf]) -> Vec<Node> {
    let mut dirs: Vec<String> = files
        .iter()
        .map(|f| parent_dir(&relative_path(repo, f)))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    dirs.sort_by_key(|d| (if d == "." { 0 } else { d.split('/').count() }, d.clone()));

    let repo_name = repo_node.symbol_or_empty().to_string();
    let mut registered: BTreeMap<String, String> = BTreeMap::new();
    let mut packages = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let parent = ancestor_dirs(&dir)
            .find_map(|ancestor| registered.get(&ancestor).cloned())
            .unwrap_or_else(|| repo_node.node_id.clone());
        let name = if dir == "." {
            repo_name.clone()
        } else {
            dir.rsplit('/').next().unwrap_or(&dir).to_string()
        };
        // Package and repository ids hash the path only.
        let mut node = Node::new(NodeKind::Pkg, dir.clone(), None, None, None).with_parent(parent);
        node.symbol = Some(name);
        registered.insert(dir, node.node_id.clone());
        packages.push(node);
    }
    packages
}

/// Proper ancestors of a relative directory, nearest first, ending with `.`.
fn ancestor_dirs(dir: &str) -> impl Iterator<Item = String> + '_ {
    let mut current = if dir == "." { None } else { Some(dir.to_string()) };
    std::iter::from_fn(move || {
        let dir = current.take()?;
        let parent = parent_dir(&dir);
        if parent != "." {
            current = Some(parent.clone());
        }
        Some(parent)
    })
}

fn extract_files(
    registry: &ExtractorRegistry,
    repo: &Path,
    files: &[PathBuf],
    options: &ExtractOptions,
    show_progress: bool,
) -> Vec<FileOutput> {
    let pb = if show_progress {
        progress_bar(files.len() as u64, "Indexing files")
    } else {
        ProgressBar::hidden()
    };

    let outputs: Vec<Option<FileOutput>> = files
        .par_iter()
        .map(|path| {
            let rel_path = relative_path(repo, path);
            let result = read_and_extract(registry, path, &rel_path, options);
            pb.inc(1);
            result
        })
        .collect();

    pb.finish_with_message("Indexing complete");
    outputs.into_iter().flatten().collect()
}

fn read_and_extract(
    registry: &ExtractorRegistry,
    path: &Path,
    rel_path: &str,
    options: &ExtractOptions,
) -> Option<FileOutput> {
    let extractor = registry.get_for_file(path)?;
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Skipping unreadable file {}: {}", rel_path, e);
            return None;
        }
    };
    let text = String::from_utf8_lossy(&bytes).into_owned();

    let started = Instant::now();
    let output = extract_source(extractor.as_ref(), rel_path, &text, options);
    trace!(
        "indexed {} (nodes={} edges={} calls={}) in {:.1}ms",
        rel_path,
        output.nodes.len(),
        output.edges.len(),
        output.callsites.len(),
        started.elapsed().as_secs_f64() * 1000.0
    );
    Some(FileOutput {
        rel_path: rel_path.to_string(),
        text,
        output,
    })
}

fn progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.set_message(message.to_string());
    pb
}

/// Head and tail of a long file, joined by an ellipsis line.
pub fn compress_for_summary(text: &str) -> String {
    let total = text.chars().count();
    if total <= FILE_SUMMARY_CHARS {
        return text.to_string();
    }
    let head_len = FILE_SUMMARY_CHARS * 7 / 10;
    let tail_len = FILE_SUMMARY_CHARS / 4;
    let head: String = text.chars().take(head_len).collect();
    let tail: String = text.chars().skip(total - tail_len).collect();
    format!("{}\n...\n{}", head.trim_end(), tail.trim_start())
}

struct SummaryTarget {
    file: usize,
    node: usize,
    text: String,
}

fn summary_targets(files: &[FileOutput], scope: SummaryScope, min_loc: u32) -> Vec<SummaryTarget> {
    let mut targets = Vec::new();
    for (file_idx, file) in files.iter().enumerate() {
        let lines: Vec<&str> = file.text.lines().collect();
        for (node_idx, node) in file.output.nodes.iter().enumerate() {
            if node.summary.is_some() || node.loc.unwrap_or(0) < min_loc {
                continue;
            }
            match scope {
                SummaryScope::Files if node.kind == NodeKind::File => {
                    targets.push(SummaryTarget {
                        file: file_idx,
                        node: node_idx,
                        text: compress_for_summary(&file.text),
                    });
                    break;
                }
                SummaryScope::Structured
                    if matches!(node.kind, NodeKind::File | NodeKind::Class | NodeKind::Func) =>
                {
                    let start = node.start_line.unwrap_or(1).saturating_sub(1) as usize;
                    let end = (node.end_line.unwrap_or(1) as usize).min(lines.len());
                    let snippet = lines.get(start..end).map(|l| l.join("\n")).unwrap_or_default();
                    targets.push(SummaryTarget {
                        file: file_idx,
                        node: node_idx,
                        text: snippet,
                    });
                }
                _ => {}
            }
        }
    }
    targets
}

async fn summarize(files: &mut [FileOutput], options: &BuildOptions) -> Result<usize> {
    let summary = &options.summary;
    if !summary.enabled() || summary.scope == SummaryScope::None {
        return Ok(0);
    }
    let targets = summary_targets(files, summary.scope, summary.min_loc);
    if targets.is_empty() {
        return Ok(0);
    }
    info!(
        "Batch summarizing {} nodes with concurrency={}",
        targets.len(),
        summary.concurrency
    );

    let client = ChatClient::new(ChatClientConfig {
        model: summary.model.clone(),
        endpoint: options.llm.endpoint.clone(),
        api_key: options.llm.api_key.clone(),
        timeout: summary.timeout(),
    })?;
    let summarizer = Summarizer::new(client, summary.timeout(), summary.retries);
    let texts: Vec<String> = targets.iter().map(|t| t.text.clone()).collect();
    let summaries = summarizer.summarize_many(&texts, summary.concurrency).await;

    let mut written = 0;
    for (target, text) in targets.iter().zip(summaries) {
        if let Some(text) = text.filter(|s| !s.trim().is_empty()) {
            files[target.file].output.nodes[target.node].summary = Some(text);
            written += 1;
        }
    }
    Ok(written)
}

fn enrichment_alerts(stats: &EnrichmentStats) -> Vec<String> {
    info!(
        "funcs_with_params_total={} funcs_total={} funcs_with_returns_total={} funcs_with_raises_total={} raises_extracted_total={}",
        stats.funcs_with_params,
        stats.funcs_total,
        stats.funcs_with_returns,
        stats.funcs_with_raises,
        stats.raises_extracted_total
    );
    info!(
        "callsites_written_total={} callsite_cap_hits={}",
        stats.callsites_total, stats.callsite_cap_hits
    );

    let mut alerts = Vec::new();
    if stats.funcs_total > 0 && stats.params_ratio() < PARAMS_RATIO_ALERT {
        alerts.push(format!(
            "funcs_with_params_total/funcs_total dropped to {:.2}",
            stats.params_ratio()
        ));
    }
    if stats.funcs_total > CALLSITE_ALERT_MIN_FUNCS && stats.callsites_total == 0 {
        alerts.push(format!(
            "callsites_written_total == 0 for repo with {} funcs",
            stats.funcs_total
        ));
    }
    for alert in &alerts {
        warn!("ALERT: {}", alert);
    }
    alerts
}
