use std::collections::{HashMap, HashSet};
use std::ops::AddAssign;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::graph::{content_hash, CalleeRef, CallsiteRecord, Edge, EdgeType, Node, NodeKind};
use crate::indexer::parser::{parse_source, ParsedFile};
use crate::languages::Extractor;

/// Reason recorded for calls whose target is not defined in the same file.
pub const UNRESOLVED_REASON: &str = "not_defined_in_file";

const MAX_SNIPPET_CHARS: usize = 200;
const MAX_DOC_LINE_CHARS: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Emit enrichment metadata and callsite records.
    pub enrich: bool,
    /// Maximum callsite records kept per caller.
    pub callsite_cap: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            enrich: false,
            callsite_cap: crate::config::DEFAULT_CALLSITE_CAP,
        }
    }
}

/// Counters describing how much enrichment metadata a build produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentStats {
    pub funcs_total: usize,
    pub funcs_with_params: usize,
    pub funcs_with_returns: usize,
    pub funcs_with_raises: usize,
    pub funcs_with_decorators: usize,
    pub raises_extracted_total: usize,
    pub callsites_total: usize,
    pub callsite_cap_hits: usize,
}

impl EnrichmentStats {
    pub fn merge(&mut self, other: &EnrichmentStats) {
        self.funcs_total += other.funcs_total;
        self.funcs_with_params += other.funcs_with_params;
        self.funcs_with_returns += other.funcs_with_returns;
        self.funcs_with_raises += other.funcs_with_raises;
        self.funcs_with_decorators += other.funcs_with_decorators;
        self.raises_extracted_total += other.raises_extracted_total;
        self.callsites_total += other.callsites_total;
        self.callsite_cap_hits += other.callsite_cap_hits;
    }

    /// Share of functions whose parameter list was extracted.
    pub fn params_ratio(&self) -> f64 {
        if self.funcs_total == 0 {
            1.0
        } else {
            self.funcs_with_params as f64 / self.funcs_total as f64
        }
    }
}

impl AddAssign<&EnrichmentStats> for EnrichmentStats {
    fn add_assign(&mut self, other: &EnrichmentStats) {
        self.merge(other);
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionOutput {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub callsites: Vec<CallsiteRecord>,
    pub stats: EnrichmentStats,
}

impl ExtractionOutput {
    pub fn file_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.kind == NodeKind::File)
    }
}

struct RawCall {
    caller_id: String,
    name: String,
    display: String,
    line: u32,
    snippet: String,
}

/// Accumulates the nodes, edges and calls found in one file.
///
/// Calls are buffered and resolved in [`FileExtraction::finish`], once every
/// symbol of the file is known.
pub struct FileExtraction {
    rel_path: String,
    lang: &'static str,
    options: ExtractOptions,
    file_id: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    seen: HashSet<String>,
    defined: HashMap<String, String>,
    calls: Vec<RawCall>,
    pub stats: EnrichmentStats,
}

impl FileExtraction {
    pub fn new(file_node: Node, lang: &'static str, options: ExtractOptions) -> Self {
        Self {
            rel_path: file_node.path.clone(),
            lang,
            options,
            file_id: file_node.node_id.clone(),
            seen: HashSet::from([file_node.node_id.clone()]),
            nodes: vec![file_node],
            edges: Vec::new(),
            defined: HashMap::new(),
            calls: Vec::new(),
            stats: EnrichmentStats::default(),
        }
    }

    pub fn rel_path(&self) -> &str {
        &self.rel_path
    }

    pub fn lang(&self) -> &'static str {
        self.lang
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn enrich(&self) -> bool {
        self.options.enrich
    }

    pub fn lookup(&self, symbol: &str) -> Option<&str> {
        self.defined.get(symbol).map(String::as_str)
    }

    /// Adds a symbol node under `parent_id` and returns its id.
    ///
    /// The first definition of a name wins for same-file resolution. A node
    /// whose id was already added is dropped.
    pub fn add_symbol(&mut self, node: Node, parent_id: &str) -> String {
        let node = node.with_parent(parent_id).with_lang(self.lang);
        let id = node.node_id.clone();
        if !self.seen.insert(id.clone()) {
            return id;
        }
        if let Some(symbol) = node.symbol.as_deref() {
            self.defined.entry(symbol.to_string()).or_insert_with(|| id.clone());
        }
        self.nodes.push(node);
        id
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    pub fn record_call(&mut self, caller_id: &str, name: &str, display: &str, line: u32, snippet: &str) {
        if name.is_empty() {
            return;
        }
        let snippet = snippet.lines().next().unwrap_or("").trim();
        self.calls.push(RawCall {
            caller_id: caller_id.to_string(),
            name: name.to_string(),
            display: display.to_string(),
            line,
            snippet: truncate_to(snippet, MAX_SNIPPET_CHARS).to_string(),
        });
    }

    /// Resolves buffered calls into call edges and (when enriching) callsite records.
    pub fn finish(mut self) -> ExtractionOutput {
        let mut by_caller: Vec<(String, Vec<RawCall>)> = Vec::new();
        let mut caller_slot: HashMap<String, usize> = HashMap::new();
        for call in std::mem::take(&mut self.calls) {
            let slot = *caller_slot.entry(call.caller_id.clone()).or_insert_with(|| {
                by_caller.push((call.caller_id.clone(), Vec::new()));
                by_caller.len() - 1
            });
            by_caller[slot].1.push(call);
        }

        // Order callers by definition order so output does not depend on call order.
        let position: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.node_id.as_str(), i))
            .collect();
        by_caller.sort_by_key(|(caller, _)| position.get(caller.as_str()).copied().unwrap_or(usize::MAX));

        let mut callsites = Vec::new();
        for (caller_id, calls) in &by_caller {
            let mut names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
            names.sort_unstable();
            names.dedup();
            for name in names {
                let dst = self.defined.get(name).cloned().unwrap_or_else(|| name.to_string());
                self.edges.push(Edge::new(caller_id.clone(), dst, EdgeType::Call, name));
            }

            if !self.options.enrich {
                continue;
            }
            if calls.len() > self.options.callsite_cap {
                self.stats.callsite_cap_hits += 1;
                debug!(caller = %caller_id, calls = calls.len(), "callsite cap reached");
            }
            for call in calls.iter().take(self.options.callsite_cap) {
                let resolved = self
                    .defined
                    .get(&call.name)
                    .or_else(|| self.defined.get(&call.display));
                let callee_ref = match resolved {
                    Some(id) => CalleeRef::NodeId {
                        value: id.clone(),
                        symbol: Some(call.name.clone()),
                    },
                    None => CalleeRef::Unresolved {
                        value: call.display.clone(),
                        symbol: call.name.clone(),
                        reason: UNRESOLVED_REASON.to_string(),
                    },
                };
                callsites.push(CallsiteRecord {
                    caller_id: caller_id.clone(),
                    callee_ref,
                    file: self.rel_path.clone(),
                    line: call.line,
                    snippet: call.snippet.clone(),
                });
            }
        }
        self.stats.callsites_total += callsites.len();

        ExtractionOutput {
            nodes: self.nodes,
            edges: self.edges,
            callsites,
            stats: self.stats,
        }
    }
}

/// Builds the file node shared by every extractor.
pub fn file_node(rel_path: &str, lang: &str, text: &str) -> Node {
    let line_count = text.lines().count().max(1) as u32;
    let name = Path::new(rel_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(rel_path)
        .to_string();
    Node::new(NodeKind::File, rel_path, Some(name), Some(1), Some(line_count))
        .with_lang(lang)
        .with_hash(content_hash(text))
}

/// Parses `text` and runs `extractor` over it.
///
/// A file the grammar cannot parse at all degrades to a lone file node.
pub fn extract_source(
    extractor: &dyn Extractor,
    rel_path: &str,
    text: &str,
    options: &ExtractOptions,
) -> ExtractionOutput {
    let ext = Path::new(rel_path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    let lang = extractor.lang_label(ext);
    let language = extractor.language(ext);
    match parse_source(text, &language) {
        Ok(parsed) => {
            if parsed.has_errors() {
                debug!(path = rel_path, "syntax errors; extracting what parsed");
            }
            extractor.extract(&parsed, rel_path, options)
        }
        Err(e) => {
            warn!("Failed to parse {}: {}", rel_path, e);
            degraded_output(rel_path, lang, text)
        }
    }
}

pub fn degraded_output(rel_path: &str, lang: &str, text: &str) -> ExtractionOutput {
    ExtractionOutput {
        nodes: vec![file_node(rel_path, lang, text)],
        ..Default::default()
    }
}

/// `private` for `__name`, `protected` for `_name`, else `public`.
pub fn visibility(name: &str) -> &'static str {
    if name.starts_with("__") && !name.ends_with("__") {
        "private"
    } else if name.starts_with('_') {
        "protected"
    } else {
        "public"
    }
}

/// Whether a name reads as an upper-case constant such as `MAX_RETRIES`.
pub fn is_constant_name(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_uppercase()) && !name.chars().any(|c| c.is_lowercase())
}

/// First non-empty line of a doc comment, capped in length.
pub fn first_doc_line(doc: &str) -> Option<String> {
    doc.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| truncate_to(l, MAX_DOC_LINE_CHARS).to_string())
}

pub fn truncate_to(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Source text of a parsed node's span, by line.
pub fn line_snippet(parsed: &ParsedFile<'_>, start: u32, end: u32) -> String {
    parsed
        .source
        .lines()
        .skip(start.saturating_sub(1) as usize)
        .take((end.saturating_sub(start) + 1) as usize)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func_node(path: &str, name: &str, line: u32) -> Node {
        Node::new(NodeKind::Func, path, Some(name.to_string()), Some(line), Some(line + 1))
    }

    fn extraction(enrich: bool, cap: usize) -> FileExtraction {
        FileExtraction::new(
            file_node("pkg/mod.py", "python", "a\nb\nc\n"),
            "python",
            ExtractOptions {
                enrich,
                callsite_cap: cap,
            },
        )
    }

    #[test]
    fn test_file_node_shape() {
        let node = file_node("pkg/mod.py", "python", "a\nb\nc\n");
        assert_eq!(node.kind, NodeKind::File);
        assert_eq!(node.symbol.as_deref(), Some("mod.py"));
        assert_eq!(node.start_line, Some(1));
        assert_eq!(node.end_line, Some(3));
        assert_eq!(node.hash, Some(content_hash("a\nb\nc\n")));
    }

    #[test]
    fn test_callsite_cap_keeps_first_records() {
        let mut fx = extraction(true, 2);
        let file_id = fx.file_id().to_string();
        let caller = fx.add_symbol(func_node("pkg/mod.py", "main", 1), &file_id);
        for line in 0..5 {
            fx.record_call(&caller, "helper", "helper", 10 + line, "helper()");
        }
        let out = fx.finish();
        assert_eq!(out.callsites.len(), 2);
        assert_eq!(out.callsites[0].line, 10);
        assert_eq!(out.callsites[1].line, 11);
        assert_eq!(out.stats.callsite_cap_hits, 1);
        assert_eq!(out.stats.callsites_total, 2);
    }

    #[test]
    fn test_call_edges_resolve_same_file() {
        let mut fx = extraction(true, 10);
        let file_id = fx.file_id().to_string();
        let caller = fx.add_symbol(func_node("pkg/mod.py", "main", 1), &file_id);
        let helper = fx.add_symbol(func_node("pkg/mod.py", "helper", 5), &file_id);
        fx.record_call(&caller, "print", "print", 2, "print(x)");
        fx.record_call(&caller, "helper", "helper", 3, "helper()");
        fx.record_call(&caller, "helper", "helper", 4, "helper()");
        let out = fx.finish();

        let calls: Vec<_> = out.edges.iter().filter(|e| e.edge_type == EdgeType::Call).collect();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].dst, helper);
        assert_eq!(calls[1].dst, "print");
        assert_eq!(out.callsites.len(), 3);
        assert!(matches!(
            &out.callsites[0].callee_ref,
            CalleeRef::Unresolved { reason, .. } if reason == UNRESOLVED_REASON
        ));
        assert!(matches!(&out.callsites[1].callee_ref, CalleeRef::NodeId { value, .. } if *value == helper));
    }

    #[test]
    fn test_no_callsites_without_enrichment() {
        let mut fx = extraction(false, 1);
        let file_id = fx.file_id().to_string();
        let caller = fx.add_symbol(func_node("pkg/mod.py", "main", 1), &file_id);
        fx.record_call(&caller, "a", "a", 2, "a()");
        fx.record_call(&caller, "b", "b", 3, "b()");
        let out = fx.finish();
        assert!(out.callsites.is_empty());
        assert_eq!(out.stats.callsite_cap_hits, 0);
        assert_eq!(out.edges.len(), 2);
    }

    #[test]
    fn test_stats_merge() {
        let mut total = EnrichmentStats::default();
        let one = EnrichmentStats {
            funcs_total: 4,
            funcs_with_params: 3,
            callsites_total: 7,
            ..Default::default()
        };
        total += &one;
        total.merge(&one);
        assert_eq!(total.funcs_total, 8);
        assert_eq!(total.callsites_total, 14);
        assert_eq!(total.params_ratio(), 0.75);
    }

    #[test]
    fn test_visibility_and_constants() {
        assert_eq!(visibility("__secret"), "private");
        assert_eq!(visibility("__init__"), "public");
        assert_eq!(visibility("_helper"), "protected");
        assert_eq!(visibility("run"), "public");
        assert!(is_constant_name("MAX_SIZE"));
        assert!(is_constant_name("A1"));
        assert!(!is_constant_name("Config"));
        assert!(!is_constant_name("_"));
    }

    #[test]
    fn test_first_doc_line() {
        assert_eq!(first_doc_line("\n  Loads config.\n  More."), Some("Loads config.".to_string()));
        assert_eq!(first_doc_line("   \n"), None);
    }
}
