//! Lexical search that walks the graph top-down, steering by aggregated BM25
//! scores of each subtree.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::Result;
use crate::graph::{NodeKind, ProgramGraph};
use crate::lexical::Bm25Index;

use super::trace::{TraceEvent, TraceRecorder};

/// Bonus per query word found verbatim in a node's symbol or path.
pub const KEYWORD_BONUS: f64 = 0.1;
/// Weight of the local score in the final hybrid ranking.
pub const LOCAL_WEIGHT: f64 = 2.0;
const MIN_LEXICAL_POOL: usize = 200;

#[derive(Debug, Clone)]
pub struct HierarchicalOptions {
    pub top: usize,
    pub budget: usize,
    pub branch_limit: usize,
    pub deadline: Option<Instant>,
}

impl Default for HierarchicalOptions {
    fn default() -> Self {
        Self {
            top: 10,
            budget: 120,
            branch_limit: 10,
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalResult {
    pub node_id: String,
    /// Local BM25 score of the node itself.
    pub score: f64,
    pub aggregate_score: f64,
    pub hybrid_score: f64,
    pub path: String,
    pub symbol: Option<String>,
    pub kind: NodeKind,
}

#[derive(Debug, Clone)]
pub struct HierarchicalOutcome {
    pub results: Vec<LexicalResult>,
    pub trace: TraceRecorder,
    pub steps: usize,
    pub candidates: usize,
}

struct FrontierEntry {
    score: f64,
    node_id: String,
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrontierEntry {}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontierEntry {
    // Max-heap on score; on ties the smaller node id pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.node_id.cmp(&self.node_id))
    }
}

struct Scorer<'a> {
    graph: &'a ProgramGraph,
    local: HashMap<String, f64>,
    aggregate: HashMap<&'a str, f64>,
    query_words: Vec<String>,
}

impl<'a> Scorer<'a> {
    fn new(graph: &'a ProgramGraph, local: HashMap<String, f64>, query: &str) -> Self {
        let root = graph.root();
        let mut order: Vec<&'a str> = vec![root.node_id.as_str()];
        order.extend(graph.descendants(&root.node_id).into_iter().map(|n| n.node_id.as_str()));

        // Reverse pre-order visits every child before its parent.
        let mut aggregate: HashMap<&'a str, f64> = HashMap::with_capacity(order.len());
        for &id in order.iter().rev() {
            let mut total = local.get(id).copied().unwrap_or(0.0);
            for child in graph.children(id) {
                total += aggregate.get(child.node_id.as_str()).copied().unwrap_or(0.0);
            }
            aggregate.insert(id, total);
        }

        let query_words = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        Self {
            graph,
            local,
            aggregate,
            query_words,
        }
    }

    fn local(&self, node_id: &str) -> f64 {
        self.local.get(node_id).copied().unwrap_or(0.0)
    }

    fn aggregate(&self, node_id: &str) -> f64 {
        self.aggregate.get(node_id).copied().unwrap_or(0.0)
    }

    fn node_score(&self, node_id: &str) -> f64 {
        let Some(node) = self.graph.node(node_id) else {
            return 0.0;
        };
        let symbol = node.symbol_or_empty().to_lowercase();
        let path = node.path.to_lowercase();
        let hits = self
            .query_words
            .iter()
            .filter(|w| (!symbol.is_empty() && symbol.contains(w.as_str())) || path.contains(w.as_str()))
            .count();
        self.aggregate(node_id) + KEYWORD_BONUS * hits as f64
    }
}

/// Runs the aggregate-guided best-first search.
///
/// Leaves (functions, methods, constants) become candidates and are ranked by
/// `2 * local + aggregate`. Exhausting the budget or deadline returns the
/// candidates found so far.
pub fn hierarchical_search(
    graph: &ProgramGraph,
    index: &Bm25Index,
    query: &str,
    options: &HierarchicalOptions,
) -> Result<HierarchicalOutcome> {
    let pool = (options.top * 20).max(MIN_LEXICAL_POOL);
    let local: HashMap<String, f64> = index
        .search(query, pool)?
        .into_iter()
        .filter(|(id, _)| graph.contains(id))
        .collect();

    let mut candidates: HashSet<&str> = local.keys().map(String::as_str).collect();
    for id in local.keys() {
        for ancestor in graph.ancestors(id) {
            candidates.insert(ancestor.node_id.as_str());
        }
    }
    let candidate_count = candidates.len();
    debug!(scored = local.len(), candidates = candidate_count, "lexical candidates collected");

    let scorer = Scorer::new(graph, local, query);
    let root_id = graph.root().node_id.clone();

    let mut frontier = BinaryHeap::new();
    frontier.push(FrontierEntry {
        score: scorer.node_score(&root_id),
        node_id: root_id.clone(),
    });
    let mut visited: HashSet<String> = HashSet::new();
    let mut answers: Vec<LexicalResult> = Vec::new();
    let mut trace = TraceRecorder::new();
    let mut steps = 0;

    while steps < options.budget {
        if options.deadline.is_some_and(|d| Instant::now() >= d) {
            debug!(steps, "lexical search deadline reached");
            break;
        }
        let Some(entry) = frontier.pop() else {
            break;
        };
        steps += 1;
        if !visited.insert(entry.node_id.clone()) {
            continue;
        }
        let Some(node) = graph.node(&entry.node_id) else {
            continue;
        };

        let mut meta = Map::new();
        meta.insert("kind".into(), json!(node.kind.as_str()));
        if node.node_id == root_id {
            meta.insert("candidates".into(), json!(candidate_count));
        }
        trace.record(
            TraceEvent::Expand,
            &node.node_id,
            entry.score,
            format!(
                "agg(desc BM25)={:.3}; symbol={}; path={}",
                entry.score,
                node.symbol.as_deref().unwrap_or("-"),
                node.path
            ),
            meta,
        );

        if node.kind.is_leaf() {
            let local = scorer.local(&node.node_id);
            let aggregate = scorer.node_score(&node.node_id);
            let hybrid = LOCAL_WEIGHT * local + aggregate;
            let mut meta = Map::new();
            meta.insert("aggregate_score".into(), json!(aggregate));
            trace.record(
                TraceEvent::Answer,
                &node.node_id,
                local,
                format!("leaf candidate; local={local:.3} agg={aggregate:.3}"),
                meta,
            );
            answers.push(LexicalResult {
                node_id: node.node_id.clone(),
                score: local,
                aggregate_score: aggregate,
                hybrid_score: hybrid,
                path: node.path.clone(),
                symbol: node.symbol.clone(),
                kind: node.kind,
            });
            continue;
        }

        let mut kids: Vec<(f64, &str)> = graph
            .children(&node.node_id)
            .into_iter()
            .filter(|c| !visited.contains(&c.node_id))
            .map(|c| (scorer.node_score(&c.node_id), c.node_id.as_str()))
            .collect();
        kids.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        for (score, id) in kids.into_iter().take(options.branch_limit) {
            frontier.push(FrontierEntry {
                score,
                node_id: id.to_string(),
            });
        }
    }

    answers.sort_by(|a, b| {
        b.hybrid_score
            .total_cmp(&a.hybrid_score)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    answers.truncate(options.top);

    Ok(HierarchicalOutcome {
        results: answers,
        trace,
        steps,
        candidates: candidate_count,
    })
}

impl HierarchicalOutcome {
    pub fn results_json(&self) -> Vec<Value> {
        self.results
            .iter()
            .filter_map(|r| serde_json::to_value(r).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;

    fn node(id: &str, parent: Option<&str>, kind: NodeKind, path: &str, symbol: &str, summary: &str) -> Node {
        let mut n = Node::new(kind, path, Some(symbol.to_string()), None, None)
            .with_summary((!summary.is_empty()).then(|| summary.to_string()));
        n.node_id = id.to_string();
        n.parent_id = parent.map(str::to_string);
        n
    }

    fn fixture() -> (ProgramGraph, Bm25Index) {
        let nodes = vec![
            node("r", None, NodeKind::Repo, "/repo", "repo", ""),
            node("p", Some("r"), NodeKind::Pkg, "app", "app", ""),
            node("f", Some("p"), NodeKind::File, "app/main.py", "main.py", ""),
            node("f1", Some("f"), NodeKind::Func, "app/main.py", "parse_config", "Parse the config file"),
            node("f2", Some("f"), NodeKind::Func, "app/main.py", "load_config", "Load config from disk"),
            node("f3", Some("f"), NodeKind::Func, "app/main.py", "noop", ""),
            node("g", Some("p"), NodeKind::File, "app/util.py", "util.py", ""),
            node("g1", Some("g"), NodeKind::Const, "app/util.py", "LIMIT", "maximum retries"),
        ];
        let mut index = Bm25Index::default();
        for n in &nodes {
            index.add_document(&n.node_id, &n.search_text()).unwrap();
        }
        index.finalize().unwrap();
        (ProgramGraph::from_parts(nodes, vec![]).unwrap(), index)
    }

    #[test]
    fn test_config_functions_rank_above_noop() {
        let (graph, index) = fixture();
        let outcome = hierarchical_search(&graph, &index, "config", &HierarchicalOptions::default()).unwrap();
        let ids: Vec<_> = outcome.results.iter().map(|r| r.node_id.as_str()).collect();
        let pos = |id: &str| ids.iter().position(|x| *x == id);
        assert!(pos("f1").is_some() && pos("f2").is_some());
        if let Some(noop) = pos("f3") {
            assert!(pos("f1").unwrap() < noop);
            assert!(pos("f2").unwrap() < noop);
        }
    }

    #[test]
    fn test_aggregate_at_least_local() {
        let (graph, index) = fixture();
        let outcome = hierarchical_search(&graph, &index, "config retries", &HierarchicalOptions::default()).unwrap();
        assert!(!outcome.results.is_empty());
        for r in &outcome.results {
            assert!(r.aggregate_score >= r.score);
            assert!((r.hybrid_score - (2.0 * r.score + r.aggregate_score)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_search_is_deterministic() {
        let (graph, index) = fixture();
        let opts = HierarchicalOptions::default();
        let a = hierarchical_search(&graph, &index, "load config", &opts).unwrap();
        let b = hierarchical_search(&graph, &index, "load config", &opts).unwrap();
        assert_eq!(a.results, b.results);
        assert_eq!(a.trace.steps(), b.trace.steps());
    }

    #[test]
    fn test_budget_limits_steps() {
        let (graph, index) = fixture();
        let opts = HierarchicalOptions {
            budget: 2,
            ..Default::default()
        };
        let outcome = hierarchical_search(&graph, &index, "config", &opts).unwrap();
        assert_eq!(outcome.steps, 2);
        assert_eq!(outcome.trace.count(TraceEvent::Expand), 2);
        assert!(outcome.results.is_empty());
    }

    #[test]
    fn test_expired_deadline_returns_empty() {
        let (graph, index) = fixture();
        let opts = HierarchicalOptions {
            deadline: Some(Instant::now()),
            ..Default::default()
        };
        let outcome = hierarchical_search(&graph, &index, "config", &opts).unwrap();
        assert!(outcome.trace.is_empty());
        assert!(outcome.results.is_empty());
    }

    #[test]
    fn test_root_step_records_candidates_and_answers_carry_aggregate() {
        let (graph, index) = fixture();
        let outcome = hierarchical_search(&graph, &index, "config", &HierarchicalOptions::default()).unwrap();
        let first = &outcome.trace.steps()[0];
        assert_eq!(first.node_id, "r");
        // f1, f2 and their three ancestors
        assert_eq!(first.meta["candidates"], 5);
        assert_eq!(outcome.candidates, 5);
        let answer = outcome
            .trace
            .steps()
            .iter()
            .find(|s| s.event == TraceEvent::Answer)
            .unwrap();
        assert!(answer.meta.contains_key("aggregate_score"));
        assert!(answer.reason.starts_with("leaf candidate"));
    }

    #[test]
    fn test_branch_limit_restricts_children() {
        let (graph, index) = fixture();
        let opts = HierarchicalOptions {
            branch_limit: 1,
            ..Default::default()
        };
        let outcome = hierarchical_search(&graph, &index, "config", &opts).unwrap();
        // Only the best child of each container is explored.
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].node_id, "f1");
    }

    #[test]
    fn test_no_match_is_not_an_error() {
        let (graph, index) = fixture();
        let outcome = hierarchical_search(&graph, &index, "zzz", &HierarchicalOptions::default()).unwrap();
        assert!(outcome.results.iter().all(|r| r.score == 0.0));
    }
}
