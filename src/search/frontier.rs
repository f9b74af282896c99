//! Budgeted best-first search where an external oracle decides relevance.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::graph::{NodeKind, ProgramGraph};

use super::oracle::{truncate_chars, ChildRanking, NodeRelevance, NodeView, RelevanceOracle};
use super::trace::{TraceEvent, TraceRecorder};

/// Confidence above which a relevant node is expanded.
pub const PRIMARY_THRESHOLD: f64 = 0.3;
/// Confidence above which any node is expanded.
pub const SECONDARY_THRESHOLD: f64 = 0.15;

const PARENT_SUMMARY_CHARS: usize = 100;

#[derive(Debug, Clone)]
pub struct FrontierOptions {
    pub top: usize,
    pub budget: usize,
    pub max_children: usize,
    pub rank_top_k: usize,
    pub min_child_score: f64,
    pub deadline: Option<Instant>,
}

impl Default for FrontierOptions {
    fn default() -> Self {
        Self {
            top: 10,
            budget: 50,
            max_children: 20,
            rank_top_k: 5,
            min_child_score: 0.2,
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidedResult {
    pub node_id: String,
    /// Oracle confidence.
    pub score: f64,
    pub reasoning: String,
    pub path: String,
    pub symbol: Option<String>,
    pub kind: NodeKind,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierStats {
    pub steps: usize,
    pub nodes_visited: usize,
    pub answers_found: usize,
    pub budget: usize,
}

#[derive(Debug, Clone)]
pub struct FrontierOutcome {
    pub results: Vec<GuidedResult>,
    pub trace: TraceRecorder,
    pub stats: FrontierStats,
}

impl FrontierOutcome {
    pub fn results_json(&self) -> Vec<Value> {
        self.results
            .iter()
            .filter_map(|r| serde_json::to_value(r).ok())
            .collect()
    }
}

struct QueuedNode {
    score: f64,
    seq: Reverse<u64>,
    node_id: String,
}

impl PartialEq for QueuedNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedNode {}

impl PartialOrd for QueuedNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedNode {
    // Highest score first; equal scores pop in push order.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

fn should_expand(kind: NodeKind, verdict: &NodeRelevance) -> bool {
    kind.is_container()
        || (verdict.relevant && verdict.confidence > PRIMARY_THRESHOLD)
        || verdict.confidence > SECONDARY_THRESHOLD
}

/// Filters raw rankings to valid, sufficiently scored, distinct children,
/// best first, at most `top_k`.
fn select_rankings(
    rankings: Vec<ChildRanking>,
    child_count: usize,
    min_score: f64,
    top_k: usize,
) -> Vec<ChildRanking> {
    let mut seen = HashSet::new();
    let mut kept: Vec<ChildRanking> = rankings
        .into_iter()
        .filter(|r| r.index >= 1 && r.index <= child_count)
        .filter(|r| r.score.is_finite() && r.score > min_score)
        .filter(|r| seen.insert(r.index))
        .collect();
    kept.sort_by(|a, b| b.score.total_cmp(&a.score));
    kept.truncate(top_k);
    kept
}

/// Runs the oracle-guided search from the graph root.
///
/// Oracle failures never abort the search: a failed judgment counts as
/// "not relevant" and a failed ranking as "no children".
pub async fn frontier_search<O>(
    graph: &ProgramGraph,
    oracle: &O,
    query: &str,
    options: &FrontierOptions,
) -> FrontierOutcome
where
    O: RelevanceOracle + ?Sized,
{
    let root = graph.root();
    let mut seq: u64 = 0;
    let mut frontier = BinaryHeap::new();
    frontier.push(QueuedNode {
        score: 1.0,
        seq: Reverse(seq),
        node_id: root.node_id.clone(),
    });

    let mut visited: HashSet<String> = HashSet::new();
    let mut answers: Vec<GuidedResult> = Vec::new();
    let mut trace = TraceRecorder::new();
    let mut steps = 0;

    info!(query, budget = options.budget, "starting guided search");

    while steps < options.budget {
        if options.deadline.is_some_and(|d| Instant::now() >= d) {
            info!(steps, "guided search deadline reached");
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
        let view = NodeView::from(node);

        let verdict = match oracle.judge(&view, query).await {
            Ok(v) => v.clamped(),
            Err(e) => {
                warn!(node_id = %node.node_id, "relevance judgment failed: {}", e);
                NodeRelevance::failed(e)
            }
        };

        let mut meta = Map::new();
        meta.insert("relevant".into(), json!(verdict.relevant));
        meta.insert("confidence".into(), json!(verdict.confidence));
        meta.insert("is_answer".into(), json!(verdict.is_answer));
        meta.insert("symbol".into(), json!(view.symbol));
        meta.insert("path".into(), json!(view.path));
        trace.record(
            TraceEvent::Evaluate,
            &node.node_id,
            verdict.confidence,
            verdict.reasoning.clone(),
            meta,
        );
        debug!(
            step = steps,
            symbol = view.symbol,
            relevant = verdict.relevant,
            confidence = verdict.confidence,
            is_answer = verdict.is_answer,
            "node evaluated"
        );

        if verdict.is_answer && node.kind.is_answer_kind() {
            let mut meta = Map::new();
            meta.insert("symbol".into(), json!(view.symbol));
            trace.record(
                TraceEvent::Answer,
                &node.node_id,
                verdict.confidence,
                verdict.reasoning.clone(),
                meta,
            );
            answers.push(GuidedResult {
                node_id: node.node_id.clone(),
                score: verdict.confidence,
                reasoning: verdict.reasoning,
                path: node.path.clone(),
                symbol: node.symbol.clone(),
                kind: node.kind,
                summary: view.summary.to_string(),
            });
            continue;
        }

        if !should_expand(node.kind, &verdict) {
            continue;
        }
        let children = graph.children(&node.node_id);
        if children.is_empty() {
            continue;
        }
        let views: Vec<NodeView<'_>> = children
            .iter()
            .take(options.max_children)
            .map(|c| NodeView::from(*c))
            .collect();
        let parent_context = format!(
            "Parent: {} - {}",
            node.symbol.as_deref().unwrap_or("?"),
            truncate_chars(view.summary, PARENT_SUMMARY_CHARS)
        );

        let rankings = match oracle
            .rank_children(&parent_context, &views, query, options.rank_top_k)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(node_id = %node.node_id, "child ranking failed: {}", e);
                Vec::new()
            }
        };
        let selected = select_rankings(
            rankings,
            views.len(),
            options.min_child_score,
            options.rank_top_k,
        );
        debug!(
            ranked = selected.len(),
            children = children.len(),
            "children selected for exploration"
        );

        for ranking in selected {
            let child = views[ranking.index - 1];
            seq += 1;
            frontier.push(QueuedNode {
                score: ranking.score,
                seq: Reverse(seq),
                node_id: child.node_id.to_string(),
            });
            let mut meta = Map::new();
            meta.insert("parent".into(), json!(node.node_id));
            meta.insert("symbol".into(), json!(child.symbol));
            trace.record(
                TraceEvent::Expand,
                child.node_id,
                ranking.score,
                ranking.reasoning,
                meta,
            );
        }
    }

    // Stable sort keeps discovery order among equal confidences.
    answers.sort_by(|a, b| b.score.total_cmp(&a.score));
    let stats = FrontierStats {
        steps,
        nodes_visited: visited.len(),
        answers_found: answers.len(),
        budget: options.budget,
    };
    answers.truncate(options.top);

    info!(
        steps = stats.steps,
        visited = stats.nodes_visited,
        answers = stats.answers_found,
        "guided search complete"
    );

    FrontierOutcome {
        results: answers,
        trace,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CodeIndexError, Result};
    use crate::graph::Node;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn node(id: &str, parent: Option<&str>, kind: NodeKind, symbol: &str) -> Node {
        let mut n = Node::new(kind, format!("{symbol}.py"), Some(symbol.to_string()), None, None);
        n.node_id = id.to_string();
        n.parent_id = parent.map(str::to_string);
        n
    }

    /// repo -> 2 pkgs -> 2 files each -> 3 funcs each
    fn wide_graph() -> ProgramGraph {
        let mut nodes = vec![node("r", None, NodeKind::Repo, "repo")];
        for p in 0..2 {
            let pid = format!("p{p}");
            nodes.push(node(&pid, Some("r"), NodeKind::Pkg, &pid));
            for f in 0..2 {
                let fid = format!("{pid}f{f}");
                nodes.push(node(&fid, Some(&pid), NodeKind::File, &fid));
                for g in 0..3 {
                    let gid = format!("{fid}g{g}");
                    nodes.push(node(&gid, Some(&fid), NodeKind::Func, &gid));
                }
            }
        }
        ProgramGraph::from_parts(nodes, vec![]).unwrap()
    }

    /// Judges everything irrelevant but ranks every child as worth a look.
    struct NegativeOracle;

    #[async_trait]
    impl RelevanceOracle for NegativeOracle {
        async fn judge(&self, _node: &NodeView<'_>, _query: &str) -> Result<NodeRelevance> {
            Ok(NodeRelevance {
                relevant: false,
                confidence: 0.0,
                reasoning: "no".into(),
                is_answer: false,
            })
        }

        async fn rank_children(
            &self,
            _parent: &str,
            children: &[NodeView<'_>],
            _query: &str,
            _top_k: usize,
        ) -> Result<Vec<ChildRanking>> {
            Ok((1..=children.len())
                .map(|index| ChildRanking {
                    index,
                    score: 0.5,
                    reasoning: "maybe".into(),
                })
                .collect())
        }
    }

    /// Accepts nodes whose symbol contains a needle.
    struct NeedleOracle {
        needle: &'static str,
        judged: AtomicUsize,
    }

    #[async_trait]
    impl RelevanceOracle for NeedleOracle {
        async fn judge(&self, node: &NodeView<'_>, _query: &str) -> Result<NodeRelevance> {
            self.judged.fetch_add(1, AtomicOrdering::SeqCst);
            let hit = node.symbol.contains(self.needle);
            Ok(NodeRelevance {
                relevant: hit,
                confidence: if hit { 0.9 } else { 0.1 },
                reasoning: format!("checked {}", node.symbol),
                is_answer: hit,
            })
        }

        async fn rank_children(
            &self,
            _parent: &str,
            children: &[NodeView<'_>],
            _query: &str,
            _top_k: usize,
        ) -> Result<Vec<ChildRanking>> {
            Ok(children
                .iter()
                .enumerate()
                .map(|(i, c)| ChildRanking {
                    index: i + 1,
                    score: if c.symbol.contains(self.needle) || c.kind.is_container() { 0.8 } else { 0.1 },
                    reasoning: String::new(),
                })
                .collect())
        }
    }

    struct FailingOracle;

    #[async_trait]
    impl RelevanceOracle for FailingOracle {
        async fn judge(&self, _node: &NodeView<'_>, _query: &str) -> Result<NodeRelevance> {
            Err(CodeIndexError::Oracle("connection refused".into()))
        }

        async fn rank_children(
            &self,
            _parent: &str,
            _children: &[NodeView<'_>],
            _query: &str,
            _top_k: usize,
        ) -> Result<Vec<ChildRanking>> {
            Err(CodeIndexError::Oracle("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_negative_oracle_exhausts_budget_without_answers() {
        let graph = wide_graph();
        let opts = FrontierOptions {
            budget: 6,
            ..Default::default()
        };
        let outcome = frontier_search(&graph, &NegativeOracle, "anything", &opts).await;
        assert!(outcome.results.is_empty());
        assert!(!outcome.trace.is_empty());
        assert_eq!(outcome.trace.count(TraceEvent::Evaluate), 6);
        assert_eq!(outcome.stats.steps, 6);
        assert_eq!(outcome.stats.answers_found, 0);
    }

    #[tokio::test]
    async fn test_negative_oracle_stops_when_frontier_empties() {
        let graph = wide_graph();
        let opts = FrontierOptions {
            budget: 500,
            ..Default::default()
        };
        let outcome = frontier_search(&graph, &NegativeOracle, "anything", &opts).await;
        // Every node is reachable: 1 repo + 2 pkgs + 4 files + 12 funcs.
        assert_eq!(outcome.stats.nodes_visited, 19);
        assert_eq!(outcome.trace.count(TraceEvent::Evaluate), 19);
        assert!(outcome.stats.steps < opts.budget);
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_never_exceeds_budget() {
        let graph = wide_graph();
        for budget in [0, 1, 3, 10] {
            let opts = FrontierOptions {
                budget,
                ..Default::default()
            };
            let outcome = frontier_search(&graph, &NegativeOracle, "q", &opts).await;
            assert!(outcome.stats.steps <= budget);
            assert!(outcome.trace.count(TraceEvent::Evaluate) <= budget);
        }
    }

    #[tokio::test]
    async fn test_needle_oracle_finds_answer() {
        let graph = wide_graph();
        let oracle = NeedleOracle {
            needle: "p1f0g2",
            judged: AtomicUsize::new(0),
        };
        let outcome = frontier_search(&graph, &oracle, "where is it", &FrontierOptions::default()).await;
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].node_id, "p1f0g2");
        assert_eq!(outcome.results[0].score, 0.9);
        assert_eq!(outcome.trace.count(TraceEvent::Answer), 1);
        // Low-scored siblings are never queued.
        assert!(oracle.judged.load(AtomicOrdering::SeqCst) < graph.len());
    }

    #[tokio::test]
    async fn test_oracle_errors_are_recovered() {
        let graph = wide_graph();
        let outcome = frontier_search(&graph, &FailingOracle, "q", &FrontierOptions::default()).await;
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.stats.steps, 1);
        let first = &outcome.trace.steps()[0];
        assert_eq!(first.event, TraceEvent::Evaluate);
        assert!(first.reason.starts_with("Error:"));
        assert_eq!(first.score, 0.0);
    }

    #[tokio::test]
    async fn test_expired_deadline_stops_immediately() {
        let graph = wide_graph();
        let opts = FrontierOptions {
            deadline: Some(Instant::now()),
            ..Default::default()
        };
        let outcome = frontier_search(&graph, &NegativeOracle, "q", &opts).await;
        assert_eq!(outcome.stats.steps, 0);
        assert!(outcome.trace.is_empty());
    }

    #[test]
    fn test_select_rankings_filters_and_orders() {
        let raw = vec![
            ChildRanking { index: 0, score: 0.9, reasoning: String::new() },
            ChildRanking { index: 2, score: 0.4, reasoning: String::new() },
            ChildRanking { index: 3, score: 0.2, reasoning: String::new() },
            ChildRanking { index: 1, score: 0.7, reasoning: String::new() },
            ChildRanking { index: 9, score: 0.8, reasoning: String::new() },
            ChildRanking { index: 2, score: 0.6, reasoning: String::new() },
        ];
        let kept = select_rankings(raw, 3, 0.2, 5);
        let idx: Vec<_> = kept.iter().map(|r| r.index).collect();
        assert_eq!(idx, vec![1, 2]);
        assert_eq!(kept[1].score, 0.4);
    }

    #[test]
    fn test_should_expand_policy() {
        let verdict = |relevant, confidence| NodeRelevance {
            relevant,
            confidence,
            reasoning: String::new(),
            is_answer: false,
        };
        assert!(should_expand(NodeKind::File, &verdict(false, 0.0)));
        assert!(should_expand(NodeKind::Func, &verdict(true, 0.31)));
        assert!(should_expand(NodeKind::Func, &verdict(false, 0.16)));
        assert!(!should_expand(NodeKind::Func, &verdict(false, 0.15)));
        assert!(!should_expand(NodeKind::Block, &verdict(true, 0.1)));
    }
}
