use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::{Node, NodeKind};

/// Borrowed projection of a node, as presented to a relevance oracle.
#[derive(Debug, Clone, Copy)]
pub struct NodeView<'a> {
    pub node_id: &'a str,
    pub kind: NodeKind,
    pub symbol: &'a str,
    pub path: &'a str,
    pub summary: &'a str,
}

impl<'a> From<&'a Node> for NodeView<'a> {
    fn from(node: &'a Node) -> Self {
        Self {
            node_id: &node.node_id,
            kind: node.kind,
            symbol: node.symbol.as_deref().unwrap_or(""),
            path: &node.path,
            summary: node.summary.as_deref().unwrap_or(""),
        }
    }
}

/// Verdict of an oracle on a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRelevance {
    #[serde(default)]
    pub relevant: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub is_answer: bool,
}

impl NodeRelevance {
    /// Fallback verdict used when the oracle could not be consulted.
    pub fn failed(error: impl std::fmt::Display) -> Self {
        Self {
            relevant: false,
            confidence: 0.0,
            reasoning: format!("Error: {error}"),
            is_answer: false,
        }
    }

    pub fn clamped(mut self) -> Self {
        self.confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }
}

/// Score for one child, addressed by its 1-based position in the list given
/// to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildRanking {
    pub index: usize,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Cuts `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// External judgment capability used by frontier search.
///
/// Implementations may fail; the search recovers from every error.
#[async_trait]
pub trait RelevanceOracle: Send + Sync {
    async fn judge(&self, node: &NodeView<'_>, query: &str) -> Result<NodeRelevance>;

    async fn rank_children(
        &self,
        parent_context: &str,
        children: &[NodeView<'_>],
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ChildRanking>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_verdict() {
        let v = NodeRelevance::failed("timeout");
        assert!(!v.relevant);
        assert_eq!(v.confidence, 0.0);
        assert_eq!(v.reasoning, "Error: timeout");
    }

    #[test]
    fn test_confidence_clamped() {
        let v = NodeRelevance {
            relevant: true,
            confidence: 3.0,
            reasoning: String::new(),
            is_answer: false,
        };
        assert_eq!(v.clamped().confidence, 1.0);
        let v = NodeRelevance {
            relevant: true,
            confidence: f64::NAN,
            reasoning: String::new(),
            is_answer: false,
        };
        assert_eq!(v.clamped().confidence, 0.0);
    }

    #[test]
    fn test_relevance_defaults_missing_fields() {
        let v: NodeRelevance = serde_json::from_str(r#"{"relevant": true}"#).unwrap();
        assert!(v.relevant);
        assert!(!v.is_answer);
        assert_eq!(v.confidence, 0.0);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_node_view_from_node() {
        let node = Node::new(NodeKind::Func, "a.py", Some("f".into()), Some(1), Some(2));
        let view = NodeView::from(&node);
        assert_eq!(view.symbol, "f");
        assert_eq!(view.summary, "");
        assert_eq!(view.kind, NodeKind::Func);
    }
}
