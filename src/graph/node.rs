use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Repo,
    Pkg,
    File,
    Class,
    Func,
    Block,
    Const,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Repo => "repo",
            NodeKind::Pkg => "pkg",
            NodeKind::File => "file",
            NodeKind::Class => "class",
            NodeKind::Func => "func",
            NodeKind::Block => "block",
            NodeKind::Const => "const",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "repo" => Some(NodeKind::Repo),
            "pkg" => Some(NodeKind::Pkg),
            "file" => Some(NodeKind::File),
            "class" => Some(NodeKind::Class),
            "func" => Some(NodeKind::Func),
            "block" => Some(NodeKind::Block),
            "const" => Some(NodeKind::Const),
            _ => None,
        }
    }

    /// Leaves of the lexical search: scored as candidates, never descended into.
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeKind::Func | NodeKind::Block | NodeKind::Const)
    }

    /// Structural nodes that guided search always expands.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            NodeKind::Repo | NodeKind::Pkg | NodeKind::File | NodeKind::Class
        )
    }

    /// Kinds the relevance oracle may accept as a final answer.
    pub fn is_answer_kind(&self) -> bool {
        matches!(
            self,
            NodeKind::Func | NodeKind::Block | NodeKind::Const | NodeKind::Class
        )
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content-addressed node identifier.
///
/// Hashes `kind`, `path`, `symbol` and the line span, so a node keeps its id
/// across builds as long as its name and position do not change.
pub fn stable_id(
    kind: NodeKind,
    path: &str,
    symbol: Option<&str>,
    start: Option<u32>,
    end: Option<u32>,
) -> String {
    let key = format!(
        "{}\t{}\t{}\t{}\t{}",
        kind.as_str(),
        path,
        symbol.unwrap_or(""),
        start.unwrap_or(0),
        end.unwrap_or(0)
    );
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// xxh3 hash of a file's content, rendered as 16 hex digits.
pub fn content_hash(text: &str) -> String {
    format!("{:016x}", xxhash_rust::xxh3::xxh3_64(text.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub parent_id: Option<String>,
    pub kind: NodeKind,
    pub path: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Node {
    /// Creates a node with its stable id and `loc` derived from the span.
    pub fn new(
        kind: NodeKind,
        path: impl Into<String>,
        symbol: Option<String>,
        start_line: Option<u32>,
        end_line: Option<u32>,
    ) -> Self {
        let path = path.into();
        let node_id = stable_id(kind, &path, symbol.as_deref(), start_line, end_line);
        let loc = match (start_line, end_line) {
            (Some(start), Some(end)) if end >= start => Some(end - start + 1),
            _ => None,
        };
        Self {
            node_id,
            parent_id: None,
            kind,
            path,
            lang: String::new(),
            symbol,
            signature: None,
            start_line,
            end_line,
            loc,
            summary: None,
            hash: None,
            extra: Map::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_summary(mut self, summary: Option<String>) -> Self {
        self.summary = summary;
        self
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    /// Attaches function/class doc metadata under `extra.doc`.
    pub fn with_doc(mut self, doc: Value) -> Self {
        self.extra.insert("doc".to_string(), doc);
        self
    }

    pub fn symbol_or_empty(&self) -> &str {
        self.symbol.as_deref().unwrap_or("")
    }

    /// Text indexed by the lexical index for this node.
    pub fn search_text(&self) -> String {
        [
            self.path.as_str(),
            self.symbol_or_empty(),
            self.signature.as_deref().unwrap_or(""),
            self.summary.as_deref().unwrap_or(""),
        ]
        .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    Import,
    Call,
    Inherit,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Import => "import",
            EdgeType::Call => "call",
            EdgeType::Inherit => "inherit",
        }
    }
}

/// Directed relation between nodes. `dst` may be an unresolved name when the
/// target is not defined in the same file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub src: String,
    pub dst: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Edge {
    pub fn new(
        src: impl Into<String>,
        dst: impl Into<String>,
        edge_type: EdgeType,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            edge_type,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CalleeRef {
    NodeId {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
    },
    Unresolved {
        value: String,
        symbol: String,
        reason: String,
    },
}

/// A single call expression observed inside a function body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallsiteRecord {
    pub caller_id: String,
    pub callee_ref: CalleeRef,
    pub file: String,
    pub line: u32,
    pub snippet: String,
}
