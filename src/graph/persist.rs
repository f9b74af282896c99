//! On-disk layout of a built index: JSON-lines tables plus `meta.json`.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CodeIndexError, Result};

use super::node::{CallsiteRecord, Edge, Node};

pub const NODES_FILE: &str = "nodes.jsonl";
pub const EDGES_FILE: &str = "edges.jsonl";
pub const NODE_TEXTS_FILE: &str = "node_texts.jsonl";
pub const XREF_CALLS_FILE: &str = "xref_calls.jsonl";
pub const META_FILE: &str = "meta.json";
pub const BM25_FILE: &str = "bm25.json";
pub const TRACE_DIR: &str = "trace";

/// Lexical document text for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeText {
    pub node_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub repo_id: String,
    /// Unix timestamp (seconds) of the build.
    pub created: u64,
    pub langs: Vec<String>,
    pub node_count: usize,
    pub edge_count: usize,
    #[serde(default)]
    pub enrichment: bool,
    pub tool_version: String,
}

pub fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a JSON-lines file, skipping blank lines.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line).map_err(|e| {
            CodeIndexError::Parse(format!("{}:{}: {}", path.display(), line_no + 1, e))
        })?;
        rows.push(row);
    }
    Ok(rows)
}

pub fn write_nodes(path: &Path, nodes: &[Node]) -> Result<()> {
    write_jsonl(path, nodes)
}

pub fn read_nodes(path: &Path) -> Result<Vec<Node>> {
    read_jsonl(path)
}

pub fn write_edges(path: &Path, edges: &[Edge]) -> Result<()> {
    write_jsonl(path, edges)
}

pub fn read_edges(path: &Path) -> Result<Vec<Edge>> {
    read_jsonl(path)
}

pub fn write_xref_calls(path: &Path, calls: &[CallsiteRecord]) -> Result<()> {
    write_jsonl(path, calls)
}

pub fn read_xref_calls(path: &Path) -> Result<Vec<CallsiteRecord>> {
    read_jsonl(path)
}

pub fn write_meta(path: &Path, meta: &IndexMeta) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, meta)?;
    Ok(())
}

pub fn read_meta(path: &Path) -> Result<IndexMeta> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
