//! Decision trace shared by both search strategies.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::graph::persist::TRACE_DIR;

pub const LAST_TRACE_FILE: &str = "last_trace.json";
pub const RESULTS_FILE: &str = "results.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceEvent {
    /// A node was taken from the frontier (lexical) or a child was queued (guided).
    Expand,
    /// The relevance oracle judged a node.
    Evaluate,
    /// A node was accepted as a result.
    Answer,
}

impl TraceEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceEvent::Expand => "expand",
            TraceEvent::Evaluate => "evaluate",
            TraceEvent::Answer => "answer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub step: usize,
    pub event: TraceEvent,
    pub node_id: String,
    pub score: f64,
    pub reason: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

/// Append-only log of search decisions in the order they were made.
#[derive(Debug, Clone, Default)]
pub struct TraceRecorder {
    steps: Vec<TraceStep>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        event: TraceEvent,
        node_id: &str,
        score: f64,
        reason: impl Into<String>,
        meta: Map<String, Value>,
    ) {
        let step = self.steps.len() + 1;
        self.steps.push(TraceStep {
            step,
            event,
            node_id: node_id.to_string(),
            score,
            reason: reason.into(),
            meta,
        });
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn count(&self, event: TraceEvent) -> usize {
        self.steps.iter().filter(|s| s.event == event).count()
    }

    pub fn into_steps(self) -> Vec<TraceStep> {
        self.steps
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Bm25,
    Llm,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Bm25 => "bm25",
            SearchMode::Llm => "llm",
        }
    }
}

/// Persisted record of the last search: query, results and full trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceDocument {
    pub query: String,
    pub mode: SearchMode,
    pub results: Vec<Value>,
    pub trace: Vec<TraceStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Value>,
}

impl TraceDocument {
    pub fn trace_dir(index_dir: &Path) -> PathBuf {
        index_dir.join(TRACE_DIR)
    }

    /// Writes `trace/last_trace.json` and `trace/results.json`, returning the
    /// path of the trace file.
    pub fn save(&self, index_dir: &Path) -> Result<PathBuf> {
        let dir = Self::trace_dir(index_dir);
        std::fs::create_dir_all(&dir)?;

        let trace_path = dir.join(LAST_TRACE_FILE);
        serde_json::to_writer_pretty(BufWriter::new(File::create(&trace_path)?), self)?;
        serde_json::to_writer_pretty(
            BufWriter::new(File::create(dir.join(RESULTS_FILE))?),
            &self.results,
        )?;
        Ok(trace_path)
    }

    /// Loads the last persisted trace of an index.
    pub fn load(index_dir: &Path) -> Result<Self> {
        let path = Self::trace_dir(index_dir).join(LAST_TRACE_FILE);
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Renders one line per decision without re-running the search.
    pub fn replay(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.trace.len() + 2);
        lines.push(format!(
            "query={:?} mode={} steps={} results={}",
            self.query,
            self.mode.as_str(),
            self.trace.len(),
            self.results.len()
        ));
        for step in &self.trace {
            let label = step
                .meta
                .get("symbol")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| short_id(&step.node_id).to_string());
            lines.push(format!(
                "{:>4}. {:<8} {:<12} score={:.3}  {}",
                step.step,
                step.event.as_str(),
                label,
                step.score,
                step.reason
            ));
        }
        if let Some(stats) = &self.stats {
            lines.push(format!("stats: {stats}"));
        }
        lines
    }
}

fn short_id(node_id: &str) -> &str {
    node_id.get(..8).unwrap_or(node_id)
}
