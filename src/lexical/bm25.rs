use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CodeIndexError, Result};

use super::tokenizer::tokenize;

pub const DEFAULT_K1: f64 = 1.5;
pub const DEFAULT_B: f64 = 0.75;
/// Per-document cap on distinct terms kept at indexing time.
pub const DEFAULT_TERM_LIMIT: usize = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocStats {
    pub dl: u32,
    pub tf: BTreeMap<String, u32>,
}

/// Okapi BM25 index over node documents.
///
/// Documents are added first, then `finalize` computes document frequencies
/// and the average length exactly once. Scoring before that is an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Index {
    pub k1: f64,
    pub b: f64,
    #[serde(rename = "N")]
    n: usize,
    avgdl: f64,
    df: BTreeMap<String, u32>,
    docs: BTreeMap<String, DocStats>,
    #[serde(skip)]
    postings: HashMap<String, Vec<String>>,
    #[serde(skip)]
    finalized: bool,
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new(DEFAULT_K1, DEFAULT_B)
    }
}

impl Bm25Index {
    pub fn new(k1: f64, b: f64) -> Self {
        Self {
            k1,
            b,
            n: 0,
            avgdl: 0.0,
            df: BTreeMap::new(),
            docs: BTreeMap::new(),
            postings: HashMap::new(),
            finalized: false,
        }
    }

    pub fn add_document(&mut self, doc_id: &str, text: &str) -> Result<()> {
        self.add_document_with_limit(doc_id, text, Some(DEFAULT_TERM_LIMIT))
    }

    /// Adds a document, keeping at most `limit_terms` distinct terms ranked by
    /// frequency (ties keep the earliest occurring term).
    pub fn add_document_with_limit(
        &mut self,
        doc_id: &str,
        text: &str,
        limit_terms: Option<usize>,
    ) -> Result<()> {
        if self.finalized {
            return Err(CodeIndexError::IndexState(format!(
                "cannot add document {doc_id} after finalize()"
            )));
        }

        let mut order: Vec<String> = Vec::new();
        let mut counts: HashMap<String, u32> = HashMap::new();
        for token in tokenize(text) {
            let count = counts.entry(token.clone()).or_insert(0);
            if *count == 0 {
                order.push(token);
            }
            *count += 1;
        }
        if let Some(limit) = limit_terms {
            if order.len() > limit {
                order.sort_by(|a, b| counts[b].cmp(&counts[a]));
                order.truncate(limit);
            }
        }

        let tf: BTreeMap<String, u32> = order
            .into_iter()
            .map(|t| {
                let c = counts[&t];
                (t, c)
            })
            .collect();
        let dl = tf.values().sum();
        if self.docs.insert(doc_id.to_string(), DocStats { dl, tf }).is_none() {
            self.n += 1;
        }
        Ok(())
    }

    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Err(CodeIndexError::IndexState(
                "finalize() called more than once".to_string(),
            ));
        }
        let mut total: u64 = 0;
        let mut df: BTreeMap<String, u32> = BTreeMap::new();
        for doc in self.docs.values() {
            total += u64::from(doc.dl);
            for term in doc.tf.keys() {
                *df.entry(term.clone()).or_insert(0) += 1;
            }
        }
        self.df = df;
        self.avgdl = if self.n > 0 {
            total as f64 / self.n as f64
        } else {
            0.0
        };
        self.build_postings();
        self.finalized = true;
        debug!(docs = self.n, terms = self.df.len(), avgdl = self.avgdl, "BM25 index finalized");
        Ok(())
    }

    fn build_postings(&mut self) {
        let mut postings: HashMap<String, Vec<String>> = HashMap::new();
        for (doc_id, doc) in &self.docs {
            for term in doc.tf.keys() {
                postings.entry(term.clone()).or_default().push(doc_id.clone());
            }
        }
        self.postings = postings;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn avgdl(&self) -> f64 {
        self.avgdl
    }

    pub fn document_frequency(&self, term: &str) -> u32 {
        self.df.get(term).copied().unwrap_or(0)
    }

    pub fn idf(&self, term: &str) -> f64 {
        let n = self.n as f64;
        let df = f64::from(self.document_frequency(term));
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Scores one document against already tokenized query terms.
    pub fn score(&self, doc_id: &str, query_terms: &[String]) -> Result<f64> {
        if !self.finalized {
            return Err(CodeIndexError::NotFinalized { phase: "score" });
        }
        Ok(self.score_unchecked(doc_id, query_terms))
    }

    fn score_unchecked(&self, doc_id: &str, query_terms: &[String]) -> f64 {
        let Some(doc) = self.docs.get(doc_id) else {
            return 0.0;
        };
        let dl = if doc.dl == 0 { 1.0 } else { f64::from(doc.dl) };
        let avgdl = if self.avgdl == 0.0 { 1.0 } else { self.avgdl };
        let mut score = 0.0;
        for term in query_terms {
            let tf = f64::from(doc.tf.get(term).copied().unwrap_or(0));
            if tf == 0.0 {
                continue;
            }
            let denom = tf + self.k1 * (1.0 - self.b + self.b * dl / avgdl);
            score += self.idf(term) * (tf * (self.k1 + 1.0)) / denom;
        }
        score
    }

    /// Returns up to `top_k` documents with a positive score, best first.
    /// Equal scores are ordered by document id.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<(String, f64)>> {
        if !self.finalized {
            return Err(CodeIndexError::NotFinalized { phase: "search" });
        }
        if self.n == 0 {
            return Err(CodeIndexError::EmptyCorpus {
                query: query.to_string(),
            });
        }

        let terms = tokenize(query);
        let mut candidates: HashSet<&str> = HashSet::new();
        for term in &terms {
            if let Some(docs) = self.postings.get(term) {
                candidates.extend(docs.iter().map(String::as_str));
            }
        }

        let mut scored: Vec<(String, f64)> = candidates
            .into_iter()
            .map(|doc_id| (doc_id.to_string(), self.score_unchecked(doc_id, &terms)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(top_k);
        Ok(scored)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Loads a saved index. The result is finalized and ready to search.
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut index: Self = serde_json::from_reader(reader)?;
        if index.n != index.docs.len() {
            return Err(CodeIndexError::IndexState(format!(
                "{} declares N={} but holds {} documents",
                path.display(),
                index.n,
                index.docs.len()
            )));
        }
        index.build_postings();
        index.finalized = true;
        Ok(index)
    }
}
