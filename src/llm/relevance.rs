use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::Result;
use crate::search::oracle::{truncate_chars, ChildRanking, NodeRelevance, NodeView, RelevanceOracle};

use super::client::{parse_json_reply, ChatClient, ChatMessage, CompletionOptions};

const JUDGE_MAX_TOKENS: u32 = 200;
const RANK_MAX_TOKENS: u32 = 400;
const CHILD_SUMMARY_CHARS: usize = 100;
/// Children listed in a single ranking prompt.
pub const MAX_RANKED_CHILDREN: usize = 20;

const JUDGE_SYSTEM_PROMPT: &str = r#"You are a code navigation expert. Think first, then respond exactly in the requested JSON format. Stay factual and never invent behavior or files that are not in the input.

Respond in JSON format:
{
    "relevant": true/false,
    "confidence": 0.0-1.0,
    "reasoning": "brief explanation",
    "is_answer": true/false
}

Set "is_answer" to TRUE if this node IMPLEMENTS or DEFINES what the query asks about:
- Functions that implement features mentioned in the query
- Classes that define components asked about
- Constants/configs that define values asked about

Set "is_answer" to FALSE only for container nodes (packages, files) or nodes that just reference/call other code."#;

const RANK_SYSTEM_PROMPT: &str = r#"You are a code navigation expert. Given a query and a list of code nodes, rank which ones are MOST LIKELY to contain relevant information.

Respond in JSON format:
{
    "rankings": [
        {"index": 1, "score": 0.0-1.0, "reasoning": "why relevant"},
        ...
    ]
}

Be EXPLORATORY: include any children with score > 0.2. Even if you're not certain, include nodes that might lead to the answer. Rank up to {top_k} children."#;

#[derive(Debug, Deserialize)]
struct RankingReply {
    #[serde(default)]
    rankings: Vec<ChildRanking>,
}

/// Relevance oracle backed by a chat-completions model.
pub struct LlmRelevanceOracle {
    client: ChatClient,
}

impl LlmRelevanceOracle {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    fn options(&self, max_tokens: u32) -> CompletionOptions {
        // Reasoning models reject a custom temperature.
        let temperature = if self.client.model().to_lowercase().contains("gpt-5") {
            None
        } else {
            Some(0.2)
        };
        CompletionOptions {
            json_object: true,
            max_completion_tokens: Some(max_tokens),
            temperature,
        }
    }
}

pub fn judge_prompt(node: &NodeView<'_>, query: &str) -> String {
    let symbol = if node.symbol.is_empty() { "(anonymous)" } else { node.symbol };
    let summary = if node.summary.is_empty() {
        "No summary available"
    } else {
        node.summary
    };
    format!(
        "Query: \"{query}\"\n\nCode Node:\nNode Type: {}\nSymbol: {}\nPath: {}\nSummary: {}\n\nIs this node relevant? Does it answer the query?",
        node.kind, symbol, node.path, summary
    )
}

pub fn ranking_prompt(parent_context: &str, children: &[NodeView<'_>], query: &str) -> String {
    let listing = children
        .iter()
        .take(MAX_RANKED_CHILDREN)
        .enumerate()
        .map(|(i, child)| {
            let symbol = if child.symbol.is_empty() { "?" } else { child.symbol };
            let summary = if child.summary.is_empty() {
                "No summary"
            } else {
                truncate_chars(child.summary, CHILD_SUMMARY_CHARS)
            };
            format!("{}. {} '{}' - {}", i + 1, child.kind, symbol, summary)
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Query: \"{query}\"\n\n{parent_context}\n\nChildren to evaluate:\n{listing}\n\nWhich children should we explore?"
    )
}

#[async_trait]
impl RelevanceOracle for LlmRelevanceOracle {
    async fn judge(&self, node: &NodeView<'_>, query: &str) -> Result<NodeRelevance> {
        let completion = self
            .client
            .complete(
                &[
                    ChatMessage::system(JUDGE_SYSTEM_PROMPT),
                    ChatMessage::user(judge_prompt(node, query)),
                ],
                self.options(JUDGE_MAX_TOKENS),
            )
            .await?;
        let verdict: NodeRelevance = parse_json_reply(&completion.content)?;
        debug!(node_id = node.node_id, confidence = verdict.confidence, "oracle verdict");
        Ok(verdict)
    }

    async fn rank_children(
        &self,
        parent_context: &str,
        children: &[NodeView<'_>],
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ChildRanking>> {
        if children.is_empty() {
            return Ok(Vec::new());
        }
        let system = RANK_SYSTEM_PROMPT.replace("{top_k}", &top_k.to_string());
        let completion = self
            .client
            .complete(
                &[
                    ChatMessage::system(system),
                    ChatMessage::user(ranking_prompt(parent_context, children, query)),
                ],
                self.options(RANK_MAX_TOKENS),
            )
            .await?;
        let reply: RankingReply = parse_json_reply(&completion.content)?;
        Ok(reply.rankings)
    }
}
