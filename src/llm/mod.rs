//! Clients for the external reasoning model: chat transport, relevance
//! oracle, and batch summarizer.

pub(crate) mod client;
mod relevance;
mod summarizer;

pub use client::{
    parse_json_reply, ChatClient, ChatClientConfig, ChatCompletion, ChatMessage, ChatUsage,
    CompletionOptions,
};
pub use relevance::{judge_prompt, ranking_prompt, LlmRelevanceOracle, MAX_RANKED_CHILDREN};
pub use summarizer::{Summarizer, MAX_SNIPPET_CHARS};
