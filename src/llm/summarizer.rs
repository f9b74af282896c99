use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{CodeIndexError, Result};
use crate::search::oracle::truncate_chars;

use super::client::{ChatClient, ChatMessage, CompletionOptions};

/// Longest code snippet sent per summary request.
pub const MAX_SNIPPET_CHARS: usize = 4000;

const SUMMARY_SYSTEM_PROMPT: &str = "You are a concise code documenter for search indexing. \
Reason internally, then respond exactly as instructed.";

const SUMMARY_PROMPT: &str = "You are documenting code for search/navigation. Think through the code, then respond \
as 5-8 concise bullet points covering:\n\
- Purpose (one line)\n\
- Inputs/outputs\n\
- Side effects (DB/HTTP/files)\n\
- Exceptions or logging\n\
- Concurrency/latency considerations\n\
- Key callees/callers\n\
Rules: use plain-text bullets (no code fences), bullets only, \
at most 80 words total, and prefer confident statements over speculation.";

/// Batch code summarizer over a chat-completions model.
pub struct Summarizer {
    client: ChatClient,
    timeout: Duration,
    retries: u32,
}

impl Summarizer {
    pub fn new(client: ChatClient, timeout: Duration, retries: u32) -> Self {
        Self {
            client,
            timeout,
            retries,
        }
    }

    fn options(&self) -> CompletionOptions {
        let model = self.client.model().to_lowercase();
        let small = model.contains("nano") || model.contains("o1");
        CompletionOptions {
            json_object: false,
            max_completion_tokens: Some(if small { 1000 } else { 200 }),
            temperature: if small || model.contains("gpt-5") { None } else { Some(0.3) },
        }
    }

    /// Summarizes one snippet, retrying failed or timed out attempts.
    pub async fn summarize(&self, text: &str) -> Result<String> {
        let messages = [
            ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "{}\n\n--- CODE/CONTEXT ---\n{}",
                SUMMARY_PROMPT,
                truncate_chars(text, MAX_SNIPPET_CHARS)
            )),
        ];
        let mut last_error = CodeIndexError::Oracle("no summary attempt made".to_string());
        for attempt in 0..=self.retries {
            match tokio::time::timeout(self.timeout, self.client.complete(&messages, self.options())).await {
                Ok(Ok(completion)) => return Ok(completion.content),
                Ok(Err(e)) => last_error = e,
                Err(_) => {
                    last_error = CodeIndexError::Oracle(format!(
                        "summary timed out after {:?}",
                        self.timeout
                    ))
                }
            }
            debug!(attempt, "summary attempt failed: {}", last_error);
        }
        Err(last_error)
    }

    /// Summarizes all snippets with at most `concurrency` requests in flight.
    ///
    /// The output is aligned with the input; failed snippets yield `None`.
    pub async fn summarize_many(&self, texts: &[String], concurrency: usize) -> Vec<Option<String>> {
        let semaphore = Semaphore::new(concurrency.max(1));
        let total = texts.len();
        let jobs = texts.iter().enumerate().map(|(i, text)| {
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                match self.summarize(text).await {
                    Ok(summary) => {
                        debug!(index = i + 1, total, chars = summary.len(), "summary succeeded");
                        Some(summary)
                    }
                    Err(e) => {
                        warn!(
                            "Summary {}/{} failed after {} retries: {}",
                            i + 1,
                            total,
                            self.retries,
                            truncate_chars(&e.to_string(), 100)
                        );
                        None
                    }
                }
            }
        });
        let results = join_all(jobs).await;
        let succeeded = results.iter().filter(|s| s.is_some()).count();
        info!("Batch summarization complete: {}/{} succeeded", succeeded, total);
        results
    }
}
