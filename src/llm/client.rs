use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CodeIndexError, Result};

/// Connection settings for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct ChatClientConfig {
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Per-call generation settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionOptions {
    /// Ask the endpoint for a JSON object response.
    pub json_object: bool,
    pub max_completion_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub finish_reason: Option<String>,
    pub usage: Option<ChatUsage>,
}

pub struct ChatClient {
    config: ChatClientConfig,
    http: reqwest::Client,
}

impl ChatClient {
    pub fn new(config: ChatClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CodeIndexError::Oracle(format!("failed to build http client: {}", e)))?;

        Ok(Self { config, http })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<ChatCompletion> {
        if messages.is_empty() {
            return Err(CodeIndexError::Oracle(
                "chat completion requires at least one message".to_string(),
            ));
        }

        let url = self.chat_completions_url();
        let payload = ChatCompletionsRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
            temperature: options.temperature,
            max_completion_tokens: options.max_completion_tokens,
            response_format: options.json_object.then(|| ResponseFormat {
                kind: "json_object".to_string(),
            }),
            stream: Some(false),
        };

        let mut request = self.http.post(&url).json(&payload);
        if let Some(api_key) = self.config.api_key.as_ref() {
            request = request.bearer_auth(api_key);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CodeIndexError::Oracle(format!(
                    "request timed out after {:?} (model={})",
                    self.config.timeout, self.config.model
                ))
            } else {
                CodeIndexError::Oracle(format!(
                    "request failed (model={}): {}",
                    self.config.model, e
                ))
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CodeIndexError::Oracle(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(CodeIndexError::Oracle(format!(
                "endpoint returned HTTP {}: {}",
                status,
                truncate_for_error(&body)
            )));
        }

        let parsed: ChatCompletionsResponse = serde_json::from_str(&body).map_err(|e| {
            CodeIndexError::Oracle(format!(
                "invalid JSON from endpoint: {} (body={})",
                e,
                truncate_for_error(&body)
            ))
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CodeIndexError::Oracle("response had no choices".to_string()))?;

        let content = choice
            .message
            .content
            .and_then(ChatContent::into_text)
            .ok_or_else(|| CodeIndexError::Oracle("response had empty message content".to_string()))?;

        Ok(ChatCompletion {
            content,
            finish_reason: choice.finish_reason,
            usage: parsed.usage,
        })
    }

    fn chat_completions_url(&self) -> String {
        let endpoint = self.config.endpoint.trim().trim_end_matches('/');
        if endpoint.ends_with("/chat/completions") {
            endpoint.to_string()
        } else if endpoint.ends_with("/v1") {
            format!("{}/chat/completions", endpoint)
        } else {
            format!("{}/v1/chat/completions", endpoint)
        }
    }
}

/// Parses a model reply as JSON, tolerating prose or code fences around the
/// outermost object.
pub fn parse_json_reply<T: serde::de::DeserializeOwned>(content: &str) -> Result<T> {
    if let Ok(value) = serde_json::from_str::<T>(content) {
        return Ok(value);
    }
    let extracted = extract_json_object(content).ok_or_else(|| {
        CodeIndexError::Oracle(format!(
            "reply is not a JSON object: {}",
            truncate_for_error(content)
        ))
    })?;
    serde_json::from_str::<T>(extracted).map_err(|e| {
        CodeIndexError::Oracle(format!(
            "reply JSON parse error: {} (payload={})",
            e,
            truncate_for_error(content)
        ))
    })
}

fn extract_json_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }
    content.get(start..=end)
}

fn truncate_for_error(value: &str) -> String {
    const LIMIT: usize = 400;
    match value.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &value[..idx]),
        None => value.to_string(),
    }
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<ChatContent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

impl ChatContent {
    fn into_text(self) -> Option<String> {
        let text = match self {
            ChatContent::Text(text) => text.trim().to_string(),
            ChatContent::Parts(parts) => parts
                .into_iter()
                .filter_map(|p| p.text)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ChatContentPart {
    #[serde(default)]
    text: Option<String>,
}
