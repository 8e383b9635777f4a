//! Claude-specific LLM provider implementation
//!
//! Implements the [`LLMProvider`] trait over the Anthropic Messages API.
//!
//! ## Request Mapping
//!
//! - `system` messages are joined into the top-level `system` field
//! - `user` / `assistant` messages are forwarded in order
//! - `function` messages have no Messages API counterpart and are dropped
//!
//! ## Streaming
//!
//! SSE events are folded into [`StreamChunk`]s: `message_start` records the
//! message id and model, every `content_block_delta` becomes a chunk, and
//! `message_stop` yields a final empty chunk with `done = true`.
//!
//! Claude has no embeddings endpoint; [`LLMProvider::embeddings`] keeps the
//! default `Unsupported` answer.

use crate::config::AdapterConfig;
use crate::env;
use crate::llm::provider::LLMProvider;
use crate::llm::sse::{self, SseStep};
use crate::llm::types::{
    ChatOptions, ChunkStream, CostTable, FinishReason, LLMError, LLMResponse, Message, Role,
    StreamChunk, TokenUsage,
};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1000;
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Claude implementation of [`LLMProvider`]
pub struct ClaudeProvider {
    client: reqwest::Client,
    config: AdapterConfig,
    base_url: String,
    api_key: Option<String>,
    anthropic_version: String,
    model: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    id: String,
    model: String,
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: MessagesUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: StreamMessage,
    },
    ContentBlockDelta {
        delta: TextDelta,
    },
    MessageDelta {
        #[serde(default)]
        delta: Option<StopDelta>,
    },
    MessageStop,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    id: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct TextDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StopDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

/// Folds Claude SSE events into chunks; holds the id/model announced by
/// `message_start` for the chunks that follow.
#[derive(Debug, Clone)]
pub struct ClaudeStreamParser {
    message_id: String,
    model: String,
    stop_reason: Option<String>,
}

impl ClaudeStreamParser {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            message_id: String::new(),
            model: model.into(),
            stop_reason: None,
        }
    }

    pub fn parse(&mut self, data: &str) -> SseStep {
        let event: StreamEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(e) => {
                warn!("Failed to parse stream data: {}", e);
                return SseStep::Skip;
            }
        };

        match event {
            StreamEvent::MessageStart { message } => {
                self.message_id = message.id;
                self.model = message.model;
                SseStep::Skip
            }
            StreamEvent::ContentBlockDelta { delta } => SseStep::Emit(self.chunk(delta.text, false)),
            StreamEvent::MessageDelta { delta } => {
                if let Some(reason) = delta.and_then(|d| d.stop_reason) {
                    self.stop_reason = Some(reason);
                }
                SseStep::Skip
            }
            StreamEvent::MessageStop => SseStep::EmitAndFinish(self.chunk(None, true)),
            StreamEvent::Other => SseStep::Skip,
        }
    }

    fn chunk(&self, delta_content: Option<String>, done: bool) -> StreamChunk {
        let mut metadata = HashMap::new();
        if done && let Some(reason) = &self.stop_reason {
            metadata.insert(
                "finish_reason".to_string(),
                json!(FinishReason::from_vendor(reason)),
            );
        }

        StreamChunk {
            id: self.message_id.clone(),
            delta_content,
            model: self.model.clone(),
            done,
            metadata,
        }
    }
}

impl ClaudeProvider {
    pub fn new(config: AdapterConfig) -> Result<Self, LLMError> {
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        let api_key = config.resolve_api_key(env::keys::ANTHROPIC_API_KEY);
        if api_key.is_none() {
            warn!("No API key configured for Claude provider; requests will be rejected upstream");
        }

        let anthropic_version = config
            .anthropic_version
            .clone()
            .unwrap_or_else(|| DEFAULT_ANTHROPIC_VERSION.to_string());
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let name = format!("claude:{}", model);

        Ok(Self {
            client: reqwest::Client::new(),
            config,
            base_url,
            api_key,
            anthropic_version,
            model,
            name,
        })
    }

    /// Build the `/v1/messages` request body
    pub fn build_messages_body(
        &self,
        messages: &[Message],
        options: &ChatOptions,
        stream: bool,
    ) -> serde_json::Value {
        let system = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let conversation: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();

        let mut body = json!({
            "model": options.model.as_deref().unwrap_or(&self.model),
            "max_tokens": options.max_tokens.or(self.config.max_tokens).unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": options.temperature.or(self.config.temperature).unwrap_or(DEFAULT_TEMPERATURE),
            "messages": conversation,
            "stream": stream,
        });

        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if let Some(top_p) = options.top_p {
            body["top_p"] = json!(top_p);
        }

        body
    }

    async fn send(&self, body: &serde_json::Value, stream: bool) -> Result<reqwest::Response, LLMError> {
        debug!("POST {}/v1/messages via {}", self.base_url, self.name);
        let mut request = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("anthropic-version", &self.anthropic_version)
            .json(body);

        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        if stream {
            request = request.header("Accept", "text/event-stream");
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LLMError::Adapter(format!(
                "Claude API error: {} {}",
                status, text
            )));
        }
        Ok(response)
    }
}

/// Convert a `/v1/messages` payload into an [`LLMResponse`]
pub fn parse_messages_response(payload: &str) -> Result<LLMResponse, LLMError> {
    let response: MessagesResponse = serde_json::from_str(payload)?;

    let content = response
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_deref())
        .collect::<String>();

    let mut metadata = HashMap::new();
    if let Some(reason) = &response.stop_reason {
        metadata.insert("stop_reason".to_string(), json!(reason));
    }

    Ok(LLMResponse {
        id: response.id,
        content,
        model: response.model,
        usage: TokenUsage::new(response.usage.input_tokens, response.usage.output_tokens),
        finish_reason: response
            .stop_reason
            .as_deref()
            .map(FinishReason::from_vendor)
            .unwrap_or(FinishReason::Stop),
        metadata,
    })
}

/// Per-1K token prices by Claude model family
pub fn claude_cost_table(model: &str) -> CostTable {
    if model.contains("claude-3-5-sonnet") || model.contains("claude-3-sonnet") {
        CostTable::new(0.003, 0.015)
    } else if model.contains("claude-3-opus") {
        CostTable::new(0.015, 0.075)
    } else if model.contains("claude-3-haiku") {
        CostTable::new(0.00025, 0.00125)
    } else if model.contains("claude-2") {
        CostTable::new(0.008, 0.024)
    } else {
        CostTable::new(0.0008, 0.0024)
    }
}

impl LLMProvider for ClaudeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_models(&self) -> Vec<String> {
        [
            "claude-3-5-sonnet-20241022",
            "claude-3-5-sonnet-20240620",
            "claude-3-opus-20240229",
            "claude-3-sonnet-20240229",
            "claude-3-haiku-20240307",
            "claude-2.1",
            "claude-2.0",
            "claude-instant-1.2",
        ]
        .iter()
        .map(|m| m.to_string())
        .collect()
    }

    fn max_context_length(&self) -> u64 {
        if let Some(length) = self.config.max_context_length {
            return length;
        }
        if self.model.contains("claude-3") || self.model.contains("claude-2") {
            200_000
        } else {
            100_000
        }
    }

    fn cost_per_1k_tokens(&self) -> CostTable {
        self.config
            .cost_override
            .unwrap_or_else(|| claude_cost_table(&self.model))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn chat(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> BoxFuture<'_, Result<LLMResponse, LLMError>> {
        Box::pin(async move {
            let body = self.build_messages_body(&messages, &options, false);
            let payload = self.send(&body, false).await?.text().await?;

            let mut response = parse_messages_response(&payload)?;
            response
                .metadata
                .insert("adapter".to_string(), json!(self.name));
            Ok(response)
        })
    }

    fn chat_stream(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> BoxFuture<'_, Result<ChunkStream, LLMError>> {
        Box::pin(async move {
            let body = self.build_messages_body(&messages, &options, true);
            let response = self.send(&body, true).await?;

            let model = options.model.unwrap_or_else(|| self.model.clone());
            let mut parser = ClaudeStreamParser::new(model);
            Ok(sse::chunk_stream(response.bytes_stream(), move |data| {
                parser.parse(data)
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ClaudeProvider {
        ClaudeProvider::new(AdapterConfig {
            api_key: Some("sk-ant-test".to_string()),
            model: Some("claude-3-haiku-20240307".to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_system_messages_lifted() {
        let body = provider().build_messages_body(
            &[
                Message::system("rule one"),
                Message::user("hi"),
                Message::system("rule two"),
                Message::new(Role::Function, "ignored"),
            ],
            &ChatOptions::default(),
            false,
        );

        assert_eq!(body["system"], "rule one\n\nrule two");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["model"], "claude-3-haiku-20240307");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_parse_messages_response() {
        let payload = r#"{
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-haiku-20240307",
            "content": [{"type": "text", "text": "Hi "}, {"type": "text", "text": "there"}],
            "stop_reason": "max_tokens",
            "usage": {"input_tokens": 10, "output_tokens": 4}
        }"#;

        let response = parse_messages_response(payload).unwrap();
        assert_eq!(response.content, "Hi there");
        assert_eq!(response.finish_reason, FinishReason::Length);
        assert_eq!(response.usage.total_tokens, 14);
        assert_eq!(response.metadata["stop_reason"], "max_tokens");
    }

    #[test]
    fn test_stream_events_fold_into_chunks() {
        let mut parser = ClaudeStreamParser::new("claude-3-haiku");

        let start = r#"{"type":"message_start","message":{"id":"msg_9","model":"claude-3-haiku-20240307","usage":{"input_tokens":5,"output_tokens":0}}}"#;
        assert_eq!(parser.parse(start), SseStep::Skip);

        let delta = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#;
        match parser.parse(delta) {
            SseStep::Emit(chunk) => {
                assert_eq!(chunk.id, "msg_9");
                assert_eq!(chunk.delta_content.as_deref(), Some("Hel"));
                assert!(!chunk.done);
            }
            other => panic!("unexpected step {:?}", other),
        }

        let ping = r#"{"type":"ping"}"#;
        assert_eq!(parser.parse(ping), SseStep::Skip);

        let stop_delta = r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":2}}"#;
        assert_eq!(parser.parse(stop_delta), SseStep::Skip);

        match parser.parse(r#"{"type":"message_stop"}"#) {
            SseStep::EmitAndFinish(chunk) => {
                assert!(chunk.done);
                assert_eq!(chunk.delta_content, None);
                assert_eq!(chunk.metadata["finish_reason"], "stop");
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_cost_tables() {
        assert_eq!(claude_cost_table("claude-3-opus-20240229"), CostTable::new(0.015, 0.075));
        assert_eq!(claude_cost_table("claude-2.1"), CostTable::new(0.008, 0.024));
        assert_eq!(claude_cost_table("claude-instant-1.2"), CostTable::new(0.0008, 0.0024));
        assert_eq!(provider().cost_per_1k_tokens(), CostTable::new(0.00025, 0.00125));
        assert_eq!(provider().max_context_length(), 200_000);
        assert!(!provider().supported_models().is_empty());
    }

    #[tokio::test]
    async fn test_embeddings_unsupported() {
        let result = provider().embeddings(vec!["text".to_string()], None).await;
        assert!(matches!(result, Err(LLMError::Unsupported(_))));
    }
}
