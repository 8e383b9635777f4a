//! OpenAI-compatible LLM provider implementation
//!
//! Implements the [`LLMProvider`] trait over the OpenAI chat completions API.
//! The same adapter serves `generic` registrations: any endpoint speaking the
//! OpenAI wire format (vLLM, llama.cpp server, LocalAI, gateways, ...).
//!
//! ## Endpoints
//!
//! - `POST {base_url}/chat/completions` for chat and SSE streaming
//! - `POST {base_url}/embeddings` for embeddings
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use llm_relay::config::{AdapterConfig, ProviderKind};
//! use llm_relay::llm::{LLMProvider, Message, OpenAIProvider};
//!
//! # async fn example() -> Result<(), llm_relay::llm::LLMError> {
//! let provider = OpenAIProvider::new(
//!     ProviderKind::OpenAI,
//!     AdapterConfig {
//!         model: Some("gpt-4-turbo".to_string()),
//!         ..Default::default()
//!     },
//! )?;
//! let response = provider
//!     .chat(vec![Message::user("Hello")], Default::default())
//!     .await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

use crate::config::{AdapterConfig, ProviderKind};
use crate::env;
use crate::llm::provider::LLMProvider;
use crate::llm::sse::{self, SseStep};
use crate::llm::types::{
    ChatOptions, ChunkStream, CostTable, FinishReason, LLMError, LLMResponse, Message,
    StreamChunk, TokenUsage,
};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4-turbo";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
const DEFAULT_MAX_TOKENS: u32 = 1000;
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// OpenAI (and OpenAI-compatible) implementation of [`LLMProvider`]
pub struct OpenAIProvider {
    client: reqwest::Client,
    kind: ProviderKind,
    config: AdapterConfig,
    base_url: String,
    api_key: Option<String>,
    model: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    id: String,
    model: String,
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    id: String,
    model: String,
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    index: u32,
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAIProvider {
    pub fn new(kind: ProviderKind, config: AdapterConfig) -> Result<Self, LLMError> {
        let base_url = match (&config.base_url, kind) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, ProviderKind::Generic) => {
                return Err(LLMError::Configuration(
                    "generic providers require a base_url".to_string(),
                ));
            }
            (None, _) => DEFAULT_BASE_URL.to_string(),
        };

        let api_key = config.resolve_api_key(match kind {
            ProviderKind::Generic => env::keys::GENERIC_API_KEY,
            _ => env::keys::OPENAI_API_KEY,
        });
        if api_key.is_none() && kind == ProviderKind::OpenAI {
            warn!(
                "No API key configured for OpenAI provider; requests will be sent unauthenticated"
            );
        }

        let model = config.model.clone().unwrap_or_else(|| match kind {
            ProviderKind::Generic => "default".to_string(),
            _ => DEFAULT_MODEL.to_string(),
        });

        let name = format!("{}:{}", kind, model);

        Ok(Self {
            client: reqwest::Client::new(),
            kind,
            config,
            base_url,
            api_key,
            model,
            name,
        })
    }

    /// Build the `/chat/completions` request body
    pub fn build_chat_body(
        &self,
        messages: &[Message],
        options: &ChatOptions,
        stream: bool,
    ) -> serde_json::Value {
        let mut body = json!({
            "model": options.model.as_deref().unwrap_or(&self.model),
            "messages": messages,
            "max_tokens": options.max_tokens.or(self.config.max_tokens).unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": options.temperature.or(self.config.temperature).unwrap_or(DEFAULT_TEMPERATURE),
            "stream": stream,
        });

        let optional = [
            ("top_p", options.top_p),
            ("frequency_penalty", options.frequency_penalty),
            ("presence_penalty", options.presence_penalty),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                body[key] = json!(value);
            }
        }

        body
    }

    fn request(&self, path: &str, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body);

        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        if let Some(org) = &self.config.organization {
            request = request.header("OpenAI-Organization", org);
        }
        request
    }

    async fn send(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::Response, LLMError> {
        debug!("POST {}{} via {}", self.base_url, path, self.name);
        let response = self.request(path, body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LLMError::Adapter(format!(
                "OpenAI API error: {} {}",
                status, text
            )));
        }
        Ok(response)
    }
}

/// Convert a `/chat/completions` payload into an [`LLMResponse`]
pub fn parse_chat_completion(payload: &str) -> Result<LLMResponse, LLMError> {
    let completion: ChatCompletion = serde_json::from_str(payload)?;
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LLMError::Adapter("Completion contained no choices".to_string()))?;

    let usage = completion
        .usage
        .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
        .unwrap_or_default();

    Ok(LLMResponse {
        id: completion.id,
        content: choice.message.content.unwrap_or_default(),
        model: completion.model,
        usage,
        finish_reason: choice
            .finish_reason
            .as_deref()
            .map(FinishReason::from_vendor)
            .unwrap_or(FinishReason::Stop),
        metadata: HashMap::new(),
    })
}

/// Interpret one SSE payload of a streamed completion
pub fn parse_stream_payload(data: &str) -> SseStep {
    if data == "[DONE]" {
        return SseStep::Finish;
    }

    let chunk: CompletionChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!("Failed to parse stream data: {}", e);
            return SseStep::Skip;
        }
    };

    let Some(choice) = chunk.choices.into_iter().next() else {
        return SseStep::Skip;
    };

    let mut metadata = HashMap::new();
    metadata.insert("index".to_string(), json!(choice.index));
    if let Some(reason) = &choice.finish_reason {
        metadata.insert("finish_reason".to_string(), json!(reason));
    }

    SseStep::Emit(StreamChunk {
        id: chunk.id,
        delta_content: choice.delta.content,
        model: chunk.model,
        done: choice.finish_reason.is_some(),
        metadata,
    })
}

/// Extract embedding vectors in input order
pub fn parse_embeddings(payload: &str) -> Result<Vec<Vec<f32>>, LLMError> {
    let mut response: EmbeddingResponse = serde_json::from_str(payload)?;
    response.data.sort_by_key(|d| d.index);
    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}

/// Per-1K token prices by OpenAI model family
pub fn openai_cost_table(model: &str) -> CostTable {
    if model.contains("gpt-4-turbo") || model.contains("0125") || model.contains("1106") {
        CostTable::new(0.01, 0.03)
    } else if model.contains("gpt-4") {
        CostTable::new(0.03, 0.06)
    } else {
        CostTable::new(0.0015, 0.002)
    }
}

/// Context window by OpenAI model family
pub fn openai_context_length(model: &str) -> u64 {
    if model.contains("gpt-4-turbo") || model.contains("0125") || model.contains("1106") {
        128_000
    } else if model.contains("gpt-4") {
        8192
    } else if model.contains("16k") {
        16_384
    } else {
        4096
    }
}

impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_models(&self) -> Vec<String> {
        match self.kind {
            ProviderKind::Generic => vec![self.model.clone()],
            _ => [
                "gpt-4",
                "gpt-4-turbo",
                "gpt-4-turbo-preview",
                "gpt-4-0125-preview",
                "gpt-4-1106-preview",
                "gpt-3.5-turbo",
                "gpt-3.5-turbo-16k",
                "gpt-3.5-turbo-0125",
                "gpt-3.5-turbo-1106",
            ]
            .iter()
            .map(|m| m.to_string())
            .collect(),
        }
    }

    fn max_context_length(&self) -> u64 {
        if let Some(length) = self.config.max_context_length {
            return length;
        }
        match self.kind {
            ProviderKind::Generic => 4096,
            _ => openai_context_length(&self.model),
        }
    }

    fn cost_per_1k_tokens(&self) -> CostTable {
        if let Some(cost) = self.config.cost_override {
            return cost;
        }
        match self.kind {
            ProviderKind::Generic => CostTable::new(0.002, 0.002),
            _ => openai_cost_table(&self.model),
        }
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
            let body = self.build_chat_body(&messages, &options, false);
            let payload = self.send("/chat/completions", &body).await?.text().await?;

            let mut response = parse_chat_completion(&payload)?;
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
            let body = self.build_chat_body(&messages, &options, true);
            let response = self.send("/chat/completions", &body).await?;
            Ok(sse::chunk_stream(
                response.bytes_stream(),
                parse_stream_payload,
            ))
        })
    }

    fn embeddings(
        &self,
        texts: Vec<String>,
        model: Option<String>,
    ) -> BoxFuture<'_, Result<Vec<Vec<f32>>, LLMError>> {
        Box::pin(async move {
            let model = model
                .or_else(|| self.config.embedding_model.clone())
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string());
            let body = json!({ "model": model, "input": texts });

            let payload = self.send("/embeddings", &body).await?.text().await?;
            parse_embeddings(&payload)
        })
    }
}
