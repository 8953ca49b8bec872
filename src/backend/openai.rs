//! Backend for OpenAI-compatible chat-completion APIs.
//!
//! Endpoint: `/v1/chat/completions`.
//! Streaming: SSE with `data: {"choices": [{"index": 0, "delta": {"content": "token"}}]}`.

use super::sse::SseDecoder;
use super::{Backend, ChatChunk, ChunkStream, CompletionRequest, CompletionResponse};
use crate::error::{ApiError, Result, TagError};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Backend for any OpenAI-compatible API.
///
/// # Example
///
/// ```
/// use gpt_tag::backend::OpenAiBackend;
///
/// let backend = OpenAiBackend::new()
///     .with_api_key("sk-...")
///     .with_organization("org-...");
/// assert!(backend.has_api_key());
/// ```
#[derive(Clone, Default)]
pub struct OpenAiBackend {
    /// Sent as `Authorization: Bearer {key}` when set.
    pub(crate) api_key: Option<String>,
    /// Sent as `OpenAI-Organization: {org}` when set.
    pub(crate) organization: Option<String>,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field(
                "api_key",
                &self.api_key.as_ref().map(|k| match k.get(..6) {
                    Some(prefix) if k.len() > 6 => format!("{}***", prefix),
                    _ => "***".to_string(),
                }),
            )
            .field("organization", &self.organization)
            .finish()
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn has_organization(&self) -> bool {
        self.organization.is_some()
    }

    /// Build the request body for `/v1/chat/completions`.
    fn build_body(request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "n": request.n,
            "stream": request.stream,
        });

        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }

        body
    }

    fn build_http_request(&self, client: &Client, url: &str, body: &Value) -> reqwest::RequestBuilder {
        let mut req = client.post(url).json(body);

        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        if let Some(ref org) = self.organization {
            req = req.header("OpenAI-Organization", org.as_str());
        }

        req
    }

    /// Send the request and turn any non-success status into an [`ApiError`].
    async fn send(&self, client: &Client, base_url: &str, request: &CompletionRequest) -> Result<reqwest::Response> {
        let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));
        let body = Self::build_body(request);

        let resp = self.build_http_request(client, &url, &body).send().await?;
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status().as_u16();
        let headers: BTreeMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let text = resp.text().await.unwrap_or_default();
        Err(TagError::Api(
            ApiError::new(status, Self::error_message(&text)).with_headers(headers),
        ))
    }

    /// Pull `error.message` out of an error body, falling back to the raw text.
    fn error_message(body: &str) -> String {
        serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| body.trim().to_string())
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        let resp = self.send(client, base_url, request).await?;
        let completion: ChatCompletion = resp.json().await?;

        Ok(CompletionResponse {
            choices: completion
                .choices
                .into_iter()
                .map(|c| c.message.content)
                .collect(),
            model: completion.model,
        })
    }

    async fn complete_streaming(
        &self,
        client: &Client,
        base_url: &str,
        request: &CompletionRequest,
    ) -> Result<ChunkStream> {
        let resp = self.send(client, base_url, request).await?;
        let mut bytes = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            while let Some(read) = bytes.next().await {
                match read {
                    Ok(buf) => {
                        for chunk in decoder.decode(&buf) {
                            yield Ok::<ChatChunk, TagError>(chunk);
                        }
                    }
                    Err(e) => {
                        yield Err(TagError::Request(e));
                        return;
                    }
                }
            }
            for chunk in decoder.flush() {
                yield Ok(chunk);
            }
        };

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
