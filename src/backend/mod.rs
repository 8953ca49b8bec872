//! Backend trait and normalized request/response types.
//!
//! The [`Backend`] trait abstracts over chat-completion providers, translating
//! between the normalized [`CompletionRequest`]/[`CompletionResponse`] types
//! and a provider's HTTP API. Built-in implementations: [`OpenAiBackend`] and
//! the test double [`MockBackend`].
//!
//! ## Architecture
//!
//! ```text
//! GptString::get ──► CompletionRequest ──► Backend::complete()           ──► CompletionResponse
//!                                      └─► Backend::complete_streaming() ──► ChunkStream
//!                                                   │
//!                                    ┌──────────────┴──────────────┐
//!                              OpenAiBackend                  MockBackend
//!                          /v1/chat/completions             canned choices
//!                              SSE streaming                word-by-word chunks
//! ```

pub mod mock;
pub mod openai;
pub mod sse;

pub use mock::MockBackend;
pub use openai::OpenAiBackend;

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// A normalized chat-completion request, provider-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Model identifier (e.g. `"gpt-4-1106-preview"`).
    pub model: String,

    /// Sampling temperature; omitted from the wire request when `None`.
    pub temperature: Option<f64>,

    /// Full conversation: static messages followed by the templated user turn.
    pub messages: Vec<ChatMessage>,

    /// Number of parallel completions to request.
    pub n: u32,

    /// Whether to request incremental delivery.
    pub stream: bool,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message author.
    pub role: Role,
    /// The message content.
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant (model) response.
    Assistant,
}

/// A normalized non-streaming response.
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    /// Text of each returned choice, in index order. `None` when the provider
    /// returned a null content field.
    pub choices: Vec<Option<String>>,

    /// Model that actually served the request, when reported.
    pub model: Option<String>,
}

/// One incremental piece of a streaming response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// Per-choice delta inside a [`ChatChunk`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub delta: Delta,
}

/// The content carried by a [`ChunkChoice`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatChunk {
    /// Build a chunk carrying `content` for choice `index`.
    pub fn delta(index: usize, content: impl Into<String>) -> Self {
        Self {
            choices: vec![ChunkChoice {
                index,
                delta: Delta {
                    content: Some(content.into()),
                },
            }],
        }
    }
}

/// A boxed stream of chunks as produced by a backend.
pub type ChunkStream = BoxStream<'static, Result<ChatChunk>>;

/// Abstraction over chat-completion providers.
///
/// Implementors translate between the normalized types and the provider's
/// HTTP API. There is no retry at this layer: failures surface immediately.
///
/// # Object Safety
///
/// This trait is object-safe and designed to be used as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute a non-streaming completion.
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse>;

    /// Open a streaming completion.
    ///
    /// Resolves once the provider has accepted the request; chunks arrive
    /// through the returned stream. The stream owns the connection and is
    /// `'static`, so it can outlive the caller.
    async fn complete_streaming(
        &self,
        client: &Client,
        base_url: &str,
        request: &CompletionRequest,
    ) -> Result<ChunkStream>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}
