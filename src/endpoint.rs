//! Framework-free handler for the completion endpoint.
//!
//! A router turns the request body into a [`CompletionBody`], calls
//! [`handle_completion`], and frames the [`EndpointReply`]: a text stream on
//! success, or a JSON error object carrying the completion service's status.

use crate::error::{Result, TagError};
use crate::fanout::CompletionStream;
use crate::music::MusicGenerator;
use serde::Deserialize;
use serde_json::Value;

const MAX_STYLE_CHARS: usize = 1000;

fn default_style() -> String {
    "jazz".to_string()
}

/// Request body: a style, and optionally the passage to continue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompletionBody {
    #[serde(default = "default_style")]
    pub style: String,
    #[serde(default)]
    pub previous: Option<String>,
}

impl Default for CompletionBody {
    fn default() -> Self {
        Self {
            style: default_style(),
            previous: None,
        }
    }
}

impl CompletionBody {
    /// Parse and validate a JSON body.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let body: Self = serde_json::from_slice(bytes)
            .map_err(|e| TagError::InvalidRequest(format!("malformed body: {}", e)))?;
        body.validate()?;
        Ok(body)
    }

    /// `style` must be 1 to 1000 characters.
    pub fn validate(&self) -> Result<()> {
        let len = self.style.chars().count();
        if len == 0 {
            return Err(TagError::InvalidRequest("style must not be empty".into()));
        }
        if len > MAX_STYLE_CHARS {
            return Err(TagError::InvalidRequest(format!(
                "style must be at most {} characters, got {}",
                MAX_STYLE_CHARS, len
            )));
        }
        Ok(())
    }
}

/// What the HTTP layer should send back.
#[derive(Debug)]
pub enum EndpointReply {
    /// Stream the passage to the client.
    Stream(CompletionStream),
    /// The completion service failed: respond with `status` and this
    /// `{name, status, headers, message}` object.
    Error { status: u16, body: Value },
}

/// Request a passage for `body`.
///
/// Completion-service failures become [`EndpointReply::Error`]; anything else
/// is returned as `Err`.
pub async fn handle_completion(generator: &MusicGenerator, body: CompletionBody) -> Result<EndpointReply> {
    body.validate()?;
    tracing::debug!(style = %body.style, continuation = body.previous.is_some(), "completion requested");
    let passage = generator.passage(&body.style, body.previous.as_deref());
    match passage.stream().await {
        Ok(stream) => Ok(EndpointReply::Stream(stream)),
        Err(e) => match e.api_error() {
            Some(api) => {
                tracing::debug!(status = api.status, name = %api.name, "completion service error");
                Ok(EndpointReply::Error {
                    status: api.status,
                    body: serde_json::to_value(api)?,
                })
            }
            None => Err(e),
        },
    }
}

/// Parse a raw JSON body, then [`handle_completion`].
pub async fn handle_request(generator: &MusicGenerator, raw: &[u8]) -> Result<EndpointReply> {
    let body = CompletionBody::from_json(raw)?;
    handle_completion(generator, body).await
}

/// Read an abandoned reply stream to the end so the upstream request is not
/// cut off midway.
pub async fn drain(stream: CompletionStream) {
    stream.drain().await;
    tracing::debug!("abandoned completion stream drained");
}
