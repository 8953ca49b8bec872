use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors produced while building, resolving, or serving deferred strings.
#[derive(Error, Debug)]
pub enum TagError {
    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The completion service answered with a non-success status.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A multi-choice result was resolved without `first` or `each` recorded.
    #[error("Cannot call \"{method}\" on a multi-choice result; record `first` or `each`")]
    UnsupportedArrayOp { method: String },

    /// A chain method was dispatched by name with arguments it cannot take.
    #[error("Invalid call to `{method}`: {reason}")]
    InvalidCall { method: String, reason: String },

    /// A streaming result was used where a materialized value is required.
    #[error("Result is a stream, not a value")]
    NotAValue,

    /// A materialized value was used where a stream is required.
    #[error("Result is a value, not a stream")]
    NotAStream,

    /// An inbound request body failed validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid configuration detected at build time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A failure cached by an earlier resolution, observed again.
    #[error(transparent)]
    Shared(Arc<TagError>),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl TagError {
    /// The completion-service error behind this one, if any.
    ///
    /// Looks through [`TagError::Shared`] wrappers so cached failures still
    /// map to a structured response.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            TagError::Api(e) => Some(e),
            TagError::Shared(inner) => inner.api_error(),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for TagError {
    fn from(err: anyhow::Error) -> Self {
        TagError::Other(err.to_string())
    }
}

/// A failed completion-service call.
///
/// Serializes to `{name, status, headers, message}` so an HTTP layer can
/// mirror it back to the client verbatim.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{status} {name}: {message}")]
pub struct ApiError {
    /// Error class, e.g. `RateLimitError`.
    pub name: String,
    /// HTTP status code returned by the service.
    pub status: u16,
    /// Response headers, lower-cased names.
    pub headers: BTreeMap<String, String>,
    /// Human-readable message extracted from the response body.
    pub message: String,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            name: Self::name_for_status(status).to_string(),
            status,
            headers: BTreeMap::new(),
            message: message.into(),
        }
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Error class name for a status code.
    pub fn name_for_status(status: u16) -> &'static str {
        match status {
            400 => "BadRequestError",
            401 => "AuthenticationError",
            403 => "PermissionDeniedError",
            404 => "NotFoundError",
            409 => "ConflictError",
            422 => "UnprocessableEntityError",
            429 => "RateLimitError",
            s if s >= 500 => "InternalServerError",
            _ => "APIError",
        }
    }
}

pub type Result<T> = std::result::Result<T, TagError>;
