//! Execution context shared by every tag and deferred string.
//!
//! [`ExecCtx`] carries the HTTP client, completion backend, base URL, debug
//! console and optional event handler. Construct it once, wrap it in an
//! `Arc`, and derive tags from it with [`ExecCtx::tag`].

use crate::backend::{Backend, OpenAiBackend};
use crate::debug::DebugConsole;
use crate::events::EventHandler;
use crate::tag::Tag;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Base URL used when `OPENAI_BASE_URL` is unset.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Shared execution context.
///
/// # Example
///
/// ```
/// use gpt_tag::ExecCtx;
/// use gpt_tag::backend::MockBackend;
/// use std::sync::Arc;
///
/// let ctx = Arc::new(
///     ExecCtx::builder("https://api.openai.com/v1")
///         .backend(Arc::new(MockBackend::fixed("X:1")))
///         .build(),
/// );
/// assert_eq!(ctx.base_url, "https://api.openai.com");
/// let gpt = ctx.tag().temperature(0.8);
/// ```
pub struct ExecCtx {
    /// HTTP client (cheap to clone; uses `Arc` internally).
    pub client: Client,
    /// Base URL of the completion service, without path suffixes.
    pub base_url: String,
    /// Completion backend. Default: [`OpenAiBackend`] without credentials.
    pub backend: Arc<dyn Backend>,
    /// Optional event handler for lifecycle events.
    pub event_handler: Option<Arc<dyn EventHandler>>,
    /// Render session for debug tables.
    pub console: Arc<DebugConsole>,
    /// Render every request, regardless of the tag's own `debug` flag.
    pub debug: bool,
}

impl ExecCtx {
    /// Create a new builder.
    pub fn builder(base_url: impl Into<String>) -> ExecCtxBuilder {
        ExecCtxBuilder {
            client: None,
            base_url: base_url.into(),
            backend: None,
            event_handler: None,
            console: None,
            debug: false,
            timeout: None,
        }
    }

    /// A builder configured from the environment.
    ///
    /// Reads `OPENAI_API_KEY`, `OPENAI_ORGANIZATION_ID` and `OPENAI_BASE_URL`.
    pub fn from_env() -> ExecCtxBuilder {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let mut backend = OpenAiBackend::new();
        if let Some(key) = var("OPENAI_API_KEY") {
            backend = backend.with_api_key(key);
        }
        if let Some(org) = var("OPENAI_ORGANIZATION_ID") {
            backend = backend.with_organization(org);
        }
        if !backend.has_api_key() {
            tracing::warn!("OPENAI_API_KEY is not set; requests will be unauthenticated");
        }
        Self::builder(var("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()))
            .backend(Arc::new(backend))
    }

    /// A base tag with default configuration bound to this context.
    pub fn tag(self: &Arc<Self>) -> Tag {
        Tag::new(self.clone())
    }
}

impl std::fmt::Debug for ExecCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecCtx")
            .field("base_url", &self.base_url)
            .field("backend", &self.backend.name())
            .field("has_event_handler", &self.event_handler.is_some())
            .field("debug", &self.debug)
            .finish()
    }
}

/// Builder for [`ExecCtx`].
pub struct ExecCtxBuilder {
    client: Option<Client>,
    base_url: String,
    backend: Option<Arc<dyn Backend>>,
    event_handler: Option<Arc<dyn EventHandler>>,
    console: Option<Arc<DebugConsole>>,
    debug: bool,
    timeout: Option<Duration>,
}

impl ExecCtxBuilder {
    /// Set the HTTP client. If not set, a default client is created.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the completion backend. Default: [`OpenAiBackend`].
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use [`OpenAiBackend`] with API key authentication.
    pub fn openai_with_key(mut self, api_key: impl Into<String>) -> Self {
        self.backend = Some(Arc::new(OpenAiBackend::new().with_api_key(api_key)));
        self
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Set the debug render session. Default: [`DebugConsole::stderr`].
    pub fn console(mut self, console: Arc<DebugConsole>) -> Self {
        self.console = Some(console);
        self
    }

    /// Render every request on the debug console.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the request timeout. Default: 60 seconds.
    ///
    /// Ignored when a custom `Client` is provided via `.client()`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the execution context.
    pub fn build(self) -> ExecCtx {
        let timeout = self.timeout.unwrap_or(Duration::from_secs(60));
        let client = self.client.unwrap_or_else(|| {
            Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default HTTP client");
                Client::new()
            })
        });
        ExecCtx {
            client,
            base_url: normalize_base_url(&self.base_url),
            backend: self
                .backend
                .unwrap_or_else(|| Arc::new(OpenAiBackend::new())),
            event_handler: self.event_handler,
            console: self
                .console
                .unwrap_or_else(|| Arc::new(DebugConsole::stderr())),
            debug: self.debug,
        }
    }
}

/// Strip known path suffixes from a base URL so backends can append their
/// own, e.g. `https://api.openai.com/v1` -> `https://api.openai.com`.
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    // Longest first.
    for suffix in &["/v1/chat/completions", "/v1/chat", "/v1"] {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url_strips_v1() {
        assert_eq!(normalize_base_url("https://api.openai.com/v1"), "https://api.openai.com");
        assert_eq!(normalize_base_url("https://api.openai.com/v1/"), "https://api.openai.com");
    }

    #[test]
    fn test_normalize_base_url_strips_full_path() {
        assert_eq!(
            normalize_base_url("https://api.openai.com/v1/chat/completions"),
            "https://api.openai.com"
        );
    }

    #[test]
    fn test_normalize_base_url_preserves_clean() {
        assert_eq!(normalize_base_url("http://localhost:8080"), "http://localhost:8080");
        assert_eq!(normalize_base_url("http://localhost:8080/"), "http://localhost:8080");
    }

    #[test]
    fn test_defaults() {
        let ctx = ExecCtx::builder(DEFAULT_BASE_URL)
            .timeout(Duration::from_secs(5))
            .build();
        assert_eq!(ctx.backend.name(), "openai");
        assert!(!ctx.debug);
        assert!(ctx.event_handler.is_none());
    }

    #[test]
    fn test_tag_carries_context() {
        let ctx = Arc::new(ExecCtx::builder(DEFAULT_BASE_URL).debug(true).build());
        let tag = ctx.tag();
        assert!(Arc::ptr_eq(tag.ctx(), &ctx));
    }
}
