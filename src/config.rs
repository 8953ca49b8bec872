use crate::backend::{ChatMessage, CompletionRequest};
use crate::parse::ParseFn;
use serde_json::Value;
use std::sync::Arc;

/// Model used when a tag never called `.model(..)`.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Post-hoc scoring hook: `(parsed value, raw text) -> optional score`.
///
/// Attached through [`Tag::add_evaluation`](crate::Tag::add_evaluation) and
/// carried with the configuration; resolution does not call it.
pub type EvaluationFn = Arc<dyn Fn(&Value, Option<&str>) -> Option<f64> + Send + Sync>;

/// Per-request configuration carried by a [`Tag`](crate::Tag).
///
/// Every `with_*` method consumes and returns the config, so deriving a new
/// configuration from a shared one always goes through a clone and never
/// touches the original.
#[derive(Clone, Default)]
pub struct TagConfig {
    /// Model identifier; `None` falls back to [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// Sampling temperature; omitted from the request when `None`.
    pub temperature: Option<f64>,

    /// Leading turns of every conversation built from this config.
    pub static_messages: Vec<ChatMessage>,

    /// Number of parallel completions. `Some` switches results to the
    /// multi-choice shape.
    pub n: Option<u32>,

    /// Request incremental delivery.
    pub stream: bool,

    /// Render this request on the debug console.
    pub debug: bool,

    /// Maps raw choice text to a value.
    pub parse: Option<ParseFn>,

    /// Label for debug display.
    pub id: Option<String>,

    /// Scoring hooks, stored for callers that run their own evaluation.
    pub evaluations: Vec<EvaluationFn>,
}

impl TagConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Request `n` choices; zero is raised to one.
    pub fn with_n(mut self, n: u32) -> Self {
        self.n = Some(n.max(1));
        self
    }

    pub fn with_parse(mut self, parse: ParseFn) -> Self {
        self.parse = Some(parse);
        self
    }

    pub fn with_messages(mut self, messages: impl IntoIterator<Item = ChatMessage>) -> Self {
        self.static_messages.extend(messages);
        self
    }

    pub fn with_evaluations(mut self, evaluations: impl IntoIterator<Item = EvaluationFn>) -> Self {
        self.evaluations.extend(evaluations);
        self
    }

    /// The model that will actually be requested.
    pub fn effective_model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Build the wire request for one templated user message.
    pub fn build_request(&self, message: String) -> CompletionRequest {
        let mut messages = self.static_messages.clone();
        messages.push(ChatMessage::user(message));
        CompletionRequest {
            model: self.effective_model().to_string(),
            temperature: self.temperature,
            messages,
            n: self.n.unwrap_or(1),
            stream: self.stream,
        }
    }
}

impl std::fmt::Debug for TagConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagConfig")
            .field("model", &self.effective_model())
            .field("temperature", &self.temperature)
            .field("static_messages", &self.static_messages.len())
            .field("n", &self.n)
            .field("stream", &self.stream)
            .field("debug", &self.debug)
            .field("parse", &self.parse)
            .field("id", &self.id)
            .field("evaluations", &self.evaluations.len())
            .finish()
    }
}
