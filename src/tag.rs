//! The request builder.
//!
//! A [`Tag`] is an immutable, progressively configured factory for
//! [`GptString`]s. Every configuring method returns a new tag and leaves the
//! receiver untouched, so one base tag can be specialized in several
//! directions at once.
//!
//! ```
//! use gpt_tag::{gpt, ChatMessage, ExecCtx};
//! use gpt_tag::backend::MockBackend;
//! use std::sync::Arc;
//!
//! let ctx = Arc::new(
//!     ExecCtx::builder("http://localhost")
//!         .backend(Arc::new(MockBackend::fixed("X:1")))
//!         .build(),
//! );
//! let base = ctx.tag().model("gpt-4");
//! let composer = base.add_message(ChatMessage::system("You write ABC notation."));
//! let warm = composer.temperature(1.2);
//!
//! assert!(base.config().static_messages.is_empty());
//! assert_eq!(warm.config().static_messages.len(), 1);
//!
//! let passage = gpt!(warm, "A {} passage in {}", "bossa", "F major");
//! ```

use crate::backend::ChatMessage;
use crate::config::{EvaluationFn, TagConfig};
use crate::exec_ctx::ExecCtx;
use crate::gpt_string::GptString;
use crate::parse::ParseFn;
use crate::template::{TagValue, Template};
use serde_json::Value;
use std::sync::Arc;

/// Immutable request builder bound to an [`ExecCtx`].
#[derive(Clone, Debug)]
pub struct Tag {
    ctx: Arc<ExecCtx>,
    config: Arc<TagConfig>,
}

impl Tag {
    /// A tag with default configuration.
    pub fn new(ctx: Arc<ExecCtx>) -> Self {
        Self::with_config(ctx, TagConfig::default())
    }

    pub fn with_config(ctx: Arc<ExecCtx>, config: TagConfig) -> Self {
        Self {
            ctx,
            config: Arc::new(config),
        }
    }

    pub fn ctx(&self) -> &Arc<ExecCtx> {
        &self.ctx
    }

    pub fn config(&self) -> &TagConfig {
        &self.config
    }

    fn derive(&self, f: impl FnOnce(TagConfig) -> TagConfig) -> Self {
        Self {
            ctx: self.ctx.clone(),
            config: Arc::new(f((*self.config).clone())),
        }
    }

    pub fn model(&self, model: impl Into<String>) -> Self {
        self.derive(|c| c.with_model(model))
    }

    pub fn temperature(&self, temperature: f64) -> Self {
        self.derive(|c| c.with_temperature(temperature))
    }

    /// Label shown in debug output.
    pub fn id(&self, id: impl Into<String>) -> Self {
        self.derive(|c| c.with_id(id))
    }

    /// Stream results instead of materializing them.
    pub fn stream(&self, stream: bool) -> Self {
        self.derive(|c| c.with_stream(stream))
    }

    pub fn debug(&self, debug: bool) -> Self {
        self.derive(|c| c.with_debug(debug))
    }

    /// Request `n` choices. Results then need `first` or `each`.
    pub fn n(&self, n: u32) -> Self {
        self.derive(|c| c.with_n(n))
    }

    pub fn add_message(&self, message: ChatMessage) -> Self {
        self.derive(|c| c.with_messages([message]))
    }

    pub fn add_messages(&self, messages: impl IntoIterator<Item = ChatMessage>) -> Self {
        self.derive(|c| c.with_messages(messages))
    }

    pub fn parse(&self, parse: ParseFn) -> Self {
        self.derive(|c| c.with_parse(parse))
    }

    pub fn parse_named(
        &self,
        name: impl Into<String>,
        f: impl Fn(Option<&str>) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.parse(ParseFn::named(name, f))
    }

    pub fn add_evaluation(
        &self,
        evaluation: impl Fn(&Value, Option<&str>) -> Option<f64> + Send + Sync + 'static,
    ) -> Self {
        let evaluation: EvaluationFn = Arc::new(evaluation);
        self.derive(|c| c.with_evaluations([evaluation]))
    }

    pub fn add_evaluations(&self, evaluations: impl IntoIterator<Item = EvaluationFn>) -> Self {
        self.derive(|c| c.with_evaluations(evaluations))
    }

    /// Template-literal form: `parts` interleaved with `values`.
    pub fn call<S: AsRef<str>>(&self, parts: &[S], values: Vec<TagValue>) -> GptString {
        let parts = parts.iter().map(|p| p.as_ref().to_string()).collect();
        self.template(Template::new(parts, values))
    }

    /// Placeholder form: each `{}` in `fmt` takes the next value.
    pub fn format(&self, fmt: &str, values: Vec<TagValue>) -> GptString {
        self.template(Template::parse(fmt, values))
    }

    /// A string with an empty prompt.
    pub fn empty(&self) -> GptString {
        self.template(Template::default())
    }

    pub fn template(&self, template: Template) -> GptString {
        GptString::new(self.ctx.clone(), self.config.clone(), template)
    }
}

/// Build a [`GptString`] from a tag and a `{}`-placeholder prompt.
///
/// ```
/// # use gpt_tag::{gpt, ExecCtx};
/// # use std::sync::Arc;
/// # let ctx = Arc::new(ExecCtx::builder("http://localhost").build());
/// let tag = ctx.tag();
/// let s = gpt!(tag, "Write {} bars of {}", 8, "stride piano");
/// let plain = gpt!(tag, "No values here");
/// ```
#[macro_export]
macro_rules! gpt {
    ($tag:expr, $fmt:expr $(,)?) => {
        $tag.format($fmt, ::std::vec::Vec::new())
    };
    ($tag:expr, $fmt:expr, $($value:expr),+ $(,)?) => {
        $tag.format($fmt, ::std::vec![$($crate::TagValue::from($value)),+])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::debug::DebugConsole;
    use crate::gpt;
    use serde_json::json;

    fn setup(mock: MockBackend) -> (Arc<MockBackend>, Tag) {
        let mock = Arc::new(mock);
        let ctx = ExecCtx::builder("http://mock")
            .backend(mock.clone())
            .console(Arc::new(DebugConsole::with_writer(std::io::sink())))
            .build();
        (mock, Tag::new(Arc::new(ctx)))
    }

    #[test]
    fn test_builders_override_one_field() {
        let (_, base) = setup(MockBackend::fixed("x"));
        let hot = base.model("gpt-4").temperature(1.5).id("hot");
        let streaming = hot.stream(true);
        assert_eq!(hot.config().effective_model(), "gpt-4");
        assert_eq!(hot.config().temperature, Some(1.5));
        assert_eq!(hot.config().id.as_deref(), Some("hot"));
        assert!(!hot.config().stream);
        assert!(streaming.config().stream);
        assert_eq!(streaming.config().temperature, Some(1.5));
        assert!(base.config().model.is_none());
    }

    #[test]
    fn test_branching_builders_do_not_interfere() {
        let (_, base) = setup(MockBackend::fixed("x"));
        let a = base.add_message(ChatMessage::system("A"));
        let b = base.add_message(ChatMessage::system("B"));
        let ab = a.add_messages([ChatMessage::user("B")]);
        assert_eq!(a.config().static_messages.len(), 1);
        assert_eq!(b.config().static_messages[0].content, "B");
        assert_eq!(ab.config().static_messages.len(), 2);
        assert!(base.config().static_messages.is_empty());
    }

    #[test]
    fn test_parse_and_evaluations_are_stored() {
        let (_, base) = setup(MockBackend::fixed("x"));
        let tag = base
            .parse_named("len", |raw| json!(raw.map(str::len)))
            .add_evaluation(|_, _| Some(1.0))
            .add_evaluations([Arc::new(|_: &Value, _: Option<&str>| -> Option<f64> { None }) as EvaluationFn]);
        assert_eq!(tag.config().parse.as_ref().unwrap().name(), Some("len"));
        assert_eq!(tag.config().evaluations.len(), 2);
    }

    #[tokio::test]
    async fn test_call_form_interleaves() {
        let (mock, tag) = setup(MockBackend::fixed("ok"));
        tag.call(&["A ", " in ", ""], vec!["ballad".into(), "Db".into()])
            .get()
            .await
            .unwrap();
        assert_eq!(mock.last_request().unwrap().messages[0].content, "A ballad in Db");
    }

    #[tokio::test]
    async fn test_macro_and_format_escape() {
        let (mock, tag) = setup(MockBackend::fixed("ok"));
        gpt!(tag, "{{{}}} x{}", "K:C", 2).get().await.unwrap();
        assert_eq!(mock.last_request().unwrap().messages[0].content, "{K:C} x2");
    }

    #[tokio::test]
    async fn test_empty_template_is_legal() {
        let (mock, tag) = setup(MockBackend::fixed("ok"));
        assert_eq!(tag.empty().value().await.unwrap(), json!("ok"));
        tag.call::<&str>(&[], vec![]).get().await.unwrap();
        let sent = mock.last_request().unwrap();
        assert_eq!(sent.messages.len(), 1);
        assert_eq!(sent.messages[0].content, "");
    }

    #[tokio::test]
    async fn test_request_fields() {
        let (mock, tag) = setup(MockBackend::fixed("ok"));
        gpt!(tag.model("gpt-4").temperature(0.2), "x").get().await.unwrap();
        let sent = mock.last_request().unwrap();
        assert_eq!(sent.model, "gpt-4");
        assert_eq!(sent.temperature, Some(0.2));
        assert_eq!(sent.n, 1);
        assert!(!sent.stream);
    }
}
