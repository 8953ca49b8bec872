//! The deferred, chainable string returned by a [`Tag`](crate::Tag).
//!
//! A [`GptString`] stands in for text the model has not produced yet. String
//! operations called on it are recorded and replayed once the completion
//! arrives. Nothing is sent until the first [`get`](GptString::get); every
//! later `get` on the same instance (or a clone of the handle) observes the
//! same settled result without another request.
//!
//! # Example
//!
//! ```no_run
//! use gpt_tag::{gpt, ExecCtx};
//! use std::sync::Arc;
//!
//! # async fn run() -> gpt_tag::Result<()> {
//! let ctx = Arc::new(ExecCtx::from_env().build());
//! let gpt = ctx.tag().temperature(0.9);
//!
//! let genre = gpt!(gpt, "Name one jazz subgenre, one word only.").trim();
//! let mood = genre
//!     .clone()
//!     .to_lower_case()
//!     .includes("bop", "frantic", "laid back");
//!
//! println!("{} is {}", genre.value().await?, mood.value().await?);
//! # Ok(())
//! # }
//! ```

use crate::backend::CompletionRequest;
use crate::config::TagConfig;
use crate::debug::{DebugEntry, DebugMeta};
use crate::error::{Result, TagError};
use crate::events::{emit, Event};
use crate::exec_ctx::ExecCtx;
use crate::fanout::{CompletionStream, Fanout};
use crate::ops::{ArrayOp, Branch, CallArg, ChainOp, Dispatch, Operand};
use crate::parse::ParseFn;
use crate::replay::{reduce, replay};
use crate::template::Template;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

type Resolution = Shared<BoxFuture<'static, std::result::Result<Resolved, Arc<TagError>>>>;

/// The settled result of a [`GptString`].
#[derive(Debug, Clone)]
pub enum Resolved {
    /// Text (`Value::String`), missing text (`Value::Null`), or whatever the
    /// parse function and call stack produced.
    Value(Value),
    /// A streaming completion; each reader starts from the first chunk.
    Stream(Fanout),
}

impl Resolved {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Resolved::Value(v) => Some(v),
            Resolved::Stream(_) => None,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Resolved::Stream(_))
    }
}

/// Text form used when a result is interpolated into another prompt.
impl fmt::Display for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Value(Value::String(s)) => f.write_str(s),
            Resolved::Value(Value::Null) => f.write_str("null"),
            Resolved::Value(other) => write!(f, "{}", other),
            Resolved::Stream(_) => f.write_str("[stream]"),
        }
    }
}

#[derive(Default)]
struct Pending {
    calls: Vec<ChainOp>,
    array_op: Option<ArrayOp>,
    parse: Option<ParseFn>,
}

struct Instance {
    ctx: Arc<ExecCtx>,
    config: Arc<TagConfig>,
    template: Arc<Template>,
    pending: Mutex<Pending>,
    cached: Mutex<Option<Resolution>>,
}

/// A lazily resolved, memoized, chainable completion.
///
/// Cloning the handle aliases the same instance: calls recorded through any
/// clone apply to all of them.
#[derive(Clone)]
pub struct GptString {
    inner: Arc<Instance>,
}

impl fmt::Debug for GptString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let started = self.is_started();
        let pending = self.pending();
        f.debug_struct("GptString")
            .field("parts", &self.inner.template.parts)
            .field("values", &self.inner.template.values.len())
            .field("calls", &pending.calls.len())
            .field("array_op", &pending.array_op)
            .field("started", &started)
            .finish()
    }
}

impl GptString {
    pub(crate) fn new(ctx: Arc<ExecCtx>, config: Arc<TagConfig>, template: Template) -> Self {
        let parse = config.parse.clone();
        Self {
            inner: Arc::new(Instance {
                ctx,
                config,
                template: Arc::new(template),
                pending: Mutex::new(Pending {
                    parse,
                    ..Pending::default()
                }),
                cached: Mutex::new(None),
            }),
        }
    }

    /// The configuration this string was created with.
    pub fn config(&self) -> &TagConfig {
        &self.inner.config
    }

    /// Whether resolution has started.
    pub fn is_started(&self) -> bool {
        self.cached().is_some()
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.inner.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cached(&self) -> MutexGuard<'_, Option<Resolution>> {
        self.inner.cached.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(self, op: ChainOp) -> Self {
        if self.is_started() {
            tracing::debug!(?op, "call recorded after resolution started; it will not apply");
        }
        self.pending().calls.push(op);
        self
    }

    /// A new instance over the same template and config, carrying the calls
    /// and array op recorded so far and whatever resolution is in flight.
    fn fork(&self) -> Self {
        let (calls, array_op) = {
            let pending = self.pending();
            (pending.calls.clone(), pending.array_op.clone())
        };
        let cached = self.cached().clone();
        Self {
            inner: Arc::new(Instance {
                ctx: self.inner.ctx.clone(),
                config: self.inner.config.clone(),
                template: self.inner.template.clone(),
                pending: Mutex::new(Pending {
                    calls,
                    array_op,
                    parse: self.inner.config.parse.clone(),
                }),
                cached: Mutex::new(cached),
            }),
        }
    }

    fn fork_with(&self, op: ChainOp) -> Self {
        self.fork().record(op)
    }

    fn fork_array(&self, op: ArrayOp) -> Self {
        let fork = self.fork();
        fork.pending().array_op = Some(op);
        fork
    }

    pub fn trim(self) -> Self {
        self.record(ChainOp::Trim)
    }

    pub fn trim_start(self) -> Self {
        self.record(ChainOp::TrimStart)
    }

    pub fn trim_end(self) -> Self {
        self.record(ChainOp::TrimEnd)
    }

    pub fn to_upper_case(self) -> Self {
        self.record(ChainOp::ToUpperCase)
    }

    pub fn to_lower_case(self) -> Self {
        self.record(ChainOp::ToLowerCase)
    }

    /// Character count. The result is a number, so later string calls are
    /// skipped.
    pub fn len(self) -> Self {
        self.record(ChainOp::Length)
    }

    /// Negative indices count from the end.
    pub fn slice(self, start: i64, end: Option<i64>) -> Self {
        self.record(ChainOp::Slice { start, end })
    }

    pub fn substring(self, start: usize, end: Option<usize>) -> Self {
        self.record(ChainOp::Substring { start, end })
    }

    pub fn substr(self, start: i64, len: Option<usize>) -> Self {
        self.record(ChainOp::Substr { start, len })
    }

    pub fn char_at(self, index: usize) -> Self {
        self.record(ChainOp::CharAt(index))
    }

    pub fn concat<I, S>(self, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.record(ChainOp::Concat(parts.into_iter().map(Into::into).collect()))
    }

    /// Replace the first occurrence of `from`.
    pub fn replace(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.record(ChainOp::Replace {
            from: from.into(),
            to: to.into(),
        })
    }

    pub fn replace_all(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.record(ChainOp::ReplaceAll {
            from: from.into(),
            to: to.into(),
        })
    }

    pub fn repeat(self, count: usize) -> Self {
        self.record(ChainOp::Repeat(count))
    }

    pub fn pad_start(self, len: usize, fill: impl Into<String>) -> Self {
        self.record(ChainOp::PadStart {
            len,
            fill: fill.into(),
        })
    }

    pub fn pad_end(self, len: usize, fill: impl Into<String>) -> Self {
        self.record(ChainOp::PadEnd {
            len,
            fill: fill.into(),
        })
    }

    /// A new string resolving to `then` when this one equals `test`, and to
    /// `otherwise` when it doesn't. `self` is left unchanged.
    pub fn is(
        &self,
        test: impl Into<Operand>,
        then: impl Into<Operand>,
        otherwise: impl Into<Operand>,
    ) -> Self {
        self.fork_with(ChainOp::Is(Branch {
            test: test.into(),
            then: then.into(),
            otherwise: otherwise.into(),
        }))
    }

    /// Like [`is`](Self::is), testing substring containment instead.
    pub fn includes(
        &self,
        test: impl Into<Operand>,
        then: impl Into<Operand>,
        otherwise: impl Into<Operand>,
    ) -> Self {
        self.fork_with(ChainOp::Includes(Branch {
            test: test.into(),
            then: then.into(),
            otherwise: otherwise.into(),
        }))
    }

    /// For multi-choice tags: keep the first choice.
    pub fn first(&self) -> Self {
        self.fork_array(ArrayOp::First)
    }

    /// For multi-choice tags: process every choice and join with `delimiter`.
    pub fn each(&self, delimiter: impl Into<String>) -> Self {
        self.fork_array(ArrayOp::Each {
            delimiter: Some(delimiter.into()),
        })
    }

    /// Call a method by its JavaScript name.
    ///
    /// String operations record on this instance and return it; `is`,
    /// `includes`, `first` and `each` return a fork. Unknown names give
    /// `Ok(None)`.
    pub fn dispatch(&self, method: &str, args: &[CallArg]) -> Result<Option<GptString>> {
        Ok(ChainOp::from_call(method, args)?.map(|d| match d {
            Dispatch::Chain(op) => self.clone().record(op),
            Dispatch::Branch(op) => self.fork_with(op),
            Dispatch::Array(op) => self.fork_array(op),
        }))
    }

    /// Resolve, sending the request on the first call only.
    ///
    /// Concurrent callers share one in-flight request. The request runs on
    /// its own task, so dropping this future does not cancel it.
    pub async fn get(&self) -> Result<Resolved> {
        let resolution = {
            let mut cached = self.cached();
            match &*cached {
                Some(existing) => existing.clone(),
                None => {
                    let started = self.start();
                    *cached = Some(started.clone());
                    started
                }
            }
        };
        resolution.await.map_err(TagError::Shared)
    }

    /// The resolved value; fails for streams.
    pub async fn value(&self) -> Result<Value> {
        match self.get().await? {
            Resolved::Value(v) => Ok(v),
            Resolved::Stream(_) => Err(TagError::NotAValue),
        }
    }

    /// The resolved value as text: `None` for null, JSON for structured values.
    pub async fn text(&self) -> Result<Option<String>> {
        Ok(match self.value().await? {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        })
    }

    /// Deserialize the resolved value into `T`.
    pub async fn parse_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.value().await?)?)
    }

    /// A fresh reader over a streaming result; fails for values.
    pub async fn stream(&self) -> Result<CompletionStream> {
        match self.get().await? {
            Resolved::Stream(fanout) => Ok(fanout.subscribe()),
            Resolved::Value(_) => Err(TagError::NotAStream),
        }
    }

    /// Consume the pending state and spawn the resolution task.
    fn start(&self) -> Resolution {
        let pending = std::mem::take(&mut *self.pending());
        let this = self.clone();
        let task = tokio::spawn(async move { this.resolve(pending).await.map_err(Arc::new) });
        async move {
            task.await.unwrap_or_else(|e| {
                Err(Arc::new(TagError::Other(format!("resolution task failed: {}", e))))
            })
        }
        .boxed()
        .shared()
    }

    fn label(&self) -> String {
        let config = &self.inner.config;
        config
            .id
            .clone()
            .unwrap_or_else(|| config.effective_model().to_string())
    }

    async fn resolve(&self, pending: Pending) -> Result<Resolved> {
        let ctx = &self.inner.ctx;
        let label = self.label();

        let values: Vec<String> = self
            .inner
            .template
            .resolve_values()
            .await
            .into_iter()
            .enumerate()
            .map(|(index, resolved)| {
                resolved.unwrap_or_else(|message| {
                    tracing::warn!(%label, index, error = %message, "interpolated value failed; using its error text");
                    emit(
                        &ctx.event_handler,
                        Event::InterpolationFailed {
                            label: label.clone(),
                            index,
                            message: message.clone(),
                        },
                    );
                    format!("Error: {}", message)
                })
            })
            .collect();

        let prompt = self.inner.template.interleave(&values);
        let request = self.inner.config.build_request(prompt.clone());

        emit(
            &ctx.event_handler,
            Event::RequestStart {
                label: label.clone(),
                model: request.model.clone(),
                prompt,
            },
        );
        tracing::debug!(
            %label,
            backend = ctx.backend.name(),
            model = %request.model,
            n = request.n,
            stream = request.stream,
            "sending completion request"
        );

        let outcome = if request.stream {
            self.open_stream(&request, &label, values).await
        } else {
            self.complete(&request, pending, values).await
        };

        let (ok, choices) = match &outcome {
            Ok((_, choices)) => (true, *choices),
            Err(e) => {
                tracing::debug!(%label, error = %e, "completion request failed");
                (false, 0)
            }
        };
        emit(
            &ctx.event_handler,
            Event::RequestEnd {
                label: label.clone(),
                ok,
                choices,
            },
        );
        tracing::debug!(%label, ok, choices, "resolution settled");
        outcome.map(|(resolved, _)| resolved)
    }

    fn debug_entry(&self, values: Vec<String>, choices: Vec<Option<String>>) -> DebugEntry {
        DebugEntry {
            parts: self.inner.template.parts.clone(),
            values,
            choices,
            meta: DebugMeta::from_config(&self.inner.config),
        }
    }

    fn debug_enabled(&self) -> bool {
        self.inner.config.debug || self.inner.ctx.debug
    }

    async fn open_stream(
        &self,
        request: &CompletionRequest,
        label: &str,
        values: Vec<String>,
    ) -> Result<(Resolved, usize)> {
        let ctx = &self.inner.ctx;
        let source = ctx
            .backend
            .complete_streaming(&ctx.client, &ctx.base_url, request)
            .await?;
        let fanout = Fanout::spawn(source);

        emit(
            &ctx.event_handler,
            Event::StreamOpened {
                label: label.to_string(),
            },
        );
        tracing::debug!(%label, "completion stream opened");

        if self.debug_enabled() {
            let console = ctx.console.clone();
            let entry = self.debug_entry(values, Vec::new());
            let reader = fanout.subscribe();
            tokio::spawn(async move { console.render_stream(entry, reader).await });
        }
        Ok((Resolved::Stream(fanout), 0))
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        pending: Pending,
        values: Vec<String>,
    ) -> Result<(Resolved, usize)> {
        let ctx = &self.inner.ctx;
        let response = ctx
            .backend
            .complete(&ctx.client, &ctx.base_url, request)
            .await?;
        let choices: Vec<Option<String>> = response
            .choices
            .into_iter()
            .take(request.n as usize)
            .collect();
        let count = choices.len();

        if self.debug_enabled() {
            ctx.console.render(&self.debug_entry(values, choices.clone()));
        }

        let parse = pending.parse.as_ref();
        let parse_one = |choice: Option<String>| match parse {
            Some(p) => p.apply(choice.as_deref()),
            None => choice.map(Value::String).unwrap_or(Value::Null),
        };

        let value = match self.inner.config.n {
            None => {
                let first = choices.into_iter().next().flatten();
                replay(parse_one(first), &pending.calls).await?
            }
            Some(_) => {
                let parsed = choices.into_iter().map(parse_one).collect();
                reduce(pending.array_op.as_ref(), &pending.calls, parsed, parse).await?
            }
        };
        Ok((Resolved::Value(value), count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, Role};
    use crate::debug::DebugConsole;
    use crate::error::ApiError;
    use crate::events::FnEventHandler;
    use crate::template::TagValue;
    use crate::{gpt, Tag};
    use serde_json::json;
    use std::time::Duration;

    fn setup(mock: MockBackend) -> (Arc<MockBackend>, Tag) {
        let mock = Arc::new(mock);
        let ctx = ExecCtx::builder("http://mock")
            .backend(mock.clone())
            .console(Arc::new(DebugConsole::with_writer(std::io::sink())))
            .build();
        (mock, Arc::new(ctx).tag())
    }

    #[tokio::test]
    async fn test_memoized_sequential() {
        let (mock, gpt) = setup(MockBackend::sequence(["one", "two"]));
        let s = gpt!(gpt, "count");
        assert!(!s.is_started());
        let a = s.value().await.unwrap();
        let b = s.value().await.unwrap();
        assert_eq!(a, json!("one"));
        assert_eq!(a, b);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_memoized_concurrent() {
        let (mock, gpt) = setup(MockBackend::sequence(["one", "two"]).with_delay(Duration::from_millis(50)));
        let s = gpt!(gpt, "count");
        let other = s.clone();
        let (a, b) = tokio::join!(s.value(), other.value());
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_get_keeps_running() {
        let (mock, gpt) = setup(MockBackend::fixed("done").with_delay(Duration::from_millis(30)));
        let s = gpt!(gpt, "work");
        let _ = tokio::time::timeout(Duration::from_millis(5), s.get()).await;
        assert_eq!(s.value().await.unwrap(), json!("done"));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_clone_aliases_instance() {
        let (_, gpt) = setup(MockBackend::fixed("  swing  "));
        let s = gpt!(gpt, "style");
        let _trimmed = s.clone().trim();
        assert_eq!(s.value().await.unwrap(), json!("swing"));
    }

    #[tokio::test]
    async fn test_is_branch() {
        let (_, gpt) = setup(MockBackend::fixed("jazz"));
        let s = gpt!(gpt, "genre");
        assert_eq!(s.is("jazz", "A", "B").value().await.unwrap(), json!("A"));
        assert_eq!(s.is("rock", "A", "B").value().await.unwrap(), json!("B"));
    }

    #[tokio::test]
    async fn test_includes_branch() {
        let (_, gpt) = setup(MockBackend::fixed("hello world"));
        let s = gpt!(gpt, "greet");
        assert_eq!(s.includes("world", "Y", "N").value().await.unwrap(), json!("Y"));
        assert_eq!(s.includes("xyz", "Y", "N").value().await.unwrap(), json!("N"));
    }

    #[tokio::test]
    async fn test_branch_forks_leave_original_alone() {
        let (mock, gpt) = setup(MockBackend::fixed("jazz"));
        let s = gpt!(gpt, "genre");
        let branch = s.is("jazz", "A", "B");
        assert_eq!(s.value().await.unwrap(), json!("jazz"));
        assert_eq!(branch.value().await.unwrap(), json!("A"));
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_fork_after_start_shares_result() {
        let (mock, gpt) = setup(MockBackend::fixed("jazz"));
        let s = gpt!(gpt, "genre");
        s.get().await.unwrap();
        let late = s.is("jazz", "A", "B");
        assert_eq!(late.value().await.unwrap(), json!("jazz"));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_fork_inherits_recorded_calls() {
        let (_, gpt) = setup(MockBackend::fixed("  jazz "));
        let s = gpt!(gpt, "genre").trim();
        assert_eq!(s.is("jazz", "A", "B").value().await.unwrap(), json!("A"));
    }

    #[tokio::test]
    async fn test_deferred_branch_operands() {
        let (_, gpt) = setup(MockBackend::sequence(["jazz", "jazz", "matched"]));
        let s = gpt!(gpt, "genre");
        let test = gpt!(gpt, "also genre");
        let then = gpt!(gpt, "reply");
        assert_eq!(s.is(&test, &then, "no").value().await.unwrap(), json!("matched"));
    }

    #[tokio::test]
    async fn test_chain_order() {
        let (_, gpt) = setup(MockBackend::fixed("  abc  "));
        assert_eq!(gpt!(gpt, "a").trim().to_upper_case().value().await.unwrap(), json!("ABC"));
        assert_eq!(gpt!(gpt, "b").to_upper_case().trim().value().await.unwrap(), json!("ABC"));
    }

    #[tokio::test]
    async fn test_first_applies_chain_to_first_choice() {
        let (mock, gpt) = setup(MockBackend::with_choices([" a ", " b ", " c "]));
        let s = gpt!(gpt.n(3), "letters").trim().to_upper_case().first();
        assert_eq!(s.value().await.unwrap(), json!("A"));
        assert_eq!(mock.last_request().unwrap().n, 3);
    }

    #[tokio::test]
    async fn test_first_and_each_reparse_after_replay() {
        let (_, gpt) = setup(MockBackend::with_choices(["a", "b"]));
        let bang = gpt.n(2).parse(ParseFn::new(|raw| json!(format!("{}!", raw.unwrap_or("")))));
        let s = gpt!(bang, "letters");
        assert_eq!(s.first().value().await.unwrap(), json!("a!!"));
        assert_eq!(s.each("-").value().await.unwrap(), json!("a!!-b!!"));
    }

    #[tokio::test]
    async fn test_each_joins_choices() {
        let (_, gpt) = setup(MockBackend::with_choices(["a", "b", "c"]));
        let s = gpt!(gpt.n(2), "letters").each("-");
        assert_eq!(s.value().await.unwrap(), json!("a-b"));
    }

    #[tokio::test]
    async fn test_multi_choice_without_array_op_fails() {
        let (mock, gpt) = setup(MockBackend::with_choices(["a", "b"]));
        let s = gpt!(gpt.n(2), "letters");
        let err = s.get().await.unwrap_err();
        assert!(matches!(
            err,
            TagError::Shared(ref inner)
                if matches!(**inner, TagError::UnsupportedArrayOp { ref method } if method == "none")
        ));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_interpolation_failure_is_tolerated() {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        let mock = Arc::new(MockBackend::fixed("ok"));
        let ctx = ExecCtx::builder("http://mock")
            .backend(mock.clone())
            .console(Arc::new(DebugConsole::with_writer(std::io::sink())))
            .event_handler(Arc::new(FnEventHandler(move |e: Event| {
                if let Event::InterpolationFailed { index, message, .. } = e {
                    sink.lock().unwrap().push((index, message));
                }
            })))
            .build();
        let gpt = Arc::new(ctx).tag();

        let broken = TagValue::lazy(|| Err::<String, _>("no mood"));
        let s = gpt!(gpt, "play {} in {}", "swing", broken);
        assert_eq!(s.value().await.unwrap(), json!("ok"));
        let sent = mock.last_request().unwrap();
        assert_eq!(sent.messages[0].content, "play swing in Error: no mood");
        assert_eq!(*failures.lock().unwrap(), vec![(1, "no mood".to_string())]);
    }

    #[tokio::test]
    async fn test_static_messages_precede_user_turn() {
        let (mock, gpt) = setup(MockBackend::fixed("ok"));
        let tag = gpt
            .add_message(crate::ChatMessage::system("A"))
            .add_message(crate::ChatMessage::assistant("B"));
        gpt!(tag, "C").get().await.unwrap();
        let sent = mock.last_request().unwrap();
        let layout: Vec<(Role, &str)> = sent
            .messages
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            layout,
            vec![(Role::System, "A"), (Role::Assistant, "B"), (Role::User, "C")]
        );
    }

    #[tokio::test]
    async fn test_length_short_circuits_rest_of_chain() {
        let (_, gpt) = setup(MockBackend::fixed("♪ bars"));
        let s = gpt!(gpt, "x").len().trim().to_upper_case();
        assert_eq!(s.value().await.unwrap(), json!(6));
    }

    #[tokio::test]
    async fn test_nested_string_interpolates_result() {
        let (mock, gpt) = setup(MockBackend::sequence(["bebop", "ok"]));
        let genre = gpt!(gpt, "pick a genre").trim();
        let s = gpt!(gpt, "write {} in ABC", &genre);
        assert_eq!(s.value().await.unwrap(), json!("ok"));
        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages[0].content, "write bebop in ABC");
        assert_eq!(genre.value().await.unwrap(), json!("bebop"));
    }

    #[tokio::test]
    async fn test_api_error_is_cached() {
        let (mock, gpt) = setup(MockBackend::failing(ApiError::new(429, "slow down")));
        let s = gpt!(gpt, "x");
        for _ in 0..2 {
            let err = s.value().await.unwrap_err();
            assert_eq!(err.api_error().unwrap().name, "RateLimitError");
        }
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_parse_and_typed_extraction() {
        #[derive(serde::Deserialize)]
        struct Tune {
            key: String,
            bars: u32,
        }
        let (_, gpt) = setup(MockBackend::fixed("```json\n{\"key\": \"Bb\", \"bars\": 32}\n```"));
        let s = gpt!(gpt.parse(ParseFn::json()), "tune");
        let tune: Tune = s.parse_as().await.unwrap();
        assert_eq!(tune.key, "Bb");
        assert_eq!(tune.bars, 32);
    }

    #[tokio::test]
    async fn test_missing_text_is_null() {
        let (_, gpt) = setup(MockBackend::new(vec![crate::backend::mock::MockReply::Choices(vec![None])]));
        let s = gpt!(gpt, "x").trim();
        assert_eq!(s.text().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_streaming_readers_are_independent() {
        let (mock, gpt) = setup(MockBackend::fixed("X:1 K:C CDEF"));
        let s = gpt!(gpt.stream(true), "abc");
        let a = s.stream().await.unwrap().collect_text().await.unwrap();
        let b = s.stream().await.unwrap().collect_text().await.unwrap();
        assert_eq!(a, "X:1 K:C CDEF");
        assert_eq!(a, b);
        assert!(matches!(s.value().await, Err(TagError::NotAValue)));
        assert!(mock.last_request().unwrap().stream);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_value_result_is_not_a_stream() {
        let (_, gpt) = setup(MockBackend::fixed("x"));
        assert!(matches!(gpt!(gpt, "x").stream().await, Err(TagError::NotAStream)));
    }

    #[tokio::test]
    async fn test_dispatch_by_name() {
        let (_, gpt) = setup(MockBackend::fixed("  Blue Bossa  "));
        let s = gpt!(gpt, "x");
        let same = s.dispatch("trim", &[]).unwrap().unwrap();
        same.dispatch("toLocaleUpperCase", &[]).unwrap();
        let branch = s
            .dispatch("includes", &["BOSSA".into(), "latin".into(), "other".into()])
            .unwrap()
            .unwrap();
        assert!(s.dispatch("localeCompare", &[]).unwrap().is_none());
        assert!(s.dispatch("padStart", &["wide".into()]).is_err());
        assert_eq!(s.value().await.unwrap(), json!("BLUE BOSSA"));
        assert_eq!(branch.value().await.unwrap(), json!("latin"));
    }

    #[tokio::test]
    async fn test_debug_renders_static_table() {
        let mock = Arc::new(MockBackend::with_choices(["a", "b"]));
        let console = Arc::new(DebugConsole::with_writer(std::io::sink()).with_width(60));
        let ctx = Arc::new(
            ExecCtx::builder("http://mock")
                .backend(mock)
                .console(console.clone())
                .build(),
        );
        let gpt = ctx.tag().debug(true).n(2);
        gpt!(gpt, "letters").first().get().await.unwrap();
        assert_eq!(console.counter(), 1);
        assert!(console.transcript()[0].contains("choices=2"));

        gpt!(ctx.tag(), "quiet").get().await.unwrap();
        assert_eq!(console.counter(), 1);
    }

    #[test]
    fn test_resolved_display() {
        assert_eq!(Resolved::Value(json!("a")).to_string(), "a");
        assert_eq!(Resolved::Value(Value::Null).to_string(), "null");
        assert_eq!(Resolved::Value(json!({"k": 1})).to_string(), "{\"k\":1}");
    }
}
