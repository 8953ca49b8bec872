//! Prompt templates and the values interpolated into them.
//!
//! A [`Template`] is a list of literal parts with one [`TagValue`] between
//! each neighbouring pair. Values may be plain scalars or things that only
//! become text later: another [`GptString`], a closure, or a future. All of
//! them are turned into text right before the request is sent.

use crate::gpt_string::GptString;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type LazyFn = Arc<dyn Fn() -> Result<TagValue, String> + Send + Sync>;
type PendingValue = Shared<BoxFuture<'static, Result<TagValue, String>>>;

/// A value interpolated into a prompt.
#[derive(Clone)]
pub enum TagValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Null,
    /// Another deferred string; resolved through its own `get`.
    Deferred(GptString),
    /// Invoked at resolution time; the returned value is resolved in turn.
    Lazy(LazyFn),
    /// Awaited at resolution time; the output is resolved in turn.
    Pending(PendingValue),
}

impl TagValue {
    /// A value computed by `f` when the prompt is assembled.
    pub fn lazy<V, E, F>(f: F) -> Self
    where
        F: Fn() -> Result<V, E> + Send + Sync + 'static,
        V: Into<TagValue>,
        E: fmt::Display,
    {
        TagValue::Lazy(Arc::new(move || f().map(Into::into).map_err(|e| e.to_string())))
    }

    /// A value produced by `fut` when the prompt is assembled.
    pub fn future<V, E, F>(fut: F) -> Self
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
        V: Into<TagValue>,
        E: fmt::Display,
    {
        let fut = async move { fut.await.map(Into::into).map_err(|e| e.to_string()) };
        TagValue::Pending(fut.boxed().shared())
    }

    /// Resolve to text, or to the message of whatever failed along the way.
    pub fn try_resolve(&self) -> BoxFuture<'static, Result<String, String>> {
        match self {
            TagValue::Text(s) => futures::future::ready(Ok(s.clone())).boxed(),
            TagValue::Number(n) => futures::future::ready(Ok(format_number(*n))).boxed(),
            TagValue::Bool(b) => futures::future::ready(Ok(b.to_string())).boxed(),
            TagValue::Null => futures::future::ready(Ok("null".to_string())).boxed(),
            TagValue::Deferred(g) => {
                let g = g.clone();
                async move {
                    g.get()
                        .await
                        .map(|resolved| resolved.to_string())
                        .map_err(|e| e.to_string())
                }
                .boxed()
            }
            TagValue::Lazy(f) => match f() {
                Ok(next) => next.try_resolve(),
                Err(e) => futures::future::ready(Err(e)).boxed(),
            },
            TagValue::Pending(fut) => {
                let fut = fut.clone();
                async move { fut.await?.try_resolve().await }.boxed()
            }
        }
    }

    /// Resolve to text; failures are rendered as `Error: <message>`.
    pub fn resolve(&self) -> BoxFuture<'static, String> {
        self.try_resolve()
            .map(|r| r.unwrap_or_else(|e| format!("Error: {}", e)))
            .boxed()
    }
}

/// Integral values print without a fractional part, like `120` not `120.0`.
fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl fmt::Debug for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Text(s) => f.debug_tuple("Text").field(s).finish(),
            TagValue::Number(n) => f.debug_tuple("Number").field(n).finish(),
            TagValue::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            TagValue::Null => f.write_str("Null"),
            TagValue::Deferred(g) => f.debug_tuple("Deferred").field(g).finish(),
            TagValue::Lazy(_) => f.write_str("Lazy"),
            TagValue::Pending(_) => f.write_str("Pending"),
        }
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::Text(s.to_string())
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::Text(s)
    }
}

impl From<&String> for TagValue {
    fn from(s: &String) -> Self {
        TagValue::Text(s.clone())
    }
}

impl From<f64> for TagValue {
    fn from(n: f64) -> Self {
        TagValue::Number(n)
    }
}

impl From<i64> for TagValue {
    fn from(n: i64) -> Self {
        TagValue::Number(n as f64)
    }
}

impl From<i32> for TagValue {
    fn from(n: i32) -> Self {
        TagValue::Number(n.into())
    }
}

impl From<usize> for TagValue {
    fn from(n: usize) -> Self {
        TagValue::Number(n as f64)
    }
}

impl From<bool> for TagValue {
    fn from(b: bool) -> Self {
        TagValue::Bool(b)
    }
}

impl From<GptString> for TagValue {
    fn from(g: GptString) -> Self {
        TagValue::Deferred(g)
    }
}

impl From<&GptString> for TagValue {
    fn from(g: &GptString) -> Self {
        TagValue::Deferred(g.clone())
    }
}

impl<T: Into<TagValue>> From<Option<T>> for TagValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(TagValue::Null)
    }
}

/// Literal parts interleaved with interpolated values.
#[derive(Clone, Debug, Default)]
pub struct Template {
    pub parts: Vec<String>,
    pub values: Vec<TagValue>,
}

impl Template {
    /// Template-literal form: `parts[0] values[0] parts[1] ...`.
    pub fn new(parts: Vec<String>, values: Vec<TagValue>) -> Self {
        Self { parts, values }
    }

    /// Placeholder form: each `{}` in `fmt` marks one value. `{{` and `}}`
    /// are literal braces.
    ///
    /// ```
    /// use gpt_tag::template::Template;
    ///
    /// let t = Template::parse("genre: {} {{raw}}", vec!["jazz".into()]);
    /// assert_eq!(t.parts, vec!["genre: ", " {raw}"]);
    /// ```
    pub fn parse(fmt: &str, values: Vec<TagValue>) -> Self {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut chars = fmt.chars().peekable();
        while let Some(ch) = chars.next() {
            match (ch, chars.peek()) {
                ('{', Some('{')) | ('}', Some('}')) => {
                    chars.next();
                    current.push(ch);
                }
                ('{', Some('}')) => {
                    chars.next();
                    parts.push(std::mem::take(&mut current));
                }
                _ => current.push(ch),
            }
        }
        parts.push(current);
        Self { parts, values }
    }

    /// Resolve every value concurrently, keeping declaration order.
    pub async fn resolve_values(&self) -> Vec<Result<String, String>> {
        futures::future::join_all(self.values.iter().map(TagValue::try_resolve)).await
    }

    /// Join parts and resolved values left to right. Whichever list is
    /// shorter is padded with empty strings.
    pub fn interleave(&self, resolved: &[String]) -> String {
        let len = self.parts.len().max(resolved.len());
        let mut out = String::new();
        for i in 0..len {
            if let Some(part) = self.parts.get(i) {
                out.push_str(part);
            }
            if let Some(value) = resolved.get(i) {
                out.push_str(value);
            }
        }
        out
    }
}
