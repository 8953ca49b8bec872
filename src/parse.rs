//! Parse functions applied to raw completion text.
//!
//! A [`ParseFn`] maps the raw text of one choice (or `None` when the provider
//! returned no content) to a `serde_json::Value`. The value type is shared by
//! every shape a parser can produce, so downstream code extracts typed data
//! with [`GptString::parse_as`](crate::GptString::parse_as).

use serde_json::Value;
use std::sync::Arc;

type ParseImpl = Arc<dyn Fn(Option<&str>) -> Value + Send + Sync>;

/// A named or anonymous parse function.
///
/// # Example
///
/// ```
/// use gpt_tag::ParseFn;
/// use serde_json::json;
///
/// let words = ParseFn::named("wordCount", |raw| {
///     json!(raw.map(|s| s.split_whitespace().count()).unwrap_or(0))
/// });
/// assert_eq!(words.apply(Some("four beats per bar")), json!(4));
/// assert_eq!(words.name(), Some("wordCount"));
/// ```
#[derive(Clone)]
pub struct ParseFn {
    name: Option<String>,
    f: ParseImpl,
}

impl ParseFn {
    /// An anonymous parse function.
    pub fn new(f: impl Fn(Option<&str>) -> Value + Send + Sync + 'static) -> Self {
        Self {
            name: None,
            f: Arc::new(f),
        }
    }

    /// A parse function with a display name (shown by the debug console).
    pub fn named(
        name: impl Into<String>,
        f: impl Fn(Option<&str>) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: Some(name.into()),
            f: Arc::new(f),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn apply(&self, raw: Option<&str>) -> Value {
        (self.f)(raw)
    }

    /// Re-apply to an already-processed value.
    ///
    /// Only text and null are re-parsed; structured values pass through.
    pub(crate) fn reapply(&self, value: Value) -> Value {
        match value {
            Value::String(s) => self.apply(Some(&s)),
            Value::Null => self.apply(None),
            other => other,
        }
    }

    /// Parse the text as JSON, tolerating a surrounding Markdown code fence.
    /// Unparseable text becomes `null`.
    pub fn json() -> Self {
        Self::named("json", |raw| {
            raw.map(strip_fence)
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(Value::Null)
        })
    }

    /// Trim surrounding whitespace; `None` stays `null`.
    pub fn trimmed() -> Self {
        Self::named("trimmed", |raw| {
            raw.map(|s| Value::String(s.trim().to_string()))
                .unwrap_or(Value::Null)
        })
    }

    /// The first number appearing in the text, or `null`.
    pub fn number() -> Self {
        Self::named("number", |raw| {
            raw.and_then(first_number)
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        })
    }

    /// Non-empty trimmed lines, with list markers (`-`, `*`, `1.`) removed.
    pub fn lines() -> Self {
        Self::named("lines", |raw| {
            let items = raw
                .unwrap_or("")
                .lines()
                .map(strip_list_marker)
                .filter(|l| !l.is_empty())
                .map(|l| Value::String(l.to_string()))
                .collect();
            Value::Array(items)
        })
    }
}

impl std::fmt::Debug for ParseFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ParseFn({})", self.name.as_deref().unwrap_or("(anonymous)"))
    }
}

/// Remove a surrounding ```` ``` ```` fence (with optional language tag).
pub(crate) fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn first_number(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let mut start = None;
    for (i, &b) in bytes.iter().enumerate() {
        let numeric = b.is_ascii_digit()
            || (b == b'.' && start.is_some())
            || (b == b'-' && start.is_none() && bytes.get(i + 1).is_some_and(u8::is_ascii_digit));
        match (start, numeric) {
            (None, true) => start = Some(i),
            (Some(s), false) => return text[s..i].trim_end_matches('.').parse().ok(),
            _ => {}
        }
    }
    start.and_then(|s| text[s..].trim_end_matches('.').parse().ok())
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return rest.trim();
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix(". ") {
            return rest.trim();
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_with_fence() {
        let p = ParseFn::json();
        assert_eq!(p.apply(Some("```json\n{\"bars\": 8}\n```")), json!({"bars": 8}));
        assert_eq!(p.apply(Some("[1, 2]")), json!([1, 2]));
        assert_eq!(p.apply(Some("not json")), Value::Null);
        assert_eq!(p.apply(None), Value::Null);
    }

    #[test]
    fn test_number() {
        let p = ParseFn::number();
        assert_eq!(p.apply(Some("Tempo: 120 bpm")), json!(120.0));
        assert_eq!(p.apply(Some("offset -2.5.")), json!(-2.5));
        assert_eq!(p.apply(Some("none here")), Value::Null);
    }

    #[test]
    fn test_lines() {
        let p = ParseFn::lines();
        assert_eq!(
            p.apply(Some("1. swing\n- bossa\n\n* bebop ")),
            json!(["swing", "bossa", "bebop"])
        );
        assert_eq!(p.apply(None), json!([]));
    }

    #[test]
    fn test_reapply_skips_structured() {
        let p = ParseFn::trimmed();
        assert_eq!(p.reapply(json!(" a ")), json!("a"));
        assert_eq!(p.reapply(json!({"k": 1})), json!({"k": 1}));
        assert_eq!(p.reapply(Value::Null), Value::Null);
    }

    #[test]
    fn test_debug_shows_name() {
        assert_eq!(format!("{:?}", ParseFn::json()), "ParseFn(json)");
        assert_eq!(format!("{:?}", ParseFn::new(|_| Value::Null)), "ParseFn((anonymous))");
    }
}
