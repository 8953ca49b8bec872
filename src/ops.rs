//! Recorded chain operations.
//!
//! A [`GptString`] cannot run string methods before its text exists, so each
//! call is recorded as a [`ChainOp`] and replayed once the value resolves.
//! The set of operations is closed: anything not listed here cannot be
//! recorded. [`ChainOp::from_call`] maps JavaScript-style method names onto
//! the enum for callers that dispatch by name.

use crate::error::{Result, TagError};
use crate::gpt_string::GptString;
use serde_json::Value;

/// One side of a branch: literal text or another deferred string.
#[derive(Clone, Debug)]
pub enum Operand {
    Text(String),
    Deferred(GptString),
}

impl Operand {
    /// The operand's value, resolving a deferred string if needed.
    pub async fn resolve(&self) -> Result<Value> {
        match self {
            Operand::Text(s) => Ok(Value::String(s.clone())),
            Operand::Deferred(g) => g.value().await,
        }
    }
}

impl From<&str> for Operand {
    fn from(s: &str) -> Self {
        Operand::Text(s.to_string())
    }
}

impl From<String> for Operand {
    fn from(s: String) -> Self {
        Operand::Text(s)
    }
}

impl From<GptString> for Operand {
    fn from(g: GptString) -> Self {
        Operand::Deferred(g)
    }
}

impl From<&GptString> for Operand {
    fn from(g: &GptString) -> Self {
        Operand::Deferred(g.clone())
    }
}

/// Test/then/otherwise triple shared by `is` and `includes`.
#[derive(Clone, Debug)]
pub struct Branch {
    pub test: Operand,
    pub then: Operand,
    pub otherwise: Operand,
}

/// A string operation recorded against an unresolved value.
#[derive(Clone, Debug)]
pub enum ChainOp {
    Trim,
    TrimStart,
    TrimEnd,
    ToUpperCase,
    ToLowerCase,
    /// Identity; kept so `toString`/`valueOf` chains record something.
    Identity,
    /// Character count, as a number. Ends string processing for the chain.
    Length,
    /// JS `slice`: negative indices count from the end.
    Slice { start: i64, end: Option<i64> },
    /// JS `substring`: clamped, arguments swapped when reversed.
    Substring { start: usize, end: Option<usize> },
    /// JS `substr`: start (negative from end) plus optional length.
    Substr { start: i64, len: Option<usize> },
    CharAt(usize),
    Concat(Vec<String>),
    /// Replace the first occurrence.
    Replace { from: String, to: String },
    ReplaceAll { from: String, to: String },
    Repeat(usize),
    PadStart { len: usize, fill: String },
    PadEnd { len: usize, fill: String },
    /// Equality branch.
    Is(Branch),
    /// Substring-containment branch.
    Includes(Branch),
}

/// A terminal reduction over a multi-choice result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArrayOp {
    /// Keep only the first choice.
    First,
    /// Process every choice and join with the delimiter (default empty).
    Each { delimiter: Option<String> },
}

/// An argument to a name-dispatched call.
#[derive(Clone, Debug)]
pub enum CallArg {
    Text(String),
    Int(i64),
    Deferred(GptString),
}

impl From<&str> for CallArg {
    fn from(s: &str) -> Self {
        CallArg::Text(s.to_string())
    }
}

impl From<String> for CallArg {
    fn from(s: String) -> Self {
        CallArg::Text(s)
    }
}

impl From<i64> for CallArg {
    fn from(n: i64) -> Self {
        CallArg::Int(n)
    }
}

impl From<i32> for CallArg {
    fn from(n: i32) -> Self {
        CallArg::Int(n.into())
    }
}

impl From<GptString> for CallArg {
    fn from(g: GptString) -> Self {
        CallArg::Deferred(g)
    }
}

/// What a method name refers to.
#[derive(Clone, Debug)]
pub enum Dispatch {
    /// A string operation recorded on the same instance.
    Chain(ChainOp),
    /// A branch recorded on a fork.
    Branch(ChainOp),
    /// An array reduction recorded on a fork.
    Array(ArrayOp),
}

struct Args<'a> {
    method: &'a str,
    args: &'a [CallArg],
}

impl<'a> Args<'a> {
    fn invalid(&self, reason: impl Into<String>) -> TagError {
        TagError::InvalidCall {
            method: self.method.to_string(),
            reason: reason.into(),
        }
    }

    fn int(&self, i: usize) -> Result<Option<i64>> {
        match self.args.get(i) {
            None => Ok(None),
            Some(CallArg::Int(n)) => Ok(Some(*n)),
            Some(_) => Err(self.invalid(format!("argument {} must be an integer", i))),
        }
    }

    fn req_int(&self, i: usize) -> Result<i64> {
        self.int(i)?
            .ok_or_else(|| self.invalid(format!("missing integer argument {}", i)))
    }

    fn index(&self, i: usize) -> Result<Option<usize>> {
        Ok(self.int(i)?.map(|n| n.max(0) as usize))
    }

    fn text(&self, i: usize) -> Result<Option<String>> {
        match self.args.get(i) {
            None => Ok(None),
            Some(CallArg::Text(s)) => Ok(Some(s.clone())),
            Some(CallArg::Int(n)) => Ok(Some(n.to_string())),
            Some(CallArg::Deferred(_)) => {
                Err(self.invalid(format!("argument {} must be text, not a deferred string", i)))
            }
        }
    }

    fn req_text(&self, i: usize) -> Result<String> {
        self.text(i)?
            .ok_or_else(|| self.invalid(format!("missing text argument {}", i)))
    }

    fn operand(&self, i: usize) -> Result<Operand> {
        match self.args.get(i) {
            Some(CallArg::Text(s)) => Ok(Operand::Text(s.clone())),
            Some(CallArg::Int(n)) => Ok(Operand::Text(n.to_string())),
            Some(CallArg::Deferred(g)) => Ok(Operand::Deferred(g.clone())),
            None => Err(self.invalid(format!("missing operand {}", i))),
        }
    }

    fn branch(&self) -> Result<Branch> {
        Ok(Branch {
            test: self.operand(0)?,
            then: self.operand(1)?,
            otherwise: self.operand(2)?,
        })
    }
}

impl ChainOp {
    /// Resolve a method name and its arguments.
    ///
    /// Returns `Ok(None)` for names outside the vocabulary.
    pub fn from_call(method: &str, args: &[CallArg]) -> Result<Option<Dispatch>> {
        let a = Args { method, args };
        let op = match method {
            "trim" => ChainOp::Trim,
            "trimStart" | "trimLeft" => ChainOp::TrimStart,
            "trimEnd" | "trimRight" => ChainOp::TrimEnd,
            "toUpperCase" | "toLocaleUpperCase" => ChainOp::ToUpperCase,
            "toLowerCase" | "toLocaleLowerCase" => ChainOp::ToLowerCase,
            "toString" | "valueOf" => ChainOp::Identity,
            "length" => ChainOp::Length,
            "slice" => ChainOp::Slice {
                start: a.int(0)?.unwrap_or(0),
                end: a.int(1)?,
            },
            "substring" => ChainOp::Substring {
                start: a.index(0)?.unwrap_or(0),
                end: a.index(1)?,
            },
            "substr" => ChainOp::Substr {
                start: a.int(0)?.unwrap_or(0),
                len: a.index(1)?,
            },
            "charAt" => ChainOp::CharAt(a.index(0)?.unwrap_or(0)),
            "concat" => ChainOp::Concat(
                (0..args.len())
                    .map(|i| a.req_text(i))
                    .collect::<Result<Vec<_>>>()?,
            ),
            "replace" => ChainOp::Replace {
                from: a.req_text(0)?,
                to: a.req_text(1)?,
            },
            "replaceAll" => ChainOp::ReplaceAll {
                from: a.req_text(0)?,
                to: a.req_text(1)?,
            },
            "repeat" => {
                let count = a.req_int(0)?;
                if count < 0 {
                    return Err(a.invalid("count must be non-negative"));
                }
                ChainOp::Repeat(count as usize)
            }
            "padStart" => ChainOp::PadStart {
                len: a.index(0)?.unwrap_or(0),
                fill: a.text(1)?.unwrap_or_else(|| " ".into()),
            },
            "padEnd" => ChainOp::PadEnd {
                len: a.index(0)?.unwrap_or(0),
                fill: a.text(1)?.unwrap_or_else(|| " ".into()),
            },
            "is" => return Ok(Some(Dispatch::Branch(ChainOp::Is(a.branch()?)))),
            "includes" => return Ok(Some(Dispatch::Branch(ChainOp::Includes(a.branch()?)))),
            "first" => return Ok(Some(Dispatch::Array(ArrayOp::First))),
            "each" => {
                return Ok(Some(Dispatch::Array(ArrayOp::Each {
                    delimiter: a.text(0)?,
                })))
            }
            _ => return Ok(None),
        };
        Ok(Some(Dispatch::Chain(op)))
    }

    /// Apply a non-branching operation to resolved text.
    ///
    /// Branches need async resolution and are handled by
    /// [`replay`](crate::replay::replay); here they pass the text through.
    pub fn apply(&self, text: &str) -> Value {
        let s = |v: String| Value::String(v);
        match self {
            ChainOp::Trim => s(text.trim().to_string()),
            ChainOp::TrimStart => s(text.trim_start().to_string()),
            ChainOp::TrimEnd => s(text.trim_end().to_string()),
            ChainOp::ToUpperCase => s(text.to_uppercase()),
            ChainOp::ToLowerCase => s(text.to_lowercase()),
            ChainOp::Identity | ChainOp::Is(_) | ChainOp::Includes(_) => s(text.to_string()),
            ChainOp::Length => Value::from(text.chars().count()),
            ChainOp::Slice { start, end } => {
                let len = text.chars().count();
                let from = relative_index(*start, len);
                let to = end.map_or(len, |e| relative_index(e, len));
                s(char_range(text, from, to))
            }
            ChainOp::Substring { start, end } => {
                let len = text.chars().count();
                let a = (*start).min(len);
                let b = end.map_or(len, |e| e.min(len));
                s(char_range(text, a.min(b), a.max(b)))
            }
            ChainOp::Substr { start, len: count } => {
                let len = text.chars().count();
                let from = relative_index(*start, len);
                let to = count.map_or(len, |c| from.saturating_add(c).min(len));
                s(char_range(text, from, to))
            }
            ChainOp::CharAt(i) => s(text.chars().nth(*i).map(String::from).unwrap_or_default()),
            ChainOp::Concat(parts) => s(std::iter::once(text).chain(parts.iter().map(String::as_str)).collect()),
            ChainOp::Replace { from, to } => s(text.replacen(from.as_str(), to, 1)),
            ChainOp::ReplaceAll { from, to } => s(text.replace(from.as_str(), to)),
            ChainOp::Repeat(n) => s(text.repeat(*n)),
            ChainOp::PadStart { len, fill } => s(format!("{}{}", padding(text, *len, fill), text)),
            ChainOp::PadEnd { len, fill } => s(format!("{}{}", text, padding(text, *len, fill))),
        }
    }
}

/// Map a possibly negative JS index onto `0..=len`.
fn relative_index(i: i64, len: usize) -> usize {
    if i < 0 {
        len.saturating_sub(i.unsigned_abs() as usize)
    } else {
        (i as usize).min(len)
    }
}

fn char_range(text: &str, from: usize, to: usize) -> String {
    if to <= from {
        return String::new();
    }
    text.chars().skip(from).take(to - from).collect()
}

fn padding(text: &str, target: usize, fill: &str) -> String {
    let have = text.chars().count();
    if fill.is_empty() || have >= target {
        return String::new();
    }
    fill.chars().cycle().take(target - have).collect()
}
