//! Replay of recorded chain operations over resolved values.
//!
//! [`replay`] folds the call stack over a single value; [`reduce`] handles
//! multi-choice results by way of the recorded [`ArrayOp`]. Once the running
//! value stops being text (a parsed object, `null`, or the number produced by
//! `length`), the remaining calls are skipped and the value passes through.

use crate::error::{Result, TagError};
use crate::ops::{ArrayOp, Branch, ChainOp};
use crate::parse::ParseFn;
use serde_json::Value;

/// Fold `calls` over `value`, left to right.
pub async fn replay(value: Value, calls: &[ChainOp]) -> Result<Value> {
    let mut current = value;
    for call in calls {
        let Value::String(text) = &current else {
            break;
        };
        current = match call {
            ChainOp::Is(branch) => {
                let test = branch.test.resolve().await?;
                pick(branch, test.as_str() == Some(text.as_str())).await?
            }
            ChainOp::Includes(branch) => {
                let test = branch.test.resolve().await?;
                let hit = test.as_str().is_some_and(|t| text.contains(t));
                pick(branch, hit).await?
            }
            op => op.apply(text),
        };
    }
    Ok(current)
}

async fn pick(branch: &Branch, hit: bool) -> Result<Value> {
    if hit {
        branch.then.resolve().await
    } else {
        branch.otherwise.resolve().await
    }
}

/// Reduce parsed choices with the recorded array operation.
///
/// `first` replays against choice 0 and re-applies `parse` to a text
/// result. `each` does the same for every choice, then stringifies (`null`
/// becomes empty) and joins with the delimiter.
pub async fn reduce(
    op: Option<&ArrayOp>,
    calls: &[ChainOp],
    values: Vec<Value>,
    parse: Option<&ParseFn>,
) -> Result<Value> {
    match op {
        Some(ArrayOp::First) => {
            let first = values.into_iter().next().unwrap_or(Value::Null);
            let replayed = replay(first, calls).await?;
            Ok(match parse {
                Some(p) => p.reapply(replayed),
                None => replayed,
            })
        }
        Some(ArrayOp::Each { delimiter }) => {
            let replayed =
                futures::future::try_join_all(values.into_iter().map(|v| replay(v, calls))).await?;
            let joined = replayed
                .into_iter()
                .map(|v| match parse {
                    Some(p) => p.reapply(v),
                    None => v,
                })
                .map(|v| stringify(&v))
                .collect::<Vec<_>>()
                .join(delimiter.as_deref().unwrap_or(""));
            Ok(Value::String(joined))
        }
        None => Err(TagError::UnsupportedArrayOp {
            method: "none".to_string(),
        }),
    }
}

/// Text form used when joining: strings raw, `null` empty, the rest as JSON.
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Operand;
    use serde_json::json;

    fn branch(test: &str, then: &str, otherwise: &str) -> Branch {
        Branch {
            test: test.into(),
            then: then.into(),
            otherwise: otherwise.into(),
        }
    }

    #[tokio::test]
    async fn test_is_branch() {
        let hit = replay(json!("jazz"), &[ChainOp::Is(branch("jazz", "A", "B"))]).await.unwrap();
        let miss = replay(json!("jazz"), &[ChainOp::Is(branch("rock", "A", "B"))]).await.unwrap();
        assert_eq!(hit, json!("A"));
        assert_eq!(miss, json!("B"));
    }

    #[tokio::test]
    async fn test_includes_branch() {
        let calls = |t: &str| vec![ChainOp::Includes(branch(t, "Y", "N"))];
        assert_eq!(replay(json!("hello world"), &calls("world")).await.unwrap(), json!("Y"));
        assert_eq!(replay(json!("hello world"), &calls("xyz")).await.unwrap(), json!("N"));
    }

    #[tokio::test]
    async fn test_fold_order() {
        let a = replay(json!("  abc  "), &[ChainOp::Trim, ChainOp::ToUpperCase]).await.unwrap();
        let b = replay(json!("  abc  "), &[ChainOp::ToUpperCase, ChainOp::Trim]).await.unwrap();
        assert_eq!(a, json!("ABC"));
        assert_eq!(b, json!("ABC"));

        let replace = ChainOp::Replace { from: "a".into(), to: "xyz".into() };
        let slice = ChainOp::Slice { start: 0, end: Some(2) };
        let r1 = replay(json!("abc"), &[replace.clone(), slice.clone()]).await.unwrap();
        let r2 = replay(json!("abc"), &[slice, replace]).await.unwrap();
        assert_eq!(r1, json!("xy"));
        assert_eq!(r2, json!("xyzb"));
    }

    #[tokio::test]
    async fn test_non_string_short_circuits() {
        let v = replay(json!("four"), &[ChainOp::Length, ChainOp::Trim, ChainOp::ToUpperCase])
            .await
            .unwrap();
        assert_eq!(v, json!(4));
        let null = replay(Value::Null, &[ChainOp::Trim]).await.unwrap();
        assert_eq!(null, Value::Null);
        let obj = replay(json!({"k": 1}), &[ChainOp::Trim]).await.unwrap();
        assert_eq!(obj, json!({"k": 1}));
    }

    #[tokio::test]
    async fn test_chain_continues_after_branch() {
        let calls = vec![
            ChainOp::Is(Branch {
                test: Operand::Text("x".into()),
                then: "yes".into(),
                otherwise: "no".into(),
            }),
            ChainOp::ToUpperCase,
        ];
        assert_eq!(replay(json!("x"), &calls).await.unwrap(), json!("YES"));
    }

    #[tokio::test]
    async fn test_reduce_first_and_each() {
        let values = vec![json!(" a "), json!(" b "), json!(" c ")];
        let first = reduce(Some(&ArrayOp::First), &[ChainOp::Trim], values.clone(), None)
            .await
            .unwrap();
        assert_eq!(first, json!("a"));

        let each = ArrayOp::Each { delimiter: Some("-".into()) };
        let joined = reduce(Some(&each), &[ChainOp::Trim], values, None).await.unwrap();
        assert_eq!(joined, json!("a-b-c"));
    }

    #[tokio::test]
    async fn test_first_reparses_text_result() {
        let upper = ParseFn::new(|raw| json!(raw.map(str::to_uppercase)));
        let values = vec![json!(" a "), json!(" b ")];
        let first = reduce(Some(&ArrayOp::First), &[ChainOp::Trim], values, Some(&upper))
            .await
            .unwrap();
        assert_eq!(first, json!("A"));

        let object = reduce(Some(&ArrayOp::First), &[], vec![json!({"k": 1})], Some(&upper))
            .await
            .unwrap();
        assert_eq!(object, json!({"k": 1}));
    }

    #[tokio::test]
    async fn test_each_stringifies_and_reparses() {
        let each = ArrayOp::Each { delimiter: None };
        let joined = reduce(Some(&each), &[], vec![json!(1), Value::Null, json!("x")], None)
            .await
            .unwrap();
        assert_eq!(joined, json!("1x"));

        let upper = ParseFn::new(|raw| json!(raw.unwrap_or("none").to_uppercase()));
        let joined = reduce(Some(&each), &[], vec![json!("a"), Value::Null], Some(&upper))
            .await
            .unwrap();
        assert_eq!(joined, json!("ANONE"));
    }

    #[tokio::test]
    async fn test_reduce_without_op_fails() {
        let err = reduce(None, &[], vec![json!("a")], None).await.unwrap_err();
        assert!(matches!(err, TagError::UnsupportedArrayOp { ref method } if method == "none"));
    }
}
