//! Built-in template function set
//!
//! String manipulation, time, environment access, and host lookup. The set
//! is fixed; user workflows cannot register functions.

use chrono::Utc;
use serde_json::Value;

use crate::error::{Result, SkeinError};

use super::Scope;

const FUNCTIONS: &[&str] = &[
    "upper",
    "lower",
    "trim",
    "contains",
    "hasPrefix",
    "hasSuffix",
    "split",
    "join",
    "replace",
    "default",
    "now",
    "date",
    "timestamp",
    "unixTimestamp",
    "env",
    "hostname",
];

pub fn is_function(name: &str) -> bool {
    FUNCTIONS.contains(&name)
}

/// Apply a function to already-evaluated arguments
pub fn apply(name: &str, args: &[Value], scope: &dyn Scope) -> Result<Value> {
    match name {
        "upper" => Ok(Value::String(text(name, args, 0)?.to_uppercase())),
        "lower" => Ok(Value::String(text(name, args, 0)?.to_lowercase())),
        "trim" => Ok(Value::String(text(name, args, 0)?.trim().to_string())),
        "contains" => Ok(Value::Bool(
            text(name, args, 0)?.contains(&text(name, args, 1)?),
        )),
        "hasPrefix" => Ok(Value::Bool(
            text(name, args, 0)?.starts_with(&text(name, args, 1)?),
        )),
        "hasSuffix" => Ok(Value::Bool(
            text(name, args, 0)?.ends_with(&text(name, args, 1)?),
        )),
        "split" => {
            let parts = text(name, args, 0)?
                .split(&text(name, args, 1)?)
                .map(|p| Value::String(p.to_string()))
                .collect();
            Ok(Value::Array(parts))
        }
        "join" => {
            // Piped form puts the array last: {{ .vars.list | join "," }}
            let (list, sep) = match (args.first(), args.get(1)) {
                (Some(Value::Array(items)), Some(sep)) => (items, coerce(sep)),
                (Some(sep), Some(Value::Array(items))) => (items, coerce(sep)),
                _ => {
                    return Err(arity(name, "an array and a separator"));
                }
            };
            let joined = list.iter().map(coerce).collect::<Vec<_>>().join(&sep);
            Ok(Value::String(joined))
        }
        "replace" => Ok(Value::String(text(name, args, 0)?.replace(
            &text(name, args, 1)?,
            &text(name, args, 2)?,
        ))),
        "default" => {
            // {{ .vars.x | default "fallback" }}: fallback first, value last
            let fallback = args.first().ok_or_else(|| arity(name, "a fallback value"))?;
            let value = args.get(1);
            match value {
                Some(Value::Null) | None => Ok(fallback.clone()),
                Some(Value::String(s)) if s.is_empty() => Ok(fallback.clone()),
                Some(v) => Ok(v.clone()),
            }
        }
        "now" => Ok(Value::String(Utc::now().to_rfc3339())),
        "date" => {
            let fmt = text(name, args, 0)?;
            Ok(Value::String(Utc::now().format(&fmt).to_string()))
        }
        "timestamp" => Ok(Value::String(
            Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        )),
        "unixTimestamp" => Ok(Value::Number(Utc::now().timestamp().into())),
        "env" => {
            let key = text(name, args, 0)?;
            let path = vec!["env".to_string(), key.clone()];
            match scope.resolve(&path) {
                Some(value) => Ok(value),
                None => match args.get(1) {
                    Some(default) => Ok(default.clone()),
                    None => Err(SkeinError::MissingKey {
                        path: format!(".env.{}", key),
                    }),
                },
            }
        }
        "hostname" => {
            let host = hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "localhost".to_string());
            Ok(Value::String(host))
        }
        other => Err(SkeinError::UnknownFunction {
            name: other.to_string(),
        }),
    }
}

/// Required string-ish argument at position `idx`
fn text(name: &str, args: &[Value], idx: usize) -> Result<String> {
    args.get(idx)
        .map(coerce)
        .ok_or_else(|| arity(name, "more arguments"))
}

fn coerce(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn arity(name: &str, expected: &str) -> SkeinError {
    SkeinError::Template {
        context: format!("function '{}'", name),
        reason: format!("expected {}", expected),
    }
}
