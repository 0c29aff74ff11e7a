//! Template evaluation
//!
//! Templates are `{{ ... }}` expressions embedded in strings. An expression
//! is an accessor path, a literal, or a function call, optionally chained
//! through `|` pipelines:
//!
//! ```yaml
//! command: "deploy --region {{ .vars.region }} --host {{ hostname }}"
//! message: "{{ .tasks.build.stdout | trim | upper }}"
//! path:    "/var/backups/{{ date \"%Y-%m-%d\" }}.tar.gz"
//! ```
//!
//! Accessor roots: `.env`, `.vars`, `.tasks`, `.workflow`, `.metadata`
//! (`.environment` and `.variables` are aliases). Lookups are fail-closed:
//! a missing key is an error, not an empty string. Strings without any
//! `{{` / `}}` delimiter pass through untouched.
//!
//! Evaluation is pure: output depends only on the scope at call time.

mod funcs;

use serde_json::Value;

use crate::error::{Result, SkeinError};

/// Read-only view of the evaluation state
///
/// Implemented by the context store; tests provide lightweight fakes.
pub trait Scope: Send + Sync {
    /// Resolve an accessor path (`["vars", "region"]`) to a value
    fn resolve(&self, path: &[String]) -> Option<Value>;
}

/// Token of a parsed template string
#[derive(Debug)]
enum Token<'a> {
    /// Literal text, passed through verbatim
    Literal(&'a str),
    /// Inner text of a `{{ ... }}` expression
    Expr(&'a str),
}

/// Split a template into literal and expression tokens (single pass)
fn tokenize(template: &str) -> Result<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            tokens.push(Token::Literal(&rest[..start]));
        }
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or(SkeinError::TemplateParse {
            position: offset + start,
            detail: "unclosed '{{' delimiter".to_string(),
        })?;
        tokens.push(Token::Expr(after[..end].trim()));
        offset += start + 2 + end + 2;
        rest = &after[end + 2..];
    }
    if !rest.is_empty() {
        tokens.push(Token::Literal(rest));
    }
    Ok(tokens)
}

/// Render a template string against the scope
///
/// Returns the input unchanged when it carries no template delimiters.
pub fn evaluate(template: &str, scope: &dyn Scope) -> Result<String> {
    if !template.contains("{{") && !template.contains("}}") {
        return Ok(template.to_string());
    }

    let tokens = tokenize(template)?;
    let mut out = String::with_capacity(template.len());
    for token in tokens {
        match token {
            Token::Literal(text) => out.push_str(text),
            Token::Expr(expr) => {
                let value = eval_expression(expr, scope)?;
                out.push_str(&render(&value));
            }
        }
    }
    Ok(out)
}

/// Recursively render every string leaf of a dynamic value
///
/// Mappings and sequences are walked; non-string leaves pass through
/// unchanged. This is what the scheduler applies to a task's config map
/// immediately before dispatch.
pub fn evaluate_value(value: &Value, scope: &dyn Scope) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(evaluate(s, scope)?)),
        Value::Array(items) => items
            .iter()
            .map(|item| evaluate_value(item, scope))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), evaluate_value(v, scope)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Truthiness of a rendered `when` expression
///
/// Empty, "false", "0" and "no" (case-insensitive) are falsy.
pub fn is_truthy(rendered: &str) -> bool {
    !matches!(
        rendered.trim().to_ascii_lowercase().as_str(),
        "" | "false" | "0" | "no"
    )
}

/// Coerce a value into template output text
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Evaluate one expression: pipeline stages separated by `|`
fn eval_expression(expr: &str, scope: &dyn Scope) -> Result<Value> {
    let stages = split_pipeline(expr);
    if stages.is_empty() {
        return Err(SkeinError::TemplateParse {
            position: 0,
            detail: "empty expression".to_string(),
        });
    }

    let mut piped: Option<Value> = None;
    for stage in stages {
        piped = Some(eval_stage(stage.trim(), piped, scope)?);
    }
    Ok(piped.unwrap_or(Value::Null))
}

/// Evaluate one pipeline stage with an optional piped-in value
fn eval_stage(stage: &str, piped: Option<Value>, scope: &dyn Scope) -> Result<Value> {
    let words = split_words(stage)?;
    let Some((head, tail)) = words.split_first() else {
        return Err(SkeinError::TemplateParse {
            position: 0,
            detail: "empty pipeline stage".to_string(),
        });
    };

    // A lone atom (accessor or literal) is its own value; anything else is a
    // function call with the piped value appended as the final argument.
    if tail.is_empty() && piped.is_none() && !funcs::is_function(head) {
        return eval_atom(head, scope);
    }

    if !funcs::is_function(head) {
        return Err(SkeinError::UnknownFunction {
            name: head.to_string(),
        });
    }

    let mut args = tail
        .iter()
        .map(|w| eval_atom(w, scope))
        .collect::<Result<Vec<_>>>()?;
    if let Some(value) = piped {
        args.push(value);
    }
    funcs::apply(head, &args, scope)
}

/// Evaluate an atom: accessor path, quoted string, number, or bool
fn eval_atom(word: &str, scope: &dyn Scope) -> Result<Value> {
    if let Some(stripped) = word.strip_prefix('.') {
        let path: Vec<String> = stripped.split('.').map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return Err(SkeinError::TemplateParse {
                position: 0,
                detail: format!("malformed accessor '{}'", word),
            });
        }
        let path = normalize_root(path);
        return scope.resolve(&path).ok_or(SkeinError::MissingKey {
            path: format!(".{}", path.join(".")),
        });
    }
    if let Some(inner) = word.strip_prefix('"').and_then(|w| w.strip_suffix('"')) {
        return Ok(Value::String(unescape(inner)));
    }
    if word == "true" {
        return Ok(Value::Bool(true));
    }
    if word == "false" {
        return Ok(Value::Bool(false));
    }
    if let Ok(n) = word.parse::<i64>() {
        return Ok(Value::Number(n.into()));
    }
    if let Ok(f) = word.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Ok(Value::Number(n));
        }
    }
    Err(SkeinError::TemplateParse {
        position: 0,
        detail: format!("unrecognized token '{}'", word),
    })
}

/// Map the documented accessor aliases onto their canonical roots
fn normalize_root(mut path: Vec<String>) -> Vec<String> {
    if let Some(head) = path.first_mut() {
        match head.as_str() {
            "environment" => *head = "env".to_string(),
            "variables" => *head = "vars".to_string(),
            _ => {}
        }
    }
    path
}

/// Split an expression on top-level `|`, honoring double quotes
fn split_pipeline(expr: &str) -> Vec<&str> {
    let mut stages = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, ch) in expr.char_indices() {
        match ch {
            '\\' if in_quotes && !escaped => escaped = true,
            '"' if !escaped => in_quotes = !in_quotes,
            '|' if !in_quotes => {
                stages.push(&expr[start..i]);
                start = i + 1;
                escaped = false;
            }
            _ => escaped = false,
        }
    }
    stages.push(&expr[start..]);
    stages
}

/// Split a stage into whitespace-separated words, keeping quoted strings
/// (with their quotes) as single words
fn split_words(stage: &str) -> Result<Vec<&str>> {
    let mut words = Vec::new();
    let bytes = stage.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        let start = i;
        if bytes[i] == b'"' {
            i += 1;
            let mut escaped = false;
            loop {
                if i >= bytes.len() {
                    return Err(SkeinError::TemplateParse {
                        position: start,
                        detail: "unterminated string literal".to_string(),
                    });
                }
                match bytes[i] {
                    b'\\' if !escaped => escaped = true,
                    b'"' if !escaped => break,
                    _ => escaped = false,
                }
                i += 1;
            }
            i += 1;
        } else {
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                i += 1;
            }
        }
        words.push(&stage[start..i]);
    }
    Ok(words)
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Minimal scope over a JSON object, for unit tests
    pub struct MapScope(pub Value);

    impl Scope for MapScope {
        fn resolve(&self, path: &[String]) -> Option<Value> {
            let mut current = &self.0;
            for segment in path {
                current = match current {
                    Value::Object(map) => map.get(segment)?,
                    Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                    _ => return None,
                };
            }
            Some(current.clone())
        }
    }

    fn scope() -> MapScope {
        MapScope(json!({
            "env": {"HOME": "/home/ci", "REGION": "eu-west-1"},
            "vars": {
                "app": "skein",
                "replicas": 3,
                "hosts": ["alpha", "beta"],
                "nested": {"deep": "value"}
            },
            "tasks": {
                "build": {"status": "success", "stdout": "  done  ", "output": {"artifact": "app.tar.gz"}}
            },
            "workflow": {"name": "demo", "task_count": 4},
            "metadata": {"run_id": "r-1"}
        }))
    }

    #[test]
    fn passthrough_without_delimiters() {
        let s = "no templates here, just text with $ and } and {";
        assert_eq!(evaluate(s, &scope()).unwrap(), s);
    }

    #[test]
    fn simple_accessors() {
        let sc = scope();
        assert_eq!(evaluate("{{ .vars.app }}", &sc).unwrap(), "skein");
        assert_eq!(evaluate("{{ .env.HOME }}", &sc).unwrap(), "/home/ci");
        assert_eq!(evaluate("{{ .vars.replicas }}", &sc).unwrap(), "3");
        assert_eq!(evaluate("{{ .vars.nested.deep }}", &sc).unwrap(), "value");
        assert_eq!(evaluate("{{ .workflow.name }}", &sc).unwrap(), "demo");
        assert_eq!(evaluate("{{ .metadata.run_id }}", &sc).unwrap(), "r-1");
    }

    #[test]
    fn accessor_aliases() {
        let sc = scope();
        assert_eq!(evaluate("{{ .environment.HOME }}", &sc).unwrap(), "/home/ci");
        assert_eq!(evaluate("{{ .variables.app }}", &sc).unwrap(), "skein");
    }

    #[test]
    fn task_result_fields() {
        let sc = scope();
        assert_eq!(evaluate("{{ .tasks.build.status }}", &sc).unwrap(), "success");
        assert_eq!(
            evaluate("{{ .tasks.build.output.artifact }}", &sc).unwrap(),
            "app.tar.gz"
        );
    }

    #[test]
    fn missing_key_is_an_error() {
        let err = evaluate("{{ .vars.does_not_exist }}", &scope()).unwrap_err();
        assert!(matches!(err, SkeinError::MissingKey { .. }));
        assert!(err.to_string().contains(".vars.does_not_exist"));
    }

    #[test]
    fn mixed_literals_and_expressions() {
        let out = evaluate("deploy {{ .vars.app }} to {{ .env.REGION }}!", &scope()).unwrap();
        assert_eq!(out, "deploy skein to eu-west-1!");
    }

    #[test]
    fn unclosed_delimiter_is_an_error() {
        let err = evaluate("broken {{ .vars.app", &scope()).unwrap_err();
        assert!(matches!(err, SkeinError::TemplateParse { .. }));
    }

    #[test]
    fn string_functions() {
        let sc = scope();
        assert_eq!(evaluate("{{ upper .vars.app }}", &sc).unwrap(), "SKEIN");
        assert_eq!(evaluate("{{ lower \"LOUD\" }}", &sc).unwrap(), "loud");
        assert_eq!(evaluate("{{ trim .tasks.build.stdout }}", &sc).unwrap(), "done");
        assert_eq!(
            evaluate("{{ contains .vars.app \"ke\" }}", &sc).unwrap(),
            "true"
        );
        assert_eq!(
            evaluate("{{ hasPrefix .vars.app \"sk\" }}", &sc).unwrap(),
            "true"
        );
        assert_eq!(
            evaluate("{{ hasSuffix .vars.app \"ein\" }}", &sc).unwrap(),
            "true"
        );
        assert_eq!(
            evaluate("{{ replace .vars.app \"ei\" \"ei-\" }}", &sc).unwrap(),
            "skei-n"
        );
    }

    #[test]
    fn split_and_join() {
        let sc = scope();
        assert_eq!(
            evaluate("{{ join .vars.hosts \",\" }}", &sc).unwrap(),
            "alpha,beta"
        );
        assert_eq!(
            evaluate("{{ split \"a:b:c\" \":\" | join \"-\" }}", &sc).unwrap(),
            "a-b-c"
        );
    }

    #[test]
    fn pipelines_feed_the_last_argument() {
        let out = evaluate("{{ .tasks.build.stdout | trim | upper }}", &scope()).unwrap();
        assert_eq!(out, "DONE");
    }

    #[test]
    fn env_function_with_default() {
        let sc = scope();
        assert_eq!(evaluate("{{ env \"HOME\" }}", &sc).unwrap(), "/home/ci");
        assert_eq!(
            evaluate("{{ env \"MISSING\" \"fallback\" }}", &sc).unwrap(),
            "fallback"
        );
        assert!(matches!(
            evaluate("{{ env \"MISSING\" }}", &sc).unwrap_err(),
            SkeinError::MissingKey { .. }
        ));
    }

    #[test]
    fn time_functions_produce_output() {
        let sc = scope();
        assert!(!evaluate("{{ now }}", &sc).unwrap().is_empty());
        let year = evaluate("{{ date \"%Y\" }}", &sc).unwrap();
        assert_eq!(year.len(), 4);
        let unix = evaluate("{{ unixTimestamp }}", &sc).unwrap();
        assert!(unix.parse::<i64>().unwrap() > 1_600_000_000);
    }

    #[test]
    fn hostname_produces_output() {
        assert!(!evaluate("{{ hostname }}", &scope()).unwrap().is_empty());
    }

    #[test]
    fn unknown_function_is_an_error() {
        let err = evaluate("{{ frobnicate .vars.app }}", &scope()).unwrap_err();
        assert!(matches!(err, SkeinError::UnknownFunction { .. }));
    }

    #[test]
    fn evaluate_value_walks_nested_structures() {
        let sc = scope();
        let input = json!({
            "cmd": "run {{ .vars.app }}",
            "count": 3,
            "flags": ["--region={{ .env.REGION }}", true],
            "inner": {"msg": "{{ upper .vars.app }}"}
        });
        let out = evaluate_value(&input, &sc).unwrap();
        assert_eq!(out["cmd"], "run skein");
        assert_eq!(out["count"], 3);
        assert_eq!(out["flags"][0], "--region=eu-west-1");
        assert_eq!(out["flags"][1], true);
        assert_eq!(out["inner"]["msg"], "SKEIN");
    }

    #[test]
    fn truthiness() {
        assert!(is_truthy("true"));
        assert!(is_truthy("yes"));
        assert!(is_truthy("anything"));
        assert!(!is_truthy(""));
        assert!(!is_truthy("  "));
        assert!(!is_truthy("false"));
        assert!(!is_truthy("FALSE"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("no"));
    }

    #[test]
    fn default_function_rescues_empty_values() {
        let sc = MapScope(json!({"vars": {"empty": "", "set": "value"}}));
        assert_eq!(
            evaluate("{{ .vars.empty | default \"fallback\" }}", &sc).unwrap(),
            "fallback"
        );
        assert_eq!(
            evaluate("{{ .vars.set | default \"fallback\" }}", &sc).unwrap(),
            "value"
        );
    }
}
