//! # Input Security
//!
//! Pattern heuristics applied to user-supplied JSON before it reaches the
//! store. They complement parameterized queries and output encoding; they do
//! not parse SQL or HTML.

use crate::error::{FieldError, MarketError, MarketResult};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

static SQL_INJECTION: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // tautologies: ' OR '1'='1, " and 1=1
        r#"(?i)['"]\s*(or|and)\s+['"]?\w+['"]?\s*=\s*['"]?\w+"#,
        r"(?i)\bunion\s+(all\s+)?select\b",
        r"(?i);\s*(drop|delete|insert|update|alter|create|truncate|exec)\b",
        // quote followed by a comment terminator
        r#"(?i)['"]\s*(--|#|/\*)"#,
        r"(?i)\b(xp_cmdshell|information_schema|pg_sleep|sleep\s*\(|benchmark\s*\()",
        r"(?i)\bdrop\s+(table|database)\b",
    ]
    .into_iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static XSS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)<\s*/?\s*(script|iframe|object|embed|applet|meta|base|link|style)\b",
        r"(?i)(javascript|vbscript)\s*:",
        r"(?i)data\s*:\s*text/html",
        r"(?i)<[^>]*\bon[a-z]+\s*=",
        r"(?i)\bexpression\s*\(",
        r"(?i)\bsrcdoc\s*=",
    ]
    .into_iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static SCRIPT_BLOCK: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?is)<\s*(script|style)\b[^>]*>.*?<\s*/\s*(script|style)\s*>").ok()
});

static TAG: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"<\s*(/?)\s*([a-zA-Z][a-zA-Z0-9]*)\b[^>]*>").ok());

/// Tags that survive [`strip_tags`]
pub const ALLOWED_TAGS: &[&str] = &["b", "i", "em", "strong", "p", "br", "ul", "ol", "li"];

pub fn contains_sql_injection(input: &str) -> bool {
    SQL_INJECTION.iter().any(|re| re.is_match(input))
}

pub fn contains_xss(input: &str) -> bool {
    XSS.iter().any(|re| re.is_match(input))
}

pub fn is_allowed_field(name: &str, allowed: &[&str]) -> bool {
    allowed.contains(&name)
}

/// Escape the characters that are significant in HTML text and attributes
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Remove every tag outside [`ALLOWED_TAGS`]; kept tags lose their attributes.
/// Script and style blocks are dropped along with their contents.
pub fn strip_tags(input: &str) -> String {
    let without_blocks = match SCRIPT_BLOCK.as_ref() {
        Some(re) => re.replace_all(input, ""),
        None => input.into(),
    };
    let Some(tag) = TAG.as_ref() else {
        return without_blocks.into_owned();
    };

    tag.replace_all(&without_blocks, |caps: &regex::Captures<'_>| {
        let closing = &caps[1];
        let name = caps[2].to_ascii_lowercase();
        if ALLOWED_TAGS.contains(&name.as_str()) {
            format!("<{closing}{name}>")
        } else {
            String::new()
        }
    })
    .into_owned()
}

/// Check a JSON object against an allow-list of top-level fields and the
/// injection heuristics, returning a copy with every string HTML-escaped.
///
/// All problems are reported together as one `Validation` error.
pub fn validate_and_sanitize_input(input: &Value, allowed_fields: &[&str]) -> MarketResult<Value> {
    let object = input
        .as_object()
        .ok_or_else(|| MarketError::InvalidRequest("expected a JSON object".to_string()))?;

    let mut problems = Vec::new();
    let mut sanitized = Map::with_capacity(object.len());

    for (key, value) in object {
        if !is_allowed_field(key, allowed_fields) {
            problems.push(FieldError::new(key.clone(), "field is not allowed"));
            continue;
        }
        sanitized.insert(key.clone(), sanitize_value(key, value, &mut problems));
    }

    if problems.is_empty() {
        Ok(Value::Object(sanitized))
    } else {
        Err(MarketError::Validation(problems))
    }
}

fn sanitize_value(path: &str, value: &Value, problems: &mut Vec<FieldError>) -> Value {
    match value {
        Value::String(s) => {
            if contains_sql_injection(s) {
                problems.push(FieldError::new(path, "contains a disallowed SQL pattern"));
            } else if contains_xss(s) {
                problems.push(FieldError::new(path, "contains disallowed markup"));
            }
            Value::String(escape_html(s))
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, v)| sanitize_value(&format!("{path}[{i}]"), v, problems))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_value(&format!("{path}.{k}"), v, problems)))
                .collect(),
        ),
        other => other.clone(),
    }
}
