//! Response chaining templates for HTTP probes.
//!
//! Request URLs, header values and body strings may reference responses
//! earlier in the same cycle with `{{ responses.[0].data.token }}`.

use crate::types::ProbeResult;
use regex::{Captures, Regex};
use serde_json::{Map, Value, json};
use std::sync::OnceLock;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").unwrap_or_else(|e| panic!("invalid template regex: {e}"))
    })
}

/// Rendering context built from the responses collected so far in a cycle.
#[derive(Debug, Clone, Default)]
pub struct ResponseContext {
    responses: Vec<Value>,
}

impl ResponseContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a response; it becomes `responses.[len - 1]`.
    pub fn push(&mut self, result: &ProbeResult) {
        self.responses.push(json!({
            "status": result.status,
            "headers": result.headers,
            "data": result.body,
            "body": result.body,
            "size": result.size,
            "time": result.response_time_ms(),
        }));
    }

    /// Render every placeholder in `text`.
    ///
    /// Unknown references render as an empty string.
    pub fn render(&self, text: &str) -> String {
        placeholder()
            .replace_all(text, |caps: &Captures<'_>| {
                self.lookup(&caps[1]).map(stringify).unwrap_or_default()
            })
            .into_owned()
    }

    /// Render every string leaf of a JSON value.
    pub fn render_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.render(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.render_value(v)).collect()),
            Value::Object(map) => {
                let rendered: Map<String, Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), self.render_value(v)))
                    .collect();
                Value::Object(rendered)
            }
            other => other.clone(),
        }
    }

    fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = split_path(path).into_iter();
        if segments.next()?.as_str() != "responses" {
            return None;
        }
        let index: usize = segments.next()?.parse().ok()?;
        let mut current = self.responses.get(index)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(&segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

/// Split `responses.[0].data.items[1].name` into plain segments.
fn split_path(path: &str) -> Vec<String> {
    path.replace('[', ".")
        .replace(']', "")
        .split('.')
        .map(|s| s.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
