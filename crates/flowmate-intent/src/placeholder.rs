//! `{{key}}` placeholder resolution.
//!
//! Step parameters are text templates resolved against the execution
//! context right before a step is dispatched.  The policy for a placeholder
//! whose key is absent from the context is fixed: it resolves to the empty
//! string, never to an error.  The engine then decides whether a blank
//! required parameter blocks the step.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::template::Context;

/// Matches `{{ key }}`; keys may contain letters, digits, `_`, `-` and `.`.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid")
});

/// Substitute every `{{key}}` in `text` with the context value for `key`.
///
/// Strings are inserted verbatim, `null` and missing keys become `""`, and
/// any other JSON value is inserted in its compact JSON form.
pub fn resolve_template(text: &str, context: &Context) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| {
            context.get(&caps[1]).map(render_value).unwrap_or_default()
        })
        .into_owned()
}

/// Render a context value as placeholder text.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
