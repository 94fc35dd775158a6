//! `{{ var }}` rendering over cached arguments
//!
//! Strings are substituted verbatim, other values render as JSON. Unknown
//! variables are an error so typos fail loudly instead of producing empty
//! expansions.

use serde_json::{Map, Value};

use crate::error::ComponentError;

/// Render `content`, substituting every `{{ name }}` from `values`.
pub fn render(content: &str, values: &Map<String, Value>) -> Result<String, ComponentError> {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(ComponentError::Blueprint(
                "unterminated '{{' in template".to_string(),
            ));
        };
        let name = after[..end].trim();
        if name.is_empty() {
            return Err(ComponentError::Blueprint("empty variable name".to_string()));
        }
        let value = values.get(name).ok_or_else(|| {
            ComponentError::Blueprint(format!("undefined variable: {}", name))
        })?;
        match value {
            Value::String(s) => out.push_str(s),
            other => out.push_str(&other.to_string()),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Substitute the variables that are present, preserving unknown
/// placeholders verbatim.
///
/// The compiler uses this for submission-time variables: anything it does
/// not know is left for the client, which renders strictly against its
/// cache at execution time.
pub fn render_partial(content: &str, values: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            // Unterminated: pass through untouched for the client to reject
            out.push_str(&rest[start..]);
            return out;
        };
        let raw = &rest[start..start + 2 + end + 2];
        let name = after[..end].trim();
        match values.get(name) {
            Some(Value::String(s)) => out.push_str(s),
            Some(other) => out.push_str(&other.to_string()),
            None => out.push_str(raw),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Render every string value inside a JSON tree in place.
pub fn render_value(value: &mut Value, values: &Map<String, Value>) -> Result<(), ComponentError> {
    match value {
        Value::String(s) => {
            if s.contains("{{") {
                *s = render(s, values)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                render_value(item, values)?;
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                render_value(item, values)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// `render_partial` over every string value inside a JSON tree.
pub fn render_value_partial(value: &mut Value, values: &Map<String, Value>) {
    match value {
        Value::String(s) => {
            if s.contains("{{") {
                *s = render_partial(s, values);
            }
        }
        Value::Array(items) => {
            for item in items {
                render_value_partial(item, values);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                render_value_partial(item, values);
            }
        }
        _ => {}
    }
}
