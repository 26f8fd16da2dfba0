//! Tolerant JSON extraction from free-form model output.

use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Pull the first JSON object out of a model reply.
///
/// Fenced blocks tagged `json` are tried first, then any other fenced block
/// that contains a `{`; a fence holding only a shell snippet or prose is
/// skipped. When no fence yields an object, the span from the first `{` to
/// the last `}` of the whole reply is parsed. Anything that is not a JSON
/// object is an error.
pub fn extract_json_object(text: &str) -> Result<Map<String, Value>, ValidationError> {
    let (tagged, untagged): (Vec<_>, Vec<_>) = fenced_blocks(text)
        .filter(|(_, body)| body.contains('{'))
        .partition(|(info, _)| info.eq_ignore_ascii_case("json"));

    for (_, body) in tagged.into_iter().chain(untagged) {
        if let Ok(map) = parse_object(body) {
            return Ok(map);
        }
    }
    parse_object(text)
}

fn parse_object(candidate: &str) -> Result<Map<String, Value>, ValidationError> {
    let start = candidate.find('{');
    let end = candidate.rfind('}');
    let body = match (start, end) {
        (Some(s), Some(e)) if s < e => &candidate[s..=e],
        _ => {
            return Err(ValidationError::MalformedJson {
                message: "no JSON object found in model output".to_string(),
            });
        }
    };

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ValidationError::MalformedJson {
            message: format!("expected a JSON object, got {}", type_name(&other)),
        }),
        Err(e) => Err(ValidationError::MalformedJson {
            message: e.to_string(),
        }),
    }
}

/// `(info string, body)` of every closed fenced block, in order.
fn fenced_blocks(text: &str) -> impl Iterator<Item = (&str, &str)> {
    let mut rest = text;
    std::iter::from_fn(move || {
        let open = rest.find("```")?;
        let after_fence = &rest[open + 3..];
        let info_end = after_fence.find('\n').unwrap_or(after_fence.len());
        let info = after_fence[..info_end].trim();
        let body = after_fence.get(info_end + 1..).unwrap_or("");
        let close = body.find("```")?;
        rest = &body[close + 3..];
        Some((info, body[..close].trim()))
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
