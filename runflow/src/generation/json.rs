//! Pulling JSON out of model output.

use crate::errors::GenerationError;
use serde::de::DeserializeOwned;

/// Strips Markdown fences and leading prose, returning the JSON payload.
///
/// Text without a recognisable array or object start is returned trimmed.
#[must_use]
pub fn extract_json_block(text: &str) -> &str {
    let mut body = text.trim();

    if let Some(rest) = body.strip_prefix("```") {
        // Drop the fence line, including any language tag.
        body = rest.split_once('\n').map_or("", |(_, tail)| tail);
        if let Some(idx) = body.rfind("```") {
            body = &body[..idx];
        }
        body = body.trim();
    }

    let start = [body.find('['), body.find('{')].into_iter().flatten().min();
    match start {
        Some(idx) if idx > 0 => &body[idx..],
        _ => body,
    }
}

/// Extracts and deserializes the JSON payload of `text`.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, GenerationError> {
    serde_json::from_str(extract_json_block(text)).map_err(|e| GenerationError::Parse(e.to_string()))
}
