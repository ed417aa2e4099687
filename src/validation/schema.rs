//! Advisory validation of JSON-mode output against a caller schema.

use serde_json::Value;

/// One problem found in generated output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// JSON pointer into the output; empty for document-level problems.
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Strip a surrounding Markdown code fence (```json ... ``` or ``` ... ```)
/// from model output. Text without a fence is returned trimmed.
pub fn extract_json_payload(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", ...) on the opening line.
    match body.split_once('\n') {
        Some((info, content)) if is_info_string(info) => content.trim(),
        _ => body.trim(),
    }
}

fn is_info_string(line: &str) -> bool {
    line.trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Check `text` against `schema`.
///
/// Returns every violation found; an empty list means the output conforms
/// (or structural validation is not compiled in). Output that is not JSON
/// at all is always reported.
pub fn validate_output(text: &str, schema: &Value) -> Vec<ValidationError> {
    let payload = extract_json_payload(text);
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            return vec![ValidationError {
                path: String::new(),
                message: format!("output is not valid JSON: {e}"),
            }];
        }
    };

    validate_value(&value, schema)
}

#[cfg(feature = "response-validation")]
fn validate_value(value: &Value, schema: &Value) -> Vec<ValidationError> {
    match jsonschema::validator_for(schema) {
        Ok(validator) => validator
            .iter_errors(value)
            .map(|e| ValidationError {
                path: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "Caller-supplied JSON schema does not compile; skipping validation");
            Vec::new()
        }
    }
}

#[cfg(not(feature = "response-validation"))]
fn validate_value(value: &Value, schema: &Value) -> Vec<ValidationError> {
    let _ = (value, schema);
    tracing::debug!("Schema validation skipped: 'response-validation' feature not compiled");
    Vec::new()
}
