//! Inbound job validation: structural checks plus field defaulting.

use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::error::RelayError;
use crate::models::request::JobRequest;

/// A payload that failed validation, keyed by whatever id could be recovered.
#[derive(Debug)]
pub struct Rejection {
    /// `None` when the id itself is missing or not a string; such events are dropped.
    pub id: Option<String>,
    pub error: RelayError,
}

/// Parse and validate a raw `request` payload.
pub fn parse_request(raw: &serde_json::Value) -> Result<JobRequest, Rejection> {
    let id = raw
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    let reject = |message: String| Rejection {
        id: id.clone(),
        error: RelayError::Validation(message),
    };

    let request: JobRequest =
        serde_json::from_value(raw.clone()).map_err(|e| reject(e.to_string()))?;
    request
        .validate()
        .map_err(|e| reject(describe(&e, "")))?;
    Ok(request)
}

/// Flatten nested validation errors into `path: message` pairs.
fn describe(errors: &ValidationErrors, prefix: &str) -> String {
    let mut parts = Vec::new();
    collect(errors, prefix, &mut parts);
    parts.sort();
    parts.join("; ")
}

fn collect(errors: &ValidationErrors, prefix: &str, out: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };
        match kind {
            ValidationErrorsKind::Field(errs) => {
                for err in errs {
                    let message = err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| err.code.to_string());
                    out.push(format!("{}: {}", path, message));
                }
            }
            ValidationErrorsKind::Struct(inner) => collect(inner, &path, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect(inner, &format!("{}[{}]", path, index), out);
                }
            }
        }
    }
}
