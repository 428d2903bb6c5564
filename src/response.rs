//! Parsing and shaping of Bitrix24 response envelopes.
//!
//! A successful body looks like `{"result": ..., "next": 50, "total": 120}`;
//! a failed one like `{"error": "CODE", "error_description": "..."}`. The
//! [`ResponseValidator`] turns raw text into a JSON object and surfaces API
//! errors; the [`ResponseFormatter`] pulls out the result and the paging cursor.

use crate::{Error, Result};
use http::StatusCode;
use serde_json::{Map, Value};
use std::time::Duration;

/// Description used when an error envelope has no `error_description`.
pub const NO_DESCRIPTION: &str = "No description";

/// A validated response body together with transport details.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// The parsed JSON object.
    pub body: Map<String, Value>,

    /// The raw response body as received.
    pub raw_body: String,

    /// The HTTP status of the final attempt.
    pub status: StatusCode,

    /// Physical requests made for this envelope, including 503 retries.
    pub attempts: usize,

    /// Time from the first attempt until the body was read.
    pub latency: Duration,
}

impl Envelope {
    /// Returns `true` if the server answered 503 at least once before succeeding.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// The effective result: the `result` field, unwrapped one level if it
    /// was a mapping.
    pub result: Value,

    /// Offset of the following page, absent on the last page.
    pub next: Option<u64>,

    /// Total number of rows across all pages.
    pub total: Option<u64>,
}

impl Page {
    /// Converts the result into list items.
    ///
    /// Arrays yield their elements, `null` yields nothing, and any other value
    /// is a single item.
    pub fn into_items(self) -> Vec<Value> {
        match self.result {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        }
    }
}

/// Turns a raw response body into a JSON object.
///
/// Implementations must fail with [`Error::InvalidResponse`] for bodies that
/// cannot be parsed and with [`Error::Api`] for error envelopes.
pub trait ResponseValidator: Send + Sync {
    /// Validates `raw` and returns the parsed object.
    fn validate(&self, raw: &str) -> Result<Map<String, Value>>;
}

/// Extracts the result and paging metadata from a validated body.
pub trait ResponseFormatter: Send + Sync {
    /// Formats `body`. When `paginated` is `false`, `next` and `total` are
    /// always `None`.
    fn format(&self, body: &Map<String, Value>, paginated: bool) -> Result<Page>;
}

/// The stock validator.
///
/// # Examples
///
/// ```
/// use bitrix24_client::{Error, response::{DefaultValidator, ResponseValidator}};
///
/// let body = DefaultValidator.validate(r#"{"result": [1, 2]}"#).unwrap();
/// assert!(body.contains_key("result"));
///
/// let err = DefaultValidator
///     .validate(r#"{"error": "NOT_FOUND", "result": []}"#)
///     .unwrap_err();
/// assert_eq!(err.api_code(), Some("NOT_FOUND"));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultValidator;

impl ResponseValidator for DefaultValidator {
    fn validate(&self, raw: &str) -> Result<Map<String, Value>> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    raw_response = %raw,
                    "Invalid JSON from Bitrix24"
                );
                return Err(Error::InvalidResponse {
                    raw_response: raw.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let Value::Object(body) = value else {
            return Err(Error::InvalidResponse {
                raw_response: raw.to_string(),
                reason: "expected a JSON object".to_string(),
            });
        };

        // An error envelope wins over any partial result it carries.
        if let Some(code) = body.get("error") {
            let code = match code {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let description = body
                .get("error_description")
                .and_then(Value::as_str)
                .filter(|d| !d.is_empty())
                .unwrap_or(NO_DESCRIPTION)
                .to_string();

            tracing::error!(code = %code, description = %description, "Bitrix24 API error");
            return Err(Error::Api { code, description });
        }

        Ok(body)
    }
}

/// The stock formatter.
///
/// A mapping `result` is unwrapped to the value of its first key, which is how
/// list methods such as `crm.item.list` nest rows under a named field.
///
/// # Examples
///
/// ```
/// use bitrix24_client::response::{DefaultFormatter, ResponseFormatter};
/// use serde_json::json;
///
/// let body = json!({"result": {"items": [1, 2, 3]}, "next": 50, "total": 120});
/// let page = DefaultFormatter
///     .format(body.as_object().unwrap(), true)
///     .unwrap();
/// assert_eq!(page.result, json!([1, 2, 3]));
/// assert_eq!(page.next, Some(50));
/// assert_eq!(page.total, Some(120));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFormatter;

impl ResponseFormatter for DefaultFormatter {
    fn format(&self, body: &Map<String, Value>, paginated: bool) -> Result<Page> {
        let result = match body.get("result") {
            None => Value::Array(Vec::new()),
            Some(Value::Object(nested)) => nested
                .values()
                .next()
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new())),
            Some(other) => other.clone(),
        };

        if !paginated {
            return Ok(Page {
                result,
                next: None,
                total: None,
            });
        }

        Ok(Page {
            result,
            next: body.get("next").and_then(as_offset),
            total: body.get("total").and_then(as_offset),
        })
    }
}

/// Reads a cursor or count that may arrive as a number or a numeric string.
fn as_offset(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
