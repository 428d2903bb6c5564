//! Chunking and result merging for the `batch` method.
//!
//! Bitrix24 runs at most 50 commands per `batch` call. Larger command sets are
//! split with [`chunk_commands`], sent one call per chunk, and the per-chunk
//! answers are folded into a single [`BatchResult`].

use crate::pagination::Params;
use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Maximum number of commands Bitrix24 accepts in one `batch` call.
pub const DEFAULT_BATCH_CHUNK_SIZE: usize = 50;

/// Name of the remote batch method.
pub const BATCH_METHOD: &str = "batch";

/// Splits batch commands into ordered chunks of at most `chunk_size` entries.
///
/// Key order is preserved within and across chunks.
///
/// # Errors
///
/// Returns [`Error::ConfigurationError`] if `chunk_size` is zero.
///
/// # Examples
///
/// ```
/// use bitrix24_client::batch::chunk_commands;
/// use bitrix24_client::pagination::Params;
/// use serde_json::Value;
///
/// let commands: Params = (0..120)
///     .map(|i| (format!("lead_{i}"), Value::from(format!("crm.lead.get?id={i}"))))
///     .collect();
///
/// let chunks = chunk_commands(&commands, 50).unwrap();
/// let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
/// assert_eq!(sizes, vec![50, 50, 20]);
/// ```
pub fn chunk_commands(commands: &Params, chunk_size: usize) -> Result<Vec<Params>> {
    if chunk_size == 0 {
        return Err(Error::ConfigurationError(
            "Batch chunk size must be greater than 0".to_string(),
        ));
    }

    let mut chunks = Vec::with_capacity(commands.len().div_ceil(chunk_size));
    let mut current = Params::new();
    for (key, command) in commands {
        current.insert(key.clone(), command.clone());
        if current.len() == chunk_size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    Ok(chunks)
}

/// Builds the body of one `batch` call.
pub(crate) fn batch_params(chunk: Params, halt: bool) -> Params {
    let mut params = Params::new();
    params.insert("halt".to_string(), Value::from(u8::from(halt)));
    params.insert("cmd".to_string(), Value::Object(chunk));
    params
}

/// Per-command outcomes of one or more `batch` calls, keyed by command key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Results of the commands that succeeded.
    #[serde(default, deserialize_with = "lenient_map")]
    pub result: Params,

    /// Errors of the commands that failed.
    #[serde(default, deserialize_with = "lenient_map")]
    pub result_error: Params,

    /// `total` reported by list commands.
    #[serde(default, deserialize_with = "lenient_map")]
    pub result_total: Params,

    /// `next` reported by list commands.
    #[serde(default, deserialize_with = "lenient_map")]
    pub result_next: Params,

    /// Server-side timings per command.
    #[serde(default, deserialize_with = "lenient_map")]
    pub result_time: Params,
}

impl BatchResult {
    /// Reads the `result` field of a validated `batch` response body.
    pub(crate) fn from_body(body: &Params, raw_response: &str) -> Result<Self> {
        match body.get("result") {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(result) => {
                serde_json::from_value(result.clone()).map_err(|e| Error::InvalidResponse {
                    raw_response: raw_response.to_string(),
                    reason: format!("unexpected batch result shape: {}", e),
                })
            }
        }
    }

    /// Appends another chunk's outcomes after this one's.
    pub fn merge(&mut self, other: BatchResult) {
        self.result.extend(other.result);
        self.result_error.extend(other.result_error);
        self.result_total.extend(other.result_total);
        self.result_next.extend(other.result_next);
        self.result_time.extend(other.result_time);
    }

    /// Returns `true` if any command failed.
    pub fn has_errors(&self) -> bool {
        !self.result_error.is_empty()
    }
}

/// Bitrix24 encodes empty maps as `[]` and numerically keyed maps as lists.
fn lenient_map<'de, D>(deserializer: D) -> std::result::Result<Params, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Object(map) => Ok(map),
        Value::Array(items) => Ok(items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect()),
        Value::Null => Ok(Params::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected an object or array, got {}",
            other
        ))),
    }
}
