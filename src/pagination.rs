//! Page offsets for list methods.

use crate::{Error, Result};
use serde_json::{Map, Value};

/// Rows per page returned by Bitrix24 list methods.
pub const PAGE_SIZE: u64 = 50;

/// Request parameters: parameter names mapped to JSON values.
pub type Params = Map<String, Value>;

/// Returns `params` with the `start` offset set.
pub fn with_start(params: &Params, start: u64) -> Params {
    let mut params = params.clone();
    params.insert("start".to_string(), Value::from(start));
    params
}

/// Returns the offsets of every page that follows the first one.
///
/// Offsets run from `next` up to `total` (exclusive) in steps of `page_size`.
///
/// # Examples
///
/// ```
/// use bitrix24_client::pagination::{remaining_offsets, PAGE_SIZE};
///
/// assert_eq!(remaining_offsets(50, 120, PAGE_SIZE), vec![50, 100]);
/// assert!(remaining_offsets(50, 50, PAGE_SIZE).is_empty());
/// ```
pub fn remaining_offsets(next: u64, total: u64, page_size: u64) -> Vec<u64> {
    let step = usize::try_from(page_size.max(1)).unwrap_or(usize::MAX);
    (next..total).step_by(step).collect()
}

/// Validates a cursor returned while following pages one by one.
///
/// A cursor that does not move past the current offset would revisit a page.
pub(crate) fn advance_cursor(current: u64, next: u64, raw_response: &str) -> Result<u64> {
    if next <= current {
        return Err(Error::InvalidResponse {
            raw_response: raw_response.to_string(),
            reason: format!("pagination cursor {} does not advance past {}", next, current),
        });
    }
    Ok(next)
}
