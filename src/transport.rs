//! Outcome handling shared by the blocking and async executors.

use crate::{config::ClientConfig, response::Envelope, Error, Result};
use http::StatusCode;
use std::time::Duration;

/// Maps a `reqwest` failure onto the client's error kinds.
pub(crate) fn classify(error: reqwest::Error, url: &str) -> Error {
    if error.is_timeout() {
        tracing::warn!(url = %url, "Request timed out");
        Error::Timeout {
            url: url.to_string(),
        }
    } else if error.is_connect() {
        tracing::warn!(url = %url, error = %error, "Connection failed");
        Error::Connection {
            url: url.to_string(),
            source: error,
        }
    } else {
        tracing::warn!(url = %url, error = %error, "Request failed");
        Error::Request(error)
    }
}

/// Whether the status asks for a backoff-and-retry.
pub(crate) fn is_busy(status: StatusCode) -> bool {
    status == StatusCode::SERVICE_UNAVAILABLE
}

/// Turns a final (non-503) response into an envelope or an error.
pub(crate) fn finish(
    config: &ClientConfig,
    status: StatusCode,
    raw_body: String,
    attempts: usize,
    latency: Duration,
) -> Result<Envelope> {
    tracing::info!(
        status = status.as_u16(),
        latency_ms = latency.as_millis(),
        attempts = attempts,
        "Received Bitrix24 response"
    );

    if !status.is_success() {
        if status.is_client_error() {
            tracing::error!(
                status = status.as_u16(),
                response = %raw_body,
                "Client error (4xx)"
            );
        } else {
            tracing::warn!(
                status = status.as_u16(),
                response = %raw_body,
                "Server error"
            );
        }
        return Err(Error::HttpError {
            status,
            raw_response: raw_body,
        });
    }

    let body = config.validator().validate(&raw_body)?;
    Ok(Envelope {
        body,
        raw_body,
        status,
        attempts,
        latency,
    })
}
