//! Error types for Bitrix24 REST calls.
//!
//! Every failure a logical call can produce is a variant of [`Error`]. Variants
//! keep the data needed to debug the failure: status codes, raw bodies, the
//! API error code and description, or the number of attempts made.

use http::StatusCode;

/// The main error type for Bitrix24 API calls.
///
/// # Examples
///
/// ```no_run
/// use bitrix24_client::{Client, ClientConfig, Error};
///
/// # async fn example() -> Result<(), Error> {
/// let config = ClientConfig::builder()
///     .base_url("https://example.bitrix24.ru")?
///     .credential("webhook-key")
///     .build()?;
/// let mut client = Client::new(config);
/// client.open_session()?;
///
/// match client.call_method("crm.lead.get", None, false).await {
///     Ok(lead) => println!("Lead: {lead}"),
///     Err(Error::Api { code, description }) => {
///         eprintln!("Bitrix24 rejected the call [{code}]: {description}");
///     }
///     Err(Error::HttpError { status, raw_response }) => {
///         eprintln!("HTTP error {status}: {raw_response}");
///     }
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The client configuration was rejected before any request was made.
    ///
    /// Raised for a missing credential, a base URL that is not absolute HTTP(S),
    /// an unknown retry policy name, or a zero concurrency bound.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A URL could not be parsed or joined.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The transport could not reach the host.
    #[error("Failed to connect to Bitrix24: {url}")]
    Connection {
        /// The method URL with the credential redacted.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The request exceeded the configured timeout.
    #[error("Request to Bitrix24 timed out: {url}")]
    Timeout {
        /// The method URL with the credential redacted.
        url: String,
    },

    /// The server answered with a non-2xx status other than 503.
    ///
    /// These are never retried.
    #[error("HTTP error {status}: {raw_response}")]
    HttpError {
        /// The HTTP status code.
        status: StatusCode,
        /// The raw response body.
        raw_response: String,
    },

    /// The server kept answering 503 until the retry ceiling was reached.
    #[error("Max retries exceeded for 503 error after {attempts} attempts: {url}")]
    MaxRetriesExceeded {
        /// The method URL with the credential redacted.
        url: String,
        /// Physical requests made, including the first one.
        attempts: usize,
    },

    /// The response body is not a JSON object, or its shape cannot be used.
    #[error("Invalid response from Bitrix24 ({reason}): {raw_response}")]
    InvalidResponse {
        /// The offending body text.
        raw_response: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The response envelope carried an `error` field.
    #[error("Bitrix24 API error [{code}]: {description}")]
    Api {
        /// The error code reported by Bitrix24, e.g. `QUERY_LIMIT_EXCEEDED`.
        code: String,
        /// The `error_description` field, or a generic text when absent.
        description: String,
    },

    /// `open_session` was called while a session was already open.
    #[error("Client session is already open")]
    SessionAlreadyOpen,

    /// A call or `close_session` was attempted without an open session.
    #[error("Client session is not open")]
    SessionNotOpen,

    /// Any other transport failure.
    #[error("Request error to Bitrix24: {0}")]
    Request(#[from] reqwest::Error),

    /// A concurrently dispatched page or chunk task panicked or was cancelled.
    #[error("Background request task failed: {0}")]
    TaskFailed(String),
}

impl Error {
    /// Returns `true` for failures that may succeed if the caller tries again later.
    ///
    /// The client never retries these on its own except for 503, which is
    /// handled inside the retry loop and only surfaces as
    /// [`Error::MaxRetriesExceeded`].
    ///
    /// # Examples
    ///
    /// ```
    /// use bitrix24_client::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::HttpError {
    ///     status: StatusCode::BAD_GATEWAY,
    ///     raw_response: "Bad gateway".to_string(),
    /// };
    /// assert!(err.is_transient());
    ///
    /// let err = Error::Api {
    ///     code: "ACCESS_DENIED".to_string(),
    ///     description: "No description".to_string(),
    /// };
    /// assert!(!err.is_transient());
    /// ```
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Connection { .. } | Error::Timeout { .. } => true,
            Error::MaxRetriesExceeded { .. } => true,
            Error::HttpError { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Error::Api { code, .. } => code == "QUERY_LIMIT_EXCEEDED",
            _ => false,
        }
    }

    /// Returns the HTTP status code for [`Error::HttpError`].
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the raw body for errors that carry one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::HttpError { raw_response, .. } => Some(raw_response),
            Error::InvalidResponse { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// Returns the Bitrix24 error code for [`Error::Api`].
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Error::Api { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// A specialized `Result` type for Bitrix24 API calls.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let err = Error::HttpError {
            status: StatusCode::NOT_FOUND,
            raw_response: "Not found".to_string(),
        };
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(err.raw_response(), Some("Not found"));
        assert!(!err.is_transient());

        let err = Error::Api {
            code: "QUERY_LIMIT_EXCEEDED".to_string(),
            description: "Too many requests".to_string(),
        };
        assert_eq!(err.api_code(), Some("QUERY_LIMIT_EXCEEDED"));
        assert!(err.is_transient());
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_display() {
        let err = Error::Api {
            code: "ERROR_METHOD_NOT_FOUND".to_string(),
            description: "Method not found!".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Bitrix24 API error [ERROR_METHOD_NOT_FOUND]: Method not found!"
        );
        assert_eq!(
            Error::SessionNotOpen.to_string(),
            "Client session is not open"
        );
    }
}
