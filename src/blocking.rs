//! Blocking Bitrix24 client.
//!
//! One physical request is in flight at a time per call. Paginated results are
//! collected by following the `next` cursor page by page. Do not use this
//! client from inside an async runtime; use [`Client`](crate::Client) there.

use crate::{
    batch::{batch_params, chunk_commands, BatchResult, BATCH_METHOD},
    config::ClientConfig,
    pagination::{advance_cursor, with_start, Params},
    response::Envelope,
    retry::{JitterSource, RetryState},
    transport, Error, Result,
};
use serde_json::Value;
use std::ops::Deref;
use std::time::Instant;

/// A blocking client for the Bitrix24 REST API.
///
/// # Examples
///
/// ```no_run
/// use bitrix24_client::{BlockingClient, ClientConfig};
/// use serde_json::json;
///
/// # fn example() -> Result<(), bitrix24_client::Error> {
/// let config = ClientConfig::builder()
///     .base_url("https://example.bitrix24.ru")?
///     .credential("token")
///     .user_id(1)
///     .build()?;
///
/// let mut client = BlockingClient::new(config);
/// client.open_session()?;
///
/// let lead = client.call_method("crm.lead.get", json!({"id": "123"}).as_object().cloned(), false)?;
/// println!("Lead: {lead}");
///
/// client.close_session()?;
/// # Ok(())
/// # }
/// ```
pub struct BlockingClient {
    config: ClientConfig,
    jitter: JitterSource,
    session: Option<reqwest::blocking::Client>,
}

impl BlockingClient {
    /// Creates a client with no open session.
    pub fn new(config: ClientConfig) -> Self {
        let jitter = JitterSource::new(config.jitter_seed());
        Self {
            config,
            jitter,
            session: None,
        }
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns `true` while a session is open.
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Opens the connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionAlreadyOpen`] if a session is already open.
    pub fn open_session(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::SessionAlreadyOpen);
        }

        let http = reqwest::blocking::Client::builder()
            .timeout(self.config.timeout())
            .build()
            .map_err(|e| {
                Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
            })?;
        self.session = Some(http);
        tracing::debug!(endpoint = ?self.config.endpoint(), "Opened Bitrix24 session");
        Ok(())
    }

    /// Closes the connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotOpen`] if no session is open.
    pub fn close_session(&mut self) -> Result<()> {
        match self.session.take() {
            Some(_) => {
                tracing::debug!("Closed Bitrix24 session");
                Ok(())
            }
            None => Err(Error::SessionNotOpen),
        }
    }

    /// Opens a session that lasts as long as the returned guard.
    pub fn session(&mut self) -> Result<BlockingSessionGuard<'_>> {
        self.open_session()?;
        Ok(BlockingSessionGuard { client: self })
    }

    fn http(&self) -> Result<&reqwest::blocking::Client> {
        self.session.as_ref().ok_or(Error::SessionNotOpen)
    }

    /// Calls a remote method.
    ///
    /// With `fetch_all` set, follows the `next` cursor until the last page and
    /// returns every row as one array.
    pub fn call_method(
        &self,
        method: &str,
        params: Option<Params>,
        fetch_all: bool,
    ) -> Result<Value> {
        let http = self.http()?;
        let params = params.unwrap_or_default();

        if fetch_all {
            self.fetch_all_pages(http, method, params).map(Value::Array)
        } else {
            let envelope = self.execute(http, method, &params)?;
            let page = self.config.formatter().format(&envelope.body, false)?;
            Ok(page.result)
        }
    }

    /// Calls a remote method and returns the validated envelope as-is.
    pub fn call_raw(&self, method: &str, params: Option<Params>) -> Result<Envelope> {
        let http = self.http()?;
        self.execute(http, method, &params.unwrap_or_default())
    }

    /// Runs commands through the `batch` method, one chunk after another.
    pub fn call_batch(&self, commands: &Params, halt: bool) -> Result<BatchResult> {
        let http = self.http()?;
        let mut merged = BatchResult::default();

        for chunk in chunk_commands(commands, self.config.batch_chunk_size())? {
            let envelope = self.execute(http, BATCH_METHOD, &batch_params(chunk, halt))?;
            merged.merge(BatchResult::from_body(&envelope.body, &envelope.raw_body)?);
        }
        Ok(merged)
    }

    fn fetch_all_pages(
        &self,
        http: &reqwest::blocking::Client,
        method: &str,
        mut params: Params,
    ) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut offset = params.get("start").and_then(Value::as_u64).unwrap_or(0);

        loop {
            let envelope = self.execute(http, method, &params)?;
            let page = self.config.formatter().format(&envelope.body, true)?;
            let next = page.next;
            items.extend(page.into_items());

            match next {
                Some(next) => {
                    offset = advance_cursor(offset, next, &envelope.raw_body)?;
                    params = with_start(&params, offset);
                }
                None => return Ok(items),
            }
        }
    }

    fn execute(
        &self,
        http: &reqwest::blocking::Client,
        method: &str,
        params: &Params,
    ) -> Result<Envelope> {
        let url = self.config.endpoint().method_url(method)?;
        let log_url = self.config.endpoint().redacted(method);
        let start_time = Instant::now();
        let mut retry = RetryState::new(self.config.max_retries());

        loop {
            tracing::debug!(
                method = method,
                url = %log_url,
                attempt = retry.attempts(),
                "Executing Bitrix24 request"
            );

            let response = http
                .post(url.clone())
                .timeout(self.config.timeout())
                .json(params)
                .send()
                .map_err(|e| transport::classify(e, &log_url))?;

            let status = response.status();
            if !transport::is_busy(status) {
                let raw_body = response
                    .text()
                    .map_err(|e| transport::classify(e, &log_url))?;
                return transport::finish(
                    &self.config,
                    status,
                    raw_body,
                    retry.attempts(),
                    start_time.elapsed(),
                );
            }

            tracing::warn!(
                url = %log_url,
                attempt = retry.attempts(),
                "Bitrix24 is busy (503)"
            );
            let delay = retry.next_delay(self.config.retry_strategy(), &self.jitter, &log_url)?;
            tracing::info!(
                delay_ms = delay.as_millis(),
                attempt = retry.attempts(),
                "Retrying request after delay"
            );
            std::thread::sleep(delay);
        }
    }
}

impl std::fmt::Debug for BlockingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingClient")
            .field("config", &self.config)
            .field("is_open", &self.is_open())
            .finish()
    }
}

/// An open session on a [`BlockingClient`], closed on drop.
pub struct BlockingSessionGuard<'a> {
    client: &'a mut BlockingClient,
}

impl Deref for BlockingSessionGuard<'_> {
    type Target = BlockingClient;

    fn deref(&self) -> &Self::Target {
        self.client
    }
}

impl Drop for BlockingSessionGuard<'_> {
    fn drop(&mut self) {
        if self.client.session.take().is_some() {
            tracing::debug!("Closed Bitrix24 session");
        }
    }
}
