//! Async Bitrix24 client with a bounded number of in-flight requests.
//!
//! The [`Client`] owns one connection pool (its session) and an admission
//! gate. Every physical request holds a gate permit only while it is on the
//! wire, so a request sleeping between 503 retries does not block others.

use crate::{
    batch::{batch_params, chunk_commands, BatchResult, BATCH_METHOD},
    config::ClientConfig,
    pagination::{advance_cursor, remaining_offsets, with_start, Params, PAGE_SIZE},
    response::Envelope,
    retry::{JitterSource, RetryState},
    transport, Error, Result,
};
use serde_json::Value;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// An async client for the Bitrix24 REST API.
///
/// Calls require an open session. Open one explicitly with
/// [`open_session`](Client::open_session), or scope it with
/// [`session`](Client::session), which closes it when the guard is dropped.
///
/// # Examples
///
/// ```no_run
/// use bitrix24_client::{Client, ClientConfig};
/// use serde_json::json;
///
/// # async fn example() -> Result<(), bitrix24_client::Error> {
/// let config = ClientConfig::builder()
///     .base_url("https://example.bitrix24.ru")?
///     .credential("webhook-key")
///     .max_concurrent_requests(5)
///     .build()?;
///
/// let mut client = Client::new(config);
/// let session = client.session()?;
///
/// let params = json!({"select": ["ID", "NAME"]});
/// let contacts = session
///     .call_method("crm.contact.list", params.as_object().cloned(), true)
///     .await?;
/// println!("Fetched {} contacts", contacts.as_array().map_or(0, Vec::len));
/// # Ok(())
/// # }
/// ```
pub struct Client {
    inner: Arc<ClientInner>,
    session: Option<reqwest::Client>,
}

struct ClientInner {
    config: ClientConfig,
    gate: Semaphore,
    jitter: JitterSource,
}

impl Client {
    /// Creates a client with no open session.
    pub fn new(config: ClientConfig) -> Self {
        let gate = Semaphore::new(config.max_concurrent_requests());
        let jitter = JitterSource::new(config.jitter_seed());
        Self {
            inner: Arc::new(ClientInner {
                config,
                gate,
                jitter,
            }),
            session: None,
        }
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
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

        let http = reqwest::Client::builder()
            .timeout(self.inner.config.timeout())
            .build()
            .map_err(|e| {
                Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
            })?;
        self.session = Some(http);
        tracing::debug!(endpoint = ?self.inner.config.endpoint(), "Opened Bitrix24 session");
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
    ///
    /// The session is closed when the guard is dropped, whether the caller
    /// finishes normally, returns early with an error, or panics.
    pub fn session(&mut self) -> Result<SessionGuard<'_>> {
        self.open_session()?;
        Ok(SessionGuard { client: self })
    }

    fn http(&self) -> Result<&reqwest::Client> {
        self.session.as_ref().ok_or(Error::SessionNotOpen)
    }

    /// Calls a remote method.
    ///
    /// With `fetch_all` unset, returns the result of a single request. With
    /// `fetch_all` set, fetches the first page, then every remaining page
    /// concurrently, and returns all rows as one array in offset order.
    ///
    /// # Arguments
    ///
    /// * `method` - The remote method, e.g. `crm.lead.list`
    /// * `params` - The request body; `None` sends `{}`
    /// * `fetch_all` - Whether to collect every page
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotOpen`] without a session, and otherwise the
    /// first error of any request involved. Partial results are discarded.
    pub async fn call_method(
        &self,
        method: &str,
        params: Option<Params>,
        fetch_all: bool,
    ) -> Result<Value> {
        let http = self.http()?;
        let params = params.unwrap_or_default();

        if fetch_all {
            self.fetch_all_pages(http, method, params)
                .await
                .map(Value::Array)
        } else {
            let envelope = execute(&self.inner, http, method, &params).await?;
            let page = self.inner.config.formatter().format(&envelope.body, false)?;
            Ok(page.result)
        }
    }

    /// Calls a remote method and returns the validated envelope as-is.
    ///
    /// Useful when the caller needs `time`, `next`, `total`, or the number of
    /// attempts made.
    pub async fn call_raw(&self, method: &str, params: Option<Params>) -> Result<Envelope> {
        let http = self.http()?;
        execute(&self.inner, http, method, &params.unwrap_or_default()).await
    }

    /// Runs commands through the `batch` method.
    ///
    /// Commands are split into chunks of the configured size and the chunks
    /// are sent concurrently. The merged result keeps the original key order.
    /// With `halt` set, Bitrix24 stops a chunk at its first failing command.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use bitrix24_client::{Client, pagination::Params};
    /// use serde_json::Value;
    ///
    /// # async fn example(client: &Client) -> Result<(), bitrix24_client::Error> {
    /// let mut commands = Params::new();
    /// commands.insert("me".into(), Value::from("user.current"));
    /// commands.insert("lead".into(), Value::from("crm.lead.get?id=1"));
    ///
    /// let batch = client.call_batch(&commands, false).await?;
    /// println!("Current user: {}", batch.result["me"]);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn call_batch(&self, commands: &Params, halt: bool) -> Result<BatchResult> {
        let http = self.http()?;
        let chunks = chunk_commands(commands, self.inner.config.batch_chunk_size())?;
        let chunk_count = chunks.len();

        let mut tasks = JoinSet::new();
        for (index, chunk) in chunks.into_iter().enumerate() {
            let inner = Arc::clone(&self.inner);
            let http = http.clone();
            tasks.spawn(async move {
                let params = batch_params(chunk, halt);
                let envelope = execute(&inner, &http, BATCH_METHOD, &params).await?;
                let result = BatchResult::from_body(&envelope.body, &envelope.raw_body)?;
                Ok::<_, Error>((index, result))
            });
        }

        let results = join_in_order(tasks, chunk_count).await?;
        let mut merged = BatchResult::default();
        for result in results {
            merged.merge(result);
        }
        Ok(merged)
    }

    async fn fetch_all_pages(
        &self,
        http: &reqwest::Client,
        method: &str,
        params: Params,
    ) -> Result<Vec<Value>> {
        let formatter = self.inner.config.formatter();
        let start = params.get("start").and_then(Value::as_u64).unwrap_or(0);
        let first = execute(&self.inner, http, method, &params).await?;
        let page = formatter.format(&first.body, true)?;

        let Some(next) = page.next else {
            return Ok(page.into_items());
        };
        let total = page.total.ok_or_else(|| Error::InvalidResponse {
            raw_response: first.raw_body.clone(),
            reason: "paginated response has `next` but no `total`".to_string(),
        })?;
        let next = advance_cursor(start, next, &first.raw_body)?;

        let offsets = remaining_offsets(next, total, PAGE_SIZE);
        tracing::debug!(
            method = method,
            total = total,
            pages = offsets.len() + 1,
            "Fetching remaining pages concurrently"
        );

        let mut tasks = JoinSet::new();
        for (index, offset) in offsets.iter().enumerate() {
            let inner = Arc::clone(&self.inner);
            let http = http.clone();
            let method = method.to_string();
            let params = with_start(&params, *offset);
            tasks.spawn(async move {
                let envelope = execute(&inner, &http, &method, &params).await?;
                let page = inner.config.formatter().format(&envelope.body, true)?;
                Ok::<_, Error>((index, page.into_items()))
            });
        }

        let mut items = page.into_items();
        for page_items in join_in_order(tasks, offsets.len()).await? {
            items.extend(page_items);
        }
        Ok(items)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("is_open", &self.is_open())
            .finish()
    }
}

/// An open session on a [`Client`], closed on drop.
///
/// Dereferences to the client, so calls are made through the guard.
pub struct SessionGuard<'a> {
    client: &'a mut Client,
}

impl Deref for SessionGuard<'_> {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        self.client
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.client.session.take().is_some() {
            tracing::debug!("Closed Bitrix24 session");
        }
    }
}

/// Performs one logical call: POSTs `params` to `method`, backing off on 503.
async fn execute(
    inner: &ClientInner,
    http: &reqwest::Client,
    method: &str,
    params: &Params,
) -> Result<Envelope> {
    let config = &inner.config;
    let url = config.endpoint().method_url(method)?;
    let log_url = config.endpoint().redacted(method);
    let start_time = Instant::now();
    let mut retry = RetryState::new(config.max_retries());

    loop {
        tracing::debug!(
            method = method,
            url = %log_url,
            attempt = retry.attempts(),
            "Executing Bitrix24 request"
        );

        // The permit covers only the network exchange, never the backoff sleep.
        let (status, raw_body) = {
            let _permit = inner
                .gate
                .acquire()
                .await
                .map_err(|e| Error::TaskFailed(format!("admission gate closed: {}", e)))?;

            let response = http
                .post(url.clone())
                .timeout(config.timeout())
                .json(params)
                .send()
                .await
                .map_err(|e| transport::classify(e, &log_url))?;

            let status = response.status();
            if transport::is_busy(status) {
                (status, None)
            } else {
                let text = response
                    .text()
                    .await
                    .map_err(|e| transport::classify(e, &log_url))?;
                (status, Some(text))
            }
        };

        match raw_body {
            Some(raw_body) => {
                return transport::finish(
                    config,
                    status,
                    raw_body,
                    retry.attempts(),
                    start_time.elapsed(),
                );
            }
            None => {
                tracing::warn!(
                    url = %log_url,
                    attempt = retry.attempts(),
                    "Bitrix24 is busy (503)"
                );
                let delay = retry.next_delay(config.retry_strategy(), &inner.jitter, &log_url)?;
                tracing::info!(
                    delay_ms = delay.as_millis(),
                    attempt = retry.attempts(),
                    "Retrying request after delay"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Awaits every task and returns their outputs ordered by task index.
///
/// The first failure is returned immediately; dropping the set aborts the
/// tasks still running.
async fn join_in_order<T: Send + 'static>(
    mut tasks: JoinSet<Result<(usize, T)>>,
    len: usize,
) -> Result<Vec<T>> {
    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(len).collect();

    while let Some(joined) = tasks.join_next().await {
        let (index, output) = joined.map_err(|e| Error::TaskFailed(e.to_string()))??;
        slots[index] = Some(output);
    }

    Ok(slots.into_iter().flatten().collect())
}
