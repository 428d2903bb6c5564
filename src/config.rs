//! Client configuration shared by the blocking and async clients.

use crate::{
    batch::DEFAULT_BATCH_CHUNK_SIZE,
    endpoint::{parse_base_url, Endpoint},
    response::{DefaultFormatter, DefaultValidator, ResponseFormatter, ResponseValidator},
    retry::{RetryPolicy, RetryStrategy},
    Error, Result,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of retries after a 503.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Default cap on in-flight requests for the async client.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 10;

/// Immutable settings for a Bitrix24 client.
///
/// Built once through [`ClientConfig::builder`] and then handed to
/// [`Client::new`](crate::Client::new) or
/// [`BlockingClient::new`](crate::BlockingClient::new).
///
/// # Examples
///
/// ```
/// use bitrix24_client::{ClientConfig, RetryPolicy};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), bitrix24_client::Error> {
/// let config = ClientConfig::builder()
///     .base_url("https://example.bitrix24.ru")?
///     .credential("webhook-key")
///     .user_id(1)
///     .timeout(Duration::from_secs(30))
///     .max_retries(5)
///     .retry_policy("exponential_jitter")?
///     .build()?;
///
/// assert_eq!(config.base_url().as_str(), "https://example.bitrix24.ru/");
/// assert_eq!(config.retry_strategy().policy, RetryPolicy::ExponentialJitter);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    endpoint: Endpoint,
    timeout: Duration,
    max_retries: usize,
    retry_strategy: RetryStrategy,
    max_concurrent_requests: usize,
    batch_chunk_size: usize,
    jitter_seed: Option<u64>,
    validator: Arc<dyn ResponseValidator>,
    formatter: Arc<dyn ResponseFormatter>,
}

impl ClientConfig {
    /// Creates a new `ClientBuilder`.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The method URL builder.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The normalized portal URL, always ending in `/`.
    pub fn base_url(&self) -> &Url {
        self.endpoint.base_url()
    }

    /// The webhook key or access token.
    pub fn credential(&self) -> &str {
        self.endpoint.credential()
    }

    /// The user id, present for OAuth-style paths.
    pub fn user_id(&self) -> Option<u64> {
        self.endpoint.user_id()
    }

    /// The per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// How many times a 503 is retried before giving up.
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// The backoff used between 503 retries.
    pub fn retry_strategy(&self) -> &RetryStrategy {
        &self.retry_strategy
    }

    /// The cap on simultaneous requests for the async client.
    pub fn max_concurrent_requests(&self) -> usize {
        self.max_concurrent_requests
    }

    /// How many commands go into one `batch` call.
    pub fn batch_chunk_size(&self) -> usize {
        self.batch_chunk_size
    }

    pub(crate) fn jitter_seed(&self) -> Option<u64> {
        self.jitter_seed
    }

    pub(crate) fn validator(&self) -> &dyn ResponseValidator {
        self.validator.as_ref()
    }

    pub(crate) fn formatter(&self) -> &dyn ResponseFormatter {
        self.formatter.as_ref()
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_strategy", &self.retry_strategy)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .field("batch_chunk_size", &self.batch_chunk_size)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ClientConfig`].
///
/// Setters that can fail validate immediately, so a bad base URL or retry
/// policy name is reported before any client exists.
pub struct ClientBuilder {
    base_url: Option<Url>,
    credential: Option<String>,
    user_id: Option<u64>,
    timeout: Duration,
    max_retries: usize,
    retry_strategy: RetryStrategy,
    max_concurrent_requests: usize,
    batch_chunk_size: usize,
    jitter_seed: Option<u64>,
    validator: Option<Box<dyn ResponseValidator>>,
    formatter: Option<Box<dyn ResponseFormatter>>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            base_url: None,
            credential: None,
            user_id: None,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_strategy: RetryStrategy::default(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            batch_chunk_size: DEFAULT_BATCH_CHUNK_SIZE,
            jitter_seed: None,
            validator: None,
            formatter: None,
        }
    }

    /// Sets the portal URL, e.g. `https://example.bitrix24.ru`.
    ///
    /// # Errors
    ///
    /// Returns an error unless the URL is absolute, HTTP(S) and has a host.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(parse_base_url(url.as_ref())?);
        Ok(self)
    }

    /// Sets the webhook key or OAuth access token.
    pub fn credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Sets the user id, switching to `rest/{user_id}/{credential}/` paths.
    pub fn user_id(mut self, user_id: u64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Sets the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets how many times a 503 is retried.
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Replaces the whole retry strategy.
    pub fn retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    /// Selects the backoff curve by name, keeping the configured delays.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] for an unknown policy name.
    pub fn retry_policy(mut self, name: &str) -> Result<Self> {
        self.retry_strategy.policy = name.parse::<RetryPolicy>()?;
        Ok(self)
    }

    /// Sets the base delay the backoff curve is scaled by.
    pub fn retry_base_delay(mut self, base: Duration) -> Self {
        self.retry_strategy.base = base;
        self
    }

    /// Sets the cap for a single backoff delay.
    pub fn retry_max_delay(mut self, max_delay: Duration) -> Self {
        self.retry_strategy.max_delay = max_delay;
        self
    }

    /// Caps simultaneous requests issued by the async client.
    pub fn max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    /// Sets how many commands go into one `batch` call.
    pub fn batch_chunk_size(mut self, size: usize) -> Self {
        self.batch_chunk_size = size;
        self
    }

    /// Seeds the RNG used for jittered delays.
    pub fn jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }

    /// Replaces the response validator.
    pub fn response_validator(mut self, validator: Box<dyn ResponseValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Replaces the response formatter.
    pub fn response_formatter(mut self, formatter: Box<dyn ResponseFormatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL or credential is missing, the
    /// credential contains a path separator, or a bound is zero.
    pub fn build(self) -> Result<ClientConfig> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::ConfigurationError("Base URL is required".to_string()))?;

        let credential = self
            .credential
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::ConfigurationError("Credential is required".to_string()))?;
        if credential.contains('/') {
            return Err(Error::ConfigurationError(
                "Credential must not contain '/'".to_string(),
            ));
        }

        if self.max_concurrent_requests == 0 {
            return Err(Error::ConfigurationError(
                "max_concurrent_requests must be greater than 0".to_string(),
            ));
        }
        if self.batch_chunk_size == 0 {
            return Err(Error::ConfigurationError(
                "batch_chunk_size must be greater than 0".to_string(),
            ));
        }

        let validator: Arc<dyn ResponseValidator> = match self.validator {
            Some(validator) => Arc::from(validator),
            None => Arc::new(DefaultValidator),
        };
        let formatter: Arc<dyn ResponseFormatter> = match self.formatter {
            Some(formatter) => Arc::from(formatter),
            None => Arc::new(DefaultFormatter),
        };

        Ok(ClientConfig {
            endpoint: Endpoint::new(base_url, credential, self.user_id),
            timeout: self.timeout,
            max_retries: self.max_retries,
            retry_strategy: self.retry_strategy,
            max_concurrent_requests: self.max_concurrent_requests,
            batch_chunk_size: self.batch_chunk_size,
            jitter_seed: self.jitter_seed,
            validator,
            formatter,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
