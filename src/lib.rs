//! # bitrix24-client - A Bitrix24 REST API client
//!
//! Blocking and async access to the Bitrix24 REST API over JSON-over-HTTP. The
//! crate builds webhook or OAuth-style method URLs, backs off when a portal
//! answers `503 Service Unavailable`, validates response envelopes, and can
//! collect every page of a list method in one call.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bitrix24_client::{Client, ClientConfig, RetryPolicy, RetryStrategy};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), bitrix24_client::Error> {
//!     let config = ClientConfig::builder()
//!         .base_url("https://example.bitrix24.ru")?
//!         .credential("your-webhook-key")
//!         .timeout(Duration::from_secs(30))
//!         .max_retries(5)
//!         .retry_strategy(RetryStrategy::new(
//!             RetryPolicy::ExponentialJitter,
//!             Duration::from_millis(500),
//!             Duration::from_secs(10),
//!         ))
//!         .max_concurrent_requests(10)
//!         .build()?;
//!
//!     let mut client = Client::new(config);
//!     let session = client.session()?;
//!
//!     // A single request
//!     let lead = session
//!         .call_method("crm.lead.get", json!({"id": 42}).as_object().cloned(), false)
//!         .await?;
//!     println!("Lead: {lead}");
//!
//!     // Every page of a list method, in offset order
//!     let contacts = session
//!         .call_method(
//!             "crm.contact.list",
//!             json!({"select": ["ID", "NAME"]}).as_object().cloned(),
//!             true,
//!         )
//!         .await?;
//!     println!("Contacts: {}", contacts.as_array().map_or(0, Vec::len));
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Two clients** - [`BlockingClient`] follows pages one by one; [`Client`]
//!   fetches remaining pages concurrently behind an admission gate
//! - **503 backoff** - Fixed, linear, logarithmic, exponential, or jittered
//!   exponential delays, capped and bounded by a retry ceiling
//! - **Typed errors** - Transport, HTTP, invalid-body and API errors are
//!   distinct [`Error`] variants carrying the data needed to debug them
//! - **Batching** - [`Client::call_batch`] splits large command sets into
//!   chunks the `batch` method accepts and merges the answers in order
//! - **Explicit sessions** - Calls fail with [`Error::SessionNotOpen`] instead
//!   of silently opening a connection pool
//! - **Structured logging** - Requests, retries and failures are reported with
//!   `tracing`; credentials are redacted
//!
//! ## Error Handling
//!
//! ```no_run
//! use bitrix24_client::{BlockingClient, ClientConfig, Error};
//!
//! # fn example() -> Result<(), Error> {
//! # let config = ClientConfig::builder()
//! #     .base_url("https://example.bitrix24.ru")?
//! #     .credential("key")
//! #     .build()?;
//! let mut client = BlockingClient::new(config);
//! let session = client.session()?;
//!
//! match session.call_method("crm.lead.list", None, true) {
//!     Ok(leads) => println!("Leads: {leads}"),
//!     Err(Error::Api { code, description }) => {
//!         eprintln!("Bitrix24 error [{code}]: {description}");
//!     }
//!     Err(Error::MaxRetriesExceeded { attempts, .. }) => {
//!         eprintln!("Portal still busy after {attempts} attempts");
//!     }
//!     Err(Error::Timeout { url }) => eprintln!("Timed out: {url}"),
//!     Err(e) => eprintln!("Other error: {e}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod blocking;
mod client;
pub mod config;
pub mod endpoint;
mod error;
pub mod pagination;
pub mod response;
pub mod retry;
mod transport;

pub use blocking::{BlockingClient, BlockingSessionGuard};
pub use client::{Client, SessionGuard};
pub use config::{ClientBuilder, ClientConfig};
pub use error::{Error, Result};
pub use pagination::Params;
pub use response::{Envelope, Page, ResponseFormatter, ResponseValidator};
pub use retry::{RetryPolicy, RetryStrategy};
