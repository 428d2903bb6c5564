//! Example fetching every page of a list method concurrently.
//!
//! This example shows how to:
//! - Bound the number of in-flight requests
//! - Scope a session so it is closed on every exit path
//! - Send a large command set through the `batch` method
//!
//! Run with: `cargo run --example async_fetch_all`

use bitrix24_client::{Client, ClientConfig, Error, Params};
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("bitrix24_client=info,async_fetch_all=info")
        .init();

    let config = ClientConfig::builder()
        .base_url("https://yourdomain.bitrix24.ru")?
        .credential("your_webhook_key")
        .max_concurrent_requests(10)
        .build()?;

    let mut client = Client::new(config);
    let session = client.session()?;

    println!("=== Fetch All Contacts ===");
    let contacts = session
        .call_method(
            "crm.contact.list",
            json!({"select": ["ID", "NAME"]}).as_object().cloned(),
            true,
        )
        .await?;
    let contacts = contacts.as_array().cloned().unwrap_or_default();
    println!("Fetched {} contacts", contacts.len());
    println!();

    println!("=== Batch Lookup ===");
    let commands: Params = contacts
        .iter()
        .filter_map(|contact| contact.get("ID").and_then(Value::as_str))
        .map(|id| {
            (
                format!("contact_{}", id),
                Value::from(format!("crm.contact.get?id={}", id)),
            )
        })
        .collect();

    let batch = session.call_batch(&commands, false).await?;
    println!("Resolved {} contacts", batch.result.len());
    if batch.has_errors() {
        println!("Failed commands: {:?}", batch.result_error.keys().collect::<Vec<_>>());
    }

    Ok(())
}
