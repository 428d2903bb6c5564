//! Example using the blocking client with an explicit session.
//!
//! This example shows how to:
//! - Configure a client for an OAuth-style credential with a user id
//! - Open and close a session explicitly
//! - Make a single call and a paginated call
//!
//! Run with: `cargo run --example sync_call`

use bitrix24_client::{BlockingClient, ClientConfig, Error};
use serde_json::json;

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("bitrix24_client=debug,sync_call=info")
        .init();

    let config = ClientConfig::builder()
        .base_url("https://example.bitrix24.ru")?
        .credential("token")
        .user_id(1)
        .build()?;

    let mut client = BlockingClient::new(config);
    client.open_session()?;

    println!("=== Single Call ===");
    let lead = client.call_method("crm.lead.get", json!({"id": "123"}).as_object().cloned(), false)?;
    println!("Lead: {}", lead);
    println!();

    println!("=== Every Page ===");
    let leads = client.call_method(
        "crm.lead.list",
        json!({"select": ["ID", "TITLE"]}).as_object().cloned(),
        true,
    )?;
    println!("Fetched {} leads", leads.as_array().map_or(0, Vec::len));

    client.close_session()?;
    Ok(())
}
