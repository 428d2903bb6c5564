//! Example demonstrating error handling.
//!
//! This example shows how to:
//! - Tell transport, HTTP, body and API errors apart
//! - Access raw response data on errors
//! - Check whether an error is worth trying again later
//!
//! Run with: `cargo run --example error_handling`

use bitrix24_client::{BlockingClient, ClientConfig, Error};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("bitrix24_client=info")
        .init();

    println!("=== Example 1: Rejected Configuration ===");
    match ClientConfig::builder().base_url("ftp://example.com") {
        Ok(_) => println!("Unexpected success"),
        Err(e) => println!("Rejected: {}", e),
    }
    match ClientConfig::builder().retry_policy("quadratic") {
        Ok(_) => println!("Unexpected success"),
        Err(e) => println!("Rejected: {}", e),
    }
    println!();

    let config = ClientConfig::builder()
        .base_url("https://example.bitrix24.ru")?
        .credential("webhook-key")
        .build()?;
    let mut client = BlockingClient::new(config);

    println!("=== Example 2: Calling Without a Session ===");
    match client.call_method("crm.lead.get", None, false) {
        Err(Error::SessionNotOpen) => println!("Open a session first"),
        other => println!("Unexpected: {:?}", other),
    }
    println!();

    println!("=== Example 3: Classifying Failures ===");
    let session = client.session()?;
    match session.call_method("crm.lead.get", None, false) {
        Ok(lead) => println!("Lead: {}", lead),
        Err(Error::Api { code, description }) => {
            println!("Bitrix24 rejected the call");
            println!("  Code: {}", code);
            println!("  Description: {}", description);
        }
        Err(Error::HttpError {
            status,
            raw_response,
        }) => {
            println!("HTTP Error!");
            println!("  Status: {}", status);
            println!("  Raw response: {}", raw_response);
        }
        Err(Error::InvalidResponse {
            raw_response,
            reason,
        }) => {
            println!("Invalid body ({})", reason);
            println!(
                "  Raw response (first 200 chars): {}",
                raw_response.chars().take(200).collect::<String>()
            );
        }
        Err(Error::MaxRetriesExceeded { attempts, url }) => {
            println!("Still busy after {} attempts: {}", attempts, url);
        }
        Err(Error::Timeout { url }) => println!("Timed out: {}", url),
        Err(Error::Connection { url, source }) => {
            println!("Could not connect to {}: {}", url, source);
        }
        Err(e) => {
            println!("Other error: {}", e);
            println!("  Transient: {}", e.is_transient());
        }
    }

    Ok(())
}
