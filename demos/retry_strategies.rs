//! Example printing the delays produced by each retry policy.
//!
//! This example shows how to:
//! - Pick a policy by name or by value
//! - See how `max_delay` caps every curve
//! - Make jittered delays reproducible with a seeded RNG
//!
//! Run with: `cargo run --example retry_strategies`

use bitrix24_client::{Error, RetryPolicy, RetryStrategy};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;

fn main() -> Result<(), Error> {
    let names = [
        "fixed",
        "linear",
        "logarithmic",
        "exponential",
        "exponential_jitter",
    ];

    for name in names {
        let policy: RetryPolicy = name.parse()?;
        let strategy = RetryStrategy::new(policy, Duration::from_millis(500), Duration::from_secs(5));
        let mut rng = StdRng::seed_from_u64(2024);

        let delays: Vec<String> = (1..=6)
            .map(|attempt| format!("{:?}", strategy.delay_with_rng(attempt, &mut rng)))
            .collect();
        println!("{:<20} {}", policy.as_str(), delays.join(", "));
    }

    Ok(())
}
