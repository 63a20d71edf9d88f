//! Watch Party - Relay Server
//!
//! Hosts watch-party rooms and relays their sync and chat events to clients
//! over TCP, with a terminal dashboard.
//!
//! Usage:
//!   cargo run --release
//!   cargo run --release -- --no-dashboard  # Plain logging mode

mod auth;
mod dashboard;
mod frame;
mod history;
mod metrics;
mod network;
mod protocol;

use std::sync::Arc;
use parking_lot::RwLock;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let use_dashboard = !args.contains(&"--no-dashboard".to_string());

    // Shared metrics state
    let metrics = Arc::new(RwLock::new(metrics::Metrics::new()));

    if use_dashboard {
        dashboard::run(metrics).await
    } else {
        network::run_with_logging(metrics).await
    }
}
