//! Order book stream on the Deribit test environment.
//!
//! Demonstrates:
//! - Connecting with the default configuration
//! - Optional authentication from `DERIBIT_CLIENT_ID` / `DERIBIT_CLIENT_SECRET`
//! - Fetching a top-5 book snapshot
//! - Streaming book updates until Ctrl+C, then unsubscribing cleanly
//!
//! Usage:
//!   cargo run --example order_book_stream
//!   cargo run --example order_book_stream -- ETH-PERPETUAL
//!   cargo run --example order_book_stream -- BTC-PERPETUAL --debug

// ============================================================================
// Imports
// ============================================================================

use deribit_session::{BookSummary, Client, ClientConfig, Credentials, Result, book_handler};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_INSTRUMENT: &str = "BTC-PERPETUAL";
const BOOK_DEPTH: u32 = 5;

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let debug = args.iter().any(|a| a == "--debug");
    let instrument = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .cloned()
        .unwrap_or_else(|| DEFAULT_INSTRUMENT.to_string());

    let filter = if debug {
        "deribit_session=debug"
    } else {
        "deribit_session=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    if let Err(e) = run(&instrument).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(instrument: &str) -> Result<()> {
    println!("=== Order Book Stream: {instrument} ===\n");

    // ========================================================================
    // Connect
    // ========================================================================

    println!("[1] Connecting...");
    let client = Client::connect(ClientConfig::testnet()).await?;
    println!("    ✓ Connected to {}\n", client.ready().peer);

    match Credentials::from_env() {
        Ok(credentials) => {
            println!("[2] Authenticating...");
            let token = client.authenticate(&credentials).await?;
            println!("    ✓ Token valid for {}s\n", token.expires_in);
        }
        Err(_) => println!("[2] No credentials in environment, staying public\n"),
    }

    // ========================================================================
    // Snapshot
    // ========================================================================

    println!("[3] Fetching top {BOOK_DEPTH} levels...");
    let summary = BookSummary::from_value(&client.get_order_book(instrument, BOOK_DEPTH).await?)?;
    for level in summary.top_asks(BOOK_DEPTH as usize).iter().rev() {
        println!("    ask {level}");
    }
    for level in summary.top_bids(BOOK_DEPTH as usize) {
        println!("    bid {level}");
    }
    if let Some(spread) = summary.spread() {
        println!("    spread {spread}");
    }
    println!();

    // ========================================================================
    // Stream
    // ========================================================================

    let channel = format!("book.{instrument}.100ms");
    let stop = CancellationToken::new();

    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.cancel();
            }
        });
    }

    println!("[4] Streaming {channel}, press Ctrl+C to stop...\n");
    client
        .stream(&channel, book_handler(|update| print!("{update}")), stop)
        .await?;
    println!("\n    ✓ Unsubscribed");

    client.close().await;
    println!("    ✓ Closed\n");

    Ok(())
}
