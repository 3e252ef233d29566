//! Courier example - runs the forwarding core against the in-process
//! simulated container.
//!
//! * Telemetry from a simulated device is forwarded to an application
//!   receiver on the translated downstream address.
//! * The downstream connection is dropped and recovers after scripted
//!   connect failures; old links are forgotten.
//! * A command is sent to a device consumer and its reply correlated.
//!
//! Run with:
//!   cargo run -p courier-example
//!   cargo run -p courier-example -- --tenant acme --path-separator .
//!   RUST_LOG=debug cargo run -p courier-example

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use courier_gateway::{ConnectionManager, ConnectionManagerPtr, DownstreamConfig};
use courier_link_sim::{SimConfig, SimConnector};

mod command_demo;
mod forwarding_demo;
mod reconnect_demo;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(
    name = "courier-example",
    about = "Courier forwarding core demo runner"
)]
struct Config {
    // ---
    /// Tenant the demo devices belong to.
    #[arg(long, default_value = "tenantA")]
    tenant: String,

    /// Replaces `/` in client addresses on the downstream side.
    #[arg(long, default_value = "/")]
    path_separator: String,

    /// Telemetry messages the simulated device sends.
    #[arg(long, default_value_t = 3)]
    messages: u32,

    /// Scripted connect failures before the reconnect succeeds.
    #[arg(long, default_value_t = 2)]
    failed_attempts: usize,

    /// Pause between reconnect attempts, in milliseconds.
    #[arg(long, default_value_t = 200)]
    reconnect_interval_ms: u64,
}

impl Config {
    fn downstream(&self) -> DownstreamConfig {
        DownstreamConfig {
            path_separator: self.path_separator.clone(),
            reconnect_interval_ms: self.reconnect_interval_ms,
            wait_for_downstream_connection: true,
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    let cfg = Config::parse();

    let no_color = std::env::var("EMACS").is_ok()
        || std::env::var("NO_COLOR").is_ok()
        || std::env::var("CARGO_TERM_COLOR").as_deref() == Ok("never")
        || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(!no_color)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "courier-example starting");

    let connector = Arc::new(SimConnector::new(SimConfig::broker()));
    let connections: ConnectionManagerPtr = ConnectionManager::new(connector.clone(), cfg.downstream())?;
    connections.start().await?;

    println!("=== 1. Telemetry forwarding ===");
    forwarding_demo::run(&connections, &connector, &cfg.tenant, cfg.messages).await?;

    println!();
    println!("=== 2. Downstream reconnect ===");
    reconnect_demo::run(&connections, &connector, cfg.failed_attempts).await?;

    println!();
    println!("=== 3. Command round trip ===");
    command_demo::run(&connections, &cfg.tenant).await?;

    connections.shutdown().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// wait_until
// ---------------------------------------------------------------------------

/// Poll `check` until it holds, giving up after two seconds.
async fn wait_until(what: &str, check: impl Fn() -> bool) -> anyhow::Result<()> {
    // ---
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}
