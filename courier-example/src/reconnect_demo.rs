//! Reconnect demo: the simulated transport drops and the connection manager
//! recovers after a scripted number of refused connect attempts.

use std::time::Duration;

use anyhow::anyhow;
use tokio::time::Instant;

use courier_domain::ConnectionState;
use courier_gateway::ConnectionManagerPtr;
use courier_link_sim::{ConnectOutcome, SimConnector};

// ---

pub async fn run(
    connections: &ConnectionManagerPtr,
    connector: &SimConnector,
    failed_attempts: usize,
) -> anyhow::Result<()> {
    // ---
    let old = connector
        .last_connection()
        .ok_or_else(|| anyhow!("no downstream connection to drop"))?;

    connector.push_outcomes(std::iter::repeat(ConnectOutcome::Refuse).take(failed_attempts));
    let attempts_before = connector.attempts();
    let mut state = connections.state_rx();

    let lost_at = Instant::now();
    old.simulate_disconnect();
    state.wait_for(|s| *s != ConnectionState::Connected).await?;
    println!("  transport dropped, state: {:?}", connections.state());

    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await??;

    println!(
        "  reconnected after {} attempts in {:?} (interval {} ms)",
        connector.attempts() - attempts_before,
        lost_at.elapsed(),
        connections.config().reconnect_interval_ms
    );
    println!("  downstream connections opened so far: {}", connector.connections().len());
    Ok(())
}
