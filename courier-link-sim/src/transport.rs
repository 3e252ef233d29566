use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ---

use async_trait::async_trait;
use parking_lot::Mutex;

// ---

use courier_domain::{AmqpConnectionPtr, AmqpConnector, ConnectOptions, CourierError, Result};

// ---

use super::broker::SimBroker;
use super::config::SimConfig;
use super::session::SimConnection;

// ---------------------------------------------------------------------------
// ConnectOutcome
// ---------------------------------------------------------------------------

/// Scripted result of one connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    // ---
    Accept,

    /// Fail the attempt immediately.
    Refuse,

    /// Never answer; the caller's connect timeout decides.
    Hang,
}

// ---------------------------------------------------------------------------
// SimConnector
// ---------------------------------------------------------------------------

/// In-process [`AmqpConnector`]. Does not use real sockets.
///
/// Attempts consume the outcome script in order; once it is exhausted every
/// attempt is accepted. All connections share one [`SimBroker`].
pub struct SimConnector {
    // ---
    config: SimConfig,
    broker: Arc<SimBroker>,
    script: Mutex<VecDeque<ConnectOutcome>>,
    attempts: AtomicUsize,
    connections: Mutex<Vec<SimConnection>>,
}

// ---

impl SimConnector {
    // ---
    pub fn new(config: SimConfig) -> Self {
        // ---
        Self {
            config,
            broker: Arc::new(SimBroker::new()),
            script: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
            connections: Mutex::new(Vec::new()),
        }
    }

    // ---

    pub fn with_script(self, outcomes: impl IntoIterator<Item = ConnectOutcome>) -> Self {
        self.push_outcomes(outcomes);
        self
    }

    /// Append outcomes for upcoming attempts.
    pub fn push_outcomes(&self, outcomes: impl IntoIterator<Item = ConnectOutcome>) {
        self.script.lock().extend(outcomes);
    }

    /// Connect attempts made so far, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> Vec<SimConnection> {
        self.connections.lock().clone()
    }

    pub fn last_connection(&self) -> Option<SimConnection> {
        self.connections.lock().last().cloned()
    }

    pub fn broker(&self) -> Arc<SimBroker> {
        Arc::clone(&self.broker)
    }
}

// ---

#[async_trait]
impl AmqpConnector for SimConnector {
    // ---
    async fn connect(&self, options: &ConnectOptions) -> Result<AmqpConnectionPtr> {
        // ---
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(ConnectOutcome::Accept);
        tracing::debug!(attempt, ?outcome, host = %options.host, "sim: connect attempt");

        match outcome {
            ConnectOutcome::Refuse => Err(CourierError::Transport(format!(
                "connection refused by {}:{}",
                options.host, options.port
            ))),
            ConnectOutcome::Hang => std::future::pending().await,
            ConnectOutcome::Accept => {
                if !self.config.connect_delay.is_zero() {
                    tokio::time::sleep(self.config.connect_delay).await;
                }
                let conn = SimConnection::new(
                    options.container_id.clone(),
                    self.config.clone(),
                    Arc::clone(&self.broker),
                );
                self.connections.lock().push(conn.clone());
                Ok(Arc::new(conn))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
