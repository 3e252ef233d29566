//! [`ConnectionManager`] - owns the pooled downstream connection and drives
//! the reconnection loop.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──open──► Connected
//!       ▲                        │  ▲                  │
//!       │          attempt failed│  │retry after       │transport lost /
//!       │        (no reconnect)  │  │reconnect_interval│remote close
//!       └────────────────────────┘  └──────────────────┘
//! ```
//!
//! Every attempt is bounded by `connect_timeout`. Retries run at a fixed
//! `reconnect_interval`; the first attempt after a loss goes out at once.
//!
//! When an established connection is lost, the registered
//! [`DisconnectObserver`]s run synchronously in registration order *before*
//! the first reconnect attempt, so every link created on the dead
//! connection is forgotten before a new one can be opened.
//!
//! [`ConnectionManager::shutdown`] closes the connection without
//! reconnecting. An attempt still in flight is abandoned, and a handshake
//! that completes after shutdown is closed instead of installed.
//!
//! Every loss (and shutdown) bumps [`ConnectionManager::generation`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ---

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

// ---

use courier_domain::{
    // ---
    AmqpConnectionPtr,
    AmqpConnector,
    ConnectOptions,
    ConnectionState,
    CourierError,
    Result,
    TransportEvent,
};

// ---

use super::config::DownstreamConfig;

// ---------------------------------------------------------------------------
// DisconnectObserver
// ---------------------------------------------------------------------------

/// Notified synchronously when the downstream connection is lost.
pub trait DisconnectObserver: Send + Sync {
    fn on_disconnect(&self);
}

pub type DisconnectObserverPtr = Arc<dyn DisconnectObserver>;

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

pub struct ConnectionManager {
    // ---
    connector: Arc<dyn AmqpConnector>,
    config: DownstreamConfig,

    /// Local container id, fixed for the manager's lifetime.
    container_id: String,

    /// The live connection. `None` while disconnected or reconnecting.
    connection: Mutex<Option<AmqpConnectionPtr>>,

    /// Count of connections lost or shut down so far.
    generation: AtomicU64,

    observers: Mutex<Vec<DisconnectObserverPtr>>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,

    /// Task watching the live connection's transport events.
    supervisor: Mutex<Option<JoinHandle<()>>>,

    /// Serialises connect attempts between callers and the supervisor.
    connecting: tokio::sync::Mutex<()>,
}

pub type ConnectionManagerPtr = Arc<ConnectionManager>;

// ---

impl ConnectionManager {
    // ---
    pub fn new(connector: Arc<dyn AmqpConnector>, config: DownstreamConfig) -> Result<Arc<Self>> {
        // ---
        config.validate()?;
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Arc::new(Self {
            connector,
            config,
            container_id: format!("courier-adapter-{}", Uuid::new_v4()),
            connection: Mutex::new(None),
            generation: AtomicU64::new(0),
            observers: Mutex::new(Vec::new()),
            state_tx,
            shutdown_tx,
            supervisor: Mutex::new(None),
            connecting: tokio::sync::Mutex::new(()),
        }))
    }

    // ---

    pub fn config(&self) -> &DownstreamConfig {
        &self.config
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Bumped before observers run for each lost connection and on
    /// shutdown. Links opened under an older value are stale.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Subscribe to connection state transitions.
    pub fn state_rx(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Register an observer for connection loss. Observers run in
    /// registration order.
    pub fn on_disconnect(&self, observer: DisconnectObserverPtr) {
        self.observers.lock().push(observer);
    }

    // ---

    /// The live downstream connection.
    ///
    /// Fails fast with [`CourierError::NotConnected`] if there is none.
    pub fn current_connection(&self) -> Result<AmqpConnectionPtr> {
        // ---
        match self.connection.lock().as_ref() {
            Some(conn) if !conn.is_disconnected() => Ok(Arc::clone(conn)),
            _ => Err(CourierError::NotConnected),
        }
    }

    // ---

    /// Start according to `wait_for_downstream_connection`: either connect
    /// and return the outcome, or connect in the background and return now.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        // ---
        if self.config.wait_for_downstream_connection {
            tracing::info!("waiting for downstream connection before serving clients");
            return self.connect().await;
        }

        let me = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = me.connect().await {
                tracing::warn!("background connect to downstream container failed: {e}");
            }
        });
        Ok(())
    }

    // ---

    /// Establish the downstream connection.
    ///
    /// Returns at once if already connected. With `reconnect` enabled this
    /// retries until it succeeds or the manager is shut down; otherwise the
    /// first failed attempt is returned.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        // ---
        if self.is_shutting_down() {
            return Err(CourierError::Shutdown);
        }
        if self.current_connection().is_ok() {
            return Ok(());
        }

        let _guard = self.connecting.lock().await;
        if self.current_connection().is_ok() {
            return Ok(());
        }

        let outcome = match self.connect_loop().await {
            Ok(conn) => self.install(conn).await,
            Err(e) => Err(e),
        };
        if outcome.is_err() {
            self.set_state(ConnectionState::Disconnected);
        }
        outcome
    }

    // ---

    /// Close the connection and stop reconnecting.
    pub async fn shutdown(&self) {
        // ---
        self.shutdown_tx.send_replace(true);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnecting);

        let supervisor = self.supervisor.lock().take();
        if let Some(handle) = supervisor {
            handle.abort();
        }

        let conn = self.connection.lock().take();
        if let Some(conn) = conn {
            if let Err(e) = conn.close().await {
                tracing::warn!("error closing downstream connection: {e}");
            }
        }

        self.set_state(ConnectionState::Disconnected);
        tracing::info!(container = %self.container_id, "downstream connection shut down");
    }

    // ---

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        // ---
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!("downstream connection state {previous:?} → {state:?}");
        }
    }

    fn connect_options(&self) -> ConnectOptions {
        // ---
        ConnectOptions {
            host: self.config.host.clone(),
            port: self.config.port,
            container_id: self.container_id.clone(),
            hostname: self.config.hostname.clone(),
            connect_timeout: self.config.connect_timeout(),
        }
    }

    // ---

    /// Attempt until one succeeds, retries are disabled, or shutdown.
    async fn connect_loop(&self) -> Result<AmqpConnectionPtr> {
        // ---
        self.set_state(ConnectionState::Connecting);
        let options = self.connect_options();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut attempt: u32 = 0;

        loop {
            if self.is_shutting_down() {
                return Err(CourierError::Shutdown);
            }
            attempt += 1;

            tracing::debug!(
                attempt,
                host = %options.host,
                port = options.port,
                "connecting to downstream container"
            );
            let attempt_fut =
                tokio::time::timeout(options.connect_timeout, self.connector.connect(&options));
            let outcome = tokio::select! {
                outcome = attempt_fut => outcome.unwrap_or(Err(CourierError::ConnectTimeout)),
                _ = shutdown_rx.wait_for(|down| *down) => {
                    tracing::debug!(attempt, "connect attempt abandoned on shutdown");
                    return Err(CourierError::Shutdown);
                }
            };

            match outcome {
                Ok(conn) => return Ok(conn),
                Err(e) if !self.config.reconnect => {
                    tracing::warn!(attempt, "failed to connect to downstream container: {e}");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        "failed to connect to downstream container: {e}; retrying in {}ms",
                        self.config.reconnect_interval_ms
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.reconnect_interval()) => {}
                        _ = shutdown_rx.wait_for(|down| *down) => return Err(CourierError::Shutdown),
                    }
                }
            }
        }
    }

    // ---

    /// Publish `conn` as the live connection and start supervising it.
    ///
    /// The shutdown flag is checked under the connection lock, the same
    /// lock [`Self::shutdown`] takes the connection under, so a connection
    /// established after shutdown is closed rather than published.
    async fn install(self: &Arc<Self>, conn: AmqpConnectionPtr) -> Result<()> {
        // ---
        let published = {
            let mut slot = self.connection.lock();
            if self.is_shutting_down() {
                false
            } else {
                *slot = Some(Arc::clone(&conn));
                self.set_state(ConnectionState::Connected);
                true
            }
        };
        if !published {
            tracing::debug!("connection established after shutdown; closing it");
            if let Err(e) = conn.close().await {
                tracing::debug!("closing late connection failed: {e}");
            }
            return Err(CourierError::Shutdown);
        }

        tracing::info!(
            container = %self.container_id,
            remote = %conn.remote_container(),
            "connected to downstream container"
        );

        let me = Arc::clone(self);
        let handle = tokio::spawn(async move { me.supervise(conn).await });
        *self.supervisor.lock() = Some(handle);
        Ok(())
    }

    // ---

    /// Watch `conn` until it is lost, notify observers, then reconnect.
    fn supervise(
        self: Arc<Self>,
        conn: AmqpConnectionPtr,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            // ---
            let mut events = conn.events();
            let mut shutdown_rx = self.shutdown_tx.subscribe();

            loop {
                let event = *events.borrow_and_update();
                match event {
                    TransportEvent::Open => {}
                    TransportEvent::RemoteClosed => {
                        tracing::info!(
                            remote = %conn.remote_container(),
                            "downstream container closed the connection; closing locally"
                        );
                        if let Err(e) = conn.close().await {
                            tracing::debug!("local close after remote close failed: {e}");
                        }
                        break;
                    }
                    TransportEvent::Disconnected => break,
                }

                tokio::select! {
                    changed = events.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = shutdown_rx.wait_for(|down| *down) => return,
                }
            }

            if self.is_shutting_down() {
                return;
            }
            self.on_connection_lost(&conn);

            let _guard = self.connecting.lock().await;
            if self.current_connection().is_ok() {
                return;
            }
            let outcome = match self.connect_loop().await {
                Ok(conn) => self.install(conn).await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                self.set_state(ConnectionState::Disconnected);
                tracing::warn!("giving up on downstream connection: {e}");
            }
        })
    }

    // ---

    fn on_connection_lost(&self, conn: &AmqpConnectionPtr) {
        // ---
        *self.connection.lock() = None;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
        tracing::warn!(
            remote = %conn.remote_container(),
            "lost connection to downstream container"
        );

        let observers = self.observers.lock().clone();
        for observer in observers {
            observer.on_disconnect();
        }
        conn.disconnect();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use courier_domain::{AmqpConnection, ConnectionState, CourierError};
    use courier_link_sim::{ConnectOutcome, SimConfig, SimConnector};

    use super::{ConnectionManager, DisconnectObserver};
    use crate::config::DownstreamConfig;

    // ---

    /// Records the connector's attempt count each time it is notified.
    struct Recorder {
        label: &'static str,
        connector: Arc<SimConnector>,
        log: Arc<Mutex<Vec<(&'static str, usize)>>>,
    }

    impl DisconnectObserver for Recorder {
        fn on_disconnect(&self) {
            self.log
                .lock()
                .push((self.label, self.connector.attempts()));
        }
    }

    // ---

    async fn wait_state(cm: &ConnectionManager, want: ConnectionState) {
        // ---
        let mut rx = cm.state_rx();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
            .await
            .expect("state reached in time")
            .expect("state channel open");
    }

    // ---

    #[tokio::test]
    async fn not_connected_before_connect() {
        // ---
        let connector = Arc::new(SimConnector::new(SimConfig::manual()));
        let cm = ConnectionManager::new(connector, DownstreamConfig::default()).expect("config");

        assert!(matches!(
            cm.current_connection(),
            Err(CourierError::NotConnected)
        ));
        assert_eq!(cm.state(), ConnectionState::Disconnected);
        assert!(cm.container_id().starts_with("courier-adapter-"));
    }

    // ---

    #[tokio::test(start_paused = true)]
    async fn single_attempt_when_reconnect_disabled() {
        // ---
        let connector =
            Arc::new(SimConnector::new(SimConfig::manual()).with_script([ConnectOutcome::Refuse]));
        let config = DownstreamConfig {
            reconnect: false,
            ..Default::default()
        };
        let cm = ConnectionManager::new(connector.clone(), config).expect("config");

        assert!(cm.connect().await.is_err());
        assert_eq!(connector.attempts(), 1);
        assert_eq!(cm.state(), ConnectionState::Disconnected);
    }

    // ---

    #[tokio::test(start_paused = true)]
    async fn hanging_attempt_is_bounded_by_connect_timeout() {
        // ---
        let connector =
            Arc::new(SimConnector::new(SimConfig::manual()).with_script([ConnectOutcome::Hang]));
        let cm =
            ConnectionManager::new(connector.clone(), DownstreamConfig::default()).expect("config");

        cm.connect().await.expect("second attempt succeeds");
        assert_eq!(connector.attempts(), 2);
        assert_eq!(cm.state(), ConnectionState::Connected);
    }

    // ---

    #[tokio::test]
    async fn observers_run_in_order_before_reconnect() {
        // ---
        let connector = Arc::new(SimConnector::new(SimConfig::manual()));
        let cm =
            ConnectionManager::new(connector.clone(), DownstreamConfig::default()).expect("config");
        let log = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second"] {
            cm.on_disconnect(Arc::new(Recorder {
                label,
                connector: connector.clone(),
                log: log.clone(),
            }));
        }

        cm.connect().await.expect("connect");
        let conn = connector.last_connection().expect("connection");
        conn.simulate_disconnect();

        tokio::time::timeout(Duration::from_secs(5), async {
            while connector.attempts() < 2 || cm.state() != ConnectionState::Connected {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("reconnected");

        // Both observers saw only the original attempt.
        assert_eq!(*log.lock(), vec![("first", 1), ("second", 1)]);
    }

    // ---

    #[tokio::test]
    async fn remote_close_is_closed_locally_and_reconnected() {
        // ---
        let connector = Arc::new(SimConnector::new(SimConfig::manual()));
        let cm =
            ConnectionManager::new(connector.clone(), DownstreamConfig::default()).expect("config");
        cm.connect().await.expect("connect");

        let first = connector.last_connection().expect("connection");
        first.remote_close();

        tokio::time::timeout(Duration::from_secs(5), async {
            while connector.connections().len() < 2 || cm.state() != ConnectionState::Connected {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("reconnected");

        assert!(first.is_disconnected());
    }

    // ---

    #[tokio::test]
    async fn generation_advances_on_loss_and_shutdown() {
        // ---
        let connector = Arc::new(SimConnector::new(SimConfig::manual()));
        let cm =
            ConnectionManager::new(connector.clone(), DownstreamConfig::default()).expect("config");
        cm.connect().await.expect("connect");
        assert_eq!(cm.generation(), 0);

        connector
            .last_connection()
            .expect("connection")
            .simulate_disconnect();
        tokio::time::timeout(Duration::from_secs(5), async {
            while connector.connections().len() < 2 || cm.state() != ConnectionState::Connected {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("reconnected");
        assert_eq!(cm.generation(), 1);

        cm.shutdown().await;
        assert_eq!(cm.generation(), 2);
    }

    // ---

    #[tokio::test]
    async fn start_without_waiting_connects_in_background() {
        // ---
        let connector = Arc::new(SimConnector::new(SimConfig::manual()));
        let cm =
            ConnectionManager::new(connector.clone(), DownstreamConfig::default()).expect("config");

        cm.start().await.expect("start returns at once");
        wait_state(&cm, ConnectionState::Connected).await;
        assert!(cm.current_connection().is_ok());
    }

    // ---

    #[tokio::test]
    async fn shutdown_does_not_reconnect() {
        // ---
        let connector = Arc::new(SimConnector::new(SimConfig::manual()));
        let cm =
            ConnectionManager::new(connector.clone(), DownstreamConfig::default()).expect("config");
        let notified = Arc::new(AtomicUsize::new(0));

        struct Count(Arc<AtomicUsize>);
        impl DisconnectObserver for Count {
            fn on_disconnect(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        cm.on_disconnect(Arc::new(Count(notified.clone())));

        cm.connect().await.expect("connect");
        cm.shutdown().await;

        tokio::task::yield_now().await;
        assert_eq!(cm.state(), ConnectionState::Disconnected);
        assert_eq!(connector.attempts(), 1);
        assert_eq!(notified.load(Ordering::SeqCst), 0);
        assert!(matches!(cm.connect().await, Err(CourierError::Shutdown)));
    }
}
