use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ---

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

// ---

use courier_domain::{
    // ---
    AmqpConnection,
    AmqpSession,
    AmqpSessionPtr,
    CourierError,
    Direction,
    LinkEndpoint,
    ReceiverOptions,
    ReceiverPtr,
    Result,
    SenderOptions,
    SenderPtr,
    TransportEvent,
};

// ---

use super::broker::SimBroker;
use super::link::{LinkSpec, SimReceiver, SimReceiverPeer, SimSender, SimSenderPeer};
use super::SimConfig;

// ---------------------------------------------------------------------------
// SimConnection
// ---------------------------------------------------------------------------

struct ConnectionInner {
    // ---
    container_id: String,
    config: SimConfig,
    broker: Arc<SimBroker>,
    events_tx: watch::Sender<TransportEvent>,
    senders: Mutex<Vec<SimSenderPeer>>,
    receivers: Mutex<Vec<SimReceiverPeer>>,

    /// Link opens the peer will refuse, consumed in order per direction.
    refusals: Mutex<VecDeque<Direction>>,
    sessions: AtomicUsize,
}

// ---

impl ConnectionInner {
    // ---
    fn is_disconnected(&self) -> bool {
        *self.events_tx.borrow() == TransportEvent::Disconnected
    }

    fn take_refusal(&self, direction: Direction) -> bool {
        // ---
        let mut refusals = self.refusals.lock();
        match refusals.iter().position(|d| *d == direction) {
            Some(at) => {
                refusals.remove(at);
                true
            }
            None => false,
        }
    }

    /// Wait for the peer's attach answer.
    async fn attach_latency(&self) {
        // ---
        if !self.config.attach_delay.is_zero() {
            tokio::time::sleep(self.config.attach_delay).await;
        }
    }

    /// Every link dies with its transport.
    fn drop_links(&self) {
        // ---
        for peer in self.senders.lock().iter() {
            peer.detach();
        }
        for peer in self.receivers.lock().iter() {
            peer.detach();
        }
    }
}

// ---

/// One simulated downstream connection.
///
/// Cheap to clone; clones observe and control the same connection. Test
/// code uses the control methods to inject transport failures and to reach
/// the peer side of every link the gateway opened.
#[derive(Clone)]
pub struct SimConnection {
    inner: Arc<ConnectionInner>,
}

// ---

impl SimConnection {
    // ---
    pub(crate) fn new(container_id: String, config: SimConfig, broker: Arc<SimBroker>) -> Self {
        // ---
        let (events_tx, _) = watch::channel(TransportEvent::Open);
        Self {
            inner: Arc::new(ConnectionInner {
                container_id,
                config,
                broker,
                events_tx,
                senders: Mutex::new(Vec::new()),
                receivers: Mutex::new(Vec::new()),
                refusals: Mutex::new(VecDeque::new()),
                sessions: AtomicUsize::new(0),
            }),
        }
    }

    // ---

    /// Container id the gateway presented when it connected.
    pub fn container_id(&self) -> &str {
        &self.inner.container_id
    }

    /// Drop the transport: every link closes and `Disconnected` is raised.
    pub fn simulate_disconnect(&self) {
        // ---
        tracing::info!(container = %self.inner.container_id, "sim: transport lost");
        self.inner.drop_links();
        self.inner.events_tx.send_replace(TransportEvent::Disconnected);
    }

    /// The peer sends a connection close.
    pub fn remote_close(&self) {
        self.inner.events_tx.send_replace(TransportEvent::RemoteClosed);
    }

    /// Refuse the next link open in `direction`.
    pub fn refuse_next(&self, direction: Direction) {
        self.inner.refusals.lock().push_back(direction);
    }

    /// Peer side of every sender opened on this connection, in open order.
    pub fn senders(&self) -> Vec<SimSenderPeer> {
        self.inner.senders.lock().clone()
    }

    /// Peer side of every receiver opened on this connection, in open order.
    pub fn receivers(&self) -> Vec<SimReceiverPeer> {
        self.inner.receivers.lock().clone()
    }

    /// Most recent sender opened to `address`.
    pub fn sender_at(&self, address: &str) -> Option<SimSenderPeer> {
        // ---
        self.inner
            .senders
            .lock()
            .iter()
            .rev()
            .find(|p| p.target_address().as_deref() == Some(address))
            .cloned()
    }

    /// Most recent receiver opened from `address`.
    pub fn receiver_at(&self, address: &str) -> Option<SimReceiverPeer> {
        // ---
        self.inner
            .receivers
            .lock()
            .iter()
            .rev()
            .find(|p| p.source_address().as_deref() == Some(address))
            .cloned()
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.load(Ordering::Relaxed)
    }
}

// ---

#[async_trait]
impl AmqpConnection for SimConnection {
    // ---
    fn remote_container(&self) -> String {
        self.inner.config.remote_container.clone()
    }

    fn is_disconnected(&self) -> bool {
        self.inner.is_disconnected()
    }

    fn events(&self) -> watch::Receiver<TransportEvent> {
        self.inner.events_tx.subscribe()
    }

    async fn create_session(&self) -> Result<AmqpSessionPtr> {
        // ---
        if self.inner.is_disconnected() {
            return Err(CourierError::Transport("connection is disconnected".into()));
        }
        self.inner.sessions.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(SimSession {
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn close(&self) -> Result<()> {
        // ---
        self.inner.drop_links();
        self.inner.events_tx.send_replace(TransportEvent::Disconnected);
        Ok(())
    }

    fn disconnect(&self) {
        self.simulate_disconnect();
    }
}

// ---------------------------------------------------------------------------
// SimSession
// ---------------------------------------------------------------------------

/// Session on a [`SimConnection`]. Links open immediately.
pub struct SimSession {
    inner: Arc<ConnectionInner>,
}

// ---

#[async_trait]
impl AmqpSession for SimSession {
    // ---
    async fn open_sender(&self, address: &str, options: SenderOptions) -> Result<SenderPtr> {
        // ---
        if self.inner.is_disconnected() {
            return Err(CourierError::Transport("connection is disconnected".into()));
        }
        if self.inner.take_refusal(Direction::Sender) {
            return Err(CourierError::LinkOpen(format!("peer refused sender to {address}")));
        }

        let spec = LinkSpec::new()
            .name(format!("sender-{}", Uuid::new_v4()))
            .qos(options.qos)
            .target(address);
        let broker = self
            .inner
            .config
            .routing
            .then(|| Arc::clone(&self.inner.broker));
        let (sender, peer) = SimSender::build(spec, broker, self.inner.config.initial_sender_credit);

        self.inner.senders.lock().push(peer);
        self.inner.attach_latency().await;
        tracing::debug!(address, link = %sender.name(), "sim: sender attached");
        Ok(sender)
    }

    async fn open_receiver(&self, address: &str, options: ReceiverOptions) -> Result<ReceiverPtr> {
        // ---
        if self.inner.is_disconnected() {
            return Err(CourierError::Transport("connection is disconnected".into()));
        }
        if self.inner.take_refusal(Direction::Receiver) {
            return Err(CourierError::LinkOpen(format!("peer refused receiver from {address}")));
        }

        let spec = LinkSpec::new()
            .name(format!("receiver-{}", Uuid::new_v4()))
            .qos(options.qos)
            .source(address)
            .prefetch(options.prefetch)
            .auto_accept(options.auto_accept);
        let (receiver, peer) = SimReceiver::open(spec);

        if self.inner.config.routing {
            self.inner.broker.attach(address, peer.clone());
        }
        self.inner.receivers.lock().push(peer);
        self.inner.attach_latency().await;
        tracing::debug!(address, link = %receiver.name(), "sim: receiver attached");
        Ok(receiver)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::sync::Arc;
    use std::time::Duration;

    use courier_domain::{
        AmqpConnection, Direction, LinkEndpoint, Message, OpenState, Qos, ReceiverLink,
        ReceiverOptions, SenderLink, SenderOptions, TransportEvent,
    };

    use super::SimConnection;
    use crate::broker::SimBroker;
    use crate::SimConfig;

    // ---

    fn connection(config: SimConfig) -> SimConnection {
        SimConnection::new("test-container".into(), config, Arc::new(SimBroker::new()))
    }

    // ---

    #[tokio::test]
    async fn refused_open_fails_once() {
        // ---
        let conn = connection(SimConfig::manual());
        conn.refuse_next(Direction::Receiver);
        let session = conn.create_session().await.expect("session");

        let qos = SenderOptions {
            qos: Qos::AtLeastOnce,
        };
        assert!(session.open_sender("a", qos).await.is_ok());
        assert!(session
            .open_receiver("b", ReceiverOptions::manual(Qos::AtLeastOnce))
            .await
            .is_err());
        assert!(session
            .open_receiver("b", ReceiverOptions::manual(Qos::AtLeastOnce))
            .await
            .is_ok());
        assert_eq!(conn.receivers().len(), 1);
    }

    // ---

    #[tokio::test]
    async fn disconnect_closes_links_and_raises_event() {
        // ---
        let conn = connection(SimConfig::manual());
        let mut events = conn.events();
        let session = conn.create_session().await.expect("session");
        let sender = session
            .open_sender("telemetry/t1", SenderOptions { qos: Qos::AtMostOnce })
            .await
            .expect("sender");

        conn.simulate_disconnect();
        events.changed().await.expect("event");
        assert_eq!(*events.borrow(), TransportEvent::Disconnected);
        assert_eq!(sender.open_state(), OpenState::Closed);
        assert!(conn.create_session().await.is_err());
    }

    // ---

    #[tokio::test(start_paused = true)]
    async fn link_dies_with_connection_lost_during_attach() {
        // ---
        let conn = connection(SimConfig::manual().with_attach_delay(Duration::from_millis(50)));
        let session = conn.create_session().await.expect("session");

        let (sender, _) = tokio::join!(
            session.open_sender("telemetry/t1", SenderOptions { qos: Qos::AtLeastOnce }),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                conn.simulate_disconnect();
            }
        );

        let sender = sender.expect("attach answered late");
        assert_eq!(sender.open_state(), OpenState::Closed);
    }

    // ---

    #[tokio::test]
    async fn routed_sender_reaches_receiver_on_same_address() {
        // ---
        let conn = connection(SimConfig::broker());
        let session = conn.create_session().await.expect("session");

        let receiver = session
            .open_receiver("command/t1", ReceiverOptions::manual(Qos::AtLeastOnce))
            .await
            .expect("receiver");
        receiver.flow(1);

        let sender = session
            .open_sender("command/t1", SenderOptions { qos: Qos::AtLeastOnce })
            .await
            .expect("sender");
        assert_eq!(sender.credit(), 100);

        let pending = sender.send(Message::new("ping")).expect("send");
        let outcome = pending.outcome().await.expect("outcome");
        assert!(outcome.settled);

        let (_, message) = receiver.recv().await.expect("routed");
        assert_eq!(message.body_text(), "ping");
    }
}
