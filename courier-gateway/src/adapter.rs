//! [`ForwardingAdapter`] - pairs client links with downstream links and
//! moves messages between them.
//!
//! One type serves both directions:
//!
//! | direction              | client link | paired downstream link          |
//! |------------------------|-------------|---------------------------------|
//! | `UpstreamToDownstream` | receiver    | sender to the client's target   |
//! | `DownstreamToUpstream` | sender      | receiver from the client's source |
//!
//! Addresses are translated to the downstream form (`/` replaced by the
//! configured path separator) before the paired link is opened. Each
//! pairing gets a [`FlowBridge`]; downstream-to-upstream pairings also get
//! a pump task that feeds the paired receiver into
//! [`ForwardingAdapter::process_message`].

use std::sync::{Arc, Weak};

// ---

use tokio::sync::{oneshot, watch};

// ---

use courier_domain::{
    // ---
    ConnectionId,
    CourierError,
    DeliveryPtr,
    Direction,
    ErrorCondition,
    LinkHandle,
    LinkId,
    Message,
    OpenState,
    PendingDisposition,
    Qos,
    ReceiverOptions,
    ReceiverPtr,
    Result,
};

// ---

use super::connection_manager::ConnectionManagerPtr;
use super::flow::{FlowBridge, TaskGuard};
use super::forwarding_link::ForwardingLink;
use super::link_factory;
use super::registry::LinkRegistry;

// ---------------------------------------------------------------------------
// ForwardingDirection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingDirection {
    // ---
    /// Devices send; the gateway forwards to the downstream container.
    UpstreamToDownstream,

    /// The downstream container sends; the gateway forwards to devices.
    DownstreamToUpstream,
}

// ---

impl ForwardingDirection {
    // ---
    /// Direction of the client link this adapter accepts.
    pub fn client_direction(self) -> Direction {
        match self {
            ForwardingDirection::UpstreamToDownstream => Direction::Receiver,
            ForwardingDirection::DownstreamToUpstream => Direction::Sender,
        }
    }

    /// Direction of the downstream link opened for each client.
    pub fn paired_direction(self) -> Direction {
        match self {
            ForwardingDirection::UpstreamToDownstream => Direction::Sender,
            ForwardingDirection::DownstreamToUpstream => Direction::Receiver,
        }
    }
}

// ---------------------------------------------------------------------------
// ForwardingAdapter
// ---------------------------------------------------------------------------

pub struct ForwardingAdapter {
    // ---
    direction: ForwardingDirection,

    /// QoS of every downstream link this adapter opens.
    qos: Qos,

    connections: ConnectionManagerPtr,
    registry: Arc<LinkRegistry>,
}

// ---

impl ForwardingAdapter {
    // ---
    /// Create an adapter. The registry is registered with `connections` so
    /// it forgets every paired link when the downstream connection is lost.
    pub fn new(
        direction: ForwardingDirection,
        qos: Qos,
        connections: ConnectionManagerPtr,
        registry: Arc<LinkRegistry>,
    ) -> Arc<Self> {
        // ---
        connections.on_disconnect(registry.clone());
        Arc::new(Self {
            direction,
            qos,
            connections,
            registry,
        })
    }

    // ---

    pub fn direction(&self) -> ForwardingDirection {
        self.direction
    }

    pub fn registry(&self) -> &Arc<LinkRegistry> {
        &self.registry
    }

    // ---

    /// Pair a newly attached client link with a downstream link.
    ///
    /// Reuses the paired link if an open one is already registered for the
    /// client id; a closed one is evicted and replaced. Otherwise fails with
    /// [`CourierError::NotConnected`] while there is no downstream
    /// connection and with [`CourierError::InvalidPairing`] for a client
    /// link of the wrong direction, before anything is opened.
    ///
    /// The id stays reserved while the paired link is opened. If the
    /// downstream connection is lost in the meantime the attach fails with
    /// [`CourierError::NotConnected`]; if the client detaches or its
    /// connection goes away it fails with [`CourierError::LinkClosed`]. In
    /// both cases the new link is closed and nothing is registered.
    pub async fn on_client_attach(self: &Arc<Self>, client: &ForwardingLink) -> Result<()> {
        // ---
        if let Some(existing) = self.registry.get(client.id()) {
            if existing.is_open() {
                tracing::debug!(link = %client.id(), "reusing existing downstream link");
                return Ok(());
            }
            tracing::debug!(link = %client.id(), "evicting closed downstream link");
            self.on_client_detach(client).await;
        }

        let generation = self.connections.generation();
        let reservation = self
            .registry
            .reserve(client.id(), client.connection_id())
            .ok_or_else(|| CourierError::AttachInProgress(client.id().to_string()))?;

        let conn = self.connections.current_connection()?;
        FlowBridge::check(client.direction(), self.direction.paired_direction())?;

        let address = client
            .address()
            .ok_or_else(|| CourierError::MissingAddress(client.id().to_string()))?;
        let address = self.connections.config().translate_address(&address);

        let opened = match self.direction {
            ForwardingDirection::UpstreamToDownstream => {
                link_factory::open_sender(&conn, &address, self.qos)
                    .await
                    .map(LinkHandle::Sender)
            }
            ForwardingDirection::DownstreamToUpstream => {
                link_factory::open_receiver(&conn, &address, ReceiverOptions::manual(self.qos))
                    .await
                    .map(LinkHandle::Receiver)
            }
        };
        let paired = match opened {
            Ok(paired) => paired,
            Err(e) if self.connections.generation() != generation => {
                tracing::debug!(link = %client.id(), "open failed on lost connection: {e}");
                return Err(CourierError::NotConnected);
            }
            Err(e) => return Err(e),
        };

        let drain_timeout = self.connections.config().drain_timeout();
        let bridge = match FlowBridge::pair(client.link(), &paired, drain_timeout) {
            Ok(bridge) => bridge,
            Err(e) => {
                let _ = paired.close(None).await;
                return Err(e);
            }
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        let mut tasks = vec![bridge.install()];
        if let LinkHandle::Receiver(receiver) = &paired {
            tasks.push(self.spawn_pump(client.clone(), Arc::clone(receiver), ready_rx));
        }

        let forwarding =
            ForwardingLink::new(client.id().clone(), client.connection_id().clone(), paired)
                .with_tasks(tasks);
        let direction = forwarding.direction();

        if let Err(stale) = reservation.commit(forwarding) {
            let err = if self.connections.generation() != generation {
                CourierError::NotConnected
            } else {
                CourierError::LinkClosed
            };
            tracing::info!(link = %client.id(), con = %client.connection_id(), "attach overtaken: {err}");
            let _ = stale.close(None).await;
            return Err(err);
        }
        let _ = ready_tx.send(());

        tracing::info!(
            link = %client.id(),
            con = %client.connection_id(),
            %address,
            "created downstream {direction} for client link"
        );
        Ok(())
    }

    // ---

    /// Forward one message that arrived for `client`.
    ///
    /// The message goes to the paired link (upstream to downstream) or to
    /// the client link itself (downstream to upstream). Without an open
    /// paired link the client is closed with the "no downstream consumer"
    /// condition and the message is dropped.
    ///
    /// Enqueueing is synchronous; the remote outcome is relayed onto
    /// `delivery` from a separate task.
    pub async fn process_message(
        &self,
        client: &ForwardingLink,
        delivery: DeliveryPtr,
        message: Message,
    ) -> Result<()> {
        // ---
        let Some(paired) = self.registry.get(client.id()) else {
            tracing::warn!(link = %client.id(), con = %client.connection_id(), "no downstream link for client, closing it");
            self.reject(client).await;
            return Err(CourierError::NoDownstreamConsumer(client.id().to_string()));
        };

        if !paired.is_open() {
            tracing::warn!(link = %client.id(), con = %client.connection_id(), "downstream link is closed, closing client");
            self.reject(client).await;
            self.on_client_detach(client).await;
            return Err(CourierError::NoDownstreamConsumer(client.id().to_string()));
        }

        let target = match self.direction {
            ForwardingDirection::UpstreamToDownstream => paired.link().as_sender(),
            ForwardingDirection::DownstreamToUpstream => client.link().as_sender(),
        }
        .ok_or(CourierError::InvalidPairing(Direction::Receiver))?;

        let pending = target.send(message)?;
        tracing::trace!(link = %client.id(), "forwarded message");

        tokio::spawn(relay_disposition(client.id().clone(), pending, delivery));
        Ok(())
    }

    // ---

    /// Drop the pairing of a detached client link and close the paired link.
    pub async fn on_client_detach(&self, client: &ForwardingLink) {
        // ---
        let Some(paired) = self.registry.remove(client.id()) else {
            return;
        };
        if let Err(e) = paired.close(None).await {
            tracing::debug!(link = %client.id(), "closing downstream link failed: {e}");
        }
        tracing::info!(link = %client.id(), con = %client.connection_id(), "closed downstream link for detached client");
    }

    // ---

    /// Close every paired link of a client connection that went away.
    /// Returns how many links were closed.
    pub async fn on_client_disconnect(&self, connection_id: &ConnectionId) -> usize {
        // ---
        let links = self.registry.remove_all(connection_id);
        for link in &links {
            if let Err(e) = link.close(None).await {
                tracing::debug!(link = %link.id(), "closing downstream link failed: {e}");
            }
        }
        if !links.is_empty() {
            tracing::info!(con = %connection_id, links = links.len(), "closed downstream links of disconnected client");
        }
        links.len()
    }

    // ---

    /// Serve one client link until it ends.
    ///
    /// Attaches it, then, for a receiving client, feeds every delivery into
    /// [`Self::process_message`]; a sending client is served by the pump
    /// and only watched for closure. Detaches when the link is done. A
    /// failed attach closes the client link with the error.
    pub async fn serve_client(self: &Arc<Self>, client: ForwardingLink) -> Result<()> {
        // ---
        if let Err(e) = self.on_client_attach(&client).await {
            tracing::warn!(link = %client.id(), "cannot attach client link: {e}");
            let condition = ErrorCondition::new("courier:attach-failed", e.to_string());
            let _ = client.close(Some(condition)).await;
            return Err(e);
        }

        match client.link() {
            LinkHandle::Receiver(receiver) => {
                while let Some((delivery, message)) = receiver.recv().await {
                    if let Err(e) = self.process_message(&client, delivery, message).await {
                        tracing::debug!(link = %client.id(), "stopped serving client: {e}");
                        break;
                    }
                }
            }
            LinkHandle::Sender(sender) => wait_closed(sender.open_state_rx()).await,
        }

        self.on_client_detach(&client).await;
        Ok(())
    }

    // ---

    /// Forget and close every paired link.
    pub async fn shutdown(&self) {
        // ---
        for link in self.registry.clear() {
            let _ = link.close(None).await;
        }
    }

    // ---

    async fn reject(&self, client: &ForwardingLink) {
        // ---
        if let Err(e) = client
            .close(Some(ErrorCondition::no_downstream_consumer()))
            .await
        {
            tracing::debug!(link = %client.id(), "closing client link failed: {e}");
        }
    }

    // ---

    /// Feed deliveries from the paired receiver to the client, once the
    /// pairing is registered.
    fn spawn_pump(
        self: &Arc<Self>,
        client: ForwardingLink,
        receiver: ReceiverPtr,
        ready: oneshot::Receiver<()>,
    ) -> TaskGuard {
        // ---
        let adapter: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            if ready.await.is_err() {
                return;
            }
            while let Some((delivery, message)) = receiver.recv().await {
                let Some(adapter) = adapter.upgrade() else {
                    break;
                };
                if let Err(e) = adapter.process_message(&client, delivery, message).await {
                    tracing::debug!(link = %client.id(), "pump stopped: {e}");
                    break;
                }
            }
            tracing::debug!(link = %client.id(), "downstream receiver ended");
        });
        TaskGuard::new(handle)
    }
}

// ---

async fn relay_disposition(link: LinkId, pending: PendingDisposition, delivery: DeliveryPtr) {
    // ---
    match pending.outcome().await {
        Ok(disposition) => {
            tracing::trace!(%link, state = ?disposition.state, settled = disposition.settled, "relaying disposition");
            delivery.disposition(disposition.state, disposition.settled);
        }
        Err(e) => tracing::debug!(%link, "no disposition to relay: {e}"),
    }
}

async fn wait_closed(mut rx: watch::Receiver<OpenState>) {
    // ---
    while *rx.borrow_and_update() != OpenState::Closed {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
