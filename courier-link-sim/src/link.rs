use std::collections::VecDeque;
use std::sync::Arc;

// ---

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use uuid::Uuid;

// ---

use courier_domain::{
    // ---
    CourierError,
    Delivery,
    DeliveryPtr,
    DeliveryState,
    Disposition,
    ErrorCondition,
    LinkEndpoint,
    Message,
    OpenState,
    PendingDisposition,
    Qos,
    ReceiverLink,
    Result,
    SenderLink,
};

// ---

use super::broker::SimBroker;

// ---------------------------------------------------------------------------
// LinkSpec
// ---------------------------------------------------------------------------

/// Attach parameters for one simulated link.
///
/// Used directly by tests to fabricate client-side links, and by
/// [`super::SimSession`] for links opened through the engine traits.
#[derive(Debug, Clone)]
pub struct LinkSpec {
    // ---
    pub name: String,
    pub qos: Qos,
    pub source: Option<String>,
    pub target: Option<String>,

    /// Receivers only: credit issued on attach and replenished on each
    /// `recv`. `0` means manual flow control.
    pub prefetch: u32,

    /// Receivers only: settle each delivery `Accepted` as it is handed out.
    pub auto_accept: bool,
}

// ---

impl LinkSpec {
    // ---
    pub fn new() -> Self {
        Self {
            name: format!("sim-link-{}", Uuid::new_v4()),
            qos: Qos::AtLeastOnce,
            source: None,
            target: None,
            prefetch: 0,
            auto_accept: false,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    pub fn source(mut self, address: impl Into<String>) -> Self {
        self.source = Some(address.into());
        self
    }

    pub fn target(mut self, address: impl Into<String>) -> Self {
        self.target = Some(address.into());
        self
    }

    pub fn prefetch(mut self, prefetch: u32) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn auto_accept(mut self, auto_accept: bool) -> Self {
        self.auto_accept = auto_accept;
        self
    }
}

// ---

impl Default for LinkSpec {
    fn default() -> Self {
        Self::new()
    }
}

// ---

/// Resolves once `rx` observes [`OpenState::Closed`] (or its sender is gone).
async fn wait_closed(mut rx: watch::Receiver<OpenState>) {
    // ---
    while *rx.borrow_and_update() != OpenState::Closed {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// SimSender
// ---------------------------------------------------------------------------

struct Outgoing {
    message: Message,
    done: oneshot::Sender<Disposition>,
}

#[derive(Default)]
struct SenderState {
    // ---
    credit: u32,
    drain: bool,
    drained: u32,

    /// Accepted by `send`, waiting for credit.
    queue: VecDeque<Outgoing>,

    /// Transferred at-least-once deliveries the peer has not settled yet.
    unsettled: VecDeque<oneshot::Sender<Disposition>>,

    /// Every message put on the wire, in transfer order.
    transferred: Vec<Message>,

    condition: Option<ErrorCondition>,
}

struct SenderShared {
    // ---
    spec: LinkSpec,
    state: Mutex<SenderState>,
    open_tx: watch::Sender<OpenState>,

    /// Signalled whenever the peer issues a flow.
    flow: Notify,

    /// Set when transferred messages are routed by address.
    broker: Option<Arc<SimBroker>>,

    /// Credit the peer tops the link back up to; `0` = test controlled.
    auto_credit: u32,
}

// ---

impl SenderShared {
    // ---
    fn is_open(&self) -> bool {
        *self.open_tx.borrow() == OpenState::Open
    }

    // ---

    /// Move queued messages onto the wire while credit lasts.
    fn transfer(&self, state: &mut SenderState) {
        // ---
        while state.credit > 0 {
            let Some(out) = state.queue.pop_front() else {
                break;
            };
            state.credit -= 1;
            state.transferred.push(out.message.clone());

            let target = self.spec.target.as_deref().unwrap_or_default();
            match (self.spec.qos, &self.broker) {
                (Qos::AtMostOnce, broker) => {
                    if let Some(broker) = broker {
                        broker.route(target, out.message);
                    }
                    let _ = out.done.send(Disposition::presettled());
                }
                (Qos::AtLeastOnce, Some(broker)) => {
                    let _ = out.done.send(broker.route(target, out.message));
                }
                (Qos::AtLeastOnce, None) => state.unsettled.push_back(out.done),
            }
        }

        if self.auto_credit > 0 && state.credit < self.auto_credit / 2 {
            state.credit = self.auto_credit;
            self.flow.notify_one();
        }
    }
}

// ---

/// Local (gateway-side) end of a simulated sending link.
pub struct SimSender {
    shared: Arc<SenderShared>,
}

// ---

impl SimSender {
    // ---
    /// Open a standalone sender with a manual peer.
    pub fn open(spec: LinkSpec) -> (Arc<Self>, SimSenderPeer) {
        Self::build(spec, None, 0)
    }

    // ---

    pub(crate) fn build(
        spec: LinkSpec,
        broker: Option<Arc<SimBroker>>,
        auto_credit: u32,
    ) -> (Arc<Self>, SimSenderPeer) {
        // ---
        let (open_tx, _) = watch::channel(OpenState::Open);
        let shared = Arc::new(SenderShared {
            spec,
            state: Mutex::new(SenderState {
                credit: auto_credit,
                ..Default::default()
            }),
            open_tx,
            flow: Notify::new(),
            broker,
            auto_credit,
        });

        let peer = SimSenderPeer {
            shared: Arc::clone(&shared),
        };
        (Arc::new(Self { shared }), peer)
    }
}

// ---

#[async_trait]
impl LinkEndpoint for SimSender {
    // ---
    fn name(&self) -> &str {
        &self.shared.spec.name
    }

    fn qos(&self) -> Qos {
        self.shared.spec.qos
    }

    fn source_address(&self) -> Option<String> {
        self.shared.spec.source.clone()
    }

    fn target_address(&self) -> Option<String> {
        self.shared.spec.target.clone()
    }

    fn credit(&self) -> u32 {
        self.shared.state.lock().credit
    }

    fn queued(&self) -> u32 {
        self.shared.state.lock().queue.len() as u32
    }

    fn open_state(&self) -> OpenState {
        *self.shared.open_tx.borrow()
    }

    fn open_state_rx(&self) -> watch::Receiver<OpenState> {
        self.shared.open_tx.subscribe()
    }

    fn condition(&self) -> Option<ErrorCondition> {
        self.shared.state.lock().condition.clone()
    }

    async fn close(&self, error: Option<ErrorCondition>) -> Result<()> {
        // ---
        if self.open_state() == OpenState::Closed {
            return Ok(());
        }
        self.shared.open_tx.send_replace(OpenState::Closing);
        {
            let mut state = self.shared.state.lock();
            if error.is_some() {
                state.condition = error;
            }
            // Pending dispositions resolve as `LinkClosed`.
            state.queue.clear();
            state.unsettled.clear();
        }
        self.shared.open_tx.send_replace(OpenState::Closed);
        tracing::trace!(link = %self.shared.spec.name, "sim sender closed");
        Ok(())
    }
}

// ---

#[async_trait]
impl SenderLink for SimSender {
    // ---
    fn send(&self, message: Message) -> Result<PendingDisposition> {
        // ---
        if !self.shared.is_open() {
            return Err(CourierError::LinkClosed);
        }
        let (done, pending) = PendingDisposition::channel();
        let mut state = self.shared.state.lock();
        state.queue.push_back(Outgoing { message, done });
        self.shared.transfer(&mut state);
        Ok(pending)
    }

    fn drain_requested(&self) -> bool {
        self.shared.state.lock().drain
    }

    fn drained(&self) {
        // ---
        let mut state = self.shared.state.lock();
        if state.drain {
            state.credit = 0;
            state.drain = false;
            state.drained += 1;
        }
    }

    async fn send_queue_drained(&self) -> Result<()> {
        // ---
        let closed = wait_closed(self.shared.open_tx.subscribe());
        if !self.shared.is_open() {
            return Err(CourierError::LinkClosed);
        }
        tokio::select! {
            _ = self.shared.flow.notified() => Ok(()),
            _ = closed => Err(CourierError::LinkClosed),
        }
    }
}

// ---------------------------------------------------------------------------
// SimSenderPeer
// ---------------------------------------------------------------------------

/// Remote end of a [`SimSender`]: grants credit, requests drains, and
/// settles what the sender transferred.
#[derive(Clone)]
pub struct SimSenderPeer {
    shared: Arc<SenderShared>,
}

// ---

impl SimSenderPeer {
    // ---
    pub fn name(&self) -> &str {
        &self.shared.spec.name
    }

    pub fn target_address(&self) -> Option<String> {
        self.shared.spec.target.clone()
    }

    /// Set the sender's credit to `credit` and transfer what it allows.
    pub fn flow(&self, credit: u32) {
        // ---
        {
            let mut state = self.shared.state.lock();
            state.credit = credit;
            self.shared.transfer(&mut state);
        }
        self.shared.flow.notify_one();
    }

    /// Ask the sender to drain its credit. Signalled like a flow.
    pub fn request_drain(&self) {
        // ---
        self.shared.state.lock().drain = true;
        self.shared.flow.notify_one();
    }

    pub fn drain_requested(&self) -> bool {
        self.shared.state.lock().drain
    }

    /// Number of drain requests the sender has reported as honoured.
    pub fn drained_count(&self) -> u32 {
        self.shared.state.lock().drained
    }

    pub fn credit(&self) -> u32 {
        self.shared.state.lock().credit
    }

    pub fn queued(&self) -> u32 {
        self.shared.state.lock().queue.len() as u32
    }

    /// Every message transferred so far, in order.
    pub fn transferred(&self) -> Vec<Message> {
        self.shared.state.lock().transferred.clone()
    }

    pub fn unsettled(&self) -> usize {
        self.shared.state.lock().unsettled.len()
    }

    /// Settle the oldest unsettled delivery. `false` if there is none.
    pub fn settle_next(&self, state: DeliveryState) -> bool {
        self.update_next(Some(state), true)
    }

    /// Report an outcome for the oldest unsettled delivery.
    pub fn update_next(&self, state: Option<DeliveryState>, settled: bool) -> bool {
        // ---
        let next = self.shared.state.lock().unsettled.pop_front();
        match next {
            Some(done) => {
                let _ = done.send(Disposition { state, settled });
                true
            }
            None => false,
        }
    }

    pub fn condition(&self) -> Option<ErrorCondition> {
        self.shared.state.lock().condition.clone()
    }

    pub fn open_state(&self) -> OpenState {
        *self.shared.open_tx.borrow()
    }

    /// Peer-initiated detach.
    pub fn detach(&self) {
        // ---
        {
            let mut state = self.shared.state.lock();
            state.queue.clear();
            state.unsettled.clear();
        }
        self.shared.open_tx.send_replace(OpenState::Closed);
    }
}

// ---------------------------------------------------------------------------
// SimDelivery / DeliveryProbe
// ---------------------------------------------------------------------------

struct SimDelivery {
    outcome: Arc<watch::Sender<Option<Disposition>>>,
}

impl Delivery for SimDelivery {
    // ---
    fn disposition(&self, state: Option<DeliveryState>, settled: bool) {
        self.outcome.send_replace(Some(Disposition { state, settled }));
    }

    fn is_settled(&self) -> bool {
        self.outcome.borrow().as_ref().is_some_and(|d| d.settled)
    }
}

// ---

/// Sender-side view of one delivery pushed through a [`SimReceiverPeer`].
#[derive(Clone)]
pub struct DeliveryProbe {
    outcome: Arc<watch::Sender<Option<Disposition>>>,
}

impl DeliveryProbe {
    // ---
    /// Latest disposition reported by the receiving side, if any.
    pub fn outcome(&self) -> Option<Disposition> {
        self.outcome.borrow().clone()
    }

    /// Wait for the first reported disposition.
    pub async fn wait(&self) -> Option<Disposition> {
        // ---
        let mut rx = self.outcome.subscribe();
        let seen = rx.wait_for(Option::is_some).await.ok()?;
        (*seen).clone()
    }
}

// ---------------------------------------------------------------------------
// SimReceiver
// ---------------------------------------------------------------------------

type Inbound = (DeliveryPtr, Message);

#[derive(Default)]
struct ReceiverState {
    // ---
    credit: u32,

    /// Every flow issued by the local side, in order.
    granted: Vec<u32>,

    drain_waiter: Option<oneshot::Sender<()>>,
    condition: Option<ErrorCondition>,
}

struct ReceiverShared {
    // ---
    spec: LinkSpec,
    state: Mutex<ReceiverState>,
    open_tx: watch::Sender<OpenState>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
}

impl ReceiverShared {
    fn is_open(&self) -> bool {
        *self.open_tx.borrow() == OpenState::Open
    }
}

// ---

/// Local (gateway-side) end of a simulated receiving link.
pub struct SimReceiver {
    shared: Arc<ReceiverShared>,
}

// ---

impl SimReceiver {
    // ---
    /// Open a standalone receiver with a manual peer.
    pub fn open(spec: LinkSpec) -> (Arc<Self>, SimReceiverPeer) {
        // ---
        let (open_tx, _) = watch::channel(OpenState::Open);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ReceiverShared {
            state: Mutex::new(ReceiverState {
                credit: spec.prefetch,
                ..Default::default()
            }),
            spec,
            open_tx,
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
        });

        let peer = SimReceiverPeer {
            shared: Arc::clone(&shared),
        };
        (Arc::new(Self { shared }), peer)
    }
}

// ---

#[async_trait]
impl LinkEndpoint for SimReceiver {
    // ---
    fn name(&self) -> &str {
        &self.shared.spec.name
    }

    fn qos(&self) -> Qos {
        self.shared.spec.qos
    }

    fn source_address(&self) -> Option<String> {
        self.shared.spec.source.clone()
    }

    fn target_address(&self) -> Option<String> {
        self.shared.spec.target.clone()
    }

    fn credit(&self) -> u32 {
        self.shared.state.lock().credit
    }

    fn queued(&self) -> u32 {
        0
    }

    fn open_state(&self) -> OpenState {
        *self.shared.open_tx.borrow()
    }

    fn open_state_rx(&self) -> watch::Receiver<OpenState> {
        self.shared.open_tx.subscribe()
    }

    fn condition(&self) -> Option<ErrorCondition> {
        self.shared.state.lock().condition.clone()
    }

    async fn close(&self, error: Option<ErrorCondition>) -> Result<()> {
        // ---
        if self.open_state() == OpenState::Closed {
            return Ok(());
        }
        self.shared.open_tx.send_replace(OpenState::Closing);
        {
            let mut state = self.shared.state.lock();
            if error.is_some() {
                state.condition = error;
            }
            state.drain_waiter = None;
        }
        self.shared.open_tx.send_replace(OpenState::Closed);
        tracing::trace!(link = %self.shared.spec.name, "sim receiver closed");
        Ok(())
    }
}

// ---

#[async_trait]
impl ReceiverLink for SimReceiver {
    // ---
    fn flow(&self, credits: u32) {
        // ---
        if !self.shared.is_open() {
            return;
        }
        let mut state = self.shared.state.lock();
        state.credit = state.credit.saturating_add(credits);
        state.granted.push(credits);
    }

    async fn drain(&self) -> Result<()> {
        // ---
        if !self.shared.is_open() {
            return Err(CourierError::LinkClosed);
        }
        let (tx, rx) = oneshot::channel();
        self.shared.state.lock().drain_waiter = Some(tx);
        rx.await.map_err(|_| CourierError::LinkClosed)
    }

    async fn recv(&self) -> Option<(DeliveryPtr, Message)> {
        // ---
        if !self.shared.is_open() {
            return None;
        }
        let closed = wait_closed(self.shared.open_tx.subscribe());
        let mut inbound = self.shared.inbound_rx.lock().await;

        let (delivery, message) = tokio::select! {
            biased;
            item = inbound.recv() => item?,
            _ = closed => return None,
        };

        if self.shared.spec.auto_accept {
            delivery.accept();
        }
        if self.shared.spec.prefetch > 0 {
            let mut state = self.shared.state.lock();
            state.credit = state.credit.saturating_add(1);
        }
        Some((delivery, message))
    }
}

// ---------------------------------------------------------------------------
// SimReceiverPeer
// ---------------------------------------------------------------------------

/// Remote end of a [`SimReceiver`]: delivers messages against the issued
/// credit and answers drain requests.
#[derive(Clone)]
pub struct SimReceiverPeer {
    shared: Arc<ReceiverShared>,
}

// ---

impl SimReceiverPeer {
    // ---
    pub fn name(&self) -> &str {
        &self.shared.spec.name
    }

    pub fn source_address(&self) -> Option<String> {
        self.shared.spec.source.clone()
    }

    /// Transfer `message` to the receiver, consuming one credit.
    ///
    /// Fails with [`CourierError::LinkClosed`] on a closed link and with
    /// [`CourierError::Transport`] when no credit is available.
    pub fn deliver(&self, message: Message) -> Result<DeliveryProbe> {
        // ---
        if !self.shared.is_open() {
            return Err(CourierError::LinkClosed);
        }
        {
            let mut state = self.shared.state.lock();
            if state.credit == 0 {
                return Err(CourierError::Transport(format!(
                    "receiver {} has no credit",
                    self.shared.spec.name
                )));
            }
            state.credit -= 1;
        }

        let initial = match self.shared.spec.qos {
            Qos::AtMostOnce => Some(Disposition::presettled()),
            Qos::AtLeastOnce => None,
        };
        let (outcome, _) = watch::channel(initial);
        let outcome = Arc::new(outcome);

        let delivery = SimDelivery {
            outcome: Arc::clone(&outcome),
        };
        self.shared
            .inbound_tx
            .send((Box::new(delivery), message))
            .map_err(|_| CourierError::LinkClosed)?;

        Ok(DeliveryProbe { outcome })
    }

    pub fn credit(&self) -> u32 {
        self.shared.state.lock().credit
    }

    /// Every flow the receiver has issued, in order.
    pub fn granted(&self) -> Vec<u32> {
        self.shared.state.lock().granted.clone()
    }

    pub fn drain_requested(&self) -> bool {
        self.shared.state.lock().drain_waiter.is_some()
    }

    /// Consume the remaining credit and complete a pending drain.
    /// Returns `false` if no drain was pending.
    pub fn complete_drain(&self) -> bool {
        // ---
        let waiter = {
            let mut state = self.shared.state.lock();
            state.credit = 0;
            state.drain_waiter.take()
        };
        match waiter {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub fn condition(&self) -> Option<ErrorCondition> {
        self.shared.state.lock().condition.clone()
    }

    pub fn open_state(&self) -> OpenState {
        *self.shared.open_tx.borrow()
    }

    /// Peer-initiated detach.
    pub fn detach(&self) {
        // ---
        self.shared.state.lock().drain_waiter = None;
        self.shared.open_tx.send_replace(OpenState::Closed);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
