use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};

use super::error::{CourierError, Result};
use super::message::{DeliveryState, Disposition, ErrorCondition, Message};
use super::types::{Direction, OpenState, Qos};

// ---------------------------------------------------------------------------
// LinkEndpoint
// ---------------------------------------------------------------------------

/// Capabilities shared by both ends of a protocol link.
///
/// Implemented by the AMQP engine; the forwarding core only ever talks to
/// links through this trait and its two refinements [`SenderLink`] and
/// [`ReceiverLink`].
#[async_trait]
pub trait LinkEndpoint: Send + Sync {
    // ---
    /// Link name as negotiated on attach.
    fn name(&self) -> &str;

    fn qos(&self) -> Qos;

    fn source_address(&self) -> Option<String>;

    fn target_address(&self) -> Option<String>;

    /// Credit currently available on the link.
    ///
    /// For a sender this is what the peer has granted; for a receiver it is
    /// what this side has issued and the peer has not yet consumed.
    fn credit(&self) -> u32;

    /// Messages accepted by `send` but not yet transferred (sender only;
    /// receivers report `0`).
    fn queued(&self) -> u32;

    fn open_state(&self) -> OpenState;

    /// Subscribe to open-state transitions.
    fn open_state_rx(&self) -> watch::Receiver<OpenState>;

    fn is_open(&self) -> bool {
        self.open_state() == OpenState::Open
    }

    /// Error condition set locally when the link was closed, if any.
    fn condition(&self) -> Option<ErrorCondition>;

    /// Close the link, optionally with an error condition for the peer.
    ///
    /// Closing an already closed link is a no-op.
    async fn close(&self, error: Option<ErrorCondition>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// SenderLink
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SenderLink: LinkEndpoint {
    // ---
    /// Queue `message` for transfer.
    ///
    /// Enqueueing is synchronous so successive calls keep their order on
    /// the wire. The returned handle resolves once the peer's disposition
    /// (or, for at-most-once links, local settlement) is known.
    fn send(&self, message: Message) -> Result<PendingDisposition>;

    /// `true` while the peer has asked this sender to drain its credit.
    fn drain_requested(&self) -> bool;

    /// Report to the peer that the drain request has been honoured;
    /// remaining credit is consumed.
    fn drained(&self);

    /// Wait until the link can accept more messages (the peer issued a
    /// flow). Fails with [`CourierError::LinkClosed`] once the link closes.
    async fn send_queue_drained(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// ReceiverLink
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ReceiverLink: LinkEndpoint {
    // ---
    /// Issue `credits` additional credits to the peer sender.
    fn flow(&self, credits: u32);

    /// Ask the peer to drain its credit and wait until it has done so.
    ///
    /// No timeout is applied here; callers bound the wait themselves.
    async fn drain(&self) -> Result<()>;

    /// Next inbound delivery, or `None` once the link is closed.
    async fn recv(&self) -> Option<(DeliveryPtr, Message)>;
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Handle for settling one inbound delivery with the peer that sent it.
pub trait Delivery: Send + Sync {
    // ---
    /// Update the delivery's state and settlement with the remote sender.
    fn disposition(&self, state: Option<DeliveryState>, settled: bool);

    fn is_settled(&self) -> bool;

    fn accept(&self) {
        self.disposition(Some(DeliveryState::Accepted), true);
    }
}

// ---

pub type DeliveryPtr = Box<dyn Delivery>;
pub type SenderPtr = Arc<dyn SenderLink>;
pub type ReceiverPtr = Arc<dyn ReceiverLink>;

// ---------------------------------------------------------------------------
// PendingDisposition
// ---------------------------------------------------------------------------

/// Completion handle returned by [`SenderLink::send`].
#[derive(Debug)]
pub struct PendingDisposition {
    // ---
    rx: oneshot::Receiver<Disposition>,
}

// ---

impl PendingDisposition {
    // ---
    /// Create a handle plus the sender half the engine completes.
    pub fn channel() -> (oneshot::Sender<Disposition>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// A handle that is already complete.
    pub fn ready(disposition: Disposition) -> Self {
        let (tx, pending) = Self::channel();
        let _ = tx.send(disposition);
        pending
    }

    /// Wait for the outcome. Fails with [`CourierError::LinkClosed`] if
    /// the link went away before the peer reported one.
    pub async fn outcome(self) -> Result<Disposition> {
        self.rx.await.map_err(|_| CourierError::LinkClosed)
    }
}

// ---------------------------------------------------------------------------
// LinkHandle
// ---------------------------------------------------------------------------

/// Either end of a link, tagged by direction.
///
/// Code that needs directionality matches on the variant; everything else
/// goes through the delegating accessors below.
#[derive(Clone)]
pub enum LinkHandle {
    Sender(SenderPtr),
    Receiver(ReceiverPtr),
}

// ---

impl LinkHandle {
    // ---
    pub fn direction(&self) -> Direction {
        match self {
            LinkHandle::Sender(_) => Direction::Sender,
            LinkHandle::Receiver(_) => Direction::Receiver,
        }
    }

    pub fn as_sender(&self) -> Option<&SenderPtr> {
        match self {
            LinkHandle::Sender(s) => Some(s),
            LinkHandle::Receiver(_) => None,
        }
    }

    pub fn as_receiver(&self) -> Option<&ReceiverPtr> {
        match self {
            LinkHandle::Receiver(r) => Some(r),
            LinkHandle::Sender(_) => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            LinkHandle::Sender(s) => s.name(),
            LinkHandle::Receiver(r) => r.name(),
        }
    }

    pub fn qos(&self) -> Qos {
        match self {
            LinkHandle::Sender(s) => s.qos(),
            LinkHandle::Receiver(r) => r.qos(),
        }
    }

    pub fn source_address(&self) -> Option<String> {
        match self {
            LinkHandle::Sender(s) => s.source_address(),
            LinkHandle::Receiver(r) => r.source_address(),
        }
    }

    pub fn target_address(&self) -> Option<String> {
        match self {
            LinkHandle::Sender(s) => s.target_address(),
            LinkHandle::Receiver(r) => r.target_address(),
        }
    }

    pub fn credit(&self) -> u32 {
        match self {
            LinkHandle::Sender(s) => s.credit(),
            LinkHandle::Receiver(r) => r.credit(),
        }
    }

    pub fn queued(&self) -> u32 {
        match self {
            LinkHandle::Sender(s) => s.queued(),
            LinkHandle::Receiver(r) => r.queued(),
        }
    }

    pub fn open_state(&self) -> OpenState {
        match self {
            LinkHandle::Sender(s) => s.open_state(),
            LinkHandle::Receiver(r) => r.open_state(),
        }
    }

    pub fn open_state_rx(&self) -> watch::Receiver<OpenState> {
        match self {
            LinkHandle::Sender(s) => s.open_state_rx(),
            LinkHandle::Receiver(r) => r.open_state_rx(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open_state() == OpenState::Open
    }

    pub async fn close(&self, error: Option<ErrorCondition>) -> Result<()> {
        match self {
            LinkHandle::Sender(s) => s.close(error).await,
            LinkHandle::Receiver(r) => r.close(error).await,
        }
    }
}

// ---

impl fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        f.debug_struct("LinkHandle")
            .field("direction", &self.direction())
            .field("name", &self.name())
            .field("state", &self.open_state())
            .field("credit", &self.credit())
            .field("queued", &self.queued())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::PendingDisposition;
    use crate::{CourierError, Disposition};

    #[tokio::test]
    async fn ready_handle_resolves_immediately() {
        let outcome = PendingDisposition::ready(Disposition::accepted()).outcome().await;
        assert_eq!(outcome.expect("outcome"), Disposition::accepted());
    }

    #[tokio::test]
    async fn dropped_sender_means_link_closed() {
        // ---
        let (tx, pending) = PendingDisposition::channel();
        drop(tx);
        let err = pending.outcome().await.err().expect("closed");
        assert!(matches!(err, CourierError::LinkClosed));
    }
}
