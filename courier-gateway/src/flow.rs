//! Credit bridge between an upstream link and its paired downstream link.
//!
//! Of the two legs of a pairing one is a sender and one is a receiver. The
//! sender leg's peer decides how fast messages may flow; every time it
//! issues a flow the bridge mirrors the sender's spare capacity onto the
//! receiver leg as fresh credit:
//!
//! ```text
//!   available = sender.credit - sender.queued      (floored at 0)
//!   drain requested  →  receiver.drain() (bounded) →  sender.drained()
//!   otherwise        →  receiver.flow(available)    (skipped when 0)
//! ```
//!
//! A stalled sender therefore stops upstream credit at the source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---

use tokio::sync::watch;
use tokio::task::JoinHandle;

// ---

use courier_domain::{
    // ---
    CourierError,
    Direction,
    LinkHandle,
    OpenState,
    ReceiverPtr,
    Result,
    SenderPtr,
};

// ---------------------------------------------------------------------------
// TaskGuard
// ---------------------------------------------------------------------------

/// Aborts the wrapped task when dropped.
#[derive(Debug)]
pub struct TaskGuard(JoinHandle<()>);

impl TaskGuard {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self(handle)
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// ---------------------------------------------------------------------------
// available_credit
// ---------------------------------------------------------------------------

/// Credit the receiver leg may be granted for a sender with the given
/// counters. Negative values are floored at zero.
pub fn available_credit(credit: u32, queued: u32) -> u32 {
    // ---
    let available = i64::from(credit) - i64::from(queued);
    if available < 0 {
        tracing::debug!(
            credit,
            queued,
            "sender has more queued than credit; granting none"
        );
        return 0;
    }
    available as u32
}

// ---------------------------------------------------------------------------
// FlowBridge
// ---------------------------------------------------------------------------

pub struct FlowBridge {
    // ---
    sender: SenderPtr,
    receiver: ReceiverPtr,
    drain_timeout: Duration,

    /// Set while a forwarded drain is outstanding.
    draining: Arc<AtomicBool>,
}

// ---

impl FlowBridge {
    // ---
    /// Check that links of directions `a` and `b` can share flow control.
    pub fn check(a: Direction, b: Direction) -> Result<()> {
        // ---
        if a == b {
            return Err(CourierError::InvalidPairing(a));
        }
        Ok(())
    }

    // ---

    /// Pair two links in either order. Fails with
    /// [`CourierError::InvalidPairing`] for two links of one direction.
    pub fn pair(a: &LinkHandle, b: &LinkHandle, drain_timeout: Duration) -> Result<Self> {
        // ---
        match (a, b) {
            (LinkHandle::Sender(sender), LinkHandle::Receiver(receiver))
            | (LinkHandle::Receiver(receiver), LinkHandle::Sender(sender)) => Ok(Self {
                sender: Arc::clone(sender),
                receiver: Arc::clone(receiver),
                drain_timeout,
                draining: Arc::new(AtomicBool::new(false)),
            }),
            (LinkHandle::Sender(_), LinkHandle::Sender(_)) => {
                Err(CourierError::InvalidPairing(Direction::Sender))
            }
            (LinkHandle::Receiver(_), LinkHandle::Receiver(_)) => {
                Err(CourierError::InvalidPairing(Direction::Receiver))
            }
        }
    }

    // ---

    /// Propagate the sender leg's current state to the receiver leg once.
    ///
    /// A drain is forwarded on a separate task so a slow peer does not hold
    /// up further flow events.
    pub fn handle_flow(&self) {
        // ---
        if self.sender.drain_requested() {
            self.forward_drain();
            return;
        }

        let credits = available_credit(self.sender.credit(), self.sender.queued());
        if credits == 0 {
            tracing::trace!(sender = %self.sender.name(), "no spare credit to forward");
            return;
        }
        tracing::trace!(
            sender = %self.sender.name(),
            receiver = %self.receiver.name(),
            credits,
            "forwarding credit"
        );
        self.receiver.flow(credits);
    }

    // ---

    fn forward_drain(&self) {
        // ---
        if self.draining.swap(true, Ordering::SeqCst) {
            tracing::trace!(sender = %self.sender.name(), "drain already in progress");
            return;
        }

        let sender = Arc::clone(&self.sender);
        let receiver = Arc::clone(&self.receiver);
        let draining = Arc::clone(&self.draining);
        let timeout = self.drain_timeout;

        tracing::debug!(receiver = %receiver.name(), "forwarding drain request");
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, receiver.drain()).await {
                Ok(Ok(())) => {
                    sender.drained();
                    tracing::debug!(sender = %sender.name(), "drain completed");
                }
                Ok(Err(e)) => {
                    tracing::debug!(receiver = %receiver.name(), "drain abandoned: {e}");
                }
                Err(_) => {
                    tracing::warn!(
                        receiver = %receiver.name(),
                        timeout_ms = timeout.as_millis() as u64,
                        "{}",
                        CourierError::DrainTimeout
                    );
                }
            }
            draining.store(false, Ordering::SeqCst);
        });
    }

    // ---

    /// Start mirroring flow events. The task ends when either leg closes;
    /// dropping the returned guard stops it early.
    pub fn install(self) -> TaskGuard {
        // ---
        let handle = tokio::spawn(async move {
            let mut receiver_state = self.receiver.open_state_rx();

            // Credit granted before the bridge existed.
            self.handle_flow();

            loop {
                tokio::select! {
                    res = self.sender.send_queue_drained() => match res {
                        Ok(()) => self.handle_flow(),
                        Err(_) => break,
                    },
                    _ = closed(&mut receiver_state) => break,
                }
            }
            tracing::debug!(
                sender = %self.sender.name(),
                receiver = %self.receiver.name(),
                "flow bridge finished"
            );
        });
        TaskGuard::new(handle)
    }
}

// ---

async fn closed(rx: &mut watch::Receiver<OpenState>) {
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

#[cfg(test)]
mod tests {
    // ---
    use std::time::Duration;

    use courier_domain::{CourierError, Direction, LinkEndpoint, LinkHandle, Message, SenderLink};
    use courier_link_sim::{LinkSpec, SimReceiver, SimSender};

    use super::{available_credit, FlowBridge};

    // ---

    const DRAIN: Duration = Duration::from_secs(10);

    // ---

    #[test]
    fn available_credit_is_floored_at_zero() {
        assert_eq!(available_credit(5, 2), 3);
        assert_eq!(available_credit(5, 5), 0);
        assert_eq!(available_credit(0, 3), 0);
        assert_eq!(available_credit(u32::MAX, 0), u32::MAX);
    }

    // ---

    #[test]
    fn same_direction_links_cannot_be_paired() {
        // ---
        let (a, _) = SimSender::open(LinkSpec::new());
        let (b, _) = SimSender::open(LinkSpec::new());
        let err = FlowBridge::pair(&LinkHandle::Sender(a), &LinkHandle::Sender(b), DRAIN)
            .err()
            .expect("two senders");
        assert!(matches!(
            err,
            CourierError::InvalidPairing(Direction::Sender)
        ));

        let (c, _) = SimReceiver::open(LinkSpec::new());
        let (d, _) = SimReceiver::open(LinkSpec::new());
        let err = FlowBridge::pair(&LinkHandle::Receiver(c), &LinkHandle::Receiver(d), DRAIN)
            .err()
            .expect("two receivers");
        assert!(matches!(
            err,
            CourierError::InvalidPairing(Direction::Receiver)
        ));

        assert!(FlowBridge::check(Direction::Receiver, Direction::Sender).is_ok());
    }

    // ---

    #[tokio::test]
    async fn flow_grants_spare_sender_credit() {
        // ---
        let (sender, sender_peer) = SimSender::open(LinkSpec::new());
        let (receiver, receiver_peer) = SimReceiver::open(LinkSpec::new());
        let bridge = FlowBridge::pair(
            &LinkHandle::Receiver(receiver.clone()),
            &LinkHandle::Sender(sender.clone()),
            DRAIN,
        )
        .expect("valid pair");

        // Two messages wait for credit; five arrive, three remain spare.
        sender.send(Message::new("a")).expect("send");
        sender.send(Message::new("b")).expect("send");
        sender_peer.flow(5);
        bridge.handle_flow();
        assert_eq!(receiver_peer.granted(), vec![3]);

        // No credit and a backlog: nothing is granted.
        sender_peer.flow(0);
        sender.send(Message::new("c")).expect("send");
        bridge.handle_flow();
        assert_eq!(receiver_peer.granted(), vec![3]);
        assert_eq!(receiver.credit(), 3);
    }

    // ---

    #[tokio::test]
    async fn installed_bridge_ends_when_receiver_closes() {
        // ---
        let (sender, _sender_peer) = SimSender::open(LinkSpec::new());
        let (receiver, _) = SimReceiver::open(LinkSpec::new());
        let guard = FlowBridge::pair(
            &LinkHandle::Sender(sender),
            &LinkHandle::Receiver(receiver.clone()),
            DRAIN,
        )
        .expect("valid pair")
        .install();

        receiver.close(None).await.expect("close");
        tokio::time::timeout(Duration::from_secs(1), async {
            while !guard.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("bridge task finished");
    }

    // ---

    #[tokio::test(start_paused = true)]
    async fn unanswered_drain_is_abandoned() {
        // ---
        let (sender, sender_peer) = SimSender::open(LinkSpec::new());
        let (receiver, receiver_peer) = SimReceiver::open(LinkSpec::new());
        let bridge = FlowBridge::pair(
            &LinkHandle::Sender(sender.clone()),
            &LinkHandle::Receiver(receiver.clone()),
            Duration::from_millis(500),
        )
        .expect("valid pair");

        sender_peer.request_drain();
        bridge.handle_flow();
        tokio::task::yield_now().await;
        assert!(receiver_peer.drain_requested());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(sender_peer.drained_count(), 0);
        assert!(sender_peer.drain_requested());
    }
}
