use std::collections::HashMap;

// ---

use parking_lot::Mutex;

// ---

use courier_domain::{Disposition, Message, OpenState};

// ---

use super::link::SimReceiverPeer;

// ---------------------------------------------------------------------------
// SimBroker
// ---------------------------------------------------------------------------

/// Address router shared by every connection of one [`super::SimConnector`].
///
/// A message transferred by a routed sender is handed to the first open
/// receiver attached at the same address that has credit. The sender sees
/// `Accepted` if someone took it and `Released` otherwise. Nothing is
/// buffered.
#[derive(Default)]
pub struct SimBroker {
    // ---
    receivers: Mutex<HashMap<String, Vec<SimReceiverPeer>>>,
}

// ---

impl SimBroker {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    // ---

    pub(crate) fn attach(&self, address: &str, peer: SimReceiverPeer) {
        // ---
        self.receivers
            .lock()
            .entry(address.to_string())
            .or_default()
            .push(peer);
    }

    // ---

    /// Route `message` to a receiver at `address`.
    pub fn route(&self, address: &str, message: Message) -> Disposition {
        // ---
        let mut receivers = self.receivers.lock();
        let Some(peers) = receivers.get_mut(address) else {
            tracing::debug!(address, "sim broker: no receiver attached, releasing");
            return Disposition::released();
        };
        peers.retain(|p| p.open_state() != OpenState::Closed);

        for peer in peers.iter() {
            if peer.credit() > 0 && peer.deliver(message.clone()).is_ok() {
                return Disposition::accepted();
            }
        }

        tracing::debug!(address, "sim broker: no receiver with credit, releasing");
        Disposition::released()
    }

    // ---

    /// Open receivers currently attached at `address`.
    pub fn receivers_at(&self, address: &str) -> usize {
        // ---
        self.receivers.lock().get(address).map_or(0, |peers| {
            peers
                .iter()
                .filter(|p| p.open_state() != OpenState::Closed)
                .count()
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use courier_domain::{DeliveryState, Message, ReceiverLink};

    use super::SimBroker;
    use crate::link::{LinkSpec, SimReceiver};

    // ---

    #[tokio::test]
    async fn routes_to_receiver_with_credit() {
        // ---
        let broker = SimBroker::new();
        let (receiver, peer) = SimReceiver::open(LinkSpec::new().source("command/t1"));
        broker.attach("command/t1", peer);

        let released = broker.route("command/t1", Message::new("early"));
        assert_eq!(released.state, Some(DeliveryState::Released));

        receiver.flow(1);
        let accepted = broker.route("command/t1", Message::new("go"));
        assert_eq!(accepted.state, Some(DeliveryState::Accepted));

        let (_, message) = receiver.recv().await.expect("routed message");
        assert_eq!(message.body_text(), "go");
        assert_eq!(broker.receivers_at("command/t1"), 1);
        assert_eq!(broker.receivers_at("elsewhere"), 0);
    }
}
