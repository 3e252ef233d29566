use std::collections::HashMap;
use std::time::Duration;

// ---

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

// ---

use courier_domain::{CourierError, Message, Result};

// ---

use super::ReplyHandler;

// ---------------------------------------------------------------------------
// Continuation
// ---------------------------------------------------------------------------

/// What happens with the reply to one request.
pub(crate) enum Continuation {
    // ---
    Callback(ReplyHandler),
    Waiter(oneshot::Sender<Message>),
}

struct Pending {
    continuation: Continuation,
    deadline: Instant,
}

// ---------------------------------------------------------------------------
// PendingRequests
// ---------------------------------------------------------------------------

/// Outstanding requests keyed by message id.
///
/// A reply is matched by its correlation id. Each entry is dispatched at
/// most once; entries past their deadline are dropped the next time the
/// map is touched and replies arriving for them are discarded.
pub(crate) struct PendingRequests {
    // ---
    entries: Mutex<HashMap<String, Pending>>,
    timeout: Duration,
}

// ---

impl PendingRequests {
    // ---
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    // ---

    /// Start tracking `id`. Fails if a live request already uses it.
    pub(crate) fn track(&self, id: &str, continuation: Continuation) -> Result<()> {
        // ---
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::purge(&mut entries, now);

        if entries.contains_key(id) {
            return Err(CourierError::DuplicateRequest(id.to_string()));
        }
        entries.insert(
            id.to_string(),
            Pending {
                continuation,
                deadline: now + self.timeout,
            },
        );
        Ok(())
    }

    // ---

    /// Hand `reply` to its request. Returns `false` if it matched nothing.
    pub(crate) fn dispatch(&self, reply: Message) -> bool {
        // ---
        let Some(id) = reply.correlation_id.clone() else {
            tracing::debug!("discarding reply without correlation id");
            return false;
        };

        let now = Instant::now();
        let pending = {
            let mut entries = self.entries.lock();
            Self::purge(&mut entries, now);
            entries.remove(&id)
        };

        let Some(pending) = pending else {
            tracing::debug!(correlation_id = %id, "discarding reply with no pending request");
            return false;
        };

        match pending.continuation {
            Continuation::Callback(on_reply) => {
                on_reply(reply);
                true
            }
            Continuation::Waiter(tx) => tx.send(reply).is_ok(),
        }
    }

    // ---

    pub(crate) fn cancel(&self, id: &str) -> bool {
        self.entries.lock().remove(id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    // ---

    fn purge(entries: &mut HashMap<String, Pending>, now: Instant) {
        // ---
        let before = entries.len();
        entries.retain(|_, p| p.deadline > now);
        let expired = before - entries.len();
        if expired > 0 {
            tracing::debug!(expired, "dropped expired command requests");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
