//! [`LinkRegistry`] - live paired links, indexed by client link id and by
//! owning client connection.
//!
//! Both indexes sit behind one lock, so they are never observed out of
//! step: every id listed for a connection is present in the by-id map and
//! every entry of the by-id map is listed under its connection.
//!
//! A link that is still being opened holds a [`Reservation`] for its id.
//! Removing the id, removing its connection or clearing the registry
//! cancels the reservation, and a cancelled reservation cannot be
//! committed. An attach that loses such a race closes what it opened.

use std::collections::HashMap;

// ---

use parking_lot::Mutex;

// ---

use courier_domain::{ConnectionId, LinkId};

// ---

use super::connection_manager::DisconnectObserver;
use super::forwarding_link::ForwardingLink;

// ---------------------------------------------------------------------------
// LinkRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Indexes {
    // ---
    links: HashMap<LinkId, ForwardingLink>,

    /// Link ids per client connection, in attach order.
    by_connection: HashMap<ConnectionId, Vec<LinkId>>,

    /// Ids whose paired link is still being opened.
    pending: HashMap<LinkId, Pending>,
    next_ticket: u64,
}

struct Pending {
    connection_id: ConnectionId,
    ticket: u64,
}

// ---

impl Indexes {
    // ---
    fn unlist(&mut self, connection_id: &ConnectionId, link_id: &LinkId) {
        // ---
        if let Some(ids) = self.by_connection.get_mut(connection_id) {
            ids.retain(|id| id != link_id);
            if ids.is_empty() {
                self.by_connection.remove(connection_id);
            }
        }
    }

    fn insert(&mut self, link: ForwardingLink) -> Option<ForwardingLink> {
        // ---
        let previous = self.links.insert(link.id().clone(), link.clone());
        if let Some(prev) = &previous {
            self.unlist(prev.connection_id(), prev.id());
        }
        self.by_connection
            .entry(link.connection_id().clone())
            .or_default()
            .push(link.id().clone());
        previous
    }
}

// ---

#[derive(Default)]
pub struct LinkRegistry {
    inner: Mutex<Indexes>,
}

// ---

impl LinkRegistry {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    // ---

    /// Register `link` under its id and connection. A previous entry with
    /// the same id is replaced and returned.
    pub fn add(&self, link: ForwardingLink) -> Option<ForwardingLink> {
        self.inner.lock().insert(link)
    }

    /// Claim `link_id` for a paired link that is about to be opened.
    ///
    /// Returns `None` if the id is registered or already reserved. The
    /// reservation is released when dropped uncommitted.
    pub fn reserve(
        &self,
        link_id: &LinkId,
        connection_id: &ConnectionId,
    ) -> Option<Reservation<'_>> {
        // ---
        let mut inner = self.inner.lock();
        if inner.links.contains_key(link_id) || inner.pending.contains_key(link_id) {
            return None;
        }
        inner.next_ticket += 1;
        let ticket = inner.next_ticket;
        inner.pending.insert(
            link_id.clone(),
            Pending {
                connection_id: connection_id.clone(),
                ticket,
            },
        );
        Some(Reservation {
            registry: self,
            link_id: link_id.clone(),
            ticket,
            committed: false,
        })
    }

    /// `true` while an attach for `link_id` holds a live reservation.
    pub fn is_reserved(&self, link_id: &LinkId) -> bool {
        self.inner.lock().pending.contains_key(link_id)
    }

    fn release(&self, link_id: &LinkId, ticket: u64) {
        // ---
        let mut inner = self.inner.lock();
        if inner
            .pending
            .get(link_id)
            .is_some_and(|p| p.ticket == ticket)
        {
            inner.pending.remove(link_id);
        }
    }

    pub fn get(&self, link_id: &LinkId) -> Option<ForwardingLink> {
        self.inner.lock().links.get(link_id).cloned()
    }

    pub fn contains(&self, link_id: &LinkId) -> bool {
        self.inner.lock().links.contains_key(link_id)
    }

    /// Remove one link from both indexes.
    pub fn remove(&self, link_id: &LinkId) -> Option<ForwardingLink> {
        // ---
        let mut inner = self.inner.lock();
        inner.pending.remove(link_id);
        let link = inner.links.remove(link_id)?;
        inner.unlist(link.connection_id(), link_id);
        Some(link)
    }

    /// Remove every link owned by `connection_id`, in attach order.
    ///
    /// Both indexes are updated in one critical section; once this returns
    /// none of the links is reachable and no attach still opening a link
    /// for the connection can register it. Closing them is up to the caller.
    pub fn remove_all(&self, connection_id: &ConnectionId) -> Vec<ForwardingLink> {
        // ---
        let mut inner = self.inner.lock();
        inner
            .pending
            .retain(|_, p| p.connection_id != *connection_id);
        let ids = inner
            .by_connection
            .remove(connection_id)
            .unwrap_or_default();
        ids.iter().filter_map(|id| inner.links.remove(id)).collect()
    }

    /// Ids registered for `connection_id`, in attach order.
    pub fn links_for(&self, connection_id: &ConnectionId) -> Vec<LinkId> {
        // ---
        self.inner
            .lock()
            .by_connection
            .get(connection_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Forget every link and return them.
    pub fn clear(&self) -> Vec<ForwardingLink> {
        // ---
        let mut inner = self.inner.lock();
        inner.pending.clear();
        inner.by_connection.clear();
        inner.links.drain().map(|(_, link)| link).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().links.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Reservation
// ---------------------------------------------------------------------------

/// Claim on a link id held while its paired link is opened.
pub struct Reservation<'a> {
    // ---
    registry: &'a LinkRegistry,
    link_id: LinkId,
    ticket: u64,
    committed: bool,
}

// ---

impl Reservation<'_> {
    // ---
    /// Register `link` if this reservation is still live.
    ///
    /// Hands `link` back when the reservation was cancelled in the
    /// meantime; the caller owns closing it.
    pub fn commit(mut self, link: ForwardingLink) -> std::result::Result<(), ForwardingLink> {
        // ---
        let refused = {
            let mut inner = self.registry.inner.lock();
            let live = inner.pending.get(&self.link_id).is_some_and(|p| {
                p.ticket == self.ticket && p.connection_id == *link.connection_id()
            });
            if live {
                inner.pending.remove(&self.link_id);
                inner.insert(link);
                None
            } else {
                Some(link)
            }
        };
        match refused {
            None => {
                self.committed = true;
                Ok(())
            }
            Some(link) => Err(link),
        }
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        // ---
        if !self.committed {
            self.registry.release(&self.link_id, self.ticket);
        }
    }
}

// ---

impl DisconnectObserver for LinkRegistry {
    // ---
    /// Links opened on a lost downstream connection are dead; forget them.
    fn on_disconnect(&self) {
        // ---
        let cleared = self.clear();
        if !cleared.is_empty() {
            tracing::info!(
                links = cleared.len(),
                "cleared downstream links of lost connection"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
