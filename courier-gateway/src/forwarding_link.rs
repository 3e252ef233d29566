use std::fmt;
use std::sync::Arc;

// ---

use courier_domain::{
    // ---
    ConnectionId,
    Direction,
    ErrorCondition,
    LinkHandle,
    LinkId,
    Result,
};

// ---

use super::flow::TaskGuard;

// ---------------------------------------------------------------------------
// ForwardingLink
// ---------------------------------------------------------------------------

/// A link the gateway tracks, tagged with the client link id and the
/// client connection that owns it.
///
/// Client links are described by one of these when they attach. The paired
/// downstream link is stored under the *client's* id in the
/// [`super::LinkRegistry`], together with the tasks that serve the pairing;
/// those tasks stop when the last clone is dropped.
#[derive(Clone)]
pub struct ForwardingLink {
    // ---
    id: LinkId,
    connection_id: ConnectionId,
    link: LinkHandle,
    tasks: Arc<Vec<TaskGuard>>,
}

// ---

impl ForwardingLink {
    // ---
    pub fn new(id: LinkId, connection_id: ConnectionId, link: LinkHandle) -> Self {
        // ---
        Self {
            id,
            connection_id,
            link,
            tasks: Arc::new(Vec::new()),
        }
    }

    /// Attach the tasks serving this link.
    pub fn with_tasks(mut self, tasks: Vec<TaskGuard>) -> Self {
        self.tasks = Arc::new(tasks);
        self
    }

    // ---

    pub fn id(&self) -> &LinkId {
        &self.id
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn link(&self) -> &LinkHandle {
        &self.link
    }

    pub fn direction(&self) -> Direction {
        self.link.direction()
    }

    pub fn is_open(&self) -> bool {
        self.link.is_open()
    }

    /// The address messages on this link are about: the target of a
    /// receiver (where the client sends to) or the source of a sender
    /// (where the client consumes from).
    pub fn address(&self) -> Option<String> {
        // ---
        match self.link {
            LinkHandle::Receiver(_) => self.link.target_address(),
            LinkHandle::Sender(_) => self
                .link
                .source_address()
                .or_else(|| self.link.target_address()),
        }
    }

    /// Close the link, optionally with an error condition. Closing a
    /// closed link is a no-op.
    pub async fn close(&self, error: Option<ErrorCondition>) -> Result<()> {
        // ---
        if !self.link.is_open() {
            return Ok(());
        }
        self.link.close(error).await
    }
}

// ---

impl fmt::Display for ForwardingLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        write!(
            f,
            "{} link {} [con: {}, address: {}]",
            self.direction(),
            self.id,
            self.connection_id,
            self.address().as_deref().unwrap_or("-")
        )
    }
}

impl fmt::Debug for ForwardingLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        f.debug_struct("ForwardingLink")
            .field("id", &self.id)
            .field("connection_id", &self.connection_id)
            .field("link", &self.link)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use courier_domain::{ConnectionId, ErrorCondition, LinkHandle, LinkId};
    use courier_link_sim::{LinkSpec, SimReceiver, SimSender};

    use super::ForwardingLink;

    // ---

    #[tokio::test]
    async fn address_and_close() {
        // ---
        let (receiver, peer) = SimReceiver::open(LinkSpec::new().target("telemetry/tenantA"));
        let link = ForwardingLink::new(
            LinkId::new("l1"),
            ConnectionId::new("c1"),
            LinkHandle::Receiver(receiver),
        );
        assert_eq!(link.address().as_deref(), Some("telemetry/tenantA"));
        assert_eq!(
            link.to_string(),
            "receiver link l1 [con: c1, address: telemetry/tenantA]"
        );

        link.close(Some(ErrorCondition::no_downstream_consumer()))
            .await
            .expect("close");
        assert!(!link.is_open());
        assert_eq!(
            peer.condition(),
            Some(ErrorCondition::no_downstream_consumer())
        );

        // Second close is a no-op and keeps the first condition.
        link.close(None).await.expect("close again");
        assert_eq!(
            peer.condition(),
            Some(ErrorCondition::no_downstream_consumer())
        );
    }

    // ---

    #[test]
    fn sender_address_is_its_source() {
        // ---
        let (sender, _) = SimSender::open(LinkSpec::new().source("command/tenantA"));
        let link = ForwardingLink::new(
            LinkId::new("l2"),
            ConnectionId::new("c1"),
            LinkHandle::Sender(sender),
        );
        assert_eq!(link.address().as_deref(), Some("command/tenantA"));
    }
}
