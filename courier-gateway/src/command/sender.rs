use std::sync::Arc;
use std::time::Duration;

// ---

use tokio::sync::oneshot;
use uuid::Uuid;

// ---

use courier_domain::{
    // ---
    AmqpConnectionPtr,
    CourierError,
    Message,
    Qos,
    ReceiverOptions,
    ReceiverPtr,
    Result,
    SenderPtr,
};

// ---

use super::correlation::{Continuation, PendingRequests};
use super::{close_pair, command_address, reply_address, settle_pair, ReplyHandler, PREFETCH};
use crate::flow::TaskGuard;
use crate::link_factory;

// ---------------------------------------------------------------------------
// CommandSender
// ---------------------------------------------------------------------------

/// Sends commands to one tenant's devices and matches their replies.
pub struct CommandSender {
    // ---
    tenant: String,
    sender: SenderPtr,
    receiver: ReceiverPtr,
    command_address: String,
    pending: Arc<PendingRequests>,
    on_reply: ReplyHandler,
    request_timeout: Duration,
    _pump: TaskGuard,
}

// ---

impl CommandSender {
    // ---
    /// Open the command sender and reply receiver for `tenant`.
    pub(crate) async fn create(
        conn: &AmqpConnectionPtr,
        tenant: &str,
        separator: &str,
        on_reply: ReplyHandler,
        request_timeout: Duration,
    ) -> Result<Self> {
        // ---
        let command_address = command_address(tenant, separator);
        let reply_address = reply_address(tenant, separator);
        let options = ReceiverOptions {
            qos: Qos::AtLeastOnce,
            prefetch: PREFETCH,
            auto_accept: true,
        };

        let (receiver, sender) = tokio::join!(
            link_factory::open_receiver(conn, &reply_address, options),
            link_factory::open_sender(conn, &command_address, Qos::AtLeastOnce),
        );
        let (receiver, sender) = settle_pair(receiver, sender).await?;

        let pending = Arc::new(PendingRequests::new(request_timeout));
        let pump = {
            let receiver = Arc::clone(&receiver);
            let pending = Arc::clone(&pending);
            let tenant = tenant.to_string();
            tokio::spawn(async move {
                while let Some((_delivery, reply)) = receiver.recv().await {
                    if !pending.dispatch(reply) {
                        tracing::debug!(%tenant, "dropped unmatched command reply");
                    }
                }
                tracing::debug!(%tenant, "reply receiver closed");
            })
        };

        tracing::info!(%tenant, address = %command_address, "created command sender");
        Ok(Self {
            tenant: tenant.to_string(),
            sender,
            receiver,
            command_address,
            pending,
            on_reply,
            request_timeout,
            _pump: TaskGuard::new(pump),
        })
    }

    // ---

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn is_open(&self) -> bool {
        self.sender.is_open() && self.receiver.is_open()
    }

    /// Requests still waiting for their reply.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    // ---

    /// Send `command` and deliver its reply to the `on_reply` handler.
    ///
    /// A message id is assigned if the command has none. Returns the id
    /// the reply will be correlated with.
    pub fn send_command(&self, command: Message) -> Result<String> {
        // ---
        let (id, command) = self.prepare(command);
        self.pending
            .track(&id, Continuation::Callback(Arc::clone(&self.on_reply)))?;

        if let Err(e) = self.sender.send(command) {
            self.pending.cancel(&id);
            return Err(e);
        }
        tracing::debug!(tenant = %self.tenant, message_id = %id, "sent command");
        Ok(id)
    }

    // ---

    /// Send `command` and wait for its reply.
    ///
    /// Fails with [`CourierError::RequestTimeout`] if no reply arrives
    /// within the configured request timeout.
    pub async fn request(&self, command: Message) -> Result<Message> {
        // ---
        let (id, command) = self.prepare(command);
        let (tx, rx) = oneshot::channel();
        self.pending.track(&id, Continuation::Waiter(tx))?;

        if let Err(e) = self.sender.send(command) {
            self.pending.cancel(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(CourierError::LinkClosed),
            Err(_) => {
                self.pending.cancel(&id);
                tracing::debug!(tenant = %self.tenant, message_id = %id, "command request timed out");
                Err(CourierError::RequestTimeout(id))
            }
        }
    }

    // ---

    /// Close both links. Pending requests are dropped.
    pub async fn close(&self) -> Result<()> {
        // ---
        tracing::info!(tenant = %self.tenant, "closing command sender");
        close_pair(&self.receiver, &self.sender).await
    }

    // ---

    fn prepare(&self, mut command: Message) -> (String, Message) {
        // ---
        let id = command
            .message_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        if command.address.is_none() {
            command.address = Some(self.command_address.clone());
        }
        (id, command)
    }
}
