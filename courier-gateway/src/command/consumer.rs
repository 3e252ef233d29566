use std::sync::Arc;

// ---

use courier_domain::{
    // ---
    AmqpConnectionPtr,
    Message,
    Qos,
    ReceiverOptions,
    ReceiverPtr,
    Result,
    SenderPtr,
};

// ---

use super::{
    // ---
    close_pair,
    command_address,
    reply_address,
    settle_pair,
    CommandHandler,
    DEVICE_ID_PROPERTY,
    PREFETCH,
    REPLY_CONTENT_TYPE,
    STATUS_PROPERTY,
};
use crate::flow::TaskGuard;
use crate::link_factory;

// ---------------------------------------------------------------------------
// CommandConsumer
// ---------------------------------------------------------------------------

/// Receives the commands of one tenant and sends their replies.
pub struct CommandConsumer {
    // ---
    tenant: String,
    receiver: ReceiverPtr,
    sender: SenderPtr,
    reply_address: String,
    _pump: TaskGuard,
}

// ---

impl CommandConsumer {
    // ---
    /// Open the command receiver and reply sender for `tenant`.
    ///
    /// Every received command is accepted and passed to `on_command`.
    pub(crate) async fn create(
        conn: &AmqpConnectionPtr,
        tenant: &str,
        separator: &str,
        on_command: CommandHandler,
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
            link_factory::open_receiver(conn, &command_address, options),
            link_factory::open_sender(conn, &reply_address, Qos::AtLeastOnce),
        );
        let (receiver, sender) = settle_pair(receiver, sender).await?;

        let pump = {
            let receiver = Arc::clone(&receiver);
            let tenant = tenant.to_string();
            tokio::spawn(async move {
                while let Some((_delivery, command)) = receiver.recv().await {
                    tracing::debug!(%tenant, message_id = ?command.message_id, "received command");
                    on_command(command);
                }
                tracing::debug!(%tenant, "command receiver closed");
            })
        };

        tracing::info!(%tenant, address = %command_address, "created command consumer");
        Ok(Self {
            tenant: tenant.to_string(),
            receiver,
            sender,
            reply_address,
            _pump: TaskGuard::new(pump),
        })
    }

    // ---

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn is_open(&self) -> bool {
        self.receiver.is_open() && self.sender.is_open()
    }

    // ---

    /// Send the reply to `command`.
    ///
    /// The reply carries `status`, the command's device id (if any) and a
    /// correlation id equal to the command's message id. Returns whether
    /// the reply was accepted for delivery: `false` if the command has no
    /// message id, the reply link is closed, or it has no credit.
    pub fn reply(&self, command: &Message, status: u16, payload: impl Into<Vec<u8>>) -> bool {
        // ---
        let Some(message_id) = command.message_id.as_deref() else {
            tracing::warn!(tenant = %self.tenant, "cannot reply to command without message id");
            return false;
        };
        if !self.sender.is_open() {
            tracing::debug!(tenant = %self.tenant, %message_id, "reply link closed");
            return false;
        }
        if self.sender.credit() == 0 {
            tracing::debug!(tenant = %self.tenant, %message_id, "no credit for reply");
            return false;
        }

        let mut reply = Message::new(payload)
            .with_address(self.reply_address.clone())
            .with_correlation_id(message_id)
            .with_content_type(REPLY_CONTENT_TYPE)
            .with_property(STATUS_PROPERTY, i64::from(status));
        if let Some(device_id) = command.property(DEVICE_ID_PROPERTY) {
            reply
                .application_properties
                .insert(DEVICE_ID_PROPERTY.to_string(), device_id.clone());
        }

        match self.sender.send(reply) {
            Ok(_) => {
                tracing::debug!(tenant = %self.tenant, %message_id, status, "sent command reply");
                true
            }
            Err(e) => {
                tracing::debug!(tenant = %self.tenant, %message_id, "reply not sent: {e}");
                false
            }
        }
    }

    // ---

    /// Close both links.
    pub async fn close(&self) -> Result<()> {
        // ---
        tracing::info!(tenant = %self.tenant, "closing command consumer");
        close_pair(&self.receiver, &self.sender).await
    }
}
