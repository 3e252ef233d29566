use std::collections::HashMap;
use std::sync::Arc;

// ---

use tokio::sync::Mutex;

// ---

use courier_domain::Result;

// ---

use super::{CommandConsumer, CommandHandler, CommandSender, ReplyHandler};
use crate::connection_manager::ConnectionManagerPtr;

// ---------------------------------------------------------------------------
// CommandClient
// ---------------------------------------------------------------------------

/// Creates command consumers and senders on the downstream connection.
///
/// Senders are cached per tenant and reused while both of their links are
/// open.
pub struct CommandClient {
    // ---
    connections: ConnectionManagerPtr,

    /// Held across link opens so one tenant never gets two senders.
    senders: Mutex<HashMap<String, Arc<CommandSender>>>,
}

// ---

impl CommandClient {
    // ---
    pub fn new(connections: ConnectionManagerPtr) -> Self {
        Self {
            connections,
            senders: Mutex::new(HashMap::new()),
        }
    }

    // ---

    /// Open a consumer for the commands of `tenant`.
    pub async fn create_command_consumer(
        &self,
        tenant: &str,
        on_command: CommandHandler,
    ) -> Result<CommandConsumer> {
        // ---
        let conn = self.connections.current_connection()?;
        let separator = &self.connections.config().path_separator;
        CommandConsumer::create(&conn, tenant, separator, on_command).await
    }

    // ---

    /// The cached sender for `tenant`, or a newly opened one.
    ///
    /// `on_reply` is only used when a new sender is created.
    pub async fn get_or_create_command_sender(
        &self,
        tenant: &str,
        on_reply: ReplyHandler,
    ) -> Result<Arc<CommandSender>> {
        // ---
        let mut senders = self.senders.lock().await;
        if let Some(sender) = senders.get(tenant) {
            if sender.is_open() {
                return Ok(Arc::clone(sender));
            }
            tracing::debug!(%tenant, "cached command sender is closed, replacing it");
            senders.remove(tenant);
        }

        let conn = self.connections.current_connection()?;
        let config = self.connections.config();
        let sender = Arc::new(
            CommandSender::create(
                &conn,
                tenant,
                &config.path_separator,
                on_reply,
                config.request_timeout(),
            )
            .await?,
        );
        senders.insert(tenant.to_string(), Arc::clone(&sender));
        Ok(sender)
    }
}
