//! Command demo: an application sends a command to a device consumer of
//! the same tenant and waits for the correlated reply.

use std::sync::Arc;

use tokio::sync::mpsc;

use courier_domain::Message;
use courier_gateway::command::{DEVICE_ID_PROPERTY, STATUS_PROPERTY};
use courier_gateway::{CommandClient, ConnectionManagerPtr};

// ---

pub async fn run(connections: &ConnectionManagerPtr, tenant: &str) -> anyhow::Result<()> {
    // ---
    let client = CommandClient::new(Arc::clone(connections));

    // --- device side --------------------------------------------------------

    let (commands_tx, mut commands) = mpsc::unbounded_channel();
    let consumer = Arc::new(
        client
            .create_command_consumer(
                tenant,
                Arc::new(move |command: Message| {
                    let _ = commands_tx.send(command);
                }),
            )
            .await?,
    );

    let device = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                println!("  device got command: {}", command.body_text());
                if !consumer.reply(&command, 202, "accepted") {
                    tracing::warn!("reply could not be sent");
                }
            }
        })
    };

    // --- application side ---------------------------------------------------

    let sender = client
        .get_or_create_command_sender(
            tenant,
            Arc::new(|reply: Message| {
                tracing::info!(correlation_id = ?reply.correlation_id, "late reply");
            }),
        )
        .await?;

    let command = Message::new("switch on").with_property(DEVICE_ID_PROPERTY, "device-1");
    let reply = sender.request(command).await?;
    println!(
        "  reply {}: status {:?}, body {:?}",
        reply.correlation_id.as_deref().unwrap_or("-"),
        reply.property(STATUS_PROPERTY).and_then(|v| v.as_int()),
        reply.body_text()
    );

    sender.close().await?;
    consumer.close().await?;
    device.abort();
    Ok(())
}
