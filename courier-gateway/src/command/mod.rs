//! Command and reply exchange over correlated link pairs.
//!
//! Per tenant, commands travel on `command{sep}{tenant}` and replies on
//! `command-reply{sep}{tenant}`:
//!
//! - [`CommandConsumer`] (device side) receives commands and sends replies
//!   whose correlation id is the command's message id.
//! - [`CommandSender`] (application side) sends commands and matches the
//!   replies back to the outstanding requests.
//!
//! Both open their two links as an atomic pair: if either leg fails the
//! other one is closed and [`CourierError::PartialPairFailure`] returned.

mod client;
mod consumer;
mod correlation;
mod sender;

// ---

use std::sync::Arc;

use courier_domain::{CourierError, Message, ReceiverPtr, Result, SenderPtr};

// --- public API
pub use client::CommandClient;
pub use consumer::CommandConsumer;
pub use sender::CommandSender;

// ---------------------------------------------------------------------------
// Addresses and properties
// ---------------------------------------------------------------------------

pub const COMMAND_ENDPOINT: &str = "command";
pub const COMMAND_REPLY_ENDPOINT: &str = "command-reply";

/// Application property carrying the reply status code.
pub const STATUS_PROPERTY: &str = "status";

/// Application property identifying the device a command is for.
pub const DEVICE_ID_PROPERTY: &str = "device_id";

pub const REPLY_CONTENT_TYPE: &str = "text/plain";

/// Credit the receiving leg of each pair keeps outstanding.
pub(crate) const PREFETCH: u32 = 20;

// ---

pub fn command_address(tenant: &str, separator: &str) -> String {
    format!("{COMMAND_ENDPOINT}{separator}{tenant}")
}

pub fn reply_address(tenant: &str, separator: &str) -> String {
    format!("{COMMAND_REPLY_ENDPOINT}{separator}{tenant}")
}

// ---

/// Invoked for every received command.
pub type CommandHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Invoked once for every reply matched to a command sent with
/// [`CommandSender::send_command`].
pub type ReplyHandler = Arc<dyn Fn(Message) + Send + Sync>;

// ---

/// Combine the outcomes of opening both legs. On a partial failure the
/// leg that did open is closed before the error is returned.
pub(crate) async fn settle_pair(
    receiver: Result<ReceiverPtr>,
    sender: Result<SenderPtr>,
) -> Result<(ReceiverPtr, SenderPtr)> {
    // ---
    match (receiver, sender) {
        (Ok(receiver), Ok(sender)) => Ok((receiver, sender)),
        (Ok(receiver), Err(e)) => {
            tracing::warn!(receiver = %receiver.name(), "sender leg failed to open: {e}; closing receiver");
            let _ = receiver.close(None).await;
            Err(CourierError::PartialPairFailure {
                leg: "sender",
                source: Box::new(e),
            })
        }
        (Err(e), Ok(sender)) => {
            tracing::warn!(sender = %sender.name(), "receiver leg failed to open: {e}; closing sender");
            let _ = sender.close(None).await;
            Err(CourierError::PartialPairFailure {
                leg: "receiver",
                source: Box::new(e),
            })
        }
        (Err(e), Err(_)) => Err(CourierError::PartialPairFailure {
            leg: "receiver",
            source: Box::new(e),
        }),
    }
}

// ---

/// Close both legs, reporting the first failure.
pub(crate) async fn close_pair(receiver: &ReceiverPtr, sender: &SenderPtr) -> Result<()> {
    // ---
    let (r, s) = tokio::join!(receiver.close(None), sender.close(None));
    r.and(s)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
