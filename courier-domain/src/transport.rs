use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::error::Result;
use super::link::{ReceiverPtr, SenderPtr};
use super::types::Qos;

// ---------------------------------------------------------------------------
// TransportEvent
// ---------------------------------------------------------------------------

/// Observable state of one engine connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    // ---
    /// Open and usable.
    Open,

    /// The peer sent a close; the local side should close as well.
    RemoteClosed,

    /// The underlying transport is gone. Every link on it is stale.
    Disconnected,
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Parameters for one connect attempt.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    // ---
    pub host: String,
    pub port: u16,

    /// Container id presented in the local open frame.
    pub container_id: String,

    /// Virtual host name presented in the local open frame.
    pub hostname: String,

    /// Upper bound for establishing the transport.
    pub connect_timeout: Duration,
}

// ---

#[derive(Debug, Clone, Copy)]
pub struct SenderOptions {
    pub qos: Qos,
}

// ---

/// Options for a receiving link.
///
/// `prefetch == 0` means manual flow control: credit is issued only via
/// [`super::ReceiverLink::flow`]. With `auto_accept` every delivery is
/// accepted and settled as soon as it is handed to the application.
#[derive(Debug, Clone, Copy)]
pub struct ReceiverOptions {
    pub qos: Qos,
    pub prefetch: u32,
    pub auto_accept: bool,
}

// ---

impl ReceiverOptions {
    // ---
    /// Manual credit and disposition handling; used for forwarding.
    pub fn manual(qos: Qos) -> Self {
        Self {
            qos,
            prefetch: 0,
            auto_accept: false,
        }
    }
}

// ---------------------------------------------------------------------------
// AmqpSession
// ---------------------------------------------------------------------------

/// A session on an open connection; the scope in which links are created.
#[async_trait]
pub trait AmqpSession: Send + Sync {
    // ---
    /// Attach a sending link to `address` and wait for the peer's attach.
    async fn open_sender(&self, address: &str, options: SenderOptions) -> Result<SenderPtr>;

    /// Attach a receiving link from `address` and wait for the peer's attach.
    async fn open_receiver(&self, address: &str, options: ReceiverOptions) -> Result<ReceiverPtr>;
}

pub type AmqpSessionPtr = Arc<dyn AmqpSession>;

// ---------------------------------------------------------------------------
// AmqpConnection
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AmqpConnection: Send + Sync {
    // ---
    /// Container id the peer presented in its open frame.
    fn remote_container(&self) -> String;

    fn is_disconnected(&self) -> bool;

    /// Subscribe to transport events.
    ///
    /// Use [`watch::Receiver::changed()`] to await each transition.
    fn events(&self) -> watch::Receiver<TransportEvent>;

    /// Begin a new session and wait until the peer has opened it.
    async fn create_session(&self) -> Result<AmqpSessionPtr>;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<()>;

    /// Drop the transport without a close handshake.
    fn disconnect(&self);
}

pub type AmqpConnectionPtr = Arc<dyn AmqpConnection>;

// ---------------------------------------------------------------------------
// AmqpConnector
// ---------------------------------------------------------------------------

/// Factory for engine connections.
#[async_trait]
pub trait AmqpConnector: Send + Sync {
    // ---
    /// Establish the transport and complete the open handshake.
    async fn connect(&self, options: &ConnectOptions) -> Result<AmqpConnectionPtr>;
}
