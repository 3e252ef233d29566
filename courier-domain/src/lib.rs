//! Core traits and value types for the Courier AMQP forwarding gateway.
//!
//! This crate defines the vocabulary of the system. The forwarding core in
//! `courier-gateway` and the in-process engine in `courier-link-sim` both
//! speak these types. No engine implementation lives here.
//!
//! # Structure
//!
//! - [`error`]     - [`CourierError`] and [`Result<T>`] alias
//! - [`types`]     - identifiers, [`Qos`], [`Direction`], open/connection state
//! - [`message`]   - [`Message`], [`Disposition`], [`ErrorCondition`]
//! - [`link`]      - [`SenderLink`], [`ReceiverLink`], [`LinkHandle`]
//! - [`transport`] - [`AmqpConnector`], [`AmqpConnection`], [`AmqpSession`]

mod error;
mod link;
mod message;
mod transport;
mod types;

// --- error
pub use error::{CourierError, Result};

// --- types
pub use types::{
    // ---
    ConnectionId,
    ConnectionState,
    Direction,
    LinkId,
    OpenState,
    Qos,
};

// --- message
pub use message::{
    // ---
    DeliveryState,
    Disposition,
    ErrorCondition,
    Message,
    PropertyValue,
};

// --- link
pub use link::{
    // ---
    Delivery,
    DeliveryPtr,
    LinkEndpoint,
    LinkHandle,
    PendingDisposition,
    ReceiverLink,
    ReceiverPtr,
    SenderLink,
    SenderPtr,
};

// --- transport
pub use transport::{
    // ---
    AmqpConnection,
    AmqpConnectionPtr,
    AmqpConnector,
    AmqpSession,
    AmqpSessionPtr,
    ConnectOptions,
    ReceiverOptions,
    SenderOptions,
    TransportEvent,
};
