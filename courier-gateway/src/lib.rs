//! Forwarding core of the Courier AMQP gateway.
//!
//! Devices attach links to the gateway; for each one the core opens a
//! paired link on a single pooled connection to the downstream container,
//! bridges credit between the two, and forwards messages and dispositions.
//!
//! # Structure
//!
//! - [`config`]             - [`DownstreamConfig`], address translation
//! - [`connection_manager`] - [`ConnectionManager`], reconnect loop, disconnect observers
//! - [`flow`]               - [`FlowBridge`] credit and drain propagation
//! - [`forwarding_link`]    - [`ForwardingLink`], a link tagged with its owner
//! - [`registry`]           - [`LinkRegistry`] of paired downstream links
//! - [`adapter`]            - [`ForwardingAdapter`] for both forwarding directions
//! - [`command`]            - command/reply exchange per tenant
//!
//! The engine itself sits behind the traits of `courier-domain`; tests and
//! the demo binary run the core against `courier-link-sim`.

pub mod adapter;
pub mod command;
pub mod config;
pub mod connection_manager;
pub mod flow;
pub mod forwarding_link;
pub mod link_factory;
pub mod registry;

// --- adapter
pub use adapter::{ForwardingAdapter, ForwardingDirection};

// --- command
pub use command::{
    // ---
    CommandClient,
    CommandConsumer,
    CommandHandler,
    CommandSender,
    ReplyHandler,
};

// --- config
pub use config::DownstreamConfig;

// --- connection
pub use connection_manager::{
    // ---
    ConnectionManager,
    ConnectionManagerPtr,
    DisconnectObserver,
    DisconnectObserverPtr,
};

// --- links
pub use flow::{available_credit, FlowBridge, TaskGuard};
pub use forwarding_link::ForwardingLink;
pub use registry::LinkRegistry;
