//! In-process AMQP engine simulator for Courier unit and integration testing.
//!
//! [`SimConnector`] implements [`courier_domain::AmqpConnector`] with tokio
//! channels instead of sockets. Every connection, session and link it hands
//! out has a peer-side handle the test drives directly:
//!
//! - scripted connect outcomes (accept, refuse, hang)
//! - transport loss and remote close on a live connection
//! - refused link attaches
//! - credit, drain and disposition control on each link
//! - optional address routing between links ([`SimBroker`])
//!
//! # Quick start
//!
//! ```rust
//! use courier_link_sim::{ConnectOutcome, SimConfig, SimConnector};
//!
//! let connector = SimConnector::new(SimConfig::manual())
//!     .with_script([ConnectOutcome::Refuse, ConnectOutcome::Accept]);
//! ```

mod broker;
mod config;
mod link;
mod session;
mod transport;

// --- public API
pub use broker::SimBroker;
pub use config::SimConfig;
pub use link::{
    // ---
    DeliveryProbe,
    LinkSpec,
    SimReceiver,
    SimReceiverPeer,
    SimSender,
    SimSenderPeer,
};
pub use session::{SimConnection, SimSession};
pub use transport::{ConnectOutcome, SimConnector};
