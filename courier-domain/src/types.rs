use std::fmt;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque identifier of one attached link, unique for the link's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(String);

// ---

impl LinkId {
    // ---
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LinkId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for LinkId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---

/// Surrogate identifier the gateway assigns to a client connection when
/// it is established. Every upstream link carries the id of its owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

// ---

impl ConnectionId {
    // ---
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Qos
// ---------------------------------------------------------------------------

/// Delivery guarantee negotiated for a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Qos {
    // ---
    /// Deliveries are pre-settled by the sender; no disposition follows.
    AtMostOnce,

    /// Deliveries stay unsettled until the receiver reports an outcome.
    AtLeastOnce,
}

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Which end of a protocol link a handle represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Sender,
    Receiver,
}

// ---

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Sender => f.write_str("sender"),
            Direction::Receiver => f.write_str("receiver"),
        }
    }
}

// ---------------------------------------------------------------------------
// OpenState
// ---------------------------------------------------------------------------

/// Lifecycle of a single link.
///
/// Transitions only move forward: `Opening → Open → Closing → Closed`.
/// A `Closed` link is never reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OpenState {
    Opening,
    Open,
    Closing,
    Closed,
}

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Observable state of the pooled downstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    // ---
    /// No connection, and none being attempted right now.
    Disconnected,

    /// A connect attempt (or the retry loop) is in progress.
    Connecting,

    /// The connection is open; downstream links may be created.
    Connected,

    /// An explicit shutdown is closing the connection.
    Disconnecting,
}
