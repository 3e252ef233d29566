use std::time::Duration;

// ---------------------------------------------------------------------------
// SimConfig
// ---------------------------------------------------------------------------

/// Configuration for the in-process engine simulator.
///
/// The default is a fully manual peer: sender links start without credit
/// and nothing is routed, so tests drive every flow and disposition
/// through the peer handles.
#[derive(Debug, Clone)]
pub struct SimConfig {
    // ---
    /// Container id the simulated peer presents on open.
    pub remote_container: String,

    /// Credit the peer grants each sender link on attach and tops it back
    /// up to once half has been used. `0` leaves credit to the test.
    pub initial_sender_credit: u32,

    /// Route transferred messages to receiver links attached at the same
    /// address, settling them `Accepted` (or `Released` when nobody with
    /// credit is listening).
    pub routing: bool,

    /// Time an accepted connect attempt takes to complete its handshake.
    pub connect_delay: Duration,

    /// Time the peer takes to answer a link attach. The link exists (and
    /// dies with its connection) from the start of the delay.
    pub attach_delay: Duration,
}

// ---

impl Default for SimConfig {
    fn default() -> Self {
        // ---
        Self {
            remote_container: "courier-sim-broker".into(),
            initial_sender_credit: 0,
            routing: false,
            connect_delay: Duration::ZERO,
            attach_delay: Duration::ZERO,
        }
    }
}

// ---

impl SimConfig {
    // ---
    /// Manual peer. Useful for flow-control and disposition tests.
    pub fn manual() -> Self {
        Self::default()
    }

    // ---

    /// Behaves like a small broker: grants credit and routes by address.
    pub fn broker() -> Self {
        // ---
        Self {
            initial_sender_credit: 100,
            routing: true,
            ..Default::default()
        }
    }

    // ---

    /// Delay every attach by `delay`.
    pub fn with_attach_delay(mut self, delay: Duration) -> Self {
        self.attach_delay = delay;
        self
    }

    /// Delay every accepted connect by `delay`.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }
}
