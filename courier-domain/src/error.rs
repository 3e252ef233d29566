use thiserror::Error;

use super::types::Direction;

// ---

#[derive(Debug, Error)]
pub enum CourierError {
    // ---
    /// The downstream connection is not (yet) established.
    ///
    /// Retryable by the caller after a back-off.
    #[error("no downstream connection")]
    NotConnected,

    /// A message arrived for a client link that has no usable paired link.
    #[error("no downstream consumer for link {0}")]
    NoDownstreamConsumer(String),

    /// Two links of the same direction were asked to share flow control.
    #[error("cannot bridge flow between two {0} links")]
    InvalidPairing(Direction),

    /// One leg of an atomic sender/receiver pair failed to open.
    #[error("{leg} link of pair failed to open: {source}")]
    PartialPairFailure {
        leg: &'static str,
        #[source]
        source: Box<CourierError>,
    },

    #[error("link closed")]
    LinkClosed,

    #[error("link could not be opened: {0}")]
    LinkOpen(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connect attempt timed out")]
    ConnectTimeout,

    #[error("drain request timed out")]
    DrainTimeout,

    #[error("no reply received for request {0}")]
    RequestTimeout(String),

    /// A request with this message id is already awaiting its reply.
    #[error("request {0} is already pending")]
    DuplicateRequest(String),

    /// Another attach for the same client link id is still opening its
    /// paired link.
    #[error("link {0} is already being attached")]
    AttachInProgress(String),

    #[error("link {0} carries no address")]
    MissingAddress(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("connection manager is shut down")]
    Shutdown,
}

// ---

impl CourierError {
    // ---
    /// `true` for errors a caller may retry after a back-off.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CourierError::NotConnected
                | CourierError::ConnectTimeout
                | CourierError::Transport(_)
        )
    }
}

// ---

pub type Result<T> = std::result::Result<T, CourierError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::CourierError;

    #[test]
    fn only_connection_errors_are_retryable() {
        // ---
        assert!(CourierError::NotConnected.is_retryable());
        assert!(CourierError::ConnectTimeout.is_retryable());
        assert!(CourierError::Transport("reset".into()).is_retryable());
        assert!(!CourierError::LinkClosed.is_retryable());
        assert!(!CourierError::InvalidConfig("port".into()).is_retryable());
    }

    #[test]
    fn partial_pair_names_the_failed_leg() {
        // ---
        let err = CourierError::PartialPairFailure {
            leg: "sender",
            source: Box::new(CourierError::LinkOpen("refused".into())),
        };
        assert_eq!(
            err.to_string(),
            "sender link of pair failed to open: link could not be opened: refused"
        );
    }
}
