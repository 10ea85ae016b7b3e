//! Error types for the klog publisher

use std::time::Duration;
use thiserror::Error;

/// Result type alias for publisher operations
pub type Result<T, E = PublishError> = std::result::Result<T, E>;

/// Errors raised while talking to the log sink
///
/// None of these ever reach the HTTP client. The emitter logs them and the
/// exchange continues.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The publisher is enabled but no broker address was configured
    #[error("no broker address configured")]
    NoBrokers,

    /// Dialing the broker failed
    #[error("unable to connect to broker: {0}")]
    Dial(String),

    /// Sending a message on an established connection failed
    #[error("unable to publish message: {0}")]
    Send(String),

    /// Closing the connection failed
    #[error("unable to close broker connection: {0}")]
    Close(String),

    /// A send did not finish within the configured deadline
    #[error("broker operation timed out after {0:?}")]
    Timeout(Duration),

    /// An earlier dial failed; the publisher stays unavailable until restart
    #[error("publisher unavailable after a failed dial")]
    Unavailable,

    /// The publisher was closed by shutdown
    #[error("publisher is closed")]
    Closed,
}

impl PublishError {
    /// Whether this error reports a cached state rather than a fresh failure
    pub fn is_cached(&self) -> bool {
        matches!(self, PublishError::Unavailable | PublishError::Closed)
    }

    /// Whether this error comes from opening the connection
    ///
    /// The publisher logs these itself when it gives up on the sink.
    pub fn is_dial_failure(&self) -> bool {
        matches!(self, PublishError::NoBrokers | PublishError::Dial(_))
    }
}
