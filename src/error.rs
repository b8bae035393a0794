// Error taxonomy
// Only connection establishment surfaces errors to the caller;
// steady-state problems degrade to logged diagnostics and events.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by the tracking client.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The transport did not signal "open" within the connect timeout.
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The transport failed while connecting.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}
