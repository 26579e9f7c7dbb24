//! Error types for won-agreement.

use thiserror::Error;
use won_protocol::Uri;

/// Result type for won-agreement operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reconciling agreement data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The agreement source could not deliver a resource.
    #[error("failed to fetch {uri}: {message}")]
    Fetch {
        uri: Uri,
        status: Option<u16>,
        message: String,
    },

    /// A fetched payload could not be turned into protocol data.
    #[error("protocol error: {0}")]
    Protocol(#[from] won_protocol::Error),

    /// Following mirror copies of an event led back to a copy already seen.
    #[error("mirror chain of {0} is cyclic")]
    Cycle(Uri),

    /// Following mirror copies of an event did not terminate in time.
    #[error("mirror chain of {uri} exceeds depth {depth}")]
    DepthExceeded { uri: Uri, depth: usize },
}
