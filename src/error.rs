//! Error types for cmdlink.

use thiserror::Error;

use crate::transport::TransportError;

/// Main error type for all cmdlink operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The requested operation is not legal in the current mode/state.
    #[error("invalid state for this operation")]
    InvalidState,

    /// The buffer holds no decodable command.
    #[error("malformed frame: buffer holds no command")]
    MalformedFrame,

    /// A received frame failed format validation (start marker, length,
    /// opcode correlation or CRC).
    #[error("invalid frame format")]
    InvalidFormat,

    /// The payload does not fit in a frame.
    #[error("payload of {0} bytes exceeds frame capacity")]
    PayloadTooLarge(usize),

    /// The receive buffer was reset before the response could be built.
    #[error("receive buffer no longer holds the request")]
    StaleBuffer,

    /// The byte transport rejected an operation.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The engine handle is no longer attached to a running driver.
    #[error("link driver has shut down")]
    Closed,
}

/// Result type alias using LinkError.
pub type Result<T> = std::result::Result<T, LinkError>;
