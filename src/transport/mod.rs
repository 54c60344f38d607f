//! Byte transport abstraction.
//!
//! The engine is transport-agnostic: anything that can accept and yield
//! single bytes and deliver [`TransportEvent`]s can carry the protocol.
//! The in-memory [`loopback`] pair is provided for tests and demos.

use thiserror::Error;

pub mod loopback;

pub use loopback::{loopback_pair, Loopback};

/// Errors surfaced by a byte transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transmit side cannot accept a byte right now.
    #[error("transmit buffer busy")]
    Busy,

    /// The peer side of the transport is gone.
    #[error("transport closed")]
    Closed,
}

/// Events a transport delivers to the engine's driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// Received bytes are waiting; poll [`ByteTransport::get_byte`] until
    /// it returns `None`.
    DataReady,
    /// The transmit side drained; the next unsent byte can go out.
    TxEmpty,
}

/// A byte-oriented transport endpoint.
///
/// Both methods are non-blocking: they are called from the ingestion tier
/// and must return immediately.
pub trait ByteTransport: Send {
    /// Hand one byte to the transport for transmission.
    fn put_byte(&mut self, byte: u8) -> Result<(), TransportError>;

    /// Take one received byte, or `None` when the receive side is drained.
    fn get_byte(&mut self) -> Option<u8>;
}
