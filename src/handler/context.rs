//! Respond capability handed to request handlers.

use crate::error::Result;
use crate::link::Session;
use crate::transport::ByteTransport;

/// Capability to answer the request currently being dispatched.
///
/// A `Responder` is bound to one receive cycle: it borrows the engine for
/// the duration of the handler call, and [`send`](Self::send) transmits a
/// response frame correlated to the opcode still held in the receive
/// buffer. A handler that never calls `send` leaves the peer waiting for
/// its response timeout; an opcode registered without a request handler is
/// answered with an empty response by the dispatcher instead.
pub struct Responder<'a> {
    session: &'a mut Session,
    transport: &'a mut dyn ByteTransport,
}

impl<'a> Responder<'a> {
    pub(crate) fn new(session: &'a mut Session, transport: &'a mut dyn ByteTransport) -> Self {
        Self { session, transport }
    }

    /// Opcode of the request being answered.
    pub fn op_code(&self) -> Option<u8> {
        self.session.pending_op_code()
    }

    /// Transmit a response frame carrying `payload`.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.session.respond(payload, &mut *self.transport)
    }
}
