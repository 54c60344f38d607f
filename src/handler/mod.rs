//! Operation handlers and the registry that dispatches to them.

use std::sync::Arc;

use crate::error::Result;
use crate::link::LinkEvent;

pub mod context;
pub mod registry;

pub use context::Responder;
pub use registry::{OpEntry, OpRegistry, OpRegistryBuilder};

/// Handler invoked when a request for its opcode arrives (slave role).
///
/// Receives the request payload and a [`Responder`] bound to the current
/// cycle; calling [`Responder::send`] transmits the response frame.
pub type RequestHandler =
    Arc<dyn for<'a> Fn(&[u8], &mut Responder<'a>) -> Result<()> + Send + Sync>;

/// Handler invoked when the response to an outstanding request arrives
/// (host role), or with the timeout sentinel when the peer stays silent.
pub type ResponseHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Process-wide observer notified once per completed or timed-out cycle.
pub type EventObserver = Arc<dyn Fn(&LinkEvent) + Send + Sync>;
