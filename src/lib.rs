//! # cmdlink
//!
//! Bidirectional request/response command protocol over a single
//! byte-oriented transport (typically a serial link). Either peer may act
//! as the initiator ("host": issue a request, await the response) or the
//! responder ("slave": receive a request, produce the response).
//!
//! ## Architecture
//!
//! - **Wire protocol** ([`protocol`]): frame codec with a one-byte opcode,
//!   little-endian length and CRC trailer, over two fixed 1040-byte
//!   buffers reused for every command.
//! - **Engine** ([`link`]): the session state machine: byte-at-a-time
//!   accumulation, one command in flight, automatic recovery from
//!   malformed frames and silent peers.
//! - **Handlers** ([`handler`]): a startup-frozen opcode registry; request
//!   handlers answer through a cycle-bound [`Responder`].
//! - **Driver** ([`CmdLink`]): a tokio task that feeds transport events
//!   into the engine and runs handler dispatch on a deferred queue, off
//!   the byte-arrival path.
//!
//! ## Example
//!
//! ```
//! use cmdlink::{loopback_pair, CmdLink, OP_PING};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let ((host_wire, host_events), (peer_wire, peer_events)) = loopback_pair();
//!
//!     // The responding side registers the built-in ping.
//!     let _peer = CmdLink::builder()
//!         .ping()
//!         .start(Box::new(peer_wire), peer_events);
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     let host = CmdLink::builder()
//!         .operation(OP_PING)
//!         .observer(move |event| {
//!             let _ = tx.send((event.op_code, event.timeout));
//!         })
//!         .start(Box::new(host_wire), host_events);
//!
//!     host.ping().unwrap();
//!     assert_eq!(rx.recv().await, Some((OP_PING, false)));
//! }
//! ```

pub mod client;
pub mod error;
pub mod handler;
pub mod link;
pub mod protocol;
pub mod transport;

pub use client::{CmdLink, CmdLinkBuilder};
pub use error::{LinkError, Result};
pub use handler::{OpRegistry, Responder};
pub use link::{
    LinkConfig, LinkEvent, Mode, Session, State, OP_PING, OP_RAW_DATA, PING_PAYLOAD, RSP_OK,
    RSP_TIMEOUT, RSP_UNREGISTERED,
};
pub use transport::{loopback_pair, ByteTransport, TransportEvent};
