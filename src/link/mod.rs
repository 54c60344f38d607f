//! The protocol engine: session state machine, byte accumulation and
//! deferred dispatch.

pub mod session;
pub mod state;

pub use session::{
    Action, LinkConfig, LinkEvent, Session, OP_PING, OP_RAW_DATA, PING_PAYLOAD, RSP_OK,
    RSP_TIMEOUT, RSP_UNREGISTERED,
};
pub use state::{IoEvent, Mode, State};
