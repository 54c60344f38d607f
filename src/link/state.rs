//! Protocol roles, states and the auto-advance table.

use std::fmt;

/// Which side of an exchange this endpoint currently plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// No command in flight.
    Idle,
    /// Sent a request, waiting for the response.
    Host,
    /// Receiving a request, will produce the response.
    Slave,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Idle => "idle",
            Mode::Host => "host",
            Mode::Slave => "slave",
        })
    }
}

/// Progress within the current send/receive cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    /// The request is being sent.
    ReqSending,
    /// The request is sent; the response timer is armed.
    ReqSent,
    /// A request is being received.
    ReqReceiving,
    /// The request is received and queued for dispatch.
    ReqReceived,
    /// The response is being sent.
    RspSending,
    /// The response is sent.
    RspSent,
    /// The response is being received.
    RspReceiving,
    /// The response is received and queued for dispatch.
    RspReceived,
    /// Waiting for the response timed out.
    ErrTimeout,
    /// Transmission failed.
    ErrSend,
    /// A received frame was oversized or malformed.
    ErrReceive,
}

impl State {
    /// States that immediately collapse back to [`State::Idle`] on entry.
    ///
    /// This is the explicit auto-advance annotation: terminal cycle states
    /// re-enter idle in the same transition rather than by the transition
    /// function calling itself. The one asymmetry is `ErrReceive` in host
    /// mode, which stays put and relies on the still-armed response timer
    /// for recovery.
    pub fn auto_advance(self, mode: Mode) -> Option<State> {
        match self {
            State::RspSent | State::ErrSend | State::ErrTimeout => Some(State::Idle),
            State::ErrReceive if mode != Mode::Host => Some(State::Idle),
            _ => None,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Idle => "idle",
            State::ReqSending => "req_sending",
            State::ReqSent => "req_sent",
            State::ReqReceiving => "req_receiving",
            State::ReqReceived => "req_received",
            State::RspSending => "rsp_sending",
            State::RspSent => "rsp_sent",
            State::RspReceiving => "rsp_receiving",
            State::RspReceived => "rsp_received",
            State::ErrTimeout => "err_timeout",
            State::ErrSend => "err_sending",
            State::ErrReceive => "err_receiving",
        })
    }
}

/// Signals raised by the byte accumulator and transmit pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoEvent {
    /// First byte of a cycle went out.
    SendStarted,
    /// Every filled byte has been handed to the transport.
    SendComplete,
    /// The transport rejected a byte.
    SendError,
    /// First byte of a cycle arrived.
    ReceiveStarted,
    /// A complete frame arrived and validated.
    ReceiveComplete,
    /// An oversized or malformed frame arrived.
    ReceiveError,
}
