//! The protocol engine core.
//!
//! [`Session`] owns the two fixed frame buffers, the mode/state pair and
//! the operation registry, and implements the ingestion tier: every entry
//! point does minimal, non-blocking work (append a byte, advance the state
//! machine, queue an [`Action`]) and returns. The driver executes the
//! queued actions (arming the response timer, running the deferred
//! dispatchers) outside this context, so handler callbacks never run on
//! the byte-arrival path.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::state::{IoEvent, Mode, State};
use crate::error::{LinkError, Result};
use crate::handler::{EventObserver, OpRegistry, Responder};
use crate::protocol::command::{buffered_op_code, Command, CommandKind};
use crate::protocol::frame_buffer::FrameBuffer;
use crate::protocol::wire_format::{self, expected_frame_len, FRAME_CAPACITY};
use crate::transport::ByteTransport;

/// Base of the control/diagnostic op-code range.
pub const OP_INTERNAL: u8 = 0x10;

/// Link liveness check. Request payload is [`PING_PAYLOAD`], the reply is
/// [`RSP_OK`].
pub const OP_PING: u8 = OP_INTERNAL + 1;

/// Opaque data transfer.
pub const OP_RAW_DATA: u8 = OP_INTERNAL + 2;

/// Response payload meaning "handled fine".
pub const RSP_OK: &[u8] = b"ok";

/// Sentinel payload handed to the response handler when the wait timer
/// expires.
pub const RSP_TIMEOUT: &[u8] = b"to";

/// Response payload sent for a request whose opcode has no registration.
pub const RSP_UNREGISTERED: &[u8] = b"ur";

/// Request payload of the built-in ping.
pub const PING_PAYLOAD: &[u8] = b"yq";

/// Default response-wait timeout.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(4000);

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Verify the CRC trailer of received frames.
    ///
    /// Off by default: the interoperating peers this engine was built
    /// against skip the check, while the trailer is always computed on
    /// encode. Turn it on when the far side verifies.
    pub verify_crc: bool,

    /// How long to wait for a response after a request finishes sending.
    ///
    /// Must cover the peer's slowest turnaround; the timer is not
    /// refreshed mid-wait.
    pub response_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            verify_crc: false,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

/// Notification delivered to the event observer, exactly once per
/// completed or timed-out cycle.
#[derive(Debug, Clone)]
pub struct LinkEvent {
    /// Opcode of the command the cycle carried.
    pub op_code: u8,
    /// Payload of the request (slave side), the response (host side) or
    /// the timeout sentinel.
    pub payload: Bytes,
    /// True when the cycle ended because the peer stayed silent.
    pub timeout: bool,
}

/// Work the ingestion tier queues for the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Start the single-shot response-wait timer.
    ArmTimer,
    /// Stop the response-wait timer.
    DisarmTimer,
    /// Run [`Session::dispatch_request`] on the deferred tier.
    DispatchRequest,
    /// Run [`Session::dispatch_response`] on the deferred tier.
    DispatchResponse,
}

/// The protocol engine.
///
/// Exactly one session exists per link. It is an owned value, typically
/// held behind the driver's lock, not ambient state.
pub struct Session {
    mode: Mode,
    state: State,
    rx: FrameBuffer,
    tx: FrameBuffer,
    /// A receive cycle is in progress; cleared on completion or error so
    /// the next byte starts fresh.
    rx_cycle: bool,
    /// Expected total frame length, 0 until the 3-byte prefix is in.
    rx_expected: usize,
    registry: Arc<OpRegistry>,
    observer: EventObserver,
    config: LinkConfig,
    actions: VecDeque<Action>,
}

impl Session {
    /// Create an idle session over a frozen registry.
    pub fn new(registry: Arc<OpRegistry>, config: LinkConfig) -> Self {
        Self {
            mode: Mode::Idle,
            state: State::Idle,
            rx: FrameBuffer::new(),
            tx: FrameBuffer::new(),
            rx_cycle: false,
            rx_expected: 0,
            registry,
            observer: Arc::new(|_: &LinkEvent| {}),
            config,
            actions: VecDeque::new(),
        }
    }

    /// Current role.
    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Current cycle state.
    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    /// Engine configuration.
    #[inline]
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Replace the event observer.
    pub fn set_observer(&mut self, observer: EventObserver) {
        self.observer = observer;
    }

    /// Pop the next queued action, if any.
    pub fn take_action(&mut self) -> Option<Action> {
        self.actions.pop_front()
    }

    /// Opcode of the frame currently held in the receive buffer.
    pub(crate) fn pending_op_code(&self) -> Option<u8> {
        buffered_op_code(&self.rx)
    }

    // --- state machine ---

    fn set_mode(&mut self, new: Mode) {
        if self.mode != new {
            tracing::debug!(from = %self.mode, to = %new, "mode");
            self.mode = new;
        }
    }

    /// Enter `new`, run its entry effect, then follow the auto-advance
    /// table until it settles.
    fn set_state(&mut self, new: State) {
        if self.state == new {
            return;
        }
        tracing::debug!(from = %self.state, to = %new, "state");
        self.state = new;
        self.on_enter(new);

        while let Some(next) = self.state.auto_advance(self.mode) {
            tracing::debug!(from = %self.state, to = %next, "state");
            self.state = next;
            self.on_enter(next);
        }
    }

    fn on_enter(&mut self, state: State) {
        match state {
            State::Idle => self.set_mode(Mode::Idle),
            State::ReqSending => self.set_mode(Mode::Host),
            State::ReqSent => self.actions.push_back(Action::ArmTimer),
            State::ReqReceiving => self.set_mode(Mode::Slave),
            State::ReqReceived => self.actions.push_back(Action::DispatchRequest),
            State::RspReceived => {
                self.actions.push_back(Action::DisarmTimer);
                self.actions.push_back(Action::DispatchResponse);
            }
            _ => {}
        }
    }

    fn apply(&mut self, event: IoEvent) {
        match event {
            IoEvent::SendStarted => {
                if self.mode == Mode::Slave {
                    self.set_state(State::RspSending);
                } else {
                    self.set_state(State::ReqSending);
                }
            }
            IoEvent::SendComplete => match self.mode {
                Mode::Host => self.set_state(State::ReqSent),
                Mode::Slave => self.set_state(State::RspSent),
                Mode::Idle => tracing::error!("send complete outside a cycle"),
            },
            IoEvent::SendError => self.set_state(State::ErrSend),
            IoEvent::ReceiveStarted => {
                if self.mode == Mode::Host {
                    self.set_state(State::RspReceiving);
                } else {
                    self.set_state(State::ReqReceiving);
                }
            }
            IoEvent::ReceiveComplete => match self.mode {
                Mode::Host => self.set_state(State::RspReceived),
                Mode::Slave => self.set_state(State::ReqReceived),
                Mode::Idle => tracing::warn!("receive complete outside a cycle"),
            },
            IoEvent::ReceiveError => self.set_state(State::ErrReceive),
        }
    }

    // --- receive path ---

    /// Drain and ingest every byte the transport has ready.
    pub fn handle_data_ready(&mut self, transport: &mut dyn ByteTransport) {
        while let Some(byte) = transport.get_byte() {
            self.on_rx_byte(byte);
        }
    }

    fn on_rx_byte(&mut self, byte: u8) {
        match self.mode {
            Mode::Host => {
                if !matches!(self.state, State::ReqSent | State::RspReceiving) {
                    tracing::warn!(state = %self.state, "dropping byte: no response expected");
                    return;
                }
            }
            Mode::Slave => {
                if self.state != State::ReqReceiving {
                    tracing::warn!(state = %self.state, "dropping byte: no request expected");
                    return;
                }
            }
            Mode::Idle => {}
        }

        if !self.rx_cycle {
            self.rx.reset();
            self.rx_cycle = true;
            self.rx_expected = 0;
        }

        if self.rx.push(byte).is_err() {
            // Unreachable while the expected-length guard holds.
            self.end_rx_cycle(IoEvent::ReceiveError);
            return;
        }

        if self.rx.len() == 1 {
            self.apply(IoEvent::ReceiveStarted);
        }

        if self.rx_expected == 0 {
            match expected_frame_len(self.rx.filled()) {
                None => return,
                Some(total) if total > FRAME_CAPACITY => {
                    tracing::error!(total, "frame exceeds capacity");
                    self.end_rx_cycle(IoEvent::ReceiveError);
                    return;
                }
                Some(total) => self.rx_expected = total,
            }
        }

        if self.rx.len() < self.rx_expected {
            return;
        }

        // Complete frame: validate against the current role. In host mode
        // the response opcode must match the outstanding request's.
        let (expected_start, expected_op) = if self.mode == Mode::Host {
            (
                CommandKind::Response.start_marker(),
                buffered_op_code(&self.tx),
            )
        } else {
            (CommandKind::Request.start_marker(), None)
        };

        let outcome = match wire_format::validate(
            self.rx.filled(),
            expected_start,
            expected_op,
            self.config.verify_crc,
        ) {
            Ok(()) => IoEvent::ReceiveComplete,
            Err(_) => IoEvent::ReceiveError,
        };
        self.end_rx_cycle(outcome);
    }

    fn end_rx_cycle(&mut self, event: IoEvent) {
        self.rx_cycle = false;
        self.rx_expected = 0;
        self.apply(event);
    }

    // --- transmit path ---

    /// Resume sending after the transport drained.
    pub fn handle_tx_empty(&mut self, transport: &mut dyn ByteTransport) {
        if self.tx.is_empty() {
            return;
        }
        let _ = self.pump_tx(transport);
    }

    fn pump_tx(&mut self, transport: &mut dyn ByteTransport) -> Result<()> {
        if self.tx.send_complete() {
            self.apply(IoEvent::SendComplete);
            return Ok(());
        }

        let byte = self.tx.next_unsent().expect("unsent byte present");
        match transport.put_byte(byte) {
            Ok(()) => {
                if self.tx.offset() == 1 {
                    self.apply(IoEvent::SendStarted);
                }
                Ok(())
            }
            Err(err) => {
                self.apply(IoEvent::SendError);
                Err(err.into())
            }
        }
    }

    // --- public command API ---

    /// Issue a request. Legal only while idle; the engine enforces one
    /// command in flight.
    pub fn request(
        &mut self,
        op_code: u8,
        payload: &[u8],
        transport: &mut dyn ByteTransport,
    ) -> Result<()> {
        if self.mode != Mode::Idle {
            tracing::warn!(mode = %self.mode, "cannot issue a request now");
            return Err(LinkError::InvalidState);
        }

        Command::new(CommandKind::Request, op_code, payload).encode_into(&mut self.tx)?;
        self.set_mode(Mode::Host);
        self.pump_tx(transport)
    }

    /// Send the response for the request held in the receive buffer.
    ///
    /// Legal in `ReqReceived` and, deliberately preserved, in `ReqSent`.
    pub fn respond(&mut self, payload: &[u8], transport: &mut dyn ByteTransport) -> Result<()> {
        if !matches!(self.state, State::ReqReceived | State::ReqSent) {
            tracing::warn!(state = %self.state, "invalid state for response");
            return Err(LinkError::InvalidState);
        }

        let op_code = match buffered_op_code(&self.rx) {
            Some(op) => op,
            None => {
                tracing::error!("receive buffer was reset before the response was built");
                self.apply(IoEvent::SendError);
                return Err(LinkError::StaleBuffer);
            }
        };

        Command::new(CommandKind::Response, op_code, payload).encode_into(&mut self.tx)?;
        self.pump_tx(transport)
    }

    // --- timeout ---

    /// The response-wait timer fired.
    ///
    /// Honored in every host-side waiting state: `ReqSent`,
    /// `RspReceiving` (the timer is not refreshed by a partial response)
    /// and `ErrReceive` (the recovery path for a malformed response).
    /// Ignored elsewhere so a fire racing an already-dispatched response
    /// cannot produce a second observer event.
    pub fn handle_timer_fired(&mut self) {
        if !matches!(
            self.state,
            State::ReqSent | State::RspReceiving | State::ErrReceive
        ) {
            tracing::debug!(state = %self.state, "ignoring stale response timer");
            return;
        }

        let op_code = match Command::decode(self.tx.filled()) {
            Ok(cmd) => cmd.op_code,
            Err(_) => {
                tracing::error!("transmit buffer does not hold the outstanding request");
                return;
            }
        };

        let registry = Arc::clone(&self.registry);
        match registry.lookup(op_code) {
            Some(entry) => {
                if let Some(handler) = entry.response_handler() {
                    handler(RSP_TIMEOUT);
                }
                self.notify(LinkEvent {
                    op_code,
                    payload: Bytes::from_static(RSP_TIMEOUT),
                    timeout: true,
                });
            }
            // A request cannot have been sent for an unregistered opcode.
            None => tracing::error!(op_code, "no registration for the outstanding request"),
        }

        self.set_state(State::ErrTimeout);
    }

    // --- deferred dispatch ---

    /// Dispatch the received request to its handler (slave role). Runs on
    /// the deferred tier, never from the byte-arrival path.
    pub fn dispatch_request(&mut self, transport: &mut dyn ByteTransport) {
        let (op_code, payload) = match Command::decode(self.rx.filled()) {
            Ok(cmd) => (cmd.op_code, Bytes::copy_from_slice(cmd.payload)),
            Err(_) => {
                tracing::error!("receive buffer does not hold a request");
                return;
            }
        };

        let registry = Arc::clone(&self.registry);
        match registry.lookup(op_code) {
            Some(entry) => {
                if let Some(handler) = entry.request_handler() {
                    let mut responder = Responder::new(self, transport);
                    if let Err(err) = handler(&payload, &mut responder) {
                        tracing::error!(op_code, %err, "request handler failed");
                    }
                } else if let Err(err) = self.respond(&[], transport) {
                    tracing::error!(op_code, %err, "empty response failed");
                }
            }
            None => {
                tracing::error!(op_code, "request for unregistered op code");
                if let Err(err) = self.respond(RSP_UNREGISTERED, transport) {
                    tracing::error!(op_code, %err, "unregistered response failed");
                }
            }
        }

        self.notify(LinkEvent {
            op_code,
            payload,
            timeout: false,
        });
    }

    /// Dispatch the received response to its handler (host role). Ends the
    /// cycle first so the handler may immediately issue a follow-up
    /// request.
    pub fn dispatch_response(&mut self) {
        self.set_state(State::Idle);

        let (op_code, payload) = match Command::decode(self.rx.filled()) {
            Ok(cmd) => (cmd.op_code, Bytes::copy_from_slice(cmd.payload)),
            Err(_) => {
                tracing::error!("receive buffer does not hold a response");
                return;
            }
        };

        let registry = Arc::clone(&self.registry);
        match registry.lookup(op_code) {
            Some(entry) => {
                if let Some(handler) = entry.response_handler() {
                    handler(&payload);
                }
                self.notify(LinkEvent {
                    op_code,
                    payload,
                    timeout: false,
                });
            }
            // A response was only accepted because its opcode matched the
            // outstanding request, which must have been registered.
            None => tracing::error!(op_code, "response for unregistered op code"),
        }
    }

    fn notify(&self, event: LinkEvent) {
        (self.observer)(&event);
    }
}
