//! Link builder and runtime driver.
//!
//! [`CmdLinkBuilder`] provides a fluent API for registering operations and
//! configuring the engine; [`CmdLink::start`] attaches a byte transport
//! and spawns the driver task. The driver is the engine's two-tier
//! scheduler:
//!
//! ```text
//! transport events ─┐
//! deferred queue   ─┼─► select! ─► Session (ingestion) ─► Actions
//! response timer   ─┘                │
//!                                    └─► deferred queue / timer
//! ```
//!
//! Ingestion (byte append, state transition) runs synchronously on each
//! event; handler dispatch is queued back through the deferred channel, so
//! it runs later, in submission order, never from the byte-arrival path.
//!
//! # Example
//!
//! ```ignore
//! use cmdlink::{CmdLink, loopback_pair};
//!
//! let ((wire, events), _peer) = loopback_pair();
//! let link = CmdLink::builder()
//!     .on_request(0x11, |_req, responder| responder.send(b"ok"))
//!     .start(Box::new(wire), events);
//!
//! link.request(0x11, b"yq")?;
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{LinkError, Result};
use crate::handler::{EventObserver, OpRegistry, OpRegistryBuilder, Responder};
use crate::link::{
    Action, LinkConfig, LinkEvent, Mode, Session, State, OP_PING, PING_PAYLOAD, RSP_OK,
};
use crate::transport::{ByteTransport, TransportEvent};

/// Work items the ingestion tier hands to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverMsg {
    ArmTimer,
    DisarmTimer,
    DispatchRequest,
    DispatchResponse,
}

/// Engine state shared between the driver task and the public handle.
struct Inner {
    session: Session,
    transport: Box<dyn ByteTransport>,
}

/// Builder for configuring and starting a [`CmdLink`].
pub struct CmdLinkBuilder {
    registry: OpRegistryBuilder,
    observer: Option<EventObserver>,
    config: LinkConfig,
}

impl CmdLinkBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            registry: OpRegistry::builder(),
            observer: None,
            config: LinkConfig::default(),
        }
    }

    /// Register the request handler for `op_code`.
    pub fn on_request<F>(mut self, op_code: u8, handler: F) -> Self
    where
        F: for<'a> Fn(&[u8], &mut Responder<'a>) -> Result<()> + Send + Sync + 'static,
    {
        self.registry = self.registry.request(op_code, handler);
        self
    }

    /// Register the response handler for `op_code`.
    pub fn on_response<F>(mut self, op_code: u8, handler: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.registry = self.registry.response(op_code, handler);
        self
    }

    /// Register `op_code` with neither handler.
    pub fn operation(mut self, op_code: u8) -> Self {
        self.registry = self.registry.operation(op_code);
        self
    }

    /// Register the built-in ping operation: requests for [`OP_PING`] are
    /// answered with [`RSP_OK`].
    pub fn ping(self) -> Self {
        self.on_request(OP_PING, |_req, responder| responder.send(RSP_OK))
    }

    /// Set the process-wide event observer.
    pub fn observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&LinkEvent) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Verify CRC trailers on received frames. Default: off.
    pub fn verify_crc(mut self, verify: bool) -> Self {
        self.config.verify_crc = verify;
        self
    }

    /// Set the response-wait timeout. Default: 4 seconds.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout = timeout;
        self
    }

    /// Freeze the registry, attach the transport and spawn the driver.
    ///
    /// `events` is the transport's event stream; the link shuts down when
    /// it closes.
    pub fn start(
        self,
        transport: Box<dyn ByteTransport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> CmdLink {
        let mut session = Session::new(Arc::new(self.registry.build()), self.config.clone());
        if let Some(observer) = self.observer {
            session.set_observer(observer);
        }

        let inner = Arc::new(Mutex::new(Inner { session, transport }));
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();

        let driver = tokio::spawn(drive(
            inner.clone(),
            events,
            msg_rx,
            self.config.response_timeout,
        ));

        CmdLink {
            inner,
            msg_tx,
            driver: Arc::new(driver),
        }
    }
}

impl Default for CmdLinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running link: the protocol engine plus its driver task.
///
/// The handle is the public API surface; it can be shared by cloning.
#[derive(Clone)]
pub struct CmdLink {
    inner: Arc<Mutex<Inner>>,
    msg_tx: mpsc::UnboundedSender<DriverMsg>,
    driver: Arc<JoinHandle<()>>,
}

impl CmdLink {
    /// Create a new link builder.
    pub fn builder() -> CmdLinkBuilder {
        CmdLinkBuilder::new()
    }

    /// Issue a request. Fails with [`LinkError::InvalidState`] while a
    /// command is in flight.
    pub fn request(&self, op_code: u8, payload: &[u8]) -> Result<()> {
        let mut inner = lock(&self.inner);
        let Inner { session, transport } = &mut *inner;
        let result = session.request(op_code, payload, transport.as_mut());
        self.flush_actions(session);
        result
    }

    /// Send a response for the request currently held by the engine.
    pub fn respond(&self, payload: &[u8]) -> Result<()> {
        let mut inner = lock(&self.inner);
        let Inner { session, transport } = &mut *inner;
        let result = session.respond(payload, transport.as_mut());
        self.flush_actions(session);
        result
    }

    /// Issue the built-in ping request.
    pub fn ping(&self) -> Result<()> {
        self.request(OP_PING, PING_PAYLOAD)
    }

    /// Replace the event observer.
    pub fn set_observer<F>(&self, observer: F)
    where
        F: Fn(&LinkEvent) + Send + Sync + 'static,
    {
        lock(&self.inner).session.set_observer(Arc::new(observer));
    }

    /// Current role.
    pub fn mode(&self) -> Mode {
        lock(&self.inner).session.mode()
    }

    /// Current cycle state.
    pub fn state(&self) -> State {
        lock(&self.inner).session.state()
    }

    /// Wait for the driver to exit: the transport's event stream closed,
    /// or this was the last handle and consuming it shuts the link down.
    pub async fn wait_for_shutdown(self) -> Result<()> {
        let Self { driver, .. } = self;
        match Arc::try_unwrap(driver) {
            Ok(handle) => handle.await.map_err(|_| LinkError::Closed),
            // Another handle still drives the link.
            Err(_) => Ok(()),
        }
    }

    fn flush_actions(&self, session: &mut Session) {
        while let Some(action) = session.take_action() {
            let msg = match action {
                Action::ArmTimer => DriverMsg::ArmTimer,
                Action::DisarmTimer => DriverMsg::DisarmTimer,
                Action::DispatchRequest => DriverMsg::DispatchRequest,
                Action::DispatchResponse => DriverMsg::DispatchResponse,
            };
            if self.msg_tx.send(msg).is_err() {
                tracing::error!("driver is gone; dropping {:?}", msg);
            }
        }
    }
}

fn lock(inner: &Arc<Mutex<Inner>>) -> MutexGuard<'_, Inner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Move queued session actions onto the driver's deferred FIFO.
fn drain_actions(session: &mut Session, pending: &mut VecDeque<DriverMsg>) {
    while let Some(action) = session.take_action() {
        pending.push_back(match action {
            Action::ArmTimer => DriverMsg::ArmTimer,
            Action::DisarmTimer => DriverMsg::DisarmTimer,
            Action::DispatchRequest => DriverMsg::DispatchRequest,
            Action::DispatchResponse => DriverMsg::DispatchResponse,
        });
    }
}

/// The driver loop: one task per link.
///
/// Exits when every public handle is gone (the message channel closes) or
/// the transport's event stream ends.
async fn drive(
    inner: Arc<Mutex<Inner>>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut msg_rx: mpsc::UnboundedReceiver<DriverMsg>,
    response_timeout: Duration,
) {
    let mut deadline: Option<Instant> = None;
    let mut pending = VecDeque::new();

    loop {
        // Deferred work queued by the previous iteration runs before the
        // next event is awaited, in submission order.
        while let Some(msg) = pending.pop_front() {
            match msg {
                DriverMsg::ArmTimer => deadline = Some(Instant::now() + response_timeout),
                DriverMsg::DisarmTimer => deadline = None,
                DriverMsg::DispatchRequest => {
                    let mut guard = lock(&inner);
                    let Inner { session, transport } = &mut *guard;
                    session.dispatch_request(transport.as_mut());
                    drain_actions(session, &mut pending);
                }
                DriverMsg::DispatchResponse => {
                    let mut guard = lock(&inner);
                    guard.session.dispatch_response();
                    drain_actions(&mut guard.session, &mut pending);
                }
            }
        }

        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::debug!("transport event stream closed; driver exiting");
                    break;
                };
                let mut guard = lock(&inner);
                let Inner { session, transport } = &mut *guard;
                match event {
                    TransportEvent::DataReady => session.handle_data_ready(transport.as_mut()),
                    TransportEvent::TxEmpty => session.handle_tx_empty(transport.as_mut()),
                }
                drain_actions(session, &mut pending);
            }

            msg = msg_rx.recv() => {
                let Some(msg) = msg else {
                    tracing::debug!("all link handles dropped; driver exiting");
                    break;
                };
                pending.push_back(msg);
            }

            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                let mut guard = lock(&inner);
                guard.session.handle_timer_fired();
                drain_actions(&mut guard.session, &mut pending);
            }
        }
    }
}
