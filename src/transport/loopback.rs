//! In-memory loopback transport.
//!
//! [`loopback_pair`] returns two connected endpoints plus their event
//! streams: a byte put on one side lands in the peer's receive queue and
//! raises `DataReady` there, while the sender immediately observes
//! `TxEmpty` (the transmit register drains instantly). This is the test
//! and demo stand-in for a real serial device.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use super::{ByteTransport, TransportError, TransportEvent};

type ByteQueue = Arc<Mutex<VecDeque<u8>>>;

/// One endpoint of an in-memory byte link.
pub struct Loopback {
    rx: ByteQueue,
    peer_rx: ByteQueue,
    events: mpsc::UnboundedSender<TransportEvent>,
    peer_events: mpsc::UnboundedSender<TransportEvent>,
}

/// Create two connected endpoints and their event receivers.
pub fn loopback_pair() -> (
    (Loopback, mpsc::UnboundedReceiver<TransportEvent>),
    (Loopback, mpsc::UnboundedReceiver<TransportEvent>),
) {
    let queue_a: ByteQueue = Arc::new(Mutex::new(VecDeque::new()));
    let queue_b: ByteQueue = Arc::new(Mutex::new(VecDeque::new()));
    let (events_a_tx, events_a_rx) = mpsc::unbounded_channel();
    let (events_b_tx, events_b_rx) = mpsc::unbounded_channel();

    let side_a = Loopback {
        rx: queue_a.clone(),
        peer_rx: queue_b.clone(),
        events: events_a_tx.clone(),
        peer_events: events_b_tx.clone(),
    };
    let side_b = Loopback {
        rx: queue_b,
        peer_rx: queue_a,
        events: events_b_tx,
        peer_events: events_a_tx,
    };

    ((side_a, events_a_rx), (side_b, events_b_rx))
}

fn locked(queue: &ByteQueue) -> MutexGuard<'_, VecDeque<u8>> {
    match queue.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ByteTransport for Loopback {
    fn put_byte(&mut self, byte: u8) -> Result<(), TransportError> {
        locked(&self.peer_rx).push_back(byte);

        // A dropped peer receiver means the other engine is gone.
        self.peer_events
            .send(TransportEvent::DataReady)
            .map_err(|_| TransportError::Closed)?;
        self.events
            .send(TransportEvent::TxEmpty)
            .map_err(|_| TransportError::Closed)?;
        Ok(())
    }

    fn get_byte(&mut self) -> Option<u8> {
        locked(&self.rx).pop_front()
    }
}
