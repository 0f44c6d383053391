//! Port event notification
//!
//! The background read loop never calls into application code. It pushes
//! [`PortEvent`]s into bounded `async_channel`s, one per registered
//! listener; listeners drain them from any thread or async task.

use async_channel::{Receiver, Sender, TrySendError, bounded};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Default per-listener event queue depth
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Identifies one logical serial port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId {
    pub bus: u8,
    pub address: u8,
    pub port: u8,
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}:{:03}/{}", self.bus, self.address, self.port)
    }
}

/// Events raised by a port's background tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// New bytes were appended to the receive buffer
    DataAvailable {
        port: PortId,
        /// Bytes appended by this read
        bytes: usize,
    },

    /// The read loop stopped on a fatal error
    ReadFailed { port: PortId, reason: String },
}

impl PortEvent {
    /// Port that raised the event
    pub fn port(&self) -> PortId {
        match self {
            PortEvent::DataAvailable { port, .. } | PortEvent::ReadFailed { port, .. } => *port,
        }
    }
}

/// Registry of event listeners for one port
pub struct EventListeners {
    senders: Mutex<Vec<Sender<PortEvent>>>,
    capacity: usize,
}

impl EventListeners {
    pub fn new(capacity: usize) -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register a new listener
    pub fn subscribe(&self) -> Receiver<PortEvent> {
        let (tx, rx) = bounded(self.capacity);
        lock(&self.senders).push(tx);
        rx
    }

    /// Deliver an event to every live listener
    ///
    /// A full queue drops the event for that listener: data-available is a
    /// level signal and the bytes stay in the receive buffer. Listeners whose
    /// receiver was dropped are unregistered.
    pub fn notify(&self, event: PortEvent) {
        let mut senders = lock(&self.senders);
        senders.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("Listener queue full, dropping {:?}", event);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        lock(&self.senders).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventListeners {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Lock a mutex, recovering the data if a holder panicked
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
