//! Client broadcaster
//!
//! Owns the set of connected push-channel clients. Every client receives every
//! frame; sends are best-effort so one slow or vanished client never holds up
//! the others. Clients that are no longer alive are pruned by [`Broadcaster::cleanup`].

use heapless::Vec;
use log::{debug, info, warn};
use thiserror_no_std::Error;

use crate::protocol::GREETING;

/// Maximum number of simultaneously connected clients
pub const MAX_CLIENTS: usize = 4;

/// Transport-assigned identifier of a connection
pub type ClientId = u8;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    #[error("client outbox is full")]
    Full,
    #[error("client connection is closed")]
    Closed,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("client limit reached")]
    TooManyClients,
    #[error("client {0} is already connected")]
    AlreadyConnected(ClientId),
    #[error("client {0} went away during the greeting")]
    Send(ClientId),
}

/// One end of a push-channel connection
pub trait ClientSink {
    fn id(&self) -> ClientId;

    /// Queue a text frame for this client without blocking
    fn send_text(&mut self, frame: &str) -> Result<(), SendError>;

    /// Whether the underlying connection is still open
    fn is_alive(&self) -> bool;
}

/// Fan-out over every connected client
pub struct Broadcaster<C>
where
    C: ClientSink,
{
    clients: Vec<C, MAX_CLIENTS>,
}

impl<C> Broadcaster<C>
where
    C: ClientSink,
{
    pub const fn new() -> Self {
        Self {
            clients: Vec::new(),
        }
    }

    /// Register a new client.
    ///
    /// The client gets the greeting followed by `snapshot` before it is added,
    /// so its first state frame is always a full snapshot.
    pub fn connect(&mut self, mut client: C, snapshot: &str) -> Result<(), BroadcastError> {
        let id = client.id();
        if self.clients.iter().any(|c| c.id() == id) {
            return Err(BroadcastError::AlreadyConnected(id));
        }
        if self.clients.is_full() {
            return Err(BroadcastError::TooManyClients);
        }

        client
            .send_text(GREETING)
            .and_then(|_| client.send_text(snapshot))
            .map_err(|e| {
                warn!("Client {} failed during greeting: {}", id, e);
                BroadcastError::Send(id)
            })?;

        // Capacity was checked above
        let _ = self.clients.push(client);
        info!("Client {} connected ({} total)", id, self.clients.len());
        Ok(())
    }

    /// Forget a client. Returns `false` if it was not registered.
    pub fn disconnect(&mut self, id: ClientId) -> bool {
        let before = self.clients.len();
        self.clients.retain(|c| c.id() != id);
        let removed = self.clients.len() != before;
        if removed {
            info!("Client {} disconnected ({} left)", id, self.clients.len());
        }
        removed
    }

    /// Send `frame` to every client. Returns how many clients accepted it.
    pub fn broadcast(&mut self, frame: &str) -> usize {
        let mut delivered = 0;
        for client in self.clients.iter_mut() {
            match client.send_text(frame) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Dropping frame for client {}: {}", client.id(), e),
            }
        }
        debug!("Broadcast {} bytes to {} clients", frame.len(), delivered);
        delivered
    }

    /// Drop every client whose connection is gone. Returns how many were pruned.
    pub fn cleanup(&mut self) -> usize {
        let before = self.clients.len();
        self.clients.retain(|c| c.is_alive());
        let pruned = before - self.clients.len();
        if pruned > 0 {
            info!("Pruned {} dead clients ({} left)", pruned, self.clients.len());
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn clients(&self) -> &[C] {
        &self.clients
    }
}

impl<C> Default for Broadcaster<C>
where
    C: ClientSink,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloc::rc::Rc;
    use alloc::string::{String, ToString};
    use alloc::vec::Vec as StdVec;
    use core::cell::{Cell, RefCell};

    /// Client double that records every frame and can be told to fail
    #[derive(Clone)]
    pub(crate) struct RecordingClient {
        pub(crate) id: ClientId,
        pub(crate) frames: Rc<RefCell<StdVec<String>>>,
        pub(crate) alive: Rc<Cell<bool>>,
        pub(crate) full: Rc<Cell<bool>>,
    }

    impl RecordingClient {
        pub(crate) fn new(id: ClientId) -> Self {
            Self {
                id,
                frames: Rc::new(RefCell::new(StdVec::new())),
                alive: Rc::new(Cell::new(true)),
                full: Rc::new(Cell::new(false)),
            }
        }

        pub(crate) fn frames(&self) -> StdVec<String> {
            self.frames.borrow().clone()
        }
    }

    impl ClientSink for RecordingClient {
        fn id(&self) -> ClientId {
            self.id
        }

        fn send_text(&mut self, frame: &str) -> Result<(), SendError> {
            if !self.alive.get() {
                return Err(SendError::Closed);
            }
            if self.full.get() {
                return Err(SendError::Full);
            }
            self.frames.borrow_mut().push(frame.to_string());
            Ok(())
        }

        fn is_alive(&self) -> bool {
            self.alive.get()
        }
    }

    #[test]
    fn test_connect_sends_greeting_then_snapshot() {
        let mut broadcaster = Broadcaster::new();
        let client = RecordingClient::new(1);
        broadcaster.connect(client.clone(), "snapshot").unwrap();

        assert_eq!(client.frames(), ["Connected", "snapshot"]);
        assert_eq!(broadcaster.len(), 1);
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let mut broadcaster = Broadcaster::new();
        let a = RecordingClient::new(1);
        let b = RecordingClient::new(2);
        broadcaster.connect(a.clone(), "s").unwrap();
        broadcaster.connect(b.clone(), "s").unwrap();

        assert_eq!(broadcaster.broadcast("hello"), 2);
        assert_eq!(a.frames().last().unwrap(), "hello");
        assert_eq!(b.frames().last().unwrap(), "hello");
    }

    #[test]
    fn test_failing_client_does_not_block_others() {
        let mut broadcaster = Broadcaster::new();
        let slow = RecordingClient::new(1);
        let dead = RecordingClient::new(2);
        let ok = RecordingClient::new(3);
        for c in [&slow, &dead, &ok] {
            broadcaster.connect(c.clone(), "s").unwrap();
        }
        slow.full.set(true);
        dead.alive.set(false);

        assert_eq!(broadcaster.broadcast("tick"), 1);
        assert_eq!(ok.frames().last().unwrap(), "tick");
        assert_eq!(slow.frames().len(), 2);
        // Still registered until the cleanup pass
        assert_eq!(broadcaster.len(), 3);
    }

    #[test]
    fn test_cleanup_prunes_dead_clients() {
        let mut broadcaster = Broadcaster::new();
        let a = RecordingClient::new(1);
        let b = RecordingClient::new(2);
        broadcaster.connect(a.clone(), "s").unwrap();
        broadcaster.connect(b.clone(), "s").unwrap();

        b.alive.set(false);
        assert_eq!(broadcaster.cleanup(), 1);
        assert_eq!(broadcaster.len(), 1);
        assert_eq!(broadcaster.clients()[0].id(), 1);
        assert_eq!(broadcaster.cleanup(), 0);
    }

    #[test]
    fn test_client_limit() {
        let mut broadcaster = Broadcaster::new();
        for id in 0..MAX_CLIENTS as ClientId {
            broadcaster.connect(RecordingClient::new(id), "s").unwrap();
        }
        assert_eq!(
            broadcaster.connect(RecordingClient::new(99), "s"),
            Err(BroadcastError::TooManyClients)
        );

        assert!(broadcaster.disconnect(0));
        assert!(!broadcaster.disconnect(0));
        assert!(broadcaster.connect(RecordingClient::new(99), "s").is_ok());
    }

    #[test]
    fn test_duplicate_and_dead_connections_are_refused() {
        let mut broadcaster = Broadcaster::new();
        broadcaster.connect(RecordingClient::new(1), "s").unwrap();
        assert_eq!(
            broadcaster.connect(RecordingClient::new(1), "s"),
            Err(BroadcastError::AlreadyConnected(1))
        );

        let gone = RecordingClient::new(2);
        gone.alive.set(false);
        assert_eq!(
            broadcaster.connect(gone, "s"),
            Err(BroadcastError::Send(2))
        );
        assert_eq!(broadcaster.len(), 1);
    }
}
