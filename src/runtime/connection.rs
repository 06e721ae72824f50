//! Connection state machine for managing echo connections.
//!
//! Each connection owns its endpoint and a fixed-size buffer that is used
//! for the inbound read and then for writing exactly those bytes back.
//! Reads and writes strictly alternate, so the buffer is never touched by
//! two operations at once.

use crate::runtime::BUFFER_SIZE;
use slab::Slab;
use std::fmt;
use std::io;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted but not started.
    Idle,
    /// Waiting for bytes from the peer.
    Reading,
    /// Writing back the bytes produced by the last read.
    Writing {
        /// Bytes already accepted by the transport.
        written: usize,
        /// Bytes produced by the last read.
        total: usize,
    },
    /// Terminal. Resources are released on entry.
    Closed,
}

/// Why a connection reached its terminal state.
#[derive(Debug)]
pub enum CloseReason {
    /// Orderly end of stream from the peer.
    PeerClosed,
    Read(io::Error),
    Write(io::Error),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "peer closed"),
            CloseReason::Read(e) => write!(f, "read failed: {}", e),
            CloseReason::Write(e) => write!(f, "write failed: {}", e),
        }
    }
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    state: ConnState,
    buf: Box<[u8; BUFFER_SIZE]>,
    echoed: u64,
}

impl<S> Connection<S> {
    /// Create a new connection in the idle state.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            state: ConnState::Idle,
            buf: Box::new([0u8; BUFFER_SIZE]),
            echoed: 0,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Connected endpoint, for registering it with a poller.
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Total bytes written back to the peer.
    pub fn echoed(&self) -> u64 {
        self.echoed
    }

    /// `Idle -> Reading`.
    pub fn start(&mut self) {
        debug_assert_eq!(self.state, ConnState::Idle);
        self.state = ConnState::Reading;
    }

    /// Split borrow of the endpoint and the bytes still owed to the peer.
    /// The slice is empty unless writing.
    pub fn stream_and_pending(&mut self) -> (&mut S, &[u8]) {
        let pending = match self.state {
            ConnState::Writing { written, total } => &self.buf[written..total],
            _ => &[][..],
        };
        (&mut self.stream, pending)
    }

    /// Split borrow of the endpoint and the read buffer.
    pub fn stream_and_read_buf(&mut self) -> (&mut S, &mut [u8]) {
        debug_assert_eq!(self.state, ConnState::Reading);
        (&mut self.stream, &mut self.buf[..])
    }

    /// `Reading -> Writing` after a read of `n` bytes.
    pub fn start_writing(&mut self, n: usize) {
        debug_assert_eq!(self.state, ConnState::Reading);
        debug_assert!(n <= BUFFER_SIZE);
        self.state = ConnState::Writing {
            written: 0,
            total: n,
        };
    }

    /// Record `n` bytes accepted by the transport.
    ///
    /// Returns `true` once the whole read has been written back, at which
    /// point the connection is reading again.
    pub fn advance_write(&mut self, n: usize) -> bool {
        let ConnState::Writing { written, total } = self.state else {
            return false;
        };

        let advanced = (written + n).min(total);
        self.echoed += (advanced - written) as u64;

        if advanced == total {
            self.state = ConnState::Reading;
            true
        } else {
            self.state = ConnState::Writing {
                written: advanced,
                total,
            };
            false
        }
    }

    /// Enter the terminal state.
    pub fn close(&mut self) {
        self.state = ConnState::Closed;
    }
}

/// Registry of live connections using slab allocation.
///
/// The slab key is the connection's identity for its whole life. Removing
/// the entry is the single release point of the connection and its endpoint.
pub struct ConnectionRegistry<S> {
    connections: Slab<Connection<S>>,
}

impl<S> ConnectionRegistry<S> {
    pub fn new() -> Self {
        Self {
            connections: Slab::new(),
        }
    }

    /// Insert a new connection and return its key.
    pub fn insert(&mut self, conn: Connection<S>) -> usize {
        self.connections.insert(conn)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry, handing back ownership.
    pub fn remove(&mut self, id: usize) -> Option<Connection<S>> {
        self.connections.try_remove(id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }
}

impl<S> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
