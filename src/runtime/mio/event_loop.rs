//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Each connection is interested in exactly one direction at a time:
//! `READABLE` while reading, `WRITABLE` while its last read is being
//! written back. Removing a connection from the registry is what releases
//! it.

use crate::error::BindError;
use crate::runtime::{
    bind_listener, CloseReason, ConnState, Connection, ConnectionRegistry, ACCEPT_RETRY,
};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use tracing::{debug, error, info, trace};

const LISTENER_TOKEN: Token = Token(usize::MAX);

const EVENTS_CAPACITY: usize = 1024;

/// Listener plus every live connection, driven by one thread.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    connections: ConnectionRegistry<TcpStream>,
    accept_failed: bool,
}

impl EventLoop {
    /// Bind the listening endpoint and register it for readiness.
    pub fn bind(addr: SocketAddr) -> Result<Self, BindError> {
        let io_err = |e: io::Error| BindError::Io(addr, e);

        let poll = Poll::new().map_err(io_err)?;
        let mut listener = TcpListener::from_std(bind_listener(addr)?);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .map_err(io_err)?;
        let local_addr = listener.local_addr().map_err(io_err)?;

        info!(address = %local_addr, "Server listening");

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            listener,
            connections: ConnectionRegistry::new(),
            accept_failed: false,
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr().unwrap()
    }

    /// Run the loop forever. Only a failure of the poller itself returns.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            let timeout = self.accept_failed.then_some(ACCEPT_RETRY);
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            if self.accept_failed {
                self.accept_failed =
                    accept_connections(&self.listener, self.poll.registry(), &mut self.connections);
            }

            for event in self.events.iter() {
                match event.token() {
                    LISTENER_TOKEN => {
                        self.accept_failed = accept_connections(
                            &self.listener,
                            self.poll.registry(),
                            &mut self.connections,
                        );
                    }
                    Token(conn_id) => {
                        if let Err(reason) =
                            handle_connection_event(conn_id, self.poll.registry(), &mut self.connections)
                        {
                            close_connection(self.poll.registry(), &mut self.connections, conn_id, reason);
                        }
                    }
                }
            }
        }
    }
}

/// Accept until the backlog is drained.
///
/// Returns `true` if an accept failed, in which case the caller retries
/// after a short timeout instead of waiting for the next readiness event.
fn accept_connections(
    listener: &TcpListener,
    registry: &Registry,
    connections: &mut ConnectionRegistry<TcpStream>,
) -> bool {
    loop {
        trace!("accept start");

        match listener.accept() {
            Ok((stream, peer)) => {
                let mut conn = Connection::new(stream);
                conn.start();
                let conn_id = connections.insert(conn);

                let Some(conn) = connections.get_mut(conn_id) else {
                    continue;
                };
                if let Err(e) = registry.register(conn.stream_mut(), Token(conn_id), Interest::READABLE) {
                    error!(conn_id, error = %e, "Failed to register connection");
                    connections.remove(conn_id);
                    continue;
                }

                trace!(conn_id, "accept complete");
                info!(conn_id, peer = %peer, "connection established");
                trace!(conn_id, "read start");
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                return true;
            }
        }
    }
}

/// Advance one connection on a readiness event.
///
/// `Err` carries the reason the connection must close.
fn handle_connection_event(
    conn_id: usize,
    registry: &Registry,
    connections: &mut ConnectionRegistry<TcpStream>,
) -> Result<(), CloseReason> {
    // Stale event for a connection already closed in this batch
    let Some(conn) = connections.get_mut(conn_id) else {
        return Ok(());
    };

    match conn.state() {
        ConnState::Reading => handle_readable(conn_id, registry, conn),
        ConnState::Writing { .. } => handle_writable(conn_id, registry, conn),
        ConnState::Idle | ConnState::Closed => Ok(()),
    }
}

fn handle_readable(
    conn_id: usize,
    registry: &Registry,
    conn: &mut Connection<TcpStream>,
) -> Result<(), CloseReason> {
    let (stream, buf) = conn.stream_and_read_buf();
    let n = loop {
        match stream.read(buf) {
            Ok(0) => return Err(CloseReason::PeerClosed),
            Ok(n) => break n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CloseReason::Read(e)),
        }
    };

    trace!(conn_id, bytes = n, "read complete");
    conn.start_writing(n);
    trace!(conn_id, bytes = n, "write start");

    registry
        .reregister(conn.stream_mut(), Token(conn_id), Interest::WRITABLE)
        .map_err(CloseReason::Write)
}

fn handle_writable(
    conn_id: usize,
    registry: &Registry,
    conn: &mut Connection<TcpStream>,
) -> Result<(), CloseReason> {
    loop {
        let (stream, pending) = conn.stream_and_pending();
        let n = match stream.write(pending) {
            Ok(0) => {
                return Err(CloseReason::Write(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write returned 0",
                )));
            }
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CloseReason::Write(e)),
        };

        if conn.advance_write(n) {
            break;
        }
        // Partial write, keep going until the socket pushes back
    }

    trace!(conn_id, "write complete");
    trace!(conn_id, "read start");

    registry
        .reregister(conn.stream_mut(), Token(conn_id), Interest::READABLE)
        .map_err(CloseReason::Read)
}

/// Terminal transition: deregister and drop the connection.
fn close_connection(
    registry: &Registry,
    connections: &mut ConnectionRegistry<TcpStream>,
    conn_id: usize,
    reason: CloseReason,
) {
    if let Some(mut conn) = connections.remove(conn_id) {
        conn.close();
        let _ = registry.deregister(conn.stream_mut());

        debug!(
            conn_id,
            echoed = conn.echoed(),
            reason = %reason,
            live = connections.len(),
            "Connection closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::BUFFER_SIZE;
    use std::net::TcpStream as StdTcpStream;
    use std::thread;
    use std::time::Duration;

    fn start_loop() -> SocketAddr {
        let mut event_loop = EventLoop::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = event_loop.local_addr();
        thread::spawn(move || event_loop.run());
        addr
    }

    fn connect(addr: SocketAddr) -> StdTcpStream {
        let client = StdTcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client
    }

    fn echo(client: &mut StdTcpStream, payload: &[u8]) -> Vec<u8> {
        client.write_all(payload).unwrap();
        let mut received = vec![0u8; payload.len()];
        client.read_exact(&mut received).unwrap();
        received
    }

    #[test]
    fn test_echo_round_trip() {
        let addr = start_loop();
        let mut client = connect(addr);

        assert_eq!(echo(&mut client, b"hello"), b"hello");
        assert_eq!(echo(&mut client, b"\x00\x01\x02"), b"\x00\x01\x02");
    }

    #[test]
    fn test_large_burst_preserved() {
        let addr = start_loop();
        let mut client = connect(addr);

        let payload: Vec<u8> = (0..(BUFFER_SIZE * 3 + 5)).map(|i| (i % 247) as u8).collect();
        assert_eq!(echo(&mut client, &payload), payload);
    }

    #[test]
    fn test_clients_are_isolated() {
        let addr = start_loop();

        let handles: Vec<_> = (0..6u8)
            .map(|c| {
                thread::spawn(move || {
                    let mut client = connect(addr);
                    let payload = vec![c; 700];
                    for _ in 0..20 {
                        assert_eq!(echo(&mut client, &payload), payload);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_abrupt_close_does_not_affect_others() {
        let addr = start_loop();
        let mut steady = connect(addr);
        assert_eq!(echo(&mut steady, b"before"), b"before");

        for _ in 0..10 {
            let mut quitter = connect(addr);
            quitter.write_all(&[9u8; 4096]).unwrap();
        }
        thread::sleep(Duration::from_millis(50));

        assert_eq!(echo(&mut steady, b"after"), b"after");
        let mut fresh = connect(addr);
        assert_eq!(echo(&mut fresh, b"fresh"), b"fresh");
    }

    #[test]
    fn test_second_bind_fails() {
        let addr = start_loop();
        assert!(matches!(EventLoop::bind(addr), Err(BindError::Io(_, _))));

        let mut client = connect(addr);
        assert_eq!(echo(&mut client, b"still up"), b"still up");
    }
}
