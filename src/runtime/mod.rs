//! Shared runtime pieces for the echo backends.
//!
//! Both backends share:
//! - `Connection` / `ConnState`: the per-connection echo state machine
//! - `CloseReason`: why a connection reached its terminal state
//! - `bind_listener`: the socket setup used by every listener
//!
//! The tokio backend lives in `crate::server`; the readiness-based mio
//! backend lives in `mio`.

mod connection;
mod mio;

pub(crate) use self::mio::EventLoop;
pub(crate) use connection::{CloseReason, ConnState, Connection, ConnectionRegistry};

use crate::error::BindError;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Capacity of each connection's echo buffer.
pub const BUFFER_SIZE: usize = 1024;

/// Pending connections queued by the kernel before accept.
const LISTEN_BACKLOG: i32 = 1024;

/// Pause before accepting again after the process or system ran out of
/// descriptors, so pending connections are retried without spinning.
pub const ACCEPT_RETRY: Duration = Duration::from_millis(100);

/// Whether an accept failed because descriptors or memory ran out.
pub fn is_resource_exhaustion(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        matches!(
            e.raw_os_error(),
            Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
        )
    }

    #[cfg(not(unix))]
    {
        let _ = e;
        false
    }
}

/// Create a non-blocking TCP listener bound to `addr`.
///
/// `SO_REUSEADDR` is set so restarts don't wait out TIME_WAIT, but
/// `SO_REUSEPORT` is not: a second listener on the same port must fail.
pub(crate) fn bind_listener(addr: SocketAddr) -> Result<std::net::TcpListener, BindError> {
    let bind = || -> io::Result<std::net::TcpListener> {
        let socket = socket2::Socket::new(
            socket2::Domain::for_address(addr),
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;

        #[cfg(unix)]
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;

        Ok(socket.into())
    };

    bind().map_err(|e| BindError::Io(addr, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_resource_exhaustion_errors() {
        assert!(is_resource_exhaustion(&io::Error::from_raw_os_error(libc::EMFILE)));
        assert!(is_resource_exhaustion(&io::Error::from_raw_os_error(libc::ENFILE)));
        assert!(!is_resource_exhaustion(&io::Error::from_raw_os_error(
            libc::ECONNABORTED
        )));
        assert!(!is_resource_exhaustion(&io::Error::new(
            io::ErrorKind::Other,
            "no errno"
        )));
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_second_bind_fails() {
        let first = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();

        let err = bind_listener(addr).unwrap_err();
        match err {
            BindError::Io(failed, e) => {
                assert_eq!(failed, addr);
                assert_eq!(e.kind(), std::io::ErrorKind::AddrInUse);
            }
            other => panic!("unexpected: {:?}", other),
        }

        // The first listener is unaffected
        let client = std::net::TcpStream::connect(addr);
        assert!(client.is_ok());
    }
}
