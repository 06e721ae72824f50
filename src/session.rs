//! Echo session for the tokio backend.
//!
//! A session is the async driver of one [`Connection`]: it runs the
//! `Reading -> Writing -> Reading` cycle as a single linear loop with an
//! `.await` at each suspension point. The task that runs a session owns it,
//! so the endpoint and buffer live exactly as long as an operation can
//! still be outstanding on them.

use crate::runtime::{CloseReason, Connection};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Outcome of a finished session.
#[derive(Debug)]
pub struct SessionSummary {
    pub id: u64,
    pub echoed: u64,
    pub reason: CloseReason,
}

/// One accepted endpoint being echoed.
pub struct Session<S> {
    id: u64,
    conn: Connection<S>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(id: u64, stream: S) -> Self {
        Self {
            id,
            conn: Connection::new(stream),
        }
    }

    /// Drive the echo cycle until the peer disconnects or an I/O error
    /// occurs. Consumes the session; the endpoint is dropped on return.
    pub async fn run(mut self) -> SessionSummary {
        let id = self.id;
        self.conn.start();

        let reason = loop {
            trace!(id, "read start");
            let (stream, buf) = self.conn.stream_and_read_buf();
            let n = match stream.read(buf).await {
                Ok(0) => break CloseReason::PeerClosed,
                Ok(n) => n,
                Err(e) => break CloseReason::Read(e),
            };
            trace!(id, bytes = n, "read complete");

            self.conn.start_writing(n);
            trace!(id, bytes = n, "write start");
            let (stream, pending) = self.conn.stream_and_pending();
            // write_all retries partial writes internally
            let result = match stream.write_all(pending).await {
                Ok(()) => stream.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                break CloseReason::Write(e);
            }
            trace!(id, bytes = n, "write complete");
            self.conn.advance_write(n);
        };

        self.close(reason)
    }

    /// Terminal transition. The connection and its endpoint are released
    /// here, exactly once.
    fn close(mut self, reason: CloseReason) -> SessionSummary {
        self.conn.close();
        trace!(id = self.id, %reason, "closed");

        let summary = SessionSummary {
            id: self.id,
            echoed: self.conn.echoed(),
            reason,
        };
        drop(self.conn);
        summary
    }
}
