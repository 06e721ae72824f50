//! TCP listener for the tokio backend.
//!
//! Accepts incoming connections and hands each one to its own task running
//! an echo [`Session`]. The listener never waits on or supervises sessions.

use crate::error::BindError;
use crate::runtime::{bind_listener, is_resource_exhaustion, ACCEPT_RETRY};
use crate::session::Session;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace};

/// Server instance
pub struct Server {
    listener: TcpListener,
    next_id: u64,
}

impl Server {
    /// Bind the listening endpoint. Must be called inside a tokio runtime.
    pub fn bind(addr: SocketAddr) -> Result<Self, BindError> {
        let std_listener = bind_listener(addr)?;
        let listener = TcpListener::from_std(std_listener).map_err(|e| BindError::Io(addr, e))?;
        let local_addr = listener.local_addr().map_err(|e| BindError::Io(addr, e))?;

        info!(address = %local_addr, "Server listening");

        Ok(Server {
            listener,
            next_id: 0,
        })
    }

    /// Address actually bound, for tests binding port 0
    #[cfg(test)]
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr().unwrap()
    }

    /// Accept connections forever.
    ///
    /// A failed accept is logged and never ends the loop. The next accept is
    /// armed straight away, except after descriptor exhaustion, where it
    /// waits `ACCEPT_RETRY` first.
    pub async fn run(mut self) {
        loop {
            trace!("accept start");

            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let id = self.next_id;
                    self.next_id += 1;
                    trace!(id, "accept complete");
                    info!(id, peer = %peer, "connection established");

                    tokio::spawn(async move {
                        let summary = Session::new(id, stream).run().await;
                        debug!(
                            id = summary.id,
                            peer = %peer,
                            echoed = summary.echoed,
                            reason = %summary.reason,
                            "Connection closed"
                        );
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    if is_resource_exhaustion(&e) {
                        tokio::time::sleep(ACCEPT_RETRY).await;
                    }
                }
            }
        }
    }
}
