//! mio-based event loop implementation.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS).
//! A single loop thread owns the listener and every connection.

mod event_loop;

pub(crate) use event_loop::EventLoop;
