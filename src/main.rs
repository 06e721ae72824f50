//! echo-server: an asynchronous TCP echo server
//!
//! Accepts connections on one port and writes every byte it reads back to
//! the peer that sent it, until that peer disconnects.
//!
//! Features:
//! - tokio backend (task per connection) or mio backend (single event loop)
//! - Byte-transparent echo through a fixed 1024-byte buffer per connection
//! - Configuration via CLI arguments or TOML file

mod config;
mod diagnostics;
mod error;
mod runtime;
mod server;
mod session;

use clap::error::ErrorKind;
use clap::Parser;
use config::{CliArgs, Config, RuntimeType};
use error::StartupError;
use runtime::EventLoop;
use server::Server;
use std::net::SocketAddr;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(StartupError::EXIT_CODE)
        }
    }
}

fn run() -> Result<(), StartupError> {
    let cli = match CliArgs::try_parse() {
        Ok(cli) => cli,
        Err(e)
            if matches!(
                e.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            let _ = e.print();
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(depth) = cli.stack_probe {
        init_logging(&cli.log_level);
        println!("{}", diagnostics::probe(usize::from(depth)));
        return Ok(());
    }

    // Load configuration
    let config = Config::from_args(cli)?;
    init_logging(&config.log_level);

    let addr = config.listen_addr()?;

    info!(
        address = %addr,
        runtime = ?config.runtime,
        workers = ?config.workers,
        "Starting echo server"
    );

    match config.runtime {
        RuntimeType::Tokio => run_tokio(addr, config.workers),
        RuntimeType::Mio => run_mio(addr),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Run with the tokio runtime (one task per connection)
fn run_tokio(addr: SocketAddr, workers: Option<usize>) -> Result<(), StartupError> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = workers.filter(|&n| n > 0) {
        builder.worker_threads(workers);
    }
    let rt = builder.enable_all().build().map_err(StartupError::Runtime)?;

    rt.block_on(async {
        let server = Server::bind(addr)?;
        server.run().await;
        Ok::<(), StartupError>(())
    })
}

/// Run with the mio runtime (epoll on Linux, kqueue on macOS)
fn run_mio(addr: SocketAddr) -> Result<(), StartupError> {
    let mut event_loop = EventLoop::bind(addr)?;
    event_loop.run().map_err(StartupError::Runtime)
}
