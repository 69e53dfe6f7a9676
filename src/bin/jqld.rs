//! jqld - table store daemon
//!
//! Loads a database and serves it to `RemoteDbms` clients over TCP.
//!
//! Usage:
//!   jqld --path tasks.json [--addr localhost:9999] [--max-payload-size N]
//!
//! Protocol:
//!   Request:  [4-byte length BE] [MessagePack payload]
//!   Response: [4-byte length BE] [MessagePack payload]
//!
//! In `standalone` or `client` mode jqld opens the database the same way a
//! front end would, prints its tables as JSON and exits.

use std::path::PathBuf;
use std::thread;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use jqldb::config::{Config, Mode, DEFAULT_ADDR, DEFAULT_MAX_PAYLOAD_SIZE};
use jqldb::DbmsServer;

#[derive(Debug, Parser)]
#[command(name = "jqld", version, about = "Serve a jql table store over TCP")]
struct Args {
    /// Mode of operation
    #[arg(short, long, default_value_t = Mode::Daemon)]
    mode: Mode,

    /// Address to listen on (daemon) or connect to (client)
    #[arg(short, long, default_value = DEFAULT_ADDR)]
    addr: String,

    /// Path to the jql storage (`*.json` file or `*.jql` directory)
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Largest request or response frame, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD_SIZE)]
    max_payload_size: usize,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Config {
            mode: args.mode,
            path: args.path,
            addr: args.addr,
            max_payload_size: args.max_payload_size,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from(Args::parse());
    tracing::info!(version = env!("CARGO_PKG_VERSION"), mode = %config.mode, "starting jqld");

    let dbms = config.open().await.context("failed to open database")?;
    let cancel = CancellationToken::new();

    if config.mode != Mode::Daemon {
        let tables = dbms.list_tables(&cancel).await?;
        println!("{}", serde_json::to_string_pretty(&tables)?);
        return Ok(());
    }

    let listener = TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;

    // Set up signal handler for graceful shutdown
    let mut signals = signal_hook::iterator::Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ])
    .context("failed to register signal handlers")?;
    let cancel_for_signal = cancel.clone();
    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            tracing::info!(signal = sig, "received signal, shutting down");
            cancel_for_signal.cancel();
        }
    });

    let server = DbmsServer::new(dbms, config.max_payload_size);
    if let Err(e) = server.serve(listener, cancel).await {
        bail!("server failed: {e}");
    }
    Ok(())
}
