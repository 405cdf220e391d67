//! ccnfd — the content-centric-networking forwarding daemon.
//!
//! Accepts local clients on a filesystem-named stream socket and peers
//! over UDP, matches Interests against the content store, and forwards
//! unmatched Interests to every other attached face.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use rust_ccnf_common::metrics::ForwarderMetrics;
use rust_ccnf_core::{Config, Forwarder, Transport};

/// Content-centric-networking forwarding daemon
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Path of the local stream socket (overrides CCN_LOCAL_SOCKNAME)
    #[clap(long)]
    sockname: Option<std::path::PathBuf>,

    /// UDP port to accept datagrams on (overrides CCN_LOCAL_PORT)
    #[clap(short, long)]
    port: Option<u16>,

    /// Sets the level of verbosity
    #[clap(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let mut config = Config::from_env();
    if let Some(sockname) = cli.sockname {
        config.sockname = sockname;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let engine = Forwarder::new(ForwarderMetrics::new(), config.debug);
    let mut transport = Transport::bind(&config, engine)
        .await
        .with_context(|| format!("cannot bind {}", config.sockname.display()))?;

    transport.run().await.context("event loop failed")?;

    info!("ccnfd exiting");
    Ok(())
}
