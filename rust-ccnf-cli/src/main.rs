//! ccnf — command-line client for the ccnf forwarder.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

/// ccnf forwarder command-line client
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Sets the level of verbosity
    #[clap(short, long, global = true)]
    verbose: bool,

    /// Subcommand to execute
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send an Interest and print the ContentObject response
    Interest {
        /// Name to request (URI format, e.g. /a/b)
        name: String,

        /// Timeout in milliseconds
        #[clap(short, long, default_value = "4000")]
        timeout: u64,

        /// Scope selector (0 local, 1 no link faces, 2 unrestricted)
        #[clap(short, long)]
        scope: Option<u8>,

        /// Prefer the rightmost (latest) match
        #[clap(long)]
        rightmost: bool,
    },

    /// Publish a ContentObject into the forwarder's store
    Publish {
        /// Name to publish under (URI format)
        name: String,

        /// Content to publish (string)
        content: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Interest {
            name,
            timeout,
            scope,
            rightmost,
        } => commands::interest::send_interest(name, timeout, scope, rightmost).await,
        Commands::Publish { name, content } => commands::publish::publish(name, content).await,
    }
}
