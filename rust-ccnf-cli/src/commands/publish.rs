//! Content publishing command.

use anyhow::{Context, Result};
use log::info;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use rust_ccnf_common::packet::ContentObjectBuilder;
use rust_ccnf_core::Config;

/// Publish a ContentObject into the local forwarder's store. The store
/// keeps it for the daemon's lifetime and answers matching Interests.
pub async fn publish(name: String, content: String) -> Result<()> {
    let config = Config::from_env();
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let msg = ContentObjectBuilder::new(&name, content.as_bytes())
        .timestamp(ts)
        .build();

    let mut stream = UnixStream::connect(&config.sockname)
        .await
        .with_context(|| format!("cannot connect to {}", config.sockname.display()))?;
    stream.write_all(&msg).await?;
    stream.flush().await?;
    info!("published {} ({} bytes)", name, msg.len());
    println!("Published {name} ({} byte message)", msg.len());
    Ok(())
}
