//! Interest sending command.

use anyhow::{Context, Result};
use bytes::BytesMut;
use log::{debug, info};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;

use rust_ccnf_common::name::Uri;
use rust_ccnf_common::packet::{
    message_kind, parse_content_object, InterestBuilder, MessageKind,
};
use rust_ccnf_common::tlv;
use rust_ccnf_core::Config;

/// Send an Interest to the local forwarder and print the response.
pub async fn send_interest(
    name: String,
    timeout_ms: u64,
    scope: Option<u8>,
    rightmost: bool,
) -> Result<()> {
    let config = Config::from_env();
    info!(
        "sending Interest {name} via {} (timeout {timeout_ms}ms)",
        config.sockname.display()
    );

    let mut builder = InterestBuilder::new(&name);
    if let Some(s) = scope {
        builder = builder.scope(s);
    }
    if rightmost {
        builder = builder.orderpref(5);
    }
    let msg = builder.build();

    let mut stream = UnixStream::connect(&config.sockname)
        .await
        .with_context(|| format!("cannot connect to {}", config.sockname.display()))?;
    stream.write_all(&msg).await?;

    println!("Sending Interest: {name}");
    match timeout(Duration::from_millis(timeout_ms), read_content(&mut stream)).await {
        Ok(Ok(content)) => {
            let pco = parse_content_object(&content).context("bad ContentObject from daemon")?;
            println!("\nReceived ContentObject:");
            println!("  Name: {}", Uri(&content[pco.name_range()]));
            let body = &content[pco.content.clone()];
            if body.len() <= 100 {
                match std::str::from_utf8(body) {
                    Ok(text) => println!("  Content: {text}"),
                    Err(_) => println!("  Content: {body:?}"),
                }
            } else {
                println!("  Content: {} bytes", body.len());
            }
        }
        Ok(Err(e)) => println!("Error retrieving data: {e}"),
        Err(_) => println!("Timeout after {timeout_ms}ms"),
    }
    Ok(())
}

/// Reads framed messages until a ContentObject arrives.
async fn read_content(stream: &mut UnixStream) -> Result<bytes::Bytes> {
    let mut buf = BytesMut::with_capacity(8800);
    loop {
        while let Some(len) = tlv::frame_len(&buf)? {
            if buf.len() < len {
                break;
            }
            let frame = buf.split_to(len).freeze();
            match message_kind(&frame) {
                Ok((MessageKind::ContentObject, _)) => return Ok(frame),
                Ok((kind, _)) => debug!("ignoring {kind:?} while waiting for content"),
                Err(e) => debug!("ignoring unparseable frame: {e}"),
            }
        }
        buf.reserve(8800);
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            anyhow::bail!("forwarder closed the connection");
        }
    }
}
