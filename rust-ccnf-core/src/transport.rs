//! Socket plumbing and the event loop.
//!
//! The engine runs on one task; per-face reader and writer tasks only
//! shuttle bytes through channels. The run loop waits on new clients,
//! face events, fatal signals, and the scheduler's next deadline, in
//! that order of preference.

use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use socket2::{Domain, Socket, Type};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UdpSocket, UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use rust_ccnf_common::tlv;

use crate::config::Config;
use crate::engine::Forwarder;
use crate::face::{Face, FaceId};
use crate::CoreError;

/// Listener backlog for the local stream socket.
const LISTEN_BACKLOG: i32 = 42;

/// Grace period for a previous daemon whose socket we just unlinked.
const STALE_SOCKET_GRACE: Duration = Duration::from_secs(9);

/// Read chunk size; comfortably holds the largest common messages.
const READ_CHUNK: usize = 8800;

/// What the I/O tasks report back to the engine task.
enum IoEvent {
    /// A complete framed message from a stream face.
    StreamFrame { face: FaceId, msg: Bytes },
    /// EOF, protocol error, or write failure on a stream face.
    StreamClosed { face: FaceId },
    /// One datagram from a bound socket.
    Datagram {
        sock: usize,
        addr: SocketAddr,
        data: Bytes,
    },
}

/// Unlinks the local socket path on every exit path.
struct SocketGuard(PathBuf);

impl Drop for SocketGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// The daemon's I/O front end wrapped around the engine.
pub struct Transport {
    engine: Forwarder,
    listener: UnixListener,
    udp: Vec<Arc<UdpSocket>>,
    events_tx: mpsc::UnboundedSender<IoEvent>,
    events_rx: mpsc::UnboundedReceiver<IoEvent>,
    start: Instant,
    _sock_guard: SocketGuard,
}

impl Transport {
    /// Binds the local stream listener and the UDP sockets, and wires
    /// the engine up to watch the socket path.
    pub async fn bind(config: &Config, mut engine: Forwarder) -> Result<Self, CoreError> {
        let listener = Self::create_local_listener(&config.sockname).await?;
        let guard = SocketGuard(config.sockname.clone());
        engine.watch_comm_path(config.sockname.clone());
        info!("listening on {}", config.sockname.display());

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut udp = Vec::new();
        for bind_addr in [
            SocketAddr::from(([0, 0, 0, 0], config.port)),
            SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, config.port)),
        ] {
            match UdpSocket::bind(bind_addr).await {
                Ok(sock) => {
                    info!("accepting datagrams on {bind_addr}");
                    let sock = Arc::new(sock);
                    Self::spawn_dgram_reader(udp.len(), sock.clone(), events_tx.clone());
                    udp.push(sock);
                }
                Err(e) => debug!("could not bind {bind_addr}: {e}"),
            }
        }

        Ok(Self {
            engine,
            listener,
            udp,
            events_tx,
            events_rx,
            start: Instant::now(),
            _sock_guard: guard,
        })
    }

    /// Creates the filesystem-named listener. An existing socket file
    /// is unlinked first; when that unlink actually removed something,
    /// wait out the grace period so an old daemon can finish dying.
    async fn create_local_listener(path: &Path) -> Result<UnixListener, CoreError> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                info!("unlinked old {}, please wait", path.display());
                tokio::time::sleep(STALE_SOCKET_GRACE).await;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to unlink {}: {e}", path.display()),
        }
        let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
        socket.bind(&socket2::SockAddr::unix(path)?)?;
        socket.listen(LISTEN_BACKLOG)?;
        socket.set_nonblocking(true)?;
        let std_listener: std::os::unix::net::UnixListener = socket.into();
        Ok(UnixListener::from_std(std_listener)?)
    }

    fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// The event loop. Returns when a fatal signal arrives or the
    /// engine decides the socket path was taken over.
    pub async fn run(&mut self) -> Result<(), CoreError> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let mut prev_zero = false;
        loop {
            let now = self.now_us();
            self.engine.run_due(now);
            if self.engine.exiting {
                break;
            }
            let mut delay = self.engine.next_timeout(self.now_us());
            // Clamp two consecutive zero timeouts to a millisecond so
            // overdue-but-rearming work cannot spin the loop.
            if delay == Some(0) {
                if prev_zero {
                    delay = Some(1000);
                }
                prev_zero = true;
            } else {
                prev_zero = false;
            }
            tokio::select! {
                biased;
                // New clients take precedence over everything else.
                res = self.listener.accept() => match res {
                    Ok((stream, _)) => self.accept_stream(stream),
                    Err(e) => warn!("accept: {e}"),
                },
                Some(ev) = self.events_rx.recv() => self.dispatch(ev),
                _ = sigterm.recv() => { info!("received SIGTERM"); break }
                _ = sigint.recv() => { info!("received SIGINT"); break }
                _ = sighup.recv() => { info!("received SIGHUP"); break }
                _ = sleep_maybe(delay) => {}
            }
        }
        info!("exiting; {}", self.engine.metrics.summary());
        Ok(())
    }

    fn accept_stream(&mut self, stream: UnixStream) {
        let (read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let id = match self.engine.add_face(Face::stream(tx)) {
            Ok(id) => id,
            Err(e) => {
                warn!("cannot accept client: {e}");
                return;
            }
        };
        info!("accepted client id={id}");

        // Writer task: drains the face's deferred-write queue in order.
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if let Err(e) = write_half.write_all(&chunk).await {
                    debug!("write to face {id} failed: {e}");
                    let _ = events.send(IoEvent::StreamClosed { face: id });
                    break;
                }
            }
        });

        Self::spawn_stream_reader(id, read_half, self.events_tx.clone());
    }

    /// Reader task: splits the byte stream into framed messages.
    fn spawn_stream_reader(
        id: FaceId,
        mut read_half: OwnedReadHalf,
        events: mpsc::UnboundedSender<IoEvent>,
    ) {
        tokio::spawn(async move {
            let mut buf = BytesMut::with_capacity(READ_CHUNK);
            loop {
                buf.reserve(READ_CHUNK);
                match read_half.read_buf(&mut buf).await {
                    Ok(0) | Err(_) => {
                        let _ = events.send(IoEvent::StreamClosed { face: id });
                        return;
                    }
                    Ok(_) => loop {
                        match tlv::frame_len(&buf) {
                            Ok(Some(len)) if buf.len() >= len => {
                                let msg = buf.split_to(len).freeze();
                                if events.send(IoEvent::StreamFrame { face: id, msg }).is_err() {
                                    return;
                                }
                            }
                            Ok(_) => break, // need more bytes
                            Err(e) => {
                                debug!("protocol error on face {id}: {e}");
                                let _ = events.send(IoEvent::StreamClosed { face: id });
                                return;
                            }
                        }
                    },
                }
            }
        });
    }

    fn spawn_dgram_reader(
        sock_index: usize,
        socket: Arc<UdpSocket>,
        events: mpsc::UnboundedSender<IoEvent>,
    ) {
        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((n, addr)) => {
                        let ev = IoEvent::Datagram {
                            sock: sock_index,
                            addr,
                            data: Bytes::copy_from_slice(&buf[..n]),
                        };
                        if events.send(ev).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("recvfrom: {e}");
                    }
                }
            }
        });
    }

    fn dispatch(&mut self, ev: IoEvent) {
        match ev {
            IoEvent::StreamFrame { face, msg } => {
                let now = self.now_us();
                self.engine.note_receive(face);
                self.engine.process_message(face, msg, now);
            }
            IoEvent::StreamClosed { face } => {
                info!("shutdown client id={face}");
                self.engine.remove_face(face);
            }
            IoEvent::Datagram { sock, addr, data } => {
                let now = self.now_us();
                let socket = match self.udp.get(sock) {
                    Some(s) => s.clone(),
                    None => return,
                };
                let id = match self.engine.dgram_source(&socket, addr, now) {
                    Ok(id) => id,
                    Err(e) => {
                        warn!("cannot enroll datagram peer {addr}: {e}");
                        return;
                    }
                };
                self.engine.note_receive(id);
                if data.len() <= 1 {
                    debug!("{}-byte heartbeat on {id}", data.len());
                    return;
                }
                // A datagram can carry several messages back to back; a
                // trailing partial message is a protocol error.
                let mut pos = 0;
                while pos < data.len() {
                    match tlv::frame_len(&data[pos..]) {
                        Ok(Some(len)) if pos + len <= data.len() => {
                            let msg = data.slice(pos..pos + len);
                            pos += len;
                            self.engine.process_message(id, msg, now);
                        }
                        _ => {
                            debug!(
                                "protocol error, discarding {} bytes from face {id}",
                                data.len() - pos
                            );
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Engine access for the status reporter.
    pub fn engine(&self) -> &Forwarder {
        &self.engine
    }
}

/// Sleeps for the scheduler's timeout, or forever when nothing is
/// armed; readiness always interrupts it.
async fn sleep_maybe(delay_us: Option<u64>) {
    match delay_us {
        Some(us) => tokio::time::sleep(Duration::from_micros(us)).await,
        None => std::future::pending::<()>().await,
    }
}
