//! Socket I/O for the engine.
//!
//! # Responsibilities
//! - Run one reader and one writer per socket, reporting outcomes as [`Event`]s
//! - Dial upstreams, retrying with backoff until connected
//! - Perform exactly one send attempt per buffer handed over by the engine
//!
//! # Design Decisions
//! - The engine never touches a socket; it sees IDs and events only
//! - All events funnel into one channel consumed by the engine task
//! - Readiness-based I/O (`readable`/`try_read`, `writable`/`try_write`):
//!   would-block is retried on the next readiness, never reported

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::UpstreamConfig;
use crate::net::connection::ConnectionId;
use crate::net::listener::ConnectionPermit;
use crate::resilience::backoff::calculate_backoff;

/// Capability the engine uses to act on sockets.
pub trait Transport {
    /// Start connecting a new upstream socket. Completion is reported with
    /// [`Event::Connected`].
    fn dial(&mut self, id: ConnectionId);

    /// Attempt one send of `data`. The outcome is reported with
    /// [`Event::Sent`] (possibly partial) or [`Event::Failed`].
    fn send(&mut self, id: ConnectionId, data: Bytes);

    /// Close the socket and stop reporting events for it.
    fn close(&mut self, id: ConnectionId);
}

/// Which side of a socket failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Write,
}

/// Readiness outcome reported by a socket task.
#[derive(Debug)]
pub enum Event {
    /// A client connection was accepted.
    Accepted {
        stream: TcpStream,
        peer: SocketAddr,
        permit: ConnectionPermit,
    },
    /// An upstream dial completed.
    Connected { id: ConnectionId },
    /// Bytes arrived.
    Received { id: ConnectionId, data: Bytes },
    /// The peer closed its side (zero-byte read).
    Closed { id: ConnectionId },
    /// A send attempt wrote `written` bytes.
    Sent { id: ConnectionId, written: usize },
    /// A read or write failed.
    Failed {
        id: ConnectionId,
        op: IoOp,
        error: io::Error,
    },
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Link {
    writes: mpsc::UnboundedSender<Bytes>,
    _task: AbortOnDrop,
    _permit: Option<ConnectionPermit>,
}

/// Tokio-backed [`Transport`].
pub struct TcpTransport {
    upstream: UpstreamConfig,
    read_buffer_size: usize,
    events: mpsc::UnboundedSender<Event>,
    links: HashMap<ConnectionId, Link>,
}

impl TcpTransport {
    pub fn new(
        upstream: UpstreamConfig,
        read_buffer_size: usize,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            upstream,
            read_buffer_size,
            events,
            links: HashMap::new(),
        }
    }

    /// Start serving an accepted client socket under `id`.
    pub fn attach_client(&mut self, id: ConnectionId, stream: TcpStream, permit: ConnectionPermit) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(connection_id = %id, error = %e, "Failed to set TCP_NODELAY");
        }

        let (writes, rx) = mpsc::unbounded_channel();
        let events = self.events.clone();
        let buffer_size = self.read_buffer_size;

        let task = tokio::spawn(async move {
            let (read, write) = stream.into_split();
            let _reader = AbortOnDrop(tokio::spawn(read_loop(id, read, buffer_size, events.clone())));
            write_loop(id, write, rx, events).await;
        });

        self.links.insert(
            id,
            Link {
                writes,
                _task: AbortOnDrop(task),
                _permit: Some(permit),
            },
        );
    }
}

impl Transport for TcpTransport {
    fn dial(&mut self, id: ConnectionId) {
        let (writes, rx) = mpsc::unbounded_channel();
        let events = self.events.clone();
        let buffer_size = self.read_buffer_size;
        let upstream = self.upstream.clone();

        let task = tokio::spawn(async move {
            let stream = connect_with_backoff(id, &upstream).await;
            if events.send(Event::Connected { id }).is_err() {
                return;
            }
            let (read, write) = stream.into_split();
            let _reader = AbortOnDrop(tokio::spawn(read_loop(id, read, buffer_size, events.clone())));
            write_loop(id, write, rx, events).await;
        });

        self.links.insert(
            id,
            Link {
                writes,
                _task: AbortOnDrop(task),
                _permit: None,
            },
        );
    }

    fn send(&mut self, id: ConnectionId, data: Bytes) {
        match self.links.get(&id) {
            Some(link) => {
                if link.writes.send(data).is_err() {
                    tracing::debug!(connection_id = %id, "Writer already stopped, dropping send");
                }
            }
            None => tracing::debug!(connection_id = %id, "Send to unknown connection"),
        }
    }

    fn close(&mut self, id: ConnectionId) {
        if self.links.remove(&id).is_some() {
            tracing::trace!(connection_id = %id, "Socket closed");
        }
    }
}

async fn connect_with_backoff(id: ConnectionId, upstream: &UpstreamConfig) -> TcpStream {
    let address = upstream.address();
    let connect_timeout = Duration::from_secs(upstream.connect_timeout_secs);
    let mut attempt = 0;

    loop {
        match tokio::time::timeout(connect_timeout, TcpStream::connect(address.as_str())).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(connection_id = %id, error = %e, "Failed to set TCP_NODELAY");
                }
                tracing::info!(connection_id = %id, upstream = %address, attempt, "Upstream connected");
                return stream;
            }
            Ok(Err(e)) => {
                tracing::warn!(connection_id = %id, upstream = %address, attempt, error = %e, "Upstream connect failed");
            }
            Err(_) => {
                tracing::warn!(connection_id = %id, upstream = %address, attempt, "Upstream connect timed out");
            }
        }

        attempt += 1;
        let delay = calculate_backoff(
            attempt,
            upstream.reconnect_base_delay_ms,
            upstream.reconnect_max_delay_ms,
        );
        tokio::time::sleep(delay).await;
    }
}

async fn read_loop(
    id: ConnectionId,
    stream: OwnedReadHalf,
    buffer_size: usize,
    events: mpsc::UnboundedSender<Event>,
) {
    let mut buffer = vec![0u8; buffer_size];

    loop {
        if let Err(error) = stream.readable().await {
            let _ = events.send(Event::Failed { id, op: IoOp::Read, error });
            return;
        }

        match stream.try_read(&mut buffer) {
            Ok(0) => {
                let _ = events.send(Event::Closed { id });
                return;
            }
            Ok(n) => {
                let data = Bytes::copy_from_slice(&buffer[..n]);
                if events.send(Event::Received { id, data }).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(error) => {
                let _ = events.send(Event::Failed { id, op: IoOp::Read, error });
                return;
            }
        }
    }
}

async fn write_loop(
    id: ConnectionId,
    stream: OwnedWriteHalf,
    mut writes: mpsc::UnboundedReceiver<Bytes>,
    events: mpsc::UnboundedSender<Event>,
) {
    while let Some(data) = writes.recv().await {
        match write_once(&stream, &data).await {
            Ok(written) => {
                if events.send(Event::Sent { id, written }).is_err() {
                    return;
                }
            }
            Err(error) => {
                let _ = events.send(Event::Failed { id, op: IoOp::Write, error });
                return;
            }
        }
    }
}

/// One send attempt: waits for writability, then writes as much as the
/// socket takes.
async fn write_once(stream: &OwnedWriteHalf, data: &[u8]) -> io::Result<usize> {
    loop {
        stream.writable().await?;
        match stream.try_write(data) {
            Ok(written) => return Ok(written),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}
