//! Proxy engine: request/response correlation over a bounded upstream pool.
//!
//! # Responsibilities
//! - Decode client requests and answer them from cache when fresh
//! - Stamp misses with a correlation ID and dispatch them upstream
//! - Stream upstream bytes to the bound client as they arrive
//! - Cache completed responses and recycle upstreams
//! - Keep per-socket write queues and replace failed upstreams
//!
//! # Design Decisions
//! - Sans-I/O: sockets are reached only through the injected [`Transport`]
//! - Owned by a single task, so pool, queues and cache need no locks
//! - A connection's bookkeeping is unwound in the same call that closes it

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::cache::ResponseCache;
use crate::config::ProxyConfig;
use crate::http::response::{BAD_GATEWAY, INTERNAL_SERVER_ERROR};
use crate::http::{Message, RequestId, REQUEST_ID_HEADER};
use crate::net::connection::ConnectionId;
use crate::net::transport::{IoOp, Transport};
use crate::observability::metrics;
use crate::proxy::pool::{PendingRequest, SlotState, UpstreamPool};
use crate::proxy::write_queue::WriteQueue;

/// Snapshot of the engine's observable counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub pending_requests: usize,
    pub idle_connections: usize,
    pub assigned_connections: usize,
    pub connecting_connections: usize,
    pub max_concurrent_connections: usize,
    pub cached_responses: usize,
    pub client_connections: usize,
}

#[derive(Debug)]
struct ClientConnection {
    peer: SocketAddr,
    /// Request being decoded; cleared once it is handled.
    request: Option<Message>,
    queue: WriteQueue,
    /// Requests forwarded upstream whose response has not completed.
    awaiting_upstream: usize,
    close_after_flush: bool,
}

impl ClientConnection {
    fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            request: None,
            queue: WriteQueue::new(),
            awaiting_upstream: 0,
            close_after_flush: false,
        }
    }
}

#[derive(Debug, Default)]
struct UpstreamConnection {
    connected: bool,
    /// Response being decoded for the current exchange.
    response: Option<Message>,
    /// Correlation ID of the request currently being served.
    request_id: Option<RequestId>,
    queue: WriteQueue,
}

/// The proxy's single-owner state machine.
pub struct Engine<T: Transport> {
    transport: T,
    pool: UpstreamPool,
    cache: ResponseCache,
    clients: HashMap<ConnectionId, ClientConnection>,
    upstreams: HashMap<ConnectionId, UpstreamConnection>,
    /// Forwarded requests awaiting their response, by correlation ID.
    in_flight: HashMap<RequestId, Message>,
    max_request_bytes: usize,
}

impl<T: Transport> Engine<T> {
    pub fn new(transport: T, pool_size: usize, max_request_bytes: usize) -> Self {
        Self {
            transport,
            pool: UpstreamPool::new(pool_size),
            cache: ResponseCache::new(),
            clients: HashMap::new(),
            upstreams: HashMap::new(),
            in_flight: HashMap::new(),
            max_request_bytes,
        }
    }

    pub fn from_config(transport: T, config: &ProxyConfig) -> Self {
        Self::new(transport, config.upstream.pool_size, config.limits.max_request_bytes)
    }

    /// Dial every upstream slot.
    pub fn start(&mut self) {
        tracing::info!(pool_size = self.pool.capacity(), "Initializing upstream pool");
        for _ in 0..self.pool.capacity() {
            self.dial_upstream(None);
        }
    }

    fn dial_upstream(&mut self, resume_client: Option<ConnectionId>) -> ConnectionId {
        let id = ConnectionId::new();
        self.upstreams.insert(id, UpstreamConnection::default());
        self.pool.add_connecting(id, resume_client);
        self.transport.dial(id);
        id
    }

    // --- Events ---

    pub fn on_client_accepted(&mut self, id: ConnectionId, peer: SocketAddr) {
        tracing::info!(connection_id = %id, peer_addr = %peer, "New client connection");
        self.clients.insert(id, ClientConnection::new(peer));
    }

    pub fn on_upstream_connected(&mut self, id: ConnectionId) {
        let Some(upstream) = self.upstreams.get_mut(&id) else {
            return;
        };
        upstream.connected = true;

        if !matches!(self.pool.state(id), Some(SlotState::Connecting { .. })) {
            return;
        }
        match self.pool.connected(id) {
            Some(client) => {
                tracing::debug!(connection_id = %id, client_id = %client, "Replacement upstream resuming client");
            }
            None => self.return_connection(id),
        }
    }

    pub fn on_received(&mut self, id: ConnectionId, data: Bytes) {
        if self.clients.contains_key(&id) {
            self.handle_client_data(id, &data);
        } else if self.upstreams.contains_key(&id) {
            self.handle_upstream_data(id, data);
        } else {
            tracing::trace!(connection_id = %id, "Dropping data for closed connection");
        }
    }

    pub fn on_sent(&mut self, id: ConnectionId, written: usize) {
        if let Some(client) = self.clients.get_mut(&id) {
            tracing::trace!(connection_id = %id, bytes = written, "Sent to client");
            client.queue.complete(written);
            self.close_if_done(id);
        } else if let Some(upstream) = self.upstreams.get_mut(&id) {
            tracing::trace!(connection_id = %id, bytes = written, "Sent to upstream");
            upstream.queue.complete(written);
        }
    }

    /// The peer closed its side of the connection.
    pub fn on_closed(&mut self, id: ConnectionId) {
        if let Some(client) = self.clients.get_mut(&id) {
            tracing::debug!(connection_id = %id, "Client closed its side");
            if client.request.is_some() {
                client.request = None;
                client.queue.push(INTERNAL_SERVER_ERROR);
            }
            client.close_after_flush = true;
            self.close_if_done(id);
        } else if self.upstreams.contains_key(&id) {
            tracing::warn!(connection_id = %id, "Upstream closed the connection");
            self.recreate_upstream(id);
        }
    }

    pub fn on_failed(&mut self, id: ConnectionId, op: IoOp, error: &std::io::Error) {
        if let Some(client) = self.clients.get_mut(&id) {
            tracing::warn!(connection_id = %id, ?op, error = %error, "Client I/O error");
            match op {
                IoOp::Read if client.request.is_some() => {
                    // Best effort: the write side may still be usable.
                    client.request = None;
                    client.awaiting_upstream = 0;
                    client.queue.push(INTERNAL_SERVER_ERROR);
                    client.close_after_flush = true;
                    self.close_if_done(id);
                }
                _ => self.close_client(id),
            }
        } else if self.upstreams.contains_key(&id) {
            tracing::warn!(connection_id = %id, ?op, error = %error, "Upstream I/O error");
            self.recreate_upstream(id);
        }
    }

    /// Called when the poll timeout elapses with no events.
    pub fn on_tick(&self) {
        let stats = self.stats();
        tracing::trace!(
            pending = stats.pending_requests,
            idle = stats.idle_connections,
            assigned = stats.assigned_connections,
            clients = stats.client_connections,
            "Engine idle"
        );
    }

    /// Issue one send for every connection with queued bytes and no send
    /// already in flight.
    pub fn flush(&mut self) {
        for (&id, client) in self.clients.iter_mut() {
            if let Some(data) = client.queue.next_send() {
                self.transport.send(id, data);
            }
        }
        for (&id, upstream) in self.upstreams.iter_mut() {
            if !upstream.connected {
                continue;
            }
            if let Some(data) = upstream.queue.next_send() {
                self.transport.send(id, data);
            }
        }
    }

    // --- Client side ---

    fn handle_client_data(&mut self, id: ConnectionId, data: &[u8]) {
        let max_request_bytes = self.max_request_bytes;
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        if client.close_after_flush {
            tracing::trace!(connection_id = %id, "Ignoring data on closing connection");
            return;
        }

        tracing::trace!(connection_id = %id, bytes = data.len(), "Received from client");
        let request = client.request.get_or_insert_with(Message::request);
        request.feed(data);

        if !request.is_complete() {
            if request.buffered_len() > max_request_bytes {
                tracing::warn!(
                    connection_id = %id,
                    buffered = request.buffered_len(),
                    limit = max_request_bytes,
                    "Request exceeds size limit"
                );
                client.request = None;
                client.queue.push(INTERNAL_SERVER_ERROR);
                client.close_after_flush = true;
            }
            return;
        }

        let Some(request) = client.request.take() else {
            return;
        };
        let keep_alive = request.keep_alive();
        self.dispatch_request(id, request);

        if !keep_alive {
            if let Some(client) = self.clients.get_mut(&id) {
                client.close_after_flush = true;
            }
            self.close_if_done(id);
        }
    }

    /// Answer a complete request from cache, or forward it upstream.
    fn dispatch_request(&mut self, client_id: ConnectionId, mut request: Message) {
        if let Some(cached) = self.cache.lookup(&request) {
            tracing::debug!(connection_id = %client_id, uri = %request.uri(), "Cache hit");
            let data = Bytes::from(cached.serialize(false));
            if let Some(client) = self.clients.get_mut(&client_id) {
                client.queue.push(data);
            }
            return;
        }

        tracing::debug!(connection_id = %client_id, uri = %request.uri(), "Cache miss");
        let request_id = RequestId::new();
        request.set_header(REQUEST_ID_HEADER, request_id.as_str());
        let data = Bytes::from(request.serialize(false));
        self.in_flight.insert(request_id.clone(), request);

        if let Some(client) = self.clients.get_mut(&client_id) {
            client.awaiting_upstream += 1;
        }
        self.send_to_upstream(PendingRequest::new(data, client_id).with_request_id(request_id));
    }

    fn close_if_done(&mut self, id: ConnectionId) {
        let done = self.clients.get(&id).is_some_and(|client| {
            client.close_after_flush && client.queue.is_empty() && client.awaiting_upstream == 0
        });
        if done {
            self.close_client(id);
        }
    }

    fn close_client(&mut self, id: ConnectionId) {
        let Some(client) = self.clients.remove(&id) else {
            return;
        };
        self.transport.close(id);

        let dropped = self.pool.drop_pending_for(id);
        for request in &dropped {
            if let Some(request_id) = &request.request_id {
                self.in_flight.remove(request_id);
            }
        }

        tracing::info!(
            connection_id = %id,
            peer_addr = %client.peer,
            unsent_bytes = client.queue.pending_bytes(),
            dropped_pending = dropped.len(),
            "Closing client connection"
        );
    }

    // --- Upstream side ---

    /// Hand request bytes to an idle upstream, or queue them until one is
    /// returned.
    pub fn send_to_upstream(&mut self, request: PendingRequest) {
        match self.pool.acquire(request.client) {
            Some(upstream) => {
                tracing::debug!(
                    connection_id = %upstream,
                    client_id = %request.client,
                    bytes = request.data.len(),
                    "Dispatching request upstream"
                );
                metrics::record_dispatch(false);
                self.assign(upstream, request);
            }
            None => {
                tracing::debug!(
                    client_id = %request.client,
                    pending = self.pool.pending_count() + 1,
                    "No idle upstream, queueing request"
                );
                metrics::record_dispatch(true);
                self.pool.enqueue(request);
            }
        }
    }

    fn assign(&mut self, upstream_id: ConnectionId, request: PendingRequest) {
        if let Some(upstream) = self.upstreams.get_mut(&upstream_id) {
            upstream.response = None;
            upstream.request_id = request.request_id;
            upstream.queue.push(request.data);
        }
    }

    /// Put an upstream back into service.
    ///
    /// The oldest pending request is dispatched on it right away; only when
    /// nothing is waiting does it join the idle pool.
    pub fn return_connection(&mut self, upstream_id: ConnectionId) {
        if let Some(upstream) = self.upstreams.get_mut(&upstream_id) {
            upstream.response = None;
            upstream.request_id = None;
        }

        match self.pool.release(upstream_id) {
            Some(next) => {
                tracing::debug!(
                    connection_id = %upstream_id,
                    client_id = %next.client,
                    "Dispatching pending request on returned upstream"
                );
                self.assign(upstream_id, next);
            }
            None => {
                tracing::debug!(connection_id = %upstream_id, "Upstream returned to pool");
            }
        }
    }

    fn handle_upstream_data(&mut self, id: ConnectionId, data: Bytes) {
        let client_id = self.pool.client_of(id);

        let completed = {
            let Some(upstream) = self.upstreams.get_mut(&id) else {
                return;
            };
            let response = upstream.response.get_or_insert_with(Message::response);
            response.feed(&data);
            if response.is_complete() {
                upstream
                    .response
                    .take()
                    .map(|response| (response, upstream.request_id.take()))
            } else {
                None
            }
        };

        tracing::trace!(connection_id = %id, bytes = data.len(), "Received from upstream");
        match client_id.and_then(|client| self.clients.get_mut(&client)) {
            Some(client) => client.queue.push(data),
            None => tracing::warn!(connection_id = %id, "Upstream data has no client to deliver to"),
        }

        let Some((response, assigned_request_id)) = completed else {
            return;
        };

        if let Some(client) = client_id {
            self.finish_exchange(client);
        }
        self.return_connection(id);

        let echoed = response.header(REQUEST_ID_HEADER).map(RequestId::from);
        let request = echoed.as_ref().and_then(|request_id| self.in_flight.remove(request_id));
        if let Some(request_id) = assigned_request_id {
            self.in_flight.remove(&request_id);
        }

        match request {
            Some(request) => {
                if self.cache.store(&request, response) {
                    tracing::debug!(uri = %request.uri(), "Response cached");
                }
            }
            None => {
                tracing::debug!(connection_id = %id, "Response carries no known correlation ID, not caching");
            }
        }
    }

    fn finish_exchange(&mut self, client_id: ConnectionId) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.awaiting_upstream = client.awaiting_upstream.saturating_sub(1);
        }
        self.close_if_done(client_id);
    }

    /// Close a failed upstream and dial its replacement.
    ///
    /// Queued writes move to the replacement. If the failed upstream still
    /// held unsent request bytes, the replacement resumes serving the same
    /// client; bytes already partly written may then be delivered twice.
    fn recreate_upstream(&mut self, old_id: ConnectionId) {
        let Some(mut old) = self.upstreams.remove(&old_id) else {
            return;
        };
        self.transport.close(old_id);
        metrics::record_upstream_recreated();

        let slot = self.pool.remove(old_id);
        let unsent = old.queue.take_all();
        let request_id = old.request_id.take();

        let resume_client = match slot {
            Some(SlotState::Assigned(client)) if !unsent.is_empty() => Some(client),
            Some(SlotState::Assigned(client)) => {
                self.abandon_exchange(client, old.response.is_some());
                if let Some(request_id) = &request_id {
                    self.in_flight.remove(request_id);
                }
                None
            }
            Some(SlotState::Connecting { client }) => client,
            Some(SlotState::Idle) | None => None,
        };

        let new_id = self.dial_upstream(resume_client);
        if let Some(replacement) = self.upstreams.get_mut(&new_id) {
            replacement.queue.extend(unsent);
            if resume_client.is_some() {
                replacement.request_id = request_id;
            }
        }

        tracing::warn!(
            old_connection_id = %old_id,
            connection_id = %new_id,
            resumed_client = ?resume_client,
            "Recreated upstream connection"
        );
    }

    /// The upstream serving `client_id` died after its request was sent.
    fn abandon_exchange(&mut self, client_id: ConnectionId, partially_delivered: bool) {
        let Some(client) = self.clients.get_mut(&client_id) else {
            return;
        };
        client.awaiting_upstream = client.awaiting_upstream.saturating_sub(1);

        if partially_delivered {
            tracing::warn!(connection_id = %client_id, "Upstream failed mid-response, closing client");
            client.close_after_flush = true;
        } else {
            tracing::warn!(connection_id = %client_id, "Upstream failed before responding");
            client.queue.push(BAD_GATEWAY);
        }
        self.close_if_done(client_id);
    }

    // --- Observability ---

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            pending_requests: self.pool.pending_count(),
            idle_connections: self.pool.idle_count(),
            assigned_connections: self.pool.assigned_count(),
            connecting_connections: self.pool.connecting_count(),
            max_concurrent_connections: self.pool.high_watermark(),
            cached_responses: self.cache.len(),
            client_connections: self.clients.len(),
        }
    }

    pub fn pending_requests_count(&self) -> usize {
        self.pool.pending_count()
    }

    pub fn available_connections_count(&self) -> usize {
        self.pool.idle_count()
    }

    pub fn max_concurrent_connections_used(&self) -> usize {
        self.pool.high_watermark()
    }

    #[cfg(test)]
    fn pool(&self) -> &UpstreamPool {
        &self.pool
    }

    #[cfg(test)]
    fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    #[cfg(test)]
    fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Bytes queued for a connection, head first.
    #[cfg(test)]
    fn queued_bytes(&self, id: ConnectionId) -> usize {
        self.clients
            .get(&id)
            .map(|client| client.queue.pending_bytes())
            .or_else(|| self.upstreams.get(&id).map(|upstream| upstream.queue.pending_bytes()))
            .unwrap_or(0)
    }

    #[cfg(test)]
    fn is_open(&self, id: ConnectionId) -> bool {
        self.clients.contains_key(&id) || self.upstreams.contains_key(&id)
    }
}
