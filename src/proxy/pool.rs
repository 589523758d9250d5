//! Upstream connection pool and pending-request queue.
//!
//! # Responsibilities
//! - Track which state each upstream slot is in (connecting, idle, assigned)
//! - Hand idle upstreams to clients, queueing demand when none are free
//! - Prefer the oldest pending request over the idle list on release
//! - Record the high-watermark of concurrently assigned upstreams
//!
//! # Design Decisions
//! - Capacity is fixed at construction; replacements are 1:1
//! - Pure bookkeeping: no sockets, driven by the engine

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;

use crate::http::RequestId;
use crate::net::connection::ConnectionId;

/// Where an upstream slot currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Dial in progress. `client` is set when the slot is a replacement
    /// that must resume serving that client once connected.
    Connecting { client: Option<ConnectionId> },
    /// Connected and waiting in the idle list.
    Idle,
    /// Serving the given client.
    Assigned(ConnectionId),
}

/// Request bytes waiting for a free upstream.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub data: Bytes,
    pub client: ConnectionId,
    pub request_id: Option<RequestId>,
}

impl PendingRequest {
    pub fn new(data: impl Into<Bytes>, client: ConnectionId) -> Self {
        Self {
            data: data.into(),
            client,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

/// Bounded set of upstream slots plus the FIFO of requests waiting for one.
#[derive(Debug)]
pub struct UpstreamPool {
    capacity: usize,
    slots: HashMap<ConnectionId, SlotState>,
    idle: VecDeque<ConnectionId>,
    pending: VecDeque<PendingRequest>,
    high_watermark: usize,
}

impl UpstreamPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: HashMap::with_capacity(capacity),
            idle: VecDeque::with_capacity(capacity),
            pending: VecDeque::new(),
            high_watermark: 0,
        }
    }

    /// Register a slot whose dial has just started.
    pub fn add_connecting(&mut self, upstream: ConnectionId, client: Option<ConnectionId>) {
        debug_assert!(self.slots.len() < self.capacity, "pool capacity exceeded");
        self.slots.insert(upstream, SlotState::Connecting { client });
    }

    /// Mark a connecting slot as connected.
    ///
    /// Returns the client the slot must resume serving, if any. The slot is
    /// left unplaced when no client is returned; the caller releases it.
    pub fn connected(&mut self, upstream: ConnectionId) -> Option<ConnectionId> {
        match self.slots.get(&upstream) {
            Some(SlotState::Connecting { client: Some(client) }) => {
                let client = *client;
                self.slots.insert(upstream, SlotState::Assigned(client));
                self.update_high_watermark();
                Some(client)
            }
            _ => None,
        }
    }

    /// Take an idle upstream for `client`.
    pub fn acquire(&mut self, client: ConnectionId) -> Option<ConnectionId> {
        let upstream = self.idle.pop_front()?;
        self.slots.insert(upstream, SlotState::Assigned(client));
        self.update_high_watermark();
        Some(upstream)
    }

    /// Queue a request until an upstream frees up.
    pub fn enqueue(&mut self, request: PendingRequest) {
        self.pending.push_back(request);
    }

    /// Give an upstream back.
    ///
    /// If requests are waiting, the oldest is assigned to this upstream
    /// immediately and returned for dispatch; otherwise the upstream joins
    /// the idle list.
    pub fn release(&mut self, upstream: ConnectionId) -> Option<PendingRequest> {
        if !self.slots.contains_key(&upstream) {
            return None;
        }

        if let Some(next) = self.pending.pop_front() {
            self.slots.insert(upstream, SlotState::Assigned(next.client));
            self.update_high_watermark();
            return Some(next);
        }

        self.slots.insert(upstream, SlotState::Idle);
        if !self.idle.contains(&upstream) {
            self.idle.push_back(upstream);
        }
        None
    }

    /// Forget a slot entirely (closed upstream).
    pub fn remove(&mut self, upstream: ConnectionId) -> Option<SlotState> {
        let state = self.slots.remove(&upstream)?;
        self.idle.retain(|&id| id != upstream);
        Some(state)
    }

    /// Drop every pending request that originated from `client`.
    pub fn drop_pending_for(&mut self, client: ConnectionId) -> Vec<PendingRequest> {
        let (dropped, kept): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|request| request.client == client);
        self.pending = kept;
        dropped.into()
    }

    pub fn state(&self, upstream: ConnectionId) -> Option<SlotState> {
        self.slots.get(&upstream).copied()
    }

    /// Client currently served by `upstream`.
    pub fn client_of(&self, upstream: ConnectionId) -> Option<ConnectionId> {
        match self.slots.get(&upstream) {
            Some(SlotState::Assigned(client)) => Some(*client),
            _ => None,
        }
    }

    pub fn contains(&self, upstream: ConnectionId) -> bool {
        self.slots.contains_key(&upstream)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn assigned_count(&self) -> usize {
        self.slots
            .values()
            .filter(|state| matches!(state, SlotState::Assigned(_)))
            .count()
    }

    pub fn connecting_count(&self) -> usize {
        self.slots
            .values()
            .filter(|state| matches!(state, SlotState::Connecting { .. }))
            .count()
    }

    /// Most upstreams ever assigned at the same time.
    pub fn high_watermark(&self) -> usize {
        self.high_watermark
    }

    fn update_high_watermark(&mut self) {
        let assigned = self.assigned_count();
        if assigned > self.high_watermark {
            self.high_watermark = assigned;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with_idle(n: usize) -> (UpstreamPool, Vec<ConnectionId>) {
        let mut pool = UpstreamPool::new(n);
        let ids: Vec<_> = (0..n).map(|_| ConnectionId::new()).collect();
        for &id in &ids {
            pool.add_connecting(id, None);
            assert_eq!(pool.connected(id), None);
            assert!(pool.release(id).is_none());
        }
        (pool, ids)
    }

    #[test]
    fn acquire_then_queue_when_exhausted() {
        let (mut pool, ids) = pool_with_idle(1);
        let client = ConnectionId::new();

        assert_eq!(pool.acquire(client), Some(ids[0]));
        assert_eq!(pool.acquire(client), None);
        pool.enqueue(PendingRequest::new(&b"GET / HTTP/1.1\r\n\r\n"[..], client));

        assert_eq!(pool.pending_count(), 1);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.client_of(ids[0]), Some(client));
    }

    #[test]
    fn release_prefers_pending_over_idle() {
        let (mut pool, ids) = pool_with_idle(1);
        let first = ConnectionId::new();
        let second = ConnectionId::new();

        pool.acquire(first);
        pool.enqueue(PendingRequest::new(&b"a"[..], second));

        let next = pool.release(ids[0]).expect("pending request redispatched");
        assert_eq!(next.client, second);
        assert_eq!(pool.client_of(ids[0]), Some(second));
        assert_eq!(pool.pending_count(), 0);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn pending_is_fifo() {
        let (mut pool, ids) = pool_with_idle(1);
        let clients: Vec<_> = (0..3).map(|_| ConnectionId::new()).collect();

        pool.acquire(clients[0]);
        pool.enqueue(PendingRequest::new(&b"1"[..], clients[1]));
        pool.enqueue(PendingRequest::new(&b"2"[..], clients[2]));

        assert_eq!(pool.release(ids[0]).unwrap().client, clients[1]);
        assert_eq!(pool.release(ids[0]).unwrap().client, clients[2]);
        assert!(pool.release(ids[0]).is_none());
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn high_watermark_tracks_peak_assignment() {
        let (mut pool, ids) = pool_with_idle(3);
        let client = ConnectionId::new();

        pool.acquire(client);
        pool.acquire(client);
        pool.release(ids[0]);
        pool.acquire(client);

        assert_eq!(pool.assigned_count(), 2);
        assert_eq!(pool.high_watermark(), 2);
    }

    #[test]
    fn replacement_resumes_its_client() {
        let mut pool = UpstreamPool::new(1);
        let upstream = ConnectionId::new();
        let client = ConnectionId::new();

        pool.add_connecting(upstream, Some(client));
        assert_eq!(pool.connecting_count(), 1);
        assert_eq!(pool.connected(upstream), Some(client));
        assert_eq!(pool.client_of(upstream), Some(client));
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn remove_clears_idle_membership() {
        let (mut pool, ids) = pool_with_idle(2);
        assert_eq!(pool.remove(ids[0]), Some(SlotState::Idle));
        assert_eq!(pool.idle_count(), 1);
        assert!(!pool.contains(ids[0]));
        assert!(pool.release(ids[0]).is_none());
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn drop_pending_for_client() {
        let (mut pool, _) = pool_with_idle(0);
        let gone = ConnectionId::new();
        let stays = ConnectionId::new();

        pool.enqueue(PendingRequest::new(&b"1"[..], gone));
        pool.enqueue(PendingRequest::new(&b"2"[..], stays));
        pool.enqueue(PendingRequest::new(&b"3"[..], gone));

        assert_eq!(pool.drop_pending_for(gone).len(), 2);
        assert_eq!(pool.pending_count(), 1);
    }
}
