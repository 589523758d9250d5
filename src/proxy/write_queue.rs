//! Per-connection outbound byte queue.
//!
//! The head of the queue is always exactly the unsent tail of the oldest
//! buffer. At most one send is in flight per queue; the engine learns how
//! many bytes it took through [`WriteQueue::complete`].

use std::collections::VecDeque;

use bytes::Bytes;

#[derive(Debug, Default)]
pub struct WriteQueue {
    chunks: VecDeque<Bytes>,
    in_flight: bool,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: impl Into<Bytes>) {
        let data = data.into();
        if !data.is_empty() {
            self.chunks.push_back(data);
        }
    }

    /// Next buffer to hand to the socket, unless a send is already pending.
    pub fn next_send(&mut self) -> Option<Bytes> {
        if self.in_flight {
            return None;
        }
        let head = self.chunks.front()?.clone();
        self.in_flight = true;
        Some(head)
    }

    /// Record that the in-flight send wrote `written` bytes of the head.
    ///
    /// A full write pops the head; a partial write leaves only the unsent
    /// remainder at the front; zero bytes changes nothing.
    pub fn complete(&mut self, written: usize) {
        self.in_flight = false;
        let Some(head) = self.chunks.pop_front() else {
            return;
        };
        if written < head.len() {
            self.chunks.push_front(head.slice(written..));
        }
    }

    /// Move every queued buffer out, leaving this queue empty.
    pub fn take_all(&mut self) -> VecDeque<Bytes> {
        self.in_flight = false;
        std::mem::take(&mut self.chunks)
    }

    /// Append buffers taken from another queue.
    pub fn extend(&mut self, chunks: VecDeque<Bytes>) {
        self.chunks.extend(chunks);
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Total unsent bytes.
    pub fn pending_bytes(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_send_pops_head() {
        let mut queue = WriteQueue::new();
        queue.push(Bytes::from_static(b"hello"));
        queue.push(Bytes::from_static(b"world"));

        let head = queue.next_send().unwrap();
        assert_eq!(&head[..], b"hello");
        queue.complete(5);

        assert_eq!(queue.len(), 1);
        assert_eq!(&queue.next_send().unwrap()[..], b"world");
    }

    #[test]
    fn partial_send_keeps_unsent_tail_at_front() {
        let mut queue = WriteQueue::new();
        queue.push(Bytes::from_static(b"hello"));
        queue.push(Bytes::from_static(b"world"));

        queue.next_send().unwrap();
        queue.complete(2);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pending_bytes(), 8);
        assert_eq!(&queue.next_send().unwrap()[..], b"llo");
    }

    #[test]
    fn one_send_in_flight_at_a_time() {
        let mut queue = WriteQueue::new();
        queue.push(Bytes::from_static(b"a"));

        assert!(queue.next_send().is_some());
        assert!(queue.next_send().is_none());
        queue.complete(0);
        assert_eq!(&queue.next_send().unwrap()[..], b"a");
    }

    #[test]
    fn empty_buffers_are_not_queued() {
        let mut queue = WriteQueue::new();
        queue.push(Bytes::new());
        assert!(queue.is_empty());
    }

    #[test]
    fn take_all_moves_everything() {
        let mut queue = WriteQueue::new();
        queue.push(Bytes::from_static(b"a"));
        queue.push(Bytes::from_static(b"b"));
        queue.next_send();

        let mut other = WriteQueue::new();
        other.extend(queue.take_all());

        assert!(queue.is_empty());
        assert!(!queue.is_in_flight());
        assert_eq!(other.len(), 2);
    }
}
