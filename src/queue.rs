// Event queue: unbounded FIFO between the feed thread and the dispatch loop.
//
// The feed thread pushes, the dispatch loop pops and re-enqueues failures at
// the back. The handle is cheap to clone; all clones share one buffer and the
// buffer serializes access itself, so callers never lock anything.
//
// There is no capacity bound. Sustained upstream bursts or sustained fetch
// failures grow memory without limit; `len()` is there so operators can
// watch for it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::event::QueuedEvent;

#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    inner: Arc<Mutex<VecDeque<QueuedEvent>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event at the back.
    pub fn push(&self, event: impl Into<QueuedEvent>) {
        self.lock().push_back(event.into());
    }

    /// Take the event at the front, if any. Never blocks on an empty queue.
    pub fn pop(&self) -> Option<QueuedEvent> {
        self.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    // A panic while holding the lock cannot leave the deque half-updated
    // (every critical section is a single VecDeque call), so a poisoned
    // lock is safe to keep using.
    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedEvent>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::FeedEvent;
    use chrono::Utc;

    fn backfilled(id: &str) -> FeedEvent {
        FeedEvent::Backfilled {
            id: id.to_string(),
            author: "A".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = EventQueue::new();
        queue.push(backfilled("1"));
        queue.push(backfilled("2"));
        queue.push(backfilled("3"));

        let ids: Vec<String> = std::iter::from_fn(|| queue.pop())
            .map(|q| q.event.id().to_string())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_pop_on_empty_returns_none() {
        let queue = EventQueue::new();
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_clones_share_the_buffer() {
        let producer = EventQueue::new();
        let consumer = producer.clone();
        producer.push(backfilled("1"));
        assert_eq!(consumer.len(), 1);
        assert_eq!(consumer.pop().unwrap().event.id(), "1");
        assert!(producer.is_empty());
    }

    #[test]
    fn test_push_preserves_retry_count() {
        let queue = EventQueue::new();
        queue.push(QueuedEvent {
            event: backfilled("1"),
            retries: 3,
        });
        assert_eq!(queue.pop().unwrap().retries, 3);
    }

    #[test]
    fn test_push_from_another_thread() {
        let queue = EventQueue::new();
        let producer = queue.clone();
        let handle = std::thread::spawn(move || {
            for i in 0..100 {
                producer.push(backfilled(&i.to_string()));
            }
        });
        handle.join().unwrap();
        assert_eq!(queue.len(), 100);
        assert_eq!(queue.pop().unwrap().event.id(), "0");
    }
}
