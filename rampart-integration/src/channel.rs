//! In-process publish/subscribe fan-out ("topic bus").
//!
//! A [`Topic`] delivers every value sent on it to each live [`Receiver`] in send-order, without
//! letting a slow subscriber block the producer or any other subscriber. Producers never fail and
//! never block; when a subscriber's bounded buffer is full the topic either drops the oldest
//! buffered value (`coalesce = true`) or drops the new value (`coalesce = false`).
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::Notify;

/// A published value is fanned out to every live [`Receiver`] of a [`Topic`].
#[derive(Debug)]
pub struct Topic<T> {
    inner: Arc<TopicInner<T>>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[derive(Debug)]
struct TopicInner<T> {
    subscribers: std::sync::Mutex<Vec<Arc<Subscriber<T>>>>,
    closed: AtomicBool,
}

#[derive(Debug)]
struct Subscriber<T> {
    buffer: std::sync::Mutex<VecDeque<T>>,
    capacity: usize,
    coalesce: bool,
    closed: AtomicBool,
    notify: Notify,
    /// Incremented on every send attempt this subscriber observed, delivered or dropped.
    sequence: AtomicU64,
    /// Incremented only when a send was dropped (buffer full, `coalesce = false`) or a buffered
    /// value was evicted to make room (`coalesce = true`). Lets a [`Receiver`] detect a gap.
    dropped: AtomicU64,
}

impl<T> Default for Topic<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Topic<T>
where
    T: Clone,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TopicInner {
                subscribers: std::sync::Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a new subscriber with room for `buffer_size` values. When the buffer is full,
    /// `coalesce = true` drops the oldest buffered value to make room for the new one (the
    /// subscriber always holds the newest values); `coalesce = false` drops the new value instead
    /// and keeps what's already buffered. `buffer_size = 1, coalesce = true` is a latest-only
    /// subscriber.
    pub fn subscribe(&self, buffer_size: usize, coalesce: bool) -> Receiver<T> {
        let capacity = buffer_size.max(1);

        let subscriber = Arc::new(Subscriber {
            buffer: std::sync::Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            coalesce,
            closed: AtomicBool::new(self.inner.closed.load(Ordering::Acquire)),
            notify: Notify::new(),
            sequence: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        self.inner
            .subscribers
            .lock()
            .expect("subscribers mutex poisoned")
            .push(Arc::clone(&subscriber));

        Receiver { subscriber }
    }

    /// Non-blocking. Enqueues `value` to every live subscriber's buffer. Never fails, never
    /// blocks the caller.
    pub fn send(&self, value: T) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }

        let subscribers = self
            .inner
            .subscribers
            .lock()
            .expect("subscribers mutex poisoned")
            .clone();

        for subscriber in subscribers.iter() {
            if subscriber.closed.load(Ordering::Acquire) {
                continue;
            }

            subscriber.sequence.fetch_add(1, Ordering::AcqRel);

            let mut buffer = subscriber.buffer.lock().expect("buffer mutex poisoned");
            if buffer.len() >= subscriber.capacity {
                if subscriber.coalesce {
                    buffer.pop_front();
                    buffer.push_back(value.clone());
                    subscriber.dropped.fetch_add(1, Ordering::AcqRel);
                } else {
                    subscriber.dropped.fetch_add(1, Ordering::AcqRel);
                    continue;
                }
            } else {
                buffer.push_back(value.clone());
            }
            drop(buffer);
            subscriber.notify.notify_one();
        }
    }

    /// Closes the topic and every live subscriber. Further sends are no-ops.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let subscribers = self
            .inner
            .subscribers
            .lock()
            .expect("subscribers mutex poisoned");
        for subscriber in subscribers.iter() {
            subscriber.closed.store(true, Ordering::Release);
            subscriber.notify.notify_waiters();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .expect("subscribers mutex poisoned")
            .len()
    }
}

/// A topic subscriber. Closed either explicitly via [`Receiver::close`] or implicitly when its
/// [`Topic`] is closed.
#[derive(Debug)]
pub struct Receiver<T> {
    subscriber: Arc<Subscriber<T>>,
}

/// Error returned by [`Receiver::receive`] once the subscriber (or its topic) has been closed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("topic receiver closed")]
pub struct Closed;

impl<T> Receiver<T> {
    /// Blocks until the next value is available or the subscriber is closed.
    pub async fn receive(&self) -> Result<T, Closed> {
        loop {
            if let Some(value) = self
                .subscriber
                .buffer
                .lock()
                .expect("buffer mutex poisoned")
                .pop_front()
            {
                return Ok(value);
            }

            if self.subscriber.closed.load(Ordering::Acquire) {
                return Err(Closed);
            }

            self.subscriber.notify.notified().await;
        }
    }

    /// Idempotent.
    pub fn close(&self) {
        if !self.subscriber.closed.swap(true, Ordering::AcqRel) {
            self.subscriber.notify.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.subscriber.closed.load(Ordering::Acquire)
    }

    /// Monotonic count of every send this subscriber has observed, delivered or dropped. A gap
    /// between two reads larger than the number of successful [`Receiver::receive`] calls in
    /// between indicates dropped values.
    pub fn sequence(&self) -> u64 {
        self.subscriber.sequence.load(Ordering::Acquire)
    }

    /// Count of values dropped (buffer full) or evicted (coalesced) for this subscriber so far.
    pub fn dropped(&self) -> u64 {
        self.subscriber.dropped.load(Ordering::Acquire)
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        if !self.subscriber.closed.swap(true, Ordering::AcqRel) {
            let name = std::any::type_name::<T>();
            tracing::trace!(name, "topic Receiver dropped without explicit close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_values_in_send_order() {
        let topic: Topic<u32> = Topic::new();
        let rx = topic.subscribe(8, false);

        topic.send(1);
        topic.send(2);
        topic.send(3);

        assert_eq!(rx.receive().await.unwrap(), 1);
        assert_eq!(rx.receive().await.unwrap(), 2);
        assert_eq!(rx.receive().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn non_coalescing_buffer_drops_new_values_once_full() {
        let topic: Topic<u32> = Topic::new();
        let rx = topic.subscribe(2, false);

        topic.send(1);
        topic.send(2);
        topic.send(3); // buffer full at capacity 2, dropped

        assert_eq!(rx.receive().await.unwrap(), 1);
        assert_eq!(rx.receive().await.unwrap(), 2);
        assert_eq!(rx.dropped(), 1);
        assert_eq!(rx.sequence(), 3);
    }

    #[tokio::test]
    async fn coalescing_buffer_keeps_only_the_latest_value() {
        let topic: Topic<u32> = Topic::new();
        let rx = topic.subscribe(1, true);

        topic.send(1);
        topic.send(2);
        topic.send(3);

        assert_eq!(rx.receive().await.unwrap(), 3);
        assert_eq!(rx.dropped(), 2);
    }

    #[tokio::test]
    async fn closing_the_topic_wakes_every_pending_receiver() {
        let topic: Topic<u32> = Topic::new();
        let rx = topic.subscribe(4, false);

        topic.close();
        assert!(rx.receive().await.is_err());
        assert!(rx.is_closed());
    }

    #[tokio::test]
    async fn a_send_never_blocks_on_an_unrelated_slow_subscriber() {
        let topic: Topic<u32> = Topic::new();
        let slow = topic.subscribe(1, false);
        let fast = topic.subscribe(8, false);

        topic.send(1);
        topic.send(2); // dropped for `slow`, buffered for `fast`

        assert_eq!(fast.receive().await.unwrap(), 1);
        assert_eq!(fast.receive().await.unwrap(), 2);
        assert_eq!(slow.receive().await.unwrap(), 1);
        assert_eq!(slow.dropped(), 1);
    }
}
