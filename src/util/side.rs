//! Bounded fire-and-forget side channel.
//!
//! Both the safety scanner and the log sink submit work from the request path
//! without ever delaying the response. The channel is a fixed-capacity deque:
//! when full, the oldest pending item is dropped and a warning is logged at
//! most once per window.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::util::now_secs;

const OVERFLOW_WARN_WINDOW_SECS: i64 = 60;

/// A bounded multi-producer single-consumer queue with drop-oldest overflow.
pub struct SideChannel<T> {
    name: &'static str,
    capacity: usize,
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
    last_overflow_warn: AtomicI64,
}

impl<T> SideChannel<T> {
    pub fn new(name: &'static str, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            last_overflow_warn: AtomicI64::new(0),
        })
    }

    /// Enqueues an item, evicting the oldest pending item on overflow.
    ///
    /// Never blocks and never fails; the request path must not be delayed.
    pub fn submit(&self, item: T) {
        let mut queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
        if queue.len() >= self.capacity {
            queue.pop_front();
            let now = now_secs();
            let last = self.last_overflow_warn.load(Ordering::Relaxed);
            if now - last >= OVERFLOW_WARN_WINDOW_SECS
                && self
                    .last_overflow_warn
                    .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
            {
                tracing::warn!(channel = self.name, "side channel full, dropping oldest item");
            }
        }
        queue.push_back(item);
        drop(queue);
        self.notify.notify_one();
    }

    /// Dequeues the next item, waiting until one is available.
    pub async fn next(&self) -> T {
        loop {
            {
                let mut queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
                if let Some(item) = queue.pop_front() {
                    return item;
                }
            }
            self.notify.notified().await;
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order() {
        let channel = SideChannel::new("test", 8);
        channel.submit(1u32);
        channel.submit(2);
        assert_eq!(channel.next().await, 1);
        assert_eq!(channel.next().await, 2);
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let channel = SideChannel::new("test", 2);
        channel.submit(1u32);
        channel.submit(2);
        channel.submit(3);
        assert_eq!(channel.len(), 2);
        assert_eq!(channel.next().await, 2);
        assert_eq!(channel.next().await, 3);
    }

    #[tokio::test]
    async fn wakes_a_waiting_consumer() {
        let channel = SideChannel::new("test", 2);
        let consumer = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.next().await })
        };
        tokio::task::yield_now().await;
        channel.submit(7u32);
        assert_eq!(consumer.await.unwrap(), 7);
    }
}
