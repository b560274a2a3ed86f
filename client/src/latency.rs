//! Artificial latency for testing the netcode on a local connection.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Holds items back for a fixed delay, releasing them in the order they went
/// in.
#[derive(Debug)]
pub struct DelayQueue<T> {
    delay: Duration,
    items: VecDeque<(Instant, T)>,
}

impl<T> DelayQueue<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            items: VecDeque::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn push(&mut self, item: T, now: Instant) {
        self.items.push_back((now + self.delay, item));
    }

    /// Removes and returns every item whose delay has passed by `now`.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<T> {
        let mut ready = Vec::new();
        while let Some((due, _)) = self.items.front() {
            if *due > now {
                break;
            }
            if let Some((_, item)) = self.items.pop_front() {
                ready.push(item);
            }
        }
        ready
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_delay_is_immediate() {
        let mut queue = DelayQueue::new(Duration::ZERO);
        let now = Instant::now();
        queue.push(1, now);
        queue.push(2, now);
        assert_eq!(queue.drain_ready(now), vec![1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_items_wait_for_delay() {
        let mut queue = DelayQueue::new(Duration::from_millis(50));
        let start = Instant::now();
        queue.push("a", start);
        queue.push("b", start + Duration::from_millis(20));

        assert!(queue.drain_ready(start + Duration::from_millis(49)).is_empty());
        assert_eq!(queue.drain_ready(start + Duration::from_millis(50)), vec!["a"]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain_ready(start + Duration::from_millis(100)), vec!["b"]);
    }
}
