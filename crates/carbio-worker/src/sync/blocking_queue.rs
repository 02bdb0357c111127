//! Lossless multi-producer FIFO with blocking pops.
//!
//! Used where every message must arrive in order, such as enrollment stage
//! results. `pop_unless` re-checks its cancellation predicate at least every
//! [`CANCEL_POLL`] so a consumer can stop waiting without a push.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Longest sleep between two checks of a `pop_unless` predicate.
pub const CANCEL_POLL: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct BlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    /// Append `value` and wake one waiting consumer.
    pub fn push(&self, value: T) {
        self.items.lock().push_back(value);
        self.ready.notify_one();
    }

    /// Block until a value is available.
    pub fn pop(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(value) = items.pop_front() {
                return value;
            }
            self.ready.wait(&mut items);
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Block until a value is available or `cancel` returns `true`.
    ///
    /// A value that is already queued wins over cancellation.
    pub fn pop_unless(&self, cancel: impl Fn() -> bool) -> Option<T> {
        let mut items = self.items.lock();
        loop {
            if let Some(value) = items.pop_front() {
                return Some(value);
            }
            if cancel() {
                return None;
            }
            self.ready.wait_for(&mut items, CANCEL_POLL);
        }
    }

    /// Block until a value is available or `deadline` passes.
    pub fn pop_until(&self, deadline: Instant) -> Option<T> {
        let mut items = self.items.lock();
        loop {
            if let Some(value) = items.pop_front() {
                return Some(value);
            }
            if self.ready.wait_until(&mut items, deadline).timed_out() {
                return items.pop_front();
            }
        }
    }

    /// Wake every waiter so it re-checks its cancellation predicate.
    pub fn wake_all(&self) {
        self.ready.notify_all();
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Drop every queued value.
    pub fn clear(&self) {
        self.items.lock().clear();
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = BlockingQueue::new();
        for i in 0..5 {
            queue.push(i);
        }
        assert_eq!(queue.len(), 5);
        let popped: Vec<_> = (0..5).map(|_| queue.pop()).collect();
        assert_eq!(popped, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue = Arc::new(BlockingQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.push("stage");
            })
        };
        assert_eq!(queue.pop(), "stage");
        producer.join().unwrap();
    }

    #[test]
    fn test_pop_unless_cancel() {
        let queue: Arc<BlockingQueue<u8>> = Arc::new(BlockingQueue::new());
        let stop = Arc::new(AtomicBool::new(false));

        let consumer = {
            let queue = Arc::clone(&queue);
            let stop = Arc::clone(&stop);
            thread::spawn(move || queue.pop_unless(|| stop.load(Ordering::Acquire)))
        };

        thread::sleep(Duration::from_millis(15));
        stop.store(true, Ordering::Release);
        queue.wake_all();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_queued_value_beats_cancel() {
        let queue = BlockingQueue::new();
        queue.push(7);
        assert_eq!(queue.pop_unless(|| true), Some(7));
    }

    #[test]
    fn test_pop_until_times_out() {
        let queue: BlockingQueue<u8> = BlockingQueue::new();
        let start = Instant::now();
        assert_eq!(queue.pop_until(start + Duration::from_millis(5)), None);
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_many_producers_lose_nothing() {
        let queue = Arc::new(BlockingQueue::new());
        let producers: Vec<_> = (0..4u32)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..1_000 {
                        queue.push((p, i));
                    }
                })
            })
            .collect();

        let mut last = [None::<u32>; 4];
        for _ in 0..4_000 {
            let (p, i) = queue.pop();
            if let Some(prev) = last[p as usize] {
                assert_eq!(i, prev + 1);
            }
            last[p as usize] = Some(i);
        }
        for producer in producers {
            producer.join().unwrap();
        }
        assert!(queue.is_empty());
        assert!(last.iter().all(|l| *l == Some(999)));
    }
}
