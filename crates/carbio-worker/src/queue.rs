//! Priority command queue shared between the caller and the worker thread.
//!
//! A binary max-heap under a [`SpinLock`], plus a lock-free "has data" flag
//! so the worker can poll for work without taking the lock. Commands pop in
//! [`SensorCommand`] order: priority, then kind, then first-in first-out.

use crate::command::{CommandKind, Priority, SensorCommand};
use crate::sync::SpinLock;
use std::collections::BinaryHeap;
use std::hint;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct PriorityCommandQueue {
    heap: SpinLock<BinaryHeap<SensorCommand>>,
    has_data: AtomicBool,
    next_seq: AtomicU64,
}

impl PriorityCommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `command`, stamping it with the next sequence number.
    pub fn push(&self, mut command: SensorCommand) {
        command.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut heap = self.heap.lock();
        heap.push(command);
        self.has_data.store(true, Ordering::Release);
    }

    /// Spin until a command is available and return it.
    pub fn pop(&self) -> SensorCommand {
        loop {
            while !self.has_data.load(Ordering::Acquire) {
                hint::spin_loop();
            }
            if let Some(command) = self.try_pop() {
                return command;
            }
        }
    }

    /// Spin until a command is available or `deadline` passes.
    pub fn pop_until(&self, deadline: Instant) -> Option<SensorCommand> {
        loop {
            if let Some(command) = self.try_pop() {
                return Some(command);
            }
            if Instant::now() >= deadline {
                return None;
            }
            hint::spin_loop();
        }
    }

    pub fn try_pop(&self) -> Option<SensorCommand> {
        if !self.has_data.load(Ordering::Acquire) {
            return None;
        }
        let mut heap = self.heap.lock();
        let command = heap.pop();
        self.has_data.store(!heap.is_empty(), Ordering::Release);
        command
    }

    /// Drop every queued command of `kind`. Returns how many were removed.
    pub fn clear_type(&self, kind: CommandKind) -> usize {
        self.retain(|c| c.kind != kind)
    }

    /// Drop every queued `Low` priority command. Returns how many were removed.
    pub fn clear_low_priority(&self) -> usize {
        self.retain(|c| c.priority != Priority::Low)
    }

    /// Drop everything.
    pub fn clear(&self) -> usize {
        self.retain(|_| false)
    }

    fn retain(&self, keep: impl FnMut(&SensorCommand) -> bool) -> usize {
        let mut heap = self.heap.lock();
        let before = heap.len();
        heap.retain(keep);
        self.has_data.store(!heap.is_empty(), Ordering::Release);
        before - heap.len()
    }

    /// Lock-free emptiness check.
    pub fn is_empty(&self) -> bool {
        !self.has_data.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// `true` if any queued command matches `predicate`.
    pub fn contains(&self, predicate: impl Fn(&SensorCommand) -> bool) -> bool {
        self.heap.lock().iter().any(predicate)
    }
}
