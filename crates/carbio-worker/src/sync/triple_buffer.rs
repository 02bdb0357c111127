//! Wait-free single-writer, single-reader "latest value" channel.
//!
//! Three slots rotate between the writer, the reader and a shared middle
//! position. All coordination happens on one byte:
//!
//! ```text
//!  bit   6        5..4       3..2      1..0
//!      ┌───────┬──────────┬─────────┬──────────┐
//!      │ avail │ read idx │ mid idx │ write idx│
//!      └───────┴──────────┴─────────┴──────────┘
//! ```
//!
//! `push` fills the write slot, then swaps write and mid and sets `avail`.
//! `pop` waits for `avail`, then swaps mid and read and clears it. The writer
//! never waits. A reader that falls behind sees only the most recent value;
//! anything pushed in between is dropped, so this channel is only suitable
//! for results where the latest value wins.
//!
//! # Examples
//!
//! ```
//! use carbio_worker::sync::triple_buffer;
//!
//! let (mut writer, mut reader) = triple_buffer::<u32>();
//! writer.push(1);
//! writer.push(2);
//! writer.push(3);
//!
//! assert_eq!(reader.try_pop(), Some(3));
//! assert_eq!(reader.try_pop(), None);
//! ```

use std::cell::UnsafeCell;
use std::fmt;
use std::hint;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

const INDEX_MASK: u8 = 0b11;
const MID_SHIFT: u8 = 2;
const READ_SHIFT: u8 = 4;
const AVAILABLE: u8 = 1 << 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Control {
    write: u8,
    mid: u8,
    read: u8,
    available: bool,
}

impl Control {
    fn unpack(raw: u8) -> Self {
        Self {
            write: raw & INDEX_MASK,
            mid: (raw >> MID_SHIFT) & INDEX_MASK,
            read: (raw >> READ_SHIFT) & INDEX_MASK,
            available: raw & AVAILABLE != 0,
        }
    }

    fn pack(self) -> u8 {
        let available = if self.available { AVAILABLE } else { 0 };
        self.write | (self.mid << MID_SHIFT) | (self.read << READ_SHIFT) | available
    }
}

struct Shared<T> {
    slots: [UnsafeCell<Option<T>>; 3],
    control: AtomicU8,
}

// SAFETY: every slot is owned by exactly one side at a time; ownership moves
// only through the acquire/release CAS on `control`.
unsafe impl<T: Send> Send for Shared<T> {}
// SAFETY: as above.
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    fn control(&self, order: Ordering) -> Control {
        Control::unpack(self.control.load(order))
    }

    /// Rotate the control word with `f` until the CAS succeeds and return the
    /// state it replaced.
    fn rotate(&self, f: impl Fn(Control) -> Control) -> Control {
        let previous = self
            .control
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                Some(f(Control::unpack(raw)).pack())
            })
            .unwrap_or_else(|raw| raw);
        Control::unpack(previous)
    }
}

/// Create a connected writer/reader pair.
pub fn triple_buffer<T: Send>() -> (TripleBufferWriter<T>, TripleBufferReader<T>) {
    let initial = Control {
        write: 0,
        mid: 1,
        read: 2,
        available: false,
    };
    let shared = Arc::new(Shared {
        slots: [
            UnsafeCell::new(None),
            UnsafeCell::new(None),
            UnsafeCell::new(None),
        ],
        control: AtomicU8::new(initial.pack()),
    });
    (
        TripleBufferWriter {
            shared: Arc::clone(&shared),
        },
        TripleBufferReader { shared },
    )
}

/// Producer half. Never blocks.
pub struct TripleBufferWriter<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send> TripleBufferWriter<T> {
    /// Publish `value`, replacing any value the reader has not taken yet.
    pub fn push(&mut self, value: T) {
        // Only the writer changes the write index, so a relaxed read is exact.
        let write = self.shared.control(Ordering::Relaxed).write as usize;
        // SAFETY: the write slot belongs to the writer until the rotation
        // below publishes it; `&mut self` rules out a second writer.
        unsafe {
            *self.shared.slots[write].get() = Some(value);
        }
        self.shared.rotate(|c| Control {
            write: c.mid,
            mid: c.write,
            read: c.read,
            available: true,
        });
    }
}

/// Consumer half.
pub struct TripleBufferReader<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send> TripleBufferReader<T> {
    /// `true` when no unread value is waiting.
    pub fn is_empty(&self) -> bool {
        !self.shared.control(Ordering::Acquire).available
    }

    /// Take the latest value if one was published since the last pop.
    pub fn try_pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        self.take()
    }

    /// Spin until a value is published.
    pub fn pop(&mut self) -> Option<T> {
        while self.is_empty() {
            hint::spin_loop();
        }
        self.take()
    }

    /// Spin until a value is published or `cancel` returns `true`.
    pub fn pop_unless(&mut self, cancel: impl Fn() -> bool) -> Option<T> {
        while self.is_empty() {
            if cancel() {
                return None;
            }
            hint::spin_loop();
        }
        self.take()
    }

    fn take(&mut self) -> Option<T> {
        let previous = self.shared.rotate(|c| Control {
            write: c.write,
            mid: c.read,
            read: c.mid,
            available: false,
        });
        // SAFETY: after the rotation the old mid slot is the reader's, and
        // `&mut self` rules out a second reader.
        unsafe { (*self.shared.slots[previous.mid as usize].get()).take() }
    }
}

impl<T> fmt::Debug for TripleBufferWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TripleBufferWriter")
            .field("control", &self.shared.control(Ordering::Relaxed))
            .finish()
    }
}

impl<T> fmt::Debug for TripleBufferReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TripleBufferReader")
            .field("control", &self.shared.control(Ordering::Relaxed))
            .finish()
    }
}
