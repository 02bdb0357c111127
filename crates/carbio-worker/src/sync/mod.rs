//! Cross-thread plumbing between the worker thread and its callers.
//!
//! | Primitive | Delivery | Used for |
//! |-----------|----------|----------|
//! | [`SpinLock`] | n/a | the command heap |
//! | [`triple_buffer`] | latest value wins | auth, admin and verify results |
//! | [`BlockingQueue`] | every value, FIFO | enrollment stages |

pub mod blocking_queue;
pub mod spinlock;
pub mod triple_buffer;

pub use blocking_queue::BlockingQueue;
pub use spinlock::{SpinLock, SpinLockGuard};
pub use triple_buffer::{TripleBufferReader, TripleBufferWriter, triple_buffer};
