//! Queues and stacks of reference-counted handles.
//!
//! The adapters retain an item when it goes in and hand the retained
//! reference to whoever takes it out. Whatever is still inside when an
//! adapter is released gets released exactly once.

use crate::base::Stack;
use crate::node::Pointer;
use crate::pool::NodePool;
use crate::queue::Queue;
use crate::Error;
use alloc::sync::Arc;

/// A handle to a reference-counted object.
pub trait RefCount: Pointer {
    /// Takes one more reference to the object.
    fn retain(&self) -> Self;

    /// Gives up this reference.
    fn release(self);
}

impl<T> RefCount for Arc<T> {
    fn retain(&self) -> Self {
        Arc::clone(self)
    }

    fn release(self) {
        drop(self)
    }
}

/// A lock-free FIFO queue that retains what it holds.
///
/// ```
/// use std::sync::Arc;
///
/// let queue = casq::RefQueue::new();
/// let item = Arc::new("job");
///
/// queue.enqueue(&item).unwrap();
/// assert_eq!(Arc::strong_count(&item), 2);
///
/// let out = queue.dequeue().unwrap();
/// assert!(Arc::ptr_eq(&out, &item));
/// ```
pub struct RefQueue<R: RefCount> {
    queue: Queue<R>,
}

impl<R: RefCount> RefQueue<R> {
    pub fn new() -> Self {
        RefQueue {
            queue: Queue::new(),
        }
    }

    pub fn with_pool(pool: Arc<NodePool>) -> Result<Self, Error> {
        Ok(RefQueue {
            queue: Queue::with_pool(pool)?,
        })
    }

    /// Retains `item` and appends the new reference. If no node can be
    /// obtained nothing is retained.
    pub fn enqueue(&self, item: &R) -> Result<(), Error> {
        self.queue.enqueue_with(|| item.retain())
    }

    /// Takes the oldest reference out; the caller now owns it.
    pub fn dequeue(&self) -> Option<R> {
        self.queue.dequeue()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn count_nodes(&self) -> usize {
        self.queue.count_nodes()
    }

    /// Releases every reference still queued and returns how many there were.
    pub fn release(mut self) -> usize {
        self.drain()
    }

    fn drain(&mut self) -> usize {
        let mut released = 0;

        while let Some(item) = self.queue.dequeue() {
            item.release();
            released += 1;
        }

        released
    }
}

impl<R: RefCount> Default for RefQueue<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RefCount> core::fmt::Debug for RefQueue<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("RefQueue").field(&self.queue).finish()
    }
}

impl<R: RefCount> Drop for RefQueue<R> {
    fn drop(&mut self) {
        let released = self.drain();
        if released > 0 {
            tracing::debug!(released, "released queued references");
        }
    }
}

/// A lock-free LIFO stack that retains what it holds.
pub struct RefStack<R: RefCount> {
    stack: Stack<R>,
}

impl<R: RefCount> RefStack<R> {
    pub fn new() -> Self {
        RefStack {
            stack: Stack::new(),
        }
    }

    pub fn with_pool(pool: Arc<NodePool>) -> Self {
        RefStack {
            stack: Stack::with_pool(pool),
        }
    }

    /// Retains `item` and pushes the new reference. If no node can be
    /// obtained nothing is retained.
    pub fn push(&self, item: &R) -> Result<(), Error> {
        self.stack.push_with(|| item.retain())
    }

    pub fn pop(&self) -> Option<R> {
        self.stack.pop()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn count_nodes(&self) -> usize {
        self.stack.count_nodes()
    }

    /// Releases every reference still stacked and returns how many there were.
    pub fn release(mut self) -> usize {
        self.drain()
    }

    fn drain(&mut self) -> usize {
        let mut released = 0;

        while let Some(item) = self.stack.pop() {
            item.release();
            released += 1;
        }

        released
    }
}

impl<R: RefCount> Default for RefStack<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RefCount> core::fmt::Debug for RefStack<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("RefStack").field(&self.stack).finish()
    }
}

impl<R: RefCount> Drop for RefStack<R> {
    fn drop(&mut self) {
        let released = self.drain();
        if released > 0 {
            tracing::debug!(released, "released stacked references");
        }
    }
}
