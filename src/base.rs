use crate::node::{hazard, protect, Node, Pointer};
use crate::pool::{NodePool, Recycle};
use crate::tagged::MaybeTagged;
use crate::{atomic, Rejected};
use alloc::sync::Arc;
use core::marker::PhantomData;
use core::ptr::{null_mut, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};

/// Treiber's stack over bare nodes.
///
/// The head is a tagged pointer whose generation advances on every
/// successful push or pop, so a pop that read a node which was then popped,
/// recycled and pushed again fails its CAS instead of installing a stale
/// `next`.
pub(crate) struct RawStack {
    head: MaybeTagged<Node>,
}

impl RawStack {
    pub(crate) fn new() -> Self {
        RawStack {
            head: MaybeTagged::new(null_mut()),
        }
    }

    pub(crate) fn push(&self, node: NonNull<Node>) {
        let node_ref = unsafe { node.as_ref() };
        let mut top = self.head.load();

        loop {
            node_ref.next.store_ptr(top.ptr());

            match self.head.compare_exchange(
                top,
                top.with_ptr(node.as_ptr()),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(now) => top = now,
            }
        }
    }

    pub(crate) fn pop(&self) -> Option<NonNull<Node>> {
        let mut hazard = hazard();

        loop {
            let top = protect(&mut hazard, &self.head);
            let node = NonNull::new(top.ptr())?;

            let next = unsafe { node.as_ref() }.next.load_ptr();

            if self
                .head
                .compare_exchange(top, top.with_ptr(next), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(node);
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.load().is_null()
    }

    /// Detaches the whole chain; the caller owns every node reachable from
    /// the returned pointer.
    pub(crate) fn take_all(&mut self) -> *mut Node {
        let top = self.head.load();
        self.head.store(top.with_ptr(null_mut()));
        top.ptr()
    }

    /// Walks the chain. Only meaningful while nothing pushes or pops.
    pub(crate) fn count_nodes(&self) -> usize {
        let mut count = 0;
        let mut curr = self.head.load_ptr();

        while !curr.is_null() {
            count += 1;
            curr = unsafe { (*curr).next.load_ptr() };
        }

        count
    }
}

/// A lock-free LIFO stack of pointer-like items.
///
/// ```
/// let stack = casq::Stack::new();
///
/// stack.push(Box::new(1)).unwrap();
/// stack.push(Box::new(2)).unwrap();
///
/// assert_eq!(stack.pop().map(|b| *b), Some(2));
/// assert_eq!(stack.pop().map(|b| *b), Some(1));
/// assert!(stack.pop().is_none());
/// ```
pub struct Stack<P: Pointer> {
    head: RawStack,
    len: AtomicUsize,
    recycle: Recycle,
    _marker: PhantomData<P>,
}

unsafe impl<P: Pointer + Send> Send for Stack<P> {}
unsafe impl<P: Pointer + Send> Sync for Stack<P> {}

impl<P: Pointer> Stack<P> {
    /// A stack whose spent nodes are freed through hazard pointers.
    pub fn new() -> Self {
        Self::with_recycle(Recycle::Free)
    }

    /// A stack that takes its nodes from `pool` and gives them back there.
    pub fn with_pool(pool: Arc<NodePool>) -> Self {
        Self::with_recycle(Recycle::Pool(pool))
    }

    fn with_recycle(recycle: Recycle) -> Self {
        Stack {
            head: RawStack::new(),
            len: AtomicUsize::new(0),
            recycle,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        let len = atomic::load(&self.len);
        if len > isize::MAX as usize {
            0
        } else {
            len
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_empty()
    }

    /// Counts linked nodes by walking the chain. Not meant to be used while
    /// other threads push or pop.
    pub fn count_nodes(&self) -> usize {
        self.head.count_nodes()
    }

    pub fn pool(&self) -> Option<&Arc<NodePool>> {
        self.recycle.pool()
    }
}

impl<P> Stack<P>
where
    P: Pointer,
{
    /// Pushes `item`, or hands it back if no node could be obtained.
    pub fn push(&self, item: P) -> Result<(), Rejected<P>> {
        let node = match self.recycle.acquire() {
            Ok(node) => node,
            Err(error) => return Err(Rejected::new(item, error)),
        };

        self.link(node, item);
        Ok(())
    }

    /// Obtains a node first and only then builds the item.
    pub(crate) fn push_with(&self, item: impl FnOnce() -> P) -> Result<(), crate::Error> {
        let node = self.recycle.acquire()?;

        self.link(node, item());
        Ok(())
    }

    fn link(&self, node: NonNull<Node>, item: P) {
        unsafe { node.as_ref() }.put(item.into_raw());

        self.head.push(node);

        atomic::increment(&self.len);
    }

    pub fn pop(&self) -> Option<P> {
        let node = self.head.pop()?;

        atomic::decrement(&self.len);

        let raw = unsafe { node.as_ref() }.take();

        unsafe {
            self.recycle.retire(node);
            Some(P::from_raw(raw))
        }
    }
}

impl<P: Pointer> Default for Stack<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Pointer> core::fmt::Debug for Stack<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stack")
            .field("head", &self.head.head)
            .field("len", &self.len())
            .field("pooled", &self.recycle.pool().is_some())
            .finish()
    }
}

impl<P: Pointer> Drop for Stack<P> {
    fn drop(&mut self) {
        let mut curr = self.head.take_all();
        let mut drained = 0usize;

        unsafe {
            while let Some(node) = NonNull::new(curr) {
                curr = node.as_ref().next.load_ptr();

                drop(P::from_raw(node.as_ref().take()));
                drained += 1;

                self.recycle.dispose(node);
            }
        }

        self.recycle.flush();

        tracing::debug!(drained, "stack released");
    }
}
