use crate::node::{hazard, protect, Node, Pointer};
use crate::pool::{NodePool, Recycle};
use crate::tagged::MaybeTagged;
use crate::{atomic, Error, Rejected};
use alloc::alloc::handle_alloc_error;
use alloc::sync::Arc;
use core::alloc::Layout;
use core::marker::PhantomData;
use core::ptr::{null_mut, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};

/// A lock-free FIFO queue of pointer-like items.
///
/// This is the Michael–Scott queue: `head` always points at a sentinel node
/// whose payload has already been handed out (or never existed), and a
/// dequeue reads the payload of the node *after* the sentinel before swinging
/// `head` onto it. That node becomes the new sentinel.
///
/// `head`, `tail` and every node's `next` are tagged pointers, so a thread
/// that was preempted while holding an old snapshot cannot complete a CAS
/// after the node it looked at has been recycled.
///
/// ```
/// let queue = casq::Queue::new();
///
/// queue.enqueue(Box::new("first")).unwrap();
/// queue.enqueue(Box::new("second")).unwrap();
///
/// assert_eq!(queue.dequeue().map(|b| *b), Some("first"));
/// assert_eq!(queue.dequeue().map(|b| *b), Some("second"));
/// assert!(queue.dequeue().is_none());
/// ```
pub struct Queue<P: Pointer> {
    head: MaybeTagged<Node>,
    tail: MaybeTagged<Node>,
    len: AtomicUsize,
    recycle: Recycle,
    _marker: PhantomData<P>,
}

unsafe impl<P: Pointer + Send> Send for Queue<P> {}
unsafe impl<P: Pointer + Send> Sync for Queue<P> {}

impl<P: Pointer> Queue<P> {
    /// A queue whose spent nodes are freed through hazard pointers.
    ///
    /// # Panics
    ///
    /// Aborts through [`handle_alloc_error`] if the sentinel node cannot be
    /// allocated, as `Box::new` would.
    pub fn new() -> Self {
        match Self::with_recycle(Recycle::Free) {
            Ok(queue) => queue,
            Err(_) => handle_alloc_error(Layout::new::<Node>()),
        }
    }

    /// A queue that takes its nodes, the sentinel included, from `pool` and
    /// gives them back there.
    pub fn with_pool(pool: Arc<NodePool>) -> Result<Self, Error> {
        Self::with_recycle(Recycle::Pool(pool))
    }

    fn with_recycle(recycle: Recycle) -> Result<Self, Error> {
        let sentinel = recycle.acquire()?;

        unsafe { sentinel.as_ref() }.next.store_ptr(null_mut());

        Ok(Queue {
            head: MaybeTagged::new(sentinel.as_ptr()),
            tail: MaybeTagged::new(sentinel.as_ptr()),
            len: AtomicUsize::new(0),
            recycle,
            _marker: PhantomData,
        })
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
        let mut hazard = hazard();
        let head = protect(&mut hazard, &self.head);

        unsafe { (*head.ptr()).next.load_ptr().is_null() }
    }

    /// Counts the nodes holding items by walking from the sentinel. Not
    /// meant to be used while other threads enqueue or dequeue.
    pub fn count_nodes(&self) -> usize {
        let mut count = 0;
        let mut curr = unsafe { (*self.head.load_ptr()).next.load_ptr() };

        while !curr.is_null() {
            count += 1;
            curr = unsafe { (*curr).next.load_ptr() };
        }

        count
    }

    pub fn pool(&self) -> Option<&Arc<NodePool>> {
        self.recycle.pool()
    }

    /// Appends `item`, or hands it back if no node could be obtained.
    pub fn enqueue(&self, item: P) -> Result<(), Rejected<P>> {
        let node = match self.recycle.acquire() {
            Ok(node) => node,
            Err(error) => return Err(Rejected::new(item, error)),
        };

        self.link(node, item);
        Ok(())
    }

    /// Obtains a node first and only then builds the item.
    pub(crate) fn enqueue_with(&self, item: impl FnOnce() -> P) -> Result<(), Error> {
        let node = self.recycle.acquire()?;

        self.link(node, item());
        Ok(())
    }

    fn link(&self, node: NonNull<Node>, item: P) {
        let node_ref = unsafe { node.as_ref() };
        node_ref.put(item.into_raw());
        node_ref.next.store_ptr(null_mut());

        let mut hazard = hazard();

        loop {
            let tail = protect(&mut hazard, &self.tail);
            let last = unsafe { &*tail.ptr() };
            let next = last.next.load();

            if self.tail.load() != tail {
                continue;
            }

            if !next.is_null() {
                // another enqueue linked its node but has not moved `tail` yet
                let _ = self.tail.compare_exchange(
                    tail,
                    tail.with_ptr(next.ptr()),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                continue;
            }

            if last
                .next
                .compare_exchange(
                    next,
                    next.with_ptr(node.as_ptr()),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                // if this fails someone else has already helped
                let _ = self.tail.compare_exchange(
                    tail,
                    tail.with_ptr(node.as_ptr()),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                break;
            }
        }

        atomic::increment(&self.len);
    }

    pub fn dequeue(&self) -> Option<P> {
        let mut head_hazard = hazard();
        let mut next_hazard = hazard();

        loop {
            let head = protect(&mut head_hazard, &self.head);
            let tail = self.tail.load();
            let next = unsafe { (*head.ptr()).next.load() };

            next_hazard.protect_raw(next.ptr());

            if self.head.load() != head {
                continue;
            }

            let Some(first) = NonNull::new(next.ptr()) else {
                return None;
            };

            if core::ptr::eq(head.ptr(), tail.ptr()) {
                let _ = self.tail.compare_exchange(
                    tail,
                    tail.with_ptr(next.ptr()),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                continue;
            }

            // read before the CAS: once `head` moves, `first` is the sentinel
            // and a racing dequeue may recycle it
            let raw = unsafe { first.as_ref() }.peek();

            if self
                .head
                .compare_exchange(head, head.with_ptr(next.ptr()), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                atomic::decrement(&self.len);

                head_hazard.reset_protection();
                next_hazard.reset_protection();

                unsafe {
                    self.recycle.retire(NonNull::new_unchecked(head.ptr()));
                    return Some(P::from_raw(raw));
                }
            }
        }
    }
}

impl<P: Pointer> Default for Queue<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Pointer> core::fmt::Debug for Queue<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Queue")
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("len", &self.len())
            .field("pooled", &self.recycle.pool().is_some())
            .finish()
    }
}

impl<P: Pointer> Drop for Queue<P> {
    fn drop(&mut self) {
        let sentinel = self.head.load_ptr();
        let mut drained = 0usize;

        unsafe {
            let mut curr = (*sentinel).next.load_ptr();
            self.recycle.dispose(NonNull::new_unchecked(sentinel));

            while let Some(node) = NonNull::new(curr) {
                curr = node.as_ref().next.load_ptr();

                drop(P::from_raw(node.as_ref().take()));
                drained += 1;

                self.recycle.dispose(node);
            }
        }

        self.recycle.flush();

        tracing::debug!(drained, "queue released");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pool::Config;
    use crate::Opaque;
    use proptest::prelude::*;
    use std::collections::{HashSet, VecDeque};
    use std::thread;

    const THREADS: u64 = 8;
    const PER_THREAD: u64 = 10_000;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    #[test]
    fn test_empty_stability() {
        let queue: Queue<Box<u32>> = Queue::new();

        assert!(queue.dequeue().is_none());
        assert!(queue.is_empty());
        assert_eq!(queue.count_nodes(), 0);

        queue.enqueue(Box::new(7)).unwrap();
        assert!(!queue.is_empty());
        assert_eq!(queue.dequeue().map(|b| *b), Some(7));
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_fifo_single_producer_single_consumer() {
        let queue = Arc::new(Queue::new());

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..10_000u32 {
                    queue.enqueue(Box::new(i)).unwrap();
                }
            })
        };

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut seen = Vec::with_capacity(10_000);
                while seen.len() < 10_000 {
                    match queue.dequeue() {
                        Some(item) => seen.push(*item),
                        None => thread::yield_now(),
                    }
                }
                seen
            })
        };

        producer.join().unwrap();
        let seen = consumer.join().unwrap();

        assert_eq!(seen, (0..10_000).collect::<Vec<_>>());
    }

    #[test]
    fn test_completed_enqueue_is_visible() {
        let queue = Arc::new(Queue::new());

        {
            let queue = queue.clone();
            thread::spawn(move || queue.enqueue(Box::new(42)).unwrap())
                .join()
                .unwrap();
        }

        let seen = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue().map(|b| *b))
                .join()
                .unwrap()
        };

        assert_eq!(seen, Some(42));
    }

    fn stress(queue: Arc<Queue<Box<u64>>>) {
        init_tracing();

        let total = (THREADS * PER_THREAD) as usize;
        let taken = Arc::new(AtomicUsize::new(0));

        let producers: Vec<_> = (0..THREADS)
            .map(|t| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        queue.enqueue(Box::new(t * PER_THREAD + i)).unwrap();
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..THREADS)
            .map(|_| {
                let queue = queue.clone();
                let taken = taken.clone();
                thread::spawn(move || {
                    let mut seen = vec![];
                    while atomic::load(&*taken) < total {
                        match queue.dequeue() {
                            Some(item) => {
                                atomic::increment(&*taken);
                                seen.push(*item);
                            }
                            None => thread::yield_now(),
                        }
                    }
                    seen
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }

        let mut unique = HashSet::new();
        for consumer in consumers {
            for value in consumer.join().unwrap() {
                assert!(unique.insert(value), "{value} dequeued twice");
            }
        }

        assert_eq!(unique.len(), total);
        assert!(unique.iter().all(|&v| v < THREADS * PER_THREAD));
        assert_eq!(queue.count_nodes(), 0);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_stress() {
        stress(Arc::new(Queue::new()));
    }

    #[test]
    fn test_stress_pooled() {
        let pool = Arc::new(NodePool::with_config(Config::new().preallocate(64)).unwrap());
        let queue = Arc::new(Queue::with_pool(pool.clone()).unwrap());

        stress(queue.clone());

        // every node but the sentinel is idle again
        assert_eq!(pool.count_nodes() + 1, pool.allocated());
    }

    #[test]
    fn test_pool_reuse_has_no_stale_payload() {
        let pool = Arc::new(NodePool::new());
        let queue = Queue::with_pool(pool.clone()).unwrap();

        queue.enqueue(Box::new('a')).unwrap();
        assert_eq!(queue.dequeue().map(|b| *b), Some('a'));

        // the old sentinel went back to the pool and carries 'b' now
        assert_eq!(pool.count_nodes(), 1);
        queue.enqueue(Box::new('b')).unwrap();
        assert_eq!(pool.count_nodes(), 0);
        assert_eq!(pool.allocated(), 2);

        assert_eq!(queue.dequeue().map(|b| *b), Some('b'));
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_shared_pool() {
        let pool = Arc::new(NodePool::new());
        let first = Queue::with_pool(pool.clone()).unwrap();
        let second = Queue::with_pool(pool.clone()).unwrap();

        for i in 0..10 {
            first.enqueue(Box::new(i)).unwrap();
        }
        while first.dequeue().is_some() {}

        let before = pool.allocated();
        for i in 0..10 {
            second.enqueue(Box::new(i)).unwrap();
        }
        assert_eq!(pool.allocated(), before);

        drop(first);
        drop(second);
        assert_eq!(pool.count_nodes(), pool.allocated());
    }

    #[test]
    fn test_exhausted_leaves_queue_unchanged() {
        // the sentinel takes the first node
        let pool = Arc::new(NodePool::with_config(Config::new().node_limit(2)).unwrap());
        let queue = Queue::with_pool(pool).unwrap();

        queue.enqueue(Box::new(1)).unwrap();

        let rejected = queue.enqueue(Box::new(2)).unwrap_err();
        assert!(rejected.error().is_allocation_failure());
        assert_eq!(*rejected.into_inner(), 2);

        assert_eq!(queue.count_nodes(), 1);
        assert_eq!(queue.dequeue().map(|b| *b), Some(1));

        queue.enqueue(Box::new(3)).unwrap();
        assert_eq!(queue.dequeue().map(|b| *b), Some(3));
    }

    #[test]
    fn test_sentinel_needs_a_node() {
        let pool = Arc::new(NodePool::with_config(Config::new().node_limit(0)).unwrap());

        let err = Queue::<Box<u8>>::with_pool(pool).unwrap_err();
        assert_eq!(err, Error::Exhausted { limit: 0 });
    }

    #[test]
    fn test_drop_drops_items() {
        let item = Arc::new(());

        {
            let queue = Queue::new();
            for _ in 0..3 {
                queue.enqueue(item.clone()).unwrap();
            }
            queue.dequeue();
            assert_eq!(Arc::strong_count(&item), 3);
        }

        assert_eq!(Arc::strong_count(&item), 1);
    }

    #[test]
    fn test_opaque_payload() {
        let mut values = [1u32, 2, 3];
        let queue = Queue::new();

        for value in values.iter_mut() {
            queue
                .enqueue(unsafe { Opaque::new(value as *mut u32) })
                .unwrap();
        }

        let out: Vec<u32> = core::iter::from_fn(|| queue.dequeue())
            .map(|p| unsafe { *p.as_ptr() })
            .collect();
        assert_eq!(out, vec![1, 2, 3]);
    }

    proptest! {
        #[test]
        fn queue_matches_vec_deque(ops in proptest::collection::vec(proptest::option::of(any::<u16>()), 0..200)) {
            let queue = Queue::new();
            let mut model = VecDeque::new();

            for op in ops {
                match op {
                    Some(v) => {
                        queue.enqueue(Box::new(v)).unwrap();
                        model.push_back(v);
                    }
                    None => prop_assert_eq!(queue.dequeue().map(|b| *b), model.pop_front()),
                }
            }

            prop_assert_eq!(queue.count_nodes(), model.len());
            prop_assert_eq!(queue.len(), model.len());
        }
    }
}
