use crate::base::RawStack;
use crate::node::{self, Node, NODE_FAMILY};
use crate::{atomic, Error};
use alloc::sync::Arc;
use core::ptr::NonNull;
use core::sync::atomic::AtomicUsize;

/// Settings for a [`NodePool`].
///
/// ```
/// use casq::{Config, NodePool};
///
/// let pool = NodePool::with_config(Config::new().preallocate(8).node_limit(64)).unwrap();
/// assert_eq!(pool.count_nodes(), 8);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    preallocate: usize,
    node_limit: Option<usize>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes allocated when the pool is created.
    pub fn preallocate(mut self, nodes: usize) -> Self {
        self.preallocate = nodes;
        self
    }

    /// Upper bound on the nodes the pool will ever allocate. Once reached, a
    /// request that finds no idle node fails with [`Error::Exhausted`].
    pub fn node_limit(mut self, nodes: usize) -> Self {
        self.node_limit = Some(nodes);
        self
    }
}

/// A freelist of nodes shared by any number of stacks and queues.
///
/// Spent nodes are pushed here instead of being freed and handed out again
/// to later insertions. Nodes are only freed when the pool itself is
/// dropped, which cannot happen while a structure holding the pool's `Arc`
/// is alive.
pub struct NodePool {
    free: RawStack,
    allocated: AtomicUsize,
    limit: Option<usize>,
}

unsafe impl Send for NodePool {}
unsafe impl Sync for NodePool {}

impl NodePool {
    pub fn new() -> Self {
        NodePool {
            free: RawStack::new(),
            allocated: AtomicUsize::new(0),
            limit: None,
        }
    }

    pub fn with_config(config: Config) -> Result<Self, Error> {
        let pool = NodePool {
            free: RawStack::new(),
            allocated: AtomicUsize::new(0),
            limit: config.node_limit,
        };

        for _ in 0..config.preallocate {
            let node = pool.fresh()?;
            pool.free.push(node);
        }

        tracing::debug!(
            preallocated = config.preallocate,
            limit = ?config.node_limit,
            "node pool created"
        );

        Ok(pool)
    }

    /// Nodes allocated by this pool that are still alive, idle or not.
    pub fn allocated(&self) -> usize {
        atomic::load(&self.allocated)
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Counts idle nodes. Not meant to be used while the pool is in use.
    pub fn count_nodes(&self) -> usize {
        self.free.count_nodes()
    }

    pub(crate) fn acquire(&self) -> Result<NonNull<Node>, Error> {
        if let Some(node) = self.free.pop() {
            return Ok(node);
        }

        tracing::trace!(allocated = self.allocated(), "node pool miss");
        self.fresh()
    }

    fn fresh(&self) -> Result<NonNull<Node>, Error> {
        let count = atomic::increment(&self.allocated);

        if let Some(limit) = self.limit {
            if count > limit {
                atomic::decrement(&self.allocated);
                tracing::warn!(limit, "node pool exhausted");
                return Err(Error::Exhausted { limit });
            }
        }

        Node::alloc().map_err(|e| {
            atomic::decrement(&self.allocated);
            e
        })
    }

    /// Takes back a spent node. Its payload must already have been moved
    /// out; whatever is left in the slot is discarded, not dropped.
    pub(crate) fn recycle(&self, node: NonNull<Node>) {
        unsafe { node.as_ref() }.take();
        self.free.push(node);
    }
}

impl Default for NodePool {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for NodePool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NodePool")
            .field("allocated", &self.allocated())
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl Drop for NodePool {
    fn drop(&mut self) {
        let mut curr = self.free.take_all();
        let mut freed = 0usize;

        unsafe {
            while let Some(node) = NonNull::new(curr) {
                curr = node.as_ref().next.load_ptr();
                Node::dealloc(node.as_ptr());
                freed += 1;
            }
        }

        tracing::debug!(freed, allocated = self.allocated(), "node pool released");
    }
}

/// What happens to nodes a structure no longer needs.
pub(crate) enum Recycle {
    /// Fresh allocations; spent nodes go through hazard pointer reclamation.
    Free,
    Pool(Arc<NodePool>),
}

impl Recycle {
    pub(crate) fn pool(&self) -> Option<&Arc<NodePool>> {
        match self {
            Recycle::Free => None,
            Recycle::Pool(pool) => Some(pool),
        }
    }

    pub(crate) fn acquire(&self) -> Result<NonNull<Node>, Error> {
        match self {
            Recycle::Free => Node::alloc(),
            Recycle::Pool(pool) => pool.acquire(),
        }
    }

    /// Disposes of a node just unlinked by a successful CAS. Other threads
    /// may still be reading it.
    ///
    /// # Safety
    ///
    /// `node` must be unlinked and owned by the caller.
    pub(crate) unsafe fn retire(&self, node: NonNull<Node>) {
        match self {
            Recycle::Free => node::retire(node),
            Recycle::Pool(pool) => pool.recycle(node),
        }
    }

    /// Disposes of a node during teardown, when no other thread can reach it.
    ///
    /// # Safety
    ///
    /// `node` must be owned by the caller and unreachable by other threads.
    pub(crate) unsafe fn dispose(&self, node: NonNull<Node>) {
        match self {
            Recycle::Free => Node::dealloc(node.as_ptr()),
            Recycle::Pool(pool) => pool.recycle(node),
        }
    }

    /// Gives retired nodes a chance to be freed.
    pub(crate) fn flush(&self) {
        if let Recycle::Free = self {
            NODE_FAMILY.eager_reclaim();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    #[test]
    fn test_preallocate() {
        let pool = NodePool::with_config(Config::new().preallocate(4)).unwrap();

        assert_eq!(pool.count_nodes(), 4);
        assert_eq!(pool.allocated(), 4);

        let node = pool.acquire().unwrap();
        assert_eq!(pool.count_nodes(), 3);
        assert_eq!(pool.allocated(), 4);

        pool.recycle(node);
        assert_eq!(pool.count_nodes(), 4);
    }

    #[test]
    fn test_limit() {
        let pool = NodePool::with_config(Config::new().node_limit(2)).unwrap();

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.acquire().unwrap_err(), Error::Exhausted { limit: 2 });
        assert_eq!(pool.allocated(), 2);

        pool.recycle(a);
        let c = pool.acquire().unwrap();
        assert_eq!(c, a);

        pool.recycle(b);
        pool.recycle(c);
    }

    #[test]
    fn test_preallocate_beyond_limit_fails() {
        let result = NodePool::with_config(Config::new().preallocate(3).node_limit(2));

        assert_eq!(result.unwrap_err(), Error::Exhausted { limit: 2 });
    }

    #[test]
    fn test_recycle_clears_payload() {
        let pool = NodePool::new();
        let node = pool.acquire().unwrap();

        let mut value = 9u64;
        unsafe { node.as_ref() }.put((&mut value as *mut u64).cast());
        pool.recycle(node);

        let again = pool.acquire().unwrap();
        assert_eq!(again, node);
        assert!(unsafe { again.as_ref() }.peek().is_null());
        pool.recycle(again);
    }

    #[test]
    fn test_concurrent_acquire_recycle() {
        let pool = Arc::new(NodePool::with_config(Config::new().preallocate(16)).unwrap());

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        let node = pool.acquire().unwrap();
                        pool.recycle(node);
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(pool.count_nodes(), pool.allocated());
        assert!(pool.allocated() <= 16 + 8);
    }
}
