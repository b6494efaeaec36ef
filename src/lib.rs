//! Lock-free stacks and queues built on compare-and-swap.
//!
//! [`Stack`] is Treiber's stack and [`Queue`] is the Michael–Scott queue.
//! Both link intrusive nodes through tagged pointers, protect the nodes they
//! dereference with hazard pointers, and either free spent nodes or hand them
//! to a shared [`NodePool`]. [`RefQueue`] and [`RefStack`] add retain/release
//! bookkeeping for reference-counted items, and [`atomic`] exposes the
//! primitives everything is built from.
//!
//! ```
//! use std::sync::Arc;
//! use casq::{NodePool, Queue};
//!
//! let pool = Arc::new(NodePool::new());
//! let queue = Queue::with_pool(pool.clone()).unwrap();
//!
//! queue.enqueue(Box::new(1)).unwrap();
//! assert_eq!(queue.dequeue().map(|b| *b), Some(1));
//!
//! // the spent sentinel is waiting in the pool
//! assert_eq!(pool.count_nodes(), 1);
//! ```

pub mod atomic;
mod base;
mod error;
mod node;
mod pool;
mod queue;
mod reference;
mod tagged;

pub use base::Stack;
pub use error::{Error, Rejected};
pub use node::{Opaque, Pointer};
pub use pool::{Config, NodePool};
pub use queue::Queue;
pub use reference::{RefCount, RefQueue, RefStack};

extern crate alloc;

#[cfg(feature = "arbitrary")]
#[derive(Clone, Debug)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum Operation<T> {
    Push { item: T },
    Pop,
    PopPush,
    Enqueue { item: T },
    Dequeue,
    DequeueEnqueue,
}
