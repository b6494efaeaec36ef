use crate::tagged::{MaybeTagged, Tagged};
use crate::{atomic, Error};
use alloc::alloc::{alloc, dealloc};
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::alloc::Layout;
use core::ptr::{null_mut, NonNull};
use core::sync::atomic::AtomicPtr;
use haphazard::{Domain, HazardPointer, Singleton};

/// A pointer-like payload that can be parked in a node as a raw word.
///
/// # Safety
///
/// `from_raw(into_raw(p))` must give back `p`, and `into_raw` must transfer
/// whatever `p` owns to the raw word.
pub unsafe trait Pointer: Sized {
    fn into_raw(self) -> *mut ();

    /// # Safety
    ///
    /// `raw` must come from [`Pointer::into_raw`] on the same type and be
    /// consumed at most once.
    unsafe fn from_raw(raw: *mut ()) -> Self;
}

unsafe impl<T> Pointer for Box<T> {
    fn into_raw(self) -> *mut () {
        Box::into_raw(self).cast()
    }

    unsafe fn from_raw(raw: *mut ()) -> Self {
        Box::from_raw(raw.cast())
    }
}

unsafe impl<T> Pointer for Arc<T> {
    fn into_raw(self) -> *mut () {
        Arc::into_raw(self).cast_mut().cast()
    }

    unsafe fn from_raw(raw: *mut ()) -> Self {
        Arc::from_raw(raw.cast_const().cast())
    }
}

/// A raw pointer payload.
///
/// Structures holding `Opaque` pointers never read, retain or free the
/// pointee: its lifetime is entirely up to the caller.
#[repr(transparent)]
pub struct Opaque<T>(*mut T);

unsafe impl<T> Send for Opaque<T> {}

impl<T> Opaque<T> {
    /// # Safety
    ///
    /// Whoever dequeues the pointer on another thread may dereference it, so
    /// the pointee must be valid to share across threads for as long as the
    /// pointer is in flight.
    pub unsafe fn new(ptr: *mut T) -> Self {
        Opaque(ptr)
    }

    pub fn as_ptr(&self) -> *mut T {
        self.0
    }
}

impl<T> Clone for Opaque<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Opaque<T> {}

impl<T> PartialEq for Opaque<T> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.0, other.0)
    }
}

impl<T> Eq for Opaque<T> {}

impl<T> core::fmt::Debug for Opaque<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Opaque").field(&self.0).finish()
    }
}

unsafe impl<T> Pointer for Opaque<T> {
    fn into_raw(self) -> *mut () {
        self.0.cast()
    }

    unsafe fn from_raw(raw: *mut ()) -> Self {
        Opaque(raw.cast())
    }
}

/// A link in a stack, a queue or a pool.
///
/// Nodes only ever hold atomics, so any thread may read a node it has a
/// (possibly stale) pointer to as long as the memory is still allocated.
#[repr(C)]
pub(crate) struct Node {
    pub(crate) next: MaybeTagged<Node>,
    elem: AtomicPtr<()>,
}

unsafe impl Send for Node {}
unsafe impl Sync for Node {}

impl Node {
    pub(crate) fn alloc() -> Result<NonNull<Self>, Error> {
        let layout = Layout::new::<Self>();

        let Some(node) = NonNull::new(unsafe { alloc(layout) }.cast::<Self>()) else {
            tracing::warn!(size = layout.size(), "node allocation failed");
            return Err(Error::OutOfMemory {
                size: layout.size(),
            });
        };

        unsafe {
            core::ptr::write(
                node.as_ptr(),
                Node {
                    next: MaybeTagged::new(null_mut()),
                    elem: AtomicPtr::new(null_mut()),
                },
            );
        }

        Ok(node)
    }

    /// # Safety
    ///
    /// `node` must come from [`Node::alloc`] and be unreachable by every
    /// other thread.
    pub(crate) unsafe fn dealloc(node: *mut Self) {
        dealloc(node.cast(), Layout::new::<Self>());
    }

    pub(crate) fn put(&self, raw: *mut ()) {
        atomic::store(&self.elem, raw)
    }

    /// Reads the payload without claiming it.
    pub(crate) fn peek(&self) -> *mut () {
        atomic::load(&self.elem)
    }

    /// Claims the payload and clears the slot.
    pub(crate) fn take(&self) -> *mut () {
        atomic::swap(&self.elem, null_mut())
    }
}

pub(crate) struct Family;

unsafe impl Singleton for Family {}

pub(crate) static NODE_FAMILY: Domain<Family> = Domain::new(&Family);

pub(crate) fn hazard() -> HazardPointer<'static, Family> {
    HazardPointer::new_in_domain(&NODE_FAMILY)
}

/// Loads `src` and protects what it points at, retrying until the protected
/// pointer is confirmed to still be current.
pub(crate) fn protect(
    hazard: &mut HazardPointer<'static, Family>,
    src: &MaybeTagged<Node>,
) -> Tagged<Node> {
    let mut seen = src.load();

    loop {
        hazard.protect_raw(seen.ptr());

        let now = src.load();
        if now == seen {
            return seen;
        }
        seen = now;
    }
}

/// Hands `node` to the hazard pointer domain, which frees it once no thread
/// protects it any more.
///
/// # Safety
///
/// `node` must be unlinked from every structure and retired only once.
pub(crate) unsafe fn retire(node: NonNull<Node>) {
    NODE_FAMILY.retire_ptr::<_, Spent>(node.as_ptr());
}

#[repr(transparent)]
struct Spent(NonNull<Node>);

impl Drop for Spent {
    fn drop(&mut self) {
        unsafe {
            Node::dealloc(self.0.as_ptr());
        }
    }
}

impl core::ops::Deref for Spent {
    type Target = Node;
    fn deref(&self) -> &Self::Target {
        unsafe { self.0.as_ref() }
    }
}

unsafe impl haphazard::raw::Pointer<Node> for Spent {
    fn into_raw(self) -> *mut Node {
        let ptr = self.0.as_ptr();
        core::mem::forget(self);
        ptr
    }

    unsafe fn from_raw(ptr: *mut Node) -> Self {
        Self(NonNull::new_unchecked(ptr))
    }
}
