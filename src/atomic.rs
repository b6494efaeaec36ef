//! Atomic memory primitives.
//!
//! Every primitive comes in two flavours. The plain one is atomic and uses
//! acquire/release ordering, so a `load` observes everything that happened
//! before the `store` it reads from. The `sync_` one is sequentially
//! consistent and takes part in the single total order of all `SeqCst`
//! operations. `swap`, `cas` and the arithmetic operations are always fully
//! fenced.
//!
//! | Primitive | Ordering |
//! |-----------|----------|
//! | [`load`] | `Acquire` |
//! | [`store`] | `Release` |
//! | [`sync_load`], [`sync_store`] | `SeqCst` |
//! | [`swap`], [`cas`] | `SeqCst` |
//! | [`add`], [`sub`], [`increment`], [`decrement`] | `SeqCst` |
//!
//! The 128-bit cell comes from `portable-atomic` and is what tagged pointers
//! are swapped through.
//!
//! Widths are carried by the atomic types themselves, so reading a 64-bit
//! cell through a 32-bit primitive cannot be expressed.
//!
//! ```
//! use core::sync::atomic::AtomicI32;
//! use casq::atomic;
//!
//! let counter = AtomicI32::new(5);
//! assert_eq!(atomic::add(&counter, 3), 8);
//! assert_eq!(atomic::decrement(&counter), 7);
//! assert_eq!(atomic::swap(&counter, 1), 7);
//! assert_eq!(atomic::sync_load(&counter), 1);
//! ```

use core::sync::atomic::{
    AtomicI32, AtomicI64, AtomicIsize, AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering,
};
use portable_atomic::AtomicU128;

/// An atomic cell the primitives in this module operate on.
pub trait AtomicWord: Send + Sync {
    type Value: Copy + PartialEq;

    fn load_with(&self, order: Ordering) -> Self::Value;

    fn store_with(&self, value: Self::Value, order: Ordering);

    fn swap_with(&self, value: Self::Value, order: Ordering) -> Self::Value;

    fn compare_exchange_with(
        &self,
        current: Self::Value,
        new: Self::Value,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self::Value, Self::Value>;
}

/// An atomic integer cell, adding the arithmetic primitives.
pub trait AtomicInteger: AtomicWord {
    const ONE: Self::Value;

    /// Returns the value held *before* the addition.
    fn fetch_add_with(&self, delta: Self::Value, order: Ordering) -> Self::Value;

    /// Returns the value held *before* the subtraction.
    fn fetch_sub_with(&self, delta: Self::Value, order: Ordering) -> Self::Value;

    fn wrapping_add(a: Self::Value, b: Self::Value) -> Self::Value;

    fn wrapping_sub(a: Self::Value, b: Self::Value) -> Self::Value;
}

macro_rules! atomic_word {
    ($atomic:ty, $value:ty) => {
        impl AtomicWord for $atomic {
            type Value = $value;

            #[inline]
            fn load_with(&self, order: Ordering) -> $value {
                self.load(order)
            }

            #[inline]
            fn store_with(&self, value: $value, order: Ordering) {
                self.store(value, order)
            }

            #[inline]
            fn swap_with(&self, value: $value, order: Ordering) -> $value {
                self.swap(value, order)
            }

            #[inline]
            fn compare_exchange_with(
                &self,
                current: $value,
                new: $value,
                success: Ordering,
                failure: Ordering,
            ) -> Result<$value, $value> {
                self.compare_exchange(current, new, success, failure)
            }
        }
    };
}

macro_rules! atomic_integer {
    ($($atomic:ty => $value:ty),* $(,)?) => {
        $(
            atomic_word!($atomic, $value);

            impl AtomicInteger for $atomic {
                const ONE: $value = 1;

                #[inline]
                fn fetch_add_with(&self, delta: $value, order: Ordering) -> $value {
                    self.fetch_add(delta, order)
                }

                #[inline]
                fn fetch_sub_with(&self, delta: $value, order: Ordering) -> $value {
                    self.fetch_sub(delta, order)
                }

                #[inline]
                fn wrapping_add(a: $value, b: $value) -> $value {
                    a.wrapping_add(b)
                }

                #[inline]
                fn wrapping_sub(a: $value, b: $value) -> $value {
                    a.wrapping_sub(b)
                }
            }
        )*
    };
}

atomic_integer! {
    AtomicI32 => i32,
    AtomicU32 => u32,
    AtomicIsize => isize,
    AtomicUsize => usize,
    AtomicI64 => i64,
    AtomicU64 => u64,
    AtomicU128 => u128,
}

impl<T> AtomicWord for AtomicPtr<T> {
    type Value = *mut T;

    #[inline]
    fn load_with(&self, order: Ordering) -> *mut T {
        self.load(order)
    }

    #[inline]
    fn store_with(&self, value: *mut T, order: Ordering) {
        self.store(value, order)
    }

    #[inline]
    fn swap_with(&self, value: *mut T, order: Ordering) -> *mut T {
        self.swap(value, order)
    }

    #[inline]
    fn compare_exchange_with(
        &self,
        current: *mut T,
        new: *mut T,
        success: Ordering,
        failure: Ordering,
    ) -> Result<*mut T, *mut T> {
        self.compare_exchange(current, new, success, failure)
    }
}

#[inline]
pub fn load<A: AtomicWord>(atom: &A) -> A::Value {
    atom.load_with(Ordering::Acquire)
}

/// Sequentially consistent load. Observes every write published by a
/// [`sync_store`] to the same cell that happened before it.
#[inline]
pub fn sync_load<A: AtomicWord>(atom: &A) -> A::Value {
    atom.load_with(Ordering::SeqCst)
}

#[inline]
pub fn store<A: AtomicWord>(atom: &A, value: A::Value) {
    atom.store_with(value, Ordering::Release)
}

/// Sequentially consistent store. Publishes all of the calling thread's
/// prior writes to any thread that later performs a [`sync_load`] of `atom`.
#[inline]
pub fn sync_store<A: AtomicWord>(atom: &A, value: A::Value) {
    atom.store_with(value, Ordering::SeqCst)
}

/// Exchanges the content of `atom` for `value` and returns the previous one.
#[inline]
pub fn swap<A: AtomicWord>(atom: &A, value: A::Value) -> A::Value {
    atom.swap_with(value, Ordering::SeqCst)
}

/// Replaces `current` by `new`. On failure the value actually held is
/// returned in `Err`.
#[inline]
pub fn cas<A: AtomicWord>(atom: &A, current: A::Value, new: A::Value) -> Result<A::Value, A::Value> {
    atom.compare_exchange_with(current, new, Ordering::SeqCst, Ordering::SeqCst)
}

/// Adds `delta` to `atom`, wrapping on overflow, and returns the **new** value.
#[inline]
pub fn add<A: AtomicInteger>(atom: &A, delta: A::Value) -> A::Value {
    A::wrapping_add(atom.fetch_add_with(delta, Ordering::SeqCst), delta)
}

/// Subtracts `delta` from `atom`, wrapping on overflow, and returns the **new** value.
#[inline]
pub fn sub<A: AtomicInteger>(atom: &A, delta: A::Value) -> A::Value {
    A::wrapping_sub(atom.fetch_sub_with(delta, Ordering::SeqCst), delta)
}

#[inline]
pub fn increment<A: AtomicInteger>(atom: &A) -> A::Value {
    add(atom, A::ONE)
}

#[inline]
pub fn decrement<A: AtomicInteger>(atom: &A) -> A::Value {
    sub(atom, A::ONE)
}
