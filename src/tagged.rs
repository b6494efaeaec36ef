use crate::atomic;
use core::marker::PhantomData;
use core::sync::atomic::Ordering;
use portable_atomic::AtomicU128;

/// A `(pointer, generation)` pair.
///
/// The pair is kept side by side in a single `u128`, the full address in the
/// low half and a 64-bit generation in the high half, so that it can be
/// compared and swapped as one unit without borrowing any address bits.
pub(crate) struct Tagged<T> {
    ptr: *mut T,
    tag: u64,
}

impl<T> Tagged<T> {
    pub(crate) fn new(ptr: *mut T, tag: u64) -> Self {
        Tagged { ptr, tag }
    }

    pub(crate) fn ptr(&self) -> *mut T {
        self.ptr
    }

    pub(crate) fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// The successor of `self` pointing at `ptr`.
    pub(crate) fn with_ptr(&self, ptr: *mut T) -> Self {
        Self::new(ptr, self.tag.wrapping_add(1))
    }

    fn pack(self) -> u128 {
        ((self.tag as u128) << 64) | (self.ptr as usize as u64 as u128)
    }

    fn unpack(word: u128) -> Self {
        Tagged {
            ptr: word as u64 as usize as *mut T,
            tag: (word >> 64) as u64,
        }
    }
}

impl<T> Clone for Tagged<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Tagged<T> {}

impl<T> PartialEq for Tagged<T> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.ptr, other.ptr) && self.tag == other.tag
    }
}

impl<T> Eq for Tagged<T> {}

impl<T> core::fmt::Debug for Tagged<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tagged")
            .field("ptr", &self.ptr)
            .field("tag", &self.tag)
            .finish()
    }
}

/// An atomic cell holding a [`Tagged`] pointer.
pub(crate) struct MaybeTagged<T> {
    word: AtomicU128,
    _marker: PhantomData<*mut T>,
}

impl<T> MaybeTagged<T> {
    pub(crate) fn new(ptr: *mut T) -> Self {
        MaybeTagged {
            word: AtomicU128::new(Tagged::new(ptr, 0).pack()),
            _marker: PhantomData,
        }
    }

    pub(crate) fn load(&self) -> Tagged<T> {
        Tagged::unpack(atomic::load(&self.word))
    }

    pub(crate) fn load_ptr(&self) -> *mut T {
        self.load().ptr()
    }

    pub(crate) fn store(&self, value: Tagged<T>) {
        atomic::store(&self.word, value.pack())
    }

    /// Points the cell at `ptr`, advancing its generation.
    ///
    /// Only the thread owning the cell may call this: the read and the write
    /// are two separate atomic steps.
    pub(crate) fn store_ptr(&self, ptr: *mut T) {
        let current = self.load();
        self.store(current.with_ptr(ptr));
    }

    pub(crate) fn compare_exchange(
        &self,
        current: Tagged<T>,
        new: Tagged<T>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Tagged<T>, Tagged<T>> {
        self.word
            .compare_exchange(current.pack(), new.pack(), success, failure)
            .map(Tagged::unpack)
            .map_err(Tagged::unpack)
    }
}

impl<T> core::fmt::Debug for MaybeTagged<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(&self.load(), f)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use core::ptr::null_mut;

    struct Slot(u8);

    #[test]
    fn test_pack_unpack() {
        let mut value = Slot(3);
        let ptr = &mut value as *mut Slot;

        let tagged = Tagged::new(ptr, 41);
        let back = Tagged::<Slot>::unpack(tagged.pack());

        assert_eq!(back, tagged);
        assert_eq!(back.tag, 41);
        assert!(core::ptr::eq(back.ptr(), ptr));
    }

    #[test]
    fn test_generation_keeps_all_bits() {
        let past_short_tags = Tagged::<Slot>::new(null_mut(), (1 << 20) - 1).with_ptr(null_mut());
        assert_eq!(Tagged::<Slot>::unpack(past_short_tags.pack()).tag, 1 << 20);

        let high = Tagged::<Slot>::new(null_mut(), u64::MAX - 1);
        assert_eq!(Tagged::<Slot>::unpack(high.pack()).tag, u64::MAX - 1);
        assert_eq!(high.with_ptr(null_mut()).with_ptr(null_mut()).tag, 0);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_high_address_bits_survive() {
        // top-byte tagged heaps and 57-bit address spaces
        for addr in [0xff00_0000_1234_5670usize, 0x01ff_ffff_ffff_fff0, 8] {
            let tagged = Tagged::new(addr as *mut Slot, 7);
            let back = Tagged::<Slot>::unpack(tagged.pack());

            assert_eq!(back.ptr() as usize, addr);
            assert_eq!(back.tag, 7);
        }
    }

    #[test]
    fn test_compare_exchange_checks_tag() {
        let mut a = Slot(1);
        let mut b = Slot(2);
        let cell = MaybeTagged::new(&mut a as *mut Slot);

        let seen = cell.load();
        cell.store_ptr(&mut a as *mut Slot);

        // same address, newer generation
        let stale = cell.compare_exchange(
            seen,
            seen.with_ptr(&mut b as *mut Slot),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        assert!(stale.is_err());

        let fresh = cell.load();
        assert_eq!(fresh.tag, seen.tag + 1);
        assert!(cell
            .compare_exchange(
                fresh,
                fresh.with_ptr(&mut b as *mut Slot),
                Ordering::AcqRel,
                Ordering::Acquire
            )
            .is_ok());
        assert!(core::ptr::eq(cell.load_ptr(), &b));
    }
}
