/// Failure to obtain a node.
///
/// Every variant means the same thing to the caller: nothing was linked and
/// the structure is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("allocator returned no memory for a {size}-byte node")]
    OutOfMemory { size: usize },
    #[error("node pool exhausted its limit of {limit} nodes")]
    Exhausted { limit: usize },
}

impl Error {
    pub fn is_allocation_failure(&self) -> bool {
        matches!(self, Error::OutOfMemory { .. } | Error::Exhausted { .. })
    }
}

/// An item that could not be inserted, handed back with the reason.
#[derive(thiserror::Error)]
#[error("item rejected: {error}")]
pub struct Rejected<P> {
    item: P,
    #[source]
    error: Error,
}

impl<P> Rejected<P> {
    pub(crate) fn new(item: P, error: Error) -> Self {
        Rejected { item, error }
    }

    pub fn error(&self) -> &Error {
        &self.error
    }

    pub fn into_inner(self) -> P {
        self.item
    }
}

impl<P> core::fmt::Debug for Rejected<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}
