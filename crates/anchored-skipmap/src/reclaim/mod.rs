#![expect(unsafe_code, reason = "type-erased deferred destruction of unlinked nodes")]

mod epoch;
mod refcount;


use std::{fmt::Debug, ptr::NonNull};

use crate::options::SkipMapOptions;

pub use self::epoch::{Epoch, EpochGuard, EpochStamp};
pub use self::refcount::{RefCounted, RefStamp};


mod sealed {
    #[expect(unnameable_types, reason = "sealed trait")]
    pub trait Sealed {}
}


/// Decides when the memory of a node which has been erased from a [`SkipMap`] may be freed, and
/// how cursors keep the nodes they reference alive.
///
/// This trait is sealed. The two implementations are:
/// - [`RefCounted`]: every reference to a node is counted, and [`erase`] spin-waits until the
///   count reaches zero before freeing the node. No node outlives the last reference to it, but
///   `erase` blocks while a cursor references the erased node.
/// - [`Epoch`]: threads announce an epoch for as long as they traverse the map or hold a cursor,
///   and erased nodes are freed once no announced epoch predates their removal. `erase` never
///   blocks, but a long-lived cursor keeps every node erased after its creation in memory.
///
/// The backend is chosen once per map, through its type.
///
/// [`SkipMap`]: crate::SkipMap
/// [`erase`]: crate::SkipMap::erase
pub trait Reclaim: sealed::Sealed + Debug + Send + Sync + Sized {
    /// Bookkeeping stored in every node.
    type Stamp: Default + Debug + Send + Sync;
    /// Held for the duration of every traversal, and for the lifetime of every cursor.
    ///
    /// A clone must protect at least everything protected by the original.
    type Guard<'a>: Clone + Debug where Self: 'a;

    /// Whether a node which has been unlinked (but not yet freed) holds the nodes its frozen
    /// tower points to, with [`hold`], until it is freed.
    ///
    /// [`hold`]: Reclaim::hold
    const HOLDS_SUCCESSORS: bool;

    #[must_use]
    fn new(options: &SkipMapOptions) -> Self;

    /// Begin a traversal, or begin the lifetime of a cursor.
    #[must_use]
    fn enter(&self) -> Self::Guard<'_>;

    /// Take a reference on a node. The node must be known to not yet be freed.
    fn pin(stamp: &Self::Stamp);

    /// Release a reference taken with [`pin`].
    ///
    /// Returns `true` if the node has been retired and this was the last reference to it. The
    /// caller must then free the node.
    ///
    /// [`pin`]: Reclaim::pin
    #[must_use]
    fn unpin(stamp: &Self::Stamp) -> bool;

    /// Take a reference on a node on behalf of an unlinked predecessor whose frozen link points
    /// to it. Unlike a pin, a hold does not make [`retire`] wait; it only keeps the node from
    /// being freed.
    ///
    /// [`retire`]: Reclaim::retire
    fn hold(stamp: &Self::Stamp);

    /// Release a reference taken with [`hold`], returning `true` under the same condition as
    /// [`unpin`].
    ///
    /// [`hold`]: Reclaim::hold
    /// [`unpin`]: Reclaim::unpin
    #[must_use]
    fn release(stamp: &Self::Stamp) -> bool;

    /// Announce that a link of the stamped node is about to be read and its target pinned.
    ///
    /// The returned ticket must be passed to [`end_read`].
    ///
    /// [`end_read`]: Reclaim::end_read
    #[must_use]
    fn begin_read(stamp: &Self::Stamp) -> usize;

    /// Counterpart to [`begin_read`].
    ///
    /// [`begin_read`]: Reclaim::begin_read
    fn end_read(stamp: &Self::Stamp, ticket: usize);

    /// Wait until every read of the stamped node's links which began before this call has
    /// ended. Reads which begin afterwards are not waited for.
    ///
    /// Called after a link of the stamped node stops pointing to a node being erased. The caller
    /// must hold the stamped node's lock.
    fn await_readers(stamp: &Self::Stamp);

    /// Take responsibility for freeing an unlinked node.
    ///
    /// # Safety
    /// `retired` must refer to a node which has been marked and unlinked from every level, so that
    /// no new pins on it can be created except through predecessors which hold it. The caller
    /// must not hold any pin on it.
    unsafe fn retire(&self, retired: Retired<Self>);

    /// Free whatever retired nodes can be freed, returning how many were freed.
    fn sweep(&self) -> usize;

    /// The number of nodes which have been unlinked but not yet freed.
    #[must_use]
    fn pending(&self) -> usize;
}


/// An unlinked node, together with enough information to free it later.
pub struct Retired<R: Reclaim> {
    node:  NonNull<()>,
    stamp: NonNull<R::Stamp>,
    free:  unsafe fn(NonNull<()>),
}

// SAFETY:
// The node behind a `Retired` is unreachable from the map, so the only handle which can free it
// is this one. The map requires its keys and values to be `Send` for it to be `Sync`, so they can
// be dropped on whichever thread ends up freeing the node.
unsafe impl<R: Reclaim> Send for Retired<R> {}

impl<R: Reclaim> Retired<R> {
    /// # Safety
    /// `free(node)` must be sound to call exactly once, after every reference counted by `stamp`
    /// has been released, and `stamp` must remain valid until then.
    #[inline]
    #[must_use]
    pub(crate) const unsafe fn new(
        node:  NonNull<()>,
        stamp: NonNull<R::Stamp>,
        free:  unsafe fn(NonNull<()>),
    ) -> Self {
        Self { node, stamp, free }
    }

    /// # Safety
    /// The retired node must not have been freed yet.
    #[inline]
    #[must_use]
    pub(crate) const unsafe fn stamp(&self) -> &R::Stamp {
        // SAFETY:
        // By the contract of `Retired::new`, the stamp is valid until the node is freed, and the
        // caller asserts that has not happened.
        unsafe { self.stamp.as_ref() }
    }

    /// # Safety
    /// Every reference to the node must have been released, and nothing may access the node
    /// afterwards.
    #[inline]
    pub(crate) unsafe fn free(self) {
        // SAFETY:
        // `Retired` is not `Clone`, and `self` is consumed, so this is the single call permitted
        // by `Retired::new`. The caller asserts the pins have been released.
        unsafe { (self.free)(self.node) }
    }
}

impl<R: Reclaim> Debug for Retired<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retired")
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}
