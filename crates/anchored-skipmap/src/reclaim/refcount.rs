#![expect(unsafe_code, reason = "free retired nodes once they are no longer referenced")]

use std::sync::atomic::Ordering;

use tracing::Level as LogLevel;

use crate::{
    maybe_loom::{AtomicU64, AtomicUsize, Backoff},
    options::SkipMapOptions,
};
use super::{sealed::Sealed, Reclaim, Retired};


/// One pin, counted in the low 32 bits of [`RefStamp::state`].
const PIN: u64 = 1;
const PINS_MASK: u64 = HOLD - 1;
/// One hold, counted in bits `32..63` of [`RefStamp::state`].
const HOLD: u64 = 1 << 32;
/// Set once the node has been retired.
const RETIRED: u64 = 1 << 63;


/// The per-node bookkeeping of [`RefCounted`].
#[derive(Debug, Default)]
pub struct RefStamp {
    /// Pins from cursors and in-progress traversals, holds from unlinked predecessors (and from
    /// the eraser while it waits), and the [`RETIRED`] flag.
    ///
    /// Once the node is retired and no pins or holds remain, nothing can reach the node again,
    /// so exactly one thread observes the state becoming [`RETIRED`] and frees the node.
    state:      AtomicU64,
    /// Threads which are reading one of the node's links and have not yet pinned its target,
    /// split by the parity of the `read_phase` they began in.
    readers:    [AtomicUsize; 2],
    read_phase: AtomicUsize,
}

impl RefStamp {
    #[inline]
    fn readers_in(&self, phase: usize) -> &AtomicUsize {
        let [even, odd] = &self.readers;
        if phase % 2 == 0 { even } else { odd }
    }

    #[inline]
    fn pins(&self) -> u64 {
        self.state.load(Ordering::SeqCst) & PINS_MASK
    }
}

/// The blocking reclamation backend.
///
/// Every reference to a node is counted. Erasing a key unlinks its node, and then spins (with
/// exponential back-off) until no cursor references the node, at which point the node is freed
/// before [`erase`] returns.
///
/// An unlinked node which is still referenced keeps its successors at the time of unlinking
/// alive, so that a cursor on it can move forwards. Those successors may be erased in the
/// meantime without waiting; such a node is freed as soon as the node holding it is freed.
///
/// Unlinking a node waits for threads already reading the predecessor's links, but not for
/// threads which start reading afterwards, so continuous traversals do not starve erasers.
///
/// # Deadlocks
/// A thread which erases a key while it holds a cursor on that key will wait forever.
///
/// [`erase`]: crate::SkipMap::erase
#[derive(Debug, Default)]
pub struct RefCounted {
    /// The number of nodes whose erasers are waiting for them to be unpinned.
    waiting: AtomicUsize,
}

impl Sealed for RefCounted {}

impl Reclaim for RefCounted {
    type Stamp = RefStamp;
    type Guard<'a> = () where Self: 'a;

    const HOLDS_SUCCESSORS: bool = true;

    #[inline]
    fn new(_options: &SkipMapOptions) -> Self {
        Self::default()
    }

    #[inline]
    fn enter(&self) -> Self::Guard<'_> {}

    #[inline]
    fn pin(stamp: &Self::Stamp) {
        stamp.state.fetch_add(PIN, Ordering::SeqCst);
    }

    #[inline]
    fn unpin(stamp: &Self::Stamp) -> bool {
        let previous = stamp.state.fetch_sub(PIN, Ordering::SeqCst);
        debug_assert_ne!(previous & PINS_MASK, 0, "a node was unpinned more often than pinned");
        previous - PIN == RETIRED
    }

    #[inline]
    fn hold(stamp: &Self::Stamp) {
        stamp.state.fetch_add(HOLD, Ordering::SeqCst);
    }

    #[inline]
    fn release(stamp: &Self::Stamp) -> bool {
        let previous = stamp.state.fetch_sub(HOLD, Ordering::SeqCst);
        debug_assert_ne!(previous & !RETIRED & !PINS_MASK, 0, "a node was released too often");
        previous - HOLD == RETIRED
    }

    fn begin_read(stamp: &Self::Stamp) -> usize {
        loop {
            let phase = stamp.read_phase.load(Ordering::SeqCst);
            let readers = stamp.readers_in(phase);
            readers.fetch_add(1, Ordering::SeqCst);

            if stamp.read_phase.load(Ordering::SeqCst) == phase {
                return phase;
            }
            // `await_readers` started in between, and may have missed this reader.
            readers.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[inline]
    fn end_read(stamp: &Self::Stamp, ticket: usize) {
        stamp.readers_in(ticket).fetch_sub(1, Ordering::SeqCst);
    }

    fn await_readers(stamp: &Self::Stamp) {
        // Callers hold the node's lock, so the previous phase has already drained.
        let phase = stamp.read_phase.fetch_add(1, Ordering::SeqCst);

        let backoff = Backoff::new();
        while stamp.readers_in(phase).load(Ordering::SeqCst) != 0 {
            backoff.snooze();
        }
    }

    unsafe fn retire(&self, retired: Retired<Self>) {
        let last_reference = {
            // SAFETY:
            // The hold taken here keeps every other thread from freeing the node until it is
            // released, and the node has not been freed before that.
            let stamp = unsafe { retired.stamp() };
            stamp.state.fetch_add(RETIRED + HOLD, Ordering::SeqCst);

            let initial_pins = stamp.pins();
            if initial_pins != 0 {
                self.waiting.fetch_add(1, Ordering::SeqCst);
                tracing::event!(
                    LogLevel::TRACE,
                    pins = initial_pins,
                    "erase is waiting for references to the erased node to be released",
                );

                let backoff = Backoff::new();
                while stamp.pins() != 0 {
                    backoff.snooze();
                }
                self.waiting.fetch_sub(1, Ordering::SeqCst);
            }

            stamp.state.fetch_sub(HOLD, Ordering::SeqCst) - HOLD == RETIRED
        };

        if last_reference {
            // SAFETY:
            // The node was retired with no pins or holds left, so nothing references it.
            unsafe { retired.free() };
        } else {
            // An unlinked predecessor still holds the node. Whoever releases the last
            // reference frees it.
            tracing::event!(LogLevel::TRACE, "erased node is freed with its unlinked predecessor");
        }
    }

    /// Nodes are freed as soon as their last reference is released, so there is never
    /// anything to sweep.
    #[inline]
    fn sweep(&self) -> usize {
        0
    }

    #[inline]
    fn pending(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}


#[cfg(all(test, not(skipmap_loom)))]
mod tests {
    use std::{ptr::NonNull, thread, time::Duration};
    use std::sync::{Arc, atomic::AtomicBool};

    use super::*;


    struct Tracked {
        stamp: RefStamp,
        freed: Arc<AtomicBool>,
    }

    unsafe fn free_tracked(node: NonNull<()>) {
        // SAFETY:
        // Only used with pointers from `Box::into_raw` of a `Tracked`, once each.
        let node = unsafe { Box::from_raw(node.cast::<Tracked>().as_ptr()) };
        node.freed.store(true, Ordering::SeqCst);
    }

    fn tracked() -> (NonNull<Tracked>, Arc<AtomicBool>) {
        let freed = Arc::new(AtomicBool::new(false));
        let node = Box::new(Tracked { stamp: RefStamp::default(), freed: Arc::clone(&freed) });
        (NonNull::from(Box::leak(node)), freed)
    }

    fn retired(node: NonNull<Tracked>) -> Retired<RefCounted> {
        // SAFETY:
        // The node came from `tracked`, so `free_tracked` may free it, and the stamp lives as
        // long as the node.
        unsafe {
            Retired::new(
                node.cast(),
                NonNull::from(&node.as_ref().stamp),
                free_tracked,
            )
        }
    }

    #[test]
    fn unpinned_node_is_freed_immediately() {
        let backend = RefCounted::default();
        let (node, freed) = tracked();

        // SAFETY: nothing else references the node.
        unsafe { backend.retire(retired(node)) };

        assert!(freed.load(Ordering::SeqCst));
        assert_eq!(backend.pending(), 0);
        assert_eq!(backend.sweep(), 0);
    }

    #[test]
    fn retire_waits_for_pins() {
        let backend = RefCounted::default();
        let (node, freed) = tracked();
        // SAFETY: the node is live until it is retired below.
        let stamp = unsafe { &node.as_ref().stamp };

        RefCounted::pin(stamp);
        RefCounted::pin(stamp);

        thread::scope(|scope| {
            let backend = &backend;
            let freed = &freed;
            scope.spawn(move || {
                thread::sleep(Duration::from_millis(50));
                assert!(!freed.load(Ordering::SeqCst));
                assert_eq!(backend.pending(), 1);
                assert!(!RefCounted::unpin(stamp));
                thread::sleep(Duration::from_millis(20));
                assert!(!freed.load(Ordering::SeqCst));
                // The eraser still holds the node, and frees it itself.
                assert!(!RefCounted::unpin(stamp));
            });

            // SAFETY: the pins are only released by the other thread.
            unsafe { backend.retire(retired(node)) };
            assert!(freed.load(Ordering::SeqCst));
        });

        assert_eq!(backend.pending(), 0);
    }

    #[test]
    fn held_node_is_freed_on_release() {
        let backend = RefCounted::default();
        let (node, freed) = tracked();
        // SAFETY: the node is live until its hold is released below.
        let stamp = unsafe { &node.as_ref().stamp };

        RefCounted::hold(stamp);

        // SAFETY: nothing pins the node.
        unsafe { backend.retire(retired(node)) };
        assert!(!freed.load(Ordering::SeqCst), "the hold defers the free");
        assert_eq!(backend.pending(), 0, "holds do not make erase wait");

        // A cursor reaching the node through its holder pins it again.
        RefCounted::pin(stamp);
        assert!(!RefCounted::release(stamp));
        assert!(RefCounted::unpin(stamp));

        // SAFETY: `unpin` reported the last reference to a retired node.
        unsafe { free_tracked(node.cast()) };
        assert!(freed.load(Ordering::SeqCst));
    }

    #[test]
    fn unretired_node_is_never_reported_free() {
        let stamp = RefStamp::default();

        RefCounted::pin(&stamp);
        RefCounted::hold(&stamp);
        assert!(!RefCounted::unpin(&stamp));
        assert!(!RefCounted::release(&stamp));
        assert_eq!(stamp.state.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn readers_are_awaited() {
        let stamp = RefStamp::default();

        RefCounted::await_readers(&stamp);

        let ticket = RefCounted::begin_read(&stamp);
        thread::scope(|scope| {
            let stamp = &stamp;
            scope.spawn(move || {
                thread::sleep(Duration::from_millis(20));
                RefCounted::end_read(stamp, ticket);
            });
            RefCounted::await_readers(stamp);
        });

        assert_eq!(stamp.readers_in(0).load(Ordering::SeqCst), 0);
        assert_eq!(stamp.readers_in(1).load(Ordering::SeqCst), 0);
    }

    #[test]
    fn later_readers_are_not_awaited() {
        let stamp = RefStamp::default();
        let awaited = AtomicBool::new(false);

        let early = RefCounted::begin_read(&stamp);
        thread::scope(|scope| {
            scope.spawn(|| {
                RefCounted::await_readers(&stamp);
                awaited.store(true, Ordering::SeqCst);
            });

            while stamp.read_phase.load(Ordering::SeqCst) == 0 {
                thread::yield_now();
            }

            // Began after the wait did, so the wait ends without it.
            let late = RefCounted::begin_read(&stamp);
            assert!(!awaited.load(Ordering::SeqCst));

            RefCounted::end_read(&stamp, early);
            while !awaited.load(Ordering::SeqCst) {
                thread::yield_now();
            }

            RefCounted::end_read(&stamp, late);
        });
    }
}
