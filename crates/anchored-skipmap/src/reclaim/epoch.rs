#![expect(unsafe_code, reason = "lock-free list of announcement slots, and deferred frees")]

use std::{mem, ptr};
use std::{fmt::{Debug, Formatter, Result as FmtResult}, sync::atomic::Ordering};

use crossbeam_utils::CachePadded;
use tracing::Level as LogLevel;

use crate::{
    maybe_loom::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Mutex, MutexGuard},
    options::SkipMapOptions,
};
use super::{sealed::Sealed, Reclaim, Retired};


/// The announcement of a slot which is not protecting anything.
const INACTIVE: u64 = u64::MAX;


/// The per-node bookkeeping of [`Epoch`].
#[derive(Debug, Default)]
pub struct EpochStamp {
    /// The global epoch at the time the node was retired, or `0` if it is still in the map.
    /// Checked against the retired list's tag before the node is freed.
    retired_at: AtomicU64,
}

/// A place for one guard, and its clones, to announce the epoch at which it began.
///
/// Slots are never freed before the [`Epoch`] which owns them, and are reused by later guards.
#[derive(Debug)]
struct Slot {
    epoch:   CachePadded<AtomicU64>,
    in_use:  AtomicBool,
    /// The number of guards sharing this slot. Only meaningful while `in_use` is set.
    holders: AtomicUsize,
    /// Set once, before the slot is published.
    next:   AtomicPtr<Slot>,
}

#[derive(Debug)]
struct RetiredNode {
    epoch: u64,
    node:  Retired<Epoch>,
}

/// The lazy, epoch-based reclamation backend.
///
/// Each traversal, and each cursor, holds an [`EpochGuard`] which announces the global epoch at
/// the time it was created. Erasing a key unlinks its node and retires it, tagged with the
/// current global epoch (which is then advanced); [`erase`] never waits. A retired node is freed
/// by a sweep once every active guard announces a later epoch than the node's tag.
///
/// Sweeps happen once enough nodes have been retired (see
/// [`SkipMapOptions::sweep_threshold`]), whenever a guard is dropped while retired nodes are
/// pending, and on request through [`SkipMap::reclaim`].
///
/// A guard which lives for a long time (for example, a cursor which is never dropped) prevents
/// every node retired during its lifetime from being freed.
///
/// [`erase`]: crate::SkipMap::erase
/// [`SkipMap::reclaim`]: crate::SkipMap::reclaim
pub struct Epoch {
    global:          CachePadded<AtomicU64>,
    /// Head of an append-only list of slots.
    slots:           AtomicPtr<Slot>,
    retired:         Mutex<Vec<RetiredNode>>,
    pending:         AtomicUsize,
    sweep_threshold: usize,
}

impl Epoch {
    #[must_use]
    fn with_threshold(sweep_threshold: usize) -> Self {
        Self {
            global:          CachePadded::new(AtomicU64::new(1)),
            slots:           AtomicPtr::new(ptr::null_mut()),
            retired:         Mutex::new(Vec::new()),
            pending:         AtomicUsize::new(0),
            sweep_threshold: sweep_threshold.max(1),
        }
    }

    /// Claim an unused slot, or publish a new one.
    fn acquire_slot(&self) -> &Slot {
        let mut current = self.slots.load(Ordering::Acquire);

        // SAFETY:
        // Slots are only published by this function, from `Box::into_raw`, and are only freed
        // when `self` is dropped.
        while let Some(slot) = unsafe { current.as_ref() } {
            if slot.in_use
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                slot.holders.store(1, Ordering::Relaxed);
                return slot;
            }
            current = slot.next.load(Ordering::Acquire);
        }

        let new_slot = Box::into_raw(Box::new(Slot {
            epoch:   CachePadded::new(AtomicU64::new(INACTIVE)),
            in_use:  AtomicBool::new(true),
            holders: AtomicUsize::new(1),
            next:    AtomicPtr::new(ptr::null_mut()),
        }));

        let mut head = self.slots.load(Ordering::Acquire);
        loop {
            // SAFETY:
            // `new_slot` came from `Box::into_raw` above, and is not yet shared.
            unsafe { (*new_slot).next.store(head, Ordering::Relaxed) };

            match self.slots.compare_exchange_weak(
                head,
                new_slot,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                // SAFETY:
                // The slot is now owned by `self`, and lives as long as `self`.
                Ok(_)             => return unsafe { &*new_slot },
                Err(current_head) => head = current_head,
            }
        }
    }

    /// The earliest epoch announced by any active guard, or [`INACTIVE`] if there are none.
    fn oldest_announced(&self) -> u64 {
        let mut oldest = INACTIVE;
        let mut current = self.slots.load(Ordering::Acquire);

        // SAFETY: see `acquire_slot`.
        while let Some(slot) = unsafe { current.as_ref() } {
            oldest = oldest.min(slot.epoch.load(Ordering::SeqCst));
            current = slot.next.load(Ordering::Acquire);
        }

        oldest
    }

    fn sweep_locked(&self, mut retired: MutexGuard<'_, Vec<RetiredNode>>) -> usize {
        if retired.is_empty() {
            return 0;
        }

        let oldest = self.oldest_announced();
        let (ready, waiting): (Vec<_>, Vec<_>) = mem::take(&mut *retired)
            .into_iter()
            .partition(|retired_node| retired_node.epoch < oldest);
        *retired = waiting;
        let still_pending = retired.len();
        drop(retired);

        let freed = ready.len();
        self.pending.fetch_sub(freed, Ordering::SeqCst);

        for retired_node in ready {
            debug_assert_eq!(
                // SAFETY: the node has not been freed yet.
                unsafe { retired_node.node.stamp() }.retired_at.load(Ordering::Relaxed),
                retired_node.epoch,
                "a retired node's stamp disagrees with its tag in the retired list",
            );

            // SAFETY:
            // Every guard which was active when the node was retired announced an epoch at or
            // before `retired_node.epoch`, and no such guard remains. Guards created later
            // could not have reached the node, since it was unlinked before being retired.
            // `Epoch` never pins or holds nodes, so there is nothing to release.
            unsafe { retired_node.node.free() };
        }

        if freed != 0 {
            tracing::event!(LogLevel::TRACE, freed, still_pending, "swept retired skipmap nodes");
        }

        freed
    }

    /// Sweep, unless another thread is already accessing the retired list.
    fn try_sweep(&self) -> usize {
        self.retired.try_lock().map_or(0, |retired| self.sweep_locked(retired))
    }

    /// The current global epoch. Exposed for tests.
    #[cfg(test)]
    fn current_epoch(&self) -> u64 {
        self.global.load(Ordering::SeqCst)
    }

    /// The number of slots ever published. Exposed for tests.
    #[cfg(test)]
    fn slot_count(&self) -> usize {
        let mut count = 0;
        let mut current = self.slots.load(Ordering::Acquire);
        // SAFETY: see `acquire_slot`.
        while let Some(slot) = unsafe { current.as_ref() } {
            count += 1;
            current = slot.next.load(Ordering::Acquire);
        }
        count
    }
}

impl Sealed for Epoch {}

impl Reclaim for Epoch {
    type Stamp = EpochStamp;
    type Guard<'a> = EpochGuard<'a> where Self: 'a;

    const HOLDS_SUCCESSORS: bool = false;

    #[inline]
    fn new(options: &SkipMapOptions) -> Self {
        Self::with_threshold(options.sweep_threshold)
    }

    fn enter(&self) -> Self::Guard<'_> {
        let slot = self.acquire_slot();
        slot.epoch.store(self.global.load(Ordering::SeqCst), Ordering::SeqCst);

        EpochGuard {
            backend: self,
            slot,
        }
    }

    #[inline]
    fn pin(_stamp: &Self::Stamp) {}

    #[inline]
    fn unpin(_stamp: &Self::Stamp) -> bool {
        false
    }

    #[inline]
    fn hold(_stamp: &Self::Stamp) {}

    #[inline]
    fn release(_stamp: &Self::Stamp) -> bool {
        false
    }

    #[inline]
    fn begin_read(_stamp: &Self::Stamp) -> usize {
        0
    }

    #[inline]
    fn end_read(_stamp: &Self::Stamp, _ticket: usize) {}

    #[inline]
    fn await_readers(_stamp: &Self::Stamp) {}

    unsafe fn retire(&self, retired: Retired<Self>) {
        let epoch = self.global.fetch_add(1, Ordering::SeqCst);

        // SAFETY:
        // The node is only freed by a sweep, which cannot see it before it is pushed below.
        unsafe { retired.stamp() }.retired_at.store(epoch, Ordering::Relaxed);

        let mut retired_nodes = self.retired.lock();
        retired_nodes.push(RetiredNode { epoch, node: retired });
        let pending = self.pending.fetch_add(1, Ordering::SeqCst) + 1;

        if pending >= self.sweep_threshold {
            self.sweep_locked(retired_nodes);
        }
    }

    fn sweep(&self) -> usize {
        self.sweep_locked(self.retired.lock())
    }

    #[inline]
    fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

impl Default for Epoch {
    #[inline]
    fn default() -> Self {
        Self::new(&SkipMapOptions::default())
    }
}

impl Debug for Epoch {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Epoch")
            .field("global", &self.global.load(Ordering::Relaxed))
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .field("sweep_threshold", &self.sweep_threshold)
            .finish_non_exhaustive()
    }
}

impl Drop for Epoch {
    fn drop(&mut self) {
        // Every guard borrows `self`, so none remain, and everything retired may be freed.
        for retired_node in mem::take(&mut *self.retired.lock()) {
            // SAFETY:
            // No guard is active, so nothing can access the retired node.
            unsafe { retired_node.node.free() };
        }

        let mut current = self.slots.load(Ordering::Acquire);
        while !current.is_null() {
            // SAFETY:
            // Every slot came from `Box::into_raw` in `acquire_slot`, and every reference to a
            // slot borrows `self`.
            let slot = unsafe { Box::from_raw(current) };
            current = slot.next.load(Ordering::Relaxed);
        }
    }
}

/// Announces an epoch for as long as it lives, preventing nodes retired at or after that
/// epoch from being freed.
pub struct EpochGuard<'a> {
    backend: &'a Epoch,
    slot:    &'a Slot,
}

impl EpochGuard<'_> {
    /// The epoch announced by this guard.
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.slot.epoch.load(Ordering::Relaxed)
    }
}

impl Clone for EpochGuard<'_> {
    /// The clone shares the announcement of `self`, so that it protects every node that `self`
    /// protects. The slot is released once the last guard sharing it is dropped.
    fn clone(&self) -> Self {
        self.slot.holders.fetch_add(1, Ordering::Relaxed);

        Self {
            backend: self.backend,
            slot:    self.slot,
        }
    }
}

impl Drop for EpochGuard<'_> {
    fn drop(&mut self) {
        if self.slot.holders.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        self.slot.epoch.store(INACTIVE, Ordering::SeqCst);
        self.slot.in_use.store(false, Ordering::Release);

        if self.backend.pending() != 0 {
            self.backend.try_sweep();
        }
    }
}

impl Debug for EpochGuard<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("EpochGuard")
            .field("epoch", &self.epoch())
            .finish_non_exhaustive()
    }
}
