#![expect(
    unsafe_code,
    reason = "traverse and modify nodes shared through raw pointers, whose lifetimes are \
              managed by the `Reclaim` backend",
)]

use std::{cmp::Ordering as CmpOrdering, marker::PhantomData, ptr::{self, NonNull}};
use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    sync::atomic::Ordering,
};

use tracing::Level as LogLevel;

use crate::{
    comparator::Comparator,
    node::{release_pin, Link, Node, Pinned},
    node_heights::{HeightGenerator, MAX_SUPPORTED_HEIGHT},
    options::SkipMapOptions,
    reclaim::Reclaim,
};
use crate::maybe_loom::{AtomicUsize, Backoff, MutexGuard};


// TODO: replace Ordering::SeqCst with whatever it's *supposed* to be at each point.


/// The predecessors and successors of a key at each level of a list, as found by
/// [`ConcurrentList::find_neighbors`].
///
/// Each predecessor other than the head, and each non-null successor, is pinned by this value
/// until it is dropped. Levels at or above the height of the list at the time of the search
/// have the head as their predecessor and the tail as their successor.
struct Neighbors<'a, K, V, R: Reclaim> {
    head:    NonNull<Node<K, V, R>>,
    preds:   [Link<K, V, R>; MAX_SUPPORTED_HEIGHT],
    succs:   [Link<K, V, R>; MAX_SUPPORTED_HEIGHT],
    /// The highest level at which the successor compared equal to the searched key.
    found:   Option<usize>,
    _marker: PhantomData<&'a Node<K, V, R>>,
}

#[expect(clippy::indexing_slicing, reason = "every level is below `MAX_SUPPORTED_HEIGHT`")]
impl<'a, K, V, R: Reclaim> Neighbors<'a, K, V, R> {
    fn new(head: NonNull<Node<K, V, R>>) -> Self {
        Self {
            head,
            preds:   [head.as_ptr(); MAX_SUPPORTED_HEIGHT],
            succs:   [ptr::null_mut(); MAX_SUPPORTED_HEIGHT],
            found:   None,
            _marker: PhantomData,
        }
    }

    /// Record `pred` and `succ` at `level`, which must not have been recorded yet.
    ///
    /// A new pin is taken on `pred`, and the pin of `succ` is taken over.
    fn record(
        &mut self,
        level: usize,
        pred:  Option<&Pinned<'a, K, V, R>>,
        succ:  Option<Pinned<'a, K, V, R>>,
    ) {
        self.preds[level] = pred
            .map_or(self.head.as_ptr(), |pred| pred.clone().into_raw().as_ptr());
        self.succs[level] = succ.map_or(ptr::null_mut(), |succ| succ.into_raw().as_ptr());
    }

    #[inline]
    fn pred(&self, level: usize) -> &Node<K, V, R> {
        // SAFETY:
        // Each predecessor is either the head, which lives as long as the list, or is pinned
        // by `self`.
        unsafe { &*self.preds[level] }
    }

    #[inline]
    fn succ(&self, level: usize) -> Link<K, V, R> {
        self.succs[level]
    }

    /// A new pin on the node with the searched key, if one was found.
    fn found(&self) -> Option<Pinned<'a, K, V, R>> {
        let level = self.found?;
        let node = NonNull::new(self.succs[level])?;

        // SAFETY: `self` pins the node, so it is valid.
        R::pin(unsafe { node.as_ref() }.stamp());
        // SAFETY: pinned just above, and successors are never the head.
        Some(unsafe { Pinned::adopt(node) })
    }
}

impl<K, V, R: Reclaim> Drop for Neighbors<'_, K, V, R> {
    fn drop(&mut self) {
        for (&pred, &succ) in self.preds.iter().zip(&self.succs) {
            if let Some(pred) = NonNull::new(pred).filter(|&pred| pred != self.head) {
                // SAFETY: `self` pins every predecessor other than the head.
                unsafe { release_pin(pred) };
            }
            if let Some(succ) = NonNull::new(succ) {
                // SAFETY: `self` pins every non-null successor.
                unsafe { release_pin(succ) };
            }
        }
    }
}


/// Skip forwards along level 0 until a node which is logically present (or the tail) is reached.
fn skip_invalid<'a, K, V, R: Reclaim>(
    mut current: Option<Pinned<'a, K, V, R>>,
) -> Option<Pinned<'a, K, V, R>> {
    while let Some(node) = current {
        if node.node().is_live() {
            return Some(node);
        }
        current = node.follow(0);
    }
    None
}

/// The next logically present node after `node`.
///
/// If `node` has been erased, its frozen successor is followed instead, so the result still
/// orders after `node`.
#[must_use]
pub(crate) fn next_live<'a, K, V, R: Reclaim>(
    node: &Pinned<'a, K, V, R>,
) -> Option<Pinned<'a, K, V, R>> {
    skip_invalid(node.follow(0))
}



/// A concurrent skiplist, in which each node holds one key-value entry, ordered by a
/// [`Comparator`].
///
/// Insertions and erasures lock only the nodes adjacent to the modified node, and reads take
/// no locks. Every operation (and every pinned node returned by one) must be accompanied by a
/// guard from [`ConcurrentList::backend`].
pub(crate) struct ConcurrentList<K, V, R: Reclaim, Cmp> {
    head:           NonNull<Node<K, V, R>>,
    cmp:            Cmp,
    heights:        HeightGenerator,
    /// No node is linked at or above this level.
    current_height: AtomicUsize,
    len:            AtomicUsize,
    backend:        R,
}

// SAFETY:
// Keys and values may be dropped on whichever thread frees their node, and are shared between
// threads through cursors; `K: Send + Sync` and `V: Send + Sync` cover both. The nodes
// themselves only use atomics and mutexes for shared mutable state, and the backend is
// `Send + Sync` by the bounds of `Reclaim`.
unsafe impl<K, V, R, Cmp> Send for ConcurrentList<K, V, R, Cmp>
where
    K:   Send + Sync,
    V:   Send + Sync,
    R:   Reclaim,
    Cmp: Send,
{}

// SAFETY: see the `Send` impl.
unsafe impl<K, V, R, Cmp> Sync for ConcurrentList<K, V, R, Cmp>
where
    K:   Send + Sync,
    V:   Send + Sync,
    R:   Reclaim,
    Cmp: Sync,
{}

#[expect(unreachable_pub, reason = "control visibility at type definition")]
impl<K, V, R: Reclaim, Cmp: Comparator<K>> ConcurrentList<K, V, R, Cmp> {
    /// The options should have been checked with [`SkipMapOptions::validate`].
    #[must_use]
    pub fn new(options: &SkipMapOptions, cmp: Cmp) -> Self {
        Self {
            head:           Node::new_head(options.max_height),
            cmp,
            heights:        HeightGenerator::new(
                options.resolve_seed(),
                options.max_height,
                options.branching_factor,
            ),
            current_height: AtomicUsize::new(1),
            len:            AtomicUsize::new(0),
            backend:        R::new(options),
        }
    }

    #[inline]
    #[must_use]
    pub const fn backend(&self) -> &R {
        &self.backend
    }

    #[inline]
    #[must_use]
    pub const fn comparator(&self) -> &Cmp {
        &self.cmp
    }

    #[inline]
    #[must_use]
    pub const fn max_height(&self) -> usize {
        self.heights.max_height()
    }

    /// One more than the highest level at which any node has been linked.
    #[inline]
    #[must_use]
    pub fn current_height(&self) -> usize {
        self.current_height.load(Ordering::SeqCst)
    }

    /// The number of entries which are logically present.
    ///
    /// Exact while no insertion or erasure is in progress.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    /// The head orders before every key.
    #[inline]
    fn compare(&self, node: &Node<K, V, R>, key: &K) -> CmpOrdering {
        node.key().map_or(CmpOrdering::Less, |node_key| self.cmp.cmp(node_key, key))
    }

    #[inline]
    fn follow_from<'a>(
        &'a self,
        pred:  Option<&Pinned<'a, K, V, R>>,
        level: usize,
    ) -> Option<Pinned<'a, K, V, R>> {
        match pred {
            Some(pred) => pred.follow(level),
            // SAFETY: the head lives as long as `self`.
            None       => unsafe { self.head.as_ref().follow(level) },
        }
    }

    /// Find the first node at level 0 for which `before(node)` is false, without skipping
    /// nodes that are not logically present.
    fn descend<'a, F>(&'a self, mut before: F) -> Option<Pinned<'a, K, V, R>>
    where
        F: FnMut(&Node<K, V, R>) -> bool,
    {
        // `None` is the head.
        let mut pred = None;
        let mut current = None;

        for level in (0..self.current_height()).rev() {
            current = self.follow_from(pred.as_ref(), level);

            while current.as_ref().is_some_and(|node| before(node.node())) {
                pred = current.take();
                current = self.follow_from(pred.as_ref(), level);
            }
        }

        current
    }

    /// For every level, find the last node which compares strictly less than `key`, and the
    /// node following it.
    fn find_neighbors<'a>(&'a self, key: &K) -> Neighbors<'a, K, V, R> {
        let mut neighbors = Neighbors::new(self.head);
        let top = self.current_height().min(self.max_height());

        let mut pred = None;
        for level in (0..top).rev() {
            let mut current = self.follow_from(pred.as_ref(), level);

            loop {
                let ordering = current.as_ref().map(|node| self.compare(node.node(), key));
                match ordering {
                    Some(CmpOrdering::Less) => {
                        pred = current.take();
                        current = self.follow_from(pred.as_ref(), level);
                    }
                    Some(CmpOrdering::Equal) => {
                        if neighbors.found.is_none() {
                            neighbors.found = Some(level);
                        }
                        break;
                    }
                    Some(CmpOrdering::Greater) | None => break,
                }
            }

            neighbors.record(level, pred.as_ref(), current);
        }

        // Levels in `top..` keep the head and the tail.
        neighbors
    }

    /// Lock the distinct predecessors of levels `0..height`, from the bottom level upwards,
    /// and confirm that each is still unmarked and links to `expected_next(level)`.
    ///
    /// If `require_unmarked_next` is set, each non-null expected successor must also be
    /// unmarked.
    ///
    /// Returns `None` (with every lock released) if validation fails.
    fn lock_predecessors<'n, F>(
        neighbors:             &'n Neighbors<'_, K, V, R>,
        height:                usize,
        expected_next:         F,
        require_unmarked_next: bool,
    ) -> Option<Vec<MutexGuard<'n, ()>>>
    where
        F: Fn(usize) -> Link<K, V, R>,
    {
        let mut locks = Vec::with_capacity(height);
        let mut previous_pred: *const Node<K, V, R> = ptr::null();

        for level in 0..height {
            let pred = neighbors.pred(level);
            let next = expected_next(level);

            if !ptr::eq(pred, previous_pred) {
                locks.push(pred.lock());
                previous_pred = pred;
            }

            // SAFETY: `neighbors` pins every non-null successor.
            let next_marked = unsafe { next.as_ref() }.is_some_and(Node::is_marked);

            let valid = !pred.is_marked()
                && !(require_unmarked_next && next_marked)
                && pred.load_next(level) == next;

            if !valid {
                return None;
            }
        }

        Some(locks)
    }

    /// Insert the entry, unless a node with an equal key is already present.
    ///
    /// Returns the node with the key, and whether the entry was inserted. If an equal key was
    /// already present, the given key and value are dropped.
    pub fn insert<'a>(
        &'a self,
        _guard: &R::Guard<'a>,
        key:    K,
        value:  V,
    ) -> (Pinned<'a, K, V, R>, bool) {
        let height = self.heights.next_height();
        let new_node = Node::new_entry(key, value, height);
        // SAFETY:
        // The node is valid until it is freed below (after which this reference is unused),
        // or until it is published, after which it lives as long as the list.
        let new_ref: &'a Node<K, V, R> = unsafe { new_node.as_ref() };
        #[expect(clippy::unwrap_used, reason = "nodes from `new_entry` always have an entry")]
        let key = new_ref.key().unwrap();

        let backoff = Backoff::new();
        loop {
            let neighbors = self.find_neighbors(key);

            if let Some(existing) = neighbors.found() {
                if !existing.node().is_marked() {
                    // The node cannot be erased until it is fully linked.
                    while !existing.node().is_fully_linked() {
                        backoff.snooze();
                    }

                    drop(neighbors);
                    // SAFETY: `new_node` was never published.
                    unsafe { Node::free(new_node) };
                    return (existing, false);
                }

                // Wait for the eraser to unlink the existing node, which never waits on cursors.
                tracing::event!(LogLevel::TRACE, "skipmap insert found an equal key being erased");
                drop(existing);
                drop(neighbors);
                backoff.snooze();
                continue;
            }

            let Some(locks) = Self::lock_predecessors(
                &neighbors,
                height,
                |level| neighbors.succ(level),
                true,
            ) else {
                tracing::event!(LogLevel::TRACE, "skipmap insert failed validation, retrying");
                backoff.snooze();
                continue;
            };

            for level in 0..height {
                // SAFETY: `new_node` is not yet published. Successors belong to this list.
                unsafe { new_ref.store_next(level, neighbors.succ(level)) };
            }

            // SAFETY:
            // The node is published below, and the returned pin is tied to the lifetime of `self`.
            let pinned = unsafe { Pinned::pin_new(new_node) };

            self.current_height.fetch_max(height, Ordering::SeqCst);

            for level in 0..height {
                // SAFETY:
                // The predecessor is locked and was validated to be unmarked. `new_node` now
                // belongs to this list.
                unsafe { neighbors.pred(level).store_next(level, new_node.as_ptr()) };
            }

            new_ref.set_fully_linked();
            self.len.fetch_add(1, Ordering::SeqCst);
            drop(locks);

            return (pinned, true);
        }
    }

    /// Remove the node with a key equal to `key`, if present.
    ///
    /// Under a blocking backend, this does not return until the node has been freed.
    pub fn erase<'a>(&'a self, _guard: &R::Guard<'a>, key: &K) -> bool {
        let mut neighbors = self.find_neighbors(key);

        let Some(victim) = neighbors.found() else {
            return false;
        };
        let victim_ref = victim.node();

        // A node which is not yet fully linked is not yet present.
        if !victim_ref.is_fully_linked() || victim_ref.is_marked() {
            return false;
        }

        let victim_lock = victim_ref.lock();
        if victim_ref.is_marked() {
            // Another thread won the race to erase it.
            return false;
        }
        victim_ref.mark();
        self.len.fetch_sub(1, Ordering::SeqCst);

        let height = victim_ref.height();
        let backoff = Backoff::new();

        loop {
            if let Some(locks) = Self::lock_predecessors(
                &neighbors,
                height,
                |_| victim.as_ptr(),
                false,
            ) {
                for level in (0..height).rev() {
                    let pred = neighbors.pred(level);
                    let next = victim_ref.load_next(level);

                    if R::HOLDS_SUCCESSORS {
                        // SAFETY:
                        // `next` follows `victim` at `level`, and cannot be unlinked before
                        // `victim` is, since `victim` is marked and unlinking `next` would
                        // require modifying `victim`.
                        if let Some(next) = unsafe { next.as_ref() } {
                            R::hold(next.stamp());
                        }
                    }

                    // SAFETY:
                    // `pred` is locked and unmarked. `next` is null or a node of this list.
                    unsafe { pred.store_next(level, next) };
                    R::await_readers(pred.stamp());
                }

                drop(locks);
                break;
            }

            tracing::event!(LogLevel::TRACE, "skipmap erase failed validation, retrying");
            backoff.snooze();
            neighbors = self.find_neighbors(key);
        }

        drop(victim_lock);
        drop(neighbors);

        let victim_ptr = victim.as_non_null();
        drop(victim);

        // SAFETY:
        // The node is marked and unlinked from every level, and every pin this thread held on it
        // has just been released.
        unsafe { self.backend.retire(Node::into_retired(victim_ptr)) };

        true
    }

    /// The logically present node with a key equal to `key`, if any.
    #[must_use]
    pub fn find<'a>(&'a self, guard: &R::Guard<'a>, key: &K) -> Option<Pinned<'a, K, V, R>> {
        self.lower_bound(guard, key)
            .filter(|node| self.compare(node.node(), key) == CmpOrdering::Equal)
    }

    /// The first logically present node whose key is greater than or equal to `key`.
    #[must_use]
    pub fn lower_bound<'a>(
        &'a self,
        _guard: &R::Guard<'a>,
        key:    &K,
    ) -> Option<Pinned<'a, K, V, R>> {
        let found = self.descend(|node| self.compare(node, key) == CmpOrdering::Less);
        skip_invalid(found)
    }

    /// The first logically present node whose key is strictly greater than `key`.
    #[must_use]
    pub fn upper_bound<'a>(
        &'a self,
        _guard: &R::Guard<'a>,
        key:    &K,
    ) -> Option<Pinned<'a, K, V, R>> {
        let found = self.descend(|node| self.compare(node, key) != CmpOrdering::Greater);
        skip_invalid(found)
    }

    /// The first logically present node.
    #[must_use]
    pub fn first<'a>(&'a self, _guard: &R::Guard<'a>) -> Option<Pinned<'a, K, V, R>> {
        skip_invalid(self.follow_from(None, 0))
    }
}

impl<K, V, R: Reclaim, Cmp> Drop for ConcurrentList<K, V, R, Cmp> {
    fn drop(&mut self) {
        // SAFETY: the head is valid until it is freed below.
        let mut current = unsafe { self.head.as_ref() }.load_next(0);

        while let Some(node) = NonNull::new(current) {
            // SAFETY:
            // `&mut self` means that no guard, cursor, or operation references any node, so every
            // node still linked at level 0 may be freed, once.
            unsafe {
                current = node.as_ref().load_next(0);
                Node::free(node);
            }
        }

        // SAFETY: as above. Retired nodes are freed by the backend when it is dropped.
        unsafe { Node::free(self.head) };
    }
}

impl<K: Debug, V: Debug, R: Reclaim, Cmp: Debug> Debug for ConcurrentList<K, V, R, Cmp> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ConcurrentList")
            .field("cmp", &self.cmp)
            .field("heights", &self.heights)
            .field("current_height", &self.current_height.load(Ordering::Relaxed))
            .field("len", &self.len.load(Ordering::Relaxed))
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}
