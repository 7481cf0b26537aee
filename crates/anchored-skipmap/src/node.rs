#![expect(
    unsafe_code,
    reason = "nodes are shared through raw pointers, and their lifetimes are managed by a \
              `Reclaim` backend rather than the borrow checker",
)]

use std::{marker::PhantomData, ptr::{self, NonNull}};
use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    sync::atomic::Ordering,
};

use crate::{
    maybe_loom::{AtomicBool, AtomicPtr, Mutex, MutexGuard},
    reclaim::{Reclaim, Retired},
};


/// A forward link. Null is the tail of the list, which orders after every key.
pub(crate) type Link<K, V, R> = *mut Node<K, V, R>;


/// # Invariants, which may be relied on by unsafe code:
/// - Every `Node` is allocated with [`Box`], by [`Node::new_head`] or [`Node::new_entry`], and is
///   only ever accessed through shared references (or pointers) until it is freed.
/// - The head of a list has no entry, has a tower of the list's maximum height, is never marked,
///   and is never pinned or retired. It lives as long as its list.
/// - A node's tower is only modified while its `lock` is held, and never after it is marked,
///   aside from the initialization of a new node's tower before it is published.
/// - A node is only marked while its `lock` is held, and a marked node is never unmarked.
/// - If `R::HOLDS_SUCCESSORS`, then once a node has been unlinked at some level, the node holds
///   the (non-null) target of its link at that level, which is released when the node is freed
///   by [`free_retired`].
/// - A node whose last reference is released by [`Pinned`] or [`free_retired`] after it was
///   retired is freed by whoever released that reference.
pub(crate) struct Node<K, V, R: Reclaim> {
    entry:        Option<(K, V)>,
    tower:        Box<[AtomicPtr<Self>]>,
    lock:         Mutex<()>,
    /// Set when the node is logically removed.
    marked:       AtomicBool,
    /// Set once the node has been linked into every level of its tower.
    fully_linked: AtomicBool,
    stamp:        R::Stamp,
}

#[expect(unreachable_pub, reason = "control visibility at type definition")]
impl<K, V, R: Reclaim> Node<K, V, R> {
    fn alloc(entry: Option<(K, V)>, height: usize, fully_linked: bool) -> NonNull<Self> {
        let tower = (0..height)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();

        let node = Box::new(Self {
            entry,
            tower,
            lock:         Mutex::new(()),
            marked:       AtomicBool::new(false),
            fully_linked: AtomicBool::new(fully_linked),
            stamp:        R::Stamp::default(),
        });

        NonNull::from(Box::leak(node))
    }

    #[must_use]
    pub fn new_head(max_height: usize) -> NonNull<Self> {
        Self::alloc(None, max_height, true)
    }

    /// The returned node is not yet published, and carries no pins.
    #[must_use]
    pub fn new_entry(key: K, value: V, height: usize) -> NonNull<Self> {
        Self::alloc(Some((key, value)), height, false)
    }

    /// # Safety
    /// `node` must have come from [`Node::new_head`] or [`Node::new_entry`], must not be
    /// referenced by anything else, and must not be used afterwards.
    pub unsafe fn free(node: NonNull<Self>) {
        // SAFETY:
        // The node was allocated with `Box`, and the caller asserts exclusive ownership.
        drop(unsafe { Box::from_raw(node.as_ptr()) });
    }

    /// `None` for the head.
    #[inline]
    #[must_use]
    pub const fn entry(&self) -> Option<&(K, V)> {
        self.entry.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> Option<&K> {
        self.entry.as_ref().map(|(key, _)| key)
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> usize {
        self.tower.len()
    }

    /// Returns null if `level` is at or above the height of the node.
    #[inline]
    #[must_use]
    pub fn load_next(&self, level: usize) -> Link<K, V, R> {
        self.tower
            .get(level)
            .map_or(ptr::null_mut(), |link| link.load(Ordering::SeqCst))
    }

    /// # Safety
    /// Either `self` is an unpublished new node, or the caller holds `self.lock` and `self` is
    /// not marked. `next` must be null or point to a node of the same list.
    #[inline]
    pub unsafe fn store_next(&self, level: usize, next: Link<K, V, R>) {
        debug_assert!(level < self.height(), "should not try to set a nonexistent link of a node");

        if let Some(link) = self.tower.get(level) {
            link.store(next, Ordering::SeqCst);
        }
    }

    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    #[inline]
    #[must_use]
    pub fn is_marked(&self) -> bool {
        self.marked.load(Ordering::SeqCst)
    }

    /// Must only be called while holding `self.lock`.
    #[inline]
    pub fn mark(&self) {
        self.marked.store(true, Ordering::SeqCst);
    }

    #[inline]
    #[must_use]
    pub fn is_fully_linked(&self) -> bool {
        self.fully_linked.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn set_fully_linked(&self) {
        self.fully_linked.store(true, Ordering::SeqCst);
    }

    /// Whether the node is logically present in the list.
    #[inline]
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.is_fully_linked() && !self.is_marked()
    }

    #[inline]
    #[must_use]
    pub const fn stamp(&self) -> &R::Stamp {
        &self.stamp
    }

    /// Load the link at `level`, and pin its target.
    ///
    /// # Safety
    /// `self` must remain valid for at least `'a`. Moreover, `self` must be the head, be pinned
    /// by the caller, or be protected by a guard which the caller holds for `'a`.
    #[must_use]
    pub unsafe fn follow<'a>(&self, level: usize) -> Option<Pinned<'a, K, V, R>> {
        let ticket = R::begin_read(&self.stamp);
        let next = NonNull::new(self.load_next(level));
        if let Some(next) = next {
            // SAFETY:
            // Under `RefCounted`, an eraser which unlinks `next` from `self` waits for
            // `self`'s readers before retiring `next`, and if `self` has been unlinked, then
            // `self` holds `next`. Under `Epoch`, the caller's guard protects `next`, since
            // `next` was reachable after the guard was created.
            R::pin(unsafe { &next.as_ref().stamp });
        }
        R::end_read(&self.stamp, ticket);

        // SAFETY: `next` was pinned above, and is never the head.
        next.map(|next| unsafe { Pinned::adopt(next) })
    }

    /// Move the node into a [`Retired`] handle for its list's backend.
    ///
    /// # Safety
    /// The node must have been marked and unlinked from every level of its tower, and the
    /// caller must not hold any pin on it.
    #[must_use]
    pub unsafe fn into_retired(node: NonNull<Self>) -> Retired<R> {
        // SAFETY:
        // `free_retired::<K, V, R>` frees a node of this type, which is what `node` is, and the
        // stamp is a field of the node. Releasing successor holds in `free_retired` is
        // correct by the invariants of `Node`, given that the node is fully unlinked.
        unsafe {
            Retired::new(
                node.cast(),
                NonNull::from(&node.as_ref().stamp),
                free_retired::<K, V, R>,
            )
        }
    }
}

impl<K: Debug, V: Debug, R: Reclaim> Debug for Node<K, V, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Node")
            .field("entry", &self.entry)
            .field("height", &self.height())
            .field("marked", &self.is_marked())
            .field("fully_linked", &self.is_fully_linked())
            .field("stamp", &self.stamp)
            .finish_non_exhaustive()
    }
}

/// Free a retired node, along with any retired successors it was the last to hold.
///
/// # Safety
/// `node` must be a `Node<K, V, R>` which was unlinked from every level of its tower, and which
/// nothing will access afterwards.
unsafe fn free_retired<K, V, R: Reclaim>(node: NonNull<()>) {
    let mut unreferenced = vec![node.cast::<Node<K, V, R>>()];

    while let Some(node) = unreferenced.pop() {
        if R::HOLDS_SUCCESSORS {
            // SAFETY: the node is still valid; it is freed below.
            let node_ref = unsafe { node.as_ref() };
            for link in &node_ref.tower {
                // SAFETY:
                // The node holds every non-null target of its tower, so those targets are valid.
                if let Some(next) = unsafe { link.load(Ordering::SeqCst).as_ref() } {
                    if R::release(&next.stamp) {
                        // A retired node is unlinked from every level, so it is never the head.
                        unreferenced.push(NonNull::from(next));
                    }
                }
            }
        }

        // SAFETY:
        // Either the caller asserts that this is the last use of `node`, or `node` was retired
        // and its last reference was released above.
        unsafe { Node::free(node) };
    }
}

/// Release a pin on `node`, freeing the node if it was retired and this was its last reference.
///
/// # Safety
/// The caller must hold a pin on `node`, which must not be used afterwards unless another
/// reference to it is held.
#[inline]
pub(crate) unsafe fn release_pin<K, V, R: Reclaim>(node: NonNull<Node<K, V, R>>) {
    // SAFETY: the caller's pin keeps the node valid.
    if R::unpin(unsafe { node.as_ref() }.stamp()) {
        // SAFETY:
        // Only retired nodes are reported as unreferenced, and they are unlinked from every
        // level. Nothing references the node anymore.
        unsafe { free_retired::<K, V, R>(node.cast()) };
    }
}


/// One pin on a node, released on drop.
///
/// The head of a list is never wrapped in a `Pinned`.
pub(crate) struct Pinned<'a, K, V, R: Reclaim> {
    node:    NonNull<Node<K, V, R>>,
    _marker: PhantomData<&'a Node<K, V, R>>,
}

#[expect(unreachable_pub, reason = "control visibility at type definition")]
impl<'a, K, V, R: Reclaim> Pinned<'a, K, V, R> {
    /// Take ownership of a pin which the caller already holds.
    ///
    /// # Safety
    /// The caller must hold a pin on `node`, which is transferred to the returned value, and the
    /// list containing `node` must outlive `'a`. `node` must not be the head.
    #[inline]
    #[must_use]
    pub const unsafe fn adopt(node: NonNull<Node<K, V, R>>) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    /// Pin `node`, returning the new pin.
    ///
    /// # Safety
    /// `node` must be a newly-allocated node which has not yet been published, and the list
    /// which it will be published into must outlive `'a`.
    #[inline]
    #[must_use]
    pub unsafe fn pin_new(node: NonNull<Node<K, V, R>>) -> Self {
        // SAFETY: the node is not yet shared, so it is certainly valid.
        R::pin(unsafe { &node.as_ref().stamp });
        // SAFETY: pinned above; new nodes are never the head.
        unsafe { Self::adopt(node) }
    }

    #[inline]
    #[must_use]
    pub const fn as_ptr(&self) -> *mut Node<K, V, R> {
        self.node.as_ptr()
    }

    #[inline]
    #[must_use]
    pub const fn as_non_null(&self) -> NonNull<Node<K, V, R>> {
        self.node
    }

    /// Give up this handle without releasing its pin. The caller becomes responsible for
    /// the pin.
    #[inline]
    #[must_use]
    pub fn into_raw(self) -> NonNull<Node<K, V, R>> {
        let node = self.node;
        std::mem::forget(self);
        node
    }

    #[inline]
    #[must_use]
    pub const fn node(&self) -> &Node<K, V, R> {
        // SAFETY:
        // The pin, or the guard which accompanies it, keeps the node valid for as long as
        // `self` exists.
        unsafe { self.node.as_ref() }
    }

    /// Pin the node at `level` after this one.
    #[inline]
    #[must_use]
    pub fn follow(&self, level: usize) -> Option<Self> {
        // SAFETY: `self` pins the node, and the list outlives `'a`.
        unsafe { self.node().follow(level) }
    }
}

impl<K, V, R: Reclaim> Clone for Pinned<'_, K, V, R> {
    #[inline]
    fn clone(&self) -> Self {
        R::pin(self.node().stamp());
        // SAFETY: pinned above, and `self` is not the head.
        unsafe { Self::adopt(self.node) }
    }
}

impl<K, V, R: Reclaim> Drop for Pinned<'_, K, V, R> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: `self` holds a pin on the node, and is not used afterwards.
        unsafe { release_pin(self.node) };
    }
}

impl<K, V, R: Reclaim> PartialEq for Pinned<'_, K, V, R> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl<K, V, R: Reclaim> Eq for Pinned<'_, K, V, R> {}

impl<K: Debug, V: Debug, R: Reclaim> Debug for Pinned<'_, K, V, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_tuple("Pinned").field(self.node()).finish()
    }
}
