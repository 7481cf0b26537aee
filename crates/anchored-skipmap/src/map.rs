use std::ops::{Bound, RangeBounds};
use std::fmt::{Debug, Formatter, Result as FmtResult};

use crate::{
    comparator::{Comparator, OrdComparator},
    cursor::{Cursor, Entry, Iter, Range},
    list_inner::ConcurrentList,
    options::{OptionsError, SkipMapOptions},
    reclaim::{Epoch, Reclaim, RefCounted},
};


/// A [`SkipMap`] whose [`erase`] blocks until the erased entry is no longer referenced, and
/// then frees it.
///
/// [`erase`]: SkipMap::erase
pub type BlockingSkipMap<K, V, Cmp = OrdComparator> = SkipMap<K, V, RefCounted, Cmp>;

/// A [`SkipMap`] whose [`erase`] never blocks, and which frees erased entries in batches once
/// no cursor can reference them.
///
/// [`erase`]: SkipMap::erase
pub type LazySkipMap<K, V, Cmp = OrdComparator> = SkipMap<K, V, Epoch, Cmp>;


/// A concurrent ordered map, backed by a skiplist.
///
/// Every method takes `&self`, so a `SkipMap` may be shared between threads (for instance, in an
/// [`Arc`] or with [`std::thread::scope`]) and modified by all of them at once. Keys are unique
/// and are ordered by `Cmp`; neither keys nor values can be modified once inserted.
///
/// Lookups return [`Cursor`]s rather than references. A cursor keeps the entry it refers to
/// alive even if that entry is erased, and can be advanced to later entries. When erased entries
/// are freed is decided by the reclamation backend `R`:
/// - [`RefCounted`] (the default, also [`BlockingSkipMap`]): [`erase`] waits until no cursor
///   refers to the erased entry, and then frees it.
/// - [`Epoch`] ([`LazySkipMap`]): [`erase`] returns immediately, and the entry is freed later,
///   once every cursor which existed at the time of the erasure is gone.
///
/// # Deadlocks
/// Under [`RefCounted`], a thread which erases a key while it holds a cursor or [`Entry`] on that
/// key waits forever.
///
/// No other operation waits on a cursor. In particular, while an erasure of a key waits for a
/// cursor, the thread holding that cursor may still [`insert`] the same key again, or [`erase`]
/// neighboring keys, since the erased entry was unlinked before its eraser began to wait.
///
/// [`insert`]: SkipMap::insert
///
/// # Comparator
/// `Cmp` must be a total order over the keys of the map. A comparator which is not does not
/// cause memory unsafety, but the order of iteration, and whether keys can be found, become
/// unspecified.
///
/// [`Arc`]: std::sync::Arc
/// [`erase`]: SkipMap::erase
pub struct SkipMap<K, V, R: Reclaim = RefCounted, Cmp = OrdComparator> {
    list: ConcurrentList<K, V, R, Cmp>,
}

impl<K: Ord, V, R: Reclaim> SkipMap<K, V, R> {
    /// Create an empty map ordered by `K`'s [`Ord`] implementation, with the default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_comparator(OrdComparator)
    }
}

impl<K, V, R: Reclaim, Cmp: Comparator<K>> SkipMap<K, V, R, Cmp> {
    /// Create an empty map ordered by `cmp`, with the default options.
    #[must_use]
    pub fn with_comparator(cmp: Cmp) -> Self {
        Self {
            list: ConcurrentList::new(&SkipMapOptions::default(), cmp),
        }
    }

    /// Create an empty map ordered by `cmp`.
    ///
    /// # Errors
    /// Returns an error if any of the `options` is outside of its permitted range; see
    /// [`SkipMapOptions::validate`].
    pub fn with_options(cmp: Cmp, options: &SkipMapOptions) -> Result<Self, OptionsError> {
        options.validate()?;

        Ok(Self {
            list: ConcurrentList::new(options, cmp),
        })
    }

    #[inline]
    #[must_use]
    pub const fn comparator(&self) -> &Cmp {
        self.list.comparator()
    }

    /// The maximum height of the skiplist's towers.
    #[inline]
    #[must_use]
    pub const fn max_height(&self) -> usize {
        self.list.max_height()
    }

    /// Insert `key` with `value`, unless an equal key is already present.
    ///
    /// Returns a cursor at the entry with the key, and `true` if the entry was newly inserted.
    /// If an equal key was already present, the map is not modified, the given `key` and `value`
    /// are dropped, and the returned cursor refers to the existing entry.
    pub fn insert(&self, key: K, value: V) -> (Cursor<'_, K, V, R>, bool) {
        let guard = self.list.backend().enter();
        let (node, inserted) = self.list.insert(&guard, key, value);
        (Cursor::new(guard, Some(node)), inserted)
    }

    /// A cursor at the entry whose key is equal to `key`, or the end cursor if there is none.
    #[must_use]
    pub fn find(&self, key: &K) -> Cursor<'_, K, V, R> {
        let guard = self.list.backend().enter();
        let node = self.list.find(&guard, key);
        Cursor::new(guard, node)
    }

    /// Remove the entry whose key is equal to `key`, returning whether there was one.
    ///
    /// Once this returns `true`, the key can no longer be found, though cursors which already
    /// refer to the entry can still read it.
    ///
    /// Under the [`RefCounted`] backend, this blocks until no cursor refers to the entry. The
    /// entry is then freed, unless a stale cursor on an erased neighbor could still advance onto
    /// it, in which case it is freed along with that neighbor. See the [deadlock section] of
    /// `SkipMap`.
    ///
    /// [deadlock section]: SkipMap#deadlocks
    pub fn erase(&self, key: &K) -> bool {
        let guard = self.list.backend().enter();
        self.list.erase(&guard, key)
    }

    /// A cursor at the first entry whose key is greater than or equal to `key`, or the end
    /// cursor if there is none.
    #[must_use]
    pub fn lower_bound(&self, key: &K) -> Cursor<'_, K, V, R> {
        let guard = self.list.backend().enter();
        let node = self.list.lower_bound(&guard, key);
        Cursor::new(guard, node)
    }

    /// A cursor at the first entry whose key is strictly greater than `key`, or the end cursor
    /// if there is none.
    #[must_use]
    pub fn upper_bound(&self, key: &K) -> Cursor<'_, K, V, R> {
        let guard = self.list.backend().enter();
        let node = self.list.upper_bound(&guard, key);
        Cursor::new(guard, node)
    }

    /// A cursor at the first entry, or the end cursor if the map is empty.
    #[must_use]
    pub fn begin(&self) -> Cursor<'_, K, V, R> {
        let guard = self.list.backend().enter();
        let node = self.list.first(&guard);
        Cursor::new(guard, node)
    }

    /// The end cursor, which orders after every entry.
    #[must_use]
    pub fn end(&self) -> Cursor<'_, K, V, R> {
        Cursor::new(self.list.backend().enter(), None)
    }

    /// Iterate over the entries of the map, in ascending order of keys.
    #[inline]
    #[must_use]
    pub fn iter(&self) -> Iter<'_, K, V, R> {
        Iter::new(self.begin())
    }

    /// Iterate over the entries whose keys lie in `bounds`, in ascending order of keys.
    #[must_use]
    pub fn range<B: RangeBounds<K>>(&self, bounds: B) -> Range<'_, K, V, R, Cmp, B> {
        let start = match bounds.start_bound() {
            Bound::Included(start) => self.lower_bound(start),
            Bound::Excluded(start) => self.upper_bound(start),
            Bound::Unbounded       => self.begin(),
        };

        Range::new(start, self.comparator(), bounds)
    }

    /// A clone of the value whose key is equal to `key`, if there is one.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.find(key).value().cloned()
    }

    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        !self.find(key).is_end()
    }

    /// The number of entries in the map.
    ///
    /// While other threads are inserting or erasing entries, the result may be momentarily
    /// inexact.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of erased entries whose memory has not yet been freed.
    ///
    /// Under [`RefCounted`], this counts the erasures which are currently waiting for cursors to
    /// be released; an erased entry which is only kept alive for a stale cursor on an erased
    /// neighbor is not counted. Under [`Epoch`], this counts the entries awaiting a sweep.
    #[inline]
    #[must_use]
    pub fn pending_reclamation(&self) -> usize {
        self.list.backend().pending()
    }

    /// Free every erased entry which is no longer referenced, returning how many were freed.
    ///
    /// This is never needed for correctness; the [`Epoch`] backend sweeps on its own.
    #[inline]
    pub fn reclaim(&self) -> usize {
        self.list.backend().sweep()
    }
}

impl<K, V, R, Cmp> Default for SkipMap<K, V, R, Cmp>
where
    R:   Reclaim,
    Cmp: Comparator<K> + Default,
{
    #[inline]
    fn default() -> Self {
        Self::with_comparator(Cmp::default())
    }
}

impl<K, V, R, Cmp> Debug for SkipMap<K, V, R, Cmp>
where
    K:   Debug,
    V:   Debug,
    R:   Reclaim,
    Cmp: Comparator<K>,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let mut map = f.debug_map();
        for entry in self {
            map.entry(entry.key(), entry.value());
        }
        map.finish()
    }
}

impl<'a, K, V, R: Reclaim, Cmp: Comparator<K>> IntoIterator for &'a SkipMap<K, V, R, Cmp> {
    type Item = Entry<'a, K, V, R>;
    type IntoIter = Iter<'a, K, V, R>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Later duplicates of a key are discarded.
impl<K, V, R, Cmp> FromIterator<(K, V)> for SkipMap<K, V, R, Cmp>
where
    R:   Reclaim,
    Cmp: Comparator<K> + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map = Self::default();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

/// Entries whose keys are already present are discarded.
impl<K, V, R: Reclaim, Cmp: Comparator<K>> Extend<(K, V)> for SkipMap<K, V, R, Cmp> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}
