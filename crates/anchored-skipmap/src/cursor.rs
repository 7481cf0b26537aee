use std::{iter::FusedIterator, ops::{Bound, RangeBounds}};
use std::fmt::{Debug, Formatter, Result as FmtResult};

use crate::{
    comparator::Comparator,
    list_inner::next_live,
    node::Pinned,
    reclaim::{Reclaim, RefCounted},
};


/// A position in a [`SkipMap`]: either an entry of the map, or the end of the map.
///
/// While a cursor refers to an entry, the entry's memory remains valid, even if the entry is
/// erased from the map. Under the [`Epoch`] backend, erasing the entry does not wait for the
/// cursor; the cursor becomes [stale], and continues to read the key and value it referred to.
/// Under the [`RefCounted`] backend, erasing the entry waits until the cursor moves away or is
/// dropped.
///
/// Advancing a cursor moves it to the next entry in the map's order, skipping entries which are
/// in the middle of being inserted or erased. Advancing a stale cursor is permitted, and moves
/// it to an entry which orders after the stale one.
///
/// [`SkipMap`]: crate::SkipMap
/// [`Epoch`]: crate::Epoch
/// [stale]: Cursor::is_stale
pub struct Cursor<'a, K, V, R: Reclaim = RefCounted>
where
    R: 'a,
{
    // Must be dropped before `guard`.
    node:  Option<Pinned<'a, K, V, R>>,
    guard: R::Guard<'a>,
}

impl<'a, K, V, R: Reclaim> Cursor<'a, K, V, R> {
    #[inline]
    #[must_use]
    pub(crate) const fn new(guard: R::Guard<'a>, node: Option<Pinned<'a, K, V, R>>) -> Self {
        Self { node, guard }
    }

    /// The key of the entry at this position, or `None` at the end of the map.
    #[inline]
    #[must_use]
    pub fn key(&self) -> Option<&K> {
        self.entry().map(|(key, _)| key)
    }

    /// The value of the entry at this position, or `None` at the end of the map.
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<&V> {
        self.entry().map(|(_, value)| value)
    }

    #[inline]
    #[must_use]
    pub fn entry(&self) -> Option<(&K, &V)> {
        let (key, value) = self.node.as_ref()?.node().entry()?;
        Some((key, value))
    }

    /// Whether this cursor is at the end of the map.
    #[inline]
    #[must_use]
    pub const fn is_end(&self) -> bool {
        self.node.is_none()
    }

    /// Whether the entry at this position has been erased from the map since the cursor
    /// reached it. The key and value remain readable.
    #[inline]
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.node.as_ref().is_some_and(|node| node.node().is_marked())
    }

    /// Move to the next entry, or to the end of the map. Does nothing at the end of the map.
    pub fn advance(&mut self) {
        if let Some(node) = &self.node {
            self.node = next_live(node);
        }
    }

    /// Move to the end of the map, releasing the entry this cursor referred to.
    ///
    /// Under the [`RefCounted`] backend, this unblocks any erasure of that entry.
    #[inline]
    pub fn reset(&mut self) {
        self.node = None;
    }

    /// A handle to the entry at this position, independent of this cursor.
    #[must_use]
    pub(crate) fn to_entry(&self) -> Option<Entry<'a, K, V, R>> {
        let node = self.node.clone()?;
        Some(Entry {
            node,
            guard: self.guard.clone(),
        })
    }
}

impl<K, V, R: Reclaim> Clone for Cursor<'_, K, V, R> {
    fn clone(&self) -> Self {
        Self {
            node:  self.node.clone(),
            guard: self.guard.clone(),
        }
    }
}

/// Two cursors are equal if they refer to the same entry, or are both at the end of the map.
impl<K, V, R: Reclaim> PartialEq for Cursor<'_, K, V, R> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl<K, V, R: Reclaim> Eq for Cursor<'_, K, V, R> {}

impl<K: Debug, V: Debug, R: Reclaim> Debug for Cursor<'_, K, V, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.entry() {
            Some((key, value)) => f
                .debug_struct("Cursor")
                .field("key", key)
                .field("value", value)
                .field("stale", &self.is_stale())
                .finish(),
            None => f.write_str("Cursor(end)"),
        }
    }
}


/// A handle to one entry of a [`SkipMap`], as yielded by its iterators.
///
/// Like a [`Cursor`], an `Entry` keeps the memory of its entry valid, and under the
/// [`RefCounted`] backend, erasing the entry waits until the handle is dropped.
///
/// [`SkipMap`]: crate::SkipMap
pub struct Entry<'a, K, V, R: Reclaim = RefCounted>
where
    R: 'a,
{
    // Must be dropped before `guard`.
    node:  Pinned<'a, K, V, R>,
    guard: R::Guard<'a>,
}

impl<K, V, R: Reclaim> Entry<'_, K, V, R> {
    #[inline]
    #[must_use]
    pub fn key(&self) -> &K {
        &self.pair().0
    }

    #[inline]
    #[must_use]
    pub fn value(&self) -> &V {
        &self.pair().1
    }

    /// Whether the entry has been erased from the map. The key and value remain readable.
    #[inline]
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.node.node().is_marked()
    }

    #[inline]
    fn pair(&self) -> &(K, V) {
        #[expect(clippy::unwrap_used, reason = "only the head lacks an entry, and is never pinned")]
        let pair = self.node.node().entry().unwrap();
        pair
    }
}

impl<K, V, R: Reclaim> Clone for Entry<'_, K, V, R> {
    fn clone(&self) -> Self {
        Self {
            node:  self.node.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<K: Debug, V: Debug, R: Reclaim> Debug for Entry<'_, K, V, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Entry")
            .field("key", self.key())
            .field("value", self.value())
            .finish()
    }
}


/// An iterator over the entries of a [`SkipMap`], in ascending order of keys.
///
/// Entries inserted or erased concurrently with the iteration may or may not be yielded, but
/// every yielded entry orders after the previous one.
///
/// [`SkipMap`]: crate::SkipMap
pub struct Iter<'a, K, V, R: Reclaim = RefCounted>
where
    R: 'a,
{
    cursor: Cursor<'a, K, V, R>,
}

impl<'a, K, V, R: Reclaim> Iter<'a, K, V, R> {
    #[inline]
    #[must_use]
    pub(crate) const fn new(cursor: Cursor<'a, K, V, R>) -> Self {
        Self { cursor }
    }
}

impl<'a, K, V, R: Reclaim> Iterator for Iter<'a, K, V, R> {
    type Item = Entry<'a, K, V, R>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.cursor.to_entry()?;
        self.cursor.advance();
        Some(entry)
    }
}

impl<K, V, R: Reclaim> FusedIterator for Iter<'_, K, V, R> {}

impl<K, V, R: Reclaim> Clone for Iter<'_, K, V, R> {
    fn clone(&self) -> Self {
        Self { cursor: self.cursor.clone() }
    }
}

impl<K: Debug, V: Debug, R: Reclaim> Debug for Iter<'_, K, V, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Iter")
            .field("cursor", &self.cursor)
            .finish()
    }
}


/// An iterator over the entries of a [`SkipMap`] whose keys lie in a range, in ascending order
/// of keys.
///
/// [`SkipMap`]: crate::SkipMap
pub struct Range<'a, K, V, R: Reclaim, Cmp, B>
where
    R: 'a,
{
    cursor: Cursor<'a, K, V, R>,
    cmp:    &'a Cmp,
    bounds: B,
}

impl<'a, K, V, R, Cmp, B> Range<'a, K, V, R, Cmp, B>
where
    R:   Reclaim,
    Cmp: Comparator<K>,
    B:   RangeBounds<K>,
{
    /// `cursor` should be at the first entry within the lower bound of `bounds`.
    #[inline]
    #[must_use]
    pub(crate) const fn new(cursor: Cursor<'a, K, V, R>, cmp: &'a Cmp, bounds: B) -> Self {
        Self { cursor, cmp, bounds }
    }

    fn below_upper_bound(&self, key: &K) -> bool {
        match self.bounds.end_bound() {
            Bound::Included(end) => self.cmp.cmp(key, end).is_le(),
            Bound::Excluded(end) => self.cmp.cmp(key, end).is_lt(),
            Bound::Unbounded     => true,
        }
    }
}

impl<'a, K, V, R, Cmp, B> Iterator for Range<'a, K, V, R, Cmp, B>
where
    R:   Reclaim,
    Cmp: Comparator<K>,
    B:   RangeBounds<K>,
{
    type Item = Entry<'a, K, V, R>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.cursor.to_entry()?;

        if self.below_upper_bound(entry.key()) {
            self.cursor.advance();
            Some(entry)
        } else {
            self.cursor.reset();
            None
        }
    }
}

impl<K, V, R, Cmp, B> FusedIterator for Range<'_, K, V, R, Cmp, B>
where
    R:   Reclaim,
    Cmp: Comparator<K>,
    B:   RangeBounds<K>,
{}

impl<K, V, R, Cmp, B> Debug for Range<'_, K, V, R, Cmp, B>
where
    K: Debug,
    V: Debug,
    R: Reclaim,
    B: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Range")
            .field("cursor", &self.cursor)
            .field("bounds", &self.bounds)
            .finish_non_exhaustive()
    }
}
