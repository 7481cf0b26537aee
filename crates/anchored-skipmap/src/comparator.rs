use std::cmp::Ordering;


/// Interface for comparing the keys of a [`SkipMap`].
///
/// The comparison must be a total order over every key inserted into one map (in particular, it
/// must be transitive, and `cmp(a, b)` must be the reverse of `cmp(b, a)`). A comparator which
/// violates this does not cause memory unsafety, but the order of traversal, and whether keys can
/// be found at all, become unspecified.
///
/// Any closure of type `Fn(&K, &K) -> Ordering` is a `Comparator`.
///
/// [`SkipMap`]: crate::SkipMap
pub trait Comparator<K: ?Sized> {
    /// Compare two keys of a [`SkipMap`].
    ///
    /// [`SkipMap`]: crate::SkipMap
    #[must_use]
    fn cmp(&self, lhs: &K, rhs: &K) -> Ordering;
}

impl<K: ?Sized, F: Fn(&K, &K) -> Ordering> Comparator<K> for F {
    #[inline]
    fn cmp(&self, lhs: &K, rhs: &K) -> Ordering {
        self(lhs, rhs)
    }
}

/// A [`Comparator`] which uses the [`Ord`] implementation of the key type.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrdComparator;

impl<K: ?Sized + Ord> Comparator<K> for OrdComparator {
    /// Equivalent to `Ord::cmp(lhs, rhs)`.
    #[inline]
    fn cmp(&self, lhs: &K, rhs: &K) -> Ordering {
        Ord::cmp(lhs, rhs)
    }
}

/// A [`Comparator`] built from nothing but a strict "less than" predicate.
///
/// Two keys are considered equal when neither is less than the other.
#[derive(Default, Debug, Clone, Copy)]
pub struct FromLess<F>(pub F);

impl<K: ?Sized, F: Fn(&K, &K) -> bool> Comparator<K> for FromLess<F> {
    fn cmp(&self, lhs: &K, rhs: &K) -> Ordering {
        if (self.0)(lhs, rhs) {
            Ordering::Less
        } else if (self.0)(rhs, lhs) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }
}
