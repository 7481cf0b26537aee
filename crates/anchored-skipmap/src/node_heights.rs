use oorandom::Rand32;

use crate::maybe_loom::Mutex;


/// The default maximum height of the skiplist in a [`SkipMap`].
///
/// With the default branching factor of `4`, one node is generated with this maximum height per
/// approximately 4 million entries inserted into the map (on average).
///
/// [`SkipMap`]: crate::SkipMap
pub const DEFAULT_MAX_HEIGHT: usize = 12;

/// The largest maximum height that a [`SkipMap`] may be configured with.
///
/// [`SkipMap`]: crate::SkipMap
pub const MAX_SUPPORTED_HEIGHT: usize = 32;

/// The default inverse probability of a node being one level taller.
pub const DEFAULT_BRANCHING_FACTOR: u32 = 4;


/// A simple PRNG trait, used for generating random heights for nodes in a skiplist.
pub(crate) trait Prng32 {
    /// Produces a random `u32` in the range `[0, u32::MAX]`.
    ///
    /// (See [`oorandom::Rand32::rand_u32`]; this function is the same interface.)
    #[must_use]
    fn rand_u32(&mut self) -> u32;
}

impl Prng32 for Rand32 {
    #[inline]
    fn rand_u32(&mut self) -> u32 {
        // Inherent impls take priority over traits, so this is the inherent method
        // of `Rand32` a.k.a. `Self`
        Self::rand_u32(self)
    }
}

/// Return a random value in `1..=max_height`, in a geometric distribution (higher values
/// are exponentially less likely).
///
/// The height is increased with probability `1 / branching_factor` at each step. Technically,
/// `max_height` is somewhat more likely than it would be in an exact and unbounded geometric
/// distribution, since what would be higher values are capped to `max_height`.
pub(crate) fn random_node_height<P: Prng32>(
    prng:             &mut P,
    max_height:       usize,
    branching_factor: u32,
) -> usize {
    let mut height = 1;
    while height < max_height && prng.rand_u32() % branching_factor == 0 {
        height += 1;
    }
    height
}

/// Draws node heights for one map.
///
/// The lock is only held while a single height is drawn; it is never held during a traversal
/// or while a node is being linked.
#[derive(Debug)]
pub(crate) struct HeightGenerator {
    prng:             Mutex<Rand32>,
    max_height:       usize,
    branching_factor: u32,
}

#[expect(unreachable_pub, reason = "control visibility at type definition")]
impl HeightGenerator {
    /// The caller should have validated `max_height` and `branching_factor`, as with
    /// [`SkipMapOptions::validate`].
    ///
    /// [`SkipMapOptions::validate`]: crate::SkipMapOptions::validate
    #[must_use]
    pub fn new(seed: u64, max_height: usize, branching_factor: u32) -> Self {
        debug_assert!(
            (1..=MAX_SUPPORTED_HEIGHT).contains(&max_height),
            "max_height should have been validated",
        );
        debug_assert!(branching_factor >= 2, "branching_factor should have been validated");

        Self {
            prng: Mutex::new(Rand32::new(seed)),
            max_height,
            branching_factor,
        }
    }

    #[inline]
    #[must_use]
    pub const fn max_height(&self) -> usize {
        self.max_height
    }

    #[must_use]
    pub fn next_height(&self) -> usize {
        let mut prng = self.prng.lock();
        random_node_height(&mut *prng, self.max_height, self.branching_factor)
    }
}


#[cfg(test)]
mod tests {
    use super::*;


    /// Always produces the same value.
    struct Constant(u32);

    impl Prng32 for Constant {
        fn rand_u32(&mut self) -> u32 {
            self.0
        }
    }

    #[test]
    fn capped_at_max_height() {
        // `0 % n == 0`, so this prng always says to grow taller.
        assert_eq!(random_node_height(&mut Constant(0), 12, 4), 12);
        assert_eq!(random_node_height(&mut Constant(0), 1, 4), 1);
        assert_eq!(random_node_height(&mut Constant(0), MAX_SUPPORTED_HEIGHT, 2), 32);
    }

    #[test]
    fn never_grows() {
        assert_eq!(random_node_height(&mut Constant(1), 12, 4), 1);
        assert_eq!(random_node_height(&mut Constant(3), 12, 2), 1);
    }

    #[test]
    fn roughly_geometric() {
        let generator = HeightGenerator::new(0xDEAD_BEEF, DEFAULT_MAX_HEIGHT, 4);
        let mut counts = [0_u32; DEFAULT_MAX_HEIGHT + 1];

        for _ in 0..40_000 {
            let height = generator.next_height();
            assert!((1..=DEFAULT_MAX_HEIGHT).contains(&height));
            counts[height] += 1;
        }

        // About 3/4 of nodes should have height 1, and about 3/16 should have height 2.
        assert!(counts[1] > 27_000 && counts[1] < 33_000, "{counts:?}");
        assert!(counts[2] > 6_000 && counts[2] < 9_000, "{counts:?}");
        assert!(counts[1] > counts[2] && counts[2] > counts[3], "{counts:?}");
    }

    #[test]
    fn same_seed_same_heights() {
        let first = HeightGenerator::new(42, 8, 2);
        let second = HeightGenerator::new(42, 8, 2);

        for _ in 0..100 {
            assert_eq!(first.next_height(), second.next_height());
        }
    }
}
