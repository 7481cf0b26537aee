//! Concurrent ordered maps backed by skiplists.
//!
//! A [`SkipMap`] can be read and modified by many threads at once, without a global lock.
//! Insertions and erasures lock only the few nodes adjacent to the modified entry, and lookups
//! and iteration take no locks at all.
//!
//! Lookups return [`Cursor`]s, which keep the entry they refer to alive even if it is
//! concurrently erased. How long erased entries are kept alive is decided by the map's
//! reclamation backend, chosen through its type:
//! - [`BlockingSkipMap`] (with the [`RefCounted`] backend) waits in `erase` until no cursor is
//!   on the erased entry, and frees it as soon as nothing references it.
//! - [`LazySkipMap`] (with the [`Epoch`] backend) never waits in `erase`, and frees erased
//!   entries in batches once no cursor could still reference them.
//!
//! ```
//! use anchored_skipmap::LazySkipMap;
//!
//! let map = LazySkipMap::new();
//! std::thread::scope(|scope| {
//!     for thread in 0..4_u32 {
//!         let map = &map;
//!         scope.spawn(move || {
//!             for key in (thread * 100)..(thread * 100 + 100) {
//!                 map.insert(key, key * 10);
//!             }
//!         });
//!     }
//! });
//!
//! assert_eq!(map.len(), 400);
//! assert_eq!(map.get(&123), Some(1230));
//! assert!(map.erase(&123));
//! assert!(map.find(&123).is_end());
//! ```

#![cfg_attr(test, allow(unused_crate_dependencies, reason = "`loom` is only used with cfg"))]

mod comparator;
mod cursor;
mod list_inner;
mod map;
mod node;
mod node_heights;
mod options;
mod reclaim;


mod maybe_loom;


pub use self::{
    comparator::{Comparator, FromLess, OrdComparator},
    cursor::{Cursor, Entry, Iter, Range},
    map::{BlockingSkipMap, LazySkipMap, SkipMap},
    node_heights::{DEFAULT_BRANCHING_FACTOR, DEFAULT_MAX_HEIGHT, MAX_SUPPORTED_HEIGHT},
    options::{DEFAULT_SWEEP_THRESHOLD, OptionsError, SkipMapOptions},
    reclaim::{Epoch, EpochGuard, EpochStamp, Reclaim, RefCounted, RefStamp},
};
