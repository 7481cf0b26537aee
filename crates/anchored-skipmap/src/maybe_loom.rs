#![expect(unexpected_cfgs, reason = "used for loom tests")]

#[cfg(skipmap_loom)]
pub(crate) use loom::sync::atomic::AtomicBool as AtomicBool;
#[cfg(skipmap_loom)]
pub(crate) use loom::sync::atomic::AtomicPtr as AtomicPtr;
#[cfg(skipmap_loom)]
pub(crate) use loom::sync::atomic::AtomicU64 as AtomicU64;
#[cfg(skipmap_loom)]
pub(crate) use loom::sync::atomic::AtomicUsize as AtomicUsize;
#[cfg(skipmap_loom)]
pub(crate) use self::loom_shim::{Backoff, Mutex, MutexGuard};

#[cfg(not(skipmap_loom))]
pub(crate) use std::sync::atomic::AtomicBool as AtomicBool;
#[cfg(not(skipmap_loom))]
pub(crate) use std::sync::atomic::AtomicPtr as AtomicPtr;
#[cfg(not(skipmap_loom))]
pub(crate) use std::sync::atomic::AtomicU64 as AtomicU64;
#[cfg(not(skipmap_loom))]
pub(crate) use std::sync::atomic::AtomicUsize as AtomicUsize;
#[cfg(not(skipmap_loom))]
pub(crate) use crossbeam_utils::Backoff as Backoff;
#[cfg(not(skipmap_loom))]
pub(crate) use parking_lot::Mutex as Mutex;
#[cfg(not(skipmap_loom))]
pub(crate) use parking_lot::MutexGuard as MutexGuard;


/// Stand-ins for `parking_lot` and `crossbeam_utils` which loom can see through.
///
/// Spinning without yielding to loom's scheduler would never terminate inside `loom::model`.
#[cfg(skipmap_loom)]
mod loom_shim {
    use std::sync::PoisonError;


    #[derive(Debug, Default)]
    pub(crate) struct Mutex<T>(loom::sync::Mutex<T>);

    pub(crate) type MutexGuard<'a, T> = loom::sync::MutexGuard<'a, T>;

    impl<T> Mutex<T> {
        pub(crate) fn new(t: T) -> Self {
            Self(loom::sync::Mutex::new(t))
        }

        pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner)
        }

        pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
            self.0.try_lock().ok()
        }
    }

    #[derive(Debug, Default)]
    pub(crate) struct Backoff;

    impl Backoff {
        pub(crate) const fn new() -> Self {
            Self
        }

        pub(crate) fn snooze(&self) {
            loom::thread::yield_now();
        }
    }
}
