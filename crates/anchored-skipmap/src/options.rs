use thiserror::Error;
use tracing::Level as LogLevel;

use crate::node_heights::{DEFAULT_BRANCHING_FACTOR, DEFAULT_MAX_HEIGHT, MAX_SUPPORTED_HEIGHT};


/// Used when the operating system's randomness source is unavailable.
const FALLBACK_SEED: u64 = 0x5EED_5EED_0BAD_CAFE;

/// The default number of retired nodes which triggers a sweep in the [`Epoch`] backend.
///
/// [`Epoch`]: crate::Epoch
pub const DEFAULT_SWEEP_THRESHOLD: usize = 64;


/// Construction-time settings of a [`SkipMap`].
///
/// None of these settings affect correctness; they trade memory for speed.
///
/// [`SkipMap`]: crate::SkipMap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipMapOptions {
    /// The maximum number of levels in a node's tower. Must be in `1..=MAX_SUPPORTED_HEIGHT`.
    pub max_height:       usize,
    /// A new node grows one level taller with probability `1 / branching_factor`.
    /// Must be at least `2`.
    pub branching_factor: u32,
    /// The seed of the prng which chooses node heights. If `None`, a seed is taken from the
    /// operating system.
    pub seed:             Option<u64>,
    /// Only used by the [`Epoch`] backend: once this many nodes are waiting to be freed, the
    /// thread which retired the last of them attempts to free them. Must be nonzero.
    ///
    /// [`Epoch`]: crate::Epoch
    pub sweep_threshold:  usize,
}

impl Default for SkipMapOptions {
    #[inline]
    fn default() -> Self {
        Self {
            max_height:       DEFAULT_MAX_HEIGHT,
            branching_factor: DEFAULT_BRANCHING_FACTOR,
            seed:             None,
            sweep_threshold:  DEFAULT_SWEEP_THRESHOLD,
        }
    }
}

impl SkipMapOptions {
    /// Confirm that every setting is in its permitted range.
    pub const fn validate(&self) -> Result<(), OptionsError> {
        if self.max_height == 0 || self.max_height > MAX_SUPPORTED_HEIGHT {
            return Err(OptionsError::MaxHeight(self.max_height));
        }
        if self.branching_factor < 2 {
            return Err(OptionsError::BranchingFactor(self.branching_factor));
        }
        if self.sweep_threshold == 0 {
            return Err(OptionsError::SweepThreshold);
        }
        Ok(())
    }

    /// The configured seed, or a random one.
    #[must_use]
    pub(crate) fn resolve_seed(&self) -> u64 {
        if let Some(seed) = self.seed {
            return seed;
        }

        match getrandom::u64() {
            Ok(seed) => seed,
            Err(err) => {
                tracing::event!(
                    LogLevel::DEBUG,
                    "could not seed skipmap prng from the OS, using a fixed seed: {err}",
                );
                FALLBACK_SEED
            }
        }
    }
}

/// A [`SkipMapOptions`] setting was outside of its permitted range.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionsError {
    #[error("max_height must be in 1..={max}, but was {0}", max = MAX_SUPPORTED_HEIGHT)]
    MaxHeight(usize),
    #[error("branching_factor must be at least 2, but was {0}")]
    BranchingFactor(u32),
    #[error("sweep_threshold must be nonzero")]
    SweepThreshold,
}
