//! Structural Hashing
//!
//! This module derives a [`Fingerprint`] for a feature from its declared
//! inputs. Two features with the same fingerprint are considered
//! structurally interchangeable, which is what lets the content cache reuse
//! one computed shape for both.
//!
//! # Algorithm
//!
//! Every value fed to a [`HashAccumulator`] is first hashed on its own with
//! XXH3 (fixed seed), then folded into the running state with the
//! golden-ratio hash-combine:
//!
//! ```text
//! acc ^= h + 0x9e3779b97f4a7c15 + (acc << 6) + (acc >> 2)
//! ```
//!
//! # Stability
//!
//! Strings, fingerprints and floating-point values (including points and
//! transforms) fold the same on every platform. Integers go through their
//! standard `Hash` impl, which writes native-endian bytes, and `usize` follows
//! the pointer width, so fingerprints over integer inputs are only stable
//! between builds for the same target.
//!
//! # Order
//!
//! The fold is order-dependent. `combine(a); combine(b)` and
//! `combine(b); combine(a)` give different results, so an asymmetric
//! operation such as `cut(a, b)` is never conflated with `cut(b, a)`.

mod geometry;

pub use geometry::{Point3, Scalar, Transform};

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

/// Fractional part of the golden ratio, scaled to 64 bits.
const GOLDEN_RATIO: u64 = 0x9e37_79b9_7f4a_7c15;

/// Structural hash of a feature: its type plus its ordered inputs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Wrap a raw hash value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw hash value.
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Fingerprint {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:016x})", self.0)
    }
}

/// Streaming, order-dependent combiner producing a [`Fingerprint`].
///
/// # Example
///
/// ```rust
/// use facet_core::hash::HashAccumulator;
///
/// let mut acc = HashAccumulator::new();
/// acc.combine("Sphere").combine_f64(1.5);
/// let fingerprint = acc.finish();
///
/// let mut again = HashAccumulator::new();
/// again.combine("Sphere").combine_f64(1.5);
/// assert_eq!(again.finish(), fingerprint);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashAccumulator {
    acc: u64,
}

impl HashAccumulator {
    /// Create an accumulator with the fixed seed `0`.
    pub fn new() -> Self {
        Self { acc: 0 }
    }

    /// Fold any hashable value.
    pub fn combine<T: Hash + ?Sized>(&mut self, value: &T) -> &mut Self {
        let mut hasher = Xxh3::new();
        value.hash(&mut hasher);
        self.mix(hasher.finish())
    }

    /// Fold a double. `-0.0` and `0.0` contribute the same value, as do all NaNs.
    pub fn combine_f64(&mut self, value: f64) -> &mut Self {
        self.combine(&Scalar(value))
    }

    /// Fold the fingerprint of an upstream feature.
    pub fn combine_fingerprint(&mut self, fingerprint: Fingerprint) -> &mut Self {
        self.mix(fingerprint.raw())
    }

    /// The current running state as a fingerprint.
    ///
    /// The accumulator stays usable; further `combine` calls keep folding.
    pub fn finish(&self) -> Fingerprint {
        Fingerprint(self.acc)
    }

    fn mix(&mut self, h: u64) -> &mut Self {
        self.acc ^= h
            .wrapping_add(GOLDEN_RATIO)
            .wrapping_add(self.acc << 6)
            .wrapping_add(self.acc >> 2);
        self
    }
}
