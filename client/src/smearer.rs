//! Multiplicative jitter for periodic delays.

use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Randomizes a delay uniformly within a fraction of its nominal value, so
/// that periodic work across a fleet of clients does not synchronize.
///
/// Each smearer owns its random source; sharing one across components would
/// couple their test determinism.
pub struct Smearer {
    rng: SmallRng,
    smear_fraction: f64,
}

impl Smearer {
    /// Default smearing applied when the caller does not specify a fraction.
    pub const DEFAULT_SMEAR_FRACTION: f64 = 0.2;

    /// Creates a smearer with an entropy-seeded random source.
    ///
    /// # Panics
    /// Panics if `smear_fraction` is outside `[0, 1]`.
    pub fn new(smear_fraction: f64) -> Self {
        Self::from_rng(SmallRng::from_entropy(), smear_fraction)
    }

    /// Creates a smearer with the given random source, for deterministic
    /// tests.
    ///
    /// # Panics
    /// Panics if `smear_fraction` is outside `[0, 1]`.
    pub fn from_rng(rng: SmallRng, smear_fraction: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&smear_fraction),
            "smear fraction must be within [0, 1]: given {}",
            smear_fraction
        );
        Self {
            rng,
            smear_fraction,
        }
    }

    /// Given a delay `d`, returns a uniform sample from
    /// `[d * (1 - f), d * (1 + f)]` where `f` is the smear fraction.
    pub fn smear(&mut self, delay: Duration) -> Duration {
        // 2r - 1 gives a number in [-1, 1].
        let applied = self.smear_fraction * (2.0 * self.rng.gen::<f64>() - 1.0);
        Duration::from_secs_f64((delay.as_secs_f64() * (1.0 + applied)).max(0.0))
    }
}
