//! Choice of the point re-read after each upsert.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};

/// Picks which document of a written batch to verify.
pub trait VerifySelector: Send + Sync {
    /// Index in `0..len`, or `None` to skip verification.
    fn pick(&self, len: usize) -> Option<usize>;
}

/// Uniform random selection backed by [`StdRng`].
#[derive(Debug)]
pub struct RandomVerifySelector {
    rng: Mutex<StdRng>,
}

impl RandomVerifySelector {
    /// Seeded from `seed` when given, otherwise from OS entropy.
    #[must_use]
    pub fn from_seed(seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        Self {
            rng: Mutex::new(rng),
        }
    }
}

impl VerifySelector for RandomVerifySelector {
    fn pick(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Some(rng.random_range(0..len))
    }
}

/// Always verifies the first document of a batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstVerifySelector;

impl VerifySelector for FirstVerifySelector {
    fn pick(&self, len: usize) -> Option<usize> {
        (len > 0).then_some(0)
    }
}
