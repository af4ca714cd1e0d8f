//! ChaCha8-backed generator

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use super::RandomNumberGenerator;

/// Default generator: a seeded ChaCha8 stream
///
/// # Example
///
/// ```rust
/// use krepis_interleave::domain::random::{DefaultRandomNumberGenerator, RandomNumberGenerator};
///
/// let mut a = DefaultRandomNumberGenerator::new(42);
/// let mut b = DefaultRandomNumberGenerator::new(42);
///
/// assert_eq!(a.next_bounded(100), b.next_bounded(100));
/// assert_eq!(a.next_bounded(0), 0);
/// ```
#[derive(Debug, Clone)]
pub struct DefaultRandomNumberGenerator {
    seed: u64,
    rng: ChaCha8Rng,
}

impl DefaultRandomNumberGenerator {
    /// Create a generator seeded with `seed`
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl RandomNumberGenerator for DefaultRandomNumberGenerator {
    fn seed(&self) -> u64 {
        self.seed
    }

    fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    fn next_bounded(&mut self, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        self.rng.random_range(0..max)
    }

    fn next_double(&mut self) -> f64 {
        self.rng.random::<f64>()
    }
}
