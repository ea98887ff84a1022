//! Owned randomness source
//!
//! Token ids, key ids and generated keys draw from an explicitly constructed
//! [`RandomSource`] instead of a process-wide generator. Seed it in tests to get
//! reproducible identifiers.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use uuid::Uuid;

/// Cryptographically secure, lockable random number generator
#[derive(Debug)]
pub struct RandomSource {
    rng: Mutex<StdRng>,
}

impl RandomSource {
    /// Seeded from operating system entropy
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic source for tests
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// UUIDv7 built from `unix_millis` and 74 random bits
    ///
    /// The hyphenated lowercase form sorts lexicographically by timestamp.
    pub fn uuid_v7(&self, unix_millis: u64) -> Uuid {
        let mut random = [0u8; 10];
        self.rng.lock().fill_bytes(&mut random);
        uuid::Builder::from_unix_timestamp_millis(unix_millis, &random).into_uuid()
    }

    /// Run `f` with exclusive access to the generator
    pub(crate) fn with_rng<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        f(&mut self.rng.lock())
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::from_entropy()
    }
}
