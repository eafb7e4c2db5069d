//! High-level randomization helpers.
//!
//! Vulnerability selection, OR-dependency choice, and conflict
//! tie-breaking are all randomized. Wrapping the generator here keeps
//! every source of non-determinism behind one seedable handle so tests
//! can pin the whole selection sequence.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A seedable random source for selection decisions.
#[derive(Debug, Clone)]
pub struct HavocRng {
    inner: StdRng,
}

impl HavocRng {
    /// An OS-seeded generator.
    pub fn new() -> Self {
        Self {
            inner: StdRng::from_os_rng(),
        }
    }

    /// A deterministic generator for tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: StdRng::seed_from_u64(seed),
        }
    }

    /// Random integer in `start..=end`.
    pub fn number(&mut self, start: usize, end: usize) -> usize {
        self.inner.random_range(start..=end)
    }

    /// A single random element of `items`, or `None` when empty.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            None
        } else {
            let index = self.number(0, items.len() - 1);
            Some(&items[index])
        }
    }

    /// Fair coin flip, used to decide whether something will be done.
    pub fn will_do(&mut self) -> bool {
        self.inner.random_bool(0.5)
    }

    /// Random ASCII-letter string with length in `min..=max`.
    pub fn string(&mut self, min: usize, max: usize) -> String {
        let length = self.number(min, max);
        (0..length)
            .map(|_| {
                let offset = self.number(0, 51);
                if offset < 26 {
                    (b'a' + offset as u8) as char
                } else {
                    (b'A' + (offset - 26) as u8) as char
                }
            })
            .collect()
    }
}

impl Default for HavocRng {
    fn default() -> Self {
        Self::new()
    }
}
