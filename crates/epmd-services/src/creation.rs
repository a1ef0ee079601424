//! Creation numbers: tell successive incarnations of a node name apart.

use std::sync::atomic::{AtomicU16, Ordering};

/// Hands out creation values in `1..=65535`, never 0.
///
/// Seeded randomly so a restarted daemon does not hand a returning node the
/// creation it had before the restart.
#[derive(Debug)]
pub struct CreationCounter {
    next: AtomicU16,
}

impl CreationCounter {
    pub fn new() -> Self {
        Self::starting_at(rand::random::<u16>())
    }

    /// Deterministic start, 0 is bumped to 1.
    pub fn starting_at(seed: u16) -> Self {
        Self {
            next: AtomicU16::new(seed.max(1)),
        }
    }

    pub fn next(&self) -> u16 {
        loop {
            let value = self.next.fetch_add(1, Ordering::Relaxed);
            if value != 0 {
                return value;
            }
        }
    }
}

impl Default for CreationCounter {
    fn default() -> Self {
        Self::new()
    }
}
