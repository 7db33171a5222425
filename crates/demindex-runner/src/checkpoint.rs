//! When to write backup bundles.

use crate::config::CheckpointConfig;
use std::time::{Duration, Instant};

/// Decides when a region's progress is bundled.
///
/// A bundle is due after every `every_tiles` attempted tiles, and, when a
/// period is configured, once that much time passed since the last bundle.
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    every_tiles: usize,
    every: Option<Duration>,
    last: Instant,
}

impl CheckpointPolicy {
    pub fn new(config: &CheckpointConfig) -> Self {
        Self {
            every_tiles: config.every_tiles.max(1),
            every: config.every_secs.map(Duration::from_secs),
            last: Instant::now(),
        }
    }

    /// Whether a bundle is due after `attempted` tiles, at time `now`.
    pub fn is_due(&self, attempted: usize, now: Instant) -> bool {
        if attempted == 0 {
            return false;
        }
        attempted % self.every_tiles == 0
            || self
                .every
                .is_some_and(|every| now.saturating_duration_since(self.last) >= every)
    }

    /// Record that a bundle was written at `now`.
    pub fn mark(&mut self, now: Instant) {
        self.last = now;
    }
}
