//! Sliding-window submission deduplication.
//!
//! Double-taps from the game UI (and impatient page refreshes) resend the
//! same `(player, score, difficulty)` triple within seconds. A repeat inside
//! the window is rejected as a duplicate rather than queued; keys are
//! recorded only for accepted submissions so a `Busy` rejection never
//! poisons a later retry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::job::Submission;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    player_id: String,
    score: u32,
    difficulty: u8,
}

impl From<&Submission> for DedupKey {
    fn from(submission: &Submission) -> Self {
        Self {
            player_id: submission.player_id.clone(),
            score: submission.score,
            difficulty: submission.difficulty,
        }
    }
}

#[derive(Debug)]
pub struct DedupWindow {
    window: Duration,
    seen: HashMap<DedupKey, Instant>,
}

impl DedupWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    /// Whether an equal key was accepted within the window.
    pub fn is_duplicate(&self, key: &DedupKey) -> bool {
        self.is_duplicate_at(key, Instant::now())
    }

    /// Record an accepted submission at the current instant.
    pub fn record(&mut self, key: DedupKey) {
        self.record_at(key, Instant::now());
    }

    fn is_duplicate_at(&self, key: &DedupKey, now: Instant) -> bool {
        self.seen
            .get(key)
            .is_some_and(|&seen_at| now.duration_since(seen_at) < self.window)
    }

    fn record_at(&mut self, key: DedupKey, now: Instant) {
        let window = self.window;
        self.seen
            .retain(|_, &mut seen_at| now.duration_since(seen_at) < window);
        self.seen.insert(key, now);
    }
}
