//! Elapsed-time accumulator for the problem being worked on.
//!
//! Time is counted in whole seconds. `stop` folds the running interval into
//! the total; `time_spent` reads total + running interval without mutating.

use std::time::Instant;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ElapsedTimer {
  started_at: Option<Instant>,
  accumulated_secs: u64,
}

impl ElapsedTimer {
  pub fn is_running(&self) -> bool {
    self.started_at.is_some()
  }

  /// Starting an already running timer keeps the original start instant.
  pub fn start(&mut self, now: Instant) {
    if self.started_at.is_none() {
      self.started_at = Some(now);
    }
  }

  pub fn stop(&mut self, now: Instant) {
    if let Some(start) = self.started_at.take() {
      self.accumulated_secs += whole_secs(start, now);
    }
  }

  pub fn reset(&mut self) {
    self.started_at = None;
    self.accumulated_secs = 0;
  }

  /// Clear the total and start counting again from `now`.
  pub fn restart(&mut self, now: Instant) {
    self.reset();
    self.start(now);
  }

  pub fn time_spent(&self, now: Instant) -> u64 {
    let running = self.started_at.map(|s| whole_secs(s, now)).unwrap_or(0);
    self.accumulated_secs + running
  }
}

fn whole_secs(start: Instant, now: Instant) -> u64 {
  now.saturating_duration_since(start).as_secs()
}
