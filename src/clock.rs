//! Monotonic time source injected into the stores.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
  fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> Instant {
    Instant::now()
  }
}

/// Clock that only moves when told to. Used by tests and replays.
#[derive(Clone, Debug)]
pub struct ManualClock {
  base: Instant,
  offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
  pub fn new() -> Self {
    Self { base: Instant::now(), offset: Arc::new(Mutex::new(Duration::ZERO)) }
  }

  pub fn advance(&self, by: Duration) {
    let mut offset = self.offset.lock().unwrap_or_else(|p| p.into_inner());
    *offset += by;
  }

  pub fn advance_secs(&self, secs: u64) {
    self.advance(Duration::from_secs(secs));
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for ManualClock {
  fn now(&self) -> Instant {
    let offset = *self.offset.lock().unwrap_or_else(|p| p.into_inner());
    self.base + offset
  }
}
