//! Per-owner access histograms used by the predictive strategy.

use std::collections::{HashMap, VecDeque};

/// Number of recent accesses kept for prediction.
pub const HISTORY_WINDOW: usize = 1000;

/// Sliding window of `(owner, key)` accesses, with per-owner counts kept in
/// sync as old accesses fall out of the window.
#[derive(Debug)]
pub struct AccessPatterns {
  history: VecDeque<(String, String)>,
  owners: HashMap<String, OwnerHistogram>,
  window: usize,
}

#[derive(Debug, Default)]
struct OwnerHistogram {
  total: u64,
  keys: HashMap<String, u64>,
}

impl Default for AccessPatterns {
  fn default() -> Self {
    Self::new()
  }
}

impl AccessPatterns {
  pub fn new() -> Self {
    Self::with_window(HISTORY_WINDOW)
  }

  pub fn with_window(window: usize) -> Self {
    Self {
      history: VecDeque::with_capacity(window.min(HISTORY_WINDOW)),
      owners: HashMap::new(),
      window: window.max(1),
    }
  }

  /// Record that `owner` looked up `key`.
  pub fn record(&mut self, owner: &str, key: &str) {
    self.history.push_back((owner.to_string(), key.to_string()));
    let histogram = self.owners.entry(owner.to_string()).or_default();
    histogram.total += 1;
    *histogram.keys.entry(key.to_string()).or_insert(0) += 1;

    while self.history.len() > self.window {
      if let Some((old_owner, old_key)) = self.history.pop_front() {
        self.forget(&old_owner, &old_key);
      }
    }
  }

  fn forget(&mut self, owner: &str, key: &str) {
    let Some(histogram) = self.owners.get_mut(owner) else {
      return;
    };
    histogram.total = histogram.total.saturating_sub(1);
    if let Some(count) = histogram.keys.get_mut(key) {
      *count -= 1;
      if *count == 0 {
        histogram.keys.remove(key);
      }
    }
    if histogram.total == 0 {
      self.owners.remove(owner);
    }
  }

  /// Accesses recorded for `owner` inside the window.
  pub fn samples(&self, owner: &str) -> u64 {
    self.owners.get(owner).map_or(0, |h| h.total)
  }

  /// Estimated probability that `owner`'s next access is `key`.
  pub fn reuse_probability(&self, owner: &str, key: &str) -> f64 {
    match self.owners.get(owner) {
      Some(h) if h.total > 0 => {
        h.keys.get(key).copied().unwrap_or(0) as f64 / h.total as f64
      }
      _ => 0.0,
    }
  }

  /// Drop all history for one owner.
  pub fn remove_owner(&mut self, owner: &str) {
    self.owners.remove(owner);
    self.history.retain(|(o, _)| o != owner);
  }

  /// Owners with at least one access inside the window.
  pub fn tracked_owners(&self) -> usize {
    self.owners.len()
  }

  pub fn clear(&mut self) {
    self.history.clear();
    self.owners.clear();
  }
}
