//! Eviction strategies.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::entry::CacheEntry;
use super::patterns::AccessPatterns;

/// Below this many recorded accesses (summed over the owners of resident
/// entries) the predictive strategy behaves like LRU.
pub const MIN_PREDICTIVE_SAMPLES: u64 = 10;

const HYBRID_RECENCY_WEIGHT: f64 = 0.6;
const HYBRID_FREQUENCY_WEIGHT: f64 = 0.4;

/// How the cache picks a victim when a write arrives at capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
  /// Evict the least recently accessed entry
  Lru,
  /// Evict the least frequently accessed entry, oldest access first on ties
  Lfu,
  /// Evict the entry its owner is least likely to ask for again
  Predictive,
  /// Weighted blend of recency and frequency
  #[default]
  Hybrid,
}

impl EvictionStrategy {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Lru => "lru",
      Self::Lfu => "lfu",
      Self::Predictive => "predictive",
      Self::Hybrid => "hybrid",
    }
  }

  /// Pick the key to evict from `entries`. Returns `None` only when there is
  /// nothing to evict.
  pub fn choose_victim(
    self,
    entries: &HashMap<String, CacheEntry>,
    patterns: &AccessPatterns,
  ) -> Option<String> {
    match self {
      Self::Lru => least_recent(entries),
      Self::Lfu => entries
        .values()
        .min_by_key(|e| (e.access_count, e.tick))
        .map(|e| e.key.clone()),
      Self::Predictive => predictive(entries, patterns),
      Self::Hybrid => hybrid(entries),
    }
  }
}

fn least_recent(entries: &HashMap<String, CacheEntry>) -> Option<String> {
  entries.values().min_by_key(|e| e.tick).map(|e| e.key.clone())
}

fn predictive(entries: &HashMap<String, CacheEntry>, patterns: &AccessPatterns) -> Option<String> {
  let mut owners: Vec<&str> = entries.values().map(|e| e.owner_id.as_str()).collect();
  owners.sort_unstable();
  owners.dedup();
  let samples: u64 = owners.iter().map(|o| patterns.samples(o)).sum();
  if samples < MIN_PREDICTIVE_SAMPLES {
    return least_recent(entries);
  }

  entries
    .values()
    .map(|e| (patterns.reuse_probability(&e.owner_id, &e.key), e))
    .min_by(|(pa, a), (pb, b)| by_score_then_tick(*pa, a, *pb, b))
    .map(|(_, e)| e.key.clone())
}

fn hybrid(entries: &HashMap<String, CacheEntry>) -> Option<String> {
  let min_tick = entries.values().map(|e| e.tick).min()?;
  let max_tick = entries.values().map(|e| e.tick).max()?;
  let max_count = entries.values().map(|e| e.access_count).max()?;

  let score = |e: &CacheEntry| {
    let recency = if max_tick == min_tick {
      1.0
    } else {
      (e.tick - min_tick) as f64 / (max_tick - min_tick) as f64
    };
    let frequency = if max_count == 0 {
      0.0
    } else {
      e.access_count as f64 / max_count as f64
    };
    HYBRID_RECENCY_WEIGHT * recency + HYBRID_FREQUENCY_WEIGHT * frequency
  };

  entries
    .values()
    .map(|e| (score(e), e))
    .min_by(|(sa, a), (sb, b)| by_score_then_tick(*sa, a, *sb, b))
    .map(|(_, e)| e.key.clone())
}

fn by_score_then_tick(sa: f64, a: &CacheEntry, sb: f64, b: &CacheEntry) -> Ordering {
  sa.total_cmp(&sb).then(a.tick.cmp(&b.tick))
}

impl fmt::Display for EvictionStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for EvictionStrategy {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().as_str() {
      "lru" => Ok(Self::Lru),
      "lfu" => Ok(Self::Lfu),
      "predictive" => Ok(Self::Predictive),
      "hybrid" => Ok(Self::Hybrid),
      other => Err(eyre!("Unknown eviction strategy: {}", other)),
    }
  }
}
