//! Fixed-capacity inference cache with pluggable eviction.

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::entry::{CacheEntry, InferenceResult};
use super::patterns::AccessPatterns;
use super::strategy::EvictionStrategy;
use crate::model::ModelKind;

/// Snapshot of cache counters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
  pub hit_rate: f64,
  pub total_hits: u64,
  pub total_misses: u64,
  pub strategy: EvictionStrategy,
  /// Live (unexpired) entries
  pub cache_size: usize,
  pub capacity: usize,
  pub total_evictions: u64,
  pub total_expired: u64,
  pub tracked_owners: usize,
  pub entries_by_kind: BTreeMap<ModelKind, usize>,
}

#[derive(Debug, Default)]
struct CacheState {
  entries: HashMap<String, CacheEntry>,
  patterns: AccessPatterns,
  tick: u64,
  hits: u64,
  misses: u64,
  evictions: u64,
  expired: u64,
}

impl CacheState {
  fn next_tick(&mut self) -> u64 {
    self.tick += 1;
    self.tick
  }

  fn oldest_expired(&self) -> Option<String> {
    let now = Utc::now();
    self
      .entries
      .values()
      .filter(|e| e.is_expired(now))
      .min_by_key(|e| e.tick)
      .map(|e| e.key.clone())
  }
}

/// Key/value store over inference results.
///
/// All state sits behind a single mutex, so a capacity-triggered eviction and
/// the insert that caused it happen atomically, as do counter updates.
#[derive(Debug)]
pub struct IntelligentCache {
  capacity: NonZeroUsize,
  strategy: EvictionStrategy,
  ttl_overrides: HashMap<ModelKind, Duration>,
  state: Mutex<CacheState>,
}

impl IntelligentCache {
  pub fn new(capacity: NonZeroUsize, strategy: EvictionStrategy) -> Self {
    Self {
      capacity,
      strategy,
      ttl_overrides: HashMap::new(),
      state: Mutex::new(CacheState::default()),
    }
  }

  /// Override the default TTL for one model kind.
  pub fn with_ttl(mut self, kind: ModelKind, ttl: Duration) -> Self {
    self.ttl_overrides.insert(kind, ttl);
    self
  }

  pub fn strategy(&self) -> EvictionStrategy {
    self.strategy
  }

  pub fn capacity(&self) -> usize {
    self.capacity.get()
  }

  /// TTL applied to `kind` when `put` is not given one.
  pub fn ttl_for(&self, kind: ModelKind) -> Duration {
    self
      .ttl_overrides
      .get(&kind)
      .copied()
      .unwrap_or_else(|| kind.default_ttl())
  }

  fn state(&self) -> MutexGuard<'_, CacheState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Look up `key` on behalf of `owner_id`.
  pub fn get(&self, key: &str, owner_id: &str) -> Option<Value> {
    self.lookup(key, owner_id).map(|r| r.value)
  }

  /// Like [`get`](Self::get), but also reports when the value was computed.
  pub fn lookup(&self, key: &str, owner_id: &str) -> Option<InferenceResult> {
    let mut state = self.state();
    let tick = state.next_tick();
    state.patterns.record(owner_id, key);

    let now = Utc::now();
    let expired = match state.entries.get(key) {
      None => {
        state.misses += 1;
        debug!(key, "cache miss");
        return None;
      }
      Some(entry) => entry.is_expired(now),
    };

    if expired {
      state.entries.remove(key);
      state.expired += 1;
      state.misses += 1;
      debug!(key, "cache entry expired");
      return None;
    }

    let result = match state.entries.get_mut(key) {
      Some(entry) if entry.visible_to(owner_id) => {
        entry.touch(tick);
        Some(InferenceResult::from_cache(entry.value.clone(), entry.created_at))
      }
      _ => None,
    };

    if result.is_some() {
      state.hits += 1;
    } else {
      state.misses += 1;
      debug!(key, owner_id, "cache entry belongs to another owner");
    }
    result
  }

  /// Store a result. Returns the key evicted to make room, if any.
  ///
  /// Overwriting an existing key never evicts. At capacity, an expired entry
  /// is reclaimed first; otherwise the strategy picks exactly one victim.
  pub fn put(
    &self,
    key: &str,
    value: Value,
    model_kind: ModelKind,
    owner_id: &str,
    ttl: Option<Duration>,
  ) -> Option<String> {
    let ttl = ttl.unwrap_or_else(|| self.ttl_for(model_kind));
    let mut state = self.state();
    let tick = state.next_tick();

    let mut evicted = None;
    if !state.entries.contains_key(key) && state.entries.len() >= self.capacity.get() {
      if let Some(victim) = state.oldest_expired() {
        state.entries.remove(&victim);
        state.expired += 1;
        debug!(key = %victim, "reclaimed expired entry");
        evicted = Some(victim);
      } else if let Some(victim) = self.strategy.choose_victim(&state.entries, &state.patterns) {
        state.entries.remove(&victim);
        state.evictions += 1;
        debug!(key = %victim, strategy = %self.strategy, "evicted entry");
        evicted = Some(victim);
      }
    }

    let entry = CacheEntry::new(
      key.to_string(),
      value,
      model_kind,
      owner_id.to_string(),
      ttl,
      tick,
    );
    state.entries.insert(key.to_string(), entry);
    evicted
  }

  /// Remove every expired entry. Returns how many were removed.
  pub fn sweep_expired(&self) -> usize {
    let mut state = self.state();
    let now = Utc::now();
    let before = state.entries.len();
    state.entries.retain(|_, e| !e.is_expired(now));
    let removed = before - state.entries.len();
    state.expired += removed as u64;
    removed
  }

  /// Drop everything cached for one owner, along with their access history.
  pub fn invalidate_owner(&self, owner_id: &str) -> usize {
    let mut state = self.state();
    let before = state.entries.len();
    state.entries.retain(|_, e| e.owner_id != owner_id);
    state.patterns.remove_owner(owner_id);
    before - state.entries.len()
  }

  pub fn clear(&self) {
    let mut state = self.state();
    state.entries.clear();
    state.patterns.clear();
  }

  /// Physically resident entries, expired or not.
  pub fn len(&self) -> usize {
    self.state().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn contains(&self, key: &str) -> bool {
    self.state().entries.contains_key(key)
  }

  pub fn stats(&self) -> CacheStats {
    let state = self.state();
    let now = Utc::now();
    let total = state.hits + state.misses;
    let hit_rate = if total == 0 {
      0.0
    } else {
      state.hits as f64 / total as f64
    };

    let mut entries_by_kind = BTreeMap::new();
    let mut cache_size = 0;
    for entry in state.entries.values().filter(|e| !e.is_expired(now)) {
      cache_size += 1;
      *entries_by_kind.entry(entry.model_kind).or_insert(0) += 1;
    }

    CacheStats {
      hit_rate,
      total_hits: state.hits,
      total_misses: state.misses,
      strategy: self.strategy,
      cache_size,
      capacity: self.capacity.get(),
      total_evictions: state.evictions,
      total_expired: state.expired,
      tracked_owners: state.patterns.tracked_owners(),
      entries_by_kind,
    }
  }
}
