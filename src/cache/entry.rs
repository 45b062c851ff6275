//! Cache entries and the results handed back to callers.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::model::ModelKind;

/// A cached inference result.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
  pub key: String,
  pub value: Value,
  pub model_kind: ModelKind,
  /// The user the result was computed for
  pub owner_id: String,
  pub created_at: DateTime<Utc>,
  pub last_accessed_at: DateTime<Utc>,
  pub access_count: u64,
  #[serde(serialize_with = "serialize_ttl")]
  pub ttl: Duration,
  /// Serialized size of `value`
  pub size_bytes: usize,
  /// Monotonic access tick; orders recency even when wall-clock
  /// timestamps collide.
  #[serde(skip)]
  pub(crate) tick: u64,
}

impl CacheEntry {
  pub(crate) fn new(
    key: String,
    value: Value,
    model_kind: ModelKind,
    owner_id: String,
    ttl: Duration,
    tick: u64,
  ) -> Self {
    let now = Utc::now();
    let size_bytes = serde_json::to_vec(&value).map(|v| v.len()).unwrap_or(0);
    Self {
      key,
      value,
      model_kind,
      owner_id,
      created_at: now,
      last_accessed_at: now,
      access_count: 0,
      ttl,
      size_bytes,
      tick,
    }
  }

  /// When this entry stops being served. `None` when the TTL reaches past
  /// the representable range, i.e. never.
  pub fn expires_at(&self) -> Option<DateTime<Utc>> {
    self.created_at.checked_add_signed(self.ttl)
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.expires_at().is_some_and(|at| now >= at)
  }

  /// Whether `owner_id` may read this entry.
  pub fn visible_to(&self, owner_id: &str) -> bool {
    !self.model_kind.is_personalized() || self.owner_id == owner_id
  }

  pub(crate) fn touch(&mut self, tick: u64) {
    self.access_count += 1;
    self.last_accessed_at = Utc::now();
    self.tick = tick;
  }
}

fn serialize_ttl<S: serde::Serializer>(ttl: &Duration, s: S) -> Result<S::Ok, S::Error> {
  s.serialize_i64(ttl.num_seconds())
}

/// Where a value returned by the engine came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceSource {
  /// Served from the cache
  Cache,
  /// Freshly computed by the model runtime
  Runtime,
}

/// A value returned by the engine, with metadata about its origin.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceResult {
  pub value: Value,
  pub source: InferenceSource,
  /// When the value was computed (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl InferenceResult {
  pub fn from_runtime(value: Value) -> Self {
    Self {
      value,
      source: InferenceSource::Runtime,
      cached_at: None,
    }
  }

  pub fn from_cache(value: Value, cached_at: DateTime<Utc>) -> Self {
    Self {
      value,
      source: InferenceSource::Cache,
      cached_at: Some(cached_at),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn entry(ttl: Duration) -> CacheEntry {
    CacheEntry::new("k".into(), json!(1), ModelKind::MoodPrediction, "u1".into(), ttl, 1)
  }

  #[test]
  fn test_expiry() {
    let e = entry(Duration::minutes(30));
    assert_eq!(e.expires_at(), Some(e.created_at + Duration::minutes(30)));
    assert!(!e.is_expired(e.created_at));
    assert!(e.is_expired(e.created_at + Duration::minutes(30)));
  }

  #[test]
  fn test_out_of_range_ttl_never_expires() {
    let e = entry(Duration::seconds(9_000_000_000_000));
    assert_eq!(e.expires_at(), None);
    assert!(!e.is_expired(Utc::now() + Duration::days(365 * 1000)));
  }

  #[test]
  fn test_visibility() {
    let personal = entry(Duration::hours(1));
    assert!(personal.visible_to("u1"));
    assert!(!personal.visible_to("u2"));
  }
}
