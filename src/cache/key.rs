//! Deterministic cache keys for inference results.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::model::{InputRecord, ModelKind};

/// Build the cache key for running `kind` on `input`.
///
/// The record is canonicalized (object fields sorted, recursively) before
/// hashing, so field order never changes the key. The kind tag is both mixed
/// into the hash and used as a readable prefix, e.g.
/// `mood_prediction_3f1c...`.
pub fn build(kind: ModelKind, input: &InputRecord) -> String {
  let canonical = canonicalize(&Value::Object(input.clone()));
  let input = format!("{}:{}", kind.as_str(), canonical);

  // SHA256 hash for stable, fixed-length keys
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  let result = hasher.finalize();
  format!("{}_{}", kind.as_str(), hex::encode(result))
}

/// Recover the model kind from a key produced by [`build`].
pub fn kind_of(key: &str) -> Option<ModelKind> {
  let (prefix, digest) = key.rsplit_once('_')?;
  if digest.len() != 64 {
    return None;
  }
  prefix.parse().ok()
}

fn canonicalize(value: &Value) -> Value {
  match value {
    Value::Object(map) => {
      let mut fields: Vec<(&String, &Value)> = map.iter().collect();
      fields.sort_by(|a, b| a.0.cmp(b.0));
      let mut sorted = Map::new();
      for (name, inner) in fields {
        sorted.insert(name.clone(), canonicalize(inner));
      }
      Value::Object(sorted)
    }
    Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
    other => other.clone(),
  }
}
