//! User actions recorded while offline.

use chrono::{DateTime, NaiveDateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Payload fields consulted, in order, for the conflict target when no
/// explicit `entity_id` is given.
const TARGET_FIELDS: [&str; 3] = ["entity_id", "task_id", "story_id"];

/// Operation types whose record is the user themselves, so `user_id` is
/// their target. For any other type a user id says who acted, not what.
const USER_SCOPED_TYPES: [&str; 1] = ["mood_update"];

/// Timestamps without an offset are read as UTC.
const NAIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Payload fields consulted, in order, for the logical timestamp.
const TIMESTAMP_FIELDS: [&str; 3] = ["completion_time", "updated_at", "timestamp"];

/// Engine-assigned operation identifier. Increases monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "op-{}", self.0)
  }
}

/// Where the value carried by an operation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationSource {
  /// Explicitly entered by the user
  ManualInput,
  /// Produced by a model on the user's behalf
  #[serde(alias = "inferred")]
  AiInference,
  /// Generated by the application itself
  System,
}

impl OperationSource {
  /// Lower is more authoritative.
  pub fn rank(self) -> u8 {
    match self {
      Self::ManualInput => 0,
      Self::AiInference => 1,
      Self::System => 2,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::ManualInput => "manual_input",
      Self::AiInference => "ai_inference",
      Self::System => "system",
    }
  }
}

impl FromStr for OperationSource {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().replace('-', "_").as_str() {
      "manual_input" | "manual" => Ok(Self::ManualInput),
      "ai_inference" | "inferred" => Ok(Self::AiInference),
      "system" => Ok(Self::System),
      other => Err(eyre!("Unknown operation source: {}", other)),
    }
  }
}

/// An operation as submitted by the application, before it is queued.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewOperation {
  #[serde(rename = "type")]
  pub op_type: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub entity_id: Option<String>,
  #[serde(default)]
  pub payload: Map<String, Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source: Option<OperationSource>,
}

impl NewOperation {
  pub fn new(op_type: impl Into<String>) -> Self {
    Self {
      op_type: op_type.into(),
      ..Self::default()
    }
  }

  pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
    self.entity_id = Some(entity_id.into());
    self
  }

  pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.payload.insert(name.into(), value.into());
    self
  }

  pub fn with_source(mut self, source: OperationSource) -> Self {
    self.source = Some(source);
    self
  }
}

/// A queued operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineOperation {
  pub id: OperationId,
  #[serde(rename = "type")]
  pub op_type: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub entity_id: Option<String>,
  pub payload: Map<String, Value>,
  pub enqueued_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source: Option<OperationSource>,
}

impl OfflineOperation {
  pub fn from_new(id: OperationId, new: NewOperation, enqueued_at: DateTime<Utc>) -> Self {
    Self {
      id,
      op_type: new.op_type,
      entity_id: new.entity_id,
      payload: new.payload,
      enqueued_at,
      source: new.source,
    }
  }

  /// The logical record this operation writes to, e.g. `task_completion:t1`.
  ///
  /// Operations without an identifiable target never conflict.
  pub fn conflict_target(&self) -> Option<String> {
    let entity = self
      .entity_id
      .clone()
      .or_else(|| {
        TARGET_FIELDS
          .iter()
          .find_map(|field| self.payload.get(*field).and_then(value_as_id))
      })
      .or_else(|| {
        USER_SCOPED_TYPES
          .contains(&self.op_type.as_str())
          .then(|| self.payload.get("user_id").and_then(value_as_id))
          .flatten()
      })?;
    Some(format!("{}:{}", self.op_type, entity))
  }

  /// When the user actually performed the action. Falls back to the enqueue
  /// time when the payload carries no parseable timestamp.
  pub fn logical_timestamp(&self) -> DateTime<Utc> {
    TIMESTAMP_FIELDS
      .iter()
      .filter_map(|field| self.payload.get(*field).and_then(Value::as_str))
      .find_map(parse_timestamp)
      .unwrap_or(self.enqueued_at)
  }
}

/// RFC 3339, or an ISO 8601 local timestamp taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(raw)
    .map(|dt| dt.with_timezone(&Utc))
    .ok()
    .or_else(|| {
      NaiveDateTime::parse_from_str(raw, NAIVE_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
    })
}

fn value_as_id(value: &Value) -> Option<String> {
  match value {
    Value::String(s) if !s.is_empty() => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}
