//! Model kinds served by the engine.

use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Input handed to a model: a JSON object.
pub type InputRecord = serde_json::Map<String, serde_json::Value>;

/// The closed set of models the engine knows how to cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
  NarrativeGeneration,
  TaskRecommendation,
  MoodPrediction,
  UserBehavior,
}

impl ModelKind {
  pub const ALL: [ModelKind; 4] = [
    ModelKind::NarrativeGeneration,
    ModelKind::TaskRecommendation,
    ModelKind::MoodPrediction,
    ModelKind::UserBehavior,
  ];

  /// Stable tag used in cache keys, config files and logs.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::NarrativeGeneration => "narrative_generation",
      Self::TaskRecommendation => "task_recommendation",
      Self::MoodPrediction => "mood_prediction",
      Self::UserBehavior => "user_behavior",
    }
  }

  /// How long a result stays fresh unless overridden.
  pub fn default_ttl(self) -> Duration {
    match self {
      Self::NarrativeGeneration => Duration::hours(24),
      Self::TaskRecommendation => Duration::hours(1),
      Self::MoodPrediction => Duration::minutes(30),
      Self::UserBehavior => Duration::hours(6),
    }
  }

  /// Personalized results are only ever served back to the owner they were
  /// computed for. Narrative fragments are keyed by their full prompt and
  /// can be shared.
  pub fn is_personalized(self) -> bool {
    !matches!(self, Self::NarrativeGeneration)
  }
}

impl fmt::Display for ModelKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ModelKind {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    let normalized = s.trim().to_lowercase().replace('-', "_");
    Self::ALL
      .into_iter()
      .find(|kind| kind.as_str() == normalized)
      .ok_or_else(|| eyre!("Unknown model kind: {}", s))
  }
}

/// Accepts the same spellings as [`FromStr`], wherever a kind is read.
impl<'de> Deserialize<'de> for ModelKind {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
  }
}
