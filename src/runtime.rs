//! The model runtime the engine runs inference through.
//!
//! The engine never looks inside a model; it only loads a handle per kind,
//! runs inference with it, and optionally asks for quantization.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::model::{InputRecord, ModelKind};

/// A model that is loaded and ready for inference.
#[derive(Debug, Clone, Serialize)]
pub struct ModelHandle {
  pub kind: ModelKind,
  /// Runtime-specific artifact name
  pub artifact: String,
  pub quantized: bool,
}

impl ModelHandle {
  pub fn new(kind: ModelKind, artifact: impl Into<String>) -> Self {
    Self {
      kind,
      artifact: artifact.into(),
      quantized: false,
    }
  }
}

/// Result of a best-effort quantization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantizeOutcome {
  Quantized,
  AlreadyQuantized,
  Unsupported,
  /// The engine has not loaded this kind yet
  NotLoaded,
  /// The runtime did not answer within the inference timeout
  TimedOut,
}

/// Loads models and runs inference.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
  /// Load the artifact for `kind`.
  async fn load(&self, kind: ModelKind) -> Result<ModelHandle>;

  /// Run inference on a loaded model.
  async fn infer(&self, handle: &ModelHandle, input: &InputRecord) -> Result<Value>;

  /// Shrink a loaded model. Runtimes that cannot quantize keep the default.
  async fn quantize(&self, _handle: &ModelHandle) -> QuantizeOutcome {
    QuantizeOutcome::Unsupported
  }
}

/// Runtime that answers every inference for a kind with a fixed JSON value.
///
/// Kinds without a fixture fail to load, which the engine treats as the model
/// being unavailable.
#[derive(Debug, Clone)]
pub struct FixtureRuntime {
  fixtures: HashMap<ModelKind, Value>,
  quantizable: bool,
}

impl Default for FixtureRuntime {
  fn default() -> Self {
    Self::new(HashMap::new())
  }
}

impl FixtureRuntime {
  pub fn new(fixtures: HashMap<ModelKind, Value>) -> Self {
    Self {
      fixtures,
      quantizable: true,
    }
  }

  pub fn with_fixture(mut self, kind: ModelKind, value: Value) -> Self {
    self.fixtures.insert(kind, value);
    self
  }

  /// Make `quantize` report `Unsupported`.
  pub fn without_quantization(mut self) -> Self {
    self.quantizable = false;
    self
  }
}

#[async_trait]
impl ModelRuntime for FixtureRuntime {
  async fn load(&self, kind: ModelKind) -> Result<ModelHandle> {
    if self.fixtures.contains_key(&kind) {
      Ok(ModelHandle::new(kind, format!("fixture:{}", kind)))
    } else {
      Err(eyre!("No model artifact available for {}", kind))
    }
  }

  async fn infer(&self, handle: &ModelHandle, _input: &InputRecord) -> Result<Value> {
    self
      .fixtures
      .get(&handle.kind)
      .cloned()
      .ok_or_else(|| eyre!("Model {} is not loaded", handle.kind))
  }

  async fn quantize(&self, handle: &ModelHandle) -> QuantizeOutcome {
    if !self.quantizable {
      QuantizeOutcome::Unsupported
    } else if handle.quantized {
      QuantizeOutcome::AlreadyQuantized
    } else {
      QuantizeOutcome::Quantized
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn test_fixture_runtime_serves_fixture() {
    let runtime = FixtureRuntime::default().with_fixture(ModelKind::MoodPrediction, json!({"score": 4}));
    let handle = runtime.load(ModelKind::MoodPrediction).await.unwrap();

    let out = runtime.infer(&handle, &InputRecord::new()).await.unwrap();
    assert_eq!(out, json!({"score": 4}));
  }

  #[tokio::test]
  async fn test_missing_fixture_fails_to_load() {
    let runtime = FixtureRuntime::default();
    assert!(runtime.load(ModelKind::UserBehavior).await.is_err());
  }

  #[tokio::test]
  async fn test_quantize_outcomes() {
    let runtime = FixtureRuntime::new(HashMap::from([(ModelKind::UserBehavior, json!(1))]));
    let mut handle = runtime.load(ModelKind::UserBehavior).await.unwrap();
    assert_eq!(runtime.quantize(&handle).await, QuantizeOutcome::Quantized);

    handle.quantized = true;
    assert_eq!(runtime.quantize(&handle).await, QuantizeOutcome::AlreadyQuantized);

    let plain = runtime.clone().without_quantization();
    assert_eq!(plain.quantize(&handle).await, QuantizeOutcome::Unsupported);
  }
}
