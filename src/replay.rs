//! Scripted sessions: one JSON step per line, run in order against a single
//! engine so cache hits and queued operations carry across steps.
//!
//! ```text
//! {"step":"infer","kind":"mood_prediction","owner":"u1","input":{"sleep_hours":7}}
//! {"step":"enqueue","operation":{"type":"mood_update","entity_id":"u1","source":"manual_input"}}
//! {"step":"sync"}
//! {"step":"stats"}
//! ```

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::BufRead;

use crate::engine::EdgeCacheEngine;
use crate::model::{InputRecord, ModelKind};
use crate::offline::NewOperation;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
  Infer {
    kind: ModelKind,
    owner: String,
    #[serde(default)]
    input: InputRecord,
  },
  Enqueue {
    operation: NewOperation,
  },
  Sync,
  Stats,
  Queue,
  Health,
  Quantize {
    kind: ModelKind,
  },
  Sweep,
}

impl Step {
  /// Parse one script line. Blank lines and `#` comments yield `None`.
  pub fn parse(line: &str) -> Result<Option<Self>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
      return Ok(None);
    }
    serde_json::from_str(line)
      .map(Some)
      .map_err(|e| eyre!("Invalid step {}: {}", line, e))
  }
}

/// Run a step and describe what it did.
pub async fn run_step(engine: &EdgeCacheEngine, step: Step) -> Result<Value> {
  let value = match step {
    Step::Infer { kind, owner, input } => {
      match engine.get_or_infer_detailed(kind, &input, &owner).await {
        Some(result) => serde_json::to_value(result),
        None => Ok(json!({ "value": null, "source": null })),
      }
    }
    Step::Enqueue { operation } => {
      let id = engine.enqueue_offline_operation(operation);
      Ok(json!({ "id": id, "queue_size": engine.queue_size() }))
    }
    Step::Sync => serde_json::to_value(engine.sync().await),
    Step::Stats => serde_json::to_value(engine.cache_stats()),
    Step::Queue => serde_json::to_value(engine.pending_operations()),
    Step::Health => serde_json::to_value(engine.health()),
    Step::Quantize { kind } => {
      Ok(json!({ "kind": kind, "outcome": engine.quantize_model(kind).await }))
    }
    Step::Sweep => Ok(json!({ "removed": engine.sweep_expired() })),
  };
  value.map_err(|e| eyre!("Failed to serialize step result: {}", e))
}

/// Run every step in `reader`, returning one result per executed step.
/// Stops at the first malformed line.
pub async fn run_script<R: BufRead>(engine: &EdgeCacheEngine, reader: R) -> Result<Vec<Value>> {
  let mut results = Vec::new();
  for (n, line) in reader.lines().enumerate() {
    let line = line.map_err(|e| eyre!("Failed to read script line {}: {}", n + 1, e))?;
    if let Some(step) = Step::parse(&line).map_err(|e| eyre!("line {}: {}", n + 1, e))? {
      results.push(run_step(engine, step).await?);
    }
  }
  Ok(results)
}
