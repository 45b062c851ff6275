use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::EvictionStrategy;
use crate::model::ModelKind;
use crate::offline::{ConflictPolicy, ConflictResolver, DEFAULT_QUEUE_CAPACITY};

/// Longest TTL a kind may be configured with (ten years).
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Maximum number of cached inference results
  pub capacity: usize,
  pub strategy: EvictionStrategy,
  /// Per-kind TTL overrides, in seconds
  pub ttl_overrides_secs: BTreeMap<ModelKind, u64>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      capacity: 1000,
      strategy: EvictionStrategy::default(),
      ttl_overrides_secs: BTreeMap::new(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Maximum number of queued offline operations
  pub max_size: usize,
  /// Mirror the queue into SQLite so it survives restarts
  pub persist: bool,
  /// Database path (default: $XDG_DATA_HOME/edgecache/queue.db)
  pub db_path: Option<PathBuf>,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_size: DEFAULT_QUEUE_CAPACITY,
      persist: false,
      db_path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Base URL of the remote; operations are posted to `<url>/offline/sync`
  pub remote_url: Option<String>,
  pub submit_timeout_ms: u64,
  pub max_in_flight: usize,
  pub default_policy: ConflictPolicy,
  /// Conflict policy per operation type
  pub conflict_policies: BTreeMap<String, ConflictPolicy>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      remote_url: None,
      submit_timeout_ms: 10_000,
      max_in_flight: 4,
      default_policy: ConflictPolicy::Timestamp,
      conflict_policies: BTreeMap::from([(
        "mood_update".to_string(),
        ConflictPolicy::SourcePriority,
      )]),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
  pub inference_timeout_ms: u64,
  /// Fixed responses served by the fixture runtime, per model kind
  pub fixtures: BTreeMap<ModelKind, Value>,
}

impl Default for RuntimeConfig {
  fn default() -> Self {
    Self {
      inference_timeout_ms: 5_000,
      fixtures: BTreeMap::new(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./edgecache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/edgecache/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("edgecache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("edgecache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Reject settings the engine cannot run with.
  pub fn validate(&self) -> Result<()> {
    self.cache_capacity()?;
    self.queue_capacity()?;
    self.ttl_overrides()?;
    if let Some(url) = &self.sync.remote_url {
      url::Url::parse(url).map_err(|e| eyre!("Invalid sync.remote_url {}: {}", url, e))?;
    }
    if self.sync.submit_timeout_ms == 0 || self.runtime.inference_timeout_ms == 0 {
      return Err(eyre!("Timeouts must be greater than zero"));
    }
    Ok(())
  }

  pub fn cache_capacity(&self) -> Result<NonZeroUsize> {
    NonZeroUsize::new(self.cache.capacity)
      .ok_or_else(|| eyre!("cache.capacity must be greater than zero"))
  }

  pub fn queue_capacity(&self) -> Result<NonZeroUsize> {
    NonZeroUsize::new(self.queue.max_size)
      .ok_or_else(|| eyre!("queue.max_size must be greater than zero"))
  }

  /// Per-kind TTL overrides, rejecting values outside `1..=MAX_TTL_SECS`.
  pub fn ttl_overrides(&self) -> Result<Vec<(ModelKind, chrono::Duration)>> {
    self
      .cache
      .ttl_overrides_secs
      .iter()
      .map(|(kind, secs)| {
        if *secs == 0 || *secs > MAX_TTL_SECS {
          return Err(eyre!(
            "cache.ttl_overrides_secs.{} must be between 1 and {} seconds",
            kind,
            MAX_TTL_SECS
          ));
        }
        i64::try_from(*secs)
          .ok()
          .and_then(chrono::Duration::try_seconds)
          .map(|ttl| (*kind, ttl))
          .ok_or_else(|| eyre!("cache.ttl_overrides_secs.{} is out of range", kind))
      })
      .collect()
  }

  pub fn submit_timeout(&self) -> Duration {
    Duration::from_millis(self.sync.submit_timeout_ms)
  }

  pub fn inference_timeout(&self) -> Duration {
    Duration::from_millis(self.runtime.inference_timeout_ms)
  }

  pub fn conflict_resolver(&self) -> ConflictResolver {
    self
      .sync
      .conflict_policies
      .iter()
      .fold(ConflictResolver::new(self.sync.default_policy), |resolver, (op_type, policy)| {
        resolver.with_policy(op_type.clone(), *policy)
      })
  }
}
