//! The engine application code talks to.

use color_eyre::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{key, CacheStats, InferenceResult, IntelligentCache};
use crate::config::Config;
use crate::model::{InputRecord, ModelKind};
use crate::offline::{NewOperation, OfflineOperation, OfflineQueue, OperationId};
use crate::remote::RemoteSink;
use crate::runtime::{ModelHandle, ModelRuntime, QuantizeOutcome};
use crate::store::{NoopStore, QueueStore};
use crate::sync::{SyncCoordinator, SyncOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
  Healthy,
  /// The offline queue is at capacity and shedding its oldest operations
  Backlogged,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
  pub status: HealthStatus,
  pub cache_hit_rate: f64,
  pub models_loaded: usize,
  pub offline_queue_size: usize,
  pub offline_queue_capacity: usize,
  pub sync_in_progress: bool,
}

/// Inference cache plus offline queue behind one handle.
///
/// The engine owns its cache and queue exclusively; construct one per
/// process or session and share it as `Arc<EdgeCacheEngine>`.
///
/// Nothing here fails the caller because the backend or a model is
/// unavailable: inference degrades to `None`, queueing always succeeds and
/// sync reports per-operation failures in its outcome.
pub struct EdgeCacheEngine {
  cache: IntelligentCache,
  queue: Mutex<OfflineQueue>,
  coordinator: SyncCoordinator,
  runtime: Arc<dyn ModelRuntime>,
  remote: Arc<dyn RemoteSink>,
  store: Arc<dyn QueueStore>,
  models: Mutex<HashMap<ModelKind, ModelHandle>>,
  /// Serializes loads of one kind; other kinds load independently
  loading: Mutex<HashMap<ModelKind, Arc<tokio::sync::Mutex<()>>>>,
  inference_timeout: Duration,
}

impl EdgeCacheEngine {
  /// Build an engine from validated configuration.
  pub fn new(
    config: &Config,
    runtime: Arc<dyn ModelRuntime>,
    remote: Arc<dyn RemoteSink>,
  ) -> Result<Self> {
    config.validate()?;

    let cache = config.ttl_overrides()?.into_iter().fold(
      IntelligentCache::new(config.cache_capacity()?, config.cache.strategy),
      |cache, (kind, ttl)| cache.with_ttl(kind, ttl),
    );

    let coordinator = SyncCoordinator::new(config.conflict_resolver())
      .with_submit_timeout(config.submit_timeout())
      .with_max_in_flight(config.sync.max_in_flight);

    Ok(Self {
      cache,
      queue: Mutex::new(OfflineQueue::new(config.queue_capacity()?)),
      coordinator,
      runtime,
      remote,
      store: Arc::new(NoopStore),
      models: Mutex::new(HashMap::new()),
      loading: Mutex::new(HashMap::new()),
      inference_timeout: config.inference_timeout(),
    })
  }

  /// Attach a persistent store and reload whatever it holds into the queue.
  pub fn with_store(mut self, store: Arc<dyn QueueStore>) -> Result<Self> {
    let persisted = store.load_all()?;
    let restored = persisted.len();
    let dropped = self.queue().restore(persisted);
    if !dropped.is_empty() {
      store.remove(&dropped)?;
    }
    info!(restored, dropped = dropped.len(), "restored offline queue");
    self.store = store;
    Ok(self)
  }

  fn queue(&self) -> MutexGuard<'_, OfflineQueue> {
    self.queue.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn models(&self) -> MutexGuard<'_, HashMap<ModelKind, ModelHandle>> {
    self.models.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn load_lock(&self, kind: ModelKind) -> Arc<tokio::sync::Mutex<()>> {
    let mut loading = self.loading.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(loading.entry(kind).or_default())
  }

  /// Serve `kind` for `input` from the cache, running the model on a miss.
  ///
  /// Returns `None` when no result can be produced (model unavailable, failed
  /// or timed out); callers should proceed without personalization.
  pub async fn get_or_infer(
    &self,
    kind: ModelKind,
    input: &InputRecord,
    owner_id: &str,
  ) -> Option<Value> {
    self
      .get_or_infer_detailed(kind, input, owner_id)
      .await
      .map(|r| r.value)
  }

  /// [`get_or_infer`](Self::get_or_infer) with the model kind given by name.
  ///
  /// An unknown kind is a caller bug and is returned as an error.
  pub async fn get_or_infer_by_name(
    &self,
    kind: &str,
    input: &InputRecord,
    owner_id: &str,
  ) -> Result<Option<Value>> {
    let kind: ModelKind = kind.parse()?;
    Ok(self.get_or_infer(kind, input, owner_id).await)
  }

  /// Like [`get_or_infer`](Self::get_or_infer), reporting where the value
  /// came from.
  ///
  /// Dropping the returned future before the runtime answers caches nothing.
  pub async fn get_or_infer_detailed(
    &self,
    kind: ModelKind,
    input: &InputRecord,
    owner_id: &str,
  ) -> Option<InferenceResult> {
    let key = key::build(kind, input);
    if let Some(hit) = self.cache.lookup(&key, owner_id) {
      return Some(hit);
    }

    let value = match tokio::time::timeout(self.inference_timeout, self.infer(kind, input)).await {
      Ok(Ok(value)) => value,
      Ok(Err(e)) => {
        warn!(%kind, error = %e, "inference unavailable, continuing without personalization");
        return None;
      }
      Err(_) => {
        warn!(%kind, timeout = ?self.inference_timeout, "inference timed out");
        return None;
      }
    };

    // No await between a finished inference and the put.
    if let Some(evicted) = self.cache.put(&key, value.clone(), kind, owner_id, None) {
      debug!(%kind, evicted, "cache at capacity");
    }
    Some(InferenceResult::from_runtime(value))
  }

  async fn infer(&self, kind: ModelKind, input: &InputRecord) -> Result<Value> {
    let handle = self.handle(kind).await?;
    self.runtime.infer(&handle, input).await
  }

  /// Loaded handle for `kind`, loading it on first use.
  async fn handle(&self, kind: ModelKind) -> Result<ModelHandle> {
    let loaded = self.models().get(&kind).cloned();
    if let Some(handle) = loaded {
      return Ok(handle);
    }

    let lock = self.load_lock(kind);
    let _loading = lock.lock().await;
    // Another caller may have finished the load while we waited
    let loaded = self.models().get(&kind).cloned();
    if let Some(handle) = loaded {
      return Ok(handle);
    }

    let handle = self.runtime.load(kind).await?;
    info!(%kind, artifact = %handle.artifact, "model loaded");
    self.models().insert(kind, handle.clone());
    Ok(handle)
  }

  /// Load the given kinds ahead of time. Returns how many are loaded
  /// afterwards; failures are logged and skipped.
  pub async fn preload(&self, kinds: &[ModelKind]) -> usize {
    let mut loaded = 0;
    for kind in kinds {
      match tokio::time::timeout(self.inference_timeout, self.handle(*kind)).await {
        Ok(Ok(_)) => loaded += 1,
        Ok(Err(e)) => warn!(%kind, error = %e, "model failed to load"),
        Err(_) => warn!(%kind, "model load timed out"),
      }
    }
    loaded
  }

  /// Ask the runtime to quantize a loaded model, bounded by the inference
  /// timeout.
  pub async fn quantize_model(&self, kind: ModelKind) -> QuantizeOutcome {
    let Some(handle) = self.models().get(&kind).cloned() else {
      return QuantizeOutcome::NotLoaded;
    };

    let outcome =
      match tokio::time::timeout(self.inference_timeout, self.runtime.quantize(&handle)).await {
        Ok(outcome) => outcome,
        Err(_) => {
          warn!(%kind, timeout = ?self.inference_timeout, "quantization timed out");
          return QuantizeOutcome::TimedOut;
        }
      };

    if outcome == QuantizeOutcome::Quantized {
      if let Some(loaded) = self.models().get_mut(&kind) {
        loaded.quantized = true;
      }
      info!(%kind, "model quantized");
    }
    outcome
  }

  /// Handles for every loaded model, ordered by kind.
  pub fn model_status(&self) -> Vec<ModelHandle> {
    let mut handles: Vec<ModelHandle> = self.models().values().cloned().collect();
    handles.sort_by_key(|h| h.kind);
    handles
  }

  /// Seed the cache with a known result.
  pub fn warm(&self, kind: ModelKind, input: &InputRecord, owner_id: &str, value: Value) {
    let key = key::build(kind, input);
    self.cache.put(&key, value, kind, owner_id, None);
  }

  /// Record a user action for later sync. Never refuses: a full queue sheds
  /// its oldest operations instead.
  pub fn enqueue_offline_operation(&self, operation: NewOperation) -> OperationId {
    let mut queue = self.queue();
    let enqueued = queue.enqueue(operation);

    // Mirrored under the queue lock so a concurrent sync cannot acknowledge
    // the operation before it is persisted.
    if let Err(e) = self.store.save(&enqueued.operation) {
      warn!(id = %enqueued.operation.id, error = %e, "failed to persist offline operation");
    }
    if !enqueued.dropped.is_empty() {
      if let Err(e) = self.store.remove(&enqueued.dropped) {
        warn!(error = %e, "failed to forget dropped offline operations");
      }
    }
    enqueued.operation.id
  }

  /// Push queued operations to the remote. Concurrent calls yield exactly
  /// one drain; the others return `already_syncing` immediately.
  pub async fn sync(&self) -> SyncOutcome {
    let report = self.coordinator.run(&self.queue, self.remote.as_ref()).await;
    if !report.acknowledged.is_empty() {
      if let Err(e) = self.store.remove(&report.acknowledged) {
        warn!(error = %e, "failed to remove synced operations from store");
      }
    }
    report.outcome
  }

  pub fn cache_stats(&self) -> CacheStats {
    self.cache.stats()
  }

  pub fn queue_size(&self) -> usize {
    self.queue().size()
  }

  /// Snapshot of queued operations, oldest first.
  pub fn pending_operations(&self) -> Vec<OfflineOperation> {
    self.queue().drain()
  }

  /// Drop expired cache entries now rather than on their next read.
  pub fn sweep_expired(&self) -> usize {
    self.cache.sweep_expired()
  }

  pub fn health(&self) -> HealthReport {
    let models_loaded = self.models().len();
    let (offline_queue_size, offline_queue_capacity) = {
      let queue = self.queue();
      (queue.size(), queue.capacity())
    };

    HealthReport {
      status: if offline_queue_size >= offline_queue_capacity {
        HealthStatus::Backlogged
      } else {
        HealthStatus::Healthy
      },
      cache_hit_rate: self.cache.stats().hit_rate,
      models_loaded,
      offline_queue_size,
      offline_queue_capacity,
      sync_in_progress: self.coordinator.is_syncing(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{EvictionStrategy, InferenceSource};
  use crate::offline::OperationSource;
  use crate::remote::DisconnectedRemote;
  use crate::runtime::FixtureRuntime;
  use crate::store::SqliteQueueStore;
  use crate::sync::SyncStatus;
  use async_trait::async_trait;
  use color_eyre::eyre::eyre;
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};

  /// Runtime that counts inferences and can be made slow or broken.
  struct CountingRuntime {
    calls: AtomicUsize,
    delay: Duration,
    fail: bool,
  }

  impl CountingRuntime {
    fn new() -> Self {
      Self {
        calls: AtomicUsize::new(0),
        delay: Duration::ZERO,
        fail: false,
      }
    }

    fn slow(delay: Duration) -> Self {
      Self { delay, ..Self::new() }
    }

    fn broken() -> Self {
      Self { fail: true, ..Self::new() }
    }
  }

  #[async_trait]
  impl ModelRuntime for CountingRuntime {
    async fn load(&self, kind: ModelKind) -> Result<ModelHandle> {
      Ok(ModelHandle::new(kind, "counting"))
    }

    async fn infer(&self, handle: &ModelHandle, input: &InputRecord) -> Result<Value> {
      if !self.delay.is_zero() {
        tokio::time::sleep(self.delay).await;
      }
      if self.fail {
        return Err(eyre!("model crashed"));
      }
      let n = self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(json!({"kind": handle.kind, "fields": input.len(), "call": n}))
    }
  }

  /// Remote that accepts everything.
  struct AcceptAll;

  #[async_trait]
  impl RemoteSink for AcceptAll {
    async fn submit(&self, _operation: &OfflineOperation) -> Result<()> {
      Ok(())
    }
  }

  fn input(value: Value) -> InputRecord {
    value.as_object().cloned().unwrap()
  }

  fn engine_with(runtime: Arc<dyn ModelRuntime>, remote: Arc<dyn RemoteSink>) -> EdgeCacheEngine {
    EdgeCacheEngine::new(&Config::default(), runtime, remote).unwrap()
  }

  #[tokio::test]
  async fn test_miss_then_hit() {
    let runtime = Arc::new(CountingRuntime::new());
    let engine = engine_with(runtime.clone(), Arc::new(AcceptAll));
    let prompt = input(json!({"prompt": "a brave hero", "length": 100}));

    let first = engine
      .get_or_infer_detailed(ModelKind::NarrativeGeneration, &prompt, "u1")
      .await
      .unwrap();
    let second = engine
      .get_or_infer_detailed(ModelKind::NarrativeGeneration, &prompt, "u1")
      .await
      .unwrap();

    assert_eq!(first.source, InferenceSource::Runtime);
    assert_eq!(second.source, InferenceSource::Cache);
    assert_eq!(first.value, second.value);
    assert_eq!(runtime.calls.load(Ordering::SeqCst), 1);

    let stats = engine.cache_stats();
    assert_eq!(stats.total_hits, 1);
    assert_eq!(stats.total_misses, 1);
  }

  #[tokio::test]
  async fn test_personalized_results_not_shared() {
    let runtime = Arc::new(CountingRuntime::new());
    let engine = engine_with(runtime.clone(), Arc::new(AcceptAll));
    let features = input(json!({"sleep_hours": 7, "weather": "sunny"}));

    engine.get_or_infer(ModelKind::MoodPrediction, &features, "alice").await;
    engine.get_or_infer(ModelKind::MoodPrediction, &features, "bob").await;

    assert_eq!(runtime.calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_runtime_failure_degrades_to_none() {
    let engine = engine_with(Arc::new(CountingRuntime::broken()), Arc::new(AcceptAll));
    let result = engine
      .get_or_infer(ModelKind::TaskRecommendation, &input(json!({"mood": 4})), "u1")
      .await;
    assert!(result.is_none());
    assert_eq!(engine.cache_stats().cache_size, 0);
  }

  #[tokio::test]
  async fn test_missing_model_degrades_to_none() {
    let engine = engine_with(Arc::new(FixtureRuntime::default()), Arc::new(AcceptAll));
    let result = engine
      .get_or_infer(ModelKind::UserBehavior, &input(json!({"x": 1})), "u1")
      .await;
    assert!(result.is_none());
    assert!(engine.model_status().is_empty());
  }

  #[tokio::test]
  async fn test_inference_timeout_degrades_to_none() {
    let mut config = Config::default();
    config.runtime.inference_timeout_ms = 20;
    let engine = EdgeCacheEngine::new(
      &config,
      Arc::new(CountingRuntime::slow(Duration::from_millis(200))),
      Arc::new(AcceptAll),
    )
    .unwrap();

    let result = engine
      .get_or_infer(ModelKind::MoodPrediction, &input(json!({"x": 1})), "u1")
      .await;
    assert!(result.is_none());
    assert_eq!(engine.cache_stats().cache_size, 0);
  }

  #[tokio::test]
  async fn test_cancelled_call_caches_nothing() {
    let engine = engine_with(
      Arc::new(CountingRuntime::slow(Duration::from_millis(200))),
      Arc::new(AcceptAll),
    );
    let features = input(json!({"x": 1}));

    let cancelled = tokio::time::timeout(
      Duration::from_millis(20),
      engine.get_or_infer(ModelKind::MoodPrediction, &features, "u1"),
    )
    .await;

    assert!(cancelled.is_err());
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(engine.cache_stats().cache_size, 0);
  }

  #[tokio::test]
  async fn test_unknown_kind_name_is_an_error() {
    let engine = engine_with(Arc::new(CountingRuntime::new()), Arc::new(AcceptAll));
    let features = input(json!({"x": 1}));

    assert!(engine
      .get_or_infer_by_name("horoscope", &features, "u1")
      .await
      .is_err());
    assert!(engine
      .get_or_infer_by_name("mood-prediction", &features, "u1")
      .await
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_enqueue_and_sync() {
    let engine = engine_with(Arc::new(CountingRuntime::new()), Arc::new(AcceptAll));
    engine.enqueue_offline_operation(
      NewOperation::new("task_completion")
        .with_field("task_id", "task_001")
        .with_field("xp_gained", 50),
    );
    engine.enqueue_offline_operation(
      NewOperation::new("mood_update")
        .with_field("user_id", "user_001")
        .with_field("mood_score", 4)
        .with_source(OperationSource::ManualInput),
    );
    assert_eq!(engine.queue_size(), 2);

    let outcome = engine.sync().await;
    assert_eq!(outcome.status, SyncStatus::Completed);
    assert_eq!(outcome.synced_count, 2);
    assert_eq!(outcome.remaining_queue_size, 0);
    assert_eq!(engine.queue_size(), 0);
  }

  #[tokio::test]
  async fn test_disconnected_sync_keeps_queue() {
    let engine = engine_with(Arc::new(CountingRuntime::new()), Arc::new(DisconnectedRemote));
    engine.enqueue_offline_operation(NewOperation::new("story_progress").with_field("story_id", "s1"));

    let outcome = engine.sync().await;
    assert_eq!(outcome.failed_count, 1);
    assert_eq!(engine.queue_size(), 1);
  }

  #[tokio::test]
  async fn test_queue_capacity_backpressure() {
    let engine = engine_with(Arc::new(CountingRuntime::new()), Arc::new(AcceptAll));
    for i in 0..1050 {
      engine.enqueue_offline_operation(
        NewOperation::new("test_operation").with_field("operation_id", format!("op_{}", i)),
      );
    }

    assert_eq!(engine.queue_size(), 1000);
    let pending = engine.pending_operations();
    assert_eq!(pending[0].payload["operation_id"], "op_50");
    assert_eq!(pending[999].payload["operation_id"], "op_1049");
    assert_eq!(engine.health().status, HealthStatus::Backlogged);
  }

  #[tokio::test]
  async fn test_store_survives_restart() {
    let store: Arc<dyn QueueStore> = Arc::new(SqliteQueueStore::open_in_memory().unwrap());

    let first = engine_with(Arc::new(CountingRuntime::new()), Arc::new(DisconnectedRemote))
      .with_store(Arc::clone(&store))
      .unwrap();
    first.enqueue_offline_operation(NewOperation::new("task_completion").with_field("task_id", "t1"));
    first.enqueue_offline_operation(NewOperation::new("task_completion").with_field("task_id", "t2"));
    drop(first);

    let second = engine_with(Arc::new(CountingRuntime::new()), Arc::new(AcceptAll))
      .with_store(Arc::clone(&store))
      .unwrap();
    assert_eq!(second.queue_size(), 2);
    let next = second.enqueue_offline_operation(NewOperation::new("mood_update"));
    assert_eq!(next, OperationId(3));

    second.sync().await;
    assert!(store.load_all().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_quantize_and_model_status() {
    let runtime = FixtureRuntime::default().with_fixture(ModelKind::MoodPrediction, json!({"score": 3}));
    let engine = engine_with(Arc::new(runtime), Arc::new(AcceptAll));

    assert_eq!(engine.quantize_model(ModelKind::MoodPrediction).await, QuantizeOutcome::NotLoaded);
    assert_eq!(engine.preload(&[ModelKind::MoodPrediction, ModelKind::UserBehavior]).await, 1);
    assert_eq!(engine.quantize_model(ModelKind::MoodPrediction).await, QuantizeOutcome::Quantized);
    assert_eq!(
      engine.quantize_model(ModelKind::MoodPrediction).await,
      QuantizeOutcome::AlreadyQuantized
    );

    let status = engine.model_status();
    assert_eq!(status.len(), 1);
    assert!(status[0].quantized);
    assert_eq!(engine.health().models_loaded, 1);
  }

  /// Runtime whose quantize never answers and whose load of one kind is slow.
  struct StallingRuntime {
    slow_kind: ModelKind,
    load_delay: Duration,
  }

  #[async_trait]
  impl ModelRuntime for StallingRuntime {
    async fn load(&self, kind: ModelKind) -> Result<ModelHandle> {
      if kind == self.slow_kind {
        tokio::time::sleep(self.load_delay).await;
      }
      Ok(ModelHandle::new(kind, "stalling"))
    }

    async fn infer(&self, handle: &ModelHandle, _input: &InputRecord) -> Result<Value> {
      Ok(json!({"kind": handle.kind}))
    }

    async fn quantize(&self, _handle: &ModelHandle) -> QuantizeOutcome {
      futures::future::pending().await
    }
  }

  fn stalling_engine(timeout_ms: u64, slow_kind: ModelKind, load_delay: Duration) -> Arc<EdgeCacheEngine> {
    let mut config = Config::default();
    config.runtime.inference_timeout_ms = timeout_ms;
    let runtime = StallingRuntime { slow_kind, load_delay };
    Arc::new(EdgeCacheEngine::new(&config, Arc::new(runtime), Arc::new(AcceptAll)).unwrap())
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_stuck_quantize_times_out_without_blocking_models() {
    let engine = stalling_engine(200, ModelKind::NarrativeGeneration, Duration::ZERO);
    assert_eq!(engine.preload(&[ModelKind::MoodPrediction]).await, 1);

    let quantize = tokio::spawn({
      let engine = Arc::clone(&engine);
      async move { engine.quantize_model(ModelKind::MoodPrediction).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(engine.health().models_loaded, 1);
    assert_eq!(engine.model_status().len(), 1);
    let other = tokio::time::timeout(
      Duration::from_millis(150),
      engine.get_or_infer(ModelKind::UserBehavior, &input(json!({"x": 1})), "u1"),
    )
    .await;
    assert!(matches!(other, Ok(Some(_))));

    assert_eq!(quantize.await.unwrap(), QuantizeOutcome::TimedOut);
    assert!(!engine.model_status()[0].quantized);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_slow_load_does_not_starve_other_kinds() {
    let engine = stalling_engine(2_000, ModelKind::NarrativeGeneration, Duration::from_millis(500));

    let slow = tokio::spawn({
      let engine = Arc::clone(&engine);
      async move {
        engine
          .get_or_infer(ModelKind::NarrativeGeneration, &input(json!({"prompt": "p"})), "u1")
          .await
      }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let fast = tokio::time::timeout(
      Duration::from_millis(200),
      engine.get_or_infer(ModelKind::MoodPrediction, &input(json!({"x": 1})), "u1"),
    )
    .await;
    assert!(matches!(fast, Ok(Some(_))));
    assert!(slow.await.unwrap().is_some());
  }

  #[tokio::test]
  async fn test_distinct_actions_by_one_user_all_sync() {
    let engine = engine_with(Arc::new(CountingRuntime::new()), Arc::new(AcceptAll));
    for cell in ["cell_4_5", "cell_2_3"] {
      engine.enqueue_offline_operation(
        NewOperation::new("mandala_update")
          .with_field("user_id", "user_001")
          .with_field("cell_id", cell),
      );
    }
    for _ in 0..5 {
      engine.enqueue_offline_operation(NewOperation::new("test_sync").with_field("user_id", "user_001"));
    }

    let outcome = engine.sync().await;
    assert_eq!(outcome.synced_count, 7);
    assert_eq!(outcome.discarded_count, 0);
  }

  #[tokio::test]
  async fn test_ttl_override_range() {
    let mut config = Config::default();
    config
      .cache
      .ttl_overrides_secs
      .insert(ModelKind::MoodPrediction, 9_000_000_000_000);
    assert!(EdgeCacheEngine::new(&config, Arc::new(CountingRuntime::new()), Arc::new(AcceptAll)).is_err());

    config
      .cache
      .ttl_overrides_secs
      .insert(ModelKind::MoodPrediction, crate::config::MAX_TTL_SECS);
    let engine = EdgeCacheEngine::new(&config, Arc::new(CountingRuntime::new()), Arc::new(AcceptAll)).unwrap();
    let features = input(json!({"x": 1}));
    engine.warm(ModelKind::MoodPrediction, &features, "u1", json!(3));

    assert_eq!(engine.cache_stats().cache_size, 1);
    assert_eq!(engine.get_or_infer(ModelKind::MoodPrediction, &features, "u1").await, Some(json!(3)));
  }

  #[tokio::test]
  async fn test_warm_serves_without_runtime() {
    let runtime = Arc::new(CountingRuntime::new());
    let engine = engine_with(runtime.clone(), Arc::new(AcceptAll));
    let features = input(json!({"time_of_day": "morning"}));

    engine.warm(ModelKind::TaskRecommendation, &features, "u1", json!(["walk"]));
    let value = engine.get_or_infer(ModelKind::TaskRecommendation, &features, "u1").await;

    assert_eq!(value, Some(json!(["walk"])));
    assert_eq!(runtime.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_callers_respect_capacity() {
    let mut config = Config::default();
    config.cache.capacity = 16;
    config.cache.strategy = EvictionStrategy::Lru;
    let engine = Arc::new(
      EdgeCacheEngine::new(&config, Arc::new(CountingRuntime::new()), Arc::new(AcceptAll)).unwrap(),
    );

    let tasks: Vec<_> = (0..8)
      .map(|t| {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
          for i in 0..50 {
            let features = input(json!({"task": t, "i": i}));
            engine.get_or_infer(ModelKind::UserBehavior, &features, "u1").await;
          }
        })
      })
      .collect();
    for task in futures::future::join_all(tasks).await {
      task.unwrap();
    }

    let stats = engine.cache_stats();
    assert_eq!(stats.cache_size, 16);
    assert_eq!(stats.total_misses, 400);
    assert_eq!(stats.total_evictions, 400 - 16);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_engine_syncs_drain_once() {
    struct SlowRemote(AtomicUsize);

    #[async_trait]
    impl RemoteSink for SlowRemote {
      async fn submit(&self, _operation: &OfflineOperation) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
      }
    }

    let remote = Arc::new(SlowRemote(AtomicUsize::new(0)));
    let engine = Arc::new(engine_with(Arc::new(CountingRuntime::new()), remote.clone()));
    for i in 0..3 {
      engine.enqueue_offline_operation(NewOperation::new("task_completion").with_field("task_id", i));
    }

    let a = tokio::spawn({
      let engine = Arc::clone(&engine);
      async move { engine.sync().await }
    });
    let b = tokio::spawn({
      let engine = Arc::clone(&engine);
      async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.sync().await
      }
    });
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert_eq!(a.status, SyncStatus::Completed);
    assert_eq!(b.status, SyncStatus::AlreadySyncing);
    assert_eq!(remote.0.load(Ordering::SeqCst), 3);
    assert_eq!(engine.queue_size(), 0);
  }
}
