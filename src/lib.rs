//! Edge inference cache and offline operation sync.
//!
//! [`EdgeCacheEngine`] serves model inferences from a bounded, owner-scoped
//! cache and records user actions in a bounded offline queue that is pushed
//! to a remote once connectivity returns.

pub mod cache;
pub mod config;
pub mod engine;
pub mod logging;
pub mod model;
pub mod offline;
pub mod remote;
pub mod replay;
pub mod runtime;
pub mod store;
pub mod sync;

pub use cache::{CacheStats, EvictionStrategy, InferenceResult, InferenceSource, IntelligentCache};
pub use config::Config;
pub use engine::{EdgeCacheEngine, HealthReport, HealthStatus};
pub use model::{InputRecord, ModelKind};
pub use offline::{
  ConflictPolicy, ConflictResolver, NewOperation, OfflineOperation, OfflineQueue, OperationId,
  OperationSource,
};
pub use remote::{DisconnectedRemote, HttpRemote, RemoteSink};
pub use runtime::{FixtureRuntime, ModelHandle, ModelRuntime, QuantizeOutcome};
pub use store::{NoopStore, QueueStore, SqliteQueueStore};
pub use sync::{SyncCoordinator, SyncOutcome, SyncStatus};
