//! Draining the offline queue against the remote system.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::offline::{ConflictResolver, OfflineOperation, OfflineQueue, OperationId};
use crate::remote::RemoteSink;

/// Default per-operation submission timeout.
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of submissions in flight at once.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
  Completed,
  /// Another sync was running; nothing was touched
  AlreadySyncing,
}

/// Summary of one `sync` call.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
  pub status: SyncStatus,
  pub synced_count: usize,
  pub failed_count: usize,
  /// Operations superseded by a conflict winner
  pub discarded_count: usize,
  pub remaining_queue_size: usize,
}

/// What a sync pass did, including the ids it removed from the queue.
#[derive(Debug, Clone)]
pub struct SyncReport {
  pub outcome: SyncOutcome,
  pub acknowledged: Vec<OperationId>,
}

/// Clears the in-progress flag when the sync ends, however it ends.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self(flag))
  }
}

impl Drop for SyncGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// Runs at most one sync pass at a time.
///
/// A pass snapshots the queue, collapses conflicting operations, submits the
/// winners and acknowledges what was synced plus every superseded loser.
/// Failed submissions stay queued for the next pass; nothing is retried
/// within a pass.
#[derive(Debug)]
pub struct SyncCoordinator {
  in_progress: AtomicBool,
  resolver: ConflictResolver,
  submit_timeout: Duration,
  max_in_flight: usize,
}

impl SyncCoordinator {
  pub fn new(resolver: ConflictResolver) -> Self {
    Self {
      in_progress: AtomicBool::new(false),
      resolver,
      submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
      max_in_flight: DEFAULT_MAX_IN_FLIGHT,
    }
  }

  pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
    self.submit_timeout = timeout;
    self
  }

  /// Submissions are issued concurrently up to this limit; results are
  /// still processed in queue order.
  pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
    self.max_in_flight = max_in_flight.max(1);
    self
  }

  pub fn is_syncing(&self) -> bool {
    self.in_progress.load(Ordering::Acquire)
  }

  pub fn resolver(&self) -> &ConflictResolver {
    &self.resolver
  }

  /// Run one sync pass against `remote`.
  pub async fn run(&self, queue: &Mutex<OfflineQueue>, remote: &dyn RemoteSink) -> SyncReport {
    let Some(_guard) = SyncGuard::acquire(&self.in_progress) else {
      debug!("sync already in progress");
      return SyncReport {
        outcome: SyncOutcome {
          status: SyncStatus::AlreadySyncing,
          synced_count: 0,
          failed_count: 0,
          discarded_count: 0,
          remaining_queue_size: lock(queue).size(),
        },
        acknowledged: Vec::new(),
      };
    };

    let snapshot = lock(queue).drain();
    let resolutions = self.resolver.group(snapshot);

    let mut acknowledged: Vec<OperationId> = resolutions
      .iter()
      .flat_map(|r| r.losers.iter().map(|op| op.id))
      .collect();
    let discarded_count = acknowledged.len();

    let timeout = self.submit_timeout;
    let winners: Vec<OfflineOperation> = resolutions.into_iter().map(|r| r.winner).collect();
    let results: Vec<_> = stream::iter(winners)
      .map(|op| async move {
        let result = tokio::time::timeout(timeout, remote.submit(&op)).await;
        (op, result)
      })
      .buffered(self.max_in_flight)
      .collect()
      .await;

    let mut synced_count = 0;
    let mut failed_count = 0;
    for (op, result) in results {
      match result {
        Ok(Ok(())) => {
          synced_count += 1;
          acknowledged.push(op.id);
        }
        Ok(Err(e)) => {
          failed_count += 1;
          warn!(id = %op.id, op_type = %op.op_type, error = %e, "offline operation failed to sync");
        }
        Err(_) => {
          failed_count += 1;
          warn!(id = %op.id, op_type = %op.op_type, ?timeout, "offline operation timed out");
        }
      }
    }

    let remaining_queue_size = {
      let mut queue = lock(queue);
      queue.acknowledge(&acknowledged);
      queue.size()
    };

    info!(
      synced = synced_count,
      failed = failed_count,
      discarded = discarded_count,
      remaining = remaining_queue_size,
      "offline sync finished"
    );

    SyncReport {
      outcome: SyncOutcome {
        status: SyncStatus::Completed,
        synced_count,
        failed_count,
        discarded_count,
        remaining_queue_size,
      },
      acknowledged,
    }
  }
}

fn lock(queue: &Mutex<OfflineQueue>) -> std::sync::MutexGuard<'_, OfflineQueue> {
  queue.lock().unwrap_or_else(PoisonError::into_inner)
}
