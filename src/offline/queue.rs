//! Capacity-bounded FIFO of offline operations.

use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::num::NonZeroUsize;
use tracing::debug;

use super::operation::{NewOperation, OfflineOperation, OperationId};

/// Default maximum number of queued operations.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Result of admitting an operation.
#[derive(Debug, Clone)]
pub struct Enqueued {
  pub operation: OfflineOperation,
  /// Operations dropped from the head to make room
  pub dropped: Vec<OperationId>,
}

/// Append-only log of offline operations.
///
/// When full, the oldest operations are dropped to admit new ones; the newest
/// write is never refused.
#[derive(Debug)]
pub struct OfflineQueue {
  entries: VecDeque<OfflineOperation>,
  capacity: NonZeroUsize,
  next_id: u64,
}

impl OfflineQueue {
  pub fn new(capacity: NonZeroUsize) -> Self {
    Self {
      entries: VecDeque::new(),
      capacity,
      next_id: 1,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity.get()
  }

  /// Assign an id and append.
  pub fn enqueue(&mut self, new: NewOperation) -> Enqueued {
    let id = OperationId(self.next_id);
    self.next_id += 1;
    let operation = OfflineOperation::from_new(id, new, Utc::now());

    let dropped = self.make_room(1);
    self.entries.push_back(operation.clone());
    Enqueued { operation, dropped }
  }

  fn make_room(&mut self, incoming: usize) -> Vec<OperationId> {
    let mut dropped = Vec::new();
    while !self.entries.is_empty() && self.entries.len() + incoming > self.capacity.get() {
      if let Some(old) = self.entries.pop_front() {
        debug!(id = %old.id, op_type = %old.op_type, "offline queue full, dropped oldest");
        dropped.push(old.id);
      }
    }
    dropped
  }

  /// Snapshot of queued operations in order. Nothing is removed until
  /// [`acknowledge`](Self::acknowledge) is called.
  pub fn drain(&self) -> Vec<OfflineOperation> {
    self.entries.iter().cloned().collect()
  }

  /// Remove the given operations. Unknown ids (already dropped or
  /// acknowledged) are ignored. Returns how many were removed.
  pub fn acknowledge(&mut self, ids: &[OperationId]) -> usize {
    let ids: HashSet<OperationId> = ids.iter().copied().collect();
    let before = self.entries.len();
    self.entries.retain(|op| !ids.contains(&op.id));
    before - self.entries.len()
  }

  /// Reload operations persisted by an earlier process. Ids continue after
  /// the largest restored id. Returns ids dropped for capacity.
  pub fn restore(&mut self, mut operations: Vec<OfflineOperation>) -> Vec<OperationId> {
    operations.sort_by_key(|op| op.id);
    if let Some(max) = operations.last().map(|op| op.id.0) {
      self.next_id = self.next_id.max(max + 1);
    }

    let mut dropped = Vec::new();
    for op in operations {
      dropped.extend(self.make_room(1));
      self.entries.push_back(op);
    }
    dropped
  }

  pub fn size(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &OfflineOperation> {
    self.entries.iter()
  }
}

impl Default for OfflineQueue {
  fn default() -> Self {
    Self::new(NonZeroUsize::new(DEFAULT_QUEUE_CAPACITY).unwrap_or(NonZeroUsize::MIN))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn queue(capacity: usize) -> OfflineQueue {
    OfflineQueue::new(NonZeroUsize::new(capacity).unwrap())
  }

  fn new_op(i: usize) -> NewOperation {
    NewOperation::new("test_operation").with_field("operation_id", format!("op_{}", i))
  }

  #[test]
  fn test_enqueue_assigns_increasing_ids() {
    let mut q = queue(10);
    let a = q.enqueue(new_op(0)).operation;
    let b = q.enqueue(new_op(1)).operation;
    assert!(a.id < b.id);
    assert_eq!(q.size(), 2);
    assert_eq!(a.op_type, "test_operation");
  }

  #[test]
  fn test_overflow_keeps_most_recent_in_order() {
    let mut q = queue(1000);
    let mut dropped = 0;
    for i in 0..1050 {
      dropped += q.enqueue(new_op(i)).dropped.len();
    }

    assert_eq!(q.size(), 1000);
    assert_eq!(dropped, 50);
    let ops = q.drain();
    for (offset, op) in ops.iter().enumerate() {
      assert_eq!(op.payload["operation_id"], format!("op_{}", offset + 50));
    }
    assert_eq!(ops.last().unwrap().payload["operation_id"], "op_1049");
  }

  #[test]
  fn test_drain_does_not_remove() {
    let mut q = queue(10);
    q.enqueue(new_op(0));
    assert_eq!(q.drain().len(), 1);
    assert_eq!(q.size(), 1);
  }

  #[test]
  fn test_acknowledge_removes_only_given_ids() {
    let mut q = queue(10);
    let ids: Vec<_> = (0..4).map(|i| q.enqueue(new_op(i)).operation.id).collect();

    assert_eq!(q.acknowledge(&[ids[1], ids[3], OperationId(999)]), 2);
    let left: Vec<_> = q.iter().map(|op| op.id).collect();
    assert_eq!(left, vec![ids[0], ids[2]]);
  }

  #[test]
  fn test_restore_continues_ids() {
    let mut first = queue(10);
    let ops: Vec<_> = (0..3).map(|i| first.enqueue(new_op(i)).operation).collect();

    let mut second = queue(2);
    let dropped = second.restore(ops.clone());
    assert_eq!(dropped, vec![ops[0].id]);
    assert_eq!(second.size(), 2);

    let next = second.enqueue(new_op(9)).operation;
    assert_eq!(next.id, OperationId(4));
  }
}
