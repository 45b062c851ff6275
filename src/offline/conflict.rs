//! Picking one authoritative operation per logical record.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;

use super::operation::OfflineOperation;

/// Rank given to operations without a declared source.
const UNKNOWN_SOURCE_RANK: u8 = 3;

/// How competing operations on the same record are settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
  /// Last writer wins, by logical timestamp
  #[default]
  Timestamp,
  /// Manual input beats inference beats system, regardless of time
  SourcePriority,
}

impl ConflictPolicy {
  /// Pick the winner among `ops`. `None` only for an empty slice.
  ///
  /// Ties on the policy's criterion go to the later timestamp, then to the
  /// later-enqueued operation, so the result never depends on slice order.
  pub fn resolve(self, ops: &[OfflineOperation]) -> Option<&OfflineOperation> {
    match self {
      Self::Timestamp => ops
        .iter()
        .max_by_key(|op| (op.logical_timestamp(), op.id)),
      Self::SourcePriority => ops.iter().max_by_key(|op| {
        (
          Reverse(op.source.map_or(UNKNOWN_SOURCE_RANK, |s| s.rank())),
          op.logical_timestamp(),
          op.id,
        )
      }),
    }
  }
}

/// Operations on one record after resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
  pub winner: OfflineOperation,
  /// Superseded operations; acknowledged without being submitted
  pub losers: Vec<OfflineOperation>,
}

/// Conflict resolution with a policy per operation type.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
  default: ConflictPolicy,
  by_type: HashMap<String, ConflictPolicy>,
}

impl Default for ConflictResolver {
  fn default() -> Self {
    Self::new(ConflictPolicy::Timestamp).with_policy("mood_update", ConflictPolicy::SourcePriority)
  }
}

impl ConflictResolver {
  pub fn new(default: ConflictPolicy) -> Self {
    Self {
      default,
      by_type: HashMap::new(),
    }
  }

  pub fn with_policy(mut self, op_type: impl Into<String>, policy: ConflictPolicy) -> Self {
    self.by_type.insert(op_type.into(), policy);
    self
  }

  pub fn policy_for(&self, op_type: &str) -> ConflictPolicy {
    self.by_type.get(op_type).copied().unwrap_or(self.default)
  }

  /// Resolve operations that all target the same record.
  pub fn resolve<'a>(&self, ops: &'a [OfflineOperation]) -> Option<&'a OfflineOperation> {
    let first = ops.first()?;
    self.policy_for(&first.op_type).resolve(ops)
  }

  /// Group `ops` by conflict target and resolve each group. Groups come back
  /// in order of their first operation.
  pub fn group(&self, ops: Vec<OfflineOperation>) -> Vec<Resolution> {
    let mut order: Vec<Vec<OfflineOperation>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for op in ops {
      match op.conflict_target() {
        Some(target) => {
          if let Some(&slot) = index.get(&target) {
            order[slot].push(op);
          } else {
            index.insert(target, order.len());
            order.push(vec![op]);
          }
        }
        None => order.push(vec![op]),
      }
    }

    order
      .into_iter()
      .filter_map(|group| {
        let winner_id = self.resolve(&group)?.id;
        let (winners, losers): (Vec<_>, Vec<_>) =
          group.into_iter().partition(|op| op.id == winner_id);
        let winner = winners.into_iter().next()?;
        Some(Resolution { winner, losers })
      })
      .collect()
  }
}
