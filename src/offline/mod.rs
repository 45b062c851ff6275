//! Offline operation log and conflict resolution.
//!
//! User actions recorded while disconnected are appended to a bounded FIFO
//! queue. When connectivity returns, operations that target the same logical
//! record are collapsed to one authoritative operation before submission.

mod conflict;
mod operation;
mod queue;

pub use conflict::{ConflictPolicy, ConflictResolver, Resolution};
pub use operation::{NewOperation, OfflineOperation, OperationId, OperationSource};
pub use queue::{Enqueued, OfflineQueue, DEFAULT_QUEUE_CAPACITY};
