//! In-memory inference cache.
//!
//! This module provides the bounded result cache that sits in front of the
//! model runtime:
//! - Deterministic keys from `(model kind, input record)` pairs
//! - Per-entry TTL with per-kind defaults
//! - Owner-scoped entries for personalized model kinds
//! - Pluggable eviction (LRU, LFU, predictive, hybrid) fixed at construction

mod entry;
mod intelligent;
pub mod key;
mod patterns;
mod strategy;

pub use entry::{CacheEntry, InferenceResult, InferenceSource};
pub use intelligent::{CacheStats, IntelligentCache};
pub use patterns::AccessPatterns;
pub use strategy::{EvictionStrategy, MIN_PREDICTIVE_SAMPLES};
