//! In-memory entry caching.
//!
//! # Architecture
//!
//! * [`entry`]: the [`CacheEntry`] model shared by the tiers, the index store
//!   and the command surface, plus persisted [`VulnerabilityRecord`]s.
//! * [`tiers`]: the hot (LRU) and warm (TTL) tiers in front of the store.
//!
//! # Staleness
//!
//! Tiers hold copies. They are invalidated on explicit clear and on removal,
//! but not when a re-scan rewrites an entry's score in the index; a stale
//! score may be served until the copy is evicted or expires.

pub mod entry;
pub mod tiers;

pub use entry::{now, unix_seconds, CacheEntry, ContentLocation, EntryMetadata, VulnerabilityRecord};
pub use tiers::{TierHit, TieredCache};
