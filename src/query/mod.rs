//! Keyed query cache shared by every admin hook.
//!
//! This module is API-agnostic: it stores arrays of JSON records under
//! [`QueryKey`]s, collapses concurrent fetches of one key into a single
//! request, tracks staleness and invalidation, and can persist results
//! through a [`CacheStorage`] backend.

mod client;
mod key;
mod storage;

pub use client::{
  EntryState, FetchOptions, ObserverGuard, OptimisticWrite, QueryClient, Records, Settled, Snapshot,
  DEFAULT_STALE_TIME,
};
pub use key::{KeySegment, QueryKey};
pub use storage::{CacheStorage, NoopStorage, SqliteStorage, StoredQuery};
