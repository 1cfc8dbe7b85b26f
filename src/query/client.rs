//! Shared query cache with request de-duplication.
//!
//! The `QueryClient` owns the cache map. Every hook goes through it:
//! - reads start a fetch only when the entry is missing, stale or invalidated,
//!   and concurrent readers of one key join the same in-flight request
//! - each in-flight request carries a generation; its result is written only
//!   if that generation is still current, so cancelled or superseded
//!   fetches never touch the entry
//! - writes are applied under the cache mutex, in the order they settle
//!
//! The mutex is never held while caller code or storage I/O runs.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::key::QueryKey;
use super::storage::{CacheStorage, NoopStorage};
use crate::error::ApiError;

/// Records held by one cache entry.
pub type Records = Arc<Vec<Value>>;

/// How long fetched data stays fresh unless a query says otherwise.
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(5 * 60);

type SharedFetch = Shared<BoxFuture<'static, Result<Records, ApiError>>>;

type Entries = HashMap<QueryKey, CacheEntry>;

struct InFlight {
  generation: u64,
  future: SharedFetch,
}

#[derive(Default)]
struct CacheEntry {
  data: Option<Records>,
  updated_at: Option<Instant>,
  error: Option<ApiError>,
  invalidated: bool,
  in_flight: Option<InFlight>,
  /// Bumped whenever a fetch starts or is abandoned
  generation: u64,
  /// Generation of the last fetch whose result was written
  committed_generation: u64,
  /// Bumped on every data or error write
  version: u64,
  /// Provisional writes not yet confirmed or rolled back
  optimistic: usize,
  observers: usize,
}

impl CacheEntry {
  fn is_fresh(&self, stale_time: Duration) -> bool {
    match (&self.data, self.updated_at) {
      (Some(_), Some(at)) => !self.invalidated && at.elapsed() <= stale_time,
      _ => false,
    }
  }

  fn abandon_fetch(&mut self) -> bool {
    if self.in_flight.take().is_some() {
      self.generation += 1;
      true
    } else {
      false
    }
  }

  fn write(&mut self, records: Records) {
    self.data = Some(records);
    self.updated_at = Some(Instant::now());
    self.error = None;
    self.invalidated = false;
    self.version += 1;
  }

  fn restore(&mut self, snapshot: Snapshot) {
    self.data = snapshot.data;
    self.updated_at = snapshot.updated_at;
    self.error = snapshot.error;
    self.invalidated = snapshot.invalidated;
    self.version += 1;
  }

  fn plan(&self, options: FetchOptions) -> Plan {
    if options.force {
      return Plan::Start;
    }
    if self.is_fresh(options.stale_time) {
      if let Some(data) = &self.data {
        return Plan::Ready(Arc::clone(data));
      }
    }
    match &self.in_flight {
      Some(in_flight) => Plan::Join(in_flight.future.clone(), in_flight.generation),
      None => Plan::Start,
    }
  }
}

/// What a read does, decided under the lock.
enum Plan {
  Ready(Records),
  Join(SharedFetch, u64),
  Start,
}

/// Read-only view of a cache entry.
#[derive(Debug, Clone)]
pub struct EntryState {
  pub data: Option<Records>,
  pub error: Option<ApiError>,
  pub updated_at: Option<Instant>,
  pub is_fetching: bool,
  pub is_invalidated: bool,
  pub version: u64,
  pub observers: usize,
}

/// Pre-mutation copy of an entry, used to roll back an optimistic update.
#[derive(Debug, Clone)]
pub struct Snapshot {
  data: Option<Records>,
  updated_at: Option<Instant>,
  error: Option<ApiError>,
  invalidated: bool,
  version: u64,
}

impl Snapshot {
  pub fn data(&self) -> Option<&Records> {
    self.data.as_ref()
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.error.as_ref()
  }

  /// Snapshot records, or an empty slice when the key had no data.
  pub fn records(&self) -> &[Value] {
    self.data.as_deref().map(Vec::as_slice).unwrap_or(&[])
  }
}

/// Receipt for a provisional write made with
/// [`QueryClient::apply_optimistic`].
#[derive(Debug)]
pub struct OptimisticWrite {
  version: u64,
  /// Another provisional write was pending, so the snapshot may contain it
  overlapped: bool,
}

/// How a fetch ended for the caller that awaited it.
#[derive(Debug, Clone)]
pub enum Settled {
  /// The result is what the cache holds (or held) for the key
  Committed(Result<Records, ApiError>),
  /// The fetch was cancelled or superseded; its result was thrown away
  Discarded,
}

/// Per-call fetch options.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
  pub stale_time: Duration,
  /// Ignore fresh data and supersede any in-flight fetch
  pub force: bool,
}

impl Default for FetchOptions {
  fn default() -> Self {
    Self {
      stale_time: DEFAULT_STALE_TIME,
      force: false,
    }
  }
}

/// Shared, cheaply clonable handle to the query cache.
#[derive(Clone)]
pub struct QueryClient {
  entries: Arc<Mutex<Entries>>,
  storage: Arc<dyn CacheStorage>,
  stale_time: Duration,
}

impl Default for QueryClient {
  fn default() -> Self {
    Self::new()
  }
}

impl QueryClient {
  /// In-memory client with the default stale time.
  pub fn new() -> Self {
    Self::with_storage(NoopStorage)
  }

  /// Client that hydrates new entries from, and persists results to, `storage`.
  pub fn with_storage(storage: impl CacheStorage + 'static) -> Self {
    Self {
      entries: Arc::new(Mutex::new(HashMap::new())),
      storage: Arc::new(storage),
      stale_time: DEFAULT_STALE_TIME,
    }
  }

  /// Set the default stale time for queries that don't choose their own.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn stale_time(&self) -> Duration {
    self.stale_time
  }

  fn lock(&self) -> MutexGuard<'_, Entries> {
    // Entries stay consistent across a panic: every write is a single assignment
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Lock the map with an entry for `key` present, hydrating it from storage
  /// first if needed. Storage is read without holding the lock.
  fn lock_hydrated(&self, key: &QueryKey) -> MutexGuard<'_, Entries> {
    let mut hydrated = None;
    loop {
      let mut entries = self.lock();
      if entries.contains_key(key) {
        return entries;
      }
      if let Some(entry) = hydrated.take() {
        entries.insert(key.clone(), entry);
        return entries;
      }
      drop(entries);
      hydrated = Some(self.hydrate(key));
    }
  }

  fn hydrate(&self, key: &QueryKey) -> CacheEntry {
    let stored = match self.storage.load(key) {
      Ok(stored) => stored,
      Err(e) => {
        tracing::warn!(%key, error = %e, "failed to read persisted query");
        None
      }
    };

    let Some(stored) = stored else {
      return CacheEntry::default();
    };

    let age = (chrono::Utc::now() - stored.cached_at)
      .to_std()
      .unwrap_or_default();
    // An age beyond what Instant can represent just means "very stale"
    let updated_at = Instant::now().checked_sub(age);

    tracing::debug!(%key, records = stored.records.len(), ?age, "hydrated query from storage");
    CacheEntry {
      data: Some(Arc::new(stored.records)),
      updated_at,
      invalidated: updated_at.is_none(),
      version: 1,
      ..CacheEntry::default()
    }
  }

  /// Fetch a query through the cache.
  ///
  /// 1. Fresh data (not invalidated, younger than the stale time) is returned
  ///    without calling `fetcher`
  /// 2. A fetch already in flight for this key is joined
  /// 3. Otherwise `fetcher` starts a new fetch that later readers can join
  ///
  /// With `force`, step 1 is skipped and an in-flight fetch is superseded.
  /// The result is returned even if the fetch was abandoned meanwhile; use
  /// [`fetch_query_settled`](Self::fetch_query_settled) to tell the two apart.
  pub async fn fetch_query<F, Fut>(
    &self,
    key: &QueryKey,
    fetcher: F,
    options: FetchOptions,
  ) -> Result<Records, ApiError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<Value>, ApiError>> + Send + 'static,
  {
    self.run_fetch(key, fetcher, options).await.0
  }

  /// Like [`fetch_query`](Self::fetch_query), but results of cancelled or
  /// superseded fetches come back as [`Settled::Discarded`].
  pub async fn fetch_query_settled<F, Fut>(
    &self,
    key: &QueryKey,
    fetcher: F,
    options: FetchOptions,
  ) -> Settled
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<Value>, ApiError>> + Send + 'static,
  {
    match self.run_fetch(key, fetcher, options).await {
      (result, true) => Settled::Committed(result),
      (_, false) => Settled::Discarded,
    }
  }

  async fn run_fetch<F, Fut>(
    &self,
    key: &QueryKey,
    fetcher: F,
    options: FetchOptions,
  ) -> (Result<Records, ApiError>, bool)
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<Value>, ApiError>> + Send + 'static,
  {
    let plan = self.lock_hydrated(key).entry(key.clone()).or_default().plan(options);

    let (future, generation) = match plan {
      Plan::Ready(data) => return (Ok(data), true),
      Plan::Join(future, generation) => {
        tracing::trace!(%key, "joining in-flight fetch");
        (future, generation)
      }
      Plan::Start => {
        let future = fetcher().map(|r| r.map(Arc::new)).boxed().shared();

        // Another reader may have got in while the lock was released
        let mut entries = self.lock_hydrated(key);
        let entry = entries.entry(key.clone()).or_default();
        match entry.plan(options) {
          Plan::Ready(data) => return (Ok(data), true),
          Plan::Join(joined, generation) => {
            tracing::trace!(%key, "joining in-flight fetch");
            (joined, generation)
          }
          Plan::Start => {
            if entry.abandon_fetch() {
              tracing::debug!(%key, "superseding in-flight fetch");
            }
            entry.generation += 1;
            let generation = entry.generation;
            entry.in_flight = Some(InFlight {
              generation,
              future: future.clone(),
            });
            tracing::debug!(%key, generation, "starting fetch");
            (future, generation)
          }
        }
      }
    };

    let result = future.await;
    let committed = self.settle(key, generation, &result);
    (result, committed)
  }

  /// Apply a finished fetch, unless it has been cancelled or superseded.
  ///
  /// Returns whether this generation's result is the one the cache took,
  /// including when another joiner of the same fetch wrote it first.
  fn settle(&self, key: &QueryKey, generation: u64, result: &Result<Records, ApiError>) -> bool {
    let persist = {
      let mut entries = self.lock();
      let Some(entry) = entries.get_mut(key) else {
        tracing::debug!(%key, "discarding fetch result for removed query");
        return false;
      };

      match &entry.in_flight {
        Some(in_flight) if in_flight.generation == generation => {}
        // Another joiner already settled it, or it was abandoned
        _ => return entry.committed_generation == generation,
      }
      entry.in_flight = None;
      entry.committed_generation = generation;

      match result {
        Ok(data) => {
          entry.write(Arc::clone(data));
          Some(Arc::clone(data))
        }
        Err(e) => {
          tracing::debug!(%key, error = %e, "fetch failed");
          entry.error = Some(e.clone());
          entry.version += 1;
          None
        }
      }
    };

    if let Some(data) = persist {
      if let Err(e) = self.storage.store(key, &data) {
        tracing::warn!(%key, error = %e, "failed to persist query");
      }
    }
    true
  }

  /// Current records for a key, without fetching.
  pub fn get_query_data(&self, key: &QueryKey) -> Option<Records> {
    self.lock().get(key).and_then(|e| e.data.clone())
  }

  /// Replace the records for a key, creating the entry if needed.
  pub fn set_query_data(&self, key: &QueryKey, records: Vec<Value>) {
    self
      .lock()
      .entry(key.clone())
      .or_default()
      .write(Arc::new(records));
  }

  /// Capture the entry's current state for a later [`restore`](Self::restore).
  pub fn snapshot(&self, key: &QueryKey) -> Snapshot {
    let entries = self.lock();
    match entries.get(key) {
      Some(entry) => Snapshot {
        data: entry.data.clone(),
        updated_at: entry.updated_at,
        error: entry.error.clone(),
        invalidated: entry.invalidated,
        version: entry.version,
      },
      None => Snapshot {
        data: None,
        updated_at: None,
        error: None,
        invalidated: false,
        version: 0,
      },
    }
  }

  /// Put a snapshot back exactly as it was taken.
  pub fn restore(&self, key: &QueryKey, snapshot: Snapshot) {
    self.lock().entry(key.clone()).or_default().restore(snapshot);
  }

  /// Write a provisional value computed from `snapshot`.
  ///
  /// Returns `None`, writing nothing, if the entry changed since the snapshot
  /// was taken. Any in-flight fetch is abandoned so it can't land on top of
  /// the provisional value.
  pub fn apply_optimistic(
    &self,
    key: &QueryKey,
    snapshot: &Snapshot,
    records: Vec<Value>,
  ) -> Option<OptimisticWrite> {
    let mut entries = self.lock();
    let entry = entries.entry(key.clone()).or_default();
    if entry.version != snapshot.version {
      return None;
    }

    entry.abandon_fetch();
    let overlapped = entry.optimistic > 0;
    entry.optimistic += 1;
    entry.write(Arc::new(records));
    Some(OptimisticWrite {
      version: entry.version,
      overlapped,
    })
  }

  /// The server accepted a provisional write: mark the key for refetch.
  pub fn confirm_optimistic(&self, key: &QueryKey, write: OptimisticWrite) {
    if let Some(entry) = self.lock().get_mut(key) {
      entry.optimistic = entry.optimistic.saturating_sub(1);
    }
    tracing::trace!(%key, version = write.version, "confirmed optimistic write");
    self.invalidate_queries(key);
  }

  /// Undo a provisional write.
  ///
  /// When nothing else wrote the entry after `write`, and no other
  /// provisional write was pending when it was made, `snapshot` goes back
  /// exactly. Otherwise the prior server state is unknown: the snapshot is
  /// put back only if the entry still holds this write, and the key is marked
  /// stale either way. Returns whether the rollback was exact.
  pub fn rollback_optimistic(
    &self,
    key: &QueryKey,
    write: OptimisticWrite,
    snapshot: Snapshot,
  ) -> bool {
    let mut entries = self.lock();
    let entry = entries.entry(key.clone()).or_default();
    entry.optimistic = entry.optimistic.saturating_sub(1);

    let untouched = entry.version == write.version;
    if untouched {
      entry.restore(snapshot);
    }
    if untouched && !write.overlapped {
      return true;
    }
    entry.invalidated = true;
    tracing::debug!(%key, untouched, "rollback raced another write, key marked stale");
    false
  }

  /// Mark every key starting with `prefix` as stale.
  ///
  /// The next observation of an invalidated key refetches it. Persisted
  /// copies are dropped so a later process doesn't hydrate them.
  /// Returns the number of in-memory entries marked.
  pub fn invalidate_queries(&self, prefix: &QueryKey) -> usize {
    let mut marked = 0;
    {
      let mut entries = self.lock();
      for (_, entry) in entries.iter_mut().filter(|(k, _)| k.starts_with(prefix)) {
        entry.invalidated = true;
        marked += 1;
      }
    }

    if let Err(e) = self.storage.remove_matching(prefix) {
      tracing::warn!(%prefix, error = %e, "failed to drop persisted queries");
    }
    tracing::debug!(%prefix, marked, "invalidated queries");
    marked
  }

  /// Abandon the in-flight fetch for a key. Its result will be discarded.
  pub fn cancel_queries(&self, key: &QueryKey) -> bool {
    let cancelled = self
      .lock()
      .get_mut(key)
      .map(CacheEntry::abandon_fetch)
      .unwrap_or(false);
    if cancelled {
      tracing::debug!(%key, "cancelled in-flight fetch");
    }
    cancelled
  }

  /// Drop every entry starting with `prefix`, in memory and in storage.
  pub fn remove_queries(&self, prefix: &QueryKey) -> usize {
    let removed = {
      let mut entries = self.lock();
      let before = entries.len();
      entries.retain(|k, _| !k.starts_with(prefix));
      before - entries.len()
    };
    if let Err(e) = self.storage.remove_matching(prefix) {
      tracing::warn!(%prefix, error = %e, "failed to drop persisted queries");
    }
    removed
  }

  /// Drop everything, including persisted results.
  pub fn clear(&self) -> color_eyre::Result<()> {
    self.lock().clear();
    self.storage.clear()
  }

  pub fn is_invalidated(&self, key: &QueryKey) -> bool {
    self.lock().get(key).is_some_and(|e| e.invalidated)
  }

  pub fn entry_state(&self, key: &QueryKey) -> Option<EntryState> {
    self.lock().get(key).map(|e| EntryState {
      data: e.data.clone(),
      error: e.error.clone(),
      updated_at: e.updated_at,
      is_fetching: e.in_flight.is_some(),
      is_invalidated: e.invalidated,
      version: e.version,
      observers: e.observers,
    })
  }

  /// Register an observer of a key.
  ///
  /// When the last observer's guard is dropped, any in-flight fetch for the
  /// key is abandoned.
  pub fn observe(&self, key: &QueryKey) -> ObserverGuard {
    self
      .lock_hydrated(key)
      .entry(key.clone())
      .or_default()
      .observers += 1;
    ObserverGuard {
      client: self.clone(),
      key: key.clone(),
    }
  }
}

/// Keeps a key observed. See [`QueryClient::observe`].
pub struct ObserverGuard {
  client: QueryClient,
  key: QueryKey,
}

impl ObserverGuard {
  pub fn key(&self) -> &QueryKey {
    &self.key
  }
}

impl Drop for ObserverGuard {
  fn drop(&mut self) {
    let mut entries = self.client.lock();
    if let Some(entry) = entries.get_mut(&self.key) {
      entry.observers = entry.observers.saturating_sub(1);
      if entry.observers == 0 && entry.abandon_fetch() {
        tracing::debug!(key = %self.key, "last observer gone, abandoned fetch");
      }
    }
  }
}

mod tests {
  use super::*;
  use crate::query::storage::SqliteStorage;
  use crate::query_key;
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn counting_fetcher(
    counter: &Arc<AtomicU32>,
    delay: Duration,
  ) -> impl FnOnce() -> BoxFuture<'static, Result<Vec<Value>, ApiError>> {
    let counter = counter.clone();
    move || {
      async move {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(delay).await;
        Ok(vec![json!({ "fetch": n })])
      }
      .boxed()
    }
  }

  #[tokio::test]
  async fn test_concurrent_fetches_are_deduplicated() {
    let client = QueryClient::new();
    let key = query_key!["admin", "members"];
    let counter = Arc::new(AtomicU32::new(0));

    let (a, b) = tokio::join!(
      client.fetch_query(
        &key,
        counting_fetcher(&counter, Duration::from_millis(20)),
        FetchOptions::default()
      ),
      client.fetch_query(
        &key,
        counting_fetcher(&counter, Duration::from_millis(20)),
        FetchOptions::default()
      ),
    );

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(a.unwrap(), b.unwrap());
    let state = client.entry_state(&key).unwrap();
    assert!(!state.is_fetching);
    assert_eq!(state.version, 1);
  }

  #[tokio::test]
  async fn test_fresh_data_is_served_from_cache() {
    let client = QueryClient::new();
    let key = query_key!["admin", "news"];
    let counter = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
      client
        .fetch_query(&key, counting_fetcher(&counter, Duration::ZERO), FetchOptions::default())
        .await
        .unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_stale_and_forced_fetches_refetch() {
    let client = QueryClient::new();
    let key = query_key!["admin", "news"];
    let counter = Arc::new(AtomicU32::new(0));
    let stale = FetchOptions {
      stale_time: Duration::ZERO,
      force: false,
    };

    client
      .fetch_query(&key, counting_fetcher(&counter, Duration::ZERO), stale)
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    client
      .fetch_query(&key, counting_fetcher(&counter, Duration::ZERO), stale)
      .await
      .unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    let forced = FetchOptions {
      force: true,
      ..FetchOptions::default()
    };
    let data = client
      .fetch_query(&key, counting_fetcher(&counter, Duration::ZERO), forced)
      .await
      .unwrap();
    assert_eq!(*data, vec![json!({ "fetch": 3 })]);
  }

  #[tokio::test]
  async fn test_invalidation_forces_next_read_to_refetch() {
    let client = QueryClient::new();
    let key = query_key!["admin", "members"];
    let counter = Arc::new(AtomicU32::new(0));

    client
      .fetch_query(&key, counting_fetcher(&counter, Duration::ZERO), FetchOptions::default())
      .await
      .unwrap();
    assert_eq!(client.invalidate_queries(&query_key!["admin"]), 1);
    assert!(client.is_invalidated(&key));

    client
      .fetch_query(&key, counting_fetcher(&counter, Duration::ZERO), FetchOptions::default())
      .await
      .unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert!(!client.is_invalidated(&key));
  }

  #[tokio::test]
  async fn test_invalidation_only_touches_matching_keys() {
    let client = QueryClient::new();
    client.set_query_data(&query_key!["admin", "members"], vec![]);
    client.set_query_data(&query_key!["admin", "members", 1], vec![]);
    client.set_query_data(&query_key!["admin", "users"], vec![]);

    assert_eq!(client.invalidate_queries(&query_key!["admin", "members"]), 2);
    assert!(!client.is_invalidated(&query_key!["admin", "users"]));
  }

  #[tokio::test]
  async fn test_cancelled_fetch_does_not_write() {
    let client = QueryClient::new();
    let key = query_key!["admin", "tenders"];
    let counter = Arc::new(AtomicU32::new(0));

    let fetch = {
      let client = client.clone();
      let key = key.clone();
      let fetcher = counting_fetcher(&counter, Duration::from_millis(30));
      tokio::spawn(async move { client.fetch_query(&key, fetcher, FetchOptions::default()).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(client.cancel_queries(&key));

    // The caller still gets its result, the cache does not
    assert!(fetch.await.unwrap().is_ok());
    let state = client.entry_state(&key).unwrap();
    assert!(state.data.is_none());
    assert!(!state.is_fetching);
  }

  #[tokio::test]
  async fn test_dropping_last_observer_abandons_fetch() {
    let client = QueryClient::new();
    let key = query_key!["admin", "users"];
    let counter = Arc::new(AtomicU32::new(0));
    let guard = client.observe(&key);

    let fetch = {
      let client = client.clone();
      let key = key.clone();
      let fetcher = counting_fetcher(&counter, Duration::from_millis(30));
      tokio::spawn(async move { client.fetch_query(&key, fetcher, FetchOptions::default()).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(client.entry_state(&key).unwrap().is_fetching);

    drop(guard);
    fetch.await.unwrap().unwrap();
    assert!(client.get_query_data(&key).is_none());
  }

  #[tokio::test]
  async fn test_errors_are_recorded_and_keep_previous_data() {
    let client = QueryClient::new();
    let key = query_key!["admin", "donations"];
    client.set_query_data(&key, vec![json!(1)]);

    let result = client
      .fetch_query(
        &key,
        || async { Err(ApiError::Action("boom".to_string())) },
        FetchOptions {
          force: true,
          ..FetchOptions::default()
        },
      )
      .await;

    assert_eq!(result.unwrap_err(), ApiError::Action("boom".to_string()));
    let state = client.entry_state(&key).unwrap();
    assert_eq!(state.error, Some(ApiError::Action("boom".to_string())));
    assert_eq!(*state.data.unwrap(), vec![json!(1)]);
  }

  #[tokio::test]
  async fn test_snapshot_restore_is_exact() {
    let client = QueryClient::new();
    let key = query_key!["admin", "members"];
    client.set_query_data(&key, vec![json!({ "id": "1" })]);
    let failed = client
      .fetch_query(
        &key,
        || async { Err(ApiError::Action("down".to_string())) },
        FetchOptions {
          force: true,
          ..FetchOptions::default()
        },
      )
      .await;
    assert!(failed.is_err());
    client.invalidate_queries(&key);

    let snapshot = client.snapshot(&key);
    assert_eq!(snapshot.error(), Some(&ApiError::Action("down".to_string())));
    client.set_query_data(&key, vec![json!({ "id": "2" })]);
    assert!(client.entry_state(&key).unwrap().error.is_none());
    client.restore(&key, snapshot.clone());

    let state = client.entry_state(&key).unwrap();
    assert_eq!(state.data, snapshot.data().cloned());
    assert_eq!(state.error, Some(ApiError::Action("down".to_string())));
    assert!(state.is_invalidated);
  }

  #[test]
  fn test_lone_optimistic_rollback_is_exact() {
    let client = QueryClient::new();
    let key = query_key!["admin", "members"];
    client.set_query_data(&key, vec![json!({ "id": "m1", "status": "PENDING" })]);
    let before = client.get_query_data(&key).unwrap();

    let snapshot = client.snapshot(&key);
    let write = client
      .apply_optimistic(&key, &snapshot, vec![json!({ "id": "m1", "status": "APPROVED" })])
      .unwrap();
    assert!(client.rollback_optimistic(&key, write, snapshot));

    assert!(Arc::ptr_eq(&before, &client.get_query_data(&key).unwrap()));
    assert!(!client.is_invalidated(&key));
  }

  #[test]
  fn test_overlapping_optimistic_rollbacks_mark_key_stale() {
    let client = QueryClient::new();
    let key = query_key!["admin", "members"];
    client.set_query_data(&key, vec![json!({ "id": "m1", "status": "PENDING" })]);

    let first_snapshot = client.snapshot(&key);
    let first = client
      .apply_optimistic(&key, &first_snapshot, vec![json!({ "id": "m1", "status": "APPROVED" })])
      .unwrap();
    let second_snapshot = client.snapshot(&key);
    let second = client
      .apply_optimistic(&key, &second_snapshot, vec![json!({ "id": "m1", "status": "REJECTED" })])
      .unwrap();

    // The second write sits on top of the first, so the first can't go back
    assert!(!client.rollback_optimistic(&key, first, first_snapshot));
    assert!(client.is_invalidated(&key));

    // The second snapshot holds the first, unconfirmed value
    assert!(!client.rollback_optimistic(&key, second, second_snapshot));
    assert!(client.is_invalidated(&key));
    assert_eq!(
      *client.get_query_data(&key).unwrap(),
      vec![json!({ "id": "m1", "status": "APPROVED" })]
    );
  }

  #[test]
  fn test_apply_optimistic_rejects_outdated_snapshot() {
    let client = QueryClient::new();
    let key = query_key!["admin", "members"];
    client.set_query_data(&key, vec![json!(1)]);

    let snapshot = client.snapshot(&key);
    client.set_query_data(&key, vec![json!(2)]);

    assert!(client.apply_optimistic(&key, &snapshot, vec![json!(3)]).is_none());
    assert_eq!(*client.get_query_data(&key).unwrap(), vec![json!(2)]);
  }

  #[tokio::test]
  async fn test_fetcher_may_call_back_into_client() {
    let client = QueryClient::new();
    let key = query_key!["admin", "members"];
    client.set_query_data(&query_key!["admin", "users"], vec![json!({ "id": "u1" })]);

    let inner = client.clone();
    let data = client
      .fetch_query(
        &key,
        move || {
          let users = inner
            .get_query_data(&query_key!["admin", "users"])
            .map_or(0, |users| users.len());
          async move { Ok(vec![json!({ "users": users })]) }
        },
        FetchOptions::default(),
      )
      .await
      .unwrap();

    assert_eq!(*data, vec![json!({ "users": 1 })]);
  }

  #[tokio::test]
  async fn test_settled_tells_discarded_from_committed() {
    let client = QueryClient::new();
    let key = query_key!["admin", "tenders"];
    let counter = Arc::new(AtomicU32::new(0));

    let fetch = {
      let client = client.clone();
      let key = key.clone();
      let fetcher = counting_fetcher(&counter, Duration::from_millis(30));
      tokio::spawn(async move {
        client
          .fetch_query_settled(&key, fetcher, FetchOptions::default())
          .await
      })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    client.cancel_queries(&key);
    assert!(matches!(fetch.await.unwrap(), Settled::Discarded));

    let (a, b) = tokio::join!(
      client.fetch_query_settled(
        &key,
        counting_fetcher(&counter, Duration::from_millis(10)),
        FetchOptions::default()
      ),
      client.fetch_query_settled(
        &key,
        counting_fetcher(&counter, Duration::from_millis(10)),
        FetchOptions::default()
      ),
    );
    // Both joiners of the committed fetch see it as committed
    assert!(matches!(a, Settled::Committed(Ok(_))));
    assert!(matches!(b, Settled::Committed(Ok(_))));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_hydrates_from_storage() {
    let storage = SqliteStorage::in_memory().unwrap();
    let key = query_key!["admin", "careers"];
    storage.store(&key, &[json!({ "id": "c1" })]).unwrap();

    let client = QueryClient::with_storage(storage);
    let counter = Arc::new(AtomicU32::new(0));
    let data = client
      .fetch_query(&key, counting_fetcher(&counter, Duration::ZERO), FetchOptions::default())
      .await
      .unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(*data, vec![json!({ "id": "c1" })]);
  }

  #[tokio::test]
  async fn test_remove_queries() {
    let client = QueryClient::new();
    client.set_query_data(&query_key!["admin", "news"], vec![]);
    client.set_query_data(&query_key!["public", "news"], vec![]);

    assert_eq!(client.remove_queries(&query_key!["admin"]), 1);
    assert!(client.entry_state(&query_key!["admin", "news"]).is_none());
    assert!(client.entry_state(&query_key!["public", "news"]).is_some());
  }
}
