//! Admin list queries: fetch + cache + error notification.
//!
//! `AdminQuery<T>` is one observer of a cache key. It is driven the same way
//! from a CLI and from an event loop:
//!
//! ```ignore
//! let mut members = AdminQuery::<Member>::new(&ctx, Resource::Members.query_key(), move || {
//!     let api = api.clone();
//!     async move { api.get("admin/members").await }
//! })
//! .with_field("members");
//!
//! // One-shot
//! let rows = members.load().await?;
//!
//! // Event loop
//! members.fetch();
//! // on each tick
//! if members.poll() {
//!     // data, loading or error changed, re-render
//! }
//! ```

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::api::envelope::{decode_records, extract_array};
use crate::context::AdminContext;
use crate::error::ApiError;
use crate::query::{FetchOptions, ObserverGuard, QueryKey, Settled};

/// Message shown when a list fails to load and no handler was given.
pub const DEFAULT_FETCH_ERROR: &str = "Failed to load data";

/// Replaces the default failure notification.
pub type ErrorHandler = Arc<dyn Fn(&ApiError) + Send + Sync>;

type FetcherFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, ApiError>> + Send + Sync>;

/// Where an observer is in its fetch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
  /// Nothing requested yet
  Idle,
  /// A fetch is pending
  Loading,
  /// The last fetch succeeded
  Success,
  /// The last fetch failed
  Error(ApiError),
}

impl QueryStatus {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryStatus::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryStatus::Success)
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryStatus::Error(_))
  }

  pub fn error(&self) -> Option<&ApiError> {
    match self {
      QueryStatus::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// One observer of an admin list query.
pub struct AdminQuery<T> {
  ctx: AdminContext,
  key: QueryKey,
  fetcher: FetcherFn,
  field: Option<String>,
  stale_time: Duration,
  enabled: bool,
  on_error: Option<ErrorHandler>,
  status: QueryStatus,
  data: Vec<T>,
  seen_version: Option<u64>,
  receiver: Option<oneshot::Receiver<Settled>>,
  _observer: ObserverGuard,
}

impl<T: DeserializeOwned> AdminQuery<T> {
  /// Create an observer of `key` whose data comes from `fetcher`.
  ///
  /// The fetcher returns the raw response; records are pulled out of it
  /// with the envelope rules (see [`with_field`](Self::with_field)).
  pub fn new<F, Fut>(ctx: &AdminContext, key: QueryKey, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
  {
    let observer = ctx.queries().observe(&key);
    let mut query = Self {
      ctx: ctx.clone(),
      key,
      fetcher: Arc::new(move || fetcher().boxed()),
      field: None,
      stale_time: ctx.queries().stale_time(),
      enabled: true,
      on_error: None,
      status: QueryStatus::Idle,
      data: Vec::new(),
      seen_version: None,
      receiver: None,
      _observer: observer,
    };
    // Start from whatever the cache already holds
    query.sync_from_cache();
    query
  }

  /// Name of the envelope field holding the records (e.g. "members").
  pub fn with_field(mut self, field: impl Into<String>) -> Self {
    self.field = Some(field.into());
    self
  }

  /// Set how long fetched data stays fresh for this query.
  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.stale_time = duration;
    self
  }

  /// Disabled queries never fetch.
  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  /// Handle fetch failures yourself instead of the generic notification.
  pub fn on_error(mut self, handler: impl Fn(&ApiError) + Send + Sync + 'static) -> Self {
    self.on_error = Some(Arc::new(handler));
    self
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn status(&self) -> &QueryStatus {
    &self.status
  }

  /// Records from the last successful fetch or cache write. Empty by default.
  pub fn data(&self) -> &[T] {
    &self.data
  }

  pub fn is_loading(&self) -> bool {
    self.status.is_loading()
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.status.error()
  }

  /// Whether the cached data is due for a refetch.
  pub fn is_stale(&self) -> bool {
    match self.ctx.queries().entry_state(&self.key) {
      Some(state) => {
        state.is_invalidated
          || state
            .updated_at
            .map_or(true, |at| at.elapsed() > self.stale_time)
      }
      None => true,
    }
  }

  /// Start fetching in the background if not already loading.
  ///
  /// Fresh cached data is used without a request; a fetch already started by
  /// another observer of the same key is shared.
  pub fn fetch(&mut self) {
    if !self.enabled || self.status.is_loading() {
      return;
    }
    self.spawn_fetch(false);
  }

  /// Force a refetch, superseding any pending one.
  pub fn refetch(&mut self) {
    if !self.enabled {
      return;
    }
    // Drop the receiver so a pending result is ignored
    self.receiver = None;
    self.spawn_fetch(true);
  }

  /// Fetch and wait for the result.
  pub async fn load(&mut self) -> Result<&[T], ApiError> {
    if !self.enabled {
      return Ok(&self.data);
    }

    self.receiver = None;
    self.status = QueryStatus::Loading;
    let options = self.fetch_options(false);
    let settled = self
      .ctx
      .queries()
      .fetch_query_settled(&self.key, self.fetch_fn(), options)
      .await;
    self.apply(settled);

    if let QueryStatus::Error(e) = &self.status {
      return Err(e.clone());
    }
    Ok(&self.data)
  }

  /// Pick up finished fetches and cache writes made elsewhere.
  ///
  /// Also starts a refetch when the key has been invalidated since the last
  /// successful read. Returns `true` if anything visible changed.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;

    if let Some(receiver) = &mut self.receiver {
      match receiver.try_recv() {
        Ok(settled) => {
          self.receiver = None;
          self.apply(settled);
          changed = true;
        }
        Err(oneshot::error::TryRecvError::Empty) => {}
        Err(oneshot::error::TryRecvError::Closed) => {
          // The task went away without an answer; not an error
          self.receiver = None;
          self.apply(Settled::Discarded);
          changed = true;
        }
      }
    }

    changed |= self.sync_from_cache();

    let can_refetch = self.enabled && !self.status.is_loading() && !self.status.is_error();
    if can_refetch && self.ctx.queries().is_invalidated(&self.key) {
      tracing::debug!(key = %self.key, "refetching invalidated query");
      self.spawn_fetch(false);
      changed = true;
    }

    changed
  }

  fn fetch_options(&self, force: bool) -> FetchOptions {
    FetchOptions {
      stale_time: self.stale_time,
      force,
    }
  }

  /// Fetch closure handed to the cache: call the fetcher, then extract.
  fn fetch_fn(
    &self,
  ) -> impl FnOnce() -> BoxFuture<'static, Result<Vec<Value>, ApiError>> + Send + 'static {
    let fetcher = Arc::clone(&self.fetcher);
    let field = self.field.clone();
    move || {
      let response = fetcher();
      async move {
        let value = response.await?;
        Ok(extract_array(&value, field.as_deref()))
      }
      .boxed()
    }
  }

  fn spawn_fetch(&mut self, force: bool) {
    let (tx, rx) = oneshot::channel();
    self.receiver = Some(rx);
    self.status = QueryStatus::Loading;

    let queries = self.ctx.queries().clone();
    let key = self.key.clone();
    let fetch = self.fetch_fn();
    let options = self.fetch_options(force);
    tokio::spawn(async move {
      let settled = queries.fetch_query_settled(&key, fetch, options).await;
      // Ignore send errors - the observer may be gone
      let _ = tx.send(settled);
    });
  }

  /// Take a finished fetch into the observer's state.
  ///
  /// Records are always re-read from the cache: another write may have
  /// landed since the fetch settled, and a discarded result must never show.
  fn apply(&mut self, settled: Settled) {
    match settled {
      Settled::Committed(Ok(records)) => {
        self.status = QueryStatus::Success;
        self.seen_version = None;
        if !self.sync_from_cache() {
          // Entry removed meanwhile; the committed result is still the latest
          self.data = decode_records(&records);
        }
      }
      Settled::Committed(Err(e)) => {
        self.report(&e);
        self.status = QueryStatus::Error(e);
      }
      Settled::Discarded => {
        tracing::debug!(key = %self.key, "fetch was discarded, keeping cached data");
        self.seen_version = None;
        self.sync_from_cache();
        self.status = if self.ctx.queries().get_query_data(&self.key).is_some() {
          QueryStatus::Success
        } else {
          QueryStatus::Idle
        };
      }
    }
  }

  fn report(&self, error: &ApiError) {
    tracing::warn!(key = %self.key, %error, "admin query failed");
    match &self.on_error {
      Some(handler) => handler(error),
      None => self.ctx.notifier().error(DEFAULT_FETCH_ERROR),
    }
  }

  /// Re-read records when the cache entry changed since we last looked.
  fn sync_from_cache(&mut self) -> bool {
    let Some(state) = self.ctx.queries().entry_state(&self.key) else {
      return false;
    };
    if self.seen_version == Some(state.version) {
      return false;
    }
    self.seen_version = Some(state.version);

    let Some(records) = state.data else {
      return false;
    };
    self.data = decode_records(&records);
    if matches!(self.status, QueryStatus::Idle) {
      self.status = QueryStatus::Success;
    }
    true
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for AdminQuery<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AdminQuery")
      .field("key", &self.key)
      .field("status", &self.status)
      .field("records", &self.data.len())
      .field("stale_time", &self.stale_time)
      .field("enabled", &self.enabled)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::{Member, MemberStatus};
  use crate::context::testing;
  use crate::hooks::OptimisticMutation;
  use crate::query::QueryClient;
  use crate::query_key;
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn members_response() -> Value {
    json!({ "members": [
      { "id": "m1", "firstName": "Ada", "membershipType": "INDIVIDUAL" },
      { "id": "m2", "firstName": "Grace", "membershipType": "GROUP" }
    ]})
  }

  fn counting_query(
    ctx: &AdminContext,
    counter: &Arc<AtomicU32>,
    delay: Duration,
  ) -> AdminQuery<Member> {
    let counter = counter.clone();
    AdminQuery::new(ctx, query_key!["admin", "members"], move || {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        Ok(members_response())
      }
    })
    .with_field("members")
  }

  #[tokio::test]
  async fn test_load_extracts_named_field() {
    let (ctx, notifier) = testing::context(QueryClient::new());
    let counter = Arc::new(AtomicU32::new(0));
    let mut query = counting_query(&ctx, &counter, Duration::ZERO);

    assert!(query.data().is_empty());
    assert_eq!(query.status(), &QueryStatus::Idle);

    let rows = query.load().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].first_name, "Grace");
    assert!(query.status().is_success());
    assert!(notifier.messages().is_empty());
  }

  #[tokio::test]
  async fn test_concurrent_observers_share_one_fetch() {
    let (ctx, _) = testing::context(QueryClient::new());
    let counter = Arc::new(AtomicU32::new(0));
    let mut first = counting_query(&ctx, &counter, Duration::from_millis(20));
    let mut second = counting_query(&ctx, &counter, Duration::from_millis(20));

    first.fetch();
    second.fetch();
    assert!(first.is_loading() && second.is_loading());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(first.poll());
    assert!(second.poll());

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(first.data(), second.data());
    assert_eq!(first.data().len(), 2);
  }

  #[tokio::test]
  async fn test_fetch_while_loading_is_noop() {
    let (ctx, _) = testing::context(QueryClient::new());
    let counter = Arc::new(AtomicU32::new(0));
    let mut query = counting_query(&ctx, &counter, Duration::from_millis(20));

    query.fetch();
    query.fetch();
    tokio::time::sleep(Duration::from_millis(50)).await;
    query.poll();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_failure_emits_generic_notification() {
    let (ctx, notifier) = testing::context(QueryClient::new());
    let mut query: AdminQuery<Member> = AdminQuery::new(&ctx, query_key!["admin", "members"], || async {
      Err(ApiError::Action("server down".to_string()))
    });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert_eq!(query.error(), Some(&ApiError::Action("server down".to_string())));
    assert!(!query.is_loading());
    assert!(query.data().is_empty());
    assert_eq!(notifier.errors(), vec![DEFAULT_FETCH_ERROR.to_string()]);
  }

  #[tokio::test]
  async fn test_custom_error_handler_replaces_notification() {
    let (ctx, notifier) = testing::context(QueryClient::new());
    let handled = Arc::new(AtomicU32::new(0));
    let handled_clone = handled.clone();

    let mut query: AdminQuery<Member> =
      AdminQuery::new(&ctx, query_key!["admin", "members"], || async {
        Err(ApiError::Action("nope".to_string()))
      })
      .on_error(move |_| {
        handled_clone.fetch_add(1, Ordering::SeqCst);
      });

    let err = query.load().await.unwrap_err();
    assert_eq!(err, ApiError::Action("nope".to_string()));
    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert!(notifier.messages().is_empty());
    assert!(query.status().is_error());
  }

  #[tokio::test]
  async fn test_disabled_query_never_fetches() {
    let (ctx, _) = testing::context(QueryClient::new());
    let counter = Arc::new(AtomicU32::new(0));
    let mut query = counting_query(&ctx, &counter, Duration::ZERO).enabled(false);

    query.fetch();
    query.refetch();
    assert!(query.load().await.unwrap().is_empty());
    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();

    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(query.status(), &QueryStatus::Idle);
  }

  #[tokio::test]
  async fn test_poll_sees_writes_from_other_hooks() {
    let (ctx, _) = testing::context(QueryClient::new());
    let counter = Arc::new(AtomicU32::new(0));
    let mut query = counting_query(&ctx, &counter, Duration::ZERO);
    query.load().await.unwrap();
    assert!(!query.poll());

    ctx
      .queries()
      .set_query_data(query.key(), vec![json!({ "id": "m9", "firstName": "Optimistic" })]);

    assert!(query.poll());
    assert_eq!(query.data().len(), 1);
    assert_eq!(query.data()[0].id, "m9");
  }

  #[tokio::test]
  async fn test_invalidation_refetches_on_next_poll() {
    let (ctx, _) = testing::context(QueryClient::new());
    let counter = Arc::new(AtomicU32::new(0));
    let mut query = counting_query(&ctx, &counter, Duration::ZERO);
    query.load().await.unwrap();

    ctx.queries().invalidate_queries(&query_key!["admin", "members"]);
    assert!(query.is_stale());
    assert!(query.poll());
    assert!(query.is_loading());

    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert!(!query.is_stale());
  }

  #[tokio::test]
  async fn test_refetch_bypasses_fresh_cache() {
    let (ctx, _) = testing::context(QueryClient::new());
    let counter = Arc::new(AtomicU32::new(0));
    let mut query = counting_query(&ctx, &counter, Duration::ZERO);
    query.load().await.unwrap();
    query.load().await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    query.refetch();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(query.poll());
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_malformed_response_is_empty_success() {
    let (ctx, notifier) = testing::context(QueryClient::new());
    let mut query: AdminQuery<Member> =
      AdminQuery::new(&ctx, query_key!["admin", "members"], || async {
        Ok(json!({ "unexpected": "shape" }))
      })
      .with_field("members");

    assert!(query.load().await.unwrap().is_empty());
    assert!(query.status().is_success());
    assert!(notifier.messages().is_empty());
  }

  #[tokio::test]
  async fn test_observer_matches_cache_after_rollback_during_fetch() {
    let (ctx, notifier) = testing::context(QueryClient::new());
    let key = query_key!["admin", "members"];
    ctx
      .queries()
      .set_query_data(&key, vec![json!({ "id": "m1", "status": "PENDING" })]);

    let mut query: AdminQuery<Member> = AdminQuery::new(&ctx, key.clone(), || async {
      tokio::time::sleep(Duration::from_millis(30)).await;
      Ok(json!({ "members": [{ "id": "superseded", "status": "REJECTED" }] }))
    })
    .with_field("members");
    query.refetch();
    tokio::time::sleep(Duration::from_millis(5)).await;

    // Cancels the refetch above, then rolls back
    let mutation = OptimisticMutation::new(
      &ctx,
      key.clone(),
      |_: String| async { Err::<(), _>(ApiError::Action("rejected".to_string())) },
      |mut members: Vec<Member>, id: &String| {
        for member in members.iter_mut().filter(|m| &m.id == id) {
          member.status = MemberStatus::Approved;
        }
        members
      },
    );
    assert!(mutation.trigger("m1".to_string()).await.is_err());

    tokio::time::sleep(Duration::from_millis(50)).await;
    query.poll();
    query.poll();

    let cached: Vec<Member> = decode_records(&ctx.queries().get_query_data(&key).unwrap());
    assert_eq!(query.data(), cached.as_slice());
    assert_eq!(query.data()[0].id, "m1");
    assert_eq!(query.data()[0].status, MemberStatus::Pending);
    assert!(query.status().is_success());
    assert!(notifier.errors().is_empty());
  }

  #[tokio::test]
  async fn test_load_reports_cache_contents_after_discarded_fetch() {
    let (ctx, _) = testing::context(QueryClient::new());
    let key = query_key!["admin", "members"];
    let mut query: AdminQuery<Member> = AdminQuery::new(&ctx, key.clone(), || async {
      tokio::time::sleep(Duration::from_millis(30)).await;
      Ok(json!([{ "id": "late" }]))
    });

    let queries = ctx.queries().clone();
    let cancel_key = key.clone();
    let canceller = tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(5)).await;
      queries.cancel_queries(&cancel_key);
    });

    assert!(query.load().await.unwrap().is_empty());
    canceller.await.unwrap();
    assert_eq!(query.status(), &QueryStatus::Idle);
    assert!(ctx.queries().get_query_data(&key).is_none());
  }
}
