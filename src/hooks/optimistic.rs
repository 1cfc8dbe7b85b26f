//! Mutations applied to the cache before the server confirms them.
//!
//! Per call:
//! 1. cancel any in-flight fetch of the key and snapshot its entry
//! 2. write `update(snapshot, &input)` to the key
//! 3. run the action; on success mark the key stale so the provisional value
//!    is replaced by a refetch, on failure put the snapshot back
//!
//! After a call settles the key holds either the untouched snapshot or a
//! value flagged for refetch, never an unconfirmed optimistic one. When
//! calls on one key overlap, a rollback can't know the server state and
//! falls back to flagging the key.

use futures::future::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;

use super::admin_action::{ActionFn, Callback};
use crate::api::envelope::decode_records;
use crate::context::AdminContext;
use crate::error::ApiError;
use crate::query::{OptimisticWrite, QueryClient, QueryKey, Snapshot};

type UpdateFn<I, T> = Arc<dyn Fn(Vec<T>, &I) -> Vec<T> + Send + Sync>;

pub struct OptimisticMutation<I, O, T> {
  ctx: AdminContext,
  key: QueryKey,
  action: ActionFn<I, O>,
  update: UpdateFn<I, T>,
  on_success: Option<Callback<O>>,
  on_error: Option<Callback<ApiError>>,
}

/// A provisional write that is rolled back if the call is dropped before it
/// settles.
struct Provisional<'a> {
  queries: &'a QueryClient,
  key: &'a QueryKey,
  pending: Option<(OptimisticWrite, Snapshot)>,
}

impl Provisional<'_> {
  fn confirm(mut self) {
    if let Some((write, _)) = self.pending.take() {
      self.queries.confirm_optimistic(self.key, write);
    }
  }

  fn rollback(mut self) {
    if let Some((write, snapshot)) = self.pending.take() {
      self.queries.rollback_optimistic(self.key, write, snapshot);
    }
  }
}

impl Drop for Provisional<'_> {
  fn drop(&mut self) {
    if let Some((write, snapshot)) = self.pending.take() {
      tracing::debug!(key = %self.key, "optimistic call dropped, rolling back");
      self.queries.rollback_optimistic(self.key, write, snapshot);
    }
  }
}

impl<I, O, T> OptimisticMutation<I, O, T>
where
  I: Send + 'static,
  O: Send + 'static,
  T: Serialize + DeserializeOwned,
{
  /// `update` computes the provisional records from the current ones and the
  /// call's input. It must be pure: it may run against any snapshot.
  ///
  /// The provisional list goes through `T` and back to JSON, so records that
  /// don't decode as `T` are left out of it and fields `T` doesn't model are
  /// dropped or defaulted. A rollback restores the original records as is.
  pub fn new<F, Fut, U>(ctx: &AdminContext, key: QueryKey, action: F, update: U) -> Self
  where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, ApiError>> + Send + 'static,
    U: Fn(Vec<T>, &I) -> Vec<T> + Send + Sync + 'static,
  {
    Self {
      ctx: ctx.clone(),
      key,
      action: Arc::new(move |input| action(input).boxed()),
      update: Arc::new(update),
      on_success: None,
      on_error: None,
    }
  }

  pub fn on_success(mut self, callback: impl Fn(&O) + Send + Sync + 'static) -> Self {
    self.on_success = Some(Arc::new(callback));
    self
  }

  /// Called after the rollback.
  pub fn on_error(mut self, callback: impl Fn(&ApiError) + Send + Sync + 'static) -> Self {
    self.on_error = Some(Arc::new(callback));
    self
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  fn provisional(&self, snapshot: &Snapshot, input: &I) -> Result<Vec<serde_json::Value>, ApiError> {
    (self.update)(decode_records(snapshot.records()), input)
      .iter()
      .map(serde_json::to_value)
      .collect::<Result<Vec<_>, _>>()
      .map_err(|e| ApiError::Encode {
        what: format!("optimistic value for {}", self.key),
        message: e.to_string(),
      })
  }

  pub async fn trigger(&self, input: I) -> Result<O, ApiError> {
    let queries = self.ctx.queries();

    // A fetch landing after the optimistic write would clobber it
    queries.cancel_queries(&self.key);

    // Retry if another writer got in between the snapshot and the write
    let (write, snapshot) = loop {
      let snapshot = queries.snapshot(&self.key);
      let records = self.provisional(&snapshot, &input)?;
      if let Some(write) = queries.apply_optimistic(&self.key, &snapshot, records) {
        break (write, snapshot);
      }
    };
    tracing::debug!(key = %self.key, "applied optimistic update");

    let provisional = Provisional {
      queries,
      key: &self.key,
      pending: Some((write, snapshot)),
    };

    match (self.action)(input).await {
      Ok(output) => {
        provisional.confirm();
        if let Some(callback) = &self.on_success {
          callback(&output);
        }
        Ok(output)
      }
      Err(e) => {
        provisional.rollback();
        tracing::debug!(key = %self.key, error = %e, "rolled back optimistic update");
        if let Some(callback) = &self.on_error {
          callback(&e);
        }
        Err(e)
      }
    }
  }
}
