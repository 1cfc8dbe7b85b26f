//! Admin mutations: run an action, invalidate the affected lists, notify.

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::context::AdminContext;
use crate::error::ApiError;
use crate::query::QueryKey;

/// Prefix of the failure message when no error message is configured.
pub const DEFAULT_ACTION_ERROR: &str = "Action failed";

pub(crate) type ActionFn<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<O, ApiError>> + Send + Sync>;
pub(crate) type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Outcome of the most recent call.
#[derive(Debug, Clone)]
struct ActionState<O> {
  pending: usize,
  error: Option<ApiError>,
  data: Option<O>,
}

/// Counts one call as pending until dropped, even if the call is cancelled.
struct PendingGuard<'a, O> {
  state: &'a Mutex<ActionState<O>>,
}

impl<'a, O> PendingGuard<'a, O> {
  fn enter(state: &'a Mutex<ActionState<O>>) -> Self {
    state.lock().unwrap_or_else(PoisonError::into_inner).pending += 1;
    Self { state }
  }
}

impl<O> Drop for PendingGuard<'_, O> {
  fn drop(&mut self) {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    state.pending = state.pending.saturating_sub(1);
  }
}

/// A mutation bound to the lists it affects.
pub struct AdminAction<I, O> {
  ctx: AdminContext,
  action: ActionFn<I, O>,
  invalidates: Vec<QueryKey>,
  success_message: Option<String>,
  error_message: Option<String>,
  on_success: Option<Callback<O>>,
  state: Mutex<ActionState<O>>,
}

impl<I, O> AdminAction<I, O>
where
  I: Send + 'static,
  O: Clone + Send + 'static,
{
  pub fn new<F, Fut>(ctx: &AdminContext, action: F) -> Self
  where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, ApiError>> + Send + 'static,
  {
    Self {
      ctx: ctx.clone(),
      action: Arc::new(move |input| action(input).boxed()),
      invalidates: Vec::new(),
      success_message: None,
      error_message: None,
      on_success: None,
      state: Mutex::new(ActionState {
        pending: 0,
        error: None,
        data: None,
      }),
    }
  }

  /// Mark keys starting with `key` stale after every successful call.
  pub fn invalidates(mut self, key: QueryKey) -> Self {
    self.invalidates.push(key);
    self
  }

  pub fn success_message(mut self, message: impl Into<String>) -> Self {
    self.success_message = Some(message.into());
    self
  }

  pub fn error_message(mut self, message: impl Into<String>) -> Self {
    self.error_message = Some(message.into());
    self
  }

  /// Called with the result after invalidation and the success message.
  pub fn on_success(mut self, callback: impl Fn(&O) + Send + Sync + 'static) -> Self {
    self.on_success = Some(Arc::new(callback));
    self
  }

  fn state(&self) -> MutexGuard<'_, ActionState<O>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn is_pending(&self) -> bool {
    self.state().pending > 0
  }

  /// Error of the last settled call, if it failed.
  pub fn error(&self) -> Option<ApiError> {
    self.state().error.clone()
  }

  /// Result of the last settled call, if it succeeded.
  pub fn data(&self) -> Option<O> {
    self.state().data.clone()
  }

  /// Forget the last outcome.
  pub fn reset(&self) {
    let mut state = self.state();
    state.error = None;
    state.data = None;
  }

  /// Run the action once.
  ///
  /// On success every registered key is invalidated, the success message is
  /// shown and the success callback runs, in that order. On failure the error
  /// message is shown and the error is returned; nothing is invalidated and
  /// nothing is retried.
  pub async fn trigger(&self, input: I) -> Result<O, ApiError> {
    let _pending = PendingGuard::enter(&self.state);
    let result = (self.action)(input).await;

    match &result {
      Ok(output) => {
        for key in &self.invalidates {
          self.ctx.queries().invalidate_queries(key);
        }
        if let Some(message) = &self.success_message {
          self.ctx.notifier().success(message);
        }
        if let Some(callback) = &self.on_success {
          callback(output);
        }
      }
      Err(e) => {
        tracing::warn!(error = %e, "admin action failed");
        let message = match &self.error_message {
          Some(message) => message.clone(),
          None => format!("{}: {}", DEFAULT_ACTION_ERROR, e),
        };
        self.ctx.notifier().error(&message);
      }
    }

    {
      let mut state = self.state();
      match &result {
        Ok(output) => {
          state.data = Some(output.clone());
          state.error = None;
        }
        Err(e) => {
          state.error = Some(e.clone());
        }
      }
    }
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::testing;
  use crate::query::QueryClient;
  use crate::query_key;
  use serde_json::{json, Value};
  use std::sync::atomic::{AtomicU32, Ordering};

  fn seeded_queries() -> QueryClient {
    let queries = QueryClient::new();
    queries.set_query_data(&query_key!["admin", "members"], vec![json!({ "id": "m1" })]);
    queries.set_query_data(&query_key!["admin", "users"], vec![json!({ "id": "u1" })]);
    queries
  }

  #[tokio::test]
  async fn test_success_invalidates_and_notifies_once() {
    let (ctx, notifier) = testing::context(seeded_queries());
    let seen = Arc::new(AtomicU32::new(0));
    let seen_clone = seen.clone();

    let action = AdminAction::new(&ctx, |id: String| async move { Ok(json!({ "deleted": id })) })
      .invalidates(query_key!["admin", "members"])
      .success_message("Member deleted")
      .on_success(move |result: &Value| {
        assert_eq!(result["deleted"], "m1");
        seen_clone.fetch_add(1, Ordering::SeqCst);
      });

    let result = action.trigger("m1".to_string()).await.unwrap();

    assert_eq!(result, json!({ "deleted": "m1" }));
    assert!(ctx.queries().is_invalidated(&query_key!["admin", "members"]));
    assert!(!ctx.queries().is_invalidated(&query_key!["admin", "users"]));
    assert_eq!(notifier.successes(), vec!["Member deleted".to_string()]);
    assert!(notifier.errors().is_empty());
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(!action.is_pending());
    assert_eq!(action.data(), Some(result));
    assert!(action.error().is_none());
  }

  #[tokio::test]
  async fn test_failure_surfaces_error_without_invalidating() {
    let (ctx, notifier) = testing::context(seeded_queries());
    let called = Arc::new(AtomicU32::new(0));
    let called_clone = called.clone();

    let action = AdminAction::new(&ctx, |_: String| async {
      Err::<Value, _>(ApiError::Action("email already registered".to_string()))
    })
    .invalidates(query_key!["admin", "members"])
    .success_message("Member created")
    .error_message("Could not create member")
    .on_success(move |_| {
      called_clone.fetch_add(1, Ordering::SeqCst);
    });

    let err = action.trigger("x".to_string()).await.unwrap_err();

    assert_eq!(err, ApiError::Action("email already registered".to_string()));
    assert!(!ctx.queries().is_invalidated(&query_key!["admin", "members"]));
    assert_eq!(notifier.errors(), vec!["Could not create member".to_string()]);
    assert!(notifier.successes().is_empty());
    assert_eq!(called.load(Ordering::SeqCst), 0);
    assert_eq!(action.error(), Some(err));
  }

  #[tokio::test]
  async fn test_default_error_message_includes_cause() {
    let (ctx, notifier) = testing::context(QueryClient::new());
    let action = AdminAction::new(&ctx, |_: ()| async {
      Err::<(), _>(ApiError::Action("timeout".to_string()))
    });

    assert!(action.trigger(()).await.is_err());
    assert_eq!(notifier.errors(), vec!["Action failed: timeout".to_string()]);
  }

  #[tokio::test]
  async fn test_prefix_invalidation_and_reset() {
    let (ctx, notifier) = testing::context(seeded_queries());
    let action = AdminAction::new(&ctx, |_: ()| async { Ok(()) }).invalidates(query_key!["admin"]);

    action.trigger(()).await.unwrap();
    assert!(ctx.queries().is_invalidated(&query_key!["admin", "members"]));
    assert!(ctx.queries().is_invalidated(&query_key!["admin", "users"]));
    // No success message configured
    assert!(notifier.messages().is_empty());

    action.reset();
    assert!(action.data().is_none());
  }

  #[tokio::test]
  async fn test_cancelled_call_is_not_left_pending() {
    let (ctx, notifier) = testing::context(QueryClient::new());
    let action = AdminAction::new(&ctx, |_: ()| async {
      tokio::time::sleep(std::time::Duration::from_secs(5)).await;
      Ok(())
    })
    .success_message("Saved");

    let timed_out =
      tokio::time::timeout(std::time::Duration::from_millis(20), action.trigger(())).await;

    assert!(timed_out.is_err());
    assert!(!action.is_pending());
    assert!(action.data().is_none());
    assert!(notifier.messages().is_empty());
  }
}
