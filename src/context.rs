//! Explicit handle to the services every hook needs.
//!
//! Hooks receive an `AdminContext` at construction instead of looking
//! services up globally. The builder refuses to produce a context with a
//! missing service, so misconfiguration fails at startup.

use std::sync::Arc;

use crate::api::ApiClient;
use crate::error::ContextError;
use crate::notify::Notifier;
use crate::query::QueryClient;

#[derive(Clone)]
pub struct AdminContext {
  api: ApiClient,
  queries: QueryClient,
  notifier: Arc<dyn Notifier>,
}

impl AdminContext {
  pub fn builder() -> AdminContextBuilder {
    AdminContextBuilder::default()
  }

  pub fn api(&self) -> &ApiClient {
    &self.api
  }

  pub fn queries(&self) -> &QueryClient {
    &self.queries
  }

  pub fn notifier(&self) -> &dyn Notifier {
    self.notifier.as_ref()
  }
}

#[derive(Default)]
pub struct AdminContextBuilder {
  api: Option<ApiClient>,
  queries: Option<QueryClient>,
  notifier: Option<Arc<dyn Notifier>>,
}

impl AdminContextBuilder {
  pub fn api(mut self, api: ApiClient) -> Self {
    self.api = Some(api);
    self
  }

  /// Use an existing query cache. Without one, a fresh in-memory cache is used.
  pub fn queries(mut self, queries: QueryClient) -> Self {
    self.queries = Some(queries);
    self
  }

  pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = Some(notifier);
    self
  }

  pub fn build(self) -> Result<AdminContext, ContextError> {
    Ok(AdminContext {
      api: self.api.ok_or(ContextError::Missing("api client"))?,
      queries: self.queries.unwrap_or_default(),
      notifier: self.notifier.ok_or(ContextError::Missing("notifier"))?,
    })
  }
}

#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use crate::config::ApiConfig;
  use crate::notify::RecordingNotifier;

  /// Context whose API client points nowhere, for hooks fed by closures.
  pub fn context(queries: QueryClient) -> (AdminContext, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::new());
    let api = ApiClient::with_token(
      &ApiConfig {
        url: "http://127.0.0.1:9/".to_string(),
        timeout_secs: 1,
      },
      None,
    )
    .unwrap();
    let ctx = AdminContext::builder()
      .api(api)
      .queries(queries)
      .notifier(notifier.clone())
      .build()
      .unwrap();
    (ctx, notifier)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::notify::RecordingNotifier;

  #[test]
  fn test_missing_services_fail_fast() {
    let err = AdminContext::builder()
      .notifier(Arc::new(RecordingNotifier::new()))
      .build()
      .err();
    assert_eq!(err, Some(ContextError::Missing("api client")));

    let (ctx, _) = testing::context(QueryClient::new());
    let err = AdminContext::builder().api(ctx.api().clone()).build().err();
    assert_eq!(err, Some(ContextError::Missing("notifier")));
  }

  #[test]
  fn test_queries_default_to_fresh_cache() {
    let (ctx, _) = testing::context(QueryClient::new());
    let built = AdminContext::builder()
      .api(ctx.api().clone())
      .notifier(Arc::new(RecordingNotifier::new()))
      .build()
      .unwrap();
    assert!(built.queries().get_query_data(&crate::query_key!["admin"]).is_none());
  }
}
