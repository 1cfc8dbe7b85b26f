use crate::config::{ApiConfig, Config};
use crate::error::ApiError;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use url::Url;

/// One outbound call: method, path relative to the API base, query and body.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
  pub method: Method,
  pub path: String,
  pub query: Vec<(String, String)>,
  pub body: Option<Value>,
}

impl RequestDescriptor {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: Vec::new(),
      body: None,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::GET, path)
  }

  pub fn post(path: impl Into<String>, body: Value) -> Self {
    Self::new(Method::POST, path).with_body(body)
  }

  pub fn put(path: impl Into<String>, body: Value) -> Self {
    Self::new(Method::PUT, path).with_body(body)
  }

  pub fn patch(path: impl Into<String>, body: Value) -> Self {
    Self::new(Method::PATCH, path).with_body(body)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::DELETE, path)
  }

  pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
    self.query.push((key.into(), value.to_string()));
    self
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  /// Serialize a typed payload into the request body.
  pub fn with_json<T: Serialize>(self, body: &T) -> Result<Self, ApiError> {
    let value = serde_json::to_value(body).map_err(|e| ApiError::Encode {
      what: format!("request body for {}", self.path),
      message: e.to_string(),
    })?;
    Ok(self.with_body(value))
  }
}

/// Site API client wrapper
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl ApiClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    Self::with_token(config, Config::get_api_token())
  }

  pub fn with_token(config: &ApiConfig, token: Option<String>) -> Result<Self> {
    let mut base_url = Url::parse(&config.url)
      .map_err(|e| eyre!("Invalid API url '{}': {}", config.url, e))?;

    // Url::join replaces the last segment unless the base ends with a slash
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let http = reqwest::Client::builder()
      .timeout(config.timeout())
      .user_agent(concat!("backoffice/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      token,
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  fn url_for(&self, path: &str) -> Result<Url, ApiError> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| ApiError::Transport {
        path: path.to_string(),
        message: format!("invalid path: {}", e),
      })
  }

  /// Send a request and return the JSON response.
  ///
  /// An empty success body comes back as `Value::Null`.
  pub async fn send(&self, request: &RequestDescriptor) -> Result<Value, ApiError> {
    let url = self.url_for(&request.path)?;
    tracing::debug!(method = %request.method, %url, "api request");

    let mut builder = self.http.request(request.method.clone(), url);
    if !request.query.is_empty() {
      builder = builder.query(&request.query);
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }
    if let Some(token) = &self.token {
      builder = builder.bearer_auth(token);
    }

    let response = builder.send().await.map_err(|e| {
      tracing::warn!(path = %request.path, error = %e, "api request failed");
      ApiError::Transport {
        path: request.path.clone(),
        message: e.to_string(),
      }
    })?;

    let status = response.status();
    let text = response.text().await.map_err(|e| ApiError::Transport {
      path: request.path.clone(),
      message: format!("failed to read body: {}", e),
    })?;

    if !status.is_success() {
      let message = error_message(status, &text);
      tracing::warn!(method = %request.method, path = %request.path, status = status.as_u16(), %message, "api error");
      return Err(ApiError::Status {
        method: request.method.to_string(),
        path: request.path.clone(),
        status: status.as_u16(),
        message,
      });
    }

    if text.trim().is_empty() {
      return Ok(Value::Null);
    }

    serde_json::from_str(&text).map_err(|e| ApiError::Decode {
      path: request.path.clone(),
      message: e.to_string(),
    })
  }

  pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
    self.send(&RequestDescriptor::get(path)).await
  }

  pub async fn post(&self, path: &str, body: Value) -> Result<Value, ApiError> {
    self.send(&RequestDescriptor::post(path, body)).await
  }

  pub async fn patch(&self, path: &str, body: Value) -> Result<Value, ApiError> {
    self.send(&RequestDescriptor::patch(path, body)).await
  }

  pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
    self.send(&RequestDescriptor::delete(path)).await
  }
}

/// Pick the most useful message out of an error response.
fn error_message(status: StatusCode, body: &str) -> String {
  if let Ok(value) = serde_json::from_str::<Value>(body) {
    for field in ["message", "error"] {
      if let Some(msg) = value.get(field).and_then(Value::as_str) {
        return msg.to_string();
      }
    }
  }

  let body = body.trim();
  if !body.is_empty() {
    return body.to_string();
  }

  status
    .canonical_reason()
    .unwrap_or("Unknown error")
    .to_string()
}
