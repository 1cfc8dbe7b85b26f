//! Query keys: ordered lists of primitive segments identifying one query.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// One segment of a query key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeySegment {
  Bool(bool),
  Int(i64),
  Str(String),
}

impl From<&str> for KeySegment {
  fn from(s: &str) -> Self {
    KeySegment::Str(s.to_string())
  }
}

impl From<String> for KeySegment {
  fn from(s: String) -> Self {
    KeySegment::Str(s)
  }
}

impl From<&String> for KeySegment {
  fn from(s: &String) -> Self {
    KeySegment::Str(s.clone())
  }
}

impl From<i64> for KeySegment {
  fn from(n: i64) -> Self {
    KeySegment::Int(n)
  }
}

impl From<i32> for KeySegment {
  fn from(n: i32) -> Self {
    KeySegment::Int(n.into())
  }
}

impl From<u32> for KeySegment {
  fn from(n: u32) -> Self {
    KeySegment::Int(n.into())
  }
}

impl From<bool> for KeySegment {
  fn from(b: bool) -> Self {
    KeySegment::Bool(b)
  }
}

impl fmt::Display for KeySegment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      KeySegment::Bool(b) => write!(f, "{}", b),
      KeySegment::Int(n) => write!(f, "{}", n),
      KeySegment::Str(s) => f.write_str(s),
    }
  }
}

/// Ordered key identifying one cacheable query, e.g. `["admin", "members"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<KeySegment>);

impl QueryKey {
  pub fn new<I, S>(segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<KeySegment>,
  {
    Self(segments.into_iter().map(Into::into).collect())
  }

  pub fn segments(&self) -> &[KeySegment] {
    &self.0
  }

  /// Append a segment, returning the longer key.
  pub fn child(&self, segment: impl Into<KeySegment>) -> Self {
    let mut segments = self.0.clone();
    segments.push(segment.into());
    Self(segments)
  }

  /// Whether `prefix` is a leading subsequence of this key.
  ///
  /// Invalidation and removal match keys this way, so invalidating
  /// `["admin"]` touches every admin query.
  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    self.0.starts_with(&prefix.0)
  }

  /// Stable identity used by persistent storage.
  pub fn cache_hash(&self) -> String {
    // Serializing a Vec of untagged primitives cannot fail
    let input = serde_json::to_string(&self.0).unwrap_or_default();

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
    f.write_str(&parts.join("/"))
  }
}

/// Build a [`QueryKey`] from heterogeneous segments.
///
/// ```ignore
/// let key = query_key!["admin", "members", 42];
/// ```
#[macro_export]
macro_rules! query_key {
  ($($segment:expr),* $(,)?) => {
    $crate::query::QueryKey::new(::std::vec![$($crate::query::KeySegment::from($segment)),*])
  };
}
