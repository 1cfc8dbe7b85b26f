//! Catalog of the admin collections exposed by the site API.

use clap::ValueEnum;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

use crate::query::QueryKey;

/// Root segment shared by every admin query key.
pub const ADMIN_SCOPE: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Resource {
  Members,
  Donations,
  Careers,
  Opportunities,
  Tenders,
  News,
  #[value(name = "safeguarding", alias = "reports")]
  SafeguardingReports,
  Users,
}

impl Resource {
  pub const ALL: [Resource; 8] = [
    Resource::Members,
    Resource::Donations,
    Resource::Careers,
    Resource::Opportunities,
    Resource::Tenders,
    Resource::News,
    Resource::SafeguardingReports,
    Resource::Users,
  ];

  /// Short name, also the last query key segment
  pub fn name(self) -> &'static str {
    match self {
      Resource::Members => "members",
      Resource::Donations => "donations",
      Resource::Careers => "careers",
      Resource::Opportunities => "opportunities",
      Resource::Tenders => "tenders",
      Resource::News => "news",
      Resource::SafeguardingReports => "safeguarding",
      Resource::Users => "users",
    }
  }

  /// Collection path relative to the API base
  pub fn path(self) -> String {
    match self {
      Resource::SafeguardingReports => "admin/safeguarding/reports".to_string(),
      other => format!("{}/{}", ADMIN_SCOPE, other.name()),
    }
  }

  /// Path of one record in the collection
  pub fn item_path(self, id: &str) -> String {
    format!("{}/{}", self.path(), id)
  }

  /// Field the list endpoint wraps its records in
  pub fn envelope_field(self) -> &'static str {
    match self {
      Resource::SafeguardingReports => "reports",
      other => other.name(),
    }
  }

  /// Singular label for messages ("Member deleted")
  pub fn label(self) -> &'static str {
    match self {
      Resource::Members => "Member",
      Resource::Donations => "Donation",
      Resource::Careers => "Career",
      Resource::Opportunities => "Opportunity",
      Resource::Tenders => "Tender",
      Resource::News => "News article",
      Resource::SafeguardingReports => "Safeguarding report",
      Resource::Users => "User",
    }
  }

  /// Cache key of the collection list, e.g. `["admin", "members"]`
  pub fn query_key(self) -> QueryKey {
    QueryKey::new([ADMIN_SCOPE, self.name()])
  }
}

impl fmt::Display for Resource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// A record type served by one admin collection.
pub trait AdminRecord: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  const RESOURCE: Resource;

  /// Server identifier
  fn id(&self) -> &str;

  /// One-line description for list output
  fn summary(&self) -> String;
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::query_key;

  #[test]
  fn test_paths_and_keys() {
    assert_eq!(Resource::Members.path(), "admin/members");
    assert_eq!(Resource::Members.item_path("m1"), "admin/members/m1");
    assert_eq!(Resource::Members.query_key(), query_key!["admin", "members"]);
    assert_eq!(Resource::SafeguardingReports.path(), "admin/safeguarding/reports");
    assert_eq!(Resource::SafeguardingReports.envelope_field(), "reports");
  }

  #[test]
  fn test_every_resource_has_a_distinct_key() {
    let mut keys: Vec<QueryKey> = Resource::ALL.iter().map(|r| r.query_key()).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), Resource::ALL.len());
    assert!(keys.iter().all(|k| k.starts_with(&query_key![ADMIN_SCOPE])));
  }

  #[test]
  fn test_cli_names() {
    assert_eq!(
      Resource::from_str("safeguarding", true).unwrap(),
      Resource::SafeguardingReports
    );
    assert_eq!(Resource::from_str("reports", true).unwrap(), Resource::SafeguardingReports);
    assert_eq!(Resource::from_str("news", true).unwrap(), Resource::News);
  }
}
