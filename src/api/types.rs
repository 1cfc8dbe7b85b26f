//! Domain records served by the admin endpoints.
//!
//! Deserialization is lenient: missing fields fall back to defaults, ids may
//! arrive as strings or numbers and under `id` or `_id`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::resources::{AdminRecord, Resource};
use crate::fees::MembershipType;

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  match Value::deserialize(deserializer)? {
    Value::String(s) => Ok(s),
    Value::Number(n) => Ok(n.to_string()),
    other => Err(serde::de::Error::custom(format!(
      "expected string or number id, got {}",
      other
    ))),
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberStatus {
  #[default]
  Pending,
  Approved,
  Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
  #[serde(alias = "_id", deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(default)]
  pub first_name: String,
  #[serde(default)]
  pub last_name: String,
  #[serde(default)]
  pub email: String,
  pub phone: Option<String>,
  #[serde(default)]
  pub membership_type: MembershipType,
  #[serde(default)]
  pub status: MemberStatus,
  pub created_at: Option<String>,
}

impl Member {
  pub fn full_name(&self) -> String {
    format!("{} {}", self.first_name, self.last_name).trim().to_string()
  }
}

impl AdminRecord for Member {
  const RESOURCE: Resource = Resource::Members;

  fn id(&self) -> &str {
    &self.id
  }

  fn summary(&self) -> String {
    format!(
      "{} <{}> {} {:?} (fee {})",
      self.full_name(),
      self.email,
      self.membership_type,
      self.status,
      self.membership_type.total_fee()
    )
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Donation {
  #[serde(alias = "_id", deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(default)]
  pub donor_name: String,
  pub email: Option<String>,
  #[serde(default)]
  pub amount: f64,
  #[serde(default)]
  pub currency: String,
  #[serde(default)]
  pub status: String,
  pub created_at: Option<String>,
}

impl AdminRecord for Donation {
  const RESOURCE: Resource = Resource::Donations;

  fn id(&self) -> &str {
    &self.id
  }

  fn summary(&self) -> String {
    format!(
      "{} {:.2} {} [{}]",
      self.donor_name, self.amount, self.currency, self.status
    )
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Career {
  #[serde(alias = "_id", deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(default)]
  pub title: String,
  pub location: Option<String>,
  pub employment_type: Option<String>,
  pub closing_date: Option<String>,
  #[serde(default)]
  pub is_published: bool,
}

impl AdminRecord for Career {
  const RESOURCE: Resource = Resource::Careers;

  fn id(&self) -> &str {
    &self.id
  }

  fn summary(&self) -> String {
    format!(
      "{} ({}) closes {}{}",
      self.title,
      self.location.as_deref().unwrap_or("-"),
      self.closing_date.as_deref().unwrap_or("-"),
      draft_marker(self.is_published)
    )
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
  #[serde(alias = "_id", deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(default)]
  pub title: String,
  pub organisation: Option<String>,
  pub category: Option<String>,
  pub deadline: Option<String>,
  #[serde(default)]
  pub is_published: bool,
}

impl AdminRecord for Opportunity {
  const RESOURCE: Resource = Resource::Opportunities;

  fn id(&self) -> &str {
    &self.id
  }

  fn summary(&self) -> String {
    format!(
      "{} - {} deadline {}{}",
      self.title,
      self.organisation.as_deref().unwrap_or("-"),
      self.deadline.as_deref().unwrap_or("-"),
      draft_marker(self.is_published)
    )
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tender {
  #[serde(alias = "_id", deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(default)]
  pub title: String,
  pub reference: Option<String>,
  pub closing_date: Option<String>,
  #[serde(default)]
  pub status: String,
}

impl AdminRecord for Tender {
  const RESOURCE: Resource = Resource::Tenders;

  fn id(&self) -> &str {
    &self.id
  }

  fn summary(&self) -> String {
    format!(
      "{} {} closes {} [{}]",
      self.reference.as_deref().unwrap_or("-"),
      self.title,
      self.closing_date.as_deref().unwrap_or("-"),
      self.status
    )
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsArticle {
  #[serde(alias = "_id", deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub slug: String,
  pub summary: Option<String>,
  pub published_at: Option<String>,
  #[serde(default)]
  pub is_published: bool,
}

impl AdminRecord for NewsArticle {
  const RESOURCE: Resource = Resource::News;

  fn id(&self) -> &str {
    &self.id
  }

  fn summary(&self) -> String {
    format!(
      "{} /{} {}{}",
      self.title,
      self.slug,
      self.published_at.as_deref().unwrap_or("-"),
      draft_marker(self.is_published)
    )
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeguardingReport {
  #[serde(alias = "_id", deserialize_with = "deserialize_id")]
  pub id: String,
  pub reference: Option<String>,
  #[serde(default)]
  pub category: String,
  #[serde(default)]
  pub status: String,
  pub submitted_at: Option<String>,
  #[serde(default)]
  pub is_anonymous: bool,
}

impl AdminRecord for SafeguardingReport {
  const RESOURCE: Resource = Resource::SafeguardingReports;

  fn id(&self) -> &str {
    &self.id
  }

  fn summary(&self) -> String {
    format!(
      "{} {} [{}] {}{}",
      self.reference.as_deref().unwrap_or("-"),
      self.category,
      self.status,
      self.submitted_at.as_deref().unwrap_or("-"),
      if self.is_anonymous { " (anonymous)" } else { "" }
    )
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
  Admin,
  Editor,
  #[default]
  Viewer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  #[serde(alias = "_id", deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub email: String,
  #[serde(default)]
  pub role: UserRole,
  #[serde(default = "default_true")]
  pub is_active: bool,
}

fn default_true() -> bool {
  true
}

impl AdminRecord for User {
  const RESOURCE: Resource = Resource::Users;

  fn id(&self) -> &str {
    &self.id
  }

  fn summary(&self) -> String {
    format!(
      "{} <{}> {:?}{}",
      self.name,
      self.email,
      self.role,
      if self.is_active { "" } else { " (inactive)" }
    )
  }
}

fn draft_marker(is_published: bool) -> &'static str {
  if is_published {
    ""
  } else {
    " (draft)"
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_member_lenient_decoding() {
    let member: Member = serde_json::from_value(json!({
      "_id": 42,
      "firstName": "Ada",
      "lastName": "Lovelace",
      "email": "ada@example.org",
      "membershipType": "GROUP",
      "status": "APPROVED",
      "unknownField": true
    }))
    .unwrap();

    assert_eq!(member.id, "42");
    assert_eq!(member.full_name(), "Ada Lovelace");
    assert_eq!(member.membership_type, MembershipType::Group);
    assert_eq!(member.status, MemberStatus::Approved);
    assert!(member.summary().contains("fee 750"));
  }

  #[test]
  fn test_defaults_for_missing_fields() {
    let member: Member = serde_json::from_value(json!({ "id": "m1" })).unwrap();
    assert_eq!(member.membership_type, MembershipType::Individual);
    assert_eq!(member.status, MemberStatus::Pending);

    let user: User = serde_json::from_value(json!({ "id": 1 })).unwrap();
    assert!(user.is_active);
    assert_eq!(user.role, UserRole::Viewer);
  }

  #[test]
  fn test_id_is_required() {
    assert!(serde_json::from_value::<Tender>(json!({ "title": "Roof" })).is_err());
    assert!(serde_json::from_value::<Tender>(json!({ "id": null })).is_err());
  }

  #[test]
  fn test_member_serializes_camel_case() {
    let member: Member = serde_json::from_value(json!({ "id": "m1", "firstName": "Bo" })).unwrap();
    let value = serde_json::to_value(&member).unwrap();
    assert_eq!(value["firstName"], "Bo");
    assert_eq!(value["status"], "PENDING");
  }
}
