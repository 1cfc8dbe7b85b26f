//! Membership types and their fixed fees.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of membership a member applied for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipType {
  #[default]
  Individual,
  Group,
}

impl MembershipType {
  /// One-off registration fee
  pub fn registration_fee(self) -> u32 {
    match self {
      MembershipType::Individual => 500,
      MembershipType::Group => 250,
    }
  }

  /// Subscription fee
  pub fn subscription_fee(self) -> u32 {
    match self {
      MembershipType::Individual => 1000,
      MembershipType::Group => 500,
    }
  }

  /// Registration plus subscription
  pub fn total_fee(self) -> u32 {
    self.registration_fee() + self.subscription_fee()
  }

  pub fn as_str(self) -> &'static str {
    match self {
      MembershipType::Individual => "INDIVIDUAL",
      MembershipType::Group => "GROUP",
    }
  }
}

impl fmt::Display for MembershipType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_total_fee() {
    assert_eq!(MembershipType::Individual.total_fee(), 1500);
    assert_eq!(MembershipType::Group.total_fee(), 750);
  }

  #[test]
  fn test_breakdown() {
    assert_eq!(MembershipType::Individual.registration_fee(), 500);
    assert_eq!(MembershipType::Individual.subscription_fee(), 1000);
    assert_eq!(MembershipType::Group.registration_fee(), 250);
    assert_eq!(MembershipType::Group.subscription_fee(), 500);
  }

  #[test]
  fn test_wire_names() {
    let t: MembershipType = serde_json::from_str("\"GROUP\"").unwrap();
    assert_eq!(t, MembershipType::Group);
    assert_eq!(
      serde_json::to_string(&MembershipType::Individual).unwrap(),
      "\"INDIVIDUAL\""
    );
  }
}
