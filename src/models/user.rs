//! App user profiles and user statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    User,
}

/// Profile keyed by the identity provider's uid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    /// Raw stored role; anything other than `admin`/`user` reads as no role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub fcm_tokens: Vec<String>,
}

impl UserProfile {
    pub fn role(&self) -> Option<UserRole> {
        match self.role.as_deref() {
            Some("admin") => Some(UserRole::Admin),
            Some("user") => Some(UserRole::User),
            _ => None,
        }
    }
}

/// Maintenance upsert of a profile. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertProfileRequest {
    #[serde(default)]
    pub role: Option<UserRole>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub fcm_tokens: Option<Vec<String>>,
}

/// The `userStats/global` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    #[serde(default)]
    pub total_users: u64,
    /// Keyed `YYYY-MM`
    #[serde(default)]
    pub monthly_users: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserStatsRequest {
    #[serde(default)]
    pub total_users: Option<u64>,
    #[serde(default)]
    pub monthly_users: Option<BTreeMap<String, u64>>,
}

/// One bar of the monthly users chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyUserCount {
    pub month: String,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_role_reads_as_none() {
        let profile: UserProfile = serde_json::from_value(serde_json::json!({
            "id": "u1",
            "role": "superuser"
        }))
        .unwrap();
        assert_eq!(profile.role(), None);
        assert!(profile.fcm_tokens.is_empty());
    }
}
