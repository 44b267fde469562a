//! Team directory record, the whitelist of people admitted to the admin panel.

use serde::{Deserialize, Serialize};

use super::{check_len, validation};
use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
    Viewer,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "editor" => Some(Role::Editor),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }
}

/// A team member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "TeamMemberDoc")]
pub struct TeamMember {
    pub id: String,
    pub email: String,
    pub email_lower: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub roles: Vec<Role>,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl TeamMember {
    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }
}

/// Directory record as stored, covering every historical shape.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeamMemberDoc {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_lower: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
    /// Single role of records written before roles became a set
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    active: Option<bool>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    created_by: Option<String>,
}

impl From<TeamMemberDoc> for TeamMember {
    fn from(doc: TeamMemberDoc) -> Self {
        let email = doc.email.unwrap_or_default().trim().to_string();
        let email_lower = doc
            .email_lower
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| email.to_lowercase());

        let mut roles: Vec<Role> = doc
            .roles
            .iter()
            .chain(doc.role.iter())
            .filter_map(|r| Role::parse(r))
            .collect();
        roles.sort();
        roles.dedup();
        if roles.is_empty() {
            roles.push(Role::Viewer);
        }

        Self {
            id: doc.id,
            email,
            email_lower,
            name: doc.name.filter(|s| !s.is_empty()),
            phone: doc.phone.filter(|s| !s.is_empty()),
            roles,
            // Records predating the flag are active.
            active: doc.active.unwrap_or(true),
            created_at: doc.created_at,
            updated_at: doc.updated_at,
            created_by: doc.created_by,
        }
    }
}

/// Request body for adding a member to the directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMemberRequest {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub roles: Option<Vec<Role>>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl CreateMemberRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_email(&self.email)?;
        validate_optional(self.name.as_deref(), self.phone.as_deref())
    }

    /// Explicit role set, else the single role, else viewer.
    pub fn role_set(&self) -> Vec<Role> {
        let mut roles = self
            .roles
            .clone()
            .or_else(|| self.role.map(|r| vec![r]))
            .unwrap_or_default();
        roles.sort();
        roles.dedup();
        if roles.is_empty() {
            roles.push(Role::Viewer);
        }
        roles
    }
}

/// Request body for updating a directory record.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMemberRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub roles: Option<Vec<Role>>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl UpdateMemberRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        validate_optional(self.name.as_deref(), self.phone.as_deref())
    }
}

fn validate_email(email: &str) -> Result<(), AppError> {
    let email = email.trim();
    check_len("email", email, 3, validation::MAX_EMAIL)?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(AppError::Validation(format!("Invalid email: {}", email))),
    }
}

fn validate_optional(name: Option<&str>, phone: Option<&str>) -> Result<(), AppError> {
    if let Some(name) = name {
        check_len("name", name.trim(), 0, validation::MAX_NAME)?;
    }
    if let Some(phone) = phone {
        check_len("phone", phone.trim(), 0, validation::MAX_PHONE)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_legacy_role_folded_into_roles() {
        let member: TeamMember = serde_json::from_value(json!({
            "id": "x1",
            "email": "Ayse@Beraber.org",
            "role": "admin"
        }))
        .unwrap();
        assert_eq!(member.roles, vec![Role::Admin]);
        assert_eq!(member.email_lower, "ayse@beraber.org");
        assert!(member.active);
    }

    #[test]
    fn test_roles_set_and_inactive_flag() {
        let member: TeamMember = serde_json::from_value(json!({
            "id": "a@b.com",
            "email": "a@b.com",
            "emailLower": "a@b.com",
            "roles": ["editor", "viewer", "editor", "owner"],
            "active": false
        }))
        .unwrap();
        assert_eq!(member.roles, vec![Role::Editor, Role::Viewer]);
        assert!(!member.active);
    }

    #[test]
    fn test_email_validation() {
        assert!(validate_email("a@b.com").is_ok());
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("@b.com").is_err());
    }
}
