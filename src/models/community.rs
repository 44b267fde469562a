//! Community posts and the monthly highlights ("Beraber'de Bu Ay").

use serde::{Deserialize, Serialize};

use super::{check_len, validation};
use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PostStatus {
    Active,
    Deleted,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Active => "active",
            PostStatus::Deleted => "deleted",
        }
    }
}

impl From<String> for PostStatus {
    fn from(status: String) -> Self {
        if status == "deleted" {
            PostStatus::Deleted
        } else {
            PostStatus::Active
        }
    }
}

impl From<PostStatus> for String {
    fn from(status: PostStatus) -> Self {
        status.as_str().to_string()
    }
}

fn default_status() -> PostStatus {
    PostStatus::Active
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityPost {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub photo_url: String,
    #[serde(default = "default_status")]
    pub status: PostStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_email_lower: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month_key: Option<String>,
    #[serde(default)]
    pub photo_url: String,
    #[serde(default = "default_status")]
    pub status: PostStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    #[serde(default)]
    pub text: Option<String>,
    pub photo_url: String,
}

impl CreatePostRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(text) = &self.text {
            check_len("text", text.trim(), 0, validation::MAX_DESCRIPTION)?;
        }
        validate_photo_url(&self.photo_url)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePostRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
}

impl UpdatePostRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(text) = &self.text {
            check_len("text", text.trim(), 0, validation::MAX_DESCRIPTION)?;
        }
        if let Some(url) = &self.photo_url {
            validate_photo_url(url)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHighlightRequest {
    pub month_key: String,
    pub photo_url: String,
}

impl CreateHighlightRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if !is_month_key(self.month_key.trim()) {
            return Err(AppError::Validation(format!(
                "monthKey must look like YYYY-MM: {}",
                self.month_key
            )));
        }
        validate_photo_url(&self.photo_url)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateHighlightRequest {
    #[serde(default)]
    pub photo_url: Option<String>,
}

impl UpdateHighlightRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        match &self.photo_url {
            Some(url) => validate_photo_url(url),
            None => Ok(()),
        }
    }
}

/// True for absolute http(s) URLs with a host.
pub fn is_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    matches!(rest, Some(rest) if !rest.is_empty() && !rest.starts_with('/') && !rest.contains(char::is_whitespace))
}

/// `YYYY-MM` with a month between 01 and 12.
pub fn is_month_key(key: &str) -> bool {
    let Some((year, month)) = key.split_once('-') else {
        return false;
    };
    year.len() == 4
        && year.chars().all(|c| c.is_ascii_digit())
        && month.len() == 2
        && matches!(month.parse::<u8>(), Ok(1..=12))
}

pub fn validate_photo_url(url: &str) -> Result<(), AppError> {
    if is_http_url(url.trim()) {
        Ok(())
    } else {
        Err(AppError::Validation(
            "photoUrl must be an http or https URL".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_url() {
        assert!(is_http_url("https://cdn.beraber.org/a.jpg"));
        assert!(is_http_url("http://localhost:9000/x.png"));
        assert!(!is_http_url("ftp://cdn.beraber.org/a.jpg"));
        assert!(!is_http_url("https://"));
        assert!(!is_http_url("javascript:alert(1)"));
    }

    #[test]
    fn test_month_key() {
        assert!(is_month_key("2025-03"));
        assert!(is_month_key("2024-12"));
        assert!(!is_month_key("2025-13"));
        assert!(!is_month_key("2025-3"));
        assert!(!is_month_key("25-03"));
        assert!(!is_month_key("2025/03"));
    }

    #[test]
    fn test_unknown_status_reads_active() {
        let post: CommunityPost = serde_json::from_value(serde_json::json!({
            "id": "p1",
            "photoUrl": "https://x.org/p.jpg",
            "status": "hidden"
        }))
        .unwrap();
        assert_eq!(post.status, PostStatus::Active);
    }
}
