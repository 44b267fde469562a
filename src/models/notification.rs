//! Push notification model.

use serde::{Deserialize, Serialize};

use super::{check_len, validation};
use crate::errors::AppError;

/// Who receives a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NotificationTarget {
    All,
    Campaign {
        #[serde(rename = "campaignId")]
        campaign_id: String,
        /// Name cached at send time
        #[serde(rename = "campaignName", default)]
        campaign_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub target: Option<NotificationTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<String>,
    /// App route opened when the push is tapped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collapse_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    pub title: String,
    pub body: String,
    pub target: NotificationTarget,
    #[serde(default)]
    pub scheduled_at: Option<String>,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub collapse_key: Option<String>,
}

impl CreateNotificationRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_title(&self.title)?;
        validate_body(&self.body)?;
        validate_target(&self.target)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNotificationRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub target: Option<NotificationTarget>,
    #[serde(default)]
    pub scheduled_at: Option<String>,
}

impl UpdateNotificationRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(body) = &self.body {
            validate_body(body)?;
        }
        if let Some(target) = &self.target {
            validate_target(target)?;
        }
        Ok(())
    }
}

fn validate_title(title: &str) -> Result<(), AppError> {
    check_len("title", title.trim(), validation::MIN_TITLE, validation::MAX_TITLE)
}

fn validate_body(body: &str) -> Result<(), AppError> {
    check_len("body", body.trim(), 1, validation::MAX_DESCRIPTION)
}

fn validate_target(target: &NotificationTarget) -> Result<(), AppError> {
    match target {
        NotificationTarget::Campaign { campaign_id, .. } if campaign_id.trim().is_empty() => Err(
            AppError::Validation("Campaign target needs a campaignId".to_string()),
        ),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_target_wire_format() {
        let all: NotificationTarget = serde_json::from_value(json!({ "type": "all" })).unwrap();
        assert_eq!(all, NotificationTarget::All);

        let campaign = NotificationTarget::Campaign {
            campaign_id: "d1".to_string(),
            campaign_name: "Kışlık mont".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&campaign).unwrap(),
            json!({ "type": "campaign", "campaignId": "d1", "campaignName": "Kışlık mont" })
        );
    }

    #[test]
    fn test_request_validation() {
        let request = CreateNotificationRequest {
            title: "Hi".to_string(),
            body: "Yeni kampanya".to_string(),
            target: NotificationTarget::All,
            scheduled_at: None,
            route: None,
            collapse_key: None,
        };
        assert!(request.validate().is_err());

        let request = CreateNotificationRequest {
            title: "Merhaba".to_string(),
            target: NotificationTarget::Campaign {
                campaign_id: " ".to_string(),
                campaign_name: String::new(),
            },
            ..request
        };
        assert!(request.validate().is_err());
    }
}
