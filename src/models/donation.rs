//! Donation campaign model and its status lifecycle.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{check_len, validation};
use crate::errors::AppError;

/// Campaign category. Stored by its Turkish label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DonationCategory {
    Education,
    Nutrition,
    Health,
    Clothing,
    Disaster,
    BasicNeeds,
    AnimalSupport,
    Environmental,
}

impl DonationCategory {
    pub const ALL: [DonationCategory; 8] = [
        DonationCategory::Education,
        DonationCategory::Nutrition,
        DonationCategory::Health,
        DonationCategory::Clothing,
        DonationCategory::Disaster,
        DonationCategory::BasicNeeds,
        DonationCategory::AnimalSupport,
        DonationCategory::Environmental,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DonationCategory::Education => "Eğitim Yardımı",
            DonationCategory::Nutrition => "Beslenme Yardımı",
            DonationCategory::Health => "Sağlık Yardımı",
            DonationCategory::Clothing => "Giyecek Yardımı",
            DonationCategory::Disaster => "Afet Yardımı",
            DonationCategory::BasicNeeds => "Temel İhtiyaç Yardımı",
            DonationCategory::AnimalSupport => "Hayvanlara Destek Yardımı",
            DonationCategory::Environmental => "Çevresel Yardım",
        }
    }

    /// Strict parse, for request bodies.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label)
    }
}

/// Stored documents with an unknown category read as basic needs.
impl From<String> for DonationCategory {
    fn from(label: String) -> Self {
        Self::from_label(&label).unwrap_or(DonationCategory::BasicNeeds)
    }
}

impl From<DonationCategory> for String {
    fn from(category: DonationCategory) -> Self {
        category.label().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DonationStatus {
    Active,
    Completed,
    PhotoPending,
    Deleted,
}

impl DonationStatus {
    /// Statuses every read path may return.
    pub const VISIBLE: [&'static str; 3] = ["active", "completed", "photo_pending"];

    pub fn as_str(&self) -> &'static str {
        match self {
            DonationStatus::Active => "active",
            DonationStatus::Completed => "completed",
            DonationStatus::PhotoPending => "photo_pending",
            DonationStatus::Deleted => "deleted",
        }
    }

    pub fn is_visible(&self) -> bool {
        *self != DonationStatus::Deleted
    }

    /// Apply a lifecycle event.
    ///
    /// `deleted` is terminal. Reaching the target completes the campaign only when a photo
    /// is already attached; otherwise it parks in `photo_pending` until one arrives.
    pub fn next(self, event: LifecycleEvent, has_photo: bool) -> Result<Self, TransitionError> {
        use DonationStatus::*;
        use LifecycleEvent::*;

        match (self, event) {
            (Deleted, _) => Err(TransitionError { from: self, event }),
            (Active, TargetReached) if has_photo => Ok(Completed),
            (Active, TargetReached) => Ok(PhotoPending),
            (Completed | PhotoPending, TargetReached) => Ok(self),
            (PhotoPending, PhotoAttached) => Ok(Completed),
            (_, PhotoAttached) => Ok(self),
            (_, SoftDeleted) => Ok(Deleted),
        }
    }
}

impl From<String> for DonationStatus {
    fn from(status: String) -> Self {
        match status.as_str() {
            "completed" => DonationStatus::Completed,
            "photo_pending" => DonationStatus::PhotoPending,
            "deleted" => DonationStatus::Deleted,
            _ => DonationStatus::Active,
        }
    }
}

impl From<DonationStatus> for String {
    fn from(status: DonationStatus) -> Self {
        status.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The trusted aggregation reported `collected >= amount`
    TargetReached,
    PhotoAttached,
    SoftDeleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: DonationStatus,
    pub event: LifecycleEvent,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} is not allowed from {}", self.event, self.from.as_str())
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        AppError::Conflict(err.to_string())
    }
}

/// A donation campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Donation {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_lower: Option<String>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub collected: f64,
    #[serde(default = "default_category")]
    pub category: DonationCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_status")]
    pub status: DonationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

fn default_category() -> DonationCategory {
    DonationCategory::BasicNeeds
}

fn default_status() -> DonationStatus {
    DonationStatus::Active
}

impl Donation {
    pub fn has_photo(&self) -> bool {
        self.photo_url.as_deref().is_some_and(|u| !u.trim().is_empty()) || !self.photos.is_empty()
    }
}

/// Id and name, for compact lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Campaign choice offered when targeting a notification.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignOption {
    pub id: String,
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCounts {
    pub total: u64,
    pub active: u64,
    pub completed: u64,
    pub photo_pending: u64,
}

/// Share of a category among recently completed campaigns, in whole percent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryRatio {
    pub name: String,
    pub value: u32,
    pub color: String,
}

/// Request body for creating a donation campaign.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDonationRequest {
    pub name: String,
    pub amount: f64,
    pub category: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl CreateDonationRequest {
    pub fn validate(&self) -> Result<DonationCategory, AppError> {
        validate_name(&self.name)?;
        validate_amount(self.amount)?;
        if let Some(description) = &self.description {
            check_len("description", description.trim(), 0, validation::MAX_DESCRIPTION)?;
        }
        parse_category(&self.category)
    }
}

/// Request body for updating a donation. `collected`, `status` and photos are not
/// writable here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDonationRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl UpdateDonationRequest {
    pub fn validate(&self) -> Result<Option<DonationCategory>, AppError> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(amount) = self.amount {
            validate_amount(amount)?;
        }
        if let Some(description) = &self.description {
            check_len("description", description.trim(), 0, validation::MAX_DESCRIPTION)?;
        }
        self.category.as_deref().map(parse_category).transpose()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetPhotoRequest {
    pub url: String,
}

/// Progress reported by the trusted aggregation process.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressReport {
    pub collected: f64,
}

fn validate_name(name: &str) -> Result<(), AppError> {
    check_len("name", name.trim(), validation::MIN_NAME, validation::MAX_NAME)
}

fn validate_amount(amount: f64) -> Result<(), AppError> {
    if !amount.is_finite()
        || amount < validation::MIN_DONATION_AMOUNT
        || amount > validation::MAX_DONATION_AMOUNT
    {
        return Err(AppError::Validation(format!(
            "amount must be between {} and {}",
            validation::MIN_DONATION_AMOUNT,
            validation::MAX_DONATION_AMOUNT
        )));
    }
    Ok(())
}

fn parse_category(label: &str) -> Result<DonationCategory, AppError> {
    DonationCategory::from_label(label)
        .ok_or_else(|| AppError::Validation(format!("Unknown category: {}", label)))
}
