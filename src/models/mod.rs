//! Data models for the Beraber admin backend.
//!
//! Field names are camelCase on the wire and in stored documents.

mod community;
mod donation;
mod member;
mod notification;
mod todo;
mod user;

pub use community::*;
pub use donation::*;
pub use member::*;
pub use notification::*;
pub use todo::*;
pub use user::*;

use crate::errors::AppError;

/// Field limits shared by the request validators.
pub mod validation {
    pub const MIN_NAME: usize = 3;
    pub const MAX_NAME: usize = 50;
    pub const MIN_TITLE: usize = 3;
    pub const MAX_TITLE: usize = 80;
    pub const MAX_DESCRIPTION: usize = 1000;
    pub const MIN_DONATION_AMOUNT: f64 = 1.0;
    pub const MAX_DONATION_AMOUNT: f64 = 1_000_000.0;
    pub const MAX_EMAIL: usize = 254;
    pub const MAX_PHONE: usize = 30;
}

/// List sizes.
pub mod limits {
    pub const RECENT: usize = 10;
    pub const PAGE: usize = 20;
    pub const TEAM_LIST: usize = 100;
    /// Hard cap on any client-supplied limit
    pub const MAX_QUERY: usize = 100;

    /// Clamp a requested limit into `1..=MAX_QUERY`.
    pub fn clamp(requested: Option<usize>, default: usize) -> usize {
        match requested {
            Some(n) if n > 0 => n.min(MAX_QUERY),
            _ => default,
        }
    }
}

/// Check a text length in characters (not bytes).
pub(crate) fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), AppError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(AppError::Validation(format!(
            "{} must be between {} and {} characters",
            field, min, max
        )));
    }
    Ok(())
}
