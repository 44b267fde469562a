//! Shared to-do list item.

use serde::{Deserialize, Serialize};

use super::{check_len, validation};
use crate::errors::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTodoRequest {
    pub text: String,
}

impl CreateTodoRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        check_len("text", self.text.trim(), 1, validation::MAX_TITLE)
    }
}
