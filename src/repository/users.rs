use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;

use super::object;
use crate::db::{collections, DocumentStore, Query, StoreError};
use crate::errors::AppError;
use crate::models::{UpsertProfileRequest, UserProfile, UserRole};

const USERS: &str = collections::USERS;

/// App user profiles, keyed by uid.
#[derive(Clone)]
pub struct UsersRepo {
    store: Arc<dyn DocumentStore>,
}

impl UsersRepo {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn get_profile(&self, uid: &str) -> Result<Option<UserProfile>, AppError> {
        match self.store.get(USERS, uid).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Role stored on the profile. Store errors are returned as-is so callers can
    /// tell "no role" apart from "could not read".
    pub async fn get_role(&self, uid: &str) -> Result<Option<UserRole>, StoreError> {
        let Some(doc) = self.store.get(USERS, uid).await? else {
            return Ok(None);
        };
        Ok(doc.decode::<UserProfile>()?.role())
    }

    pub async fn upsert_profile(
        &self,
        uid: &str,
        request: &UpsertProfileRequest,
    ) -> Result<UserProfile, AppError> {
        let mut data = object(json!({}));
        if let Some(role) = request.role {
            data.insert("role".into(), json!(role));
        }
        if let Some(email) = &request.email {
            data.insert("email".into(), json!(email.trim()));
        }
        if let Some(name) = &request.name {
            data.insert("name".into(), json!(name.trim()));
        }
        if let Some(phone) = &request.phone {
            data.insert("phone".into(), json!(phone.trim()));
        }
        if let Some(tokens) = &request.fcm_tokens {
            data.insert("fcmTokens".into(), json!(tokens));
        }

        self.store.set(USERS, uid, data, true).await?;
        self.get_profile(uid)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Profile {} vanished after write", uid)))
    }

    /// Every distinct non-empty push token across all profiles.
    pub async fn all_push_tokens(&self) -> Result<Vec<String>, AppError> {
        let docs = self.store.query(&Query::collection(USERS)).await?;
        let tokens: BTreeSet<String> = docs
            .iter()
            .filter_map(|doc| doc.field("fcmTokens").and_then(|v| v.as_array()))
            .flatten()
            .filter_map(|token| token.as_str())
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .collect();
        Ok(tokens.into_iter().collect())
    }
}
