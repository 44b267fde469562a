//! Team directory.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use super::{normalize_email, object};
use crate::db::{
    collections, decode_all, listen, timestamp_now, Direction, Document, DocumentStore,
    FallbackQuery, Fields, Filter, Query, Subscription,
};
use crate::errors::AppError;
use crate::models::{CreateMemberRequest, TeamMember, UpdateMemberRequest};

const TEAM_MEMBERS: &str = collections::TEAM_MEMBERS;

/// Outcome of a directory normalization run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeReport {
    pub scanned: usize,
    pub normalized: usize,
    /// Records re-keyed under their normalized email
    pub moved: usize,
    /// Records without a usable email
    pub skipped: usize,
}

#[derive(Clone)]
pub struct TeamRepo {
    store: Arc<dyn DocumentStore>,
}

impl TeamRepo {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn active_query(limit: usize) -> FallbackQuery {
        FallbackQuery::new(
            "team.active",
            Query::collection(TEAM_MEMBERS)
                .filter(Filter::eq("active", true))
                .order_by("createdAt", Direction::Desc)
                .limit(limit),
            ["active"],
        )
    }

    pub async fn get(&self, id: &str) -> Result<Option<TeamMember>, AppError> {
        match self.store.get(TEAM_MEMBERS, id).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Add a member keyed by the normalized email. A second member with the same
    /// normalized email is a conflict.
    pub async fn add(
        &self,
        request: &CreateMemberRequest,
        created_by: Option<&str>,
    ) -> Result<TeamMember, AppError> {
        let email = request.email.trim();
        let id = normalize_email(email);
        let now = timestamp_now();
        let data = object(json!({
            "email": email,
            "emailLower": id,
            "name": request.name.as_deref().map(str::trim).unwrap_or_default(),
            "phone": request.phone.as_deref().map(str::trim).unwrap_or_default(),
            "roles": request.role_set(),
            "active": request.active,
            "createdAt": now,
            "updatedAt": now,
            "createdBy": created_by,
        }));

        self.store.create(TEAM_MEMBERS, &id, data.clone()).await?;
        tracing::info!(member = %id, "Team member added");
        Ok(Document::new(id, data).decode()?)
    }

    /// Apply the present fields. An email change that alters the normalized address
    /// moves the record under its new key; an existing member there is a conflict.
    pub async fn update(&self, id: &str, request: &UpdateMemberRequest) -> Result<TeamMember, AppError> {
        let mut patch = object(json!({ "updatedAt": timestamp_now() }));
        let mut new_key = None;
        if let Some(email) = &request.email {
            let key = normalize_email(email);
            patch.insert("email".into(), json!(email.trim()));
            patch.insert("emailLower".into(), json!(key));
            if key != id {
                new_key = Some(key);
            }
        }
        if let Some(name) = &request.name {
            patch.insert("name".into(), json!(name.trim()));
        }
        if let Some(phone) = &request.phone {
            patch.insert("phone".into(), json!(phone.trim()));
        }
        if let Some(roles) = &request.roles {
            patch.insert("roles".into(), json!(roles));
            // The legacy single role would otherwise be folded back in on read.
            patch.insert("role".into(), serde_json::Value::Null);
        }
        if let Some(active) = request.active {
            patch.insert("active".into(), json!(active));
        }

        match new_key {
            Some(key) => self.rekey(id, &key, patch).await,
            None => {
                self.store.update(TEAM_MEMBERS, id, patch).await?;
                self.get(id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Team member {} not found", id)))
            }
        }
    }

    async fn rekey(&self, id: &str, key: &str, patch: Fields) -> Result<TeamMember, AppError> {
        let mut data = self
            .store
            .get(TEAM_MEMBERS, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Team member {} not found", id)))?
            .data;
        data.extend(patch);

        self.store.create(TEAM_MEMBERS, key, data.clone()).await?;
        self.store.delete(TEAM_MEMBERS, id).await?;
        tracing::info!(from = %id, to = %key, "Team member re-keyed on email change");
        Ok(Document::new(key, data).decode()?)
    }

    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        if self.store.get(TEAM_MEMBERS, id).await?.is_none() {
            return Err(AppError::NotFound(format!("Team member {} not found", id)));
        }
        self.store.delete(TEAM_MEMBERS, id).await?;
        tracing::info!(member = %id, "Team member removed");
        Ok(())
    }

    pub async fn list_active(&self, limit: usize) -> Vec<TeamMember> {
        decode_all(&Self::active_query(limit).execute(self.store.as_ref()).await)
    }

    pub fn listen_active<F>(&self, limit: usize, mut callback: F) -> Subscription
    where
        F: FnMut(Vec<TeamMember>) + Send + 'static,
    {
        listen(self.store.clone(), Self::active_query(limit), move |result| {
            callback(decode_all(&result.unwrap_or_default()))
        })
    }

    /// Every record, for maintenance jobs.
    pub async fn list_all(&self) -> Result<Vec<TeamMember>, AppError> {
        let docs = self.store.query(&Query::collection(TEAM_MEMBERS)).await?;
        Ok(decode_all(&docs))
    }

    /// Rewrite every record into the current shape: keyed by normalized email, with
    /// `emailLower`, a `roles` set and an explicit `active` flag.
    pub async fn normalize_all(&self) -> Result<NormalizeReport, AppError> {
        let docs = self.store.query(&Query::collection(TEAM_MEMBERS)).await?;
        let mut report = NormalizeReport {
            scanned: docs.len(),
            ..Default::default()
        };

        for doc in docs {
            let member: TeamMember = match doc.decode() {
                Ok(member) => member,
                Err(e) => {
                    tracing::warn!(id = %doc.id, error = %e, "Skipping undecodable member");
                    report.skipped += 1;
                    continue;
                }
            };
            let key = if member.email_lower.contains('@') {
                member.email_lower.clone()
            } else {
                normalize_email(&doc.id)
            };
            if !key.contains('@') {
                tracing::warn!(id = %doc.id, "Skipping member without a usable email");
                report.skipped += 1;
                continue;
            }

            let now = timestamp_now();
            let data = object(json!({
                "email": key,
                "emailLower": key,
                "name": member.name,
                "phone": member.phone,
                "roles": member.roles,
                "role": null,
                "active": member.active,
                "createdAt": member.created_at.unwrap_or_else(|| now.clone()),
                "updatedAt": now,
                "createdBy": member.created_by,
            }));
            self.store.set(TEAM_MEMBERS, &key, data, true).await?;
            report.normalized += 1;

            if doc.id != key {
                self.store.delete(TEAM_MEMBERS, &doc.id).await?;
                tracing::info!(from = %doc.id, to = %key, "Team member re-keyed");
                report.moved += 1;
            }
        }

        tracing::info!(?report, "Team directory normalized");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{fields, open_store, open_strict_store};
    use crate::models::Role;

    fn request(email: &str) -> CreateMemberRequest {
        CreateMemberRequest {
            email: email.to_string(),
            name: Some("Ayşe".to_string()),
            phone: None,
            roles: None,
            role: Some(Role::Editor),
            active: true,
        }
    }

    #[tokio::test]
    async fn test_add_keys_by_normalized_email() {
        let (_dir, store) = open_store().await;
        let repo = TeamRepo::new(store);

        let member = repo.add(&request(" Ayse@Beraber.org "), Some("uid-1")).await.unwrap();
        assert_eq!(member.id, "ayse@beraber.org");
        assert_eq!(member.email, "Ayse@Beraber.org");
        assert_eq!(member.roles, vec![Role::Editor]);

        let err = repo.add(&request("AYSE@beraber.org"), None).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_email_change_moves_the_record() {
        let (_dir, store) = open_store().await;
        let repo = TeamRepo::new(store.clone());
        repo.add(&request("ayse@beraber.org"), None).await.unwrap();
        repo.add(&request("mehmet@beraber.org"), None).await.unwrap();

        let change = |email: &str| UpdateMemberRequest {
            email: Some(email.to_string()),
            name: None,
            phone: None,
            roles: None,
            active: None,
        };

        // Case-only edits keep the key
        let same = repo.update("ayse@beraber.org", &change("Ayse@Beraber.org")).await.unwrap();
        assert_eq!(same.id, "ayse@beraber.org");
        assert_eq!(same.email, "Ayse@Beraber.org");

        let taken = repo.update("ayse@beraber.org", &change("MEHMET@beraber.org")).await.unwrap_err();
        assert!(matches!(taken, AppError::Conflict(_)));
        assert!(repo.get("ayse@beraber.org").await.unwrap().is_some());

        let moved = repo.update("ayse@beraber.org", &change("ayse.k@beraber.org")).await.unwrap();
        assert_eq!(moved.id, "ayse.k@beraber.org");
        assert_eq!(moved.email_lower, "ayse.k@beraber.org");
        assert_eq!(moved.name.as_deref(), Some("Ayşe"));
        assert!(store.get(TEAM_MEMBERS, "ayse@beraber.org").await.unwrap().is_none());

        let err = repo.add(&request("Ayse.K@beraber.org"), None).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(repo.add(&request("ayse@beraber.org"), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_active_excludes_inactive_without_index() {
        let (_dir, store) = open_strict_store().await;
        let repo = TeamRepo::new(store);
        repo.add(&request("a@b.com"), None).await.unwrap();
        let mut off = request("c@d.com");
        off.active = false;
        repo.add(&off, None).await.unwrap();

        let active = repo.list_active(10).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "a@b.com");
    }

    #[tokio::test]
    async fn test_normalize_rekeys_legacy_records() {
        let (_dir, store) = open_store().await;
        store
            .set(
                TEAM_MEMBERS,
                "auto123",
                fields(json!({ "email": "Old@Team.org", "role": "admin" })),
                false,
            )
            .await
            .unwrap();
        store
            .set(TEAM_MEMBERS, "broken", fields(json!({ "name": "No email" })), false)
            .await
            .unwrap();

        let repo = TeamRepo::new(store.clone());
        let report = repo.normalize_all().await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.moved, 1);
        assert_eq!(report.skipped, 1);

        assert!(store.get(TEAM_MEMBERS, "auto123").await.unwrap().is_none());
        let member = repo.get("old@team.org").await.unwrap().unwrap();
        assert_eq!(member.roles, vec![Role::Admin]);
        assert!(member.active);
    }
}
