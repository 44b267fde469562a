//! Directory lookup deciding whether an email is on the team whitelist.
//!
//! The directory went through several record shapes: documents keyed by the normalized
//! email, auto-id documents carrying an `emailLower` field, and older ones with only the
//! raw `email`. Each shape has its own lookup, tried in order until one hits.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::db::{collections, DocumentStore, Filter, Query, StoreError};
use crate::models::TeamMember;

/// Trim and lower-case an email.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// One way of finding a directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStrategy {
    /// Point read of `team_members/{normalized email}`
    DocumentId,
    /// `emailLower == e && active == true`
    EmailLowerActive,
    /// `emailLower == e`, for records without an `active` flag
    EmailLower,
    /// Raw `email` match on records that predate `emailLower`
    LegacyEmail,
}

impl LookupStrategy {
    pub const ORDER: [LookupStrategy; 4] = [
        LookupStrategy::DocumentId,
        LookupStrategy::EmailLowerActive,
        LookupStrategy::EmailLower,
        LookupStrategy::LegacyEmail,
    ];

    async fn lookup(
        self,
        store: &dyn DocumentStore,
        raw: &str,
        normalized: &str,
    ) -> Result<Option<TeamMember>, StoreError> {
        let members = collections::TEAM_MEMBERS;
        let found = match self {
            LookupStrategy::DocumentId => store
                .get(members, normalized)
                .await?
                .map(|doc| doc.decode::<TeamMember>())
                .transpose()?,
            LookupStrategy::EmailLowerActive => {
                let query = Query::collection(members)
                    .filter(Filter::eq("emailLower", normalized))
                    .filter(Filter::eq("active", true))
                    .limit(1);
                first_decoded(store, &query).await?
            }
            LookupStrategy::EmailLower => {
                let query = Query::collection(members)
                    .filter(Filter::eq("emailLower", normalized))
                    .limit(1);
                first_decoded(store, &query).await?
            }
            LookupStrategy::LegacyEmail => {
                let mut candidates = vec![raw.to_string()];
                if raw != normalized {
                    candidates.push(normalized.to_string());
                }
                let query = Query::collection(members).filter(Filter::is_in("email", candidates));
                let docs = store.query(&query).await?;
                // Legacy records are accepted whatever their flag; admission checks it later.
                return docs
                    .iter()
                    .find(|doc| doc.field("emailLower").is_none())
                    .map(|doc| doc.decode::<TeamMember>())
                    .transpose();
            }
        };
        Ok(found.filter(|member| member.active))
    }
}

async fn first_decoded(
    store: &dyn DocumentStore,
    query: &Query,
) -> Result<Option<TeamMember>, StoreError> {
    store
        .query(query)
        .await?
        .first()
        .map(|doc| doc.decode::<TeamMember>())
        .transpose()
}

/// Try `strategies` in order and return the first hit.
///
/// A failing strategy is logged and skipped, so `None` means every strategy missed.
pub async fn first_hit<S, T, E, F, Fut>(strategies: impl IntoIterator<Item = S>, mut attempt: F) -> Option<T>
where
    S: Copy + fmt::Debug,
    E: fmt::Display,
    F: FnMut(S) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for strategy in strategies {
        match attempt(strategy).await {
            Ok(Some(hit)) => {
                tracing::debug!(?strategy, "Lookup hit");
                return Some(hit);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(?strategy, error = %e, "Lookup strategy failed, trying next"),
        }
    }
    None
}

/// Resolves emails against the team directory.
#[derive(Clone)]
pub struct WhitelistResolver {
    store: Arc<dyn DocumentStore>,
}

impl WhitelistResolver {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, email: &str) -> Option<TeamMember> {
        let raw = email.trim();
        let normalized = normalize_email(raw);
        if normalized.is_empty() {
            return None;
        }

        let store = self.store.as_ref();
        let normalized = normalized.as_str();
        let hit = first_hit(LookupStrategy::ORDER, |strategy| {
            strategy.lookup(store, raw, normalized)
        })
        .await;

        if hit.is_none() {
            tracing::debug!(email = %normalized, "Not in team directory");
        }
        hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{fields, open_store, open_strict_store};
    use serde_json::json;

    async fn put(store: &dyn DocumentStore, id: &str, data: serde_json::Value) {
        store
            .set(collections::TEAM_MEMBERS, id, fields(data), false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_hit_order_and_error_fallthrough() {
        let hit = first_hit([1, 2, 3, 4], |n| async move {
            match n {
                1 => Ok(None),
                2 => Err("index missing"),
                3 => Ok(Some(n * 10)),
                _ => Ok(Some(0)),
            }
        })
        .await;
        assert_eq!(hit, Some(30));

        let miss = first_hit([1, 2], |_| async { Ok::<Option<u8>, &str>(None) }).await;
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn test_active_record_by_id() {
        let (_dir, store) = open_store().await;
        put(
            store.as_ref(),
            "a@b.com",
            json!({ "email": "a@b.com", "emailLower": "a@b.com", "active": true }),
        )
        .await;

        let resolver = WhitelistResolver::new(store);
        let member = resolver.resolve("  A@B.com ").await.unwrap();
        assert_eq!(member.id, "a@b.com");
    }

    #[tokio::test]
    async fn test_inactive_and_absent_resolve_to_none() {
        let (_dir, store) = open_store().await;
        put(
            store.as_ref(),
            "off@b.com",
            json!({ "email": "off@b.com", "emailLower": "off@b.com", "active": false }),
        )
        .await;

        let resolver = WhitelistResolver::new(store);
        assert!(resolver.resolve("off@b.com").await.is_none());
        assert!(resolver.resolve("nobody@b.com").await.is_none());
        assert!(resolver.resolve("   ").await.is_none());
    }

    #[tokio::test]
    async fn test_field_lookup_without_index() {
        let (_dir, store) = open_strict_store().await;
        // Auto-id record without an active flag: strategy 2 needs an index, 3 finds it.
        put(store.as_ref(), "x7", json!({ "email": "C@B.com", "emailLower": "c@b.com" })).await;

        let resolver = WhitelistResolver::new(store);
        let member = resolver.resolve("c@b.com").await.unwrap();
        assert_eq!(member.id, "x7");
        assert!(member.active);
    }

    #[tokio::test]
    async fn test_legacy_raw_email_match() {
        let (_dir, store) = open_store().await;
        put(store.as_ref(), "legacy1", json!({ "email": "Legacy@B.com", "active": false })).await;

        let resolver = WhitelistResolver::new(store);
        let member = resolver.resolve(" Legacy@B.com").await.unwrap();
        assert_eq!(member.id, "legacy1");
        assert!(!member.active);
    }
}
