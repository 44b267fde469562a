//! Community posts and monthly highlights.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use super::{object, Page};
use crate::db::{
    collections, decode_all, listen, timestamp_now, Cursor, Direction, Document, DocumentStore,
    FallbackQuery, Filter, Query, Subscription,
};
use crate::errors::AppError;
use crate::models::{
    is_month_key, CommunityPost, CreateHighlightRequest, CreatePostRequest, Highlight, PostStatus,
    UpdateHighlightRequest, UpdatePostRequest,
};

const POSTS: &str = collections::COMMUNITY_POSTS;
const HIGHLIGHTS: &str = collections::HIGHLIGHTS;

/// Outcome of a highlight backfill run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub scanned: usize,
    pub fixed: usize,
}

#[derive(Clone)]
pub struct CommunityRepo {
    store: Arc<dyn DocumentStore>,
}

impl CommunityRepo {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    // ==================== POSTS ====================

    /// Active posts, newest first.
    pub fn posts_query(limit: usize, cursor: Option<Cursor>) -> FallbackQuery {
        FallbackQuery::new(
            "community.posts",
            Query::collection(POSTS)
                .filter(Filter::eq("status", PostStatus::Active.as_str()))
                .order_by("createdAt", Direction::Desc)
                .limit(limit)
                .start_after(cursor),
            ["status"],
        )
    }

    pub async fn add_post(
        &self,
        request: &CreatePostRequest,
        uid: &str,
        email_lower: Option<&str>,
    ) -> Result<CommunityPost, AppError> {
        let now = timestamp_now();
        let data = object(json!({
            "text": request.text.as_deref().map(str::trim).filter(|t| !t.is_empty()),
            "photoUrl": request.photo_url.trim(),
            "status": PostStatus::Active.as_str(),
            "createdBy": uid,
            "createdByEmailLower": email_lower,
            "createdAt": now,
            "updatedAt": now,
        }));
        let id = self.store.add(POSTS, data.clone()).await?;
        tracing::info!(post_id = %id, "Community post created");
        Ok(Document::new(id, data).decode()?)
    }

    pub async fn get_post(&self, id: &str) -> Result<Option<CommunityPost>, AppError> {
        let post = match self.store.get(POSTS, id).await? {
            Some(doc) => Some(doc.decode::<CommunityPost>()?),
            None => None,
        };
        Ok(post.filter(|p| p.status == PostStatus::Active))
    }

    pub async fn update_post(&self, id: &str, request: &UpdatePostRequest) -> Result<CommunityPost, AppError> {
        if self.get_post(id).await?.is_none() {
            return Err(AppError::NotFound(format!("Post {} not found", id)));
        }
        let mut patch = object(json!({ "updatedAt": timestamp_now() }));
        if let Some(text) = &request.text {
            patch.insert("text".into(), json!(text.trim()));
        }
        if let Some(url) = &request.photo_url {
            patch.insert("photoUrl".into(), json!(url.trim()));
        }
        self.store.update(POSTS, id, patch).await?;
        self.get_post(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Post {} not found", id)))
    }

    /// Hard delete.
    pub async fn delete_post(&self, id: &str) -> Result<(), AppError> {
        if self.store.get(POSTS, id).await?.is_none() {
            return Err(AppError::NotFound(format!("Post {} not found", id)));
        }
        self.store.delete(POSTS, id).await?;
        Ok(())
    }

    pub async fn list_posts(&self, limit: usize) -> Vec<CommunityPost> {
        decode_all(&Self::posts_query(limit, None).execute(self.store.as_ref()).await)
    }

    pub async fn fetch_posts_page(&self, limit: usize, cursor: Option<Cursor>) -> Page<CommunityPost> {
        let query = Self::posts_query(limit, cursor);
        let docs = query.execute(self.store.as_ref()).await;
        Page::from_documents(&query.primary, &docs, decode_all)
    }

    pub fn listen_posts<F>(&self, limit: usize, mut callback: F) -> Subscription
    where
        F: FnMut(Vec<CommunityPost>) + Send + 'static,
    {
        listen(self.store.clone(), Self::posts_query(limit, None), move |result| {
            callback(decode_all(&result.unwrap_or_default()))
        })
    }

    // ==================== HIGHLIGHTS ====================

    /// Highlights are append-only: a second one for the same month is a new record.
    pub async fn add_highlight(&self, request: &CreateHighlightRequest) -> Result<Highlight, AppError> {
        let now = timestamp_now();
        let data = object(json!({
            "monthKey": request.month_key.trim(),
            "photoUrl": request.photo_url.trim(),
            "status": PostStatus::Active.as_str(),
            "createdAt": now,
            "updatedAt": now,
        }));
        let id = self.store.add(HIGHLIGHTS, data.clone()).await?;
        tracing::info!(highlight_id = %id, month = %request.month_key.trim(), "Highlight created");
        Ok(Document::new(id, data).decode()?)
    }

    /// Resolve a highlight by document id, else by month key.
    async fn resolve_highlight(&self, key: &str) -> Result<String, AppError> {
        if self.store.get(HIGHLIGHTS, key).await?.is_some() {
            return Ok(key.to_string());
        }
        if is_month_key(key) {
            let query = FallbackQuery::new(
                "highlights.by_month",
                Query::collection(HIGHLIGHTS)
                    .filter(Filter::eq("monthKey", key))
                    .order_by("createdAt", Direction::Desc)
                    .limit(1),
                ["monthKey"],
            );
            if let Some(doc) = query.execute(self.store.as_ref()).await.first() {
                return Ok(doc.id.clone());
            }
        }
        Err(AppError::NotFound(format!("Highlight {} not found", key)))
    }

    pub async fn update_highlight(
        &self,
        key: &str,
        request: &UpdateHighlightRequest,
    ) -> Result<Highlight, AppError> {
        let id = self.resolve_highlight(key).await?;
        let mut patch = object(json!({ "updatedAt": timestamp_now() }));
        if let Some(url) = &request.photo_url {
            patch.insert("photoUrl".into(), json!(url.trim()));
        }
        self.store.update(HIGHLIGHTS, &id, patch).await?;
        match self.store.get(HIGHLIGHTS, &id).await? {
            Some(doc) => Ok(doc.decode()?),
            None => Err(AppError::NotFound(format!("Highlight {} not found", key))),
        }
    }

    pub async fn delete_highlight(&self, key: &str) -> Result<(), AppError> {
        let id = self.resolve_highlight(key).await?;
        self.store.delete(HIGHLIGHTS, &id).await?;
        Ok(())
    }

    pub async fn list_highlights(&self, limit: usize) -> Result<Vec<Highlight>, AppError> {
        let docs = self.store.query(&Query::collection(HIGHLIGHTS)).await?;
        Ok(latest_highlights(docs, limit))
    }

    pub fn listen_latest_highlights<F>(&self, limit: usize, mut callback: F) -> Subscription
    where
        F: FnMut(Vec<Highlight>) + Send + 'static,
    {
        listen(self.store.clone(), Query::collection(HIGHLIGHTS), move |result| match result {
            Ok(docs) => callback(latest_highlights(docs, limit)),
            Err(e) => {
                tracing::error!(error = %e, "Highlight listener failed");
                callback(Vec::new());
            }
        })
    }

    /// Fill in fields missing from older highlight records.
    pub async fn backfill_highlights(&self) -> Result<BackfillReport, AppError> {
        let docs = self.store.query(&Query::collection(HIGHLIGHTS)).await?;
        let mut report = BackfillReport {
            scanned: docs.len(),
            ..Default::default()
        };

        for doc in docs {
            let now = timestamp_now();
            let created_at = doc.str_field("createdAt").map(str::to_string);
            let mut patch = object(json!({}));

            if created_at.is_none() {
                patch.insert("createdAt".into(), json!(now));
            }
            if doc.str_field("updatedAt").is_none() {
                patch.insert("updatedAt".into(), json!(created_at.as_deref().unwrap_or(&now)));
            }
            if doc.str_field("monthKey").is_none() {
                let month_key = if is_month_key(&doc.id) {
                    doc.id.clone()
                } else {
                    created_at.as_deref().unwrap_or(&now).chars().take(7).collect()
                };
                patch.insert("monthKey".into(), json!(month_key));
            }
            if doc.str_field("status").is_none() {
                patch.insert("status".into(), json!(PostStatus::Active.as_str()));
            }

            if !patch.is_empty() {
                self.store.update(HIGHLIGHTS, &doc.id, patch).await?;
                report.fixed += 1;
            }
        }

        tracing::info!(?report, "Highlights backfilled");
        Ok(report)
    }
}

/// Non-deleted highlights, most recently touched first.
pub fn latest_highlights(docs: Vec<Document>, limit: usize) -> Vec<Highlight> {
    let mut highlights: Vec<Highlight> = decode_all::<Highlight>(&docs)
        .into_iter()
        .filter(|h| h.status != PostStatus::Deleted)
        .collect();
    highlights.sort_by(|a, b| newest_first(b, a));
    highlights.truncate(limit);
    highlights
}

fn newest_first(a: &Highlight, b: &Highlight) -> Ordering {
    a.updated_at
        .cmp(&b.updated_at)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.month_key.cmp(&b.month_key))
}
