//! Donation campaigns.
//!
//! Donations are never removed: deleting one flips its status to `deleted`, and every read
//! path below drops such records.

use std::sync::Arc;

use chrono::{Datelike, Duration, SecondsFormat, Utc};
use serde_json::json;

use super::{object, Page};
use crate::db::{
    collections, decode_all, listen, listen_document, timestamp_now, Cursor, Direction,
    Document, DocumentStore, FallbackQuery, Filter, Query, Subscription,
};
use crate::errors::AppError;
use crate::models::{
    CampaignOption, CategoryRatio, CreateDonationRequest, DashboardCounts, Donation,
    DonationCategory, DonationStatus, DonationSummary, LifecycleEvent, UpdateDonationRequest,
};

const DONATIONS: &str = collections::DONATIONS;

/// Colors assigned to category slices, in slice order.
pub const CATEGORY_PALETTE: [&str; 10] = [
    "#B60707", "#E67E22", "#2980B9", "#27AE60", "#8E44AD", "#D35400", "#16A085", "#2C3E50",
    "#C0392B", "#7F8C8D",
];

/// Statuses of finished campaigns that may still lack a photo.
const FINISHED: [&str; 2] = ["completed", "photo_pending"];

#[derive(Clone)]
pub struct DonationsRepo {
    store: Arc<dyn DocumentStore>,
}

impl DonationsRepo {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    // ==================== QUERIES ====================

    /// Visible donations, newest first.
    pub fn recent_query(limit: usize, cursor: Option<Cursor>) -> FallbackQuery {
        FallbackQuery::new(
            "donations.recent",
            Query::collection(DONATIONS)
                .filter(Filter::is_in("status", DonationStatus::VISIBLE))
                .order_by("createdAt", Direction::Desc)
                .limit(limit)
                .start_after(cursor),
            ["status"],
        )
    }

    fn completed_query(limit: usize) -> FallbackQuery {
        FallbackQuery::new(
            "donations.completed",
            Query::collection(DONATIONS)
                .filter(Filter::eq("status", "completed"))
                .order_by("createdAt", Direction::Desc)
                .limit(limit),
            ["status"],
        )
    }

    fn completed_since(label: &'static str, from: String, until: Option<String>) -> FallbackQuery {
        let mut query = Query::collection(DONATIONS)
            .filter(Filter::eq("status", "completed"))
            .filter(Filter::gte("createdAt", from));
        if let Some(until) = until {
            query = query.filter(Filter::lt("createdAt", until));
        }
        FallbackQuery::new(label, query, ["status"])
    }

    // ==================== READS ====================

    /// Get a donation. Missing and soft-deleted donations are both `None`.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Donation>, AppError> {
        let doc = self.store.get(DONATIONS, id).await?;
        Ok(doc.as_ref().and_then(visible))
    }

    /// Follow one donation. The callback gets `None` while it is missing or deleted.
    pub fn listen_by_id<F>(&self, id: &str, mut callback: F) -> Subscription
    where
        F: FnMut(Option<Donation>) + Send + 'static,
    {
        listen_document(self.store.clone(), DONATIONS, id, move |result| match result {
            Ok(doc) => callback(doc.as_ref().and_then(visible)),
            Err(e) => {
                tracing::error!(error = %e, "Donation listener failed");
                callback(None);
            }
        })
    }

    /// Follow the most recent visible donations.
    pub fn listen_recent<F>(&self, limit: usize, mut callback: F) -> Subscription
    where
        F: FnMut(Vec<Donation>) + Send + 'static,
    {
        listen(self.store.clone(), Self::recent_query(limit, None), move |result| {
            callback(decode_visible(&result.unwrap_or_default()))
        })
    }

    /// Follow the most recently completed campaigns.
    pub fn listen_recent_completed<F>(&self, limit: usize, mut callback: F) -> Subscription
    where
        F: FnMut(Vec<DonationSummary>) + Send + 'static,
    {
        listen(self.store.clone(), Self::completed_query(limit), move |result| {
            callback(decode_all(&result.unwrap_or_default()))
        })
    }

    pub async fn fetch_page(
        &self,
        limit: usize,
        cursor: Option<Cursor>,
    ) -> Result<Page<Donation>, AppError> {
        let query = Self::recent_query(limit, cursor);
        let docs = query.execute(self.store.as_ref()).await;
        Ok(Page::from_documents(&query.primary, &docs, decode_visible))
    }

    pub async fn fetch_completed(&self, limit: usize) -> Vec<DonationSummary> {
        let docs = Self::completed_query(limit).execute(self.store.as_ref()).await;
        decode_all(&docs)
    }

    /// Prefix search on the lower-cased name.
    pub async fn search_by_name(&self, q: &str, limit: usize) -> Vec<DonationSummary> {
        let prefix = q.trim().to_lowercase();
        if prefix.is_empty() {
            return Vec::new();
        }
        let query = FallbackQuery::new(
            "donations.search",
            Query::collection(DONATIONS)
                .filter(Filter::is_in("status", DonationStatus::VISIBLE))
                .filters(Filter::prefix("nameLower", &prefix))
                .order_by("nameLower", Direction::Asc)
                .limit(limit),
            ["status"],
        );
        decode_all(&query.execute(self.store.as_ref()).await)
    }

    /// Finished campaigns still waiting for a photo, most recently updated first.
    pub async fn fetch_photo_pending(&self, limit: usize) -> Vec<DonationSummary> {
        let query = FallbackQuery::new(
            "donations.photo_pending",
            Query::collection(DONATIONS)
                .filter(Filter::is_in("status", FINISHED))
                .filter(Filter::eq("photoUrl", ""))
                .order_by("updatedAt", Direction::Desc)
                .limit(limit),
            ["status"],
        );
        decode_all(&query.execute(self.store.as_ref()).await)
    }

    /// Every campaign a notification may target.
    pub async fn campaign_options(&self) -> Result<Vec<CampaignOption>, AppError> {
        let docs = self.store.query(&Query::collection(DONATIONS)).await?;
        Ok(docs
            .iter()
            .filter_map(visible)
            .map(|d| CampaignOption {
                id: d.id,
                name: if d.name.is_empty() {
                    "(İsimsiz)".to_string()
                } else {
                    d.name
                },
                status: d.status.as_str().to_string(),
            })
            .collect())
    }

    // ==================== REPORTS ====================

    pub async fn month_to_date_total(&self) -> f64 {
        let now = Utc::now();
        let from = format!("{:04}-{:02}-01T00:00:00.000Z", now.year(), now.month());
        let query = Self::completed_since("donations.month_total", from, None);
        sum_collected(&query.execute(self.store.as_ref()).await)
    }

    pub async fn year_to_date_total(&self, year: i32) -> f64 {
        let from = format!("{:04}-01-01T00:00:00.000Z", year);
        let until = format!("{:04}-01-01T00:00:00.000Z", year + 1);
        let query = Self::completed_since("donations.year_total", from, Some(until));
        sum_collected(&query.execute(self.store.as_ref()).await)
    }

    /// Category split of campaigns completed in the last 30 days.
    pub async fn category_ratios(&self) -> Vec<CategoryRatio> {
        let from = (Utc::now() - Duration::days(30)).to_rfc3339_opts(SecondsFormat::Millis, true);
        let query = Self::completed_since("donations.categories", from, None);
        let donations: Vec<Donation> = decode_all(&query.execute(self.store.as_ref()).await);
        category_ratios(&donations)
    }

    pub async fn dashboard_counts(&self) -> DashboardCounts {
        let store = self.store.as_ref();
        let by_status = |label, status: &'static str| {
            FallbackQuery::new(
                label,
                Query::collection(DONATIONS).filter(Filter::eq("status", status)),
                ["status"],
            )
        };
        let total = FallbackQuery::new(
            "donations.count_total",
            Query::collection(DONATIONS).filter(Filter::is_in("status", DonationStatus::VISIBLE)),
            ["status"],
        );
        let photo_pending = FallbackQuery::new(
            "donations.count_photo_pending",
            Query::collection(DONATIONS)
                .filter(Filter::is_in("status", FINISHED))
                .filter(Filter::eq("photoUrl", "")),
            ["status"],
        );

        DashboardCounts {
            total: total.count(store).await,
            active: by_status("donations.count_active", "active").count(store).await,
            completed: by_status("donations.count_completed", "completed")
                .count(store)
                .await,
            photo_pending: photo_pending.count(store).await,
        }
    }

    // ==================== WRITES ====================

    pub async fn add(
        &self,
        request: &CreateDonationRequest,
        category: DonationCategory,
        uid: &str,
    ) -> Result<Donation, AppError> {
        let name = request.name.trim();
        let now = timestamp_now();
        let data = object(json!({
            "name": name,
            "nameLower": name.to_lowercase(),
            "amount": request.amount,
            "category": category.label(),
            "description": request.description.as_deref().unwrap_or_default().trim(),
            "collected": 0,
            "status": DonationStatus::Active.as_str(),
            "photoUrl": "",
            "photos": [],
            "createdBy": uid,
            "createdAt": now,
            "updatedAt": now,
        }));

        let id = self.store.add(DONATIONS, data.clone()).await?;
        tracing::info!(donation_id = %id, "Donation created");
        Ok(Document::new(id, data).decode()?)
    }

    /// Update editable fields. `collected`, `status` and photos never change here.
    pub async fn update(
        &self,
        id: &str,
        request: &UpdateDonationRequest,
        category: Option<DonationCategory>,
    ) -> Result<Donation, AppError> {
        self.require_visible(id).await?;

        let mut patch = object(json!({ "updatedAt": timestamp_now() }));
        if let Some(name) = &request.name {
            let name = name.trim();
            patch.insert("name".into(), json!(name));
            patch.insert("nameLower".into(), json!(name.to_lowercase()));
        }
        if let Some(amount) = request.amount {
            patch.insert("amount".into(), json!(amount));
        }
        if let Some(category) = category {
            patch.insert("category".into(), json!(category.label()));
        }
        if let Some(description) = &request.description {
            patch.insert("description".into(), json!(description.trim()));
        }

        self.store.update(DONATIONS, id, patch).await?;
        self.require_visible(id).await
    }

    /// Attach a photo. Appends to the photo list and completes a campaign waiting on one.
    pub async fn set_photo_url(&self, id: &str, url: &str) -> Result<Donation, AppError> {
        let donation = self.require_visible(id).await?;
        let url = url.trim().to_string();
        let status = donation.status.next(LifecycleEvent::PhotoAttached, true)?;

        let mut photos = donation.photos;
        if !photos.contains(&url) {
            photos.push(url.clone());
        }
        let patch = object(json!({
            "photoUrl": url,
            "photos": photos,
            "status": status.as_str(),
            "updatedAt": timestamp_now(),
        }));
        self.store.update(DONATIONS, id, patch).await?;
        if status != donation.status {
            tracing::info!(donation_id = %id, status = status.as_str(), "Donation status changed");
        }
        self.require_visible(id).await
    }

    /// Soft delete.
    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        let donation = self.require_visible(id).await?;
        let status = donation.status.next(LifecycleEvent::SoftDeleted, donation.has_photo())?;
        let patch = object(json!({ "status": status.as_str(), "updatedAt": timestamp_now() }));
        self.store.update(DONATIONS, id, patch).await?;
        tracing::info!(donation_id = %id, "Donation soft-deleted");
        Ok(())
    }

    /// Record the collected amount reported by the trusted aggregation process.
    ///
    /// This is the only write path for `collected`, and the only place the target-reached
    /// transition is applied.
    pub async fn record_progress(&self, id: &str, collected: f64) -> Result<Donation, AppError> {
        if !collected.is_finite() || collected < 0.0 {
            return Err(AppError::Validation(
                "collected must be a non-negative number".to_string(),
            ));
        }
        let donation = self.require_visible(id).await?;

        let mut status = donation.status;
        if donation.amount > 0.0 && collected >= donation.amount {
            status = status.next(LifecycleEvent::TargetReached, donation.has_photo())?;
        }
        let patch = object(json!({
            "collected": collected,
            "status": status.as_str(),
            "updatedAt": timestamp_now(),
        }));
        self.store.update(DONATIONS, id, patch).await?;
        tracing::info!(
            donation_id = %id,
            collected,
            status = status.as_str(),
            "Donation progress recorded"
        );
        self.require_visible(id).await
    }

    async fn require_visible(&self, id: &str) -> Result<Donation, AppError> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Donation {} not found", id)))
    }
}

fn visible(doc: &Document) -> Option<Donation> {
    match doc.decode::<Donation>() {
        Ok(donation) if donation.status.is_visible() => Some(donation),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed donation");
            None
        }
    }
}

fn decode_visible(docs: &[Document]) -> Vec<Donation> {
    docs.iter().filter_map(visible).collect()
}

fn sum_collected(docs: &[Document]) -> f64 {
    docs.iter().filter_map(|d| d.f64_field("collected")).sum()
}

/// Percent share per category, largest first, colored from the palette.
pub fn category_ratios(donations: &[Donation]) -> Vec<CategoryRatio> {
    if donations.is_empty() {
        return Vec::new();
    }
    let mut counts: Vec<(DonationCategory, usize)> = DonationCategory::ALL
        .into_iter()
        .map(|c| (c, donations.iter().filter(|d| d.category == c).count()))
        .filter(|(_, n)| *n > 0)
        .collect();
    // Stable sort keeps the category order for ties.
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    let total = donations.len() as f64;
    counts
        .into_iter()
        .enumerate()
        .map(|(i, (category, n))| CategoryRatio {
            name: category.label().to_string(),
            value: ((n as f64 / total) * 100.0).round() as u32,
            color: CATEGORY_PALETTE[i % CATEGORY_PALETTE.len()].to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{open_store, open_strict_store};
    use crate::db::StoreError;

    fn request(name: &str, amount: f64) -> CreateDonationRequest {
        CreateDonationRequest {
            name: name.to_string(),
            amount,
            category: "Eğitim Yardımı".to_string(),
            description: Some("  Kırtasiye  ".to_string()),
        }
    }

    async fn create(repo: &DonationsRepo, name: &str, amount: f64) -> Donation {
        let req = request(name, amount);
        let category = req.validate().unwrap();
        repo.add(&req, category, "uid-1").await.unwrap()
    }

    #[tokio::test]
    async fn test_add_starts_active_with_nothing_collected() {
        let (_dir, store) = open_store().await;
        let repo = DonationsRepo::new(store);

        let donation = create(&repo, " Okul Çantası ", 1000.0).await;
        assert_eq!(donation.name, "Okul Çantası");
        assert_eq!(donation.name_lower.as_deref(), Some("okul çantası"));
        assert_eq!(donation.description.as_deref(), Some("Kırtasiye"));
        assert_eq!(donation.status, DonationStatus::Active);
        assert_eq!(donation.collected, 0.0);

        let read = repo.get_by_id(&donation.id).await.unwrap().unwrap();
        assert_eq!(read, donation);
    }

    #[tokio::test]
    async fn test_soft_deleted_hidden_from_reads() {
        let (_dir, store) = open_store().await;
        let repo = DonationsRepo::new(store.clone());

        let keep = create(&repo, "Kalan kampanya", 100.0).await;
        let gone = create(&repo, "Silinen kampanya", 100.0).await;
        repo.delete(&gone.id).await.unwrap();

        assert!(repo.get_by_id(&gone.id).await.unwrap().is_none());
        // Still stored.
        let raw = store.get(DONATIONS, &gone.id).await.unwrap().unwrap();
        assert_eq!(raw.str_field("status"), Some("deleted"));

        let page = repo.fetch_page(10, None).await.unwrap();
        let ids: Vec<&str> = page.items.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, [keep.id.as_str()]);

        assert!(matches!(repo.delete(&gone.id).await, Err(AppError::NotFound(_))));
        assert!(repo.search_by_name("silinen", 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_progress_drives_lifecycle() {
        let (_dir, store) = open_store().await;
        let repo = DonationsRepo::new(store);
        let donation = create(&repo, "Kışlık mont", 500.0).await;

        let partial = repo.record_progress(&donation.id, 200.0).await.unwrap();
        assert_eq!(partial.status, DonationStatus::Active);

        let reached = repo.record_progress(&donation.id, 500.0).await.unwrap();
        assert_eq!(reached.status, DonationStatus::PhotoPending);
        assert_eq!(repo.fetch_photo_pending(10).await.len(), 1);

        let done = repo
            .set_photo_url(&donation.id, " https://cdn.beraber.org/mont.jpg ")
            .await
            .unwrap();
        assert_eq!(done.status, DonationStatus::Completed);
        assert_eq!(done.photos, vec!["https://cdn.beraber.org/mont.jpg".to_string()]);
        assert!(repo.fetch_photo_pending(10).await.is_empty());
        assert_eq!(repo.fetch_completed(10).await.len(), 1);

        assert!(repo.record_progress(&donation.id, -1.0).await.is_err());
    }

    #[tokio::test]
    async fn test_update_leaves_collected_and_status() {
        let (_dir, store) = open_store().await;
        let repo = DonationsRepo::new(store);
        let donation = create(&repo, "Gıda kolisi", 300.0).await;

        let update = UpdateDonationRequest {
            name: Some("Gıda kolisi 2".to_string()),
            ..Default::default()
        };
        let updated = repo.update(&donation.id, &update, None).await.unwrap();
        assert_eq!(updated.name, "Gıda kolisi 2");
        assert_eq!(updated.collected, 0.0);
        assert_eq!(updated.status, DonationStatus::Active);
    }

    #[tokio::test]
    async fn test_search_works_without_index() {
        let (_dir, store) = open_strict_store().await;
        let repo = DonationsRepo::new(store.clone());
        create(&repo, "Okul çantası", 100.0).await;
        create(&repo, "Okul kitabı", 100.0).await;
        create(&repo, "Battaniye", 100.0).await;

        // Prefix range plus status filter needs a composite index.
        let direct = Query::collection(DONATIONS)
            .filter(Filter::is_in("status", DonationStatus::VISIBLE))
            .filters(Filter::prefix("nameLower", "okul"));
        assert!(matches!(
            store.query(&direct).await,
            Err(StoreError::MissingIndex(_))
        ));

        let hits = repo.search_by_name("  OKUL ", 10).await;
        let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, ["Okul kitabı", "Okul çantası"]);
    }

    #[tokio::test]
    async fn test_dashboard_counts() {
        let (_dir, store) = open_strict_store().await;
        let repo = DonationsRepo::new(store);
        let a = create(&repo, "Kampanya A", 100.0).await;
        let b = create(&repo, "Kampanya B", 100.0).await;
        create(&repo, "Kampanya C", 100.0).await;
        repo.record_progress(&a.id, 100.0).await.unwrap();
        repo.delete(&b.id).await.unwrap();

        let counts = repo.dashboard_counts().await;
        assert_eq!(
            counts,
            DashboardCounts {
                total: 2,
                active: 1,
                completed: 0,
                photo_pending: 1,
            }
        );
    }

    #[test]
    fn test_category_ratios() {
        let make = |category| Donation {
            id: "x".to_string(),
            name: "x".to_string(),
            name_lower: None,
            amount: 1.0,
            collected: 1.0,
            category,
            description: None,
            status: DonationStatus::Completed,
            photo_url: None,
            photos: Vec::new(),
            created_by: None,
            created_at: None,
            updated_at: None,
        };
        let donations = vec![
            make(DonationCategory::Health),
            make(DonationCategory::Health),
            make(DonationCategory::Disaster),
        ];
        let ratios = category_ratios(&donations);
        assert_eq!(ratios.len(), 2);
        assert_eq!(ratios[0].name, "Sağlık Yardımı");
        assert_eq!(ratios[0].value, 67);
        assert_eq!(ratios[0].color, "#B60707");
        assert_eq!(ratios[1].value, 33);
        assert!(category_ratios(&[]).is_empty());
    }
}
