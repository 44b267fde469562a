//! Report API endpoints.

use axum::extract::{Query, State};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

use super::{success, ApiResult};
use crate::models::{CategoryRatio, DashboardCounts, MonthlyUserCount};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct YearParams {
    pub year: Option<i32>,
}

impl YearParams {
    fn year(&self) -> i32 {
        self.year.unwrap_or_else(|| Utc::now().year())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardReport {
    pub counts: DashboardCounts,
    pub total_users: u64,
    pub month_to_date: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalsReport {
    pub year: i32,
    pub year_to_date: f64,
    pub month_to_date: f64,
}

/// GET /api/reports/dashboard
pub async fn dashboard_report(State(state): State<AppState>) -> ApiResult<DashboardReport> {
    let donations = &state.repos.donations;
    success(DashboardReport {
        counts: donations.dashboard_counts().await,
        total_users: state.repos.user_stats.total_users().await?,
        month_to_date: donations.month_to_date_total().await,
    })
}

/// GET /api/reports/totals
pub async fn totals_report(
    State(state): State<AppState>,
    Query(params): Query<YearParams>,
) -> ApiResult<TotalsReport> {
    let year = params.year();
    let donations = &state.repos.donations;
    success(TotalsReport {
        year,
        year_to_date: donations.year_to_date_total(year).await,
        month_to_date: donations.month_to_date_total().await,
    })
}

/// GET /api/reports/categories - Category split of the last 30 days.
pub async fn categories_report(State(state): State<AppState>) -> ApiResult<Vec<CategoryRatio>> {
    success(state.repos.donations.category_ratios().await)
}

/// GET /api/reports/monthly-users
pub async fn monthly_users_report(
    State(state): State<AppState>,
    Query(params): Query<YearParams>,
) -> ApiResult<Vec<MonthlyUserCount>> {
    success(state.repos.user_stats.monthly_counts(params.year()).await?)
}
