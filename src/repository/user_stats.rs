use std::sync::Arc;

use serde_json::{json, Value};

use super::object;
use crate::db::{collections, Document, DocumentStore};
use crate::errors::AppError;
use crate::models::{MonthlyUserCount, UpdateUserStatsRequest, UserStats};

const USER_STATS: &str = collections::USER_STATS;
const GLOBAL: &str = "global";

/// Short Turkish month labels used on the users chart.
pub const MONTH_LABELS: [&str; 12] = [
    "Oca", "Şub", "Mar", "Nis", "May", "Haz", "Tem", "Ağu", "Eyl", "Eki", "Kas", "Ara",
];

/// The singleton `userStats/global` document.
#[derive(Clone)]
pub struct UserStatsRepo {
    store: Arc<dyn DocumentStore>,
}

impl UserStatsRepo {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn global(&self) -> Result<Option<Document>, AppError> {
        Ok(self.store.get(USER_STATS, GLOBAL).await?)
    }

    pub async fn total_users(&self) -> Result<u64, AppError> {
        Ok(self
            .global()
            .await?
            .and_then(|doc| doc.field("totalUsers").map(lenient_count))
            .unwrap_or(0))
    }

    /// Twelve bars for `year`, zero where a month has no entry.
    pub async fn monthly_counts(&self, year: i32) -> Result<Vec<MonthlyUserCount>, AppError> {
        let doc = self.global().await?;
        let monthly = doc
            .as_ref()
            .and_then(|doc| doc.field("monthlyUsers"))
            .and_then(Value::as_object);

        Ok(MONTH_LABELS
            .iter()
            .enumerate()
            .map(|(i, label)| {
                let key = format!("{:04}-{:02}", year, i + 1);
                MonthlyUserCount {
                    month: label.to_string(),
                    count: monthly
                        .and_then(|m| m.get(&key))
                        .map(lenient_count)
                        .unwrap_or(0),
                }
            })
            .collect())
    }

    /// Merge new values into the stats document. Months not mentioned keep their count.
    pub async fn update(&self, request: &UpdateUserStatsRequest) -> Result<UserStats, AppError> {
        let mut data = self.global().await?.map(|doc| doc.data).unwrap_or_default();
        if let Some(total) = request.total_users {
            data.insert("totalUsers".into(), json!(total));
        }
        if let Some(months) = &request.monthly_users {
            let mut merged = data
                .get("monthlyUsers")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            for (month, count) in months {
                merged.insert(month.clone(), json!(count));
            }
            data.insert("monthlyUsers".into(), Value::Object(merged));
        }

        self.store.set(USER_STATS, GLOBAL, data, false).await?;
        let stats = self
            .global()
            .await?
            .map(|doc| Document::new(doc.id, object(normalized(&doc.data))).decode())
            .transpose()?;
        Ok(stats.unwrap_or_default())
    }
}

/// Counts may have been written as floats or numeric strings.
fn lenient_count(value: &Value) -> u64 {
    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if n.is_finite() && n > 0.0 {
        n.round() as u64
    } else {
        0
    }
}

fn normalized(data: &crate::db::Fields) -> Value {
    let monthly: serde_json::Map<String, Value> = data
        .get("monthlyUsers")
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), json!(lenient_count(v)))).collect())
        .unwrap_or_default();
    json!({
        "totalUsers": data.get("totalUsers").map(lenient_count).unwrap_or(0),
        "monthlyUsers": monthly,
    })
}
