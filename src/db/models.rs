use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Deal {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub merchant: Option<String>,
    pub image_url: Option<String>,
    pub price: Option<f64>,
    pub discount: Option<String>,
    pub coupon: Option<String>,
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
    pub expired: bool,
    pub max_rating_notified: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// What the scorer needs from the most recent earlier observation.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct PriorSnapshot {
    pub observed_at: DateTime<Utc>,
    pub temperature: f64,
    pub velocity: f64,
}

/// Per-deal aggregates feeding the AutoTuner's golden-ratio report.
///
/// `peak_15m` etc. are NULL when the deal had no observation inside
/// that checkpoint window.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct DealCheckpointAggregate {
    pub peak_temperature: f64,
    pub peak_15m: Option<f64>,
    pub peak_30m: Option<f64>,
    pub peak_60m: Option<f64>,
}
