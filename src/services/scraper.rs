// src/services/scraper.rs
//
// Feed contract plus the default HTTP implementation. HTML parsing stays out
// of this service; the default scraper reads the site's JSON frontpage feed.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::utils::errors::ScrapeError;

/// One listing as observed on the "newest" page.
#[derive(Debug, Clone)]
pub struct RawDeal {
    pub url: String,
    pub title: String,
    pub merchant: Option<String>,
    pub image_url: Option<String>,
    pub price: Option<f64>,
    pub discount: Option<String>,
    pub coupon: Option<String>,
    pub description: Option<String>,
    pub temperature: f64,
    pub published_at: DateTime<Utc>,
    pub expired: bool,
}

#[async_trait]
pub trait Scraper: Send + Sync {
    async fn fetch_newest(&self) -> Result<Vec<RawDeal>, ScrapeError>;
}

/* ------------------- HTTP feed scraper ------------------- */

#[derive(Debug, Deserialize)]
struct FeedEntry {
    url: Option<String>,
    title: Option<String>,
    merchant: Option<String>,
    image_url: Option<String>,
    price: Option<f64>,
    discount: Option<String>,
    #[serde(alias = "coupon_code")]
    coupon: Option<String>,
    description: Option<String>,
    temperature: Option<f64>,
    /// Unix seconds.
    published_at: Option<i64>,
    #[serde(default)]
    expired: bool,
}

pub struct HttpScraper {
    client: reqwest::Client,
    feed_url: String,
}

impl HttpScraper {
    pub fn new(feed_url: impl Into<String>, timeout: Duration) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("promowatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            feed_url: feed_url.into(),
        })
    }

    /// Accepts either a bare JSON array or an object wrapping it in `data`.
    fn entries(payload: serde_json::Value) -> Result<Vec<serde_json::Value>, ScrapeError> {
        match payload {
            serde_json::Value::Array(items) => Ok(items),
            serde_json::Value::Object(mut map) => match map.remove("data") {
                Some(serde_json::Value::Array(items)) => Ok(items),
                _ => Err(ScrapeError::Payload("no deal array in feed response".into())),
            },
            other => Err(ScrapeError::Payload(format!(
                "unexpected feed payload type: {other}"
            ))),
        }
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn fetch_newest(&self) -> Result<Vec<RawDeal>, ScrapeError> {
        let payload: serde_json::Value = self
            .client
            .get(&self.feed_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut deals = Vec::new();
        for raw in Self::entries(payload)? {
            match parse_entry(&raw) {
                Some(deal) => deals.push(deal),
                // Malformed records never fail the cycle.
                None => warn!(payload = %raw, "skipping malformed feed record"),
            }
        }
        Ok(deals)
    }
}

/// A record without url or temperature is unusable; everything else degrades
/// to a sensible default (a missing timestamp counts as just published).
fn parse_entry(raw: &serde_json::Value) -> Option<RawDeal> {
    let entry: FeedEntry = serde_json::from_value(raw.clone()).ok()?;
    let url = entry.url?;
    let temperature = entry.temperature?;

    let published_at = entry
        .published_at
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now);

    Some(RawDeal {
        title: entry.title.unwrap_or_else(|| url.clone()),
        url,
        merchant: entry.merchant,
        image_url: entry.image_url,
        price: entry.price,
        discount: entry.discount,
        coupon: entry.coupon,
        description: entry.description,
        temperature,
        published_at,
        expired: entry.expired,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_complete_entry() {
        let raw = json!({
            "url": "https://example.com/deal/1",
            "title": "Mechanical keyboard",
            "merchant": "Amazon",
            "price": 999.0,
            "coupon_code": "TECLADO10",
            "temperature": 42.5,
            "published_at": 1_715_000_000,
            "expired": false
        });
        let deal = parse_entry(&raw).expect("entry should parse");
        assert_eq!(deal.title, "Mechanical keyboard");
        assert_eq!(deal.coupon.as_deref(), Some("TECLADO10"));
        assert_eq!(deal.temperature, 42.5);
        assert!(!deal.expired);
    }

    #[test]
    fn missing_url_or_temperature_is_malformed() {
        assert!(parse_entry(&json!({ "temperature": 10.0 })).is_none());
        assert!(parse_entry(&json!({ "url": "https://example.com/deal/2" })).is_none());
    }

    #[test]
    fn title_falls_back_to_url() {
        let raw = json!({ "url": "https://example.com/deal/3", "temperature": 5.0 });
        let deal = parse_entry(&raw).unwrap();
        assert_eq!(deal.title, "https://example.com/deal/3");
    }

    #[test]
    fn entries_unwraps_data_envelope() {
        let wrapped = json!({ "data": [ { "url": "u", "temperature": 1.0 } ] });
        assert_eq!(HttpScraper::entries(wrapped).unwrap().len(), 1);

        let bare = json!([ { "url": "u", "temperature": 1.0 } ]);
        assert_eq!(HttpScraper::entries(bare).unwrap().len(), 1);

        assert!(HttpScraper::entries(json!({ "items": [] })).is_err());
        assert!(HttpScraper::entries(json!(42)).is_err());
    }
}
