// src/db/store.rs

use crate::{
    db::models::{Deal, DealCheckpointAggregate, PriorSnapshot},
    services::scorer::Scored,
    services::scraper::RawDeal,
    utils::errors::StoreError,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run one database call under its own deadline. A timed-out call is retried
/// once; a second timeout surfaces as `StoreError::Timeout` and the caller
/// defers the work to the next cycle. Dropping a timed-out future rolls any
/// open transaction back, so retries always see all-or-none state.
pub(crate) async fn with_deadline<T, F, Fut>(deadline: Duration, op: F) -> Result<T, StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(deadline, op()).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            warn!(deadline_ms = deadline.as_millis() as u64, "db call timed out, retrying once");
            match tokio::time::timeout(deadline, op()).await {
                Ok(result) => Ok(result?),
                Err(_) => Err(StoreError::Timeout(deadline)),
            }
        }
    }
}

/// Postgres-backed snapshot store. Cheap to clone; all methods borrow the pool
/// and run under the per-call deadline.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
    call_timeout: Duration,
}

impl Store {
    pub fn new(pool: PgPool, call_timeout: Duration) -> Self {
        Self { pool, call_timeout }
    }

    /* ------------------- SNAPSHOTS ------------------- */

    /// Most recent history row strictly before `before`, looked up by URL so
    /// callers don't need a deal id before the first upsert.
    pub async fn prior_snapshot(
        &self,
        url: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<PriorSnapshot>, StoreError> {
        with_deadline(self.call_timeout, || async {
            sqlx::query_as::<_, PriorSnapshot>(
                r#"
                SELECT h.observed_at, h.temperature, h.velocity
                FROM   deal_history h
                JOIN   deals d ON d.id = h.deal_id
                WHERE  d.url = $1
                  AND  h.observed_at < $2
                ORDER  BY h.observed_at DESC
                LIMIT  1
                "#,
            )
            .bind(url)
            .bind(before)
            .fetch_optional(&self.pool)
            .await
        })
        .await
    }

    /// Upsert the deal and append its history row in one transaction, so a
    /// crash or timeout mid-unit leaves either both applied or neither.
    ///
    /// The upsert refreshes mutable attributes only; `max_rating_notified`
    /// and `published_at` are never overwritten. Returns the stored row,
    /// whose `max_rating_notified` is the pre-cycle value the gate needs.
    pub async fn record_observation(
        &self,
        raw: &RawDeal,
        observed_at: DateTime<Utc>,
        hours_since_published: f64,
        scored: &Scored,
    ) -> Result<Deal, StoreError> {
        with_deadline(self.call_timeout, || async {
            let mut tx = self.pool.begin().await?;

            let deal = sqlx::query_as::<_, Deal>(
                r#"
                INSERT INTO deals
                    (url, title, merchant, image_url, price, discount, coupon,
                     description, published_at, expired)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (url) DO UPDATE SET
                    title       = EXCLUDED.title,
                    merchant    = EXCLUDED.merchant,
                    image_url   = EXCLUDED.image_url,
                    price       = EXCLUDED.price,
                    discount    = EXCLUDED.discount,
                    coupon      = EXCLUDED.coupon,
                    description = EXCLUDED.description,
                    expired     = EXCLUDED.expired,
                    updated_at  = now()
                RETURNING id, url, title, merchant, image_url, price, discount,
                          coupon, description, published_at, expired,
                          max_rating_notified, created_at, updated_at
                "#,
            )
            .bind(&raw.url)
            .bind(&raw.title)
            .bind(&raw.merchant)
            .bind(&raw.image_url)
            .bind(raw.price)
            .bind(&raw.discount)
            .bind(&raw.coupon)
            .bind(&raw.description)
            .bind(raw.published_at)
            .bind(raw.expired)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO deal_history
                    (deal_id, observed_at, temperature, hours_since_published,
                     velocity, viral_score, final_score)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (deal_id, observed_at) DO NOTHING
                "#,
            )
            .bind(deal.id)
            .bind(observed_at)
            .bind(raw.temperature)
            .bind(hours_since_published)
            .bind(scored.velocity)
            .bind(scored.viral_score)
            .bind(scored.final_score)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok::<_, sqlx::Error>(deal)
        })
        .await
    }

    /// Raise `max_rating_notified`; the guard keeps it monotone so a stale
    /// writer can never lower it.
    pub async fn mark_notified(&self, deal_id: i64, rating: i32) -> Result<(), StoreError> {
        with_deadline(self.call_timeout, || async {
            sqlx::query(
                r#"
                UPDATE deals
                SET    max_rating_notified = $2,
                       updated_at = now()
                WHERE  id = $1
                  AND  max_rating_notified < $2
                "#,
            )
            .bind(deal_id)
            .bind(rating)
            .execute(&self.pool)
            .await?;
            Ok::<_, sqlx::Error>(())
        })
        .await
    }

    /* ------------------- AUTOTUNER ------------------- */

    /// Earliest viral_score observed on each deal that eventually reached
    /// `success_temp`, restricted to deals first seen more than
    /// `min_age_hours` ago.
    pub async fn earliest_winner_scores(
        &self,
        success_temp: f64,
        min_age_hours: i32,
    ) -> Result<Vec<f64>, StoreError> {
        with_deadline(self.call_timeout, || async {
            sqlx::query_scalar::<_, f64>(
                r#"
                SELECT first_score FROM (
                    SELECT DISTINCT ON (h.deal_id) h.deal_id, h.viral_score AS first_score
                    FROM   deal_history h
                    WHERE  h.deal_id IN (
                        SELECT deal_id
                        FROM   deal_history
                        GROUP  BY deal_id
                        HAVING MAX(temperature) >= $1
                           AND MIN(observed_at) < now() - make_interval(hours => $2)
                    )
                    ORDER  BY h.deal_id, h.observed_at ASC
                ) firsts
                "#,
            )
            .bind(success_temp)
            .bind(min_age_hours)
            .fetch_all(&self.pool)
            .await
        })
        .await
    }

    /// Per-deal peak temperatures overall and inside the 15/30/60-minute
    /// checkpoint windows, for deals first seen more than `min_age_hours` ago.
    pub async fn checkpoint_aggregates(
        &self,
        min_age_hours: i32,
    ) -> Result<Vec<DealCheckpointAggregate>, StoreError> {
        with_deadline(self.call_timeout, || async {
            sqlx::query_as::<_, DealCheckpointAggregate>(
                r#"
                SELECT MAX(temperature) AS peak_temperature,
                       MAX(temperature) FILTER (WHERE hours_since_published * 60.0 <= 15.0) AS peak_15m,
                       MAX(temperature) FILTER (WHERE hours_since_published * 60.0 <= 30.0) AS peak_30m,
                       MAX(temperature) FILTER (WHERE hours_since_published * 60.0 <= 60.0) AS peak_60m
                FROM   deal_history
                GROUP  BY deal_id
                HAVING MIN(observed_at) < now() - make_interval(hours => $1)
                "#,
            )
            .bind(min_age_hours)
            .fetch_all(&self.pool)
            .await
        })
        .await
    }

    /// Peak linear velocity per qualifying deal, for the legacy percentile keys.
    pub async fn peak_velocities(&self, min_age_hours: i32) -> Result<Vec<f64>, StoreError> {
        with_deadline(self.call_timeout, || async {
            sqlx::query_scalar::<_, f64>(
                r#"
                SELECT MAX(velocity)
                FROM   deal_history
                GROUP  BY deal_id
                HAVING MIN(observed_at) < now() - make_interval(hours => $1)
                "#,
            )
            .bind(min_age_hours)
            .fetch_all(&self.pool)
            .await
        })
        .await
    }
}
