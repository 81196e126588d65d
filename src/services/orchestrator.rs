// src/services/orchestrator.rs
//
// The main control loop: scrape → persist → score → gate → notify, once per
// jittered cycle. Per-deal work is independent; one bad deal never takes the
// cycle down, and a down database only costs the current cycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{stream, StreamExt};
use metrics::{histogram, increment_counter};
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::settings::Settings;
use crate::db::config_store::{ConfigStore, CycleParams};
use crate::db::store::Store;
use crate::routes::health::CycleHealth;
use crate::services::formatter;
use crate::services::gate::{self, Decision, DropReason};
use crate::services::notifier::{self, Notifier, SubscriberRegistry};
use crate::services::scorer::{self, Observation};
use crate::services::scraper::{RawDeal, Scraper};
use crate::utils::clock::Clock;
use crate::utils::errors::{CycleError, ScrapeError};

/// After this many back-to-back failed cycles the logs carry an operator alert.
const ALERT_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct CycleOptions {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub soft_deadline: Duration,
    pub deal_concurrency: usize,
    pub notify_concurrency: usize,
}

impl CycleOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            min_interval: Duration::from_secs(settings.cycle_min_minutes * 60),
            max_interval: Duration::from_secs(settings.cycle_max_minutes * 60),
            soft_deadline: Duration::from_secs(settings.cycle_soft_deadline_secs),
            deal_concurrency: settings.deal_concurrency,
            notify_concurrency: settings.notify_concurrency,
        }
    }
}

#[derive(Debug)]
enum DealOutcome {
    Notified,
    Dropped(DropReason),
    NotifyFailed,
    StoreFailed,
    /// Skipped past the soft deadline or during shutdown.
    Abandoned,
}

#[derive(Debug, Default)]
pub struct CycleSummary {
    pub deals_seen: usize,
    pub notified: usize,
    pub dropped: usize,
    pub notify_failed: usize,
    pub store_failures: usize,
    pub abandoned: usize,
}

impl CycleSummary {
    fn absorb(&mut self, outcome: DealOutcome) {
        match outcome {
            DealOutcome::Notified => self.notified += 1,
            DealOutcome::Dropped(_) => self.dropped += 1,
            DealOutcome::NotifyFailed => self.notify_failed += 1,
            DealOutcome::StoreFailed => self.store_failures += 1,
            DealOutcome::Abandoned => self.abandoned += 1,
        }
    }
}

pub struct Orchestrator {
    store: Store,
    config: ConfigStore,
    scraper: Arc<dyn Scraper>,
    notifier: Arc<dyn Notifier>,
    subscribers: Arc<dyn SubscriberRegistry>,
    clock: Arc<dyn Clock>,
    health: CycleHealth,
    opts: CycleOptions,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        config: ConfigStore,
        scraper: Arc<dyn Scraper>,
        notifier: Arc<dyn Notifier>,
        subscribers: Arc<dyn SubscriberRegistry>,
        clock: Arc<dyn Clock>,
        health: CycleHealth,
        opts: CycleOptions,
    ) -> Self {
        Self {
            store,
            config,
            scraper,
            notifier,
            subscribers,
            clock,
            health,
            opts,
        }
    }

    /// Loop forever until the shutdown channel flips. A cycle in progress
    /// finishes its in-flight per-deal units before the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("orchestrator started");
        let mut consecutive_failures: u32 = 0;

        loop {
            let cycle_started = Instant::now();
            match self.run_cycle(&shutdown).await {
                Ok(summary) => {
                    consecutive_failures = 0;
                    self.health.stamp(self.clock.now_utc());
                    info!(
                        deals = summary.deals_seen,
                        notified = summary.notified,
                        dropped = summary.dropped,
                        notify_failed = summary.notify_failed,
                        store_failures = summary.store_failures,
                        abandoned = summary.abandoned,
                        elapsed_ms = cycle_started.elapsed().as_millis() as u64,
                        "cycle complete"
                    );
                }
                Err(e) => {
                    consecutive_failures += 1;
                    increment_counter!("cycle_failures_total");
                    if consecutive_failures >= ALERT_AFTER_FAILURES {
                        error!(
                            consecutive = consecutive_failures,
                            error = %e,
                            "OPERATOR ALERT: repeated cycle failures"
                        );
                    } else {
                        warn!(consecutive = consecutive_failures, error = %e, "cycle failed");
                    }
                }
            }
            increment_counter!("cycles_total");
            histogram!(
                "cycle_duration_seconds",
                cycle_started.elapsed().as_secs_f64()
            );

            if *shutdown.borrow() {
                break;
            }
            let pause = jittered_pause(self.opts.min_interval, self.opts.max_interval);
            debug!(pause_secs = pause.as_secs(), "sleeping until next cycle");
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("orchestrator stopped");
    }

    async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) -> Result<CycleSummary, CycleError> {
        let cycle_id = Uuid::new_v4();
        let deals = self.fetch_with_retry().await?;
        // Parameters are re-read every cycle; the AutoTuner may have moved them.
        let params = self.config.cycle_params().await?;
        let recipients = match self.subscribers.list_recipients().await {
            Ok(recipients) => recipients,
            Err(e) => {
                warn!(cycle = %cycle_id, error = %e, "subscriber list unavailable, scoring without notifying");
                Vec::new()
            }
        };

        debug!(cycle = %cycle_id, deals = deals.len(), recipients = recipients.len(), "cycle started");

        let deadline = Instant::now() + self.opts.soft_deadline;
        let mut summary = CycleSummary {
            deals_seen: deals.len(),
            ..Default::default()
        };

        {
            let recipients = &recipients;
            let params = &params;
            let mut outcomes = stream::iter(deals.into_iter().map(|deal| async move {
                // Checked lazily as each unit is dispatched; units already
                // running are never aborted mid-transaction.
                if Instant::now() > deadline || *shutdown.borrow() {
                    DealOutcome::Abandoned
                } else {
                    self.process_deal(deal, params, recipients, cycle_id).await
                }
            }))
            .buffer_unordered(self.opts.deal_concurrency.max(1));

            while let Some(outcome) = outcomes.next().await {
                summary.absorb(outcome);
            }
        }

        if summary.abandoned > 0 {
            warn!(
                cycle = %cycle_id,
                abandoned = summary.abandoned,
                "soft deadline hit, remaining deals deferred to next cycle"
            );
        }
        if summary.deals_seen > 0 && summary.store_failures == summary.deals_seen {
            return Err(CycleError::StorageUnavailable {
                failed: summary.store_failures,
            });
        }
        Ok(summary)
    }

    /// One transient scrape failure gets one jittered retry inside the cycle.
    async fn fetch_with_retry(&self) -> Result<Vec<RawDeal>, ScrapeError> {
        match self.scraper.fetch_newest().await {
            Ok(deals) => Ok(deals),
            Err(e) if e.is_transient() => {
                increment_counter!("scrape_failures_total");
                warn!(error = %e, "scrape failed, retrying once");
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(500..=2_000));
                tokio::time::sleep(jitter).await;
                self.scraper.fetch_newest().await
            }
            Err(e) => Err(e),
        }
    }

    async fn process_deal(
        &self,
        deal: RawDeal,
        params: &CycleParams,
        recipients: &[i64],
        cycle_id: Uuid,
    ) -> DealOutcome {
        let observation = observe(self.clock.as_ref(), &deal);
        let observed_at = observation.observed_at;
        let hours_since_published = observation.hours_since_published;

        let prior = match self.store.prior_snapshot(&deal.url, observed_at).await {
            Ok(prior) => prior,
            Err(e) => {
                warn!(cycle = %cycle_id, url = %deal.url, error = %e, "prior snapshot lookup failed");
                return DealOutcome::StoreFailed;
            }
        };

        let scored = scorer::score(&observation, prior.as_ref(), params);

        // History is written whatever the gate decides.
        let record = match self
            .store
            .record_observation(&deal, observed_at, hours_since_published, &scored)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                warn!(cycle = %cycle_id, url = %deal.url, error = %e, "observation write failed");
                return DealOutcome::StoreFailed;
            }
        };
        increment_counter!("deals_scored_total");

        match gate::evaluate(
            record.expired,
            deal.temperature,
            params.min_seed_temp,
            scored.rating,
            record.max_rating_notified,
        ) {
            Decision::Drop(reason) => {
                debug!(
                    cycle = %cycle_id,
                    url = %deal.url,
                    rating = scored.rating,
                    reason = reason.as_str(),
                    "deal dropped"
                );
                DealOutcome::Dropped(reason)
            }
            Decision::Notify { rating } => {
                if recipients.is_empty() {
                    warn!(cycle = %cycle_id, url = %deal.url, "no recipients, notification skipped");
                    return DealOutcome::NotifyFailed;
                }
                let message =
                    formatter::deal_message(&record, deal.temperature, &scored, hours_since_published);
                let delivered = notifier::broadcast(
                    self.notifier.as_ref(),
                    recipients,
                    &message,
                    self.opts.notify_concurrency,
                )
                .await;

                if delivered == 0 {
                    // Leaving max_rating_notified alone lets the next cycle retry.
                    warn!(cycle = %cycle_id, url = %deal.url, "no recipient accepted the notification");
                    return DealOutcome::NotifyFailed;
                }
                if let Err(e) = self.store.mark_notified(record.id, rating).await {
                    warn!(
                        cycle = %cycle_id,
                        url = %deal.url,
                        error = %e,
                        "max rating update failed, deal may renotify next cycle"
                    );
                    return DealOutcome::StoreFailed;
                }
                increment_counter!("notifications_sent_total");
                info!(
                    cycle = %cycle_id,
                    url = %deal.url,
                    rating,
                    final_score = scored.final_score,
                    delivered,
                    "deal notified"
                );
                DealOutcome::Notified
            }
        }
    }
}

/// Stamp a raw deal against the injected clock. Deals published "in the
/// future" (feed clock skew) clamp to zero hours.
fn observe(clock: &dyn Clock, deal: &RawDeal) -> Observation {
    let observed_at = clock.now_utc();
    let hours_since_published =
        ((observed_at - deal.published_at).num_seconds() as f64 / 3600.0).max(0.0);
    Observation {
        temperature: deal.temperature,
        hours_since_published,
        observed_at,
    }
}

/// Uniform random pause in `[min, max]`.
fn jittered_pause(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    Duration::from_secs(rand::thread_rng().gen_range(min.as_secs()..=max.as_secs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::test_support::FixedClock;
    use crate::utils::errors::{NotifyError, StoreError};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use sqlx::postgres::PgPoolOptions;

    fn raw_deal(published_at: DateTime<Utc>) -> RawDeal {
        RawDeal {
            url: "https://example.com/deal/7".into(),
            title: "Audífonos inalámbricos".into(),
            merchant: None,
            image_url: None,
            price: None,
            discount: None,
            coupon: None,
            description: None,
            temperature: 42.0,
            published_at,
            expired: false,
        }
    }

    #[test]
    fn observation_uses_the_injected_clock() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 20, 0, 0).unwrap();
        let clock = FixedClock(now);

        let observation = observe(&clock, &raw_deal(now - chrono::Duration::minutes(90)));
        assert_eq!(observation.observed_at, now);
        assert!((observation.hours_since_published - 1.5).abs() < 1e-9);
        assert_eq!(observation.temperature, 42.0);
    }

    #[test]
    fn future_published_at_clamps_to_zero_hours() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 20, 0, 0).unwrap();
        let clock = FixedClock(now);

        let observation = observe(&clock, &raw_deal(now + chrono::Duration::minutes(5)));
        assert_eq!(observation.hours_since_published, 0.0);
    }

    struct OneDealScraper;

    #[async_trait]
    impl Scraper for OneDealScraper {
        async fn fetch_newest(&self) -> Result<Vec<RawDeal>, ScrapeError> {
            let published = Utc.with_ymd_and_hms(2024, 5, 10, 19, 30, 0).unwrap();
            Ok(vec![raw_deal(published)])
        }
    }

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn send(&self, _chat_id: i64, _text: &str) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    struct NoSubscribers;

    #[async_trait]
    impl SubscriberRegistry for NoSubscribers {
        async fn list_recipients(&self) -> Result<Vec<i64>, StoreError> {
            Ok(Vec::new())
        }
    }

    /// Full cycle against an unreachable Postgres: the per-call deadline caps
    /// every store call and the cycle surfaces a store error for the next
    /// cycle to retry, instead of hanging.
    #[tokio::test]
    async fn cycle_aborts_when_storage_is_unreachable() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://promowatch@127.0.0.1:1/promowatch")
            .unwrap();
        let db_timeout = Duration::from_millis(100);
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 20, 0, 0).unwrap();

        let orchestrator = Orchestrator::new(
            Store::new(pool.clone(), db_timeout),
            ConfigStore::new(pool, db_timeout),
            Arc::new(OneDealScraper),
            Arc::new(NullNotifier),
            Arc::new(NoSubscribers),
            Arc::new(FixedClock(now)),
            CycleHealth::new(),
            CycleOptions {
                min_interval: Duration::from_secs(300),
                max_interval: Duration::from_secs(720),
                soft_deadline: Duration::from_secs(240),
                deal_concurrency: 2,
                notify_concurrency: 2,
            },
        );

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let err = orchestrator.run_cycle(&shutdown_rx).await.unwrap_err();
        assert!(matches!(err, CycleError::Store(_) | CycleError::StorageUnavailable { .. }));
    }

    #[test]
    fn jittered_pause_stays_in_bounds() {
        let min = Duration::from_secs(300);
        let max = Duration::from_secs(720);
        for _ in 0..200 {
            let pause = jittered_pause(min, max);
            assert!(pause >= min && pause <= max);
        }
    }

    #[test]
    fn degenerate_interval_collapses_to_min() {
        let five = Duration::from_secs(300);
        assert_eq!(jittered_pause(five, five), five);
    }

    #[test]
    fn summary_absorbs_outcomes() {
        let mut summary = CycleSummary::default();
        summary.absorb(DealOutcome::Notified);
        summary.absorb(DealOutcome::Dropped(DropReason::UnderSeed));
        summary.absorb(DealOutcome::Dropped(DropReason::Expired));
        summary.absorb(DealOutcome::StoreFailed);
        summary.absorb(DealOutcome::Abandoned);
        assert_eq!(summary.notified, 1);
        assert_eq!(summary.dropped, 2);
        assert_eq!(summary.store_failures, 1);
        assert_eq!(summary.abandoned, 1);
    }
}
