// src/services/autotuner.rs
//
// Periodic recomputation of thresholds from historical outcomes. Reads
// deal_history, writes system_config. Every failure here is non-fatal: the
// orchestrator keeps running on the previous parameters.

use std::time::Duration;

use statrs::statistics::{Data, OrderStatistics};
use tracing::{error, info};

use crate::db::config_store::{ConfigKey, ConfigStore};
use crate::db::models::DealCheckpointAggregate;
use crate::db::store::Store;
use crate::utils::errors::TunerError;

/// A deal counts as a "winner" once any observation reached this temperature.
const SUCCESS_TEMP: f64 = 200.0;
const HIGH_SUCCESS_TEMP: f64 = 500.0;
/// Deals younger than this are still in flight and excluded from the dataset.
const MIN_AGE_HOURS: i32 = 6;
/// Below this many winners the threshold is left untouched.
pub const MIN_WINNERS: usize = 10;
const THRESHOLD_MIN: f64 = 10.0;
const THRESHOLD_MAX: f64 = 500.0;

const CHECKPOINTS_MIN: [u32; 3] = [15, 30, 60];
const TEMP_FLOORS: [f64; 3] = [20.0, 30.0, 50.0];

#[derive(Debug, Clone, Copy)]
pub struct GoldenCell {
    pub checkpoint_min: u32,
    pub floor: f64,
    pub qualified: usize,
    pub reached_200: usize,
    pub reached_500: usize,
}

impl GoldenCell {
    pub fn ratio_200(&self) -> f64 {
        ratio(self.reached_200, self.qualified)
    }

    pub fn ratio_500(&self) -> f64 {
        ratio(self.reached_500, self.qualified)
    }
}

fn ratio(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

#[derive(Debug)]
pub struct TunerReport {
    pub winners: usize,
    /// New viral_threshold, when enough winners existed to move it.
    pub viral_threshold: Option<f64>,
    pub cells: Vec<GoldenCell>,
    pub velocity_percentiles: Option<(f64, f64, f64)>,
}

pub struct AutoTuner {
    store: Store,
    config: ConfigStore,
}

impl AutoTuner {
    pub fn new(store: Store, config: ConfigStore) -> Self {
        Self { store, config }
    }

    /// One tuning pass. Runs at startup and on the background interval.
    pub async fn run_once(&self) -> Result<TunerReport, TunerError> {
        // 1. viral_threshold ← p20 of the earliest score of eventual winners.
        let earliest = self
            .store
            .earliest_winner_scores(SUCCESS_TEMP, MIN_AGE_HOURS)
            .await?;
        let viral_threshold = tune_threshold(&earliest);
        match viral_threshold {
            Some(threshold) => {
                self.config.set(ConfigKey::ViralThreshold, threshold).await?;
                info!(
                    winners = earliest.len(),
                    viral_threshold = threshold,
                    "viral threshold retuned"
                );
            }
            None => info!(
                winners = earliest.len(),
                need = MIN_WINNERS,
                "not enough winners, viral threshold unchanged"
            ),
        }

        // 2. Golden-ratio report: informational only, never applied as a gate.
        let aggregates = self.store.checkpoint_aggregates(MIN_AGE_HOURS).await?;
        let cells = golden_ratio_cells(&aggregates);
        for cell in &cells {
            info!(
                checkpoint_min = cell.checkpoint_min,
                floor = cell.floor,
                qualified = cell.qualified,
                reached_200 = cell.reached_200,
                ratio_200 = cell.ratio_200(),
                reached_500 = cell.reached_500,
                ratio_500 = cell.ratio_500(),
                "golden ratio checkpoint"
            );
        }

        // 3. Legacy velocity percentiles for external consumers.
        let velocities = self.store.peak_velocities(MIN_AGE_HOURS).await?;
        let velocity_percentiles = match velocity_percentiles(&velocities) {
            Some((p50, p80, p95)) => {
                self.config.set(ConfigKey::VelocityP50, p50).await?;
                self.config.set(ConfigKey::VelocityP80, p80).await?;
                self.config.set(ConfigKey::VelocityP95, p95).await?;
                info!(p50, p80, p95, "velocity percentiles refreshed");
                Some((p50, p80, p95))
            }
            None => None,
        };

        Ok(TunerReport {
            winners: earliest.len(),
            viral_threshold,
            cells,
            velocity_percentiles,
        })
    }

    /// Startup pass, then one pass per interval, forever. Errors are logged
    /// and the next tick proceeds with the previous config.
    pub async fn run_forever(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                error!(error = %e, "autotune pass failed, keeping previous config");
            }
        }
    }
}

/// p20 of the earliest winner scores, clamped to a sane band; `None` when the
/// sample is too small to trust.
pub fn tune_threshold(earliest_winner_scores: &[f64]) -> Option<f64> {
    if earliest_winner_scores.len() < MIN_WINNERS {
        return None;
    }
    let p20 = percentile(earliest_winner_scores, 20)?;
    Some(p20.clamp(THRESHOLD_MIN, THRESHOLD_MAX))
}

pub fn golden_ratio_cells(rows: &[DealCheckpointAggregate]) -> Vec<GoldenCell> {
    let mut cells = Vec::with_capacity(CHECKPOINTS_MIN.len() * TEMP_FLOORS.len());
    for checkpoint_min in CHECKPOINTS_MIN {
        for floor in TEMP_FLOORS {
            let mut qualified = 0;
            let mut reached_200 = 0;
            let mut reached_500 = 0;
            for row in rows {
                let peak_at_checkpoint = match checkpoint_min {
                    15 => row.peak_15m,
                    30 => row.peak_30m,
                    _ => row.peak_60m,
                };
                if peak_at_checkpoint.is_some_and(|peak| peak >= floor) {
                    qualified += 1;
                    if row.peak_temperature >= SUCCESS_TEMP {
                        reached_200 += 1;
                    }
                    if row.peak_temperature >= HIGH_SUCCESS_TEMP {
                        reached_500 += 1;
                    }
                }
            }
            cells.push(GoldenCell {
                checkpoint_min,
                floor,
                qualified,
                reached_200,
                reached_500,
            });
        }
    }
    cells
}

fn velocity_percentiles(velocities: &[f64]) -> Option<(f64, f64, f64)> {
    Some((
        percentile(velocities, 50)?,
        percentile(velocities, 80)?,
        percentile(velocities, 95)?,
    ))
}

fn percentile(values: &[f64], tau: usize) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut data = Data::new(values.to_vec());
    Some(data.percentile(tau))
}
