// src/db/config_store.rs

use crate::db::store::with_deadline;
use crate::utils::errors::StoreError;
use sqlx::PgPool;
use std::time::Duration;

/// Every tunable the service reads or the AutoTuner writes. Key strings and
/// seed defaults live here and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    ViralThreshold,
    MinSeedTemp,
    Gravity,
    ScoreTier4,
    ScoreTier3,
    ScoreTier2,
    // Written for external consumers; the scorer never reads these.
    VelocityP50,
    VelocityP80,
    VelocityP95,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 9] = [
        ConfigKey::ViralThreshold,
        ConfigKey::MinSeedTemp,
        ConfigKey::Gravity,
        ConfigKey::ScoreTier4,
        ConfigKey::ScoreTier3,
        ConfigKey::ScoreTier2,
        ConfigKey::VelocityP50,
        ConfigKey::VelocityP80,
        ConfigKey::VelocityP95,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::ViralThreshold => "viral_threshold",
            ConfigKey::MinSeedTemp => "min_seed_temp",
            ConfigKey::Gravity => "gravity",
            ConfigKey::ScoreTier4 => "score_tier_4",
            ConfigKey::ScoreTier3 => "score_tier_3",
            ConfigKey::ScoreTier2 => "score_tier_2",
            ConfigKey::VelocityP50 => "velocity_p50",
            ConfigKey::VelocityP80 => "velocity_p80",
            ConfigKey::VelocityP95 => "velocity_p95",
        }
    }

    pub fn seed_default(&self) -> f64 {
        match self {
            ConfigKey::ViralThreshold => 50.0,
            ConfigKey::MinSeedTemp => 15.0,
            ConfigKey::Gravity => 1.2,
            ConfigKey::ScoreTier4 => 500.0,
            ConfigKey::ScoreTier3 => 200.0,
            ConfigKey::ScoreTier2 => 100.0,
            ConfigKey::VelocityP50 => 0.0,
            ConfigKey::VelocityP80 => 0.0,
            ConfigKey::VelocityP95 => 0.0,
        }
    }
}

/// Scorer parameters read together once per cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleParams {
    pub gravity: f64,
    pub viral_threshold: f64,
    pub score_tier_2: f64,
    pub score_tier_3: f64,
    pub score_tier_4: f64,
    pub min_seed_temp: f64,
}

/// Read-through accessor over `system_config`. No in-memory cache: the
/// parameter count is single-digit and every cycle wants fresh values.
/// Every read and write runs under the shared per-call deadline.
#[derive(Clone)]
pub struct ConfigStore {
    pool: PgPool,
    call_timeout: Duration,
}

impl ConfigStore {
    pub fn new(pool: PgPool, call_timeout: Duration) -> Self {
        Self { pool, call_timeout }
    }

    /// Stored value, or the seed default when the row is missing.
    pub async fn get(&self, key: ConfigKey) -> Result<f64, StoreError> {
        let value = with_deadline(self.call_timeout, || async {
            sqlx::query_scalar::<_, f64>("SELECT value FROM system_config WHERE key = $1")
                .bind(key.as_str())
                .fetch_optional(&self.pool)
                .await
        })
        .await?;
        Ok(value.unwrap_or_else(|| key.seed_default()))
    }

    pub async fn set(&self, key: ConfigKey, value: f64) -> Result<(), StoreError> {
        with_deadline(self.call_timeout, || async {
            sqlx::query(
                r#"
                INSERT INTO system_config (key, value)
                VALUES ($1, $2)
                ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value
                "#,
            )
            .bind(key.as_str())
            .bind(value)
            .execute(&self.pool)
            .await?;
            Ok::<_, sqlx::Error>(())
        })
        .await
    }

    /// Insert any missing key at its seed default. Idempotent; run at startup
    /// so operators can inspect and edit live values. Unknown keys written by
    /// other tools are left untouched.
    pub async fn seed_defaults(&self) -> Result<(), StoreError> {
        for key in ConfigKey::ALL {
            with_deadline(self.call_timeout, || async {
                sqlx::query(
                    r#"
                    INSERT INTO system_config (key, value)
                    VALUES ($1, $2)
                    ON CONFLICT (key) DO NOTHING
                    "#,
                )
                .bind(key.as_str())
                .bind(key.seed_default())
                .execute(&self.pool)
                .await?;
                Ok::<_, sqlx::Error>(())
            })
            .await?;
        }
        Ok(())
    }

    /// One round-trip bundle of everything a cycle needs.
    pub async fn cycle_params(&self) -> Result<CycleParams, StoreError> {
        Ok(CycleParams {
            gravity: self.get(ConfigKey::Gravity).await?,
            viral_threshold: self.get(ConfigKey::ViralThreshold).await?,
            score_tier_2: self.get(ConfigKey::ScoreTier2).await?,
            score_tier_3: self.get(ConfigKey::ScoreTier3).await?,
            score_tier_4: self.get(ConfigKey::ScoreTier4).await?,
            min_seed_temp: self.get(ConfigKey::MinSeedTemp).await?,
        })
    }
}
