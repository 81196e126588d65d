// src/services/scorer.rs
//
// Viral Score pipeline: gravity decay → linear velocity → acceleration
// multiplier → traffic-of-day multiplier → final score → rating tier.
// Pure over its inputs; all I/O stays in the orchestrator.

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::America::Mexico_City;

use crate::db::config_store::CycleParams;
use crate::db::models::PriorSnapshot;

/// One scored observation of a deal.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    /// Popularity signal as published by the site, in degrees.
    pub temperature: f64,
    pub hours_since_published: f64,
    /// Cycle clock reading; also drives the traffic-of-day bucket.
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub viral_score: f64,
    /// Temperature gained per minute since the prior snapshot.
    pub velocity: f64,
    pub final_score: f64,
    /// Tier 0–4; 0 means below the notification threshold.
    pub rating: i32,
}

pub fn score(obs: &Observation, prior: Option<&PriorSnapshot>, params: &CycleParams) -> Scored {
    let viral_score = gravity_score(obs.temperature, obs.hours_since_published, params.gravity);
    let velocity = linear_velocity(obs, prior);
    let acceleration = acceleration_multiplier(velocity, prior);
    let local_hour = obs.observed_at.with_timezone(&Mexico_City).hour();
    let traffic = traffic_multiplier(local_hour);

    let final_score = viral_score * acceleration * traffic;
    let rating = rating_for(final_score, params);

    Scored {
        viral_score,
        velocity,
        final_score,
        rating,
    }
}

/// Hacker-News-style gravity decay. The `-1` zeroes single-vote items; the
/// `+0.1` hours (~6 min) keeps the divisor away from zero on fresh posts.
fn gravity_score(temperature: f64, hours_since_published: f64, gravity: f64) -> f64 {
    if temperature < 1.0 {
        return 0.0;
    }
    (temperature - 1.0) / (hours_since_published + 0.1).powf(gravity)
}

/// Temperature per minute. Without a prior snapshot the deal's whole lifetime
/// is the window. Gaps under a minute are treated as one minute.
fn linear_velocity(obs: &Observation, prior: Option<&PriorSnapshot>) -> f64 {
    match prior {
        Some(p) => {
            let minutes_between = (obs.observed_at - p.observed_at).num_seconds() as f64 / 60.0;
            (obs.temperature - p.temperature) / minutes_between.max(1.0)
        }
        None => {
            let minutes_since_published = obs.hours_since_published * 60.0;
            obs.temperature / minutes_since_published.max(1.0)
        }
    }
}

/// Second-derivative proxy over the last two velocity readings: sustained
/// acceleration is rewarded up to 2x, small wiggles are ignored, a clear loss
/// of traction is cut to 0.5x.
fn acceleration_multiplier(velocity_now: f64, prior: Option<&PriorSnapshot>) -> f64 {
    let prior_velocity = match prior {
        Some(p) => p.velocity,
        None => return 1.0,
    };
    if prior_velocity <= 0.0 {
        return 1.0;
    }

    let r = velocity_now / prior_velocity;
    if r >= 2.0 {
        2.0
    } else if r >= 1.0 {
        1.0 + (r - 1.0)
    } else if r >= 0.5 {
        1.0
    } else {
        0.5
    }
}

/// Shaping by local hour in Mexico City: overnight deals are rare so a hot one
/// means more; the 7–9 am ramp gets a smaller bump; late evening sits between.
pub fn traffic_multiplier(local_hour: u32) -> f64 {
    match local_hour {
        0..=6 => 1.5,
        7..=8 => 1.2,
        9..=21 => 1.0,
        _ => 1.3,
    }
}

fn rating_for(final_score: f64, params: &CycleParams) -> i32 {
    if final_score >= params.score_tier_4 {
        4
    } else if final_score >= params.score_tier_3 {
        3
    } else if final_score >= params.score_tier_2 {
        2
    } else if final_score >= params.viral_threshold {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn seed_params() -> CycleParams {
        CycleParams {
            gravity: 1.2,
            viral_threshold: 50.0,
            score_tier_2: 100.0,
            score_tier_3: 200.0,
            score_tier_4: 500.0,
            min_seed_temp: 15.0,
        }
    }

    /// 14:00 in Mexico City (UTC-6) → traffic multiplier 1.0.
    fn afternoon_utc() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 20, 0, 0).unwrap()
    }

    fn obs(temperature: f64, hours: f64, at: DateTime<Utc>) -> Observation {
        Observation {
            temperature,
            hours_since_published: hours,
            observed_at: at,
        }
    }

    #[test]
    fn early_winner_scores_tier_three() {
        // 50° ten minutes after publication, daytime, no prior snapshot.
        let scored = score(&obs(50.0, 10.0 / 60.0, afternoon_utc()), None, &seed_params());

        assert!((scored.viral_score - 239.35).abs() < 0.5, "{}", scored.viral_score);
        assert!((scored.velocity - 5.0).abs() < 1e-9);
        assert!((scored.final_score - scored.viral_score).abs() < 1e-9);
        assert_eq!(scored.rating, 3);
    }

    #[test]
    fn late_normal_scores_tier_two() {
        let scored = score(&obs(100.0, 50.0 / 60.0, afternoon_utc()), None, &seed_params());

        assert!((scored.viral_score - 107.55).abs() < 0.5, "{}", scored.viral_score);
        assert_eq!(scored.rating, 2);
    }

    #[test]
    fn night_bonus_lifts_tier() {
        // 04:00 local = 10:00 UTC.
        let night = Utc.with_ymd_and_hms(2024, 5, 10, 10, 0, 0).unwrap();
        let scored = score(&obs(30.0, 5.0 / 60.0, night), None, &seed_params());

        assert!((scored.viral_score - 222.08).abs() < 0.5, "{}", scored.viral_score);
        assert!((scored.final_score - scored.viral_score * 1.5).abs() < 1e-9);
        assert_eq!(scored.rating, 3);
    }

    #[test]
    fn doubling_velocity_doubles_the_score() {
        let now = afternoon_utc();
        let prior = PriorSnapshot {
            observed_at: now - Duration::minutes(15),
            temperature: 20.0,
            velocity: 1.0,
        };
        let scored = score(&obs(50.0, 0.5, now), Some(&prior), &seed_params());

        // velocity_now = 30° / 15 min = 2.0; ratio vs 1.0 caps the multiplier.
        assert!((scored.velocity - 2.0).abs() < 1e-9);
        assert!((scored.final_score - scored.viral_score * 2.0).abs() < 1e-9);
    }

    #[test]
    fn acceleration_piecewise_bands() {
        let prior = |velocity: f64| PriorSnapshot {
            observed_at: afternoon_utc(),
            temperature: 10.0,
            velocity,
        };

        assert_eq!(acceleration_multiplier(4.0, Some(&prior(1.0))), 2.0);
        assert_eq!(acceleration_multiplier(2.0, Some(&prior(1.0))), 2.0);
        assert!((acceleration_multiplier(1.5, Some(&prior(1.0))) - 1.5).abs() < 1e-9);
        assert_eq!(acceleration_multiplier(0.7, Some(&prior(1.0))), 1.0);
        assert_eq!(acceleration_multiplier(0.2, Some(&prior(1.0))), 0.5);
        // Negative growth is a clear loss of traction.
        assert_eq!(acceleration_multiplier(-1.0, Some(&prior(1.0))), 0.5);
        // No baseline to compare against.
        assert_eq!(acceleration_multiplier(5.0, None), 1.0);
        assert_eq!(acceleration_multiplier(5.0, Some(&prior(0.0))), 1.0);
        assert_eq!(acceleration_multiplier(5.0, Some(&prior(-2.0))), 1.0);
    }

    #[test]
    fn single_vote_and_sub_vote_score_zero() {
        let scored = score(&obs(1.0, 0.0, afternoon_utc()), None, &seed_params());
        assert_eq!(scored.viral_score, 0.0);
        assert_eq!(scored.rating, 0);

        let scored = score(&obs(0.4, 0.0, afternoon_utc()), None, &seed_params());
        assert_eq!(scored.viral_score, 0.0);
    }

    #[test]
    fn traffic_buckets_flip_exactly_on_the_hour() {
        assert_eq!(traffic_multiplier(0), 1.5);
        assert_eq!(traffic_multiplier(6), 1.5);
        assert_eq!(traffic_multiplier(7), 1.2);
        assert_eq!(traffic_multiplier(8), 1.2);
        assert_eq!(traffic_multiplier(9), 1.0);
        assert_eq!(traffic_multiplier(21), 1.0);
        assert_eq!(traffic_multiplier(22), 1.3);
        assert_eq!(traffic_multiplier(23), 1.3);
    }

    #[test]
    fn traffic_bucket_uses_mexico_city_local_time() {
        let params = seed_params();
        // 06:59:59 local = 12:59:59 UTC.
        let before = Utc.with_ymd_and_hms(2024, 5, 10, 12, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 5, 10, 13, 0, 0).unwrap();

        let s_before = score(&obs(40.0, 1.0, before), None, &params);
        let s_after = score(&obs(40.0, 1.0, after), None, &params);

        assert!((s_before.final_score - s_before.viral_score * 1.5).abs() < 1e-9);
        assert!((s_after.final_score - s_after.viral_score * 1.2).abs() < 1e-9);
    }

    #[test]
    fn velocity_window_clamps_to_one_minute() {
        let now = afternoon_utc();
        let prior = PriorSnapshot {
            observed_at: now - Duration::seconds(20),
            temperature: 10.0,
            velocity: 0.5,
        };
        let scored = score(&obs(13.0, 0.2, now), Some(&prior), &seed_params());
        assert!((scored.velocity - 3.0).abs() < 1e-9);
    }

    #[test]
    fn rating_tier_boundaries_are_inclusive() {
        let p = seed_params();
        assert_eq!(rating_for(49.999, &p), 0);
        assert_eq!(rating_for(50.0, &p), 1);
        assert_eq!(rating_for(100.0, &p), 2);
        assert_eq!(rating_for(200.0, &p), 3);
        assert_eq!(rating_for(500.0, &p), 4);
        assert_eq!(rating_for(2_000.0, &p), 4);
    }

    #[test]
    fn scoring_is_deterministic() {
        let now = afternoon_utc();
        let prior = PriorSnapshot {
            observed_at: now - Duration::minutes(10),
            temperature: 25.0,
            velocity: 1.5,
        };
        let observation = obs(60.0, 0.75, now);
        let a = score(&observation, Some(&prior), &seed_params());
        let b = score(&observation, Some(&prior), &seed_params());
        assert_eq!(a, b);
    }
}
