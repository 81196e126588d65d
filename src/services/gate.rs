// src/services/gate.rs
//
// Anti-noise filtering between the scorer and the notifier. History rows are
// persisted no matter what the gate decides; only the notification is gated.

/// Why a scored observation did not produce a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Expired,
    UnderSeed,
    BelowThreshold,
    AlreadyNotified,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Expired => "expired",
            DropReason::UnderSeed => "under_seed",
            DropReason::BelowThreshold => "below_threshold",
            DropReason::AlreadyNotified => "already_notified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Emit to the notifier, then raise `max_rating_notified` to this tier.
    Notify { rating: i32 },
    Drop(DropReason),
}

/// Progressive-rating gate: a deal notifies once per tier, and only on a
/// strict upgrade over every tier it was already notified at.
pub fn evaluate(
    expired: bool,
    temperature: f64,
    min_seed_temp: f64,
    rating: i32,
    max_rating_notified: i32,
) -> Decision {
    if expired {
        return Decision::Drop(DropReason::Expired);
    }
    if temperature < min_seed_temp {
        return Decision::Drop(DropReason::UnderSeed);
    }
    if rating == 0 {
        return Decision::Drop(DropReason::BelowThreshold);
    }
    if rating <= max_rating_notified {
        return Decision::Drop(DropReason::AlreadyNotified);
    }
    Decision::Notify { rating }
}
