// src/utils/clock.rs

use chrono::{DateTime, Utc};

/// Time source seam so tests can pin the wall clock.
///
/// Traffic bucketing always converts through America/Mexico_City downstream;
/// implementations only have to answer "what time is it in UTC".
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// Always answers with the instant it was built with.
    pub struct FixedClock(pub DateTime<Utc>);

    impl Clock for FixedClock {
        fn now_utc(&self) -> DateTime<Utc> {
            self.0
        }
    }
}
