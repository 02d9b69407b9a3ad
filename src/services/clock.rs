//! Time source abstraction.
//!
//! Expiration checks in the claims cache go through `Clock` so tests can move
//! time forward without sleeping.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock that only moves when told to.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: std::sync::Arc<std::sync::atomic::AtomicI64>,
}

#[cfg(test)]
impl ManualClock {
    pub fn at(start: DateTime<Utc>) -> Self {
        Self {
            millis: std::sync::Arc::new(std::sync::atomic::AtomicI64::new(
                start.timestamp_millis(),
            )),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.millis.fetch_add(
            by.num_milliseconds(),
            std::sync::atomic::Ordering::AcqRel,
        );
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(std::sync::atomic::Ordering::Acquire);
        DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }
}
