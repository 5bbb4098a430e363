use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Timelike, Utc};

use crate::model::{Minute, Ms};

/// Source of "now". Lock expiry is measured in unix ms; past-slot filtering
/// needs the vendor-local calendar date and time of day.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;

    fn local_now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.local_now().date()
    }

    fn minute_of_day(&self) -> Minute {
        let now = self.local_now();
        now.hour() * 60 + now.minute()
    }
}

/// Wall clock in the host's local timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        Utc::now().timestamp_millis()
    }

    fn local_now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Settable clock for tests and replay tooling. Local time is UTC.
#[derive(Debug, Default)]
pub struct ManualClock {
    ms: AtomicI64,
}

impl ManualClock {
    pub fn new(ms: Ms) -> Self {
        Self { ms: AtomicI64::new(ms) }
    }

    pub fn at(local: NaiveDateTime) -> Self {
        Self::new(local.and_utc().timestamp_millis())
    }

    pub fn set(&self, ms: Ms) {
        self.ms.store(ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta: Ms) {
        self.ms.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Ms {
        self.ms.load(Ordering::SeqCst)
    }

    fn local_now(&self) -> NaiveDateTime {
        DateTime::<Utc>::from_timestamp_millis(self.now_ms())
            .map(|dt| dt.naive_utc())
            .unwrap_or_default()
    }
}
