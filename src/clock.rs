//! Injectable time source.
//!
//! Status derivation and cache TTL checks both depend on "now"; routing
//! every read through a `Clock` lets tests simulate time passage without
//! sleeping.

use chrono::{Local, NaiveDateTime};

pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// Wall-clock time in the local timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Settable clock for tests.
#[cfg(test)]
pub struct FixedClock {
    now: std::cell::Cell<NaiveDateTime>,
}

#[cfg(test)]
impl FixedClock {
    pub fn at(now: NaiveDateTime) -> Self {
        Self { now: std::cell::Cell::new(now) }
    }

    pub fn set(&self, now: NaiveDateTime) {
        self.now.set(now);
    }

    pub fn advance(&self, delta: chrono::Duration) {
        self.now.set(self.now.get() + delta);
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.now.get()
    }
}
