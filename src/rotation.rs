use chrono::{Duration, Local, NaiveDate, NaiveDateTime, Timelike};
use log::info;
use std::sync::{Arc, Mutex};

pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock moved by hand, shared between clones.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<Mutex<NaiveDateTime>>);

impl ManualClock {
    pub fn new(t: NaiveDateTime) -> Self {
        Self(Arc::new(Mutex::new(t)))
    }

    pub fn set(&self, t: NaiveDateTime) {
        if let Ok(mut g) = self.0.lock() {
            *g = t;
        }
    }

    pub fn advance(&self, d: Duration) {
        if let Ok(mut g) = self.0.lock() {
            *g += d;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        match self.0.lock() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// An hour of a day; output files are grouped by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Window {
    pub date: NaiveDate,
    pub hour: u32,
}

impl Window {
    pub fn of(t: NaiveDateTime) -> Self {
        Self {
            date: t.date(),
            hour: t.hour(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// A new hour of the same day.
    Hour { closed: Window, opened: Window },
    /// A new day; implies a new hour.
    Day { closed: Window, opened: Window },
}

impl Boundary {
    pub fn closed(&self) -> Window {
        match *self {
            Boundary::Hour { closed, .. } | Boundary::Day { closed, .. } => closed,
        }
    }

    pub fn opened(&self) -> Window {
        match *self {
            Boundary::Hour { opened, .. } | Boundary::Day { opened, .. } => opened,
        }
    }
}

/// Detects hour and day changes of the wall clock.
///
/// Polled once per aggregator iteration; the current window is compared with
/// the window of `now`, so an iteration that skips the first minute of an hour
/// still rotates.
#[derive(Debug)]
pub struct RotationScheduler {
    current: Window,
}

impl RotationScheduler {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            current: Window::of(now),
        }
    }

    #[inline]
    pub fn current(&self) -> Window {
        self.current
    }

    pub fn poll(&mut self, now: NaiveDateTime) -> Option<Boundary> {
        let opened = Window::of(now);
        if opened == self.current {
            return None;
        }

        let closed = std::mem::replace(&mut self.current, opened);
        let boundary = if closed.date != opened.date {
            Boundary::Day { closed, opened }
        } else {
            Boundary::Hour { closed, opened }
        };

        info!("rotation: {:?}", boundary);
        Some(boundary)
    }
}

/// Raw video of a day is deleted `days` days later, once that many days have
/// passed since the pipeline started.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub days: u32,
    pub started: NaiveDate,
}

impl RetentionPolicy {
    pub fn new(days: u32, started: NaiveDate) -> Self {
        Self { days, started }
    }

    /// Day whose videos expire when `today` begins.
    pub fn expired_day(&self, today: NaiveDate) -> Option<NaiveDate> {
        let day = today - Duration::days(self.days as i64);

        if day >= self.started {
            Some(day)
        } else {
            None
        }
    }
}
