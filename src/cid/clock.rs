//! Local-clock access and the date/time renderings used on the wire.

use chrono::{Local, NaiveDateTime};

/// Source of the current local time. Swapped for [`FixedClock`] in tests.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// `MMDDYYYY`
pub fn date_nosep(t: &NaiveDateTime) -> String {
    t.format("%m%d%Y").to_string()
}

/// `HHMM`
pub fn time_nosep(t: &NaiveDateTime) -> String {
    t.format("%H%M").to_string()
}

/// `MM/DD/YYYY HH:MM:SS`, appended to server-generated `MSG:` lines.
pub fn stamp(t: &NaiveDateTime) -> String {
    t.format("%m/%d/%Y %H:%M:%S").to_string()
}

/// `HH:MM:SS`
pub fn time_only(t: &NaiveDateTime) -> String {
    t.format("%H:%M:%S").to_string()
}

pub fn year(t: &NaiveDateTime) -> String {
    t.format("%Y").to_string()
}
