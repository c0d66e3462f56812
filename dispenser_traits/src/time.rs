//! Wall-clock time as seen by the scheduler.
//!
//! The core never synchronizes time itself; it asks a `TimeSource` for the
//! current hour/minute/second/weekday on every tick.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::clock::Clock;

pub const MINUTES_PER_DAY: u16 = 24 * 60;
pub const MINUTES_PER_WEEK: u32 = 7 * MINUTES_PER_DAY as u32;

/// Day of week, Monday-first (index 0 = Monday … 6 = Sunday).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    /// Monday-first index in 0..7.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<Self> {
        Self::ALL.get(i).copied()
    }

    /// Convert from the Sunday-first 1..=7 numbering used by RTC chips and
    /// the Arduino `weekday()` call (1 = Sunday).
    pub fn from_sunday_based(wd: u8) -> Option<Self> {
        if !(1..=7).contains(&wd) {
            return None;
        }
        Self::from_index((usize::from(wd) + 5) % 7)
    }

    pub fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % 7]
    }

    pub fn prev(self) -> Self {
        Self::ALL[(self.index() + 6) % 7]
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Weekday::Monday => "Mon",
            Weekday::Tuesday => "Tue",
            Weekday::Wednesday => "Wed",
            Weekday::Thursday => "Thu",
            Weekday::Friday => "Fri",
            Weekday::Saturday => "Sat",
            Weekday::Sunday => "Sun",
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimeError(String);

impl fmt::Display for ParseTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time: {}", self.0)
    }
}

impl std::error::Error for ParseTimeError {}

impl FromStr for Weekday {
    type Err = ParseTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|d| {
                let short = d.short_name().to_ascii_lowercase();
                lower == short || format!("{d:?}").to_ascii_lowercase() == lower
            })
            .ok_or_else(|| ParseTimeError(format!("unknown weekday '{s}'")))
    }
}

/// A wall-clock reading: time of day plus day of week. No date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallTime {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub weekday: Weekday,
}

impl WallTime {
    /// Returns `None` when any field is out of range.
    pub fn new(weekday: Weekday, hour: u8, minute: u8, second: u8) -> Option<Self> {
        if hour > 23 || minute > 59 || second > 59 {
            return None;
        }
        Some(Self {
            hour,
            minute,
            second,
            weekday,
        })
    }

    #[inline]
    pub fn minute_of_day(&self) -> u16 {
        u16::from(self.hour) * 60 + u16::from(self.minute)
    }

    /// Minutes since Monday 00:00.
    #[inline]
    pub fn minute_of_week(&self) -> u32 {
        self.weekday.index() as u32 * u32::from(MINUTES_PER_DAY) + u32::from(self.minute_of_day())
    }

    /// Inverse of `minute_of_week`; wraps modulo one week.
    pub fn from_minute_of_week(m: u32, second: u8) -> Self {
        let m = m % MINUTES_PER_WEEK;
        let day = (m / u32::from(MINUTES_PER_DAY)) as usize;
        let mday = (m % u32::from(MINUTES_PER_DAY)) as u16;
        Self {
            hour: (mday / 60) as u8,
            minute: (mday % 60) as u8,
            second: second.min(59),
            weekday: Weekday::ALL[day],
        }
    }

    /// Seconds since Monday 00:00:00.
    pub fn second_of_week(&self) -> u32 {
        self.minute_of_week() * 60 + u32::from(self.second)
    }

    pub fn from_second_of_week(s: u32) -> Self {
        let s = s % (MINUTES_PER_WEEK * 60);
        Self::from_minute_of_week(s / 60, (s % 60) as u8)
    }

    /// Shift forward by `secs`, wrapping around the week.
    pub fn plus_seconds(&self, secs: u64) -> Self {
        let week = u64::from(MINUTES_PER_WEEK) * 60;
        let s = (u64::from(self.second_of_week()) + secs % week) % week;
        Self::from_second_of_week(s as u32)
    }
}

impl fmt::Display for WallTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02}:{:02}:{:02}",
            self.weekday, self.hour, self.minute, self.second
        )
    }
}

/// Parses `"mon 08:00"` or `"mon 08:00:30"`.
impl FromStr for WallTime {
    type Err = ParseTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(day), Some(hms), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ParseTimeError(format!(
                "expected '<weekday> HH:MM[:SS]', got '{s}'"
            )));
        };
        let weekday: Weekday = day.parse()?;
        let fields: Vec<&str> = hms.split(':').collect();
        if !(2..=3).contains(&fields.len()) {
            return Err(ParseTimeError(format!("expected HH:MM[:SS], got '{hms}'")));
        }
        let num = |v: &str| {
            v.parse::<u8>()
                .map_err(|_| ParseTimeError(format!("'{v}' is not a number")))
        };
        let hour = num(fields[0])?;
        let minute = num(fields[1])?;
        let second = match fields.get(2) {
            Some(v) => num(v)?,
            None => 0,
        };
        WallTime::new(weekday, hour, minute, second)
            .ok_or_else(|| ParseTimeError(format!("'{hms}' out of range")))
    }
}

/// Supplies the current wall-clock reading.
pub trait TimeSource {
    fn now(&self) -> WallTime;
}

impl<T: TimeSource + ?Sized> TimeSource for Box<T> {
    fn now(&self) -> WallTime {
        (**self).now()
    }
}

/// System clock shifted by a fixed UTC offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource {
    utc_offset_s: i64,
}

impl SystemTimeSource {
    pub fn new(utc_offset_s: i64) -> Self {
        Self { utc_offset_s }
    }

    /// Convert Unix seconds into a local wall-clock reading.
    pub fn wall_time_at(unix_s: i64, utc_offset_s: i64) -> WallTime {
        let local = unix_s.saturating_add(utc_offset_s);
        let days = local.div_euclid(86_400);
        let sod = local.rem_euclid(86_400) as u32;
        // 1970-01-01 was a Thursday (Monday-first index 3).
        let weekday = Weekday::ALL[(days + 3).rem_euclid(7) as usize];
        WallTime {
            hour: (sod / 3600) as u8,
            minute: ((sod % 3600) / 60) as u8,
            second: (sod % 60) as u8,
            weekday,
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> WallTime {
        let unix_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self::wall_time_at(unix_s, self.utc_offset_s)
    }
}

/// Settable wall clock for tests and diagnostics. Clones share state.
#[derive(Debug, Clone)]
pub struct ManualTimeSource {
    now: Arc<Mutex<WallTime>>,
}

impl ManualTimeSource {
    pub fn new(start: WallTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, t: WallTime) {
        if let Ok(mut g) = self.now.lock() {
            *g = t;
        }
    }

    pub fn advance_seconds(&self, secs: u64) {
        if let Ok(mut g) = self.now.lock() {
            *g = g.plus_seconds(secs);
        }
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> WallTime {
        match self.now.lock() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Wall clock that starts at a fixed reading and runs with a monotonic `Clock`.
/// Used by the simulator so a whole day can be replayed from a chosen start.
#[derive(Debug, Clone)]
pub struct SimulatedTimeSource<C: Clock> {
    start: WallTime,
    epoch: Instant,
    clock: C,
}

impl<C: Clock> SimulatedTimeSource<C> {
    pub fn new(start: WallTime, clock: C) -> Self {
        let epoch = clock.now();
        Self {
            start,
            epoch,
            clock,
        }
    }
}

impl<C: Clock> TimeSource for SimulatedTimeSource<C> {
    fn now(&self) -> WallTime {
        let elapsed_s = self.clock.ms_since(self.epoch) / 1000;
        self.start.plus_seconds(elapsed_s)
    }
}
