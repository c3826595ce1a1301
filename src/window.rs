//! Aggregation tiers, aligned windows, and the clock that walks them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationFailure;

/// One of the three fixed aggregation granularities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    #[serde(rename = "5min")]
    FiveMinute,
    #[serde(rename = "15min")]
    FifteenMinute,
    #[serde(rename = "1hour")]
    OneHour,
}

impl Tier {
    /// All tiers in dependency order (base tier first).
    pub const ALL: [Tier; 3] = [Tier::FiveMinute, Tier::FifteenMinute, Tier::OneHour];

    /// Window length in seconds.
    pub fn interval_seconds(self) -> i64 {
        match self {
            Self::FiveMinute => 300,
            Self::FifteenMinute => 900,
            Self::OneHour => 3600,
        }
    }

    /// Number of base-tier windows that make up one window of this tier.
    pub fn base_windows(self) -> usize {
        (self.interval_seconds() / Self::FiveMinute.interval_seconds()) as usize
    }

    /// Short label used in logs, CSV output and CLI flags.
    pub fn label(self) -> &'static str {
        match self {
            Self::FiveMinute => "5min",
            Self::FifteenMinute => "15min",
            Self::OneHour => "1hour",
        }
    }

    /// The rollup this tier is, `None` for the 5-minute base tier.
    pub fn rollup(self) -> Option<RollupTier> {
        match self {
            Self::FiveMinute => None,
            Self::FifteenMinute => Some(RollupTier::FifteenMinute),
            Self::OneHour => Some(RollupTier::OneHour),
        }
    }
}

/// A tier computed from persisted 5-minute records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RollupTier {
    FifteenMinute,
    OneHour,
}

impl From<RollupTier> for Tier {
    fn from(tier: RollupTier) -> Self {
        match tier {
            RollupTier::FifteenMinute => Tier::FifteenMinute,
            RollupTier::OneHour => Tier::OneHour,
        }
    }
}

impl fmt::Display for RollupTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Tier::from(*self).label())
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "5min" => Ok(Self::FiveMinute),
            "15min" => Ok(Self::FifteenMinute),
            "1hour" => Ok(Self::OneHour),
            other => Err(format!(
                "unknown tier \"{other}\", expected 5min, 15min or 1hour"
            )),
        }
    }
}

/// Which end of a [`TimeRange`] is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closed {
    /// `[start, stop)`: raw samples inside a window.
    Start,
    /// `(start, stop]`: records timestamped at their own window end.
    End,
}

/// A time interval used to select store rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub closed: Closed,
}

impl TimeRange {
    /// `[start, stop)`
    pub fn half_open(start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        Self {
            start,
            stop,
            closed: Closed::Start,
        }
    }

    /// `(start, stop]`
    pub fn closing(start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        Self {
            start,
            stop,
            closed: Closed::End,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        match self.closed {
            Closed::Start => ts >= self.start && ts < self.stop,
            Closed::End => ts > self.start && ts <= self.stop,
        }
    }
}

/// The unit of computation and persistence: `[start, end)` at one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub tier: Tier,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// Creates a window, checking its length and alignment.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationFailure` if `end - start` is not the tier
    /// interval or `end` is not aligned to it.
    pub fn new(
        tier: Tier,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self, ValidationFailure> {
        let interval = tier.interval_seconds();
        if (end - start).num_seconds() != interval || (end - start).subsec_nanos() != 0 {
            return Err(ValidationFailure::WindowShape {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
                expected_seconds: interval,
            });
        }
        if !is_aligned(end, interval) {
            return Err(ValidationFailure::Unaligned {
                end: end.to_rfc3339(),
                interval_seconds: interval,
            });
        }
        Ok(Self { tier, start, end })
    }

    /// Creates the window of `tier` that ends at `end`.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationFailure` if `end` is not aligned to the tier.
    pub fn ending_at(tier: Tier, end: DateTime<Utc>) -> Result<Self, ValidationFailure> {
        Self::new(tier, end - TimeDelta::seconds(tier.interval_seconds()), end)
    }

    /// Length of the window in seconds.
    pub fn duration_seconds(&self) -> i64 {
        self.tier.interval_seconds()
    }

    /// Range selecting raw samples that fall inside this window.
    pub fn sample_range(&self) -> TimeRange {
        TimeRange::half_open(self.start, self.end)
    }

    /// Range selecting lower-tier records whose window ends inside this one.
    pub fn record_range(&self) -> TimeRange {
        TimeRange::closing(self.start, self.end)
    }

    /// Start of the calendar hour that contains this window.
    pub fn hour_start(&self) -> DateTime<Utc> {
        self.start
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(self.start)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} - {})",
            self.tier,
            self.start.to_rfc3339(),
            self.end.to_rfc3339()
        )
    }
}

fn is_aligned(ts: DateTime<Utc>, interval_seconds: i64) -> bool {
    ts.timestamp_subsec_nanos() == 0 && ts.timestamp().rem_euclid(interval_seconds) == 0
}

fn floor_to(ts: DateTime<Utc>, interval_seconds: i64) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(interval_seconds);
    DateTime::from_timestamp(floored, 0).unwrap_or(ts)
}

/// Walks the aligned windows of one tier in ascending time order.
///
/// Yields every window whose start is at or after `from` and whose end is at
/// or before `to`.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use meter_rollup::window::{Tier, WindowClock};
///
/// let from = Utc.with_ymd_and_hms(2026, 1, 8, 12, 0, 0).unwrap();
/// let to = Utc.with_ymd_and_hms(2026, 1, 8, 12, 15, 0).unwrap();
/// let ends: Vec<_> = WindowClock::new(Tier::FiveMinute, from, to)
///     .map(|w| w.end)
///     .collect();
/// assert_eq!(ends.len(), 3);
/// ```
pub struct WindowClock {
    tier: Tier,
    /// End of the next window to emit.
    next_end: DateTime<Utc>,
    /// Last window end allowed.
    last_end: DateTime<Utc>,
}

impl WindowClock {
    pub fn new(tier: Tier, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        let interval = tier.interval_seconds();
        let first_start = if is_aligned(from, interval) {
            from
        } else {
            floor_to(from, interval) + TimeDelta::seconds(interval)
        };
        Self {
            tier,
            next_end: first_start + TimeDelta::seconds(interval),
            last_end: to,
        }
    }

    /// Advances by one window.
    ///
    /// Returns `None` once the next window would end after `to`.
    pub fn tick(&mut self) -> Option<Window> {
        if self.next_end > self.last_end {
            return None;
        }
        let interval = TimeDelta::seconds(self.tier.interval_seconds());
        let window = Window {
            tier: self.tier,
            start: self.next_end - interval,
            end: self.next_end,
        };
        self.next_end += interval;
        Some(window)
    }

    /// Runs `f` for each remaining window.
    pub fn run(&mut self, mut f: impl FnMut(Window)) {
        while let Some(window) = self.tick() {
            f(window);
        }
    }
}

impl Iterator for WindowClock {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        self.tick()
    }
}
