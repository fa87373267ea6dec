//! Candle aggregation with a closed-bar cursor.
//!
//! Coarse bars are derived from the 1-minute stream by bucketing on the Unix
//! epoch: open=first, high=max, low=min, close=last, volume=sum. A coarse bar
//! is only "closed" once `bucket_start + period <= cursor`; callers that need
//! the bar still forming ask for [`partial_bar`], which is rebuilt from the
//! fine series on every call.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{Candle, Error, Result};

/// A whole-minute bar period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    minutes: u32,
}

impl Timeframe {
    pub const M1: Timeframe = Timeframe { minutes: 1 };
    pub const M15: Timeframe = Timeframe { minutes: 15 };
    pub const H1: Timeframe = Timeframe { minutes: 60 };

    pub fn from_minutes(minutes: u32) -> Result<Self> {
        if minutes == 0 {
            return Err(Error::Config("timeframe must be at least one minute".into()));
        }
        Ok(Self { minutes })
    }

    pub fn minutes(self) -> u32 {
        self.minutes
    }

    pub fn seconds(self) -> i64 {
        i64::from(self.minutes) * 60
    }

    pub fn duration(self) -> Duration {
        Duration::seconds(self.seconds())
    }

    /// Start of the bucket containing `ts`.
    pub fn bucket_start(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let offset = ts.timestamp().rem_euclid(self.seconds());
        ts - Duration::seconds(offset) - Duration::nanoseconds(i64::from(ts.timestamp_subsec_nanos()))
    }

    /// Whether `ts` sits exactly on a bucket boundary.
    pub fn is_boundary(self, ts: DateTime<Utc>) -> bool {
        self.bucket_start(ts) == ts
    }

    /// Whether `self` is a whole multiple of `finer`.
    pub fn is_multiple_of(self, finer: Timeframe) -> bool {
        self.minutes % finer.minutes == 0
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.minutes % 1440 == 0 {
            write!(f, "{}d", self.minutes / 1440)
        } else if self.minutes % 60 == 0 {
            write!(f, "{}h", self.minutes / 60)
        } else {
            write!(f, "{}m", self.minutes)
        }
    }
}

impl std::str::FromStr for Timeframe {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        let bad = || Error::Config(format!("invalid timeframe '{s}' (expected e.g. 1m, 15m, 1h)"));
        let (digits, unit) = s.split_at(s.find(|c: char| !c.is_ascii_digit()).ok_or_else(bad)?);
        let n: u32 = digits.parse().map_err(|_| bad())?;
        let minutes = match unit {
            "m" | "min" => n,
            "h" => n * 60,
            "d" => n * 1440,
            _ => return Err(bad()),
        };
        Timeframe::from_minutes(minutes)
    }
}

impl TryFrom<String> for Timeframe {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> String {
        tf.to_string()
    }
}

/// Ordered candles at one resolution, timestamps strictly increasing.
#[derive(Debug, Clone, PartialEq)]
pub struct BarSeries {
    timeframe: Timeframe,
    bars: Vec<Candle>,
}

impl BarSeries {
    /// Build a series, rejecting duplicate or out-of-order timestamps.
    pub fn new(timeframe: Timeframe, bars: Vec<Candle>) -> Result<Self> {
        if let Some(w) = bars.windows(2).find(|w| w[1].timestamp <= w[0].timestamp) {
            let kind = if w[1].timestamp == w[0].timestamp {
                "duplicate"
            } else {
                "non-monotonic"
            };
            return Err(Error::Data(format!(
                "{kind} timestamp {} after {}",
                w[1].timestamp, w[0].timestamp
            )));
        }
        Ok(Self { timeframe, bars })
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn bars(&self) -> &[Candle] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Bars whose bucket has fully closed at `cursor`.
    pub fn closed_before(&self, cursor: DateTime<Utc>) -> &[Candle] {
        closed_bars_before(&self.bars, self.timeframe, cursor)
    }
}

/// Resample `fine` into `period` buckets. Empty buckets are skipped, never
/// zero-filled; fine candles with non-finite fields are ignored.
pub fn aggregate(fine: &BarSeries, period: Timeframe) -> Result<BarSeries> {
    if !period.is_multiple_of(fine.timeframe) {
        return Err(Error::Config(format!(
            "cannot aggregate {} bars into {period}",
            fine.timeframe
        )));
    }

    let mut out: Vec<Candle> = Vec::with_capacity(fine.len() / period.minutes().max(1) as usize + 1);
    for c in fine.bars.iter().filter(|c| c.is_complete()) {
        let start = period.bucket_start(c.timestamp);
        match out.last_mut() {
            Some(bar) if bar.timestamp == start => merge(bar, c),
            _ => out.push(Candle { timestamp: start, ..*c }),
        }
    }
    BarSeries::new(period, out)
}

/// The prefix of `series` whose buckets end at or before `cursor`.
pub fn closed_bars_before(series: &[Candle], period: Timeframe, cursor: DateTime<Utc>) -> &[Candle] {
    let span = period.duration();
    let n = series.partition_point(|c| c.timestamp + span <= cursor);
    &series[..n]
}

/// The still-forming `period` bar at `cursor`, built from the fine candles
/// that have closed inside the current bucket. `None` on a bucket boundary or
/// when no fine candle has closed in the bucket yet.
pub fn partial_bar(
    fine: &[Candle],
    fine_timeframe: Timeframe,
    period: Timeframe,
    cursor: DateTime<Utc>,
) -> Option<Candle> {
    let start = period.bucket_start(cursor);
    if start == cursor {
        return None;
    }
    let step = fine_timeframe.duration();
    let lo = fine.partition_point(|c| c.timestamp < start);
    let hi = fine.partition_point(|c| c.timestamp + step <= cursor);
    if lo >= hi {
        return None;
    }

    let mut acc: Option<Candle> = None;
    for c in fine[lo..hi].iter().filter(|c| c.is_complete()) {
        match acc.as_mut() {
            Some(bar) => merge(bar, c),
            None => acc = Some(Candle { timestamp: start, ..*c }),
        }
    }
    acc
}

fn merge(bar: &mut Candle, c: &Candle) {
    bar.high = bar.high.max(c.high);
    bar.low = bar.low.min(c.low);
    bar.close = c.close;
    bar.volume += c.volume;
}
