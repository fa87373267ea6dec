//! Average True Range.
//!
//! True range: max(high-low, |high-prev_close|, |low-prev_close|); the first
//! bar has no previous close and uses high-low. ATR is the simple mean of the
//! trailing `period` true ranges, defined from index `period - 1`.

use common::Candle;

#[derive(Debug, Clone)]
pub struct AtrIndicator {
    pub period: usize,
}

impl AtrIndicator {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "ATR period must be >= 1");
        Self { period }
    }

    pub fn series(&self, bars: &[Candle]) -> Vec<Option<f64>> {
        let tr = true_range(bars);
        let mut out = vec![None; bars.len()];
        for (i, slot) in out.iter_mut().enumerate().skip(self.period - 1) {
            let window = &tr[i + 1 - self.period..=i];
            *slot = Some(window.iter().sum::<f64>() / self.period as f64);
        }
        out
    }

    /// ATR of the latest bar.
    pub fn compute(&self, bars: &[Candle]) -> Option<f64> {
        if bars.len() < self.period {
            return None;
        }
        // One extra bar so the first TR in the window has a previous close.
        let from = bars.len().saturating_sub(self.period + 1);
        self.series(&bars[from..]).last().copied().flatten()
    }
}

pub fn true_range(bars: &[Candle]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(bars.len());
    for (i, b) in bars.iter().enumerate() {
        let hl = b.high - b.low;
        let value = match i.checked_sub(1).map(|p| bars[p].close) {
            Some(pc) => hl.max((b.high - pc).abs()).max((b.low - pc).abs()),
            None => hl,
        };
        tr.push(value);
    }
    tr
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars(rows: &[(f64, f64, f64)]) -> Vec<Candle> {
        let t0 = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        rows.iter()
            .enumerate()
            .map(|(i, &(high, low, close))| Candle {
                timestamp: t0 + Duration::hours(i as i64),
                open: close,
                high,
                low,
                close,
                volume: 1.0,
            })
            .collect()
    }

    #[test]
    fn true_range_uses_previous_close_gap() {
        let b = bars(&[(10.0, 9.0, 9.5), (12.0, 11.0, 11.5)]);
        let tr = true_range(&b);
        assert_eq!(tr[0], 1.0);
        // gap up: |12 - 9.5| = 2.5
        assert_eq!(tr[1], 2.5);
    }

    #[test]
    fn atr_is_rolling_mean_of_true_range() {
        let b = bars(&[(10.0, 9.0, 9.5), (10.0, 9.0, 9.5), (11.0, 9.0, 10.0)]);
        let atr = AtrIndicator::new(2);
        let s = atr.series(&b);
        assert_eq!(s[0], None);
        assert_eq!(s[1], Some(1.0));
        assert_eq!(s[2], Some(1.5));
        assert_eq!(atr.compute(&b), Some(1.5));
    }

    #[test]
    fn atr_needs_period_bars() {
        let b = bars(&[(10.0, 9.0, 9.5)]);
        assert_eq!(AtrIndicator::new(2).compute(&b), None);
    }
}
