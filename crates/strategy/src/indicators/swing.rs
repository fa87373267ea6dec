//! Fractal swing points.
//!
//! Bar `i` is a swing low when its low is strictly below every other low in
//! the centered window `[i - period, i + period]`. The window reaches `period`
//! bars into the future, so a swing at `i` only becomes known once bar
//! `i + period` has closed. Nothing here ever reads past the slice it is
//! handed; the delay is what keeps the detector honest.

/// Swing lows aligned with `lows`; `None` where no swing is confirmed.
pub fn swing_lows(lows: &[f64], period: usize) -> Vec<Option<f64>> {
    swings(lows, period, |a, b| a < b)
}

/// Swing highs aligned with `highs`; `None` where no swing is confirmed.
pub fn swing_highs(highs: &[f64], period: usize) -> Vec<Option<f64>> {
    swings(highs, period, |a, b| a > b)
}

/// Most recent confirmed swing low in `lows`.
pub fn last_swing_low(lows: &[f64], period: usize) -> Option<f64> {
    last_swing(lows, period, |a, b| a < b)
}

/// Most recent confirmed swing high in `highs`.
pub fn last_swing_high(highs: &[f64], period: usize) -> Option<f64> {
    last_swing(highs, period, |a, b| a > b)
}

fn swings(values: &[f64], period: usize, beats: fn(f64, f64) -> bool) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| is_swing(values, i, period, beats).then(|| values[i]))
        .collect()
}

fn last_swing(values: &[f64], period: usize, beats: fn(f64, f64) -> bool) -> Option<f64> {
    let newest = values.len().checked_sub(period + 1)?;
    (period..=newest)
        .rev()
        .find(|&i| is_swing(values, i, period, beats))
        .map(|i| values[i])
}

fn is_swing(values: &[f64], i: usize, period: usize, beats: fn(f64, f64) -> bool) -> bool {
    if i < period || i + period >= values.len() {
        return false;
    }
    let v = values[i];
    v.is_finite()
        && values[i - period..=i + period]
            .iter()
            .enumerate()
            .all(|(k, &other)| k == period || beats(v, other))
}
