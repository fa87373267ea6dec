/// RSI (Relative Strength Index) indicator.
///
/// Uses simple averages of gains and losses over the trailing `period`
/// changes. Degenerate windows are mapped explicitly instead of dividing by
/// zero: no losses gives 100, no gains gives 0, and a perfectly flat window
/// gives the neutral 50.
#[derive(Debug, Clone)]
pub struct RsiIndicator {
    pub period: usize,
}

impl RsiIndicator {
    pub fn new(period: usize) -> Self {
        assert!(period >= 2, "RSI period must be >= 2");
        Self { period }
    }

    /// RSI aligned with `closes`. The first `period` entries are `None`.
    pub fn series(&self, closes: &[f64]) -> Vec<Option<f64>> {
        let mut out = vec![None; closes.len()];
        if closes.len() < self.period + 1 {
            return out;
        }

        let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
        for (i, slot) in out.iter_mut().enumerate().skip(self.period) {
            // changes[i - 1] is the move into bar i
            let window = &changes[i - self.period..i];
            let avg_gain = window.iter().filter(|&&c| c > 0.0).sum::<f64>() / self.period as f64;
            let avg_loss =
                window.iter().filter(|&&c| c < 0.0).map(|c| c.abs()).sum::<f64>() / self.period as f64;
            *slot = Some(rsi_from_averages(avg_gain, avg_loss));
        }
        out
    }

    /// RSI of the latest bar. Returns `None` if there are fewer than
    /// `period + 1` values.
    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        if closes.len() < self.period + 1 {
            return None;
        }
        let tail = &closes[closes.len() - self.period - 1..];
        self.series(tail).last().copied().flatten()
    }
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    match (avg_gain > 0.0, avg_loss > 0.0) {
        (false, false) => 50.0,
        (true, false) => 100.0,
        (false, true) => 0.0,
        (true, true) => {
            let rs = avg_gain / avg_loss;
            100.0 - 100.0 / (1.0 + rs)
        }
    }
}
