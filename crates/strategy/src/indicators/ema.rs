/// Exponential moving average with `alpha = 2 / (span + 1)`.
///
/// Seeded by the first value and defined from index 0 onward, so callers that
/// need a settled average must supply enough history themselves.
#[derive(Debug, Clone)]
pub struct EmaIndicator {
    pub span: usize,
}

impl EmaIndicator {
    pub fn new(span: usize) -> Self {
        assert!(span >= 1, "EMA span must be >= 1");
        Self { span }
    }

    pub fn series(&self, values: &[f64]) -> Vec<Option<f64>> {
        let alpha = 2.0 / (self.span as f64 + 1.0);
        let mut out = Vec::with_capacity(values.len());
        let mut prev: Option<f64> = None;
        for &v in values {
            let next = match prev {
                None => v,
                Some(p) => alpha * v + (1.0 - alpha) * p,
            };
            prev = Some(next);
            out.push(prev);
        }
        out
    }

    pub fn compute(&self, values: &[f64]) -> Option<f64> {
        self.series(values).last().copied().flatten()
    }
}

/// Rolling simple mean over the trailing `period` values.
#[derive(Debug, Clone)]
pub struct SmaIndicator {
    pub period: usize,
}

impl SmaIndicator {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "SMA period must be >= 1");
        Self { period }
    }

    pub fn series(&self, values: &[f64]) -> Vec<Option<f64>> {
        let mut out = vec![None; values.len()];
        for (i, slot) in out.iter_mut().enumerate().skip(self.period - 1) {
            let window = &values[i + 1 - self.period..=i];
            *slot = Some(window.iter().sum::<f64>() / self.period as f64);
        }
        out
    }

    pub fn compute(&self, values: &[f64]) -> Option<f64> {
        if values.len() < self.period {
            return None;
        }
        let window = &values[values.len() - self.period..];
        Some(window.iter().sum::<f64>() / self.period as f64)
    }
}
