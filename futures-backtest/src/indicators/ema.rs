use common::Bar;

use super::Indicator;

/// Calculate EMA with SMA as initial seed
///
/// # Arguments
/// * `prices` - Slice of prices
/// * `period` - EMA period
///
/// # Returns
/// Vector of Option<f64>, None until `period` prices have been seen
pub fn calculate_ema_with_sma_seed(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = prices.len();
    let mut ema = vec![None; n];
    if n < period || period == 0 {
        return ema;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);

    // Use SMA as initial seed
    let mut prev = prices[..period].iter().fold(0.0, |acc, p| acc + p) / period as f64;
    ema[period - 1] = Some(prev);

    for i in period..n {
        prev = (prices[i] - prev) * multiplier + prev;
        ema[i] = Some(prev);
    }

    ema
}

/// Incremental EMA seeded with the SMA of the first `period` closes
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    multiplier: f64,
    seed_sum: f64,
    seen: usize,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            multiplier: 2.0 / (period as f64 + 1.0),
            seed_sum: 0.0,
            seen: 0,
            value: None,
        }
    }

    pub fn push(&mut self, price: f64) -> Option<f64> {
        if self.period == 0 {
            return None;
        }
        self.seen += 1;
        self.value = match self.value {
            Some(prev) => Some((price - prev) * self.multiplier + prev),
            None => {
                self.seed_sum += price;
                (self.seen == self.period).then(|| self.seed_sum / self.period as f64)
            }
        };
        self.value
    }
}

impl Indicator for Ema {
    fn update(&mut self, bar: &Bar) -> Option<f64> {
        self.push(bar.close)
    }

    fn value(&self) -> Option<f64> {
        self.value
    }
}
