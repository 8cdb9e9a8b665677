use std::collections::VecDeque;

use common::Bar;

use super::Indicator;

/// Calculate Simple Moving Average
///
/// # Arguments
/// * `prices` - Slice of prices
/// * `period` - SMA period
///
/// # Returns
/// Vector of Option<f64>, None for values before enough data is available
pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = prices.len();
    let mut sma = vec![None; n];

    if n < period || period == 0 {
        return sma;
    }

    // Calculate initial sum
    let mut sum = prices[..period].iter().fold(0.0, |acc, p| acc + p);
    sma[period - 1] = Some(sum / period as f64);

    // Sliding window for subsequent values
    for i in period..n {
        sum = sum - prices[i - period] + prices[i];
        sma[i] = Some(sum / period as f64);
    }

    sma
}

/// Rolling mean over the last `period` closes
#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    window: VecDeque<f64>,
    sum: f64,
    value: Option<f64>,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            window: VecDeque::with_capacity(period + 1),
            sum: 0.0,
            value: None,
        }
    }

    pub fn push(&mut self, price: f64) -> Option<f64> {
        if self.period == 0 {
            return None;
        }
        self.window.push_back(price);
        if self.window.len() > self.period {
            let oldest = self.window.pop_front().unwrap_or_default();
            self.sum = self.sum - oldest + price;
        } else {
            self.sum += price;
        }
        self.value = (self.window.len() == self.period).then(|| self.sum / self.period as f64);
        self.value
    }
}

impl Indicator for Sma {
    fn update(&mut self, bar: &Bar) -> Option<f64> {
        self.push(bar.close)
    }

    fn value(&self) -> Option<f64> {
        self.value
    }
}
