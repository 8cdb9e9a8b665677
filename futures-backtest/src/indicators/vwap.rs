use chrono::NaiveDate;
use common::Bar;

use super::Indicator;

/// Session VWAP over bar typical prices, reset at each new session date
#[derive(Debug, Clone, Default)]
pub struct Vwap {
    session: Option<NaiveDate>,
    price_volume: f64,
    volume: f64,
    value: Option<f64>,
}

impl Vwap {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Indicator for Vwap {
    fn update(&mut self, bar: &Bar) -> Option<f64> {
        let date = bar.session_date();
        if self.session != Some(date) {
            self.session = Some(date);
            self.price_volume = 0.0;
            self.volume = 0.0;
            self.value = None;
        }

        let volume = bar.volume as f64;
        self.price_volume += bar.typical_price() * volume;
        self.volume += volume;
        if self.volume > 0.0 {
            self.value = Some(self.price_volume / self.volume);
        }
        self.value
    }

    fn value(&self) -> Option<f64> {
        self.value
    }
}
