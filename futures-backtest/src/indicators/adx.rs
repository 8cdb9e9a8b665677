use common::Bar;

use super::Indicator;

/// ADX lookback used by the dashboard's threshold filter
pub const ADX_PERIOD: usize = 14;

/// Calculate True Range for a single bar
pub fn true_range(high: f64, low: f64, prev_close: f64) -> f64 {
    let hl = high - low;
    let hc = (high - prev_close).abs();
    let lc = (low - prev_close).abs();
    hl.max(hc).max(lc)
}

/// +DM / -DM for one bar against the previous one
pub fn directional_movement(high: f64, low: f64, prev_high: f64, prev_low: f64) -> (f64, f64) {
    let up = high - prev_high;
    let down = prev_low - low;
    let plus = if up > down && up > 0.0 { up } else { 0.0 };
    let minus = if down > up && down > 0.0 { down } else { 0.0 };
    (plus, minus)
}

fn dx(smoothed_tr: f64, smoothed_plus: f64, smoothed_minus: f64) -> f64 {
    if smoothed_tr == 0.0 {
        return 0.0;
    }
    let plus_di = 100.0 * smoothed_plus / smoothed_tr;
    let minus_di = 100.0 * smoothed_minus / smoothed_tr;
    let di_sum = plus_di + minus_di;
    if di_sum == 0.0 {
        0.0
    } else {
        100.0 * (plus_di - minus_di).abs() / di_sum
    }
}

/// Calculate Average Directional Index with Wilder's smoothing
///
/// # Arguments
/// * `highs` - Slice of high prices
/// * `lows` - Slice of low prices
/// * `closes` - Slice of closing prices
/// * `period` - ADX period (typically 14)
///
/// # Returns
/// Vector of ADX values, None for the first `2 * period - 1` bars
pub fn calculate_adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = highs.len();
    let mut adx = vec![None; n];
    if period == 0 || n < 2 * period {
        return adx;
    }

    let p = period as f64;
    let (mut tr_s, mut plus_s, mut minus_s) = (0.0, 0.0, 0.0);
    let mut dx_sum = 0.0;
    let mut dx_count = 0usize;
    let mut current: Option<f64> = None;

    for i in 1..n {
        let tr = true_range(highs[i], lows[i], closes[i - 1]);
        let (plus, minus) = directional_movement(highs[i], lows[i], highs[i - 1], lows[i - 1]);

        if i <= period {
            tr_s += tr;
            plus_s += plus;
            minus_s += minus;
            if i < period {
                continue;
            }
        } else {
            tr_s = tr_s - tr_s / p + tr;
            plus_s = plus_s - plus_s / p + plus;
            minus_s = minus_s - minus_s / p + minus;
        }

        let value = dx(tr_s, plus_s, minus_s);
        current = match current {
            Some(prev) => Some((prev * (p - 1.0) + value) / p),
            None => {
                dx_sum += value;
                dx_count += 1;
                (dx_count == period).then(|| dx_sum / p)
            }
        };
        adx[i] = current;
    }

    adx
}

/// Incremental ADX; undefined until `2 * period` bars have been seen
#[derive(Debug, Clone)]
pub struct Adx {
    period: usize,
    prev: Option<(f64, f64, f64)>,
    movements: usize,
    smoothed_tr: f64,
    smoothed_plus: f64,
    smoothed_minus: f64,
    dx_sum: f64,
    dx_count: usize,
    value: Option<f64>,
}

impl Adx {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev: None,
            movements: 0,
            smoothed_tr: 0.0,
            smoothed_plus: 0.0,
            smoothed_minus: 0.0,
            dx_sum: 0.0,
            dx_count: 0,
            value: None,
        }
    }
}

impl Default for Adx {
    fn default() -> Self {
        Self::new(ADX_PERIOD)
    }
}

impl Indicator for Adx {
    fn update(&mut self, bar: &Bar) -> Option<f64> {
        let Some((prev_high, prev_low, prev_close)) = self.prev.replace((bar.high, bar.low, bar.close))
        else {
            return None;
        };
        if self.period == 0 {
            return None;
        }

        let p = self.period as f64;
        let tr = true_range(bar.high, bar.low, prev_close);
        let (plus, minus) = directional_movement(bar.high, bar.low, prev_high, prev_low);
        self.movements += 1;

        if self.movements <= self.period {
            self.smoothed_tr += tr;
            self.smoothed_plus += plus;
            self.smoothed_minus += minus;
            if self.movements < self.period {
                return None;
            }
        } else {
            self.smoothed_tr = self.smoothed_tr - self.smoothed_tr / p + tr;
            self.smoothed_plus = self.smoothed_plus - self.smoothed_plus / p + plus;
            self.smoothed_minus = self.smoothed_minus - self.smoothed_minus / p + minus;
        }

        let value = dx(self.smoothed_tr, self.smoothed_plus, self.smoothed_minus);
        self.value = match self.value {
            Some(prev) => Some((prev * (p - 1.0) + value) / p),
            None => {
                self.dx_sum += value;
                self.dx_count += 1;
                (self.dx_count == self.period).then(|| self.dx_sum / p)
            }
        };
        self.value
    }

    fn value(&self) -> Option<f64> {
        self.value
    }
}
