use std::collections::VecDeque;

use chrono::NaiveDate;
use common::{BacktestParameters, Bar, Direction, Signal};

use crate::indicators::IndicatorValues;

/// Entry signals from CVD trend plus indicator agreement
#[derive(Debug, Clone)]
pub struct SignalEvaluator {
    lookback: usize,
    cvd_window: VecDeque<i64>,
    session: Option<NaiveDate>,
    ema_enabled: bool,
    sma_enabled: bool,
    vwap_enabled: bool,
    adx_threshold: Option<f64>,
}

impl SignalEvaluator {
    pub fn new(params: &BacktestParameters) -> Self {
        Self {
            lookback: params.cvd_look_back_bars,
            cvd_window: VecDeque::with_capacity(params.cvd_look_back_bars + 1),
            session: None,
            ema_enabled: params.ema_enabled(),
            sma_enabled: params.sma_enabled(),
            vwap_enabled: params.use_vwap,
            adx_threshold: params.adx_enabled().then_some(params.adx_threshold),
        }
    }

    /// Record a closed bar's CVD. The window starts empty every session.
    pub fn observe(&mut self, bar: &Bar) {
        let date = bar.session_date();
        if self.session != Some(date) {
            self.session = Some(date);
            self.cvd_window.clear();
        }
        self.cvd_window.push_back(bar.cumulative_volume_delta);
        while self.cvd_window.len() > self.lookback {
            self.cvd_window.pop_front();
        }
    }

    /// Direction of a strictly monotonic CVD run over the full lookback window
    pub fn cvd_trend(&self) -> Option<Direction> {
        if self.lookback < 2 || self.cvd_window.len() < self.lookback {
            return None;
        }
        let pairs = || self.cvd_window.iter().zip(self.cvd_window.iter().skip(1));
        if pairs().all(|(a, b)| b > a) {
            Some(Direction::Long)
        } else if pairs().all(|(a, b)| b < a) {
            Some(Direction::Short)
        } else {
            None
        }
    }

    /// All enabled filters must confirm `direction`; with none enabled this always holds.
    pub fn indicators_agree(&self, direction: Direction, close: f64, values: &IndicatorValues) -> bool {
        let beyond = |average: Option<f64>| match (direction, average) {
            (Direction::Long, Some(avg)) => close > avg,
            (Direction::Short, Some(avg)) => close < avg,
            // Undefined during warm-up never satisfies a filter
            (_, None) => false,
        };

        if self.ema_enabled && !beyond(values.ema) {
            return false;
        }
        if self.sma_enabled && !beyond(values.sma) {
            return false;
        }
        if self.vwap_enabled && !beyond(values.vwap) {
            return false;
        }
        if let Some(threshold) = self.adx_threshold {
            match values.adx {
                Some(adx) if adx >= threshold => {}
                _ => return false,
            }
        }
        true
    }

    /// Observe `bar` and return an entry signal if CVD and filters line up.
    pub fn evaluate(&mut self, bar: &Bar, values: &IndicatorValues) -> Option<Signal> {
        self.observe(bar);
        let direction = self.cvd_trend()?;
        if !self.indicators_agree(direction, bar.close, values) {
            return None;
        }

        Some(Signal {
            timestamp: bar.close_time,
            direction,
            price: bar.close,
            reason: self.describe(direction, bar, values),
        })
    }

    fn describe(&self, direction: Direction, bar: &Bar, values: &IndicatorValues) -> String {
        let trend = match direction {
            Direction::Long => "rising",
            Direction::Short => "falling",
        };
        let mut reason = format!(
            "CVD {} over {} bars ({}), close {:.2}",
            trend, self.lookback, bar.cumulative_volume_delta, bar.close
        );
        let side = match direction {
            Direction::Long => "above",
            Direction::Short => "below",
        };
        for (name, enabled, value) in [
            ("EMA", self.ema_enabled, values.ema),
            ("SMA", self.sma_enabled, values.sma),
            ("VWAP", self.vwap_enabled, values.vwap),
        ] {
            if let (true, Some(v)) = (enabled, value) {
                reason.push_str(&format!(", {side} {name} {v:.2}"));
            }
        }
        if let (Some(threshold), Some(adx)) = (self.adx_threshold, values.adx) {
            reason.push_str(&format!(", ADX {adx:.1} >= {threshold:.1}"));
        }
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDateTime};

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    fn bar_with_cvd(i: i64, close: f64, cvd: i64) -> Bar {
        Bar::new(start() + Duration::minutes(i), close, close, close, close, 100).with_cvd(0, cvd)
    }

    fn feed(evaluator: &mut SignalEvaluator, cvds: &[i64], close: f64, values: IndicatorValues) -> Option<Signal> {
        let mut last = None;
        for (i, cvd) in cvds.iter().enumerate() {
            last = evaluator.evaluate(&bar_with_cvd(i as i64, close, *cvd), &values);
        }
        last
    }

    #[test]
    fn test_rising_cvd_long_without_filters() {
        let mut evaluator = SignalEvaluator::new(&BacktestParameters::default().with_cvd_lookback(3));
        let signal = feed(&mut evaluator, &[1, 2, 3], 100.0, IndicatorValues::default()).unwrap();
        assert_eq!(signal.direction, Direction::Long);
    }

    #[test]
    fn test_falling_cvd_short() {
        let mut evaluator = SignalEvaluator::new(&BacktestParameters::default().with_cvd_lookback(3));
        let signal = feed(&mut evaluator, &[5, 0, -4], 100.0, IndicatorValues::default()).unwrap();
        assert_eq!(signal.direction, Direction::Short);
    }

    #[test]
    fn test_equal_adjacent_cvd_breaks_trend() {
        let mut evaluator = SignalEvaluator::new(&BacktestParameters::default().with_cvd_lookback(4));
        assert!(feed(&mut evaluator, &[1, 2, 2, 3], 100.0, IndicatorValues::default()).is_none());
    }

    #[test]
    fn test_window_must_be_full() {
        let mut evaluator = SignalEvaluator::new(&BacktestParameters::default().with_cvd_lookback(5));
        assert!(feed(&mut evaluator, &[1, 2, 3, 4], 100.0, IndicatorValues::default()).is_none());
    }

    #[test]
    fn test_window_cleared_on_new_session() {
        let mut evaluator = SignalEvaluator::new(&BacktestParameters::default().with_cvd_lookback(3));
        let values = IndicatorValues::default();
        evaluator.evaluate(&bar_with_cvd(0, 100.0, 1), &values);
        evaluator.evaluate(&bar_with_cvd(1, 100.0, 2), &values);
        let next_day = bar_with_cvd(24 * 60, 100.0, 3);
        assert!(evaluator.evaluate(&next_day, &values).is_none());
    }

    #[test]
    fn test_ema_filter_blocks_long_below_average() {
        let params = BacktestParameters::default().with_cvd_lookback(3).with_ema(9);
        let mut evaluator = SignalEvaluator::new(&params);
        let values = IndicatorValues {
            ema: Some(101.0),
            ..Default::default()
        };
        assert!(feed(&mut evaluator, &[1, 2, 3], 100.0, values).is_none());

        let mut evaluator = SignalEvaluator::new(&params);
        let signal = feed(&mut evaluator, &[1, 2, 3], 102.0, values).unwrap();
        assert!(signal.reason.contains("above EMA"));
    }

    #[test]
    fn test_price_equal_to_average_blocks_entry() {
        let evaluator = SignalEvaluator::new(&BacktestParameters::default().with_sma(20));
        let values = IndicatorValues {
            sma: Some(100.0),
            ..Default::default()
        };
        assert!(!evaluator.indicators_agree(Direction::Long, 100.0, &values));
        assert!(!evaluator.indicators_agree(Direction::Short, 100.0, &values));
    }

    #[test]
    fn test_undefined_adx_fails_filter() {
        let evaluator = SignalEvaluator::new(&BacktestParameters::default().with_adx_threshold(25.0));
        assert!(!evaluator.indicators_agree(Direction::Long, 100.0, &IndicatorValues::default()));

        let strong = IndicatorValues {
            adx: Some(30.0),
            ..Default::default()
        };
        // ADX measures strength only, so it confirms either side
        assert!(evaluator.indicators_agree(Direction::Long, 100.0, &strong));
        assert!(evaluator.indicators_agree(Direction::Short, 100.0, &strong));
    }

    #[test]
    fn test_all_enabled_filters_must_agree() {
        let params = BacktestParameters::default().with_ema(9).with_vwap(true);
        let evaluator = SignalEvaluator::new(&params);
        let mixed = IndicatorValues {
            ema: Some(99.0),
            vwap: Some(101.0),
            ..Default::default()
        };
        assert!(!evaluator.indicators_agree(Direction::Long, 100.0, &mixed));
        assert!(!evaluator.indicators_agree(Direction::Short, 100.0, &mixed));
    }
}
