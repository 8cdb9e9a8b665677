use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{BacktestError, Result};
use crate::format::{serde_date, serde_time};

/// How raw ticks are grouped into bars
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarType {
    /// `barSize` minutes per bar
    #[default]
    Time,
    /// `barSize` ticks per bar
    Tick,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandleType {
    #[default]
    Traditional,
    #[serde(alias = "heikin-ashi", alias = "heikin_ashi")]
    HeikinAshi,
}

/// Price at which an accepted signal is filled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FillTiming {
    /// Open of the bar after the signal bar
    #[default]
    NextBarOpen,
    /// Close of the signal bar itself
    SignalBarClose,
}

/// Backtest parameters as sent by the dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BacktestParameters {
    // Session window (input zone)
    #[serde(with = "serde_date")]
    pub start_date: NaiveDate,
    #[serde(with = "serde_time")]
    pub start_time: NaiveTime,
    #[serde(with = "serde_date")]
    pub end_date: NaiveDate,
    #[serde(with = "serde_time")]
    pub end_time: NaiveTime,
    // Bars
    pub bar_type: BarType,
    pub bar_size: u32,
    pub candle_type: CandleType,
    // Signal filters
    pub cvd_look_back_bars: usize,
    /// EMA period, 0 = disabled
    pub ema_moving_average: usize,
    /// SMA period, 0 = disabled
    pub sma_filter: usize,
    #[serde(rename = "useVWAP", alias = "useVwap")]
    pub use_vwap: bool,
    /// Minimum ADX(14), 0 = disabled
    pub adx_threshold: f64,
    // Position sizing and exits (points)
    pub contract_size: u32,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub use_trailing_stop: bool,
    pub breakeven_trigger: f64,
    pub trail_distance: f64,
    pub fill_timing: FillTiming,
    // Daily limits (currency), 0 = disabled
    pub max_daily_loss: f64,
    pub max_daily_profit: f64,
    pub flatten_on_daily_limit: bool,
    // Account
    pub starting_balance: f64,
    pub point_value: f64,
    /// Round-trip fee per contract
    pub commission_per_contract: f64,
    // Time zones and data coverage
    pub input_utc_offset_minutes: i32,
    pub display_utc_offset_minutes: i32,
    /// Largest tolerated silence between ticks inside a session, 0 = unchecked
    pub max_data_gap_minutes: u32,
}

impl Default for BacktestParameters {
    fn default() -> Self {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap_or_default();
        Self {
            start_date: date,
            start_time: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default(),
            end_date: date,
            end_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
            bar_type: BarType::Time,
            bar_size: 5,
            candle_type: CandleType::Traditional,
            cvd_look_back_bars: 5,
            ema_moving_average: 0,
            sma_filter: 0,
            use_vwap: false,
            adx_threshold: 0.0,
            contract_size: 1,
            stop_loss: 10.0,
            take_profit: 20.0,
            use_trailing_stop: false,
            breakeven_trigger: 10.0,
            trail_distance: 8.0,
            fill_timing: FillTiming::NextBarOpen,
            max_daily_loss: 500.0,
            max_daily_profit: 1000.0,
            flatten_on_daily_limit: false,
            starting_balance: 50_000.0,
            point_value: 20.0,
            commission_per_contract: 2.0,
            input_utc_offset_minutes: 0,
            display_utc_offset_minutes: 0,
            max_data_gap_minutes: 0,
        }
    }
}

impl BacktestParameters {
    /// Parse a dashboard JSON body; malformed input is a configuration error.
    pub fn from_json(json: &str) -> Result<Self> {
        let params: Self =
            serde_json::from_str(json).map_err(|e| BacktestError::Config(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    /// Reject parameter combinations the engine cannot run.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(BacktestError::Config(msg));

        if self.bar_size == 0 {
            return fail("barSize must be greater than 0".to_string());
        }
        if self.start_date > self.end_date {
            return fail(format!(
                "startDate {} is after endDate {}",
                self.start_date, self.end_date
            ));
        }
        if self.start_time >= self.end_time {
            return fail(format!(
                "startTime {} must be before endTime {}",
                self.start_time, self.end_time
            ));
        }
        if self.cvd_look_back_bars < 3 {
            return fail(format!(
                "cvdLookBackBars must be at least 3, got {}",
                self.cvd_look_back_bars
            ));
        }
        if !(self.adx_threshold >= 0.0) {
            return fail("adxThreshold must be 0 or positive".to_string());
        }
        if self.contract_size < 1 {
            return fail("contractSize must be at least 1".to_string());
        }
        if !(self.stop_loss > 0.0) || !(self.take_profit > 0.0) {
            return fail("stopLoss and takeProfit must be greater than 0".to_string());
        }
        if !(self.max_daily_loss >= 0.0) || !(self.max_daily_profit >= 0.0) {
            return fail("maxDailyLoss and maxDailyProfit must not be negative".to_string());
        }
        if self.use_trailing_stop
            && (!(self.breakeven_trigger > 0.0) || !(self.trail_distance > 0.0))
        {
            return fail(
                "breakevenTrigger and trailDistance must be greater than 0 when trailing is enabled"
                    .to_string(),
            );
        }
        if !(self.starting_balance > 0.0) {
            return fail("startingBalance must be greater than 0".to_string());
        }
        if !(self.point_value > 0.0) {
            return fail("pointValue must be greater than 0".to_string());
        }
        if !(self.commission_per_contract >= 0.0) {
            return fail("commissionPerContract must not be negative".to_string());
        }
        Ok(())
    }

    pub fn ema_enabled(&self) -> bool {
        self.ema_moving_average > 0
    }

    pub fn sma_enabled(&self) -> bool {
        self.sma_filter > 0
    }

    pub fn adx_enabled(&self) -> bool {
        self.adx_threshold > 0.0
    }

    pub fn trading_days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end_date;
        self.start_date.iter_days().take_while(move |d| *d <= end)
    }

    /// Session bounds for one date, both inclusive
    pub fn session_bounds(&self, date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
        (date.and_time(self.start_time), date.and_time(self.end_time))
    }

    /// True if the timestamp falls inside the session of its own date
    pub fn in_session(&self, ts: NaiveDateTime) -> bool {
        let date = ts.date();
        date >= self.start_date
            && date <= self.end_date
            && ts.time() >= self.start_time
            && ts.time() <= self.end_time
    }

    pub fn window_start(&self) -> NaiveDateTime {
        self.start_date.and_time(self.start_time)
    }

    pub fn window_end(&self) -> NaiveDateTime {
        self.end_date.and_time(self.end_time)
    }

    pub fn with_session(
        mut self,
        start_date: NaiveDate,
        start_time: NaiveTime,
        end_date: NaiveDate,
        end_time: NaiveTime,
    ) -> Self {
        self.start_date = start_date;
        self.start_time = start_time;
        self.end_date = end_date;
        self.end_time = end_time;
        self
    }

    pub fn with_bars(mut self, bar_type: BarType, bar_size: u32) -> Self {
        self.bar_type = bar_type;
        self.bar_size = bar_size;
        self
    }

    pub fn with_candles(mut self, candle_type: CandleType) -> Self {
        self.candle_type = candle_type;
        self
    }

    pub fn with_cvd_lookback(mut self, bars: usize) -> Self {
        self.cvd_look_back_bars = bars;
        self
    }

    pub fn with_ema(mut self, period: usize) -> Self {
        self.ema_moving_average = period;
        self
    }

    pub fn with_sma(mut self, period: usize) -> Self {
        self.sma_filter = period;
        self
    }

    pub fn with_vwap(mut self, enabled: bool) -> Self {
        self.use_vwap = enabled;
        self
    }

    pub fn with_adx_threshold(mut self, threshold: f64) -> Self {
        self.adx_threshold = threshold;
        self
    }

    pub fn with_stops(mut self, stop_loss: f64, take_profit: f64) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    pub fn with_daily_limits(mut self, max_loss: f64, max_profit: f64) -> Self {
        self.max_daily_loss = max_loss;
        self.max_daily_profit = max_profit;
        self
    }

    pub fn with_trailing_stop(mut self, breakeven_trigger: f64, trail_distance: f64) -> Self {
        self.use_trailing_stop = true;
        self.breakeven_trigger = breakeven_trigger;
        self.trail_distance = trail_distance;
        self
    }

    pub fn with_contracts(mut self, contracts: u32) -> Self {
        self.contract_size = contracts;
        self
    }

    pub fn with_costs(mut self, point_value: f64, commission_per_contract: f64) -> Self {
        self.point_value = point_value;
        self.commission_per_contract = commission_per_contract;
        self
    }

    pub fn with_fill_timing(mut self, fill_timing: FillTiming) -> Self {
        self.fill_timing = fill_timing;
        self
    }

    pub fn with_starting_balance(mut self, balance: f64) -> Self {
        self.starting_balance = balance;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(BacktestParameters::default().validate().is_ok());
    }

    #[test]
    fn test_zero_bar_size_rejected() {
        let params = BacktestParameters::default().with_bars(BarType::Time, 0);
        let err = params.validate().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("barSize"));
    }

    #[test]
    fn test_inverted_session_rejected() {
        let mut params = BacktestParameters::default();
        params.start_time = NaiveTime::from_hms_opt(16, 0, 0).unwrap();
        params.end_time = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_short_cvd_lookback_rejected() {
        let params = BacktestParameters::default().with_cvd_lookback(2);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_trailing_requires_distances() {
        let params = BacktestParameters::default().with_trailing_stop(0.0, 5.0);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_from_dashboard_json() {
        let json = r#"{
            "startDate": "03/04/2024", "startTime": "09:30",
            "endDate": "03/08/2024", "endTime": "16:00",
            "barType": "tick", "barSize": 500, "candleType": "heikinashi",
            "cvdLookBackBars": 4, "emaMovingAverage": 9, "smaFilter": 0,
            "useVWAP": true, "adxThreshold": 25,
            "contractSize": 2, "stopLoss": 10, "takeProfit": 20,
            "maxDailyLoss": 500, "maxDailyProfit": 1000,
            "useTrailingStop": true, "breakevenTrigger": 8, "trailDistance": 6
        }"#;
        let params = BacktestParameters::from_json(json).unwrap();
        assert_eq!(params.bar_type, BarType::Tick);
        assert_eq!(params.candle_type, CandleType::HeikinAshi);
        assert_eq!(params.cvd_look_back_bars, 4);
        assert!(params.use_vwap);
        assert!(params.ema_enabled() && params.adx_enabled());
        assert!(!params.sma_enabled());
        assert_eq!(params.trading_days().count(), 5);
        assert_eq!(params.fill_timing, FillTiming::NextBarOpen);
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = BacktestParameters::from_json(r#"{"barSize": -5}"#).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_in_session_bounds_inclusive() {
        let params = BacktestParameters::default();
        let (start, end) = params.session_bounds(params.start_date);
        assert!(params.in_session(start));
        assert!(params.in_session(end));
        assert!(!params.in_session(end + chrono::Duration::seconds(1)));
    }
}
