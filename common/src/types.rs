use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::format::{serde_date, serde_time, serde_timestamp, serde_timestamp_opt, SessionDate};

/// Aggressor side of a trade print
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
    #[default]
    Unknown,
}

/// Raw trade print in the input time zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    #[serde(with = "serde_timestamp")]
    pub timestamp: NaiveDateTime,
    pub price: f64,
    pub volume: u64,
    #[serde(default)]
    pub side: TradeSide,
}

impl Tick {
    pub fn new(timestamp: NaiveDateTime, price: f64, volume: u64, side: TradeSide) -> Self {
        Self {
            timestamp,
            price,
            volume,
            side,
        }
    }
}

/// Closed OHLCV bar with volume delta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bar {
    /// Bar open (grid start for time bars, first tick for tick bars)
    #[serde(with = "serde_timestamp")]
    pub timestamp: NaiveDateTime,
    /// Timestamp of the last tick in the bar
    #[serde(with = "serde_timestamp")]
    pub close_time: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    /// Buy volume minus sell volume inside this bar
    pub delta: i64,
    /// Running delta since the session open
    pub cumulative_volume_delta: i64,
}

impl Bar {
    pub fn new(
        timestamp: NaiveDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Self {
        Self {
            timestamp,
            close_time: timestamp,
            open,
            high,
            low,
            close,
            volume,
            delta: 0,
            cumulative_volume_delta: 0,
        }
    }

    pub fn with_cvd(mut self, delta: i64, cumulative_volume_delta: i64) -> Self {
        self.delta = delta;
        self.cumulative_volume_delta = cumulative_volume_delta;
        self
    }

    pub fn session_date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    EndOfSession,
    DailyLimit,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::TrailingStop => "TRAILING_STOP",
            ExitReason::EndOfSession => "END_OF_SESSION",
            ExitReason::DailyLimit => "DAILY_LIMIT",
        };
        f.write_str(s)
    }
}

/// Entry signal accepted by the evaluator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    #[serde(with = "serde_timestamp")]
    pub timestamp: NaiveDateTime,
    pub direction: Direction,
    pub price: f64,
    pub reason: String,
}

/// Breakeven / trailing-stop progress of an open position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailingState {
    /// Breakeven trigger reached; the stop now follows price
    pub armed: bool,
    /// Best price seen since entry (highest for longs, lowest for shorts)
    pub best_price: f64,
}

/// Open position
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    #[serde(rename = "type")]
    pub direction: Direction,
    pub entry_price: f64,
    #[serde(with = "serde_timestamp")]
    pub entry_time: NaiveDateTime,
    pub contracts: u32,
    /// Current stop level (moves when trailing)
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Stop level at entry
    pub initial_stop: f64,
    pub trailing_state: TrailingState,
}

impl Position {
    /// Open profit in points at `price`
    pub fn unrealized_points(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.direction.sign()
    }

    pub fn unrealized_pnl(&self, price: f64, point_value: f64) -> f64 {
        self.unrealized_points(price) * point_value * self.contracts as f64
    }
}

/// Closed trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    /// Session the trade was closed in (input zone date)
    pub session_date: SessionDate,
    #[serde(with = "serde_date")]
    pub entry_date: NaiveDate,
    #[serde(with = "serde_time")]
    pub entry_time: NaiveTime,
    pub entry_price: f64,
    #[serde(with = "serde_date")]
    pub exit_date: NaiveDate,
    #[serde(with = "serde_time")]
    pub exit_time: NaiveTime,
    pub exit_price: f64,
    #[serde(rename = "type")]
    pub direction: Direction,
    pub contracts: u32,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub exit_reason: ExitReason,
    pub profit_loss: f64,
    pub commission: f64,
    pub net_profit_loss: f64,
}

impl TradeRecord {
    pub fn entry_datetime(&self) -> NaiveDateTime {
        self.entry_date.and_time(self.entry_time)
    }

    pub fn exit_datetime(&self) -> NaiveDateTime {
        self.exit_date.and_time(self.exit_time)
    }

    pub fn is_win(&self) -> bool {
        self.net_profit_loss > 0.0
    }

    pub fn is_loss(&self) -> bool {
        self.net_profit_loss < 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HaltReason {
    DailyLoss,
    DailyProfit,
}

/// Per-session risk state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyState {
    pub date: SessionDate,
    #[serde(rename = "cumulativePnL")]
    pub cumulative_pnl: f64,
    pub trading_halted: bool,
    pub halt_reason: Option<HaltReason>,
}

impl DailyState {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date: SessionDate(date),
            cumulative_pnl: 0.0,
            trading_halted: false,
            halt_reason: None,
        }
    }
}

/// Running account values
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountState {
    pub balance: f64,
    pub equity: f64,
    pub high_water_mark: f64,
    pub current_drawdown: f64,
    pub current_drawdown_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquityPoint {
    #[serde(with = "serde_timestamp")]
    pub timestamp: NaiveDateTime,
    pub balance: f64,
    pub equity: f64,
    pub drawdown_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawdownEvent {
    #[serde(with = "serde_timestamp")]
    pub start_date: NaiveDateTime,
    #[serde(with = "serde_timestamp_opt")]
    pub end_date: Option<NaiveDateTime>,
    /// High-water mark the drawdown is measured from
    pub start_balance: f64,
    /// Lowest equity seen during the drawdown
    pub lowest_balance: f64,
    pub drawdown_amount: f64,
    pub drawdown_percent: f64,
    /// Minutes from start to recovery (or to the last bar if unrecovered)
    pub duration: i64,
    pub recovered: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsecutiveStats {
    pub max_consecutive_wins: u32,
    pub max_consecutive_losses: u32,
    /// Positive for a running win streak, negative for a losing one
    pub current_streak: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStats {
    pub starting_balance: f64,
    pub final_balance: f64,
    pub final_equity: f64,
    pub total_return: f64,
    pub total_return_percent: f64,
    pub high_water_mark: f64,
    pub max_drawdown: f64,
    pub max_drawdown_percent: f64,
    pub current_drawdown: f64,
    pub current_drawdown_percent: f64,
    /// `None` when there was no drawdown
    pub return_to_drawdown_ratio: Option<f64>,
    pub total_commission: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectionStats {
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
    pub net_profit_loss: f64,
    pub average_profit: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongShortStats {
    pub long: DirectionStats,
    pub short: DirectionStats,
}

/// Intraday extremes of cumulative closed P&L for one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntradayStat {
    pub max_high: f64,
    pub max_low: f64,
    #[serde(rename = "finalPnL")]
    pub final_pnl: f64,
    pub trades: u32,
}

/// Summary statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_trades: u32,
    pub win_rate: f64,
    pub average_profit: f64,
    pub sharpe_ratio: f64,
    #[serde(rename = "dailyPnL")]
    pub daily_pnl: BTreeMap<SessionDate, f64>,
    pub max_drawdown: f64,
    /// `None` when there are no losing trades
    pub profit_factor: Option<f64>,
    pub consecutive_stats: ConsecutiveStats,
    pub account_stats: AccountStats,
    pub long_short_stats: LongShortStats,
}

/// Result record returned to the dashboard
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestReport {
    pub count: usize,
    pub logs: Vec<String>,
    pub statistics: Statistics,
    pub trades: Vec<TradeRecord>,
    pub intraday_stats: BTreeMap<SessionDate, IntradayStat>,
    pub equity_curve: Vec<EquityPoint>,
    pub drawdown_events: Vec<DrawdownEvent>,
}
