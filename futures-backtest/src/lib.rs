pub mod account;
pub mod bars;
pub mod control;
pub mod data;
pub mod engine;
pub mod indicators;
pub mod report;
pub mod risk;
pub mod signals;
pub mod simulator;

pub use account::{AccountSummary, AccountTracker};
pub use bars::{BarBuilder, HeikinAshi};
pub use control::RunControl;
pub use data::{generate_synthetic_ticks, load_file};
pub use engine::BacktestEngine;
pub use indicators::{Indicator, IndicatorEngine, IndicatorSeries, IndicatorValues};
pub use report::ReportAssembler;
pub use risk::DailyRiskGovernor;
pub use signals::SignalEvaluator;
pub use simulator::{resolve_exit, ExitFill, TradeSimulator};

// Re-export common types
pub use common::{
    BacktestError, BacktestParameters, BacktestReport, Bar, BarType, CandleType, Direction,
    ExitReason, FillTiming, Position, Result, Signal, Tick, TradeRecord, TradeSide,
};
