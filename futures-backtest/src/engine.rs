use std::time::Instant;

use common::format::{format_date, format_timestamp};
use common::{
    convert_zone, BacktestError, BacktestParameters, BacktestReport, Bar, ExitReason, FillTiming,
    Result, Signal, Tick, TradeRecord,
};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::account::AccountTracker;
use crate::bars::BarBuilder;
use crate::control::RunControl;
use crate::indicators::IndicatorEngine;
use crate::report::ReportAssembler;
use crate::risk::DailyRiskGovernor;
use crate::signals::SignalEvaluator;
use crate::simulator::TradeSimulator;

/// Deterministic single-pass backtest over one parameter set
#[derive(Debug, Clone)]
pub struct BacktestEngine {
    params: BacktestParameters,
}

impl BacktestEngine {
    /// Validate `params`; invalid options fail here before any data is touched.
    pub fn new(params: BacktestParameters) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &BacktestParameters {
        &self.params
    }

    /// Run backtest on raw ticks
    pub fn run(&self, ticks: &[Tick]) -> Result<BacktestReport> {
        self.run_with_control(ticks, &RunControl::new())
    }

    pub fn run_with_control(&self, ticks: &[Tick], control: &RunControl) -> Result<BacktestReport> {
        let builder = BarBuilder::new(&self.params)?;
        builder.check_coverage(ticks)?;
        self.simulate(&builder, builder.bars(ticks), control)
    }

    /// Run backtest on pre-built bars (must be strictly increasing)
    pub fn run_bars(&self, bars: &[Bar]) -> Result<BacktestReport> {
        self.run_bars_with_control(bars, &RunControl::new())
    }

    pub fn run_bars_with_control(
        &self,
        bars: &[Bar],
        control: &RunControl,
    ) -> Result<BacktestReport> {
        let builder = BarBuilder::new(&self.params)?;
        builder.check_bar_coverage(bars)?;
        let bars = builder.normalize(bars);
        self.simulate(&builder, bars.into_iter(), control)
    }

    /// Run many parameter sets over the same ticks in parallel.
    ///
    /// Each run owns its whole pipeline; results keep the order of `params`.
    pub fn run_batch(params: &[BacktestParameters], ticks: &[Tick]) -> Vec<Result<BacktestReport>> {
        params
            .par_iter()
            .map(|p| BacktestEngine::new(p.clone())?.run(ticks))
            .collect()
    }

    fn simulate<I>(&self, builder: &BarBuilder<'_>, bars: I, control: &RunControl) -> Result<BacktestReport>
    where
        I: Iterator<Item = Bar>,
    {
        let start_time = Instant::now();
        info!(
            start = %format_date(self.params.start_date),
            end = %format_date(self.params.end_date),
            bar_type = ?self.params.bar_type,
            bar_size = self.params.bar_size,
            "Starting backtest"
        );

        let mut run = RunContext::new(&self.params);
        let mut bars = bars.peekable();
        let mut processed = 0usize;

        while let Some(bar) = bars.next() {
            control.check()?;
            let last_of_session = bars
                .peek()
                .map_or(true, |next| next.session_date() != bar.session_date());
            run.on_bar(&bar, last_of_session)?;
            processed += 1;
        }

        if processed == 0 {
            let (start, end) = builder.window_bounds();
            return Err(BacktestError::DataGap { start, end });
        }

        let report = run.finish();
        info!(
            bars = processed,
            trades = report.count,
            net = report.statistics.account_stats.total_return,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Backtest finished"
        );
        Ok(report)
    }
}

/// Every stateful component of one run
struct RunContext<'a> {
    params: &'a BacktestParameters,
    indicators: IndicatorEngine,
    evaluator: SignalEvaluator,
    simulator: TradeSimulator,
    governor: DailyRiskGovernor,
    account: AccountTracker,
    pending: Option<Signal>,
    logs: Vec<String>,
}

impl<'a> RunContext<'a> {
    fn new(params: &'a BacktestParameters) -> Self {
        Self {
            params,
            indicators: IndicatorEngine::new(params),
            evaluator: SignalEvaluator::new(params),
            simulator: TradeSimulator::new(params),
            governor: DailyRiskGovernor::new(params),
            account: AccountTracker::new(params.starting_balance),
            pending: None,
            logs: Vec::new(),
        }
    }

    fn on_bar(&mut self, bar: &Bar, last_of_session: bool) -> Result<()> {
        let session = bar.session_date();
        self.governor.begin_bar(session);

        // Pending entries are only queued when the next bar shares the session.
        if let Some(signal) = self.pending.take() {
            self.enter(&signal, bar.open, bar.timestamp)?;
        }

        if let Some(trade) = self.simulator.update(bar)? {
            self.on_close(trade);
        }

        self.check_flatten(bar)?;

        let values = self.indicators.update(bar);
        if let Some(signal) = self.evaluator.evaluate(bar, &values) {
            if !last_of_session && self.simulator.is_flat() && self.governor.can_enter() {
                match self.params.fill_timing {
                    FillTiming::NextBarOpen => self.pending = Some(signal),
                    FillTiming::SignalBarClose => {
                        self.enter(&signal, bar.close, bar.close_time)?;
                    }
                }
            }
        }

        if last_of_session && !self.simulator.is_flat() {
            let trade = self.simulator.close(
                bar.close,
                bar.close_time,
                ExitReason::EndOfSession,
                session.into(),
            )?;
            self.on_close(trade);
        }

        let marked_at = self.display_time(bar.close_time);
        let unrealized = self.simulator.unrealized_pnl(bar.close);
        self.account.mark(marked_at, unrealized)?;
        Ok(())
    }

    fn check_flatten(&mut self, bar: &Bar) -> Result<()> {
        if self.simulator.is_flat() {
            return Ok(());
        }
        let unrealized = self.simulator.unrealized_pnl(bar.close);
        let Some(reason) = self.governor.flatten_check(unrealized) else {
            return Ok(());
        };

        let session = bar.session_date();
        let trade = self.simulator.close(
            bar.close,
            bar.close_time,
            ExitReason::DailyLimit,
            session.into(),
        )?;
        let line = format!(
            "Flattened {} x{} @ {:.2} due to daily limit on {}",
            trade.direction,
            trade.contracts,
            trade.exit_price,
            format_date(session)
        );
        self.logs.push(line);
        self.on_close(trade);
        if !self.governor.is_halted() {
            let message = self.governor.halt(reason);
            self.logs.push(message);
        }
        Ok(())
    }

    fn enter(&mut self, signal: &Signal, price: f64, time: chrono::NaiveDateTime) -> Result<()> {
        let contracts = self.params.contract_size;
        self.simulator.open(signal.direction, price, time, contracts)?;

        let line = format!(
            "Entered {} x{} @ {:.2} on {} ({})",
            signal.direction,
            contracts,
            price,
            format_timestamp(self.display_time(time)),
            signal.reason
        );
        debug!("{}", line);
        self.logs.push(line);
        Ok(())
    }

    fn on_close(&mut self, trade: TradeRecord) {
        self.account.apply_trade(&trade);

        let line = format!(
            "Exited {} x{} @ {:.2} on {} net {:.2} ({})",
            trade.direction,
            trade.contracts,
            trade.exit_price,
            format_timestamp(trade.exit_datetime()),
            trade.net_profit_loss,
            trade.exit_reason
        );
        debug!("{}", line);
        self.logs.push(line);

        if let Some(message) = self.governor.record_trade(&trade) {
            self.logs.push(message);
        }
    }

    fn display_time(&self, ts: chrono::NaiveDateTime) -> chrono::NaiveDateTime {
        convert_zone(
            ts,
            self.params.input_utc_offset_minutes,
            self.params.display_utc_offset_minutes,
        )
    }

    fn finish(self) -> BacktestReport {
        let trades = self.simulator.into_trades();
        ReportAssembler::assemble(trades, self.account.finish(), self.logs)
    }
}
