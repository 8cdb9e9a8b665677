//! Single-position trade state machine: FLAT -> OPEN -> CLOSED.

use chrono::NaiveDateTime;
use common::{
    convert_zone, BacktestError, BacktestParameters, Bar, Direction, ExitReason, Position, Result,
    SessionDate, TradeRecord, TrailingState,
};
use tracing::debug;

/// Exit decided on a bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitFill {
    pub price: f64,
    pub reason: ExitReason,
}

/// Decide whether `bar` hits the position's stop or target.
///
/// When both levels lie inside the bar the one the open already sits beyond
/// fills first; otherwise the level nearer the open wins and an exact tie goes
/// to the stop. A level gapped through at the open fills at the open.
pub fn resolve_exit(position: &Position, bar: &Bar) -> Option<ExitFill> {
    let stop = position.stop_loss;
    let target = position.take_profit;
    let stop_reason = if position.trailing_state.armed {
        ExitReason::TrailingStop
    } else {
        ExitReason::StopLoss
    };

    let (stop_hit, target_hit, open_past_stop, open_past_target) = match position.direction {
        Direction::Long => (
            bar.low <= stop,
            bar.high >= target,
            bar.open <= stop,
            bar.open >= target,
        ),
        Direction::Short => (
            bar.high >= stop,
            bar.low <= target,
            bar.open >= stop,
            bar.open <= target,
        ),
    };

    let stop_fill = ExitFill {
        price: if open_past_stop { bar.open } else { stop },
        reason: stop_reason,
    };
    let target_fill = ExitFill {
        price: if open_past_target { bar.open } else { target },
        reason: ExitReason::TakeProfit,
    };

    match (stop_hit, target_hit) {
        (false, false) => None,
        (true, false) => Some(stop_fill),
        (false, true) => Some(target_fill),
        (true, true) => {
            if open_past_stop {
                Some(stop_fill)
            } else if open_past_target {
                Some(target_fill)
            } else if (target - bar.open).abs() < (bar.open - stop).abs() {
                Some(target_fill)
            } else {
                Some(stop_fill)
            }
        }
    }
}

/// Owns the (at most one) open position and the closed-trade ledger
#[derive(Debug)]
pub struct TradeSimulator {
    stop_loss: f64,
    take_profit: f64,
    use_trailing_stop: bool,
    breakeven_trigger: f64,
    trail_distance: f64,
    point_value: f64,
    commission_per_contract: f64,
    input_offset: i32,
    display_offset: i32,
    position: Option<Position>,
    trades: Vec<TradeRecord>,
}

impl TradeSimulator {
    pub fn new(params: &BacktestParameters) -> Self {
        Self {
            stop_loss: params.stop_loss,
            take_profit: params.take_profit,
            use_trailing_stop: params.use_trailing_stop,
            breakeven_trigger: params.breakeven_trigger,
            trail_distance: params.trail_distance,
            point_value: params.point_value,
            commission_per_contract: params.commission_per_contract,
            input_offset: params.input_utc_offset_minutes,
            display_offset: params.display_utc_offset_minutes,
            position: None,
            trades: Vec::new(),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn into_trades(self) -> Vec<TradeRecord> {
        self.trades
    }

    /// Open P&L in currency at `price`, zero when flat
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.position
            .as_ref()
            .map(|p| p.unrealized_pnl(price, self.point_value))
            .unwrap_or(0.0)
    }

    /// FLAT -> OPEN
    pub fn open(
        &mut self,
        direction: Direction,
        price: f64,
        time: NaiveDateTime,
        contracts: u32,
    ) -> Result<&Position> {
        if self.position.is_some() {
            return Err(BacktestError::Computation(
                "cannot open a position while another is open".to_string(),
            ));
        }
        if contracts == 0 {
            return Err(BacktestError::Computation(
                "position must have at least one contract".to_string(),
            ));
        }
        if !price.is_finite() {
            return Err(BacktestError::Computation(format!(
                "non-finite entry price {price}"
            )));
        }

        let sign = direction.sign();
        let stop_loss = price - sign * self.stop_loss;
        let position = Position {
            direction,
            entry_price: price,
            entry_time: time,
            contracts,
            stop_loss,
            take_profit: price + sign * self.take_profit,
            initial_stop: stop_loss,
            trailing_state: TrailingState {
                armed: false,
                best_price: price,
            },
        };

        Ok(self.position.insert(position))
    }

    /// Apply one bar to the open position: exits first, then trailing-stop updates.
    pub fn update(&mut self, bar: &Bar) -> Result<Option<TradeRecord>> {
        let Some(position) = self.position.as_ref() else {
            return Ok(None);
        };

        if let Some(fill) = resolve_exit(position, bar) {
            return self
                .close(fill.price, bar.close_time, fill.reason, bar.session_date().into())
                .map(Some);
        }

        if self.use_trailing_stop {
            self.trail(bar);
        }
        Ok(None)
    }

    fn trail(&mut self, bar: &Bar) {
        let Some(position) = self.position.as_mut() else {
            return;
        };
        let state = &mut position.trailing_state;
        let (best, tighten): (f64, fn(f64, f64) -> f64) = match position.direction {
            Direction::Long => (state.best_price.max(bar.high), f64::max),
            Direction::Short => (state.best_price.min(bar.low), f64::min),
        };
        state.best_price = best;

        let excursion = (best - position.entry_price) * position.direction.sign();
        if !state.armed && excursion >= self.breakeven_trigger {
            state.armed = true;
            position.stop_loss = tighten(position.stop_loss, position.entry_price);
            debug!(stop = position.stop_loss, "Stop moved to breakeven");
        }
        if state.armed {
            let candidate = best - position.direction.sign() * self.trail_distance;
            let next = tighten(position.stop_loss, candidate);
            if next != position.stop_loss {
                position.stop_loss = next;
                debug!(stop = next, "Trailing stop tightened");
            }
        }
    }

    /// OPEN -> CLOSED, appending the trade to the ledger
    pub fn close(
        &mut self,
        price: f64,
        time: NaiveDateTime,
        reason: ExitReason,
        session_date: SessionDate,
    ) -> Result<TradeRecord> {
        let position = self
            .position
            .take()
            .ok_or_else(|| BacktestError::Computation("no position to close".to_string()))?;

        let exit_time = time.max(position.entry_time);
        let points = position.unrealized_points(price);
        let contracts = position.contracts as f64;
        let profit_loss = points * self.point_value * contracts;
        let commission = self.commission_per_contract * contracts;
        if !profit_loss.is_finite() {
            return Err(BacktestError::Computation(format!(
                "non-finite P&L closing at {price}"
            )));
        }

        let entry = convert_zone(position.entry_time, self.input_offset, self.display_offset);
        let exit = convert_zone(exit_time, self.input_offset, self.display_offset);
        let trade = TradeRecord {
            session_date,
            entry_date: entry.date(),
            entry_time: entry.time(),
            entry_price: position.entry_price,
            exit_date: exit.date(),
            exit_time: exit.time(),
            exit_price: price,
            direction: position.direction,
            contracts: position.contracts,
            stop_loss: position.initial_stop,
            take_profit: position.take_profit,
            exit_reason: reason,
            profit_loss,
            commission,
            net_profit_loss: profit_loss - commission,
        };

        self.trades.push(trade.clone());
        Ok(trade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDate};

    fn at(minute: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
            + Duration::minutes(minute)
    }

    fn bar(minute: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(at(minute), open, high, low, close, 100)
    }

    fn params() -> BacktestParameters {
        BacktestParameters::default()
            .with_stops(10.0, 20.0)
            .with_costs(20.0, 2.0)
    }

    fn long_at_100(sim: &mut TradeSimulator) {
        sim.open(Direction::Long, 100.0, at(0), 1).unwrap();
    }

    #[test]
    fn test_levels_are_direction_adjusted() {
        let mut sim = TradeSimulator::new(&params());
        let pos = sim.open(Direction::Short, 100.0, at(0), 2).unwrap();
        assert_eq!(pos.stop_loss, 110.0);
        assert_eq!(pos.take_profit, 80.0);
    }

    #[test]
    fn test_second_open_rejected() {
        let mut sim = TradeSimulator::new(&params());
        long_at_100(&mut sim);
        assert!(sim.open(Direction::Short, 100.0, at(1), 1).is_err());
    }

    #[test]
    fn test_zero_contracts_is_computation_error() {
        let mut sim = TradeSimulator::new(&params());
        assert!(matches!(
            sim.open(Direction::Long, 100.0, at(0), 0),
            Err(BacktestError::Computation(_))
        ));
    }

    #[test]
    fn test_wide_bar_resolves_to_stop() {
        let mut sim = TradeSimulator::new(&params());
        long_at_100(&mut sim);
        let trade = sim.update(&bar(1, 100.0, 112.0, 88.0, 105.0)).unwrap().unwrap();
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_eq!(trade.exit_price, 90.0);
        assert_relative_eq!(trade.profit_loss, -200.0);
        assert_relative_eq!(trade.net_profit_loss, -202.0);
        assert!(sim.is_flat());
    }

    #[test]
    fn test_both_levels_nearest_to_open_wins() {
        let mut sim = TradeSimulator::new(&params());
        long_at_100(&mut sim);
        // Open 115: target 5 away, stop 25 away
        let trade = sim.update(&bar(1, 115.0, 121.0, 89.0, 100.0)).unwrap().unwrap();
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
        assert_eq!(trade.exit_price, 120.0);
    }

    #[test]
    fn test_equidistant_levels_go_to_stop() {
        let mut sim = TradeSimulator::new(&params());
        long_at_100(&mut sim);
        let trade = sim.update(&bar(1, 105.0, 120.0, 90.0, 100.0)).unwrap().unwrap();
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
    }

    #[test]
    fn test_gap_through_stop_fills_at_open() {
        let mut sim = TradeSimulator::new(&params());
        long_at_100(&mut sim);
        let trade = sim.update(&bar(1, 85.0, 125.0, 80.0, 121.0)).unwrap().unwrap();
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_eq!(trade.exit_price, 85.0);
    }

    #[test]
    fn test_short_target() {
        let mut sim = TradeSimulator::new(&params());
        sim.open(Direction::Short, 100.0, at(0), 1).unwrap();
        let trade = sim.update(&bar(1, 95.0, 99.0, 79.0, 82.0)).unwrap().unwrap();
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
        assert_relative_eq!(trade.profit_loss, 400.0);
    }

    #[test]
    fn test_no_exit_inside_range() {
        let mut sim = TradeSimulator::new(&params());
        long_at_100(&mut sim);
        assert!(sim.update(&bar(1, 100.0, 105.0, 95.0, 101.0)).unwrap().is_none());
        assert_relative_eq!(sim.unrealized_pnl(101.0), 20.0);
    }

    #[test]
    fn test_breakeven_then_trailing() {
        let mut sim = TradeSimulator::new(&params().with_trailing_stop(5.0, 4.0));
        long_at_100(&mut sim);

        // +6 excursion arms breakeven and trails to 102
        sim.update(&bar(1, 100.0, 106.0, 99.0, 105.0)).unwrap();
        let pos = sim.position().unwrap();
        assert!(pos.trailing_state.armed);
        assert_eq!(pos.stop_loss, 102.0);

        // Pullback never loosens the stop
        sim.update(&bar(2, 105.0, 105.0, 103.0, 103.5)).unwrap();
        assert_eq!(sim.position().unwrap().stop_loss, 102.0);

        sim.update(&bar(3, 104.0, 110.0, 103.0, 109.0)).unwrap();
        assert_eq!(sim.position().unwrap().stop_loss, 106.0);

        let trade = sim.update(&bar(4, 108.0, 108.0, 104.0, 104.0)).unwrap().unwrap();
        assert_eq!(trade.exit_reason, ExitReason::TrailingStop);
        assert_eq!(trade.exit_price, 106.0);
        assert_eq!(trade.stop_loss, 90.0);
    }

    #[test]
    fn test_breakeven_without_trail_gain_holds_entry() {
        let mut sim = TradeSimulator::new(&params().with_trailing_stop(5.0, 8.0));
        sim.open(Direction::Short, 100.0, at(0), 1).unwrap();
        sim.update(&bar(1, 100.0, 101.0, 94.0, 95.0)).unwrap();
        // Trail candidate 102 is looser than breakeven
        assert_eq!(sim.position().unwrap().stop_loss, 100.0);
    }

    #[test]
    fn test_trailing_disabled_keeps_stop() {
        let mut sim = TradeSimulator::new(&params());
        long_at_100(&mut sim);
        sim.update(&bar(1, 100.0, 115.0, 99.0, 114.0)).unwrap();
        assert_eq!(sim.position().unwrap().stop_loss, 90.0);
    }

    #[test]
    fn test_close_converts_display_zone() {
        let mut p = params();
        p.display_utc_offset_minutes = -300;
        let mut sim = TradeSimulator::new(&p);
        long_at_100(&mut sim);
        let trade = sim
            .close(101.0, at(10), ExitReason::EndOfSession, at(10).date().into())
            .unwrap();
        assert_eq!(trade.entry_time.to_string(), "04:30:00");
        assert_eq!(trade.session_date.to_string(), "01/02/2024");
        assert!(trade.exit_datetime() >= trade.entry_datetime());
    }

    #[test]
    fn test_close_when_flat_errors() {
        let mut sim = TradeSimulator::new(&params());
        assert!(sim
            .close(100.0, at(0), ExitReason::EndOfSession, at(0).date().into())
            .is_err());
    }
}
