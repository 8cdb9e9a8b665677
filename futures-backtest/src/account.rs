//! Running balance, mark-to-market equity and drawdown episodes.

use chrono::NaiveDateTime;
use common::{
    AccountState, AccountStats, BacktestError, DrawdownEvent, EquityPoint, Result, TradeRecord,
};

/// Everything the account produced over a run
#[derive(Debug, Clone)]
pub struct AccountSummary {
    pub equity_curve: Vec<EquityPoint>,
    pub drawdown_events: Vec<DrawdownEvent>,
    pub stats: AccountStats,
}

#[derive(Debug)]
pub struct AccountTracker {
    starting_balance: f64,
    state: AccountState,
    total_commission: f64,
    open_event: Option<DrawdownEvent>,
    events: Vec<DrawdownEvent>,
    equity_curve: Vec<EquityPoint>,
}

impl AccountTracker {
    pub fn new(starting_balance: f64) -> Self {
        Self {
            starting_balance,
            state: AccountState {
                balance: starting_balance,
                equity: starting_balance,
                high_water_mark: starting_balance,
                current_drawdown: 0.0,
                current_drawdown_percent: 0.0,
            },
            total_commission: 0.0,
            open_event: None,
            events: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    pub fn state(&self) -> &AccountState {
        &self.state
    }

    pub fn balance(&self) -> f64 {
        self.state.balance
    }

    /// Realize a closed trade into the balance.
    pub fn apply_trade(&mut self, trade: &TradeRecord) {
        self.state.balance += trade.net_profit_loss;
        self.total_commission += trade.commission;
    }

    /// Mark equity at a bar close and update the drawdown bookkeeping.
    pub fn mark(&mut self, timestamp: NaiveDateTime, unrealized_pnl: f64) -> Result<&EquityPoint> {
        let equity = self.state.balance + unrealized_pnl;
        if !equity.is_finite() {
            return Err(BacktestError::Computation(format!(
                "non-finite equity at {timestamp}"
            )));
        }
        self.state.equity = equity;

        if equity >= self.state.high_water_mark {
            if let Some(mut event) = self.open_event.take() {
                event.end_date = Some(timestamp);
                event.duration = (timestamp - event.start_date).num_minutes().max(0);
                event.recovered = true;
                self.events.push(event);
            }
            self.state.high_water_mark = equity;
        } else {
            let hwm = self.state.high_water_mark;
            let event = self.open_event.get_or_insert_with(|| DrawdownEvent {
                start_date: timestamp,
                end_date: None,
                start_balance: hwm,
                lowest_balance: equity,
                drawdown_amount: 0.0,
                drawdown_percent: 0.0,
                duration: 0,
                recovered: false,
            });
            event.lowest_balance = event.lowest_balance.min(equity);
            event.drawdown_amount = event.start_balance - event.lowest_balance;
            event.drawdown_percent = event.drawdown_amount / event.start_balance * 100.0;
            event.duration = (timestamp - event.start_date).num_minutes().max(0);
        }

        self.state.current_drawdown = self.state.high_water_mark - equity;
        self.state.current_drawdown_percent = if self.state.high_water_mark > 0.0 {
            self.state.current_drawdown / self.state.high_water_mark * 100.0
        } else {
            0.0
        };

        self.equity_curve.push(EquityPoint {
            timestamp,
            balance: self.state.balance,
            equity,
            drawdown_percent: self.state.current_drawdown_percent,
        });
        self.equity_curve
            .last()
            .ok_or_else(|| BacktestError::Computation("equity curve is empty".to_string()))
    }

    /// Close the books; an unresolved drawdown is reported with `recovered = false`.
    pub fn finish(mut self) -> AccountSummary {
        if let Some(event) = self.open_event.take() {
            self.events.push(event);
        }

        let max_drawdown = self
            .events
            .iter()
            .map(|e| e.drawdown_amount)
            .fold(0.0, f64::max);
        let max_drawdown_percent = self
            .events
            .iter()
            .map(|e| e.drawdown_percent)
            .fold(0.0, f64::max);

        let total_return = self.state.balance - self.starting_balance;
        let stats = AccountStats {
            starting_balance: self.starting_balance,
            final_balance: self.state.balance,
            final_equity: self.state.equity,
            total_return,
            total_return_percent: total_return / self.starting_balance * 100.0,
            high_water_mark: self.state.high_water_mark,
            max_drawdown,
            max_drawdown_percent,
            current_drawdown: self.state.current_drawdown,
            current_drawdown_percent: self.state.current_drawdown_percent,
            return_to_drawdown_ratio: (max_drawdown > 0.0).then(|| total_return / max_drawdown),
            total_commission: self.total_commission,
        };

        AccountSummary {
            equity_curve: self.equity_curve,
            drawdown_events: self.events,
            stats,
        }
    }
}
