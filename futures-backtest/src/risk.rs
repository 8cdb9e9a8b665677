use chrono::NaiveDate;
use common::{BacktestParameters, DailyState, HaltReason, SessionDate, TradeRecord};
use tracing::warn;

/// Log line for a daily halt. The dashboard greps for these exact phrases.
pub fn halt_message(reason: HaltReason, date: SessionDate, pnl: f64) -> String {
    match reason {
        HaltReason::DailyLoss => format!("Daily stop loss hit on {date} (P&L {pnl:.2})"),
        HaltReason::DailyProfit => format!("Daily profit target hit on {date} (P&L {pnl:.2})"),
    }
}

/// Per-session loss/profit limits on closed-trade P&L
#[derive(Debug, Clone)]
pub struct DailyRiskGovernor {
    max_daily_loss: f64,
    max_daily_profit: f64,
    flatten_on_limit: bool,
    state: Option<DailyState>,
}

impl DailyRiskGovernor {
    pub fn new(params: &BacktestParameters) -> Self {
        Self {
            max_daily_loss: params.max_daily_loss,
            max_daily_profit: params.max_daily_profit,
            flatten_on_limit: params.flatten_on_daily_limit,
            state: None,
        }
    }

    pub fn state(&self) -> Option<&DailyState> {
        self.state.as_ref()
    }

    /// Called on every bar; returns true when `date` starts a new session.
    pub fn begin_bar(&mut self, date: NaiveDate) -> bool {
        if self.state.as_ref().is_some_and(|s| s.date.date() == date) {
            return false;
        }
        self.state = Some(DailyState::new(date));
        true
    }

    /// Which limit, if any, `pnl` breaches. Zero limits are disabled.
    pub fn breach(&self, pnl: f64) -> Option<HaltReason> {
        if self.max_daily_loss > 0.0 && pnl <= -self.max_daily_loss {
            Some(HaltReason::DailyLoss)
        } else if self.max_daily_profit > 0.0 && pnl >= self.max_daily_profit {
            Some(HaltReason::DailyProfit)
        } else {
            None
        }
    }

    pub fn is_halted(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.trading_halted)
    }

    pub fn can_enter(&self) -> bool {
        match &self.state {
            Some(state) => !state.trading_halted && self.breach(state.cumulative_pnl).is_none(),
            None => true,
        }
    }

    /// Book a closed trade; returns the halt message if this trade tripped a limit.
    pub fn record_trade(&mut self, trade: &TradeRecord) -> Option<String> {
        if self.state.as_ref().map(|s| s.date) != Some(trade.session_date) {
            self.begin_bar(trade.session_date.date());
        }
        let pnl = {
            let state = self.state.as_mut()?;
            state.cumulative_pnl += trade.net_profit_loss;
            if state.trading_halted {
                return None;
            }
            state.cumulative_pnl
        };
        let reason = self.breach(pnl)?;
        Some(self.halt(reason))
    }

    /// Limit breached by realized plus open P&L, when flattening is configured.
    pub fn flatten_check(&self, unrealized_pnl: f64) -> Option<HaltReason> {
        if !self.flatten_on_limit {
            return None;
        }
        let state = self.state.as_ref()?;
        if state.trading_halted {
            return None;
        }
        self.breach(state.cumulative_pnl + unrealized_pnl)
    }

    /// Stop new entries for the rest of the session.
    pub fn halt(&mut self, reason: HaltReason) -> String {
        let Some(state) = self.state.as_mut() else {
            return String::new();
        };
        state.trading_halted = true;
        state.halt_reason = Some(reason);
        let message = halt_message(reason, state.date, state.cumulative_pnl);
        warn!(date = %state.date, pnl = state.cumulative_pnl, "{}", message);
        message
    }
}
