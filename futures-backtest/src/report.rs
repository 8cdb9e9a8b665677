use std::collections::BTreeMap;

use common::{
    BacktestReport, ConsecutiveStats, Direction, DirectionStats, IntradayStat, LongShortStats,
    SessionDate, Statistics, TradeRecord,
};

use crate::account::AccountSummary;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Derives the result record from closed trades and account history.
///
/// Every statistic is a pure function of its inputs, so assembling twice over
/// the same trades yields identical output.
pub struct ReportAssembler;

impl ReportAssembler {
    pub fn assemble(
        trades: Vec<TradeRecord>,
        account: AccountSummary,
        logs: Vec<String>,
    ) -> BacktestReport {
        let statistics = Self::statistics(&trades, &account);
        let intraday_stats = Self::intraday_stats(&trades);

        BacktestReport {
            count: trades.len(),
            logs,
            statistics,
            trades,
            intraday_stats,
            equity_curve: account.equity_curve,
            drawdown_events: account.drawdown_events,
        }
    }

    pub fn statistics(trades: &[TradeRecord], account: &AccountSummary) -> Statistics {
        let total = trades.len();
        let wins = trades.iter().filter(|t| t.is_win()).count();
        let net: f64 = trades.iter().map(|t| t.net_profit_loss).sum();
        let daily_pnl = Self::daily_pnl(trades);

        Statistics {
            total_trades: total as u32,
            win_rate: percent(wins, total),
            average_profit: if total > 0 { net / total as f64 } else { 0.0 },
            sharpe_ratio: Self::sharpe_ratio(&daily_pnl, account.stats.starting_balance),
            daily_pnl,
            max_drawdown: account.stats.max_drawdown,
            profit_factor: Self::profit_factor(trades),
            consecutive_stats: Self::consecutive_stats(trades),
            account_stats: account.stats.clone(),
            long_short_stats: Self::long_short_stats(trades),
        }
    }

    /// Net P&L per session date
    pub fn daily_pnl(trades: &[TradeRecord]) -> BTreeMap<SessionDate, f64> {
        let mut daily = BTreeMap::new();
        for trade in trades {
            *daily.entry(trade.session_date).or_insert(0.0) += trade.net_profit_loss;
        }
        daily
    }

    /// Running closed P&L extremes per session, seeded at zero
    pub fn intraday_stats(trades: &[TradeRecord]) -> BTreeMap<SessionDate, IntradayStat> {
        let mut stats: BTreeMap<SessionDate, IntradayStat> = BTreeMap::new();
        for trade in trades {
            let stat = stats.entry(trade.session_date).or_default();
            stat.final_pnl += trade.net_profit_loss;
            stat.max_high = stat.max_high.max(stat.final_pnl);
            stat.max_low = stat.max_low.min(stat.final_pnl);
            stat.trades += 1;
        }
        stats
    }

    /// Gross gains over gross losses; `None` without a losing trade
    pub fn profit_factor(trades: &[TradeRecord]) -> Option<f64> {
        let gains: f64 = trades
            .iter()
            .filter(|t| t.is_win())
            .map(|t| t.net_profit_loss)
            .sum();
        let losses: f64 = trades
            .iter()
            .filter(|t| t.is_loss())
            .map(|t| t.net_profit_loss)
            .sum();

        (losses < 0.0).then(|| gains / losses.abs())
    }

    pub fn consecutive_stats(trades: &[TradeRecord]) -> ConsecutiveStats {
        let mut stats = ConsecutiveStats::default();
        let mut streak: i32 = 0;

        for trade in trades {
            streak = if trade.is_win() {
                streak.max(0) + 1
            } else if trade.is_loss() {
                streak.min(0) - 1
            } else {
                0
            };
            if streak > 0 {
                stats.max_consecutive_wins = stats.max_consecutive_wins.max(streak as u32);
            } else if streak < 0 {
                stats.max_consecutive_losses =
                    stats.max_consecutive_losses.max(streak.unsigned_abs());
            }
        }

        stats.current_streak = streak;
        stats
    }

    pub fn long_short_stats(trades: &[TradeRecord]) -> LongShortStats {
        LongShortStats {
            long: direction_stats(trades, Direction::Long),
            short: direction_stats(trades, Direction::Short),
        }
    }

    /// Annualized Sharpe ratio of daily returns on start-of-day balance.
    ///
    /// Uses the population standard deviation and `sqrt(252)`. Zero when there
    /// are fewer than two dates or the returns do not vary.
    pub fn sharpe_ratio(daily_pnl: &BTreeMap<SessionDate, f64>, starting_balance: f64) -> f64 {
        if daily_pnl.len() < 2 {
            return 0.0;
        }

        let mut balance = starting_balance;
        let returns: Vec<f64> = daily_pnl
            .values()
            .map(|pnl| {
                let r = if balance != 0.0 { pnl / balance } else { 0.0 };
                balance += pnl;
                r
            })
            .collect();

        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        if std_dev == 0.0 || !std_dev.is_finite() {
            return 0.0;
        }

        mean / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn direction_stats(trades: &[TradeRecord], direction: Direction) -> DirectionStats {
    let side: Vec<&TradeRecord> = trades.iter().filter(|t| t.direction == direction).collect();
    let wins = side.iter().filter(|t| t.is_win()).count();
    let losses = side.iter().filter(|t| t.is_loss()).count();
    let net: f64 = side.iter().map(|t| t.net_profit_loss).sum();

    DirectionStats {
        trades: side.len() as u32,
        wins: wins as u32,
        losses: losses as u32,
        win_rate: percent(wins, side.len()),
        net_profit_loss: net,
        average_profit: if side.is_empty() {
            0.0
        } else {
            net / side.len() as f64
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountTracker;
    use approx::assert_relative_eq;
    use chrono::{NaiveDate, NaiveTime};
    use common::ExitReason;

    fn trade(day: u32, direction: Direction, net: f64) -> TradeRecord {
        let date = NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let time = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        TradeRecord {
            session_date: date.into(),
            entry_date: date,
            entry_time: time,
            entry_price: 100.0,
            exit_date: date,
            exit_time: time,
            exit_price: 100.0,
            direction,
            contracts: 1,
            stop_loss: 90.0,
            take_profit: 120.0,
            exit_reason: if net >= 0.0 {
                ExitReason::TakeProfit
            } else {
                ExitReason::StopLoss
            },
            profit_loss: net,
            commission: 0.0,
            net_profit_loss: net,
        }
    }

    fn summary_for(trades: &[TradeRecord]) -> AccountSummary {
        let mut tracker = AccountTracker::new(50_000.0);
        for t in trades {
            tracker.apply_trade(t);
            tracker.mark(t.exit_datetime(), 0.0).unwrap();
        }
        tracker.finish()
    }

    #[test]
    fn test_empty_report() {
        let report = ReportAssembler::assemble(vec![], summary_for(&[]), vec![]);
        assert_eq!(report.count, 0);
        assert_eq!(report.statistics.win_rate, 0.0);
        assert_eq!(report.statistics.sharpe_ratio, 0.0);
        assert!(report.statistics.profit_factor.is_none());
        assert!(report.statistics.daily_pnl.is_empty());
    }

    #[test]
    fn test_basic_statistics() {
        let trades = vec![
            trade(2, Direction::Long, 400.0),
            trade(2, Direction::Short, -200.0),
            trade(3, Direction::Long, 100.0),
            trade(3, Direction::Long, -100.0),
        ];
        let stats = ReportAssembler::statistics(&trades, &summary_for(&trades));

        assert_eq!(stats.total_trades, 4);
        assert_eq!(stats.win_rate, 50.0);
        assert_eq!(stats.average_profit, 50.0);
        assert_relative_eq!(stats.profit_factor.unwrap(), 500.0 / 300.0);

        let d2 = SessionDate(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        let d3 = SessionDate(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
        assert_eq!(stats.daily_pnl[&d2], 200.0);
        assert_eq!(stats.daily_pnl[&d3], 0.0);

        assert_eq!(stats.long_short_stats.long.trades, 3);
        assert_eq!(stats.long_short_stats.short.losses, 1);
        assert_relative_eq!(stats.long_short_stats.long.average_profit, 400.0 / 3.0);
    }

    #[test]
    fn test_intraday_extremes() {
        let trades = vec![
            trade(2, Direction::Long, -100.0),
            trade(2, Direction::Long, 300.0),
            trade(2, Direction::Long, -50.0),
        ];
        let stats = ReportAssembler::intraday_stats(&trades);
        let day = stats.values().next().unwrap();

        assert_eq!(day.max_low, -100.0);
        assert_eq!(day.max_high, 200.0);
        assert_eq!(day.final_pnl, 150.0);
        assert_eq!(day.trades, 3);
    }

    #[test]
    fn test_intraday_seeded_at_zero() {
        let stats = ReportAssembler::intraday_stats(&[trade(2, Direction::Long, 80.0)]);
        let day = stats.values().next().unwrap();
        assert_eq!(day.max_low, 0.0);
        assert_eq!(day.max_high, 80.0);
    }

    #[test]
    fn test_consecutive_streaks() {
        let nets = [10.0, 20.0, 30.0, -5.0, -5.0, 0.0, -1.0];
        let trades: Vec<_> = nets.iter().map(|n| trade(2, Direction::Long, *n)).collect();
        let stats = ReportAssembler::consecutive_stats(&trades);

        assert_eq!(stats.max_consecutive_wins, 3);
        assert_eq!(stats.max_consecutive_losses, 2);
        assert_eq!(stats.current_streak, -1);
    }

    #[test]
    fn test_sharpe_ratio() {
        let mut daily = BTreeMap::new();
        daily.insert(SessionDate(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()), 100.0);
        assert_eq!(ReportAssembler::sharpe_ratio(&daily, 10_000.0), 0.0);

        daily.insert(SessionDate(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()), 200.0);
        let sharpe = ReportAssembler::sharpe_ratio(&daily, 10_000.0);
        assert!(sharpe > 0.0);

        let r1: f64 = 100.0 / 10_000.0;
        let r2: f64 = 200.0 / 10_100.0;
        let mean = (r1 + r2) / 2.0;
        let std = (((r1 - mean).powi(2) + (r2 - mean).powi(2)) / 2.0).sqrt();
        assert_relative_eq!(sharpe, mean / std * 252f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_assemble_is_idempotent() {
        let trades = vec![
            trade(2, Direction::Long, 400.0),
            trade(3, Direction::Short, -200.0),
            trade(4, Direction::Long, 150.0),
        ];
        let summary = summary_for(&trades);
        let first = ReportAssembler::assemble(trades.clone(), summary.clone(), vec![]);
        let second = ReportAssembler::assemble(trades, summary, vec![]);

        assert_eq!(
            serde_json::to_string(&first.statistics).unwrap(),
            serde_json::to_string(&second.statistics).unwrap()
        );
    }
}
