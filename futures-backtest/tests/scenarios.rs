//! End-to-end scenarios over hand-built bar sequences.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use futures_backtest::account::AccountSummary;
use futures_backtest::{
    generate_synthetic_ticks, BacktestEngine, BacktestParameters, Bar, BarType, Direction,
    ExitReason, FillTiming, IndicatorSeries, ReportAssembler,
};

fn at(minute: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(9, 30, 0)
        .unwrap()
        + Duration::minutes(minute)
}

fn base_params() -> BacktestParameters {
    BacktestParameters::default()
        .with_session(
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        )
        .with_bars(BarType::Time, 1)
        .with_cvd_lookback(3)
        .with_costs(20.0, 0.0)
        .with_daily_limits(0.0, 0.0)
        .with_fill_timing(FillTiming::SignalBarClose)
}

/// One-minute bar with CVD rising by 10 each bar
fn bar(i: usize, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar::new(at(i as i64), open, high, low, close, 100).with_cvd(10, 10 * (i as i64 + 1))
}

fn flat(i: usize, price: f64) -> Bar {
    bar(i, price, price, price, price)
}

#[test]
fn ema_filter_allows_longs_only_above_average() {
    let mut closes = vec![100.0; 12];
    closes.extend((1..=10).map(|k| 100.0 + k as f64));
    closes.extend((1..=15).map(|k| 110.0 - k as f64));

    let bars: Vec<Bar> = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let open = if i == 0 { c } else { closes[i - 1] };
            bar(i, open, open.max(c) + 0.25, open.min(c) - 0.25, c)
        })
        .collect();

    let params = base_params().with_ema(9).with_stops(2.0, 2.0);
    let report = BacktestEngine::new(params).unwrap().run_bars(&bars).unwrap();
    let series = IndicatorSeries::calculate(&bars, 9, 0, 0);

    let first_below = (12..bars.len())
        .find(|&i| series.ema[i].is_some_and(|ema| bars[i].close <= ema))
        .unwrap();

    assert!(!report.trades.is_empty());
    for trade in &report.trades {
        assert_eq!(trade.direction, Direction::Long);
        let idx = bars
            .iter()
            .position(|b| b.close_time.time() == trade.entry_time)
            .unwrap();
        let ema = series.ema[idx].unwrap();
        assert!(bars[idx].close > ema, "entry at bar {idx} not above EMA");
        assert!(idx < first_below, "entry at bar {idx} after price fell below EMA");
    }
}

#[test]
fn daily_loss_limit_halts_entries() {
    let bars = vec![
        flat(0, 100.0),
        flat(1, 100.0),
        // Entry at 100, stop 94
        flat(2, 100.0),
        // Stop hit at the level: -6 pts, re-enter at 94
        bar(3, 95.0, 96.0, 93.0, 94.0),
        // Gap through the 88 stop, filled at the open: -10 pts, re-enter at 84
        bar(4, 84.0, 85.0, 83.0, 84.0),
        // Gap through the 78 stop: -10 pts, limit breached
        bar(5, 74.0, 75.0, 73.0, 74.0),
        flat(6, 74.0),
        flat(7, 74.0),
        flat(8, 74.0),
        flat(9, 74.0),
    ];

    let params = base_params().with_stops(6.0, 50.0).with_daily_limits(500.0, 0.0);
    let report = BacktestEngine::new(params).unwrap().run_bars(&bars).unwrap();

    assert_eq!(report.count, 3);
    let nets: Vec<f64> = report.trades.iter().map(|t| t.net_profit_loss).collect();
    assert_eq!(nets, vec![-120.0, -200.0, -200.0]);
    assert!(report.trades.iter().all(|t| t.exit_reason == ExitReason::StopLoss));
    assert_eq!(report.trades[1].exit_price, 84.0);

    let (date, pnl) = report.statistics.daily_pnl.iter().next().unwrap();
    assert_eq!(date.to_string(), "01/02/2024");
    assert_eq!(*pnl, -520.0);

    assert!(report
        .logs
        .iter()
        .any(|l| l.contains("Daily stop loss hit on 01/02/2024")));
    let entries = report.logs.iter().filter(|l| l.starts_with("Entered")).count();
    assert_eq!(entries, 3);
}

#[test]
fn wide_bar_resolves_as_stop_loss() {
    let bars = vec![
        flat(0, 100.0),
        flat(1, 100.0),
        flat(2, 100.0),
        bar(3, 100.0, 112.0, 88.0, 105.0),
        flat(4, 105.0),
    ];

    let params = base_params().with_stops(10.0, 20.0);
    let report = BacktestEngine::new(params).unwrap().run_bars(&bars).unwrap();
    let trade = &report.trades[0];
    assert_eq!(trade.entry_price, 100.0);
    assert_eq!(trade.exit_reason, ExitReason::StopLoss);
    assert_eq!(trade.exit_price, 90.0);

    // Both levels inside the bar and equidistant from the open: stop wins
    let params = base_params().with_stops(10.0, 10.0);
    let report = BacktestEngine::new(params).unwrap().run_bars(&bars).unwrap();
    let trade = &report.trades[0];
    assert_eq!(trade.exit_reason, ExitReason::StopLoss);
    assert_eq!(trade.exit_price, 90.0);
    assert_eq!(trade.net_profit_loss, -200.0);
}

#[test]
fn report_assembly_is_idempotent() {
    let params = base_params()
        .with_session(
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(),
            NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
        )
        .with_bars(BarType::Tick, 40)
        .with_costs(20.0, 2.0)
        .with_stops(2.0, 3.0);
    let ticks = generate_synthetic_ticks(&params, 4800.0, 11);
    let report = BacktestEngine::new(params).unwrap().run(&ticks).unwrap();

    let summary = AccountSummary {
        equity_curve: report.equity_curve.clone(),
        drawdown_events: report.drawdown_events.clone(),
        stats: report.statistics.account_stats.clone(),
    };
    let first = ReportAssembler::statistics(&report.trades, &summary);
    let second = ReportAssembler::statistics(&report.trades, &summary);

    let first_json = serde_json::to_string(&first).unwrap();
    assert_eq!(first_json, serde_json::to_string(&second).unwrap());
    assert_eq!(first_json, serde_json::to_string(&report.statistics).unwrap());
}

#[test]
fn report_json_uses_dashboard_field_names() {
    let params = base_params()
        .with_bars(BarType::Time, 5)
        .with_stops(2.0, 3.0);
    let ticks = generate_synthetic_ticks(&params, 4800.0, 3);
    let report = BacktestEngine::new(params).unwrap().run(&ticks).unwrap();
    let json = serde_json::to_value(&report).unwrap();

    for key in ["count", "logs", "statistics", "trades", "intradayStats", "equityCurve", "drawdownEvents"] {
        assert!(json.get(key).is_some(), "missing {key}");
    }
    let stats = &json["statistics"];
    for key in ["totalTrades", "winRate", "averageProfit", "sharpeRatio", "dailyPnL", "maxDrawdown", "profitFactor", "consecutiveStats", "accountStats", "longShortStats"] {
        assert!(stats.get(key).is_some(), "missing statistics.{key}");
    }
    if let Some(trade) = json["trades"].as_array().and_then(|t| t.first()) {
        assert!(trade["entryDate"].as_str().unwrap().contains('/'));
        assert!(trade["type"] == "LONG" || trade["type"] == "SHORT");
    }
}
