use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use common::format::{format_date, parse_date, parse_time};
use futures_backtest::{
    generate_synthetic_ticks, load_file, BacktestEngine, BacktestParameters, BacktestReport,
    BarType, CandleType, FillTiming, RunControl, Tick,
};

#[derive(Parser, Debug)]
#[command(name = "futures-backtest")]
#[command(version = "0.1.0")]
#[command(about = "CVD trend backtester for intraday futures", long_about = None)]
struct Args {
    /// Parameter file (dashboard JSON body). Flags below override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Additional parameter files run in parallel over the same ticks
    #[arg(long = "batch-config", num_args = 1..)]
    batch_config: Vec<PathBuf>,

    /// Tick file (CSV/JSON). If not provided, uses synthetic ticks.
    #[arg(short = 'f', long)]
    data_file: Option<PathBuf>,

    /// Seed for synthetic ticks
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Initial price for synthetic ticks
    #[arg(long, default_value = "4800.0")]
    initial_price: f64,

    /// First session date (MM/DD/YYYY)
    #[arg(long, value_parser = date_arg)]
    start_date: Option<NaiveDate>,

    /// Last session date (MM/DD/YYYY)
    #[arg(long, value_parser = date_arg)]
    end_date: Option<NaiveDate>,

    /// Session open (HH:MM[:SS])
    #[arg(long, value_parser = time_arg)]
    start_time: Option<NaiveTime>,

    /// Session close (HH:MM[:SS])
    #[arg(long, value_parser = time_arg)]
    end_time: Option<NaiveTime>,

    /// Bar type (time, tick)
    #[arg(long)]
    bar_type: Option<String>,

    /// Minutes per time bar or ticks per tick bar
    #[arg(long)]
    bar_size: Option<u32>,

    /// Use Heikin-Ashi candles
    #[arg(long)]
    heikin_ashi: bool,

    #[arg(long)]
    cvd_lookback: Option<usize>,

    /// EMA period, 0 disables
    #[arg(long)]
    ema: Option<usize>,

    /// SMA period, 0 disables
    #[arg(long)]
    sma: Option<usize>,

    #[arg(long)]
    vwap: bool,

    /// Minimum ADX(14), 0 disables
    #[arg(long)]
    adx_threshold: Option<f64>,

    #[arg(long)]
    contracts: Option<u32>,

    /// Stop loss in points
    #[arg(long)]
    stop_loss: Option<f64>,

    /// Take profit in points
    #[arg(long)]
    take_profit: Option<f64>,

    /// Breakeven trigger and trail distance in points; enables trailing
    #[arg(long, num_args = 2, value_names = ["TRIGGER", "DISTANCE"])]
    trailing_stop: Option<Vec<f64>>,

    #[arg(long)]
    max_daily_loss: Option<f64>,

    #[arg(long)]
    max_daily_profit: Option<f64>,

    /// Close open positions when a daily limit is hit
    #[arg(long)]
    flatten_on_daily_limit: bool,

    /// Fill entries at the signal bar's close instead of the next open
    #[arg(long)]
    fill_at_close: bool,

    /// Abort the run after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Output format (json, text)
    #[arg(short, long, default_value = "json")]
    output: String,

    /// Pretty print JSON output
    #[arg(long)]
    pretty: bool,
}

fn date_arg(s: &str) -> std::result::Result<NaiveDate, String> {
    parse_date(s).ok_or_else(|| format!("expected MM/DD/YYYY, got {s}"))
}

fn time_arg(s: &str) -> std::result::Result<NaiveTime, String> {
    parse_time(s).ok_or_else(|| format!("expected HH:MM[:SS], got {s}"))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchEntry {
    config: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<BacktestReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "futures_backtest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let params = build_params(&args)?;

    let ticks = load_ticks(&args, &params)?;
    info!(ticks = ticks.len(), "Tick data ready");

    if !args.batch_config.is_empty() {
        return run_batch(&args, &ticks);
    }

    let engine = BacktestEngine::new(params)?;
    let mut control = RunControl::new();
    if let Some(secs) = args.timeout_secs {
        control = control.with_timeout(Duration::from_secs(secs));
    }
    let report = engine.run_with_control(&ticks, &control)?;

    match args.output.as_str() {
        "json" => print_json(&report, args.pretty)?,
        "text" => print_text_report(engine.params(), &report),
        _ => {
            warn!("Unknown output format: {}. Using text.", args.output);
            print_text_report(engine.params(), &report);
        }
    }

    Ok(())
}

fn read_params(path: &Path) -> Result<BacktestParameters> {
    let body = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    BacktestParameters::from_json(&body).with_context(|| format!("parsing {}", path.display()))
}

fn build_params(args: &Args) -> Result<BacktestParameters> {
    let mut params = match &args.config {
        Some(path) => read_params(path)?,
        None => BacktestParameters::default(),
    };

    if let Some(date) = args.start_date {
        params.start_date = date;
    }
    if let Some(date) = args.end_date {
        params.end_date = date;
    }
    if let Some(time) = args.start_time {
        params.start_time = time;
    }
    if let Some(time) = args.end_time {
        params.end_time = time;
    }
    if let Some(kind) = &args.bar_type {
        params.bar_type = match kind.to_lowercase().as_str() {
            "time" => BarType::Time,
            "tick" => BarType::Tick,
            other => bail!("Unknown bar type: {other}"),
        };
    }
    if let Some(size) = args.bar_size {
        params.bar_size = size;
    }
    if args.heikin_ashi {
        params.candle_type = CandleType::HeikinAshi;
    }
    if let Some(bars) = args.cvd_lookback {
        params.cvd_look_back_bars = bars;
    }
    if let Some(period) = args.ema {
        params.ema_moving_average = period;
    }
    if let Some(period) = args.sma {
        params.sma_filter = period;
    }
    if args.vwap {
        params.use_vwap = true;
    }
    if let Some(threshold) = args.adx_threshold {
        params.adx_threshold = threshold;
    }
    if let Some(contracts) = args.contracts {
        params.contract_size = contracts;
    }
    if let Some(points) = args.stop_loss {
        params.stop_loss = points;
    }
    if let Some(points) = args.take_profit {
        params.take_profit = points;
    }
    if let Some([trigger, distance]) = args.trailing_stop.as_deref() {
        params = params.with_trailing_stop(*trigger, *distance);
    }
    if let Some(limit) = args.max_daily_loss {
        params.max_daily_loss = limit;
    }
    if let Some(limit) = args.max_daily_profit {
        params.max_daily_profit = limit;
    }
    if args.flatten_on_daily_limit {
        params.flatten_on_daily_limit = true;
    }
    if args.fill_at_close {
        params.fill_timing = FillTiming::SignalBarClose;
    }

    params.validate()?;
    Ok(params)
}

fn load_ticks(args: &Args, params: &BacktestParameters) -> Result<Vec<Tick>> {
    match &args.data_file {
        Some(path) => {
            info!("Loading ticks from {}", path.display());
            load_file(path).with_context(|| format!("Failed to load ticks from {}", path.display()))
        }
        None => {
            info!(
                seed = args.seed,
                "Generating synthetic ticks {} to {} (initial price {:.2})",
                format_date(params.start_date),
                format_date(params.end_date),
                args.initial_price
            );
            Ok(generate_synthetic_ticks(params, args.initial_price, args.seed))
        }
    }
}

fn run_batch(args: &Args, ticks: &[Tick]) -> Result<()> {
    let sets = args
        .batch_config
        .iter()
        .map(|path| read_params(path))
        .collect::<Result<Vec<_>>>()?;

    info!(runs = sets.len(), "Running batch");
    let results = BacktestEngine::run_batch(&sets, ticks);

    let entries: Vec<BatchEntry> = args
        .batch_config
        .iter()
        .zip(results)
        .map(|(path, result)| match result {
            Ok(report) => BatchEntry {
                config: path.display().to_string(),
                report: Some(report),
                error: None,
            },
            Err(e) => BatchEntry {
                config: path.display().to_string(),
                report: None,
                error: Some(e.to_string()),
            },
        })
        .collect();

    print_json(&entries, args.pretty)
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", json);
    Ok(())
}

fn print_text_report(params: &BacktestParameters, report: &BacktestReport) {
    let stats = &report.statistics;
    let account = &stats.account_stats;

    println!();
    println!("================================================================");
    println!("  BACKTEST REPORT - CVD Trend Strategy");
    println!("================================================================");
    println!();
    println!(
        "  Period: {} to {}",
        format_date(params.start_date),
        format_date(params.end_date)
    );
    println!(
        "  Session: {} - {}",
        params.start_time.format("%H:%M"),
        params.end_time.format("%H:%M")
    );
    println!("  Trading Days with Trades: {}", stats.daily_pnl.len());
    println!();
    println!("----------------------------------------------------------------");
    println!("  ACCOUNT");
    println!("----------------------------------------------------------------");
    println!("  Starting Balance: ${:>12.2}", account.starting_balance);
    println!("  Final Balance:    ${:>12.2}", account.final_balance);
    println!(
        "  Total Return:     ${:>12.2} ({:+.2}%)",
        account.total_return, account.total_return_percent
    );
    println!("  Commission:       ${:>12.2}", account.total_commission);
    println!();
    println!("----------------------------------------------------------------");
    println!("  RISK METRICS");
    println!("----------------------------------------------------------------");
    println!("  Sharpe Ratio:     {:>12.3}", stats.sharpe_ratio);
    println!(
        "  Max Drawdown:     ${:>12.2} ({:.2}%)",
        account.max_drawdown, account.max_drawdown_percent
    );
    match account.return_to_drawdown_ratio {
        Some(ratio) => println!("  Return / DD:      {:>12.3}", ratio),
        None => println!("  Return / DD:      {:>12}", "n/a"),
    }
    println!("  Drawdown Events:  {:>12}", report.drawdown_events.len());
    println!();
    println!("----------------------------------------------------------------");
    println!("  TRADE STATISTICS");
    println!("----------------------------------------------------------------");
    println!("  Total Trades:     {:>12}", stats.total_trades);
    println!("  Win Rate:         {:>12.1}%", stats.win_rate);
    println!("  Avg Profit:       ${:>12.2}", stats.average_profit);
    match stats.profit_factor {
        Some(pf) => println!("  Profit Factor:    {:>12.3}", pf),
        None => println!("  Profit Factor:    {:>12}", "n/a"),
    }
    println!(
        "  Max Win Streak:   {:>12}",
        stats.consecutive_stats.max_consecutive_wins
    );
    println!(
        "  Max Loss Streak:  {:>12}",
        stats.consecutive_stats.max_consecutive_losses
    );
    println!(
        "  Long:  {:>4} trades, {:>5.1}% wins, ${:+.2}",
        stats.long_short_stats.long.trades,
        stats.long_short_stats.long.win_rate,
        stats.long_short_stats.long.net_profit_loss
    );
    println!(
        "  Short: {:>4} trades, {:>5.1}% wins, ${:+.2}",
        stats.long_short_stats.short.trades,
        stats.long_short_stats.short.win_rate,
        stats.long_short_stats.short.net_profit_loss
    );
    println!();
    println!("================================================================");

    if !stats.daily_pnl.is_empty() {
        println!();
        println!("  DAILY P&L");
        println!("----------------------------------------------------------------");
        for (date, pnl) in &stats.daily_pnl {
            println!("  {} | ${:+.2}", date, pnl);
        }
    }

    if !report.trades.is_empty() {
        println!();
        println!("  RECENT TRADES (last 5)");
        println!("----------------------------------------------------------------");
        for trade in report.trades.iter().rev().take(5) {
            println!(
                "  {} {} -> {} {} | {} x{} @ {:.2} -> {:.2} | P&L: ${:+.2} ({})",
                format_date(trade.entry_date),
                trade.entry_time.format("%H:%M:%S"),
                format_date(trade.exit_date),
                trade.exit_time.format("%H:%M:%S"),
                trade.direction,
                trade.contracts,
                trade.entry_price,
                trade.exit_price,
                trade.net_profit_loss,
                trade.exit_reason
            );
        }
        println!();
    }
}
