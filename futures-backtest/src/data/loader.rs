use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use common::format::parse_timestamp as parse_wall_clock;
use common::{BacktestError, Result, Tick, TradeSide};

/// Load ticks from a CSV file
pub fn load_csv(path: &Path) -> Result<Vec<Tick>> {
    let file = File::open(path)?;
    read_csv(BufReader::new(file))
}

/// Parse CSV ticks with columns `timestamp,price,volume[,side]` and a header row.
pub fn read_csv<R: Read>(reader: R) -> Result<Vec<Tick>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut ticks = Vec::new();

    for (line, result) in csv_reader.records().enumerate() {
        let record = result.map_err(|e| BacktestError::CsvError(e.to_string()))?;
        let row = line + 2;

        if record.len() < 3 {
            return Err(BacktestError::CsvError(format!(
                "row {row}: expected timestamp,price,volume[,side]"
            )));
        }

        let timestamp = parse_timestamp(&record[0])?;
        let price: f64 = record[1]
            .parse()
            .map_err(|_| BacktestError::CsvError(format!("row {row}: invalid price {:?}", &record[1])))?;
        let volume: u64 = record[2]
            .parse()
            .map_err(|_| BacktestError::CsvError(format!("row {row}: invalid volume {:?}", &record[2])))?;
        let side = record.get(3).map(parse_side).unwrap_or_default();

        ticks.push(Tick::new(timestamp, price, volume, side));
    }

    Ok(ticks)
}

/// Load ticks from a JSON array
pub fn load_json(path: &Path) -> Result<Vec<Tick>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let ticks: Vec<Tick> = serde_json::from_reader(reader)?;
    Ok(ticks)
}

fn parse_side(s: &str) -> TradeSide {
    match s.to_ascii_lowercase().as_str() {
        "buy" | "b" | "ask" | "1" => TradeSide::Buy,
        "sell" | "s" | "bid" | "-1" => TradeSide::Sell,
        _ => TradeSide::Unknown,
    }
}

/// Parse timestamp from the accepted layouts, falling back to Unix seconds
fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    if let Some(ts) = parse_wall_clock(s) {
        return Ok(ts);
    }

    if let Ok(secs) = s.parse::<i64>() {
        if let Some(dt) = DateTime::from_timestamp(secs, 0) {
            return Ok(dt.naive_utc());
        }
    }

    Err(BacktestError::CsvError(format!("Unable to parse timestamp: {s}")))
}
