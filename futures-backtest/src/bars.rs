//! Tick-to-bar aggregation.
//!
//! Ticks are grouped per session (one session per calendar date, bounded by
//! `startTime..=endTime`) into time bars on a grid anchored at the session
//! open, or into fixed-count tick bars. No bar spans two sessions; the last
//! bar of a session is emitted even if it is partial.

use std::iter::Peekable;
use std::slice::Iter;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use common::format::format_timestamp;
use common::{
    BacktestError, BacktestParameters, Bar, BarType, CandleType, Result, Tick, TradeSide,
};

/// Stateless bar factory; every call to [`BarBuilder::bars`] starts a fresh pass.
#[derive(Debug, Clone)]
pub struct BarBuilder<'a> {
    params: &'a BacktestParameters,
    max_gap: Option<Duration>,
}

impl<'a> BarBuilder<'a> {
    pub fn new(params: &'a BacktestParameters) -> Result<Self> {
        if params.bar_size == 0 {
            return Err(BacktestError::Config(
                "barSize must be greater than 0".to_string(),
            ));
        }
        if params.start_time >= params.end_time {
            return Err(BacktestError::Config(format!(
                "startTime {} must be before endTime {}",
                params.start_time, params.end_time
            )));
        }
        Ok(Self {
            params,
            max_gap: (params.max_data_gap_minutes > 0)
                .then(|| Duration::minutes(i64::from(params.max_data_gap_minutes))),
        })
    }

    pub(crate) fn window_bounds(&self) -> (String, String) {
        (
            format_timestamp(self.params.window_start()),
            format_timestamp(self.params.window_end()),
        )
    }

    /// Verify the tick stream is ordered and actually covers the window.
    pub fn check_coverage(&self, ticks: &[Tick]) -> Result<()> {
        let mut prev: Option<NaiveDateTime> = None;
        let mut prev_in_window: Option<NaiveDateTime> = None;

        for tick in ticks {
            if let Some(p) = prev {
                if tick.timestamp < p {
                    return Err(BacktestError::DataLoadError(format!(
                        "ticks out of order at {}",
                        format_timestamp(tick.timestamp)
                    )));
                }
            }
            prev = Some(tick.timestamp);

            if !self.params.in_session(tick.timestamp) {
                continue;
            }
            if let (Some(max_gap), Some(p)) = (self.max_gap, prev_in_window) {
                if p.date() == tick.timestamp.date() && tick.timestamp - p > max_gap {
                    return Err(BacktestError::DataGap {
                        start: format_timestamp(p),
                        end: format_timestamp(tick.timestamp),
                    });
                }
            }
            prev_in_window = Some(tick.timestamp);
        }

        if prev_in_window.is_none() {
            let (start, end) = self.window_bounds();
            return Err(BacktestError::DataGap { start, end });
        }
        Ok(())
    }

    /// Same checks as [`check_coverage`](Self::check_coverage) for pre-built bars.
    pub fn check_bar_coverage(&self, bars: &[Bar]) -> Result<()> {
        let mut prev: Option<&Bar> = None;
        let mut any = false;

        for bar in bars {
            if let Some(p) = prev {
                if bar.timestamp <= p.timestamp {
                    return Err(BacktestError::Computation(format!(
                        "bar timestamps must be strictly increasing, got {} after {}",
                        format_timestamp(bar.timestamp),
                        format_timestamp(p.timestamp)
                    )));
                }
            }
            if self.params.in_session(bar.timestamp) {
                if let (Some(max_gap), Some(p)) = (self.max_gap, prev) {
                    if self.params.in_session(p.timestamp)
                        && p.session_date() == bar.session_date()
                        && bar.timestamp - p.close_time > max_gap
                    {
                        return Err(BacktestError::DataGap {
                            start: format_timestamp(p.close_time),
                            end: format_timestamp(bar.timestamp),
                        });
                    }
                }
                any = true;
            }
            prev = Some(bar);
        }

        if !any {
            let (start, end) = self.window_bounds();
            return Err(BacktestError::DataGap { start, end });
        }
        Ok(())
    }

    /// Lazily aggregate `ticks` into bars.
    pub fn bars<'b>(&'b self, ticks: &'b [Tick]) -> Bars<'b> {
        Bars {
            builder: self,
            ticks: ticks.iter().peekable(),
            pending: None,
            classifier: TickClassifier::default(),
            session: None,
            cvd: 0,
            heikin_ashi: HeikinAshi::default(),
        }
    }

    pub fn build(&self, ticks: &[Tick]) -> Vec<Bar> {
        self.bars(ticks).collect()
    }

    /// Filter pre-built bars to the session window and apply the candle transform.
    pub fn normalize(&self, bars: &[Bar]) -> Vec<Bar> {
        let mut heikin_ashi = HeikinAshi::default();
        bars.iter()
            .filter(|bar| self.params.in_session(bar.timestamp))
            .map(|bar| match self.params.candle_type {
                CandleType::Traditional => bar.clone(),
                CandleType::HeikinAshi => heikin_ashi.apply(bar),
            })
            .collect()
    }

    fn grid_start(&self, ts: NaiveDateTime) -> NaiveDateTime {
        let session_open = ts.date().and_time(self.params.start_time);
        let size = i64::from(self.params.bar_size) * 60;
        let elapsed = (ts - session_open).num_seconds();
        session_open + Duration::seconds(elapsed / size * size)
    }

    fn closes_before(&self, bar: &PartialBar, tick: &Tick) -> bool {
        if tick.timestamp.date() != bar.open_time.date() {
            return true;
        }
        match self.params.bar_type {
            BarType::Time => {
                tick.timestamp >= bar.open_time + Duration::minutes(i64::from(self.params.bar_size))
            }
            BarType::Tick => false,
        }
    }

    /// Tick bars close on their count, but never between prints sharing a timestamp.
    fn is_full(&self, bar: &PartialBar, next: Option<&Tick>) -> bool {
        self.params.bar_type == BarType::Tick
            && bar.ticks >= self.params.bar_size
            && next.map_or(true, |tick| tick.timestamp != bar.last_time)
    }
}

/// Bar under construction
#[derive(Debug)]
struct PartialBar {
    open_time: NaiveDateTime,
    last_time: NaiveDateTime,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
    delta: i64,
    ticks: u32,
}

impl PartialBar {
    fn new(open_time: NaiveDateTime, tick: &Tick, signed_volume: i64) -> Self {
        Self {
            open_time,
            last_time: tick.timestamp,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.volume,
            delta: signed_volume,
            ticks: 1,
        }
    }

    fn add(&mut self, tick: &Tick, signed_volume: i64) {
        self.last_time = tick.timestamp;
        self.high = self.high.max(tick.price);
        self.low = self.low.min(tick.price);
        self.close = tick.price;
        self.volume += tick.volume;
        self.delta += signed_volume;
        self.ticks += 1;
    }
}

/// Tick-rule classification for prints without an aggressor flag
#[derive(Debug, Default)]
struct TickClassifier {
    last_price: Option<f64>,
    last_side: TradeSide,
}

impl TickClassifier {
    fn classify(&mut self, tick: &Tick) -> TradeSide {
        let side = match tick.side {
            TradeSide::Unknown => match self.last_price {
                Some(prev) if tick.price > prev => TradeSide::Buy,
                Some(prev) if tick.price < prev => TradeSide::Sell,
                _ => self.last_side,
            },
            side => side,
        };
        self.last_price = Some(tick.price);
        self.last_side = side;
        side
    }

    fn signed_volume(&mut self, tick: &Tick) -> i64 {
        let volume = i64::try_from(tick.volume).unwrap_or(i64::MAX);
        match self.classify(tick) {
            TradeSide::Buy => volume,
            TradeSide::Sell => -volume,
            TradeSide::Unknown => 0,
        }
    }
}

/// Running Heikin-Ashi transform
#[derive(Debug, Default)]
pub struct HeikinAshi {
    prev: Option<(f64, f64)>,
}

impl HeikinAshi {
    pub fn apply(&mut self, bar: &Bar) -> Bar {
        let ha_close = (bar.open + bar.high + bar.low + bar.close) / 4.0;
        let ha_open = match self.prev {
            Some((prev_open, prev_close)) => (prev_open + prev_close) / 2.0,
            None => (bar.open + bar.close) / 2.0,
        };
        self.prev = Some((ha_open, ha_close));

        Bar {
            open: ha_open,
            high: bar.high.max(ha_open).max(ha_close),
            low: bar.low.min(ha_open).min(ha_close),
            close: ha_close,
            ..bar.clone()
        }
    }
}

/// Lazy bar sequence over a tick slice
pub struct Bars<'a> {
    builder: &'a BarBuilder<'a>,
    ticks: Peekable<Iter<'a, Tick>>,
    pending: Option<PartialBar>,
    classifier: TickClassifier,
    session: Option<NaiveDate>,
    cvd: i64,
    heikin_ashi: HeikinAshi,
}

impl Bars<'_> {
    fn finish(&mut self, partial: PartialBar) -> Bar {
        self.cvd += partial.delta;

        let bar = Bar {
            timestamp: partial.open_time,
            close_time: partial.last_time,
            open: partial.open,
            high: partial.high,
            low: partial.low,
            close: partial.close,
            volume: partial.volume,
            delta: partial.delta,
            cumulative_volume_delta: self.cvd,
        };

        match self.builder.params.candle_type {
            CandleType::Traditional => bar,
            CandleType::HeikinAshi => self.heikin_ashi.apply(&bar),
        }
    }
}

impl Iterator for Bars<'_> {
    type Item = Bar;

    fn next(&mut self) -> Option<Bar> {
        loop {
            let Some(&tick) = self.ticks.peek() else {
                return self.pending.take().map(|partial| self.finish(partial));
            };

            if !self.builder.params.in_session(tick.timestamp) {
                self.ticks.next();
                continue;
            }

            if let Some(partial) = &self.pending {
                if self.builder.closes_before(partial, tick) {
                    let partial = self.pending.take()?;
                    return Some(self.finish(partial));
                }
            }

            self.ticks.next();
            let date = tick.timestamp.date();
            if self.session != Some(date) {
                self.session = Some(date);
                self.cvd = 0;
            }
            let signed_volume = self.classifier.signed_volume(tick);

            match self.pending.as_mut() {
                Some(partial) => partial.add(tick, signed_volume),
                None => {
                    let open_time = match self.builder.params.bar_type {
                        BarType::Time => self.builder.grid_start(tick.timestamp),
                        BarType::Tick => tick.timestamp,
                    };
                    self.pending = Some(PartialBar::new(open_time, tick, signed_volume));
                }
            }

            let next = self.ticks.peek().copied();
            if self.pending.as_ref().is_some_and(|p| self.builder.is_full(p, next)) {
                let partial = self.pending.take()?;
                return Some(self.finish(partial));
            }
        }
    }
}
