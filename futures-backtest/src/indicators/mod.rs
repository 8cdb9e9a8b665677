pub mod adx;
pub mod ema;
pub mod sma;
pub mod vwap;

pub use adx::{calculate_adx, directional_movement, true_range, Adx, ADX_PERIOD};
pub use ema::{calculate_ema_with_sma_seed, Ema};
pub use sma::{calculate_sma, Sma};
pub use vwap::Vwap;

use common::{BacktestParameters, Bar};

/// Streaming estimator fed one closed bar at a time
pub trait Indicator {
    /// Consume a closed bar and return the latest value, `None` during warm-up
    fn update(&mut self, bar: &Bar) -> Option<f64>;

    fn value(&self) -> Option<f64>;
}

/// Indicator readings after a bar; `None` means disabled or still warming up
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IndicatorValues {
    pub ema: Option<f64>,
    pub sma: Option<f64>,
    pub vwap: Option<f64>,
    pub adx: Option<f64>,
}

/// One estimator per enabled filter, owned by a single backtest run
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    ema: Option<Ema>,
    sma: Option<Sma>,
    vwap: Option<Vwap>,
    adx: Option<Adx>,
}

impl IndicatorEngine {
    pub fn new(params: &BacktestParameters) -> Self {
        Self {
            ema: params
                .ema_enabled()
                .then(|| Ema::new(params.ema_moving_average)),
            sma: params.sma_enabled().then(|| Sma::new(params.sma_filter)),
            vwap: params.use_vwap.then(Vwap::new),
            adx: params.adx_enabled().then(Adx::default),
        }
    }

    pub fn update(&mut self, bar: &Bar) -> IndicatorValues {
        IndicatorValues {
            ema: self.ema.as_mut().and_then(|i| i.update(bar)),
            sma: self.sma.as_mut().and_then(|i| i.update(bar)),
            vwap: self.vwap.as_mut().and_then(|i| i.update(bar)),
            adx: self.adx.as_mut().and_then(|i| i.update(bar)),
        }
    }

}

/// Full recomputation over a bar history, used to audit the streaming estimators
#[derive(Debug)]
pub struct IndicatorSeries {
    pub ema: Vec<Option<f64>>,
    pub sma: Vec<Option<f64>>,
    pub adx: Vec<Option<f64>>,
}

impl IndicatorSeries {
    pub fn calculate(bars: &[Bar], ema_period: usize, sma_period: usize, adx_period: usize) -> Self {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();

        Self {
            ema: calculate_ema_with_sma_seed(&closes, ema_period),
            sma: calculate_sma(&closes, sma_period),
            adx: calculate_adx(&highs, &lows, &closes, adx_period),
        }
    }

    pub fn get(&self, idx: usize) -> IndicatorValues {
        IndicatorValues {
            ema: self.ema.get(idx).copied().flatten(),
            sma: self.sma.get(idx).copied().flatten(),
            vwap: None,
            adx: self.adx.get(idx).copied().flatten(),
        }
    }
}
