pub mod config;
pub mod error;
pub mod format;
pub mod types;

pub use config::{BacktestParameters, BarType, CandleType, FillTiming};
pub use error::{BacktestError, Result};
pub use format::{convert_zone, SessionDate};
pub use types::*;
