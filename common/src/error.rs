use thiserror::Error;

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Data gap: no coverage from {start} to {end}")]
    DataGap { start: String, end: String },

    #[error("Computation error: {0}")]
    Computation(String),

    #[error("Backtest cancelled")]
    Cancelled,

    #[error("Backtest timed out after {elapsed_ms}ms")]
    TimedOut { elapsed_ms: u64 },

    #[error("Data loading error: {0}")]
    DataLoadError(String),

    #[error("CSV parse error: {0}")]
    CsvError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl BacktestError {
    /// True for errors raised before any bar was simulated.
    pub fn is_config(&self) -> bool {
        matches!(self, BacktestError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, BacktestError>;
