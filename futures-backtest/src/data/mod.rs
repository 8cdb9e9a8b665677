pub mod loader;
pub mod synthetic;

pub use loader::{load_csv, load_json, read_csv};
pub use synthetic::generate_synthetic_ticks;

use std::path::Path;

use common::{BacktestError, Result, Tick};

/// Load ticks from file, detecting format from extension
pub fn load_file(path: &Path) -> Result<Vec<Tick>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "csv" => load_csv(path),
        "json" => load_json(path),
        _ => Err(BacktestError::DataLoadError(format!(
            "Unsupported file format: {}",
            ext
        ))),
    }
}
