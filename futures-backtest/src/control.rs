use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{BacktestError, Result};

/// Cooperative cancellation and deadline for one run, checked between bars.
///
/// Clones share the cancel flag, so a handle kept by the caller can stop a
/// run executing on another thread.
#[derive(Debug, Clone)]
pub struct RunControl {
    cancel: Arc<AtomicBool>,
    started: Instant,
    timeout: Option<Duration>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            started: Instant::now(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(BacktestError::Cancelled);
        }
        if let Some(timeout) = self.timeout {
            let elapsed = self.started.elapsed();
            if elapsed > timeout {
                return Err(BacktestError::TimedOut {
                    elapsed_ms: elapsed.as_millis() as u64,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_control_passes() {
        assert!(RunControl::new().check().is_ok());
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let control = RunControl::new();
        let handle = control.clone();
        handle.cancel();
        assert!(control.is_cancelled());
        assert!(matches!(control.check(), Err(BacktestError::Cancelled)));
    }

    #[test]
    fn test_zero_timeout_expires() {
        let control = RunControl::new().with_timeout(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        assert!(matches!(control.check(), Err(BacktestError::TimedOut { .. })));
    }
}
