//! Bound on joining the outbound task during shutdown.

use std::time::Duration;

/// How long `stop()` waits for the outbound task before aborting it.
///
/// # Valid Range
///
/// - Minimum: 1 second
/// - Maximum: 30 seconds
/// - Default: 5 seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownTimeout(Duration);

impl ShutdownTimeout {
    const DEFAULT_SECS: u64 = 5;

    pub const MIN: Duration = Duration::from_secs(1);

    pub const MAX: Duration = Duration::from_secs(30);

    /// Create a new ShutdownTimeout with validation.
    ///
    /// # Returns
    /// - `Ok(ShutdownTimeout)` if duration is within the valid range (inclusive)
    /// - `Err(io::Error)` with InvalidInput kind otherwise
    pub fn new(duration: Duration) -> std::io::Result<Self> {
        if duration < Self::MIN || duration > Self::MAX {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "Shutdown timeout must be between {:?} and {:?}, got {:?}",
                    Self::MIN,
                    Self::MAX,
                    duration
                ),
            ));
        }
        Ok(Self(duration))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl Default for ShutdownTimeout {
    fn default() -> Self {
        Self(Duration::from_secs(Self::DEFAULT_SECS))
    }
}
